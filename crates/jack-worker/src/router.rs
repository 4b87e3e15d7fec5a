//! Response routing: classify each worker output line.
//!
//! Correlation is implicit: the worker answers in submission order, so a reply
//! always belongs to the in-flight queue head. Nothing in the line is used to
//! match it to a request.

use crate::protocol::{LineProtocol, ProtocolError, Reply};

/// What one stdout line means to the supervisor.
#[derive(Debug)]
pub(crate) enum LineEvent<T> {
    /// Whitespace only; ignored.
    Blank,
    /// The readiness sentinel.
    Ready,
    /// A decoded reply for the in-flight request.
    Reply(Reply<T>),
    /// Not the sentinel and not a reply record.
    Noise(ProtocolError),
}

pub(crate) fn classify<P: LineProtocol>(
    protocol: &P,
    sentinel: &str,
    line: &str,
) -> LineEvent<P::Response> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineEvent::Blank;
    }
    if trimmed == sentinel {
        return LineEvent::Ready;
    }
    match protocol.decode(trimmed) {
        Ok(reply) => LineEvent::Reply(reply),
        Err(e) => LineEvent::Noise(e),
    }
}
