//! Wire protocol seam between the supervisor and a concrete worker.
//!
//! The supervisor owns framing (one line per request, one line per reply) and
//! correlation (replies resolve the queue head in submission order). A
//! `LineProtocol` only turns requests into a line and a reply line back into
//! a typed result.

use thiserror::Error;

/// The line could not be understood as a reply record.
///
/// Returned from [`LineProtocol::decode`] for noise such as progress output or
/// partial writes. The supervisor counts and logs these; they never resolve a
/// request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unparseable worker line: {0}")]
pub struct ProtocolError(pub String);

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError(err.to_string())
    }
}

/// A decoded reply: the worker either produced a result or reported an error
/// for the request it was working on.
pub type Reply<T> = Result<T, String>;

/// Encodes requests and decodes replies for one kind of worker.
pub trait LineProtocol: Send + Sync + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    /// Short name used in logs (e.g. "recognition").
    fn name(&self) -> &str;

    /// Render a request as a single line. Must not contain a newline.
    fn encode(&self, request: &Self::Request) -> Result<String, ProtocolError>;

    /// Interpret a non-sentinel, non-blank output line.
    fn decode(&self, line: &str) -> Result<Reply<Self::Response>, ProtocolError>;
}

/// Reject encodings that would break line framing.
pub(crate) fn check_single_line(line: String) -> Result<String, ProtocolError> {
    if line.contains('\n') || line.contains('\r') {
        return Err(ProtocolError(
            "encoded request spans multiple lines".to_string(),
        ));
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_line_encodings_are_rejected() {
        assert!(check_single_line("a\nb".to_string()).is_err());
        assert!(check_single_line("a\rb".to_string()).is_err());
        assert_eq!(check_single_line("{\"a\":1}".to_string()).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn json_errors_convert() {
        let err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let p: ProtocolError = err.into();
        assert!(p.to_string().starts_with("unparseable worker line"));
    }
}
