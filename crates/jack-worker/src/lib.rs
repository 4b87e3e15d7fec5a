//! # jack-worker - line-protocol worker supervision
//!
//! Runs a long-lived helper process (speech recognition, speech synthesis, ...)
//! that takes exactly one request per stdin line and answers with exactly one
//! stdout line, and lets any number of concurrent callers share it.
//!
//! ```text
//!  callers ──call()──▶ ┌──────────── Supervisor actor ────────────┐
//!                      │  RequestQueue (FIFO)                      │
//!                      │     │ drain: ready ∧ idle                 │
//!                      │     ▼                                     │
//!                      │  stdin ──▶ worker process ──▶ stdout      │
//!                      │                          READY │ reply    │
//!                      │  readiness gate ◀──────────────┤          │
//!                      │  head outcome  ◀───────────────┘          │
//!                      │  exit ──▶ backoff ──▶ relaunch            │
//!                      └───────────────────────────────────────────┘
//! ```
//!
//! Guarantees per supervisor: at most one request in flight, outcomes in
//! submission order, a per-request deadline, and queued requests survive a
//! worker crash.

pub mod config;
pub mod error;
pub mod process;
pub mod protocol;
mod queue;
mod router;
pub mod supervisor;

pub use config::{WorkerConfig, DEFAULT_READY_SENTINEL, DEFAULT_RESTART_BACKOFF};
pub use error::{WorkerError, WorkerResult};
pub use process::{CommandLauncher, WorkerChild, WorkerInput, WorkerLauncher, WorkerOutput, WorkerProcess};
pub use protocol::{LineProtocol, ProtocolError, Reply};
pub use supervisor::{StatsSnapshot, Supervisor, SupervisorStats, Ticket, WorkerStatus};
