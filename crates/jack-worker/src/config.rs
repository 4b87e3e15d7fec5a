//! Supervisor configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Readiness marker a worker prints once it can accept requests.
pub const DEFAULT_READY_SENTINEL: &str = "READY";

/// Delay between a worker exit and the next launch attempt.
pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_millis(1000);

/// How to run one worker and how the supervisor treats it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Service name used in logs and errors (e.g. "recognition").
    pub name: String,
    /// Executable to launch.
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Variables set on the child, replacing any inherited value.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Entries appended to an inherited path-list variable with the platform
    /// separator (e.g. `PYTHONPATH` += `../pylib`).
    #[serde(default)]
    pub env_append: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Deadline for one dispatched request.
    pub request_timeout: Duration,
    pub restart_backoff: Duration,
    /// `None` restarts forever.
    #[serde(default)]
    pub max_restarts: Option<u32>,
    /// `None` leaves the queue unbounded.
    #[serde(default)]
    pub max_queue_depth: Option<usize>,
    pub ready_sentinel: String,
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            env_append: BTreeMap::new(),
            working_dir: None,
            request_timeout: Duration::from_secs(15),
            restart_backoff: DEFAULT_RESTART_BACKOFF,
            max_restarts: None,
            max_queue_depth: None,
            ready_sentinel: DEFAULT_READY_SENTINEL.to_string(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_env_append(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_append.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = backoff;
        self
    }

    pub fn with_max_restarts(mut self, max: Option<u32>) -> Self {
        self.max_restarts = max;
        self
    }

    pub fn with_max_queue_depth(mut self, depth: Option<usize>) -> Self {
        self.max_queue_depth = depth;
        self
    }

    pub fn with_ready_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.ready_sentinel = sentinel.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_worker_contract() {
        let c = WorkerConfig::new("recognition", "python3");
        assert_eq!(c.ready_sentinel, "READY");
        assert_eq!(c.restart_backoff, Duration::from_secs(1));
        assert!(c.max_restarts.is_none());
        assert!(c.max_queue_depth.is_none());
    }

    #[test]
    fn builder_sets_fields() {
        let c = WorkerConfig::new("synthesis", "python3")
            .with_args(["utils/tts_service.py"])
            .with_env_append("PYTHONPATH", "../pylib")
            .with_request_timeout(Duration::from_millis(20_000))
            .with_max_queue_depth(Some(8));
        assert_eq!(c.args, vec!["utils/tts_service.py".to_string()]);
        assert_eq!(c.env_append.get("PYTHONPATH").map(String::as_str), Some("../pylib"));
        assert_eq!(c.request_timeout, Duration::from_secs(20));
        assert_eq!(c.max_queue_depth, Some(8));
    }
}
