//! **Configuration** for the speech services.
//!
//! Sources, lowest precedence first: built-in defaults, the TOML file named by
//! `JACK_CONFIG` (default `config/jack.toml`, skipped when missing), then
//! `JACK__<SECTION>__<KEY>` environment variables
//! (e.g. `JACK__SYNTHESIS__TIMEOUT_MS=25000`).

use crate::error::{VoiceError, VoiceResult};
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};
use jack_worker::{WorkerConfig, DEFAULT_READY_SENTINEL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/jack.toml";

/// Voice sent with every synthesis job unless configured otherwise.
pub const DEFAULT_VOICE: &str = "piper";

pub const RECOGNITION_TIMEOUT_MS: u64 = 15_000;
pub const SYNTHESIS_TIMEOUT_MS: u64 = 20_000;

/// How to run one worker service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// `KEY=VALUE` entries set in the worker's environment.
    #[serde(default)]
    pub env: Vec<String>,
    /// `KEY=VALUE` entries appended to an inherited path-list variable such
    /// as `PYTHONPATH`.
    #[serde(default)]
    pub env_append: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    pub timeout_ms: u64,
    pub restart_backoff_ms: u64,
    #[serde(default)]
    pub max_restarts: Option<u32>,
    #[serde(default)]
    pub max_queue_depth: Option<usize>,
    pub ready_sentinel: String,
    /// Synthesis only.
    #[serde(default)]
    pub voice: Option<String>,
}

impl ServiceSection {
    pub fn to_worker_config(&self, name: &str) -> WorkerConfig {
        let mut config = WorkerConfig::new(name, self.program.clone())
            .with_args(self.args.iter().cloned())
            .with_request_timeout(Duration::from_millis(self.timeout_ms))
            .with_restart_backoff(Duration::from_millis(self.restart_backoff_ms))
            .with_max_restarts(self.max_restarts)
            .with_max_queue_depth(self.max_queue_depth)
            .with_ready_sentinel(self.ready_sentinel.clone());
        for (key, value) in self.env.iter().filter_map(|e| split_env(e)) {
            config = config.with_env(key, value);
        }
        for (key, value) in self.env_append.iter().filter_map(|e| split_env(e)) {
            config = config.with_env_append(key, value);
        }
        if let Some(dir) = &self.working_dir {
            config = config.with_working_dir(dir.clone());
        }
        config
    }

    fn validate(&self, section: &str) -> VoiceResult<()> {
        if self.program.trim().is_empty() {
            return Err(VoiceError::Config(format!("{section}.program is empty")));
        }
        if self.timeout_ms == 0 {
            return Err(VoiceError::Config(format!("{section}.timeout_ms must be positive")));
        }
        if self.ready_sentinel.trim().is_empty() {
            return Err(VoiceError::Config(format!("{section}.ready_sentinel is empty")));
        }
        for entry in self.env.iter().chain(&self.env_append) {
            if split_env(entry).is_none() {
                return Err(VoiceError::Config(format!(
                    "{section}: environment entry {entry:?} is not KEY=VALUE"
                )));
            }
        }
        Ok(())
    }
}

fn split_env(entry: &str) -> Option<(&str, &str)> {
    entry
        .split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim(), value))
}

/// Audio preparation and scratch files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSection {
    pub ffmpeg_path: String,
    pub temp_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JackConfig {
    pub recognition: ServiceSection,
    pub synthesis: ServiceSection,
    pub audio: AudioSection,
}

impl JackConfig {
    /// Load from `JACK_CONFIG` (or `config/jack.toml`) plus the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("JACK_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Load with an explicit file path. A missing file is not an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let builder = defaults()?;
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("JACK").separator("__"))
            .build()?;

        built.try_deserialize()
    }

    pub fn validate(&self) -> VoiceResult<()> {
        self.recognition.validate("recognition")?;
        self.synthesis.validate("synthesis")?;
        if self.audio.ffmpeg_path.trim().is_empty() {
            return Err(VoiceError::Config("audio.ffmpeg_path is empty".to_string()));
        }
        Ok(())
    }

    pub fn recognition_worker(&self) -> WorkerConfig {
        self.recognition.to_worker_config("recognition")
    }

    pub fn synthesis_worker(&self) -> WorkerConfig {
        self.synthesis.to_worker_config("synthesis")
    }

    pub fn voice(&self) -> &str {
        self.synthesis.voice.as_deref().unwrap_or(DEFAULT_VOICE)
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let builder = config::Config::builder()
        .set_default("recognition.program", "python3")?
        .set_default("recognition.args", vec!["utils/stt_whisper_service.py"])?
        .set_default("recognition.timeout_ms", RECOGNITION_TIMEOUT_MS as i64)?
        .set_default("recognition.restart_backoff_ms", 1000_i64)?
        .set_default("recognition.ready_sentinel", DEFAULT_READY_SENTINEL)?
        .set_default("synthesis.program", "python3")?
        .set_default("synthesis.args", vec!["utils/tts_service.py"])?
        .set_default("synthesis.timeout_ms", SYNTHESIS_TIMEOUT_MS as i64)?
        .set_default("synthesis.restart_backoff_ms", 1000_i64)?
        .set_default("synthesis.ready_sentinel", DEFAULT_READY_SENTINEL)?
        .set_default("synthesis.voice", DEFAULT_VOICE)?
        .set_default("audio.ffmpeg_path", "ffmpeg")?
        .set_default("audio.temp_dir", "tmp")?;
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = JackConfig::load_from(Path::new("/nonexistent/jack.toml")).unwrap();
        assert_eq!(config.recognition.timeout_ms, 15_000);
        assert_eq!(config.synthesis.timeout_ms, 20_000);
        assert_eq!(config.recognition.restart_backoff_ms, 1000);
        assert_eq!(config.recognition.ready_sentinel, "READY");
        assert_eq!(config.voice(), "piper");
        assert_eq!(config.audio.ffmpeg_path, "ffmpeg");
        assert!(config.recognition.max_restarts.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[synthesis]
timeout_ms = 25000
voice = "amy"
args = ["tts.py", "--fast"]
max_queue_depth = 32

[audio]
temp_dir = "/var/tmp/jack"
"#
        )
        .unwrap();

        let config = JackConfig::load_from(file.path()).unwrap();
        assert_eq!(config.synthesis.timeout_ms, 25_000);
        assert_eq!(config.voice(), "amy");
        assert_eq!(config.synthesis.args, vec!["tts.py", "--fast"]);
        assert_eq!(config.synthesis.max_queue_depth, Some(32));
        assert_eq!(config.audio.temp_dir, PathBuf::from("/var/tmp/jack"));
        // Untouched keys keep their defaults.
        assert_eq!(config.synthesis.program, "python3");
        assert_eq!(config.recognition.timeout_ms, 15_000);
        assert_eq!(config.audio.ffmpeg_path, "ffmpeg");
    }

    #[test]
    fn sections_become_worker_configs() {
        let config = JackConfig::load_from(Path::new("/nonexistent/jack.toml")).unwrap();
        let recognition = config.recognition_worker();
        assert_eq!(recognition.name, "recognition");
        assert_eq!(recognition.request_timeout, Duration::from_millis(15_000));
        assert_eq!(recognition.args, vec!["utils/stt_whisper_service.py"]);

        let mut section = config.synthesis.clone();
        section.env_append.push("PYTHONPATH=pylib".into());
        section.env.push("PYTHONUNBUFFERED=1".into());
        section.working_dir = Some(PathBuf::from("apps/backend"));
        let synthesis = section.to_worker_config("synthesis");
        assert_eq!(synthesis.request_timeout, Duration::from_millis(20_000));
        assert_eq!(synthesis.env_append.get("PYTHONPATH").map(String::as_str), Some("pylib"));
        assert_eq!(synthesis.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
        assert_eq!(synthesis.working_dir, Some(PathBuf::from("apps/backend")));
    }

    #[test]
    fn validate_rejects_malformed_env_entry() {
        let mut config = JackConfig::load_from(Path::new("/nonexistent/jack.toml")).unwrap();
        config.recognition.env.push("PYTHONPATH".into());
        assert!(matches!(config.validate(), Err(VoiceError::Config(_))));
        assert_eq!(split_env("A=b=c"), Some(("A", "b=c")));
        assert_eq!(split_env("=x"), None);
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = JackConfig::load_from(Path::new("/nonexistent/jack.toml")).unwrap();
        config.synthesis.timeout_ms = 0;
        match config.validate() {
            Err(VoiceError::Config(msg)) => assert!(msg.contains("synthesis.timeout_ms")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
