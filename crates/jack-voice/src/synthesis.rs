//! **Text-to-Speech**: a persistent synthesis worker behind a supervisor.
//!
//! Each job names the file the worker must write its audio to. The reply
//! carries per-word timings (opaque to us, passed through in order) or an
//! error.

use crate::audio::{remove_quietly, scratch_dir, scratch_path};
use crate::config::JackConfig;
use jack_worker::{LineProtocol, ProtocolError, Reply, Supervisor, WorkerError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const READ_FAILURE: &str = "Failed to read generated audio file";
pub const TIMEOUT_MESSAGE: &str = "TTS processing timed out";

/// One synthesis request as written to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisJob {
    pub text: String,
    pub output_file: PathBuf,
    pub voice: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SynthesisProtocol;

#[derive(Debug, Deserialize)]
struct SynthesisReply {
    #[serde(default)]
    timings: Option<Vec<Value>>,
    #[serde(default)]
    error: Option<String>,
}

impl LineProtocol for SynthesisProtocol {
    type Request = SynthesisJob;
    type Response = Vec<Value>;

    fn name(&self) -> &str {
        "synthesis"
    }

    fn encode(&self, request: &SynthesisJob) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(request)?)
    }

    fn decode(&self, line: &str) -> Result<Reply<Vec<Value>>, ProtocolError> {
        let reply: SynthesisReply = serde_json::from_str(line)?;
        match reply.error {
            Some(err) if !err.is_empty() => Ok(Err(err)),
            _ => Ok(Ok(reply.timings.unwrap_or_default())),
        }
    }
}

/// Result of one synthesis call. Serializes as `{audio, timings}` or `{error}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SynthesisOutcome {
    Speech { audio: Vec<u8>, timings: Vec<Value> },
    Failed { error: String },
}

impl SynthesisOutcome {
    pub fn is_speech(&self) -> bool {
        matches!(self, SynthesisOutcome::Speech { .. })
    }

    fn failed(error: impl Into<String>) -> Self {
        SynthesisOutcome::Failed {
            error: error.into(),
        }
    }
}

/// Turns text into audio through the synthesis worker.
#[derive(Clone)]
pub struct SpeechSynthesizer {
    supervisor: Supervisor<SynthesisProtocol>,
    voice: String,
    temp_dir: PathBuf,
}

impl SpeechSynthesizer {
    /// Launch the configured synthesis worker.
    pub fn start(config: &JackConfig) -> Self {
        let supervisor = Supervisor::start(config.synthesis_worker(), SynthesisProtocol);
        Self::new(supervisor, config.voice(), config.audio.temp_dir.clone())
    }

    pub fn new(
        supervisor: Supervisor<SynthesisProtocol>,
        voice: impl Into<String>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            supervisor,
            voice: voice.into(),
            temp_dir: temp_dir.into(),
        }
    }

    pub fn supervisor(&self) -> &Supervisor<SynthesisProtocol> {
        &self.supervisor
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// Synthesize `text`. Failures come back as [`SynthesisOutcome::Failed`].
    pub async fn synthesize(&self, text: &str) -> SynthesisOutcome {
        let dir = match scratch_dir(&self.temp_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                error!(target: "jack::voice", dir = %self.temp_dir.display(), error = %e, "cannot create scratch dir");
                return SynthesisOutcome::failed(e.to_string());
            }
        };

        let output_file = scratch_path(&dir, "tts");
        let preview: String = text.chars().take(20).collect();
        info!(target: "jack::voice", text = %preview, voice = %self.voice, "queuing synthesis");

        let job = SynthesisJob {
            text: text.to_string(),
            output_file: output_file.clone(),
            voice: self.voice.clone(),
        };

        match self.supervisor.call(job).await {
            Ok(timings) => read_speech(&output_file, timings).await,
            Err(e) => {
                warn!(target: "jack::voice", error = %e, "synthesis failed");
                remove_quietly(&output_file).await;
                match e {
                    WorkerError::Worker(message) => SynthesisOutcome::failed(message),
                    WorkerError::Timeout { .. } => SynthesisOutcome::failed(TIMEOUT_MESSAGE),
                    other => SynthesisOutcome::failed(other.to_string()),
                }
            }
        }
    }
}

async fn read_speech(output_file: &Path, timings: Vec<Value>) -> SynthesisOutcome {
    match tokio::fs::read(output_file).await {
        Ok(audio) => {
            remove_quietly(output_file).await;
            info!(target: "jack::voice", bytes = audio.len(), timings = timings.len(), "synthesis complete");
            SynthesisOutcome::Speech { audio, timings }
        }
        Err(e) => {
            error!(target: "jack::voice", file = %output_file.display(), error = %e, "generated audio unreadable");
            SynthesisOutcome::failed(READ_FAILURE)
        }
    }
}
