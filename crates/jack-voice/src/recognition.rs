//! **Speech-to-Text**: a persistent recognition worker behind a supervisor.
//!
//! Wire format: one audio file path per request line; one
//! `{"text": ...}` or `{"error": ...}` object per reply line.

use crate::audio::{prepare_for_recognition, remove_quietly, scratch_dir, scratch_path};
use crate::config::{AudioSection, JackConfig};
use crate::error::{VoiceError, VoiceResult};
use jack_worker::{LineProtocol, ProtocolError, Reply, Supervisor};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Default)]
pub struct RecognitionProtocol;

#[derive(Debug, Deserialize)]
struct RecognitionReply {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl LineProtocol for RecognitionProtocol {
    type Request = PathBuf;
    type Response = String;

    fn name(&self) -> &str {
        "recognition"
    }

    fn encode(&self, request: &PathBuf) -> Result<String, ProtocolError> {
        request
            .to_str()
            .map(str::to_string)
            .ok_or_else(|| ProtocolError(format!("path is not valid UTF-8: {}", request.display())))
    }

    fn decode(&self, line: &str) -> Result<Reply<String>, ProtocolError> {
        let reply: RecognitionReply = serde_json::from_str(line)?;
        match reply.error {
            Some(err) if !err.is_empty() => Ok(Err(err)),
            _ => Ok(Ok(reply.text.unwrap_or_default())),
        }
    }
}

/// Turns uploaded audio into text through the recognition worker.
#[derive(Clone)]
pub struct SpeechRecognizer {
    supervisor: Supervisor<RecognitionProtocol>,
    audio: AudioSection,
}

impl SpeechRecognizer {
    /// Launch the configured recognition worker.
    pub fn start(config: &JackConfig) -> Self {
        let supervisor = Supervisor::start(config.recognition_worker(), RecognitionProtocol);
        Self::new(supervisor, config.audio.clone())
    }

    pub fn new(supervisor: Supervisor<RecognitionProtocol>, audio: AudioSection) -> Self {
        Self { supervisor, audio }
    }

    pub fn supervisor(&self) -> &Supervisor<RecognitionProtocol> {
        &self.supervisor
    }

    /// Transcribe `audio`; scratch files are removed whatever the outcome.
    pub async fn transcribe(&self, audio: &[u8]) -> VoiceResult<String> {
        let dir = scratch_dir(&self.audio.temp_dir).await?;
        let input = scratch_path(&dir, "stt_in");
        let prepared = scratch_path(&dir, "stt_out");

        let result = async {
            tokio::fs::write(&input, audio).await?;
            prepare_for_recognition(&self.audio.ffmpeg_path, &input, &prepared).await?;
            let text = self.supervisor.call(prepared.clone()).await?;
            Ok::<_, VoiceError>(text)
        }
        .await;

        remove_quietly(&input).await;
        remove_quietly(&prepared).await;
        result
    }

    /// Like [`transcribe`](Self::transcribe), but every failure is logged and
    /// reported as an empty transcript.
    pub async fn recognize(&self, audio: &[u8]) -> String {
        info!(target: "jack::voice", bytes = audio.len(), "recognizing speech");
        match self.transcribe(audio).await {
            Ok(text) => {
                info!(target: "jack::voice", text = %text, "recognition result");
                text
            }
            Err(e) => {
                error!(target: "jack::voice", error = %e, "recognition failed");
                String::new()
            }
        }
    }
}
