//! Both speech services, started together from one configuration.

use crate::config::JackConfig;
use crate::error::VoiceResult;
use crate::recognition::SpeechRecognizer;
use crate::synthesis::SpeechSynthesizer;
use jack_worker::{StatsSnapshot, WorkerStatus};
use serde::Serialize;
use tracing::info;

#[derive(Clone)]
pub struct VoiceServices {
    pub recognizer: SpeechRecognizer,
    pub synthesizer: SpeechSynthesizer,
}

/// Lifecycle and counters of one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub name: String,
    pub status: WorkerStatus,
    pub stats: StatsSnapshot,
}

impl VoiceServices {
    /// Validate `config` and launch both workers. Must be called from within a
    /// tokio runtime.
    pub fn start(config: &JackConfig) -> VoiceResult<Self> {
        config.validate()?;
        let services = Self {
            recognizer: SpeechRecognizer::start(config),
            synthesizer: SpeechSynthesizer::start(config),
        };
        info!(
            target: "jack::voice",
            recognition = %config.recognition.program,
            synthesis = %config.synthesis.program,
            voice = %config.voice(),
            "speech services starting"
        );
        Ok(services)
    }

    /// Wait until both workers have reported readiness.
    pub async fn wait_ready(&self) -> VoiceResult<()> {
        let (recognition, synthesis) = tokio::join!(
            self.recognizer.supervisor().wait_ready(),
            self.synthesizer.supervisor().wait_ready()
        );
        recognition?;
        synthesis?;
        Ok(())
    }

    pub fn report(&self) -> Vec<ServiceReport> {
        let recognition = self.recognizer.supervisor();
        let synthesis = self.synthesizer.supervisor();
        vec![
            ServiceReport {
                name: recognition.name().to_string(),
                status: recognition.status(),
                stats: recognition.stats(),
            },
            ServiceReport {
                name: synthesis.name().to_string(),
                status: synthesis.status(),
                stats: synthesis.stats(),
            },
        ]
    }

    pub async fn shutdown(&self) {
        tokio::join!(
            self.recognizer.supervisor().shutdown(),
            self.synthesizer.supervisor().shutdown()
        );
        info!(target: "jack::voice", "speech services stopped");
    }
}
