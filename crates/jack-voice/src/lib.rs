//! # jack-voice - speech services on supervised workers
//!
//! Two long-lived workers, each behind a [`jack_worker::Supervisor`]:
//!
//! ```text
//!  audio bytes ─▶ ffmpeg (16 kHz mono wav) ─▶ recognition worker ─▶ text
//!  text ─▶ { text, output_file, voice } ─▶ synthesis worker ─▶ wav + timings
//! ```
//!
//! [`dialogue`] shapes a reply into per-sentence messages before synthesis.

pub mod audio;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod recognition;
pub mod services;
pub mod synthesis;

pub use config::{AudioSection, JackConfig, ServiceSection, DEFAULT_VOICE};
pub use dialogue::{compose_messages, select_animation, select_facial_expression, split_sentences, DialogueMessage};
pub use error::{VoiceError, VoiceResult};
pub use recognition::{RecognitionProtocol, SpeechRecognizer};
pub use services::{ServiceReport, VoiceServices};
pub use synthesis::{SpeechSynthesizer, SynthesisJob, SynthesisOutcome, SynthesisProtocol};
