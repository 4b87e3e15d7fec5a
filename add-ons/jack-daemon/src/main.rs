//! Jack speech daemon
//!
//! Boots the recognition and synthesis workers from `JackConfig` and exposes
//! them on the command line:
//!
//! ```text
//! jack-daemon serve                          run both workers until Ctrl-C
//! jack-daemon recognize <audio-file>         print the transcript
//! jack-daemon synthesize [--out DIR] <text…> write message_<n>.wav files
//! jack-daemon status                         print the resolved configuration
//! ```

use jack_voice::{compose_messages, JackConfig, SpeechRecognizer, SpeechSynthesizer, SynthesisOutcome, VoiceServices};
use jack_worker::WorkerStatus;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often `serve` logs worker status.
const DEFAULT_REPORT_INTERVAL_SECS: u64 = 60;

const USAGE: &str = "usage: jack-daemon <serve | recognize <audio-file> | synthesize [--out DIR] <text...> | status>";

type DaemonResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

enum Command {
    Serve,
    Recognize { file: PathBuf },
    Synthesize { text: String, out_dir: PathBuf },
    Status,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let Some((command, rest)) = args.split_first() else {
        return Ok(Command::Serve);
    };
    match command.as_str() {
        "serve" => Ok(Command::Serve),
        "status" => Ok(Command::Status),
        "recognize" => match rest {
            [file] => Ok(Command::Recognize {
                file: PathBuf::from(file),
            }),
            _ => Err("recognize takes exactly one audio file".to_string()),
        },
        "synthesize" => {
            let mut out_dir = PathBuf::from(".");
            let mut words = Vec::new();
            let mut iter = rest.iter();
            while let Some(arg) = iter.next() {
                if arg == "--out" {
                    let dir = iter.next().ok_or("--out needs a directory")?;
                    out_dir = PathBuf::from(dir);
                } else {
                    words.push(arg.as_str());
                }
            }
            if words.is_empty() {
                return Err("synthesize needs some text".to_string());
            }
            Ok(Command::Synthesize {
                text: words.join(" "),
                out_dir,
            })
        }
        other => Err(format!("unknown command: {other}")),
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[jack-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("[jack-daemon] {e}\n{USAGE}");
            std::process::exit(2);
        }
    };

    let config = match JackConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[jack-daemon] configuration error: {e}");
            std::process::exit(1);
        }
    };

    let result = match command {
        Command::Serve => serve(&config).await,
        Command::Recognize { file } => recognize(&config, file).await,
        Command::Synthesize { text, out_dir } => synthesize(&config, &text, out_dir).await,
        Command::Status => status(&config),
    };

    if let Err(e) = result {
        eprintln!("[jack-daemon] {e}");
        std::process::exit(1);
    }
}

async fn serve(config: &JackConfig) -> DaemonResult<()> {
    let services = VoiceServices::start(config)?;
    let report_every = std::env::var("JACK_REPORT_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_REPORT_INTERVAL_SECS)
        .max(1);

    tracing::info!(
        temp_dir = %config.audio.temp_dir.display(),
        report_interval_secs = report_every,
        "Jack daemon started"
    );

    let ready = {
        let services = services.clone();
        tokio::spawn(async move {
            match services.wait_ready().await {
                Ok(()) => tracing::info!("speech services ready"),
                Err(e) => tracing::error!(error = %e, "speech services did not become ready"),
            }
        })
    };

    let mut interval = tokio::time::interval(Duration::from_secs(report_every));
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for report in services.report() {
                    if report.status == WorkerStatus::Failed {
                        tracing::error!(service = %report.name, "worker gave up restarting");
                    }
                    tracing::info!(
                        service = %report.name,
                        status = ?report.status,
                        pending = report.stats.pending,
                        completed = report.stats.completed,
                        failed = report.stats.failed,
                        restarts = report.stats.restarts,
                        "worker status"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; shutting down daemon");
                break;
            }
        }
    }

    ready.abort();
    services.shutdown().await;
    Ok(())
}

async fn recognize(config: &JackConfig, file: PathBuf) -> DaemonResult<()> {
    config.validate()?;
    let audio = tokio::fs::read(&file)
        .await
        .map_err(|e| format!("cannot read {}: {e}", file.display()))?;

    let recognizer = SpeechRecognizer::start(config);
    let result = recognizer.transcribe(&audio).await;
    recognizer.supervisor().shutdown().await;

    println!("{}", result?);
    Ok(())
}

async fn synthesize(config: &JackConfig, text: &str, out_dir: PathBuf) -> DaemonResult<()> {
    config.validate()?;
    tokio::fs::create_dir_all(&out_dir).await?;

    let synthesizer = SpeechSynthesizer::start(config);
    let messages = compose_messages(text);
    tracing::info!(messages = messages.len(), voice = %synthesizer.voice(), "split reply into messages");

    let mut summary = Vec::with_capacity(messages.len());
    for (index, message) in messages.iter().enumerate() {
        let entry = match synthesizer.synthesize(&message.text).await {
            SynthesisOutcome::Speech { audio, timings } => {
                let path = out_dir.join(format!("message_{index}.wav"));
                tokio::fs::write(&path, &audio).await?;
                serde_json::json!({
                    "text": message.text,
                    "animation": message.animation,
                    "facialExpression": message.facial_expression,
                    "file": path.display().to_string(),
                    "bytes": audio.len(),
                    "timings": timings.len(),
                })
            }
            SynthesisOutcome::Failed { error } => {
                tracing::warn!(index, error = %error, "message not synthesized");
                serde_json::json!({
                    "text": message.text,
                    "animation": message.animation,
                    "facialExpression": message.facial_expression,
                    "error": error,
                })
            }
        };
        summary.push(entry);
    }
    synthesizer.supervisor().shutdown().await;

    println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "messages": summary }))?);
    Ok(())
}

fn status(config: &JackConfig) -> DaemonResult<()> {
    let validation = config.validate().err().map(|e| e.to_string());
    let out = serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "valid": validation.is_none(),
        "problem": validation,
        "config": config,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
