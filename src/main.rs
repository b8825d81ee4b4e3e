use anyhow::Context as _;
use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use media_transcriber::config::{self, Config};
use media_transcriber::transcribe::{JobOutcome, ModelHandle, Transcriber, WhisperModel};

/// Transcribe media files into timestamped .txt and .srt files.
#[derive(Parser, Debug)]
#[command(name = "transcribe", version)]
struct Cli {
    /// Input media files. Outputs are written next to each one.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Whisper model: tiny, base, small, medium, large, turbo.
    #[arg(long)]
    model: Option<WhisperModel>,

    /// Directory for downloaded model files.
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Language code, or "auto" to detect.
    #[arg(long)]
    language: Option<String>,

    /// Inference threads.
    #[arg(long, value_parser = clap::value_parser!(i32).range(1..))]
    threads: Option<i32>,

    /// Per-file deadline in seconds (0 = none).
    #[arg(long)]
    timeout_secs: Option<String>,

    /// ffmpeg binary to decode inputs with.
    #[arg(long)]
    ffmpeg: Option<PathBuf>,
}

impl Cli {
    /// Command line flags win over environment settings
    fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(model) = self.model {
            config.whisper.model = model;
        }
        if let Some(dir) = &self.models_dir {
            config.whisper.models_dir = dir.clone();
        }
        if let Some(language) = &self.language {
            config.whisper.language = config::parse_language(language.clone());
        }
        if let Some(threads) = self.threads {
            config.whisper.n_threads = Some(threads);
        }
        if let Some(secs) = &self.timeout_secs {
            config.timeout = config::parse_timeout("--timeout-secs", secs)?;
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            config.ffmpeg_bin = ffmpeg.clone().into_os_string();
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("Invalid configuration")?;
    cli.apply(&mut config)?;

    info!(
        "Transcribing {} file(s) with Whisper {} (timeout: {:?})",
        cli.inputs.len(),
        config.whisper.model,
        config.timeout
    );

    // Loaded once, shared by every input
    let whisper = config.whisper.clone();
    let model = tokio::task::spawn_blocking(move || ModelHandle::load_whisper(whisper))
        .await
        .context("Model loading task failed")?
        .context("Failed to load Whisper model")?;

    let mut failed = 0usize;
    for input in &cli.inputs {
        let transcriber = Transcriber::new(input, model.clone(), config.extractor())
            .with_timeout(config.timeout);

        match transcriber.transcribe_file().await {
            Ok(JobOutcome::Completed { segments, subtitles, .. }) => {
                info!("{}: {} segments, subtitles in {}", input.display(), segments, subtitles.display());
            }
            Ok(JobOutcome::Aborted(_)) => failed += 1,
            Err(e) => {
                error!("Failed to transcribe {}: {}", input.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        error!("{} of {} file(s) were not transcribed", failed, cli.inputs.len());
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cli_requires_an_input() {
        assert!(Cli::try_parse_from(["transcribe"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "transcribe",
            "a.mp4",
            "b.mkv",
            "--model",
            "base",
            "--language",
            "auto",
            "--threads",
            "2",
            "--timeout-secs",
            "30",
            "--ffmpeg",
            "/usr/local/bin/ffmpeg",
        ])
        .unwrap();
        assert_eq!(cli.inputs, vec![PathBuf::from("a.mp4"), PathBuf::from("b.mkv")]);

        let mut config = Config::default();
        config.whisper.language = Some("en".into());
        cli.apply(&mut config).unwrap();

        assert_eq!(config.whisper.model, WhisperModel::Base);
        assert_eq!(config.whisper.language, None);
        assert_eq!(config.whisper.n_threads, Some(2));
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.ffmpeg_bin, "/usr/local/bin/ffmpeg");
    }

    #[test]
    fn test_bad_flags_are_rejected() {
        assert!(Cli::try_parse_from(["transcribe", "a.mp4", "--model", "huge"]).is_err());
        assert!(Cli::try_parse_from(["transcribe", "a.mp4", "--threads", "0"]).is_err());

        let cli = Cli::try_parse_from(["transcribe", "a.mp4", "--timeout-secs", "soon"]).unwrap();
        assert!(cli.apply(&mut Config::default()).is_err());
    }
}
