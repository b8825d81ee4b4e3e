use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::transcribe::{AudioExtractor, DEFAULT_FFMPEG_BIN, WhisperConfig, WhisperModel};

pub const ENV_FFMPEG_BIN: &str = "FFMPEG_BIN";
pub const ENV_WHISPER_MODEL: &str = "WHISPER_MODEL";
pub const ENV_WHISPER_MODELS_DIR: &str = "WHISPER_MODELS_DIR";
pub const ENV_WHISPER_LANGUAGE: &str = "WHISPER_LANGUAGE";
pub const ENV_WHISPER_THREADS: &str = "WHISPER_THREADS";
pub const ENV_TIMEOUT_SECS: &str = "TRANSCRIBE_TIMEOUT_SECS";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{var}: {message}")]
    Invalid { var: &'static str, message: String },
}

/// Runtime settings for transcription jobs
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Media tool used to decode input files
    pub ffmpeg_bin: OsString,
    pub whisper: WhisperConfig,
    /// Deadline for one job, extraction and inference together
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ffmpeg_bin: OsString::from(DEFAULT_FFMPEG_BIN),
            whisper: WhisperConfig::default(),
            timeout: None,
        }
    }
}

impl Config {
    /// Read settings from the process environment (after `.env` is loaded)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build settings from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Config::default();

        if let Some(bin) = get(ENV_FFMPEG_BIN) {
            config.ffmpeg_bin = bin.into();
        }
        if let Some(model) = get(ENV_WHISPER_MODEL) {
            config.whisper.model = model
                .parse::<WhisperModel>()
                .map_err(|message| ConfigError::Invalid {
                    var: ENV_WHISPER_MODEL,
                    message,
                })?;
        }
        if let Some(dir) = get(ENV_WHISPER_MODELS_DIR) {
            config.whisper.models_dir = PathBuf::from(dir);
        }
        config.whisper.language = get(ENV_WHISPER_LANGUAGE).and_then(parse_language);
        if let Some(threads) = get(ENV_WHISPER_THREADS) {
            config.whisper.n_threads = Some(parse_threads(ENV_WHISPER_THREADS, &threads)?);
        }
        if let Some(secs) = get(ENV_TIMEOUT_SECS) {
            config.timeout = parse_timeout(ENV_TIMEOUT_SECS, &secs)?;
        }

        Ok(config)
    }

    pub fn extractor(&self) -> AudioExtractor {
        AudioExtractor::new(self.ffmpeg_bin.clone())
    }
}

/// `auto` means let the model detect the language
pub fn parse_language(value: String) -> Option<String> {
    if value.eq_ignore_ascii_case("auto") {
        None
    } else {
        Some(value.to_lowercase())
    }
}

pub fn parse_threads(var: &'static str, value: &str) -> Result<i32, ConfigError> {
    match value.parse::<i32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Invalid {
            var,
            message: format!("expected a positive thread count, got {:?}", value),
        }),
    }
}

/// Seconds; `0` disables the deadline
pub fn parse_timeout(var: &'static str, value: &str) -> Result<Option<Duration>, ConfigError> {
    let invalid = |message: String| ConfigError::Invalid { var, message };
    let secs = value
        .parse::<f64>()
        .map_err(|_| invalid(format!("expected seconds, got {:?}", value)))?;
    if secs == 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|e| invalid(format!("{}: {:?}", e, value)))
}
