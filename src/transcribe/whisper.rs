use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::extract::{WHISPER_CHANNELS, WHISPER_SAMPLE_RATE};
use super::model::{ModelError, ModelHandle, SpeechModel};
use crate::transcription::Segment;

/// Available Whisper model sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhisperModel {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
    /// large-v3-turbo, the default tier
    #[default]
    Turbo,
}

impl WhisperModel {
    /// Get the Hugging Face URL for this model
    pub fn hf_url(&self) -> String {
        format!(
            "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/{}",
            self.filename()
        )
    }

    /// Get the filename for this model
    pub fn filename(&self) -> &'static str {
        match self {
            WhisperModel::Tiny => "ggml-tiny.bin",
            WhisperModel::Base => "ggml-base.bin",
            WhisperModel::Small => "ggml-small.bin",
            WhisperModel::Medium => "ggml-medium.bin",
            WhisperModel::Large => "ggml-large-v3.bin",
            WhisperModel::Turbo => "ggml-large-v3-turbo.bin",
        }
    }

    /// Get approximate model size in MB
    pub fn size_mb(&self) -> u64 {
        match self {
            WhisperModel::Tiny => 75,
            WhisperModel::Base => 142,
            WhisperModel::Small => 466,
            WhisperModel::Medium => 1500,
            WhisperModel::Large => 3100,
            WhisperModel::Turbo => 1600,
        }
    }
}

impl std::fmt::Display for WhisperModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WhisperModel::Tiny => write!(f, "tiny"),
            WhisperModel::Base => write!(f, "base"),
            WhisperModel::Small => write!(f, "small"),
            WhisperModel::Medium => write!(f, "medium"),
            WhisperModel::Large => write!(f, "large"),
            WhisperModel::Turbo => write!(f, "turbo"),
        }
    }
}

impl std::str::FromStr for WhisperModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(WhisperModel::Tiny),
            "base" => Ok(WhisperModel::Base),
            "small" => Ok(WhisperModel::Small),
            "medium" => Ok(WhisperModel::Medium),
            "large" => Ok(WhisperModel::Large),
            "turbo" | "large-v3-turbo" => Ok(WhisperModel::Turbo),
            _ => Err(format!(
                "Unknown model: {}. Use tiny, base, small, medium, large, or turbo",
                s
            )),
        }
    }
}

/// Whisper model configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WhisperConfig {
    pub model: WhisperModel,
    /// Directory holding downloaded ggml model files
    pub models_dir: PathBuf,
    /// Language hint (None = auto-detect)
    pub language: Option<String>,
    /// Number of threads to use (None = available parallelism)
    pub n_threads: Option<i32>,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model: WhisperModel::Turbo,
            models_dir: default_models_dir(),
            language: None,
            n_threads: None,
        }
    }
}

impl WhisperConfig {
    /// Get the path to the configured model file
    pub fn model_path(&self) -> PathBuf {
        self.models_dir.join(self.model.filename())
    }
}

/// Get the default models directory path
pub fn default_models_dir() -> PathBuf {
    PathBuf::from("models").join("whisper")
}

/// Check if a model is already downloaded
pub fn is_model_downloaded(model: WhisperModel, path: &Path) -> bool {
    // Check if file size is reasonable (at least 50% of expected)
    match fs::metadata(path) {
        Ok(metadata) => metadata.len() >= model.size_mb() * 1024 * 1024 / 2,
        Err(_) => false,
    }
}

/// Download a Whisper model from Hugging Face unless it is already present
pub fn download_model(config: &WhisperConfig) -> Result<PathBuf, ModelError> {
    let model = config.model;
    let path = config.model_path();

    if is_model_downloaded(model, &path) {
        info!("Model {} already downloaded at {:?}", model, path);
        return Ok(path);
    }
    if path.exists() {
        warn!("Model file {:?} looks incomplete, downloading again", path);
    }

    fs::create_dir_all(&config.models_dir)?;

    info!(
        "Downloading Whisper {} model (~{}MB)...",
        model,
        model.size_mb()
    );

    let url = model.hf_url();

    let mut response = reqwest::blocking::Client::new()
        .get(&url)
        .send()
        .map_err(|e| ModelError::Download(format!("HTTP request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(ModelError::Download(format!(
            "HTTP {} from {}",
            response.status(),
            url
        )));
    }

    let total_size = response.content_length().unwrap_or(0);

    let pb = indicatif::ProgressBar::new(total_size);
    pb.set_style(
        indicatif::ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    // Stream into a temp file so an interrupted download never looks complete
    let temp_path = path.with_extension("bin.tmp");
    let mut file = pb.wrap_write(File::create(&temp_path)?);
    response
        .copy_to(&mut file)
        .map_err(|e| ModelError::Download(format!("Failed to read response: {}", e)))?;

    drop(file);
    pb.finish_with_message("Download complete");

    fs::rename(&temp_path, &path)?;

    info!("Model downloaded to {:?}", path);

    Ok(path)
}

/// Read a 16 kHz mono 16-bit WAV file into normalized f32 samples
pub fn read_wav_samples(path: &Path) -> Result<Vec<f32>, ModelError> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_rate != WHISPER_SAMPLE_RATE
        || spec.channels != WHISPER_CHANNELS
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(ModelError::InvalidAudio(format!(
            "Expected 16kHz mono 16-bit, got {}Hz {}ch {}bit",
            spec.sample_rate, spec.channels, spec.bits_per_sample
        )));
    }

    reader
        .into_samples::<i16>()
        .map(|s| s.map(|s| s as f32 / 32768.0).map_err(ModelError::from))
        .collect()
}

/// Whisper speech model backed by whisper.cpp
pub struct WhisperSpeechModel {
    ctx: WhisperContext,
    config: WhisperConfig,
    n_threads: i32,
}

impl WhisperSpeechModel {
    /// Download (if needed) and load the configured model
    pub fn load(config: WhisperConfig) -> Result<Self, ModelError> {
        let path = download_model(&config)?;

        info!("Loading Whisper {} model...", config.model);

        let path_str = path
            .to_str()
            .ok_or_else(|| ModelError::Init(format!("Model path is not UTF-8: {:?}", path)))?;
        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| ModelError::Init(format!("Failed to load model: {}", e)))?;

        let n_threads = config.n_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|p| (p.get() as i32).max(1))
                .unwrap_or(4)
        });

        info!("Whisper model loaded successfully (using {} threads)", n_threads);

        Ok(Self {
            ctx,
            config,
            n_threads,
        })
    }
}

impl SpeechModel for WhisperSpeechModel {
    fn name(&self) -> &str {
        self.config.model.filename()
    }

    fn transcribe(&self, audio_path: &Path) -> Result<Vec<Segment>, ModelError> {
        let start_time = std::time::Instant::now();
        let samples = read_wav_samples(audio_path)?;
        let duration_secs = samples.len() as f32 / WHISPER_SAMPLE_RATE as f32;

        info!(
            "Transcribing {} samples ({:.2}s of audio)",
            samples.len(),
            duration_secs
        );

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_n_threads(self.n_threads);
        params.set_translate(false);
        match &self.config.language {
            Some(lang) => params.set_language(Some(lang)),
            None => params.set_language(Some("auto")),
        }
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_print_special(false);

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| ModelError::Inference(format!("Failed to create state: {}", e)))?;

        state
            .full(params, &samples)
            .map_err(|e| ModelError::Inference(format!("Inference failed: {}", e)))?;

        let num_segments = state
            .full_n_segments()
            .map_err(|e| ModelError::Inference(format!("Failed to get segments: {}", e)))?;

        let mut segments = Vec::with_capacity(num_segments.max(0) as usize);
        for i in 0..num_segments {
            let start_ts = state
                .full_get_segment_t0(i)
                .map_err(|e| ModelError::Inference(format!("Failed to get start time: {}", e)))?;
            let end_ts = state
                .full_get_segment_t1(i)
                .map_err(|e| ModelError::Inference(format!("Failed to get end time: {}", e)))?;
            let text = state
                .full_get_segment_text(i)
                .map_err(|e| ModelError::Inference(format!("Failed to get text: {}", e)))?;

            // Timestamps are in centiseconds (1/100 second)
            segments.push(Segment::new(
                start_ts as f64 / 100.0,
                end_ts as f64 / 100.0,
                text,
            ));
        }

        let elapsed = start_time.elapsed();
        info!(
            "Transcribed {:.1}s of audio in {:.1}s ({:.1}x realtime): {} segments",
            duration_secs,
            elapsed.as_secs_f32(),
            duration_secs / elapsed.as_secs_f32().max(f32::EPSILON),
            segments.len()
        );

        Ok(segments)
    }
}

impl ModelHandle {
    /// Download (if needed) and load a Whisper model into a new handle
    pub fn load_whisper(config: WhisperConfig) -> Result<Self, ModelError> {
        Ok(Self::new(WhisperSpeechModel::load(config)?))
    }
}
