mod extract;
mod job;
mod job_log;
mod model;
mod whisper;

pub use extract::{
    AudioExtractor, DEFAULT_FFMPEG_BIN, ExtractError, WHISPER_CHANNELS, WHISPER_SAMPLE_RATE, patch_streamed_wav_header,
};

pub use job::{JobOutcome, Stage, TranscribeError, Transcriber, TranscriptionJob, transcribe};
pub use job_log::{JobLog, TracingLog};
pub use model::{ModelError, ModelHandle, SpeechModel};
pub use whisper::{
    WhisperConfig, WhisperModel, WhisperSpeechModel, default_models_dir, download_model,
    is_model_downloaded, read_wav_samples,
};
