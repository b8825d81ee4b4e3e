//! Media file transcription.
//!
//! Decodes the audio track of a media file with ffmpeg, runs it through a
//! local Whisper model and writes a timestamped `.txt` transcript and an
//! `.srt` subtitle file next to the input.

pub mod config;
pub mod transcribe;
pub mod transcription;

pub use config::{Config, ConfigError};
pub use transcribe::{
    AudioExtractor, JobLog, JobOutcome, ModelHandle, SpeechModel, TranscribeError, Transcriber,
    TranscriptionJob, transcribe,
};
pub use transcription::Segment;
