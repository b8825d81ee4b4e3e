//! Speech model seam.
//!
//! A [`ModelHandle`] owns one loaded model and can be shared by any number of
//! jobs. Inference runs on tokio's blocking pool, one call at a time per
//! handle.

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::transcription::Segment;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to download model: {0}")]
    Download(String),
    #[error("Failed to initialize Whisper: {0}")]
    Init(String),
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),
    #[error("Failed to read WAV: {0}")]
    Wav(#[from] hound::Error),
    #[error("Transcription failed: {0}")]
    Inference(String),
    #[error("Transcription did not finish within {0:?}")]
    Timeout(Duration),
}

/// Turns a 16 kHz mono WAV file into ordered speech segments
pub trait SpeechModel: Send {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn transcribe(&self, audio_path: &Path) -> Result<Vec<Segment>, ModelError>;
}

/// Shared handle to one loaded [`SpeechModel`]
#[derive(Clone)]
pub struct ModelHandle {
    name: Arc<str>,
    model: Arc<Mutex<Box<dyn SpeechModel>>>,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle").field("name", &self.name).finish()
    }
}

impl ModelHandle {
    pub fn new<M: SpeechModel + 'static>(model: M) -> Self {
        let name = Arc::from(model.name());
        let model: Box<dyn SpeechModel> = Box::new(model);
        Self {
            name,
            model: Arc::new(Mutex::new(model)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the model on `audio_path`, giving up at `deadline`.
    ///
    /// A timed out inference keeps running on the blocking pool and holds
    /// the handle until it returns.
    pub async fn transcribe(
        &self,
        audio_path: &Path,
        deadline: Option<Instant>,
    ) -> Result<Vec<Segment>, ModelError> {
        let model = Arc::clone(&self.model);
        let path = audio_path.to_path_buf();
        let started = std::time::Instant::now();

        debug!("Running {} on {:?}", self.name, path);

        let task = tokio::task::spawn_blocking(move || {
            let model = model
                .lock()
                .map_err(|_| ModelError::Inference("model poisoned by an earlier panic".into()))?;
            model.transcribe(&path)
        });

        let joined = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, task)
                .await
                .map_err(|_| ModelError::Timeout(started.elapsed()))?,
            None => task.await,
        };

        joined.map_err(|e| ModelError::Inference(format!("inference task failed: {e}")))?
    }
}
