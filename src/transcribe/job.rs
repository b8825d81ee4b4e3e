use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::extract::{AudioExtractor, ExtractError};
use super::job_log::{JobLog, TracingLog};
use super::model::{ModelError, ModelHandle};
use crate::config::Config;
use crate::transcription::{Segment, TranscriptWriter};

/// Blocking step a job deadline applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extraction,
    Inference,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extraction => write!(f, "Audio extraction"),
            Stage::Inference => write!(f, "Transcription"),
        }
    }
}

#[derive(Error, Debug)]
pub enum TranscribeError {
    #[error("File does not exist: {}", .0.display())]
    InputNotFound(PathBuf),
    #[error(transparent)]
    Extraction(ExtractError),
    #[error(transparent)]
    Model(ModelError),
    #[error("{stage} did not finish within {after:?}")]
    Timeout { stage: Stage, after: Duration },
    #[error("Failed to create {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<ExtractError> for TranscribeError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::Timeout(after) => TranscribeError::Timeout {
                stage: Stage::Extraction,
                after,
            },
            other => TranscribeError::Extraction(other),
        }
    }
}

impl From<ModelError> for TranscribeError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Timeout(after) => TranscribeError::Timeout {
                stage: Stage::Inference,
                after,
            },
            other => TranscribeError::Model(other),
        }
    }
}

/// Input media file and the two transcript files derived from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionJob {
    input: PathBuf,
    transcript_path: PathBuf,
    subtitle_path: PathBuf,
}

impl TranscriptionJob {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        let input = input.into();
        let transcript_path = output_path(&input, "txt");
        let subtitle_path = output_path(&input, "srt");
        Self {
            input,
            transcript_path,
            subtitle_path,
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Plain-text transcript (`.txt`)
    pub fn transcript_path(&self) -> &Path {
        &self.transcript_path
    }

    /// SubRip subtitles (`.srt`)
    pub fn subtitle_path(&self) -> &Path {
        &self.subtitle_path
    }
}

/// Swap the container suffix for `ext`, never returning the input itself
fn output_path(input: &Path, ext: &str) -> PathBuf {
    let derived = input.with_extension(ext);
    if derived != input {
        return derived;
    }
    let mut name = input.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// How a job ended when nothing went wrong past extraction
#[derive(Debug)]
pub enum JobOutcome {
    /// Both transcript files were written
    Completed {
        transcript: PathBuf,
        subtitles: PathBuf,
        segments: usize,
    },
    /// The job stopped before touching any output. Already logged.
    Aborted(TranscribeError),
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }
}

/// Transcribes one media file into `.txt` and `.srt` files next to it
pub struct Transcriber {
    job: TranscriptionJob,
    model: ModelHandle,
    extractor: AudioExtractor,
    log: Arc<dyn JobLog>,
    timeout: Option<Duration>,
}

impl Transcriber {
    pub fn new(input: impl Into<PathBuf>, model: ModelHandle, extractor: AudioExtractor) -> Self {
        Self::with_log(input, model, extractor, Arc::new(TracingLog))
    }

    pub fn with_log(
        input: impl Into<PathBuf>,
        model: ModelHandle,
        extractor: AudioExtractor,
        log: Arc<dyn JobLog>,
    ) -> Self {
        let job = TranscriptionJob::new(input);
        log.info(&format!(
            "Transcript will be saved to: {}",
            job.transcript_path().display()
        ));
        Self {
            job,
            model,
            extractor,
            log,
            timeout: None,
        }
    }

    /// Bound extraction and inference together by `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn job(&self) -> &TranscriptionJob {
        &self.job
    }

    /// Extract, transcribe and write both transcript files.
    ///
    /// A missing input or a failed extraction is logged and reported as
    /// [`JobOutcome::Aborted`]; output files are left untouched in that case.
    /// Model, inference deadline and output write failures are returned as
    /// errors.
    pub async fn transcribe_file(&self) -> Result<JobOutcome, TranscribeError> {
        let input = self.job.input();
        if !input.exists() {
            return Ok(self.abort(TranscribeError::InputNotFound(input.to_path_buf())));
        }

        let deadline = self.timeout.map(|t| Instant::now() + t);

        let wav = match self.extractor.extract(input, deadline).await {
            Ok(wav) => wav,
            Err(e) => return Ok(self.abort(e.into())),
        };

        let segments = self.run_model(&wav, deadline).await?;
        drop(wav);

        let written = self.write_outputs(&segments)?;

        self.log.info(&format!(
            "Transcription complete: {}",
            self.job.transcript_path().display()
        ));

        Ok(JobOutcome::Completed {
            transcript: self.job.transcript_path().to_path_buf(),
            subtitles: self.job.subtitle_path().to_path_buf(),
            segments: written,
        })
    }

    fn abort(&self, err: TranscribeError) -> JobOutcome {
        self.log.error(&err.to_string());
        JobOutcome::Aborted(err)
    }

    /// Hand the audio to the model through a scratch WAV file.
    ///
    /// The file is removed as soon as the model returns. On every other exit
    /// (error, deadline, dropped future) `NamedTempFile` removes it on drop.
    async fn run_model(
        &self,
        wav: &[u8],
        deadline: Option<Instant>,
    ) -> Result<Vec<Segment>, TranscribeError> {
        let mut audio = tempfile::Builder::new()
            .prefix("transcriber-")
            .suffix(".wav")
            .tempfile()?;
        audio.write_all(wav)?;
        audio.flush()?;

        debug!("Wrote {} bytes of audio to {:?}", wav.len(), audio.path());

        let result = self.model.transcribe(audio.path(), deadline).await;

        if let Err(e) = audio.close() {
            warn!("Failed to remove temporary audio file: {}", e);
        }

        Ok(result?)
    }

    /// Write both transcript files in a single pass over the segments
    fn write_outputs(&self, segments: &[Segment]) -> Result<usize, TranscribeError> {
        let text = create_output(self.job.transcript_path())?;
        let srt = create_output(self.job.subtitle_path())?;

        let mut writer = TranscriptWriter::new(BufWriter::new(text), BufWriter::new(srt));
        writer.write_all(segments)?;
        Ok(writer.finish()?)
    }
}

fn create_output(path: &Path) -> Result<File, TranscribeError> {
    File::create(path).map_err(|source| TranscribeError::Output {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a fresh model and transcribe a single file with it.
///
/// Loading dominates for short inputs; callers with several files should
/// build one [`ModelHandle`] and pass it to a [`Transcriber`] per file.
pub async fn transcribe(
    input: impl Into<PathBuf>,
    config: &Config,
) -> Result<JobOutcome, TranscribeError> {
    let whisper = config.whisper.clone();
    let model = tokio::task::spawn_blocking(move || ModelHandle::load_whisper(whisper))
        .await
        .map_err(|e| ModelError::Init(format!("model loading task failed: {e}")))??;

    Transcriber::new(input, model, config.extractor())
        .with_timeout(config.timeout)
        .transcribe_file()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::job_log::test_support::{Level, RecordingLog};
    use crate::transcribe::model::test_support::{FakeModel, Script};
    use std::fs;

    #[test]
    fn test_output_paths_replace_container_suffix() {
        let job = TranscriptionJob::new("/data/talk.mp4");
        assert_eq!(job.input(), Path::new("/data/talk.mp4"));
        assert_eq!(job.transcript_path(), Path::new("/data/talk.txt"));
        assert_eq!(job.subtitle_path(), Path::new("/data/talk.srt"));

        let job = TranscriptionJob::new("clip.final.mkv");
        assert_eq!(job.transcript_path(), Path::new("clip.final.txt"));
    }

    #[test]
    fn test_output_paths_never_clobber_input() {
        let job = TranscriptionJob::new("recording");
        assert_eq!(job.transcript_path(), Path::new("recording.txt"));

        let job = TranscriptionJob::new("notes.txt");
        assert_eq!(job.transcript_path(), Path::new("notes.txt.txt"));
        assert_eq!(job.subtitle_path(), Path::new("notes.srt"));
    }

    #[test]
    fn test_timeouts_map_to_stage() {
        let err = TranscribeError::from(ExtractError::Timeout(Duration::from_secs(1)));
        assert!(matches!(err, TranscribeError::Timeout { stage: Stage::Extraction, .. }));

        let err = TranscribeError::from(ModelError::Timeout(Duration::from_secs(1)));
        assert!(matches!(err, TranscribeError::Timeout { stage: Stage::Inference, .. }));
        assert!(err.to_string().starts_with("Transcription did not finish"));
    }

    #[tokio::test]
    async fn test_missing_input_aborts_without_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("missing.mp4");
        let fake = FakeModel::new(Script::Segments(vec![Segment::new(0.0, 1.0, "x")]));
        let log = Arc::new(RecordingLog::default());

        let transcriber = Transcriber::with_log(
            &input,
            ModelHandle::new(fake.clone()),
            AudioExtractor::new("/nonexistent/ffmpeg"),
            log.clone(),
        );
        let outcome = transcriber.transcribe_file().await.unwrap();

        assert!(matches!(
            outcome,
            JobOutcome::Aborted(TranscribeError::InputNotFound(ref p)) if p == &input
        ));
        assert!(!transcriber.job().transcript_path().exists());
        assert!(!transcriber.job().subtitle_path().exists());
        assert!(fake.calls().is_empty());

        let errors = log.messages(Level::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("missing.mp4"), "{errors:?}");
    }

    #[tokio::test]
    async fn test_unstartable_media_tool_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("talk.mp4");
        fs::write(&input, b"not really a video").unwrap();
        let log = Arc::new(RecordingLog::default());

        let transcriber = Transcriber::with_log(
            &input,
            ModelHandle::new(FakeModel::new(Script::Segments(Vec::new()))),
            AudioExtractor::new("/nonexistent/ffmpeg"),
            log.clone(),
        );
        let outcome = transcriber.transcribe_file().await.unwrap();

        assert!(matches!(
            outcome,
            JobOutcome::Aborted(TranscribeError::Extraction(ExtractError::Spawn { .. }))
        ));
        assert!(!transcriber.job().transcript_path().exists());
        assert_eq!(log.messages(Level::Error).len(), 1);
    }

    #[cfg(unix)]
    mod with_fake_tool {
        use super::*;
        use crate::transcribe::extract::test_support::fake_tool;

        struct Fixture {
            dir: tempfile::TempDir,
            input: PathBuf,
            log: Arc<RecordingLog>,
        }

        impl Fixture {
            fn new() -> Self {
                let dir = tempfile::tempdir().unwrap();
                let input = dir.path().join("talk.mp4");
                fs::write(&input, b"container bytes").unwrap();
                Self {
                    dir,
                    input,
                    log: Arc::new(RecordingLog::default()),
                }
            }

            fn transcriber(&self, tool_body: &str, model: &FakeModel) -> Transcriber {
                let tool = fake_tool(self.dir.path(), tool_body);
                Transcriber::with_log(
                    &self.input,
                    ModelHandle::new(model.clone()),
                    AudioExtractor::new(tool),
                    self.log.clone(),
                )
            }
        }

        #[tokio::test]
        async fn test_writes_both_transcripts() {
            let fx = Fixture::new();
            let model = FakeModel::new(Script::Segments(vec![
                Segment::new(0.0, 1.5, "  hello world  "),
                Segment::new(3725.4, 3727.0, " and more"),
            ]));
            let transcriber = fx.transcriber("printf 'RIFF....WAVE'", &model);

            let outcome = transcriber.transcribe_file().await.unwrap();
            match outcome {
                JobOutcome::Completed {
                    transcript,
                    subtitles,
                    segments,
                } => {
                    assert_eq!(transcript, fx.dir.path().join("talk.txt"));
                    assert_eq!(subtitles, fx.dir.path().join("talk.srt"));
                    assert_eq!(segments, 2);
                }
                other => panic!("expected Completed, got {other:?}"),
            }

            let txt = fs::read_to_string(fx.dir.path().join("talk.txt")).unwrap();
            assert_eq!(
                txt,
                "[0.00 --> 1.50]   hello world  \n[3725.40 --> 3727.00]  and more\n"
            );
            let srt = fs::read_to_string(fx.dir.path().join("talk.srt")).unwrap();
            assert_eq!(
                srt,
                "1\n00:00:00,000 --> 00:00:01,500\nhello world\n\n\
                 2\n01:02:05,400 --> 01:02:07,000\nand more\n\n"
            );

            let infos = fx.log.messages(Level::Info);
            assert!(infos[0].starts_with("Transcript will be saved to: "));
            assert_eq!(
                infos.last().unwrap(),
                &format!("Transcription complete: {}", fx.dir.path().join("talk.txt").display())
            );
            assert!(fx.log.messages(Level::Error).is_empty());
        }

        #[tokio::test]
        async fn test_temp_audio_removed_after_transcription() {
            let fx = Fixture::new();
            let model = FakeModel::new(Script::Segments(Vec::new()));
            fx.transcriber("printf 'RIFF'", &model)
                .transcribe_file()
                .await
                .unwrap();

            let calls = model.calls();
            assert_eq!(calls.len(), 1);
            let (path, existed) = &calls[0];
            assert!(existed, "audio file should exist while the model runs");
            assert!(!path.exists(), "audio file leaked: {path:?}");
            let name = path.file_name().unwrap().to_string_lossy();
            assert!(name.starts_with("transcriber-") && name.ends_with(".wav"), "{name}");
        }

        #[tokio::test]
        async fn test_model_failure_propagates_and_cleans_up() {
            let fx = Fixture::new();
            let model = FakeModel::new(Script::Fail("decoder exploded".into()));
            let transcriber = fx.transcriber("printf 'RIFF'", &model);

            let err = transcriber.transcribe_file().await.unwrap_err();
            assert!(matches!(err, TranscribeError::Model(ModelError::Inference(_))), "{err:?}");

            let calls = model.calls();
            let (path, _) = &calls[0];
            assert!(!path.exists(), "audio file leaked: {path:?}");
            assert!(!transcriber.job().transcript_path().exists());
            assert!(!transcriber.job().subtitle_path().exists());
        }

        #[tokio::test]
        async fn test_extraction_failure_logs_stderr_and_aborts() {
            let fx = Fixture::new();
            let model = FakeModel::new(Script::Segments(Vec::new()));
            let transcriber = fx.transcriber("echo 'no such stream' >&2\nexit 1", &model);

            let outcome = transcriber.transcribe_file().await.unwrap();
            assert!(matches!(
                outcome,
                JobOutcome::Aborted(TranscribeError::Extraction(ExtractError::Failed { .. }))
            ));

            let errors = fx.log.messages(Level::Error);
            assert_eq!(errors.len(), 1);
            assert!(errors[0].contains("no such stream"), "{errors:?}");
            assert!(model.calls().is_empty());
            assert!(!transcriber.job().transcript_path().exists());
            assert!(!transcriber.job().subtitle_path().exists());
        }

        #[tokio::test]
        async fn test_extraction_failure_leaves_existing_outputs() {
            let fx = Fixture::new();
            let txt = fx.dir.path().join("talk.txt");
            fs::write(&txt, "previous run").unwrap();
            let model = FakeModel::new(Script::Segments(Vec::new()));

            fx.transcriber("exit 3", &model)
                .transcribe_file()
                .await
                .unwrap();

            assert_eq!(fs::read_to_string(&txt).unwrap(), "previous run");
        }

        #[tokio::test]
        async fn test_zero_segments_creates_empty_files() {
            let fx = Fixture::new();
            let model = FakeModel::new(Script::Segments(Vec::new()));
            let transcriber = fx.transcriber("printf 'RIFF'", &model);

            let outcome = transcriber.transcribe_file().await.unwrap();
            assert!(outcome.is_completed());
            assert_eq!(fs::read(transcriber.job().transcript_path()).unwrap(), b"");
            assert_eq!(fs::read(transcriber.job().subtitle_path()).unwrap(), b"");
        }

        #[tokio::test]
        async fn test_existing_outputs_are_overwritten() {
            let fx = Fixture::new();
            fs::write(fx.dir.path().join("talk.srt"), "stale stale stale stale").unwrap();
            let model = FakeModel::new(Script::Segments(vec![Segment::new(0.0, 0.5, "hi")]));

            fx.transcriber("printf 'RIFF'", &model)
                .transcribe_file()
                .await
                .unwrap();

            let srt = fs::read_to_string(fx.dir.path().join("talk.srt")).unwrap();
            assert_eq!(srt, "1\n00:00:00,000 --> 00:00:00,500\nhi\n\n");
        }

        #[tokio::test]
        async fn test_extraction_deadline_aborts() {
            let fx = Fixture::new();
            let model = FakeModel::new(Script::Segments(Vec::new()));
            let transcriber = fx
                .transcriber("exec sleep 10", &model)
                .with_timeout(Some(Duration::from_millis(200)));

            let outcome = transcriber.transcribe_file().await.unwrap();
            assert!(matches!(
                outcome,
                JobOutcome::Aborted(TranscribeError::Timeout {
                    stage: Stage::Extraction,
                    ..
                })
            ));
            assert!(!transcriber.job().transcript_path().exists());
        }

        #[tokio::test]
        async fn test_inference_deadline_is_an_error() {
            let fx = Fixture::new();
            let model = FakeModel::new(Script::Sleep(Duration::from_secs(2)));
            let transcriber = fx
                .transcriber("printf 'RIFF'", &model)
                .with_timeout(Some(Duration::from_millis(300)));

            let err = transcriber.transcribe_file().await.unwrap_err();
            assert!(matches!(
                err,
                TranscribeError::Timeout {
                    stage: Stage::Inference,
                    ..
                }
            ));
            assert!(!transcriber.job().transcript_path().exists());

            // The sleeping model records its call before blocking
            let mut calls = model.calls();
            for _ in 0..20 {
                if !calls.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
                calls = model.calls();
            }
            assert_eq!(calls.len(), 1);
            let (path, existed) = &calls[0];
            assert!(existed, "audio file should exist while the model runs");
            assert!(!path.exists(), "audio file leaked after deadline: {path:?}");
        }

        #[tokio::test]
        async fn test_one_handle_serves_many_jobs() {
            let fx = Fixture::new();
            let second = fx.dir.path().join("second.mkv");
            fs::write(&second, b"more bytes").unwrap();

            let model = FakeModel::new(Script::Segments(vec![Segment::new(0.0, 1.0, "x")]));
            let handle = ModelHandle::new(model.clone());
            let tool = fake_tool(fx.dir.path(), "printf 'RIFF'");

            for input in [&fx.input, &second] {
                let outcome = Transcriber::new(input, handle.clone(), AudioExtractor::new(&tool))
                    .transcribe_file()
                    .await
                    .unwrap();
                assert!(outcome.is_completed());
            }

            let calls = model.calls();
            assert_eq!(calls.len(), 2);
            assert_ne!(calls[0].0, calls[1].0, "each job gets its own audio file");
            assert!(fx.dir.path().join("second.srt").exists());
        }
    }
}
