use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

/// Whisper's required sample rate
pub const WHISPER_SAMPLE_RATE: u32 = 16000;
/// Whisper expects mono input
pub const WHISPER_CHANNELS: u16 = 1;

pub const DEFAULT_FFMPEG_BIN: &str = "ffmpeg";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("FFmpeg error ({status}): {stderr}")]
    Failed { status: ExitStatus, stderr: String },
    #[error("FFmpeg did not finish within {0:?}")]
    Timeout(Duration),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Decodes the audio track of a media file to 16 kHz mono WAV via ffmpeg
#[derive(Debug, Clone)]
pub struct AudioExtractor {
    program: OsString,
}

impl Default for AudioExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG_BIN)
    }
}

impl AudioExtractor {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &std::ffi::OsStr {
        &self.program
    }

    /// Arguments passed to the media tool, output goes to stdout
    fn args(input: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(input.as_os_str().to_owned());
        let rate = WHISPER_SAMPLE_RATE.to_string();
        let channels = WHISPER_CHANNELS.to_string();
        for arg in ["-ar", rate.as_str(), "-ac", channels.as_str(), "-f", "wav", "pipe:1"] {
            args.push(arg.into());
        }
        args
    }

    /// Run the media tool and collect the WAV bytes it writes to stdout.
    ///
    /// With a deadline the child is killed once it passes.
    pub async fn extract(
        &self,
        input: &Path,
        deadline: Option<Instant>,
    ) -> Result<Vec<u8>, ExtractError> {
        let started = std::time::Instant::now();
        debug!("Extracting audio from {:?} with {:?}", input, self.program);

        let child = Command::new(&self.program)
            .args(Self::args(input))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExtractError::Spawn {
                program: self.program.to_string_lossy().into_owned(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, child.wait_with_output())
                .await
                .map_err(|_| ExtractError::Timeout(started.elapsed()))??,
            None => child.wait_with_output().await?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ExtractError::Failed {
                status: output.status,
                stderr,
            });
        }

        let mut wav = output.stdout;
        patch_streamed_wav_header(&mut wav);

        info!(
            "Extracted {} bytes of audio from {:?} in {:.1}s",
            wav.len(),
            input,
            started.elapsed().as_secs_f32()
        );

        Ok(wav)
    }
}

/// Sentinel length ffmpeg leaves in headers it cannot seek back to
const UNKNOWN_CHUNK_LEN: u32 = u32::MAX;

fn read_u32_le(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn write_u32_le(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// Fill in the RIFF and data chunk lengths of WAV written to a pipe.
///
/// ffmpeg cannot rewind stdout, so both lengths are left at `0xFFFFFFFF`.
/// Anything that is not a RIFF/WAVE buffer is left untouched.
pub fn patch_streamed_wav_header(bytes: &mut [u8]) {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return;
    }
    let clamp = |len: usize| u32::try_from(len).unwrap_or(u32::MAX);

    if read_u32_le(bytes, 4) == Some(UNKNOWN_CHUNK_LEN) {
        write_u32_le(bytes, 4, clamp(bytes.len() - 8));
    }

    let mut block_align = 1usize;
    let mut pos = 12;
    while let Some(len) = read_u32_le(bytes, pos + 4) {
        let id = &bytes[pos..pos + 4];
        let body = pos + 8;

        if id == b"fmt " {
            if let Some(raw) = bytes.get(body + 12..body + 14) {
                block_align = usize::from(u16::from_le_bytes([raw[0], raw[1]])).max(1);
            }
        } else if id == b"data" {
            if len == UNKNOWN_CHUNK_LEN {
                let available = bytes.len() - body;
                write_u32_le(bytes, pos + 4, clamp(available - available % block_align));
            }
            return;
        }

        if len == UNKNOWN_CHUNK_LEN {
            return;
        }
        // Chunks are word aligned
        pos = body + len as usize + (len as usize & 1);
    }
}
