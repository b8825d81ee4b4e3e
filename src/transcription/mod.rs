//! Transcript rendering.
//!
//! Turns recognized segments into the `.txt` and `.srt` outputs of a job.

pub mod transcript;

pub use transcript::{Segment, TranscriptWriter, format_srt_cue, format_srt_time, format_text_line};
