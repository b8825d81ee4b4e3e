//! Transcript segments and the two text renderings written per job.
//!
//! Plain text lines carry `{:.2}` second offsets, SRT cues carry
//! `HH:MM:SS,mmm` timecodes. Both are produced in a single pass by
//! [`TranscriptWriter`].

use std::io::{self, Write};

/// One recognized speech span
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// Recognized text, exactly as the model returned it
    pub text: String,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Format one plain-text line: `[start --> end] text\n`.
///
/// The text is written verbatim, surrounding whitespace included.
pub fn format_text_line(segment: &Segment) -> String {
    format!("[{:.2} --> {:.2}] {}\n", segment.start, segment.end, segment.text)
}

/// Format time for SRT (HH:MM:SS,mmm).
///
/// Every field is truncated, not rounded. Hours are not wrapped at 24.
pub fn format_srt_time(seconds: f64) -> String {
    // NaN fails the comparison and falls through to zero as well
    let t = if seconds > 0.0 { seconds } else { 0.0 };

    let hours = (t / 3600.0).floor() as u64;
    let mins = ((t % 3600.0) / 60.0).floor() as u64;
    let secs = (t % 60.0).floor() as u64;
    let ms = ((t - t.floor()) * 1000.0).floor() as u64;

    format!("{:02}:{:02}:{:02},{:03}", hours, mins, secs, ms)
}

/// Format one SRT cue block, terminated by a blank line.
///
/// `index` is the 1-based position of the segment in the transcript.
pub fn format_srt_cue(index: usize, segment: &Segment) -> String {
    format!(
        "{}\n{} --> {}\n{}\n\n",
        index,
        format_srt_time(segment.start),
        format_srt_time(segment.end),
        segment.text.trim()
    )
}

/// Writes segments to a plain-text sink and an SRT sink in lockstep
pub struct TranscriptWriter<T: Write, S: Write> {
    text: T,
    srt: S,
    written: usize,
}

impl<T: Write, S: Write> TranscriptWriter<T, S> {
    pub fn new(text: T, srt: S) -> Self {
        Self {
            text,
            srt,
            written: 0,
        }
    }

    /// Append one segment to both outputs. Cue numbers start at 1.
    pub fn write_segment(&mut self, segment: &Segment) -> io::Result<()> {
        let index = self.written + 1;
        self.text.write_all(format_text_line(segment).as_bytes())?;
        self.srt.write_all(format_srt_cue(index, segment).as_bytes())?;
        self.written = index;
        Ok(())
    }

    pub fn write_all<'a, I>(&mut self, segments: I) -> io::Result<()>
    where
        I: IntoIterator<Item = &'a Segment>,
    {
        for segment in segments {
            self.write_segment(segment)?;
        }
        Ok(())
    }

    /// Flush both sinks and return the number of cues written.
    pub fn finish(mut self) -> io::Result<usize> {
        self.text.flush()?;
        self.srt.flush()?;
        Ok(self.written)
    }
}
