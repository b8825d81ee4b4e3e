//! Job-level log sink.

/// Receives the user-facing messages of a transcription job
pub trait JobLog: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards job messages to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl JobLog for TracingLog {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }
}
