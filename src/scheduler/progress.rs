use tracing::info;

/// Receives coarse progress of a run, e.g. to update a background job record.
pub trait ProgressSink: Send + Sync {
    fn report(&self, stage: &str, done: usize, total: usize);
}

/// Logs progress at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, stage: &str, done: usize, total: usize) {
        info!(stage, done, total, "scheduling progress");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _stage: &str, _done: usize, _total: usize) {}
}
