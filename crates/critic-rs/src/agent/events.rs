//! Progress reporting: the only coupling between the runtime and a UI.
//!
//! The runner and subagents call [`ProgressSink::report`] with a
//! human-readable status and an increment hint (a share of a progress bar).
//! Reports are fire-and-forget; sinks must not block.

use std::sync::Arc;
use tracing::info;

/// Receives progress updates.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str, increment: f64);
}

/// Discards progress.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _message: &str, _increment: f64) {}
}

/// Logs progress via `tracing`.
pub struct LoggingProgress;

impl ProgressSink for LoggingProgress {
    fn report(&self, message: &str, _increment: f64) {
        info!("[progress] {message}");
    }
}

/// Adapts a closure.
///
/// ```ignore
/// let sink = FnProgress::new(|msg: &str, inc: f64| bar.inc_with_message(inc, msg));
/// ```
pub struct FnProgress<F>(F)
where
    F: Fn(&str, f64) + Send + Sync;

impl<F> FnProgress<F>
where
    F: Fn(&str, f64) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ProgressSink for FnProgress<F>
where
    F: Fn(&str, f64) + Send + Sync,
{
    fn report(&self, message: &str, increment: f64) {
        (self.0)(message, increment)
    }
}

/// Forwards every report to several sinks, in registration order.
#[derive(Default)]
pub struct CompositeProgress {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl CompositeProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Add a sink only when `condition` holds.
    pub fn with_if(self, condition: bool, sink: impl ProgressSink + 'static) -> Self {
        if condition { self.with(sink) } else { self }
    }
}

impl ProgressSink for CompositeProgress {
    fn report(&self, message: &str, increment: f64) {
        for sink in &self.sinks {
            sink.report(message, increment);
        }
    }
}
