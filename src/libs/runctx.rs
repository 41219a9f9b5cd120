//! # Ambient Run Context
//!
//! A [`RunCtx`] travels through every long-running engine operation. It
//! carries the cancellation flag plus the optional progress and output
//! callbacks for the current resource. When a callback is present here it
//! takes precedence over any callback configured on an installer instance,
//! so each concurrent install can route its output to its own UI slot.
//!
//! Cancellation is cooperative: downloads poll between HTTP chunks,
//! extraction between archive entries, command sets between steps.

use crate::errors::{Error, InstallFault, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Byte-progress callback: `(bytes_done, total_bytes_if_known)`.
pub type ProgressFn = dyn Fn(u64, Option<u64>) + Send + Sync;
/// Line-output callback for streamed command output.
pub type OutputFn = dyn Fn(&str) + Send + Sync;

/// Ambient context threaded through the installer call tree.
#[derive(Clone, Default)]
pub struct RunCtx {
    cancel: Arc<AtomicBool>,
    progress: Option<Arc<ProgressFn>>,
    output: Option<Arc<OutputFn>>,
}

impl RunCtx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a progress callback; context callbacks win over any
    /// installer-instance callback.
    pub fn with_progress(mut self, progress: Arc<ProgressFn>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Attaches a line-output callback for streamed command output.
    pub fn with_output(mut self, output: Arc<OutputFn>) -> Self {
        self.output = Some(output);
        self
    }

    /// The shared cancellation flag; hand clones to signal handlers.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Requests cooperative cancellation of every operation holding this
    /// context.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Polling point: returns the dedicated cancellation error when the
    /// flag is set. Call between archive entries, command steps, and HTTP
    /// chunks.
    pub fn check_cancelled(&self, resource: &str, action: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Install {
                fault: InstallFault::Cancelled,
                resource: resource.to_string(),
                action: action.to_string(),
                version: None,
                url: None,
                message: format!("{action} of '{resource}' cancelled"),
            });
        }
        Ok(())
    }

    pub fn progress_callback(&self) -> Option<&Arc<ProgressFn>> {
        self.progress.as_ref()
    }

    pub fn output_callback(&self) -> Option<&Arc<OutputFn>> {
        self.output.as_ref()
    }

    /// Reports byte progress to the attached callback, if any.
    pub fn report_progress(&self, done: u64, total: Option<u64>) {
        if let Some(cb) = &self.progress {
            cb(done, total);
        }
    }

    /// Emits one line of command output to the attached callback, if any.
    pub fn emit_line(&self, line: &str) {
        if let Some(cb) = &self.output {
            cb(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_surfaces_dedicated_code() {
        let ctx = RunCtx::new();
        ctx.check_cancelled("rg", "install").unwrap();

        ctx.request_cancel();
        let err = ctx.check_cancelled("rg", "install").unwrap_err();
        assert_eq!(err.code(), "install.cancelled");
    }

    #[test]
    fn callbacks_receive_events() {
        use std::sync::Mutex;
        let seen: Arc<Mutex<Vec<(u64, Option<u64>)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let ctx = RunCtx::new().with_progress(Arc::new(move |done, total| {
            sink.lock().unwrap().push((done, total));
        }));
        ctx.report_progress(10, Some(100));
        ctx.report_progress(100, Some(100));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
