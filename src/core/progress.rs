//! Progress reporting and cooperative cancellation for long-running tasks.
//!
//! Operators that can run for seconds (series assembly, labeling, extraction,
//! simplification, export) take a [`TaskCtx`] and call [`TaskCtx::report`] at
//! coarse stages and [`TaskCtx::checkpoint`] at their defined cancellation
//! points. Cancellation resolves to [`Error::Cancelled`] and always leaves
//! data in the last fully-committed state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::error::Error;
use crate::core::types::Result;

/// Shared flag for cooperative cancellation.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the task's next checkpoint.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

type ProgressFn = dyn Fn(u8, &str) + Send + Sync;

/// Per-call context carrying a progress sink and a cancel flag.
///
/// The default context reports nothing and never cancels, so operators can
/// take `&TaskCtx` unconditionally.
#[derive(Clone, Default)]
pub struct TaskCtx {
    progress: Option<Arc<ProgressFn>>,
    cancel: Option<CancelFlag>,
}

impl TaskCtx {
    /// Context that swallows progress and never cancels.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn with_progress(f: impl Fn(u8, &str) + Send + Sync + 'static) -> Self {
        Self {
            progress: Some(Arc::new(f)),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Same cancel flag, no progress sink. For nested phases whose caller
    /// owns the percentage scale.
    pub fn quiet(&self) -> TaskCtx {
        TaskCtx {
            progress: None,
            cancel: self.cancel.clone(),
        }
    }

    /// Report percentage-complete plus a short status text.
    pub fn report(&self, pct: u8, stage: &str) {
        if let Some(f) = &self.progress {
            f(pct.min(100), stage);
        }
    }

    /// Cancellation checkpoint. Returns `Err(Cancelled)` once the flag is set.
    pub fn checkpoint(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for TaskCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCtx")
            .field("has_progress", &self.progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_silent_ctx_never_cancels() {
        let ctx = TaskCtx::silent();
        assert!(ctx.checkpoint().is_ok());
        ctx.report(50, "noop");
    }

    #[test]
    fn test_cancel_flag_trips_checkpoint() {
        let flag = CancelFlag::new();
        let ctx = TaskCtx::silent().with_cancel(flag.clone());

        assert!(ctx.checkpoint().is_ok());
        flag.cancel();
        assert!(matches!(ctx.checkpoint(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_progress_is_forwarded_and_clamped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = TaskCtx::with_progress(move |pct, stage| {
            sink.lock().unwrap().push((pct, stage.to_string()));
        });

        ctx.report(10, "start");
        ctx.report(200, "end");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (10, "start".to_string()));
        assert_eq!(seen[1], (100, "end".to_string()));
    }
}
