//! Progress reporting and cooperative cancellation.
//!
//! The engines report two events: fractional progress per stage and a
//! single completion notice.  Stages during creation are `"hashing-old"`,
//! `"hashing-new"`, `"indexing"`, `"matching"`, `"writing"`; application
//! reports `"applying"`.  Events are throttled to one per 1% change per
//! stage before they reach the sink, so a sink can render directly without
//! its own rate limiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{DeltaError, JobStats};

/// Callback surface handed to the engines.  All methods default to no-ops.
///
/// Methods are invoked from the orchestrating thread only, never from
/// workers, so implementations are free to keep plain interior state.
pub trait Progress {
    fn on_progress(&self, _percent: f32, _stage: &str) {}
    fn on_complete(&self, _outcome: &Result<JobStats, DeltaError>) {}
}

/// Rate limiter in front of a [`Progress`] sink.
///
/// Tracks the last forwarded percent independently per stage and forwards
/// an event only when that stage first reports, advances by at least 1%,
/// or reaches 100%.  Stages may interleave (matching and writing do)
/// without defeating the limit.
pub struct ProgressThrottle<'a> {
    sink:   Option<&'a dyn Progress>,
    stages: Vec<(&'static str, f32)>,
}

impl<'a> ProgressThrottle<'a> {
    pub fn new(sink: Option<&'a dyn Progress>) -> Self {
        Self { sink, stages: Vec::new() }
    }

    pub fn report(&mut self, percent: f32, stage: &'static str) {
        let sink = match self.sink {
            Some(s) => s,
            None    => return,
        };
        let percent = percent.clamp(0.0, 1.0);

        let idx = match self.stages.iter().position(|(s, _)| *s == stage) {
            Some(i) => i,
            None => {
                self.stages.push((stage, -1.0));
                self.stages.len() - 1
            }
        };
        let last = self.stages[idx].1;
        if (percent >= 1.0 && last < 1.0) || percent - last >= 0.01 {
            self.stages[idx].1 = percent;
            sink.on_progress(percent, stage);
        }
    }

    pub fn complete(&self, outcome: &Result<JobStats, DeltaError>) {
        if let Some(sink) = self.sink {
            sink.on_complete(outcome);
        }
    }
}

/// Job-scoped cancellation flag.
///
/// Clones share the flag.  The engines check it at block boundaries and
/// between matcher invocations; on cancellation, in-flight blocks finish,
/// the partial output is deleted, and the job returns
/// [`DeltaError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Convenience for the hot loops: `Err(Cancelled)` once cancelled.
    #[inline]
    pub fn check(&self) -> Result<(), DeltaError> {
        if self.is_cancelled() {
            Err(DeltaError::Cancelled)
        } else {
            Ok(())
        }
    }
}
