//! Progress reporting and cooperative cancellation.
//!
//! Pass state is an explicit context value threaded through calls, not
//! ambient shared state. The sink is consulted once per chunk; a false
//! return stops the pass cleanly, with buffers and streams released the
//! same way as on normal completion.

use log::info;
use std::time::Instant;

pub trait ProgressSink {
    /// Reports completion ratio in `[0, 1]`. Returns false to request
    /// cancellation.
    fn update(&mut self, ratio: f32) -> bool;
}

/// Sink that never cancels.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&mut self, _ratio: f32) -> bool {
        true
    }
}

impl<F: FnMut(f32) -> bool> ProgressSink for F {
    fn update(&mut self, ratio: f32) -> bool {
        self(ratio)
    }
}

/// Per-pass context: names the process boundary for logging and
/// remembers whether the sink asked to stop.
pub struct PassContext<'a> {
    name: &'static str,
    sink: &'a mut dyn ProgressSink,
    started: Instant,
    cancelled: bool,
}

impl<'a> PassContext<'a> {
    pub fn new(name: &'static str, sink: &'a mut dyn ProgressSink) -> Self {
        Self {
            name,
            sink,
            started: Instant::now(),
            cancelled: false,
        }
    }

    /// Forwards to the sink; sticky once cancelled.
    pub fn update(&mut self, ratio: f32) -> bool {
        if self.cancelled {
            return false;
        }
        if !self.sink.update(ratio.clamp(0.0, 1.0)) {
            self.cancelled = true;
        }
        !self.cancelled
    }

    #[inline]
    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    /// Logs the pass summary at a process boundary.
    pub fn log_points(&self, points: u64) {
        info!(
            "{}: traversed {} points in {:.2}s{}",
            self.name,
            points,
            self.started.elapsed().as_secs_f64(),
            if self.cancelled { " (cancelled)" } else { "" }
        );
    }
}

/// Result of a cancellable pass. Cancellation is a normal outcome, not
/// an error.
#[derive(Debug)]
pub enum PassOutcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> PassOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            PassOutcome::Completed(v) => Some(v),
            PassOutcome::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PassOutcome::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_sticky() {
        let mut calls = 0;
        let mut sink = |_ratio: f32| {
            calls += 1;
            calls < 3
        };
        let mut ctx = PassContext::new("test", &mut sink);
        assert!(ctx.update(0.1));
        assert!(ctx.update(0.2));
        assert!(!ctx.update(0.3));
        assert!(!ctx.update(0.4)); // sink not consulted again
        assert!(ctx.cancelled());
        drop(ctx);
        assert_eq!(calls, 3);
    }
}
