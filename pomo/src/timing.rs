//! Phase timing from a monotonic start instant

use std::time::{Duration, Instant};

/// Where a phase stands at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub elapsed: Duration,
    pub remaining: Duration,
    /// Fraction of the phase elapsed, clamped to 0.0..=1.0
    pub progress: f64,
}

impl Timing {
    /// Measure a phase of length `duration` started at `t0`, as seen at `now`.
    ///
    /// `now` earlier than `t0` counts as zero elapsed. A zero-length phase is
    /// complete immediately.
    pub fn measure(t0: Instant, now: Instant, duration: Duration) -> Self {
        let elapsed = now.saturating_duration_since(t0);
        let remaining = duration.saturating_sub(elapsed);
        let progress = if duration.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
        };
        Self {
            elapsed,
            remaining,
            progress,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.remaining.is_zero()
    }

    /// Whole seconds elapsed
    pub fn elapsed_s(&self) -> u64 {
        self.elapsed.as_secs()
    }

    /// Whole seconds remaining, rounded up so a countdown only shows
    /// 00:00 once the phase is really over.
    pub fn remaining_s(&self) -> u64 {
        let secs = self.remaining.as_secs();
        if self.remaining.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}
