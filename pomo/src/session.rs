use crate::timing::Timing;
use pomo_ipc::{DisplayMode, StatusPayload};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    Focus,
    Break,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseKind::Focus => write!(f, "Focus"),
            PhaseKind::Break => write!(f, "Break"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub kind: PhaseKind,
    /// 1-based
    pub iteration: u32,
    pub duration: Duration,
}

impl Phase {
    /// Unique within a session: no two phases share iteration and kind.
    pub fn id(&self) -> String {
        format!("{}_{}", self.iteration, self.kind)
    }

    pub fn label(&self, iterations: u32) -> String {
        format!("[{}/{}] {}", self.iteration, iterations, self.kind)
    }
}

/// Durations and count a session is built from
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPlan {
    pub work: Duration,
    pub rest: Duration,
    pub iterations: u32,
    pub display: DisplayMode,
    pub dot_interval: Option<u64>,
}

impl SessionPlan {
    /// Focus then Break for every iteration, except that the last iteration
    /// has no Break. Zero-length breaks are left out entirely.
    pub fn phases(&self) -> Vec<Phase> {
        let mut phases = Vec::new();
        for iteration in 1..=self.iterations {
            phases.push(Phase {
                kind: PhaseKind::Focus,
                iteration,
                duration: self.work,
            });
            if iteration < self.iterations && !self.rest.is_zero() {
                phases.push(Phase {
                    kind: PhaseKind::Break,
                    iteration,
                    duration: self.rest,
                });
            }
        }
        phases
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The last phase ran out or was ended early
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running { index: usize, t0: Instant },
    Ended(EndReason),
}

/// The daemon's single source of truth for where the session stands.
///
/// Nothing advances on its own: every operation takes the instant it is
/// evaluated at and first applies any natural phase completion due by then.
#[derive(Debug)]
pub struct Session {
    plan: SessionPlan,
    phases: Vec<Phase>,
    state: SessionState,
}

impl Session {
    pub fn new(plan: SessionPlan, now: Instant) -> Self {
        let phases = plan.phases();
        let state = if phases.is_empty() {
            SessionState::Ended(EndReason::Completed)
        } else {
            SessionState::Running { index: 0, t0: now }
        };
        if let Some(first) = phases.first() {
            info!(phase = %first.id(), phases = phases.len(), "session started");
        }
        Self {
            plan,
            phases,
            state,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.state, SessionState::Ended(_))
    }

    pub fn current_phase(&self) -> Option<&Phase> {
        match self.state {
            SessionState::Running { index, .. } => self.phases.get(index),
            SessionState::Ended(_) => None,
        }
    }

    /// Apply a natural transition if the current phase has run out at `now`.
    pub fn tick(&mut self, now: Instant) {
        if let SessionState::Running { index, t0 } = self.state {
            let duration = self.phases[index].duration;
            if Timing::measure(t0, now, duration).is_complete() {
                info!(phase = %self.phases[index].id(), "phase completed");
                self.advance(index, now);
            }
        }
    }

    /// Snapshot of the current phase, or `None` once the session has ended.
    pub fn status(&mut self, now: Instant) -> Option<StatusPayload> {
        self.tick(now);
        let SessionState::Running { index, t0 } = self.state else {
            return None;
        };
        let phase = &self.phases[index];
        let timing = Timing::measure(t0, now, phase.duration);
        Some(StatusPayload {
            phase_id: phase.id(),
            phase_label: phase.label(self.plan.iterations),
            elapsed_s: timing.elapsed_s(),
            remaining_s: timing.remaining_s(),
            duration_s: phase.duration.as_secs_f64().ceil() as u64,
            progress: timing.progress,
            display: self.plan.display.as_str().to_string(),
            dot_interval: self.plan.dot_interval,
            iter: phase.iteration,
            iters: self.plan.iterations,
            // `tick` has already advanced past a completed phase, so the
            // phase reported here is always still running.
            done: false,
        })
    }

    /// Skip the rest of the current phase. A natural completion due at
    /// `now` is applied first, so the skip lands on the phase after that.
    pub fn end_phase(&mut self, now: Instant) {
        self.tick(now);
        if let SessionState::Running { index, .. } = self.state {
            info!(phase = %self.phases[index].id(), "phase ended early");
            self.advance(index, now);
        }
    }

    /// Discard every remaining phase.
    pub fn abort(&mut self, now: Instant) {
        self.tick(now);
        if !self.is_ended() {
            info!("session aborted");
            self.state = SessionState::Ended(EndReason::Aborted);
        }
    }

    fn advance(&mut self, index: usize, now: Instant) {
        let next = index + 1;
        self.state = if next < self.phases.len() {
            info!(phase = %self.phases[next].id(), "phase started");
            SessionState::Running {
                index: next,
                t0: now,
            }
        } else {
            info!("session completed");
            SessionState::Ended(EndReason::Completed)
        };
    }
}
