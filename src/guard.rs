//! Single-flight guard for remote operations.
//!
//! At most one streaming task or update runs at a time, and a new one may
//! not start until a minimum interval has passed since the previous one
//! finished. Rejections are not queued: the operator is told and decides
//! whether to try again.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::notify::{Notifier, NotifyLevel};

/// Default spacing between the end of one operation and the start of the next.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(2000);

/// Why the guard turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Another operation has not called `end()` yet.
    InProgress,
    /// The previous operation finished less than the minimum interval ago.
    TooSoon { wait: Duration },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::InProgress => write!(f, "Another request is already in progress"),
            Rejection::TooSoon { wait } => {
                write!(f, "Too soon, please wait {}ms", wait.as_millis())
            }
        }
    }
}

/// Result of [`SingleFlightGuard::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected(Rejection),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted)
    }
}

/// Process-wide admission state, owned by one coordinator.
pub struct SingleFlightGuard {
    in_progress: bool,
    started_at: Option<Instant>,
    last_completion: Option<Instant>,
    min_interval: Duration,
    notifier: Arc<dyn Notifier>,
}

impl SingleFlightGuard {
    pub fn new(min_interval: Duration, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            in_progress: false,
            started_at: None,
            last_completion: None,
            min_interval,
            notifier,
        }
    }

    /// Ask to start an operation now.
    pub fn try_acquire(&mut self) -> Admission {
        self.try_acquire_at(Instant::now())
    }

    /// Ask to start an operation at `now`.
    ///
    /// Acceptance marks the guard in progress immediately, so a second
    /// request before `end()` is rejected even if the caller has not reached
    /// `begin()` yet. Every rejection is also sent to the notifier.
    pub fn try_acquire_at(&mut self, now: Instant) -> Admission {
        let admission = self.evaluate(now);
        match admission {
            Admission::Accepted => {
                self.in_progress = true;
                self.started_at = Some(now);
            }
            Admission::Rejected(rejection) => {
                tracing::info!(%rejection, "single-flight guard rejected request");
                self.notifier.notify(
                    NotifyLevel::Warning,
                    "Request not started",
                    &rejection.to_string(),
                );
            }
        }
        admission
    }

    fn evaluate(&self, now: Instant) -> Admission {
        if self.in_progress {
            return Admission::Rejected(Rejection::InProgress);
        }
        // No completion recorded: first call ever (or after reset) always passes
        if let Some(last) = self.last_completion {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.min_interval {
                return Admission::Rejected(Rejection::TooSoon {
                    wait: self.min_interval - elapsed,
                });
            }
        }
        Admission::Accepted
    }

    /// Mark the accepted operation as running.
    pub fn begin(&mut self) {
        if !self.in_progress {
            self.in_progress = true;
            self.started_at = Some(Instant::now());
        }
    }

    /// Mark the running operation as finished, successfully or not.
    pub fn end(&mut self) {
        self.end_at(Instant::now());
    }

    pub fn end_at(&mut self, now: Instant) {
        self.in_progress = false;
        self.started_at = None;
        self.last_completion = Some(now);
    }

    /// Forget all state. Operator recovery only.
    pub fn reset(&mut self) {
        self.in_progress = false;
        self.started_at = None;
        self.last_completion = None;
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    /// Time since the current operation was admitted.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|s| s.elapsed())
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

impl fmt::Debug for SingleFlightGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlightGuard")
            .field("in_progress", &self.in_progress)
            .field("last_completion", &self.last_completion)
            .field("min_interval", &self.min_interval)
            .finish()
    }
}
