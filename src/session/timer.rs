//! Session-scoped deadline holder.
//!
//! One timer per concern (pacing, timeout), owned by the session and
//! cleared on every terminal transition. The drive loop reads the deadline
//! and calls back into the session when it passes; nothing here spawns
//! tasks or sleeps.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct PacingTimer {
    deadline: Option<Instant>,
}

impl PacingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer `delay` from now.
    pub fn arm(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    /// Disarm without firing. Pause and terminal transitions go through
    /// here; the pending obligation stays with the session state.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Whether the deadline has passed. Disarms on fire so one expiry is
    /// observed exactly once.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(d) if now >= d => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
