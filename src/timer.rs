use std::time::{Duration, Instant};

/// Single-shot restart timer.
///
/// The timer does not run on its own. Its owner polls it with [`fire`]
/// from the same locked entry point that handles every other event.
///
/// [`fire`]: RetryTimer::fire
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RetryTimer {
    deadline: Option<Instant>,
}

impl RetryTimer {
    /// Schedules an expiration `duration` from now, replacing any pending one.
    pub fn arm(&mut self, duration: Duration) {
        self.arm_at(Instant::now() + duration);
    }

    pub fn arm_at(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Reports the expiration if the deadline has passed and disarms.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Expires a pending deadline immediately.
    pub fn fire_now(&mut self) -> bool {
        self.deadline.take().is_some()
    }
}
