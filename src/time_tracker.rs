use std::time::Duration;

use tokio::time::Instant;

const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Exponential delay for the given 1-based attempt, capped at ten seconds.
fn backoff_for_attempt(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    BACKOFF_BASE.saturating_mul(1u32 << exp).min(BACKOFF_CAP)
}

/// Time-boxes a single poll window and derives retry backoff from the attempt
/// count. Uses the tokio clock so tests can pause and advance time.
#[derive(Debug, Clone)]
pub struct TimeTracker {
    budget: Duration,
    started: Instant,
    attempts: u32,
}

impl TimeTracker {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            started: Instant::now(),
            attempts: 0,
        }
    }

    /// Time left in the window; zero once the budget is spent.
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    pub fn exceeded(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Restart the window, keeping the attempt counter.
    pub fn checkpoint(&mut self) {
        self.started = Instant::now();
    }

    pub fn attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn reset_attempts(&mut self) {
        self.attempts = 0;
    }

    /// Exponential backoff derived from the attempt count, capped so one
    /// retry never eats the whole window.
    pub fn backoff(&self) -> Duration {
        backoff_for_attempt(self.attempts).min(self.remaining().max(BACKOFF_BASE))
    }
}
