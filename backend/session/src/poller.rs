//! One-shot, re-armable poll timer.

use std::time::Duration;

use tokio::task::JoinHandle;

/// Schedules at most one future callback. Never repeats on its own; the
/// session re-arms it after each poll resolves.
#[derive(Debug, Default)]
pub struct PollScheduler {
    timer: Option<JoinHandle<()>>,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` once after `delay`. Replaces any timer already armed.
    pub fn arm<F>(&mut self, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.disarm();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        }));
    }

    /// Idempotent.
    pub fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}
