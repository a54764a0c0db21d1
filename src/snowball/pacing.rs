//! Courtesy pacing for remote calls.

use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

/// Sleeps `pause` after every `every` remote calls. `every == 0` disables it.
#[derive(Debug, Clone)]
pub struct Pacer {
    every: u32,
    pause: Duration,
    calls: u64,
}

impl Pacer {
    pub fn new(every: u32, pause: Duration) -> Self {
        Self {
            every,
            pause,
            calls: 0,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Remote calls counted so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Count one remote call, pausing when the interval is reached.
    ///
    /// The pause ends early if `shutdown` flips.
    pub async fn tick(&mut self, shutdown: &mut watch::Receiver<bool>) {
        self.calls += 1;
        if self.every == 0 || self.pause.is_zero() || self.calls % u64::from(self.every) != 0 {
            return;
        }

        info!(
            "{} remote calls made, pausing for {:?}",
            self.calls, self.pause
        );
        tokio::select! {
            _ = tokio::time::sleep(self.pause) => {}
            _ = shutdown.wait_for(|stop| *stop) => {}
        }
    }
}
