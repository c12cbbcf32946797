//! Periodic lease renewal for active subscriptions.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Repeating timer that runs while at least one subscription is active.
pub struct RenewalScheduler {
    interval: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RenewalScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timer: Mutex::new(None),
        }
    }

    /// Start ticking unless already running. The first tick fires one full
    /// interval from now; the timer ends early if `tick` returns false.
    pub fn start<F>(&self, tick: F)
    where
        F: Fn() -> bool + Send + 'static,
    {
        let mut timer = self.timer.lock();
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        debug!(
            target: "eventlink::renewal",
            interval_ms = self.interval.as_millis() as u64,
            "starting renewal timer"
        );
        let period = self.interval;
        *timer = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !tick() {
                    break;
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.timer.lock().take() {
            debug!(target: "eventlink::renewal", "stopping renewal timer");
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}
