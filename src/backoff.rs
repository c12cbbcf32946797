//! Linear-step reconnect backoff with an upper bound.

use crate::config::BackoffConfig;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ReconnectBackoff {
    current_ms: u64,
    config: BackoffConfig,
}

impl ReconnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current_ms: config.min_delay_ms,
            config,
        }
    }

    /// Delay the next reconnect would be scheduled with.
    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.current_ms)
    }

    /// Take the delay for a reconnect being scheduled now and grow the
    /// delay for the one after it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay();
        self.current_ms = self
            .current_ms
            .saturating_add(self.config.step_ms)
            .min(self.config.max_delay_ms);
        delay
    }

    /// Back to the minimum delay after a successful connect.
    pub fn reset(&mut self) {
        self.current_ms = self.config.min_delay_ms;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
