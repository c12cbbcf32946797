//! Client configuration.

use crate::error::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Path of the event endpoint below the manager url.
pub const EVENT_ENDPOINT_PATH: &str = "/websocket/events";

/// Reconnect backoff parameters, in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First delay after a drop, and the value restored on success.
    pub min_delay_ms: u64,
    /// Upper bound for the delay.
    pub max_delay_ms: u64,
    /// Added to the delay every time a reconnect is scheduled.
    pub step_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 0,
            max_delay_ms: 30_000,
            step_ms: 3_000,
        }
    }
}

/// Event client configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Base url of the manager, e.g. `https://demo.example.com`.
    pub manager_url: String,

    /// Realm for anonymous connections, used when no credential provider
    /// is given. An explicit provider's realm takes precedence.
    pub realm: String,

    pub reconnect: BackoffConfig,

    /// Interval between lease renewals.
    /// Default: 150s
    pub renewal_interval_ms: u64,

    /// How long one subscribe negotiation may wait for its ack (None = forever).
    /// Default: 30s
    pub subscribe_timeout_ms: Option<u64>,

    /// How long `send_event_with_reply` waits for the reply.
    /// Default: 10s
    pub request_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            manager_url: "http://localhost:8080".to_string(),
            realm: "master".to_string(),
            reconnect: BackoffConfig::default(),
            renewal_interval_ms: 150_000,
            subscribe_timeout_ms: Some(30_000),
            request_timeout_ms: 10_000,
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.reconnect.min_delay_ms > self.reconnect.max_delay_ms {
            return Err(LinkError::InvalidConfig(format!(
                "reconnect min delay {}ms exceeds max delay {}ms",
                self.reconnect.min_delay_ms, self.reconnect.max_delay_ms
            )));
        }
        if self.renewal_interval_ms == 0 {
            return Err(LinkError::InvalidConfig(
                "renewal interval must be non-zero".to_string(),
            ));
        }
        self.endpoint_url()?;
        Ok(())
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_millis(self.renewal_interval_ms)
    }

    pub fn subscribe_timeout(&self) -> Option<Duration> {
        self.subscribe_timeout_ms.map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// WebSocket url of the event endpoint (`http` → `ws`, `https` → `wss`).
    pub fn endpoint_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.manager_url)?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(LinkError::InvalidConfig(format!(
                    "unsupported manager url scheme {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| LinkError::InvalidConfig(format!("cannot use scheme {scheme}")))?;
        let path = format!("{}{}", url.path().trim_end_matches('/'), EVENT_ENDPOINT_PATH);
        url.set_path(&path);
        url.set_query(None);
        Ok(url)
    }
}
