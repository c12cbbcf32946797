//! # eventlink
//!
//! Client side of a real-time event service: one persistent connection,
//! many logical subscriptions multiplexed over it.
//!
//! ## Core Concepts
//!
//! - **Connection**: Disconnected / Connecting / Connected, with automatic
//!   reconnect and linear backoff when the link drops
//! - **Subscriptions**: negotiated one at a time, queued otherwise, and
//!   replayed after every reconnect
//! - **Renewal**: active subscription leases are re-asserted periodically
//! - **Snapshots**: asset and attribute subscriptions can ask for the
//!   current state right after they are confirmed
//!
//! ## Example
//!
//! ```ignore
//! use eventlink::{EventClient, LinkConfig, SubscriptionDefinition};
//! use std::sync::Arc;
//!
//! // Anonymous in the configured realm
//! let client = EventClient::websocket(LinkConfig::default(), None)?;
//! client.connect().await;
//!
//! let id = client
//!     .subscribe(
//!         SubscriptionDefinition::new("alarm"),
//!         Arc::new(|event| println!("{event:?}")),
//!     )
//!     .await?;
//!
//! client.unsubscribe(&id);
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod credentials;
mod dispatch;
pub mod error;
pub mod facade;
pub mod protocol;
pub mod registry;
pub mod renewal;
pub mod requests;
pub mod transport;
pub mod types;

// Re-exports
pub use backoff::ReconnectBackoff;
pub use client::EventClient;
pub use config::{BackoffConfig, LinkConfig};
pub use connection::{ConnectionController, ObserverId, StatusCallback};
pub use credentials::{CredentialProvider, StaticCredentials};
pub use error::{LinkError, Result};
pub use facade::{EntitySelector, SubscriptionFacade};
pub use protocol::{ClientFrame, ServerFrame};
pub use registry::{PendingSubscribe, SubscriptionRegistry};
pub use transport::{FrameSink, Transport, WebSocketTransport};
pub use types::{
    AttributeRef, ConnectionState, EventCallback, SharedEvent, SubscriptionDefinition,
    SubscriptionId,
};
