//! Core types shared across the event link.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of the link to the event service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
        };
        f.write_str(name)
    }
}

/// Identifier of a subscription, chosen by the client and confirmed by the server.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Self {
        SubscriptionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(id: &str) -> Self {
        SubscriptionId(id.to_string())
    }
}

/// What a caller wants to receive: an event type plus an opaque filter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDefinition {
    pub event_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<SubscriptionId>,
}

impl SubscriptionDefinition {
    /// Subscribe to every event of a type.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            filter: None,
            subscription_id: None,
        }
    }

    /// Subscribe to events of a type matching a filter.
    pub fn filtered(event_type: impl Into<String>, filter: Value) -> Self {
        Self {
            event_type: event_type.into(),
            filter: Some(filter),
            subscription_id: None,
        }
    }
}

/// A domain event exchanged with the server.
///
/// Only `eventType` is interpreted here; everything else is carried through
/// untouched for the domain-event decoder downstream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SharedEvent {
    #[serde(rename = "eventType")]
    pub event_type: String,

    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl SharedEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            body: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Request for the current state of an asset, answered on a subscription.
    pub fn read_asset(asset_id: &str, subscription_id: &SubscriptionId) -> Self {
        SharedEvent::new(READ_ASSET_EVENT)
            .with("assetId", asset_id)
            .with("subscriptionId", subscription_id.as_str())
    }

    /// Request for the current value of an attribute, answered on a subscription.
    pub fn read_attribute(attribute: &AttributeRef, subscription_id: &SubscriptionId) -> Self {
        SharedEvent::new(READ_ATTRIBUTE_EVENT)
            .with(
                "ref",
                serde_json::json!({ "id": attribute.id, "name": attribute.name }),
            )
            .with("subscriptionId", subscription_id.as_str())
    }
}

pub const ASSET_EVENT: &str = "asset";
pub const ATTRIBUTE_EVENT: &str = "attribute";
pub const READ_ASSET_EVENT: &str = "read-asset";
pub const READ_ATTRIBUTE_EVENT: &str = "read-asset-attribute";

/// Reference to one attribute of one asset.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeRef {
    /// Asset id.
    pub id: String,
    /// Attribute name.
    pub name: String,
}

impl AttributeRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Callback invoked once per event delivered on a subscription.
pub type EventCallback = Arc<dyn Fn(SharedEvent) + Send + Sync>;
