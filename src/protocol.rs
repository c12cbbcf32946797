//! Wire framing for the event service.
//!
//! Every message is a short prefix tag followed by a JSON body, e.g.
//! `SUBSCRIBE:{"eventType":"asset",...}`. Frames are decoded once into the
//! [`ClientFrame`] / [`ServerFrame`] enums at the transport boundary; nothing
//! past the transport looks at prefixes.

use crate::error::{LinkError, Result};
use crate::types::{SharedEvent, SubscriptionDefinition, SubscriptionId};
use serde::{Deserialize, Serialize};

pub const SUBSCRIBE_PREFIX: &str = "SUBSCRIBE:";
pub const SUBSCRIBED_PREFIX: &str = "SUBSCRIBED:";
pub const UNAUTHORIZED_PREFIX: &str = "UNAUTHORIZED:";
pub const UNSUBSCRIBE_PREFIX: &str = "UNSUBSCRIBE:";
pub const RENEW_PREFIX: &str = "RENEW:";
pub const EVENT_PREFIX: &str = "EVENT:";
pub const REQUEST_RESPONSE_PREFIX: &str = "REQUESTRESPONSE:";

/// Body of an `UNSUBSCRIBE:` frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSubscription {
    pub event_type: String,
    pub subscription_id: SubscriptionId,
}

/// Body of an `UNAUTHORIZED:` frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct UnauthorizedSubscription {
    subscription: SubscriptionDefinition,
}

/// Events delivered on one subscription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredEvents {
    pub subscription_id: SubscriptionId,
    #[serde(default)]
    pub events: Vec<SharedEvent>,
}

/// An event correlated with a reply by message id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub message_id: String,
    pub event: SharedEvent,
}

/// Frames sent by the client.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientFrame {
    Subscribe(SubscriptionDefinition),
    Unsubscribe(CancelSubscription),
    Renew(Vec<SubscriptionId>),
    Event(SharedEvent),
    Request(RequestResponse),
}

/// Frames sent by the server.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerFrame {
    Subscribed(SubscriptionDefinition),
    Unauthorized(SubscriptionDefinition),
    Event(TriggeredEvents),
    Response(RequestResponse),
}

impl ClientFrame {
    pub fn encode(&self) -> Result<String> {
        let (prefix, body) = match self {
            ClientFrame::Subscribe(def) => (SUBSCRIBE_PREFIX, serde_json::to_string(def)?),
            ClientFrame::Unsubscribe(cancel) => {
                (UNSUBSCRIBE_PREFIX, serde_json::to_string(cancel)?)
            }
            ClientFrame::Renew(ids) => (RENEW_PREFIX, serde_json::to_string(ids)?),
            ClientFrame::Event(event) => (EVENT_PREFIX, serde_json::to_string(event)?),
            ClientFrame::Request(request) => {
                (REQUEST_RESPONSE_PREFIX, serde_json::to_string(request)?)
            }
        };
        Ok(format!("{prefix}{body}"))
    }

    pub fn decode(text: &str) -> Result<Self> {
        let (prefix, body) = split_frame(text)?;
        let frame = match prefix {
            SUBSCRIBE_PREFIX => ClientFrame::Subscribe(parse(prefix, body)?),
            UNSUBSCRIBE_PREFIX => ClientFrame::Unsubscribe(parse(prefix, body)?),
            RENEW_PREFIX => ClientFrame::Renew(parse(prefix, body)?),
            EVENT_PREFIX => ClientFrame::Event(parse(prefix, body)?),
            REQUEST_RESPONSE_PREFIX => ClientFrame::Request(parse(prefix, body)?),
            other => {
                return Err(LinkError::Protocol(format!(
                    "unexpected client frame prefix {other}"
                )))
            }
        };
        Ok(frame)
    }
}

impl ServerFrame {
    pub fn encode(&self) -> Result<String> {
        let (prefix, body) = match self {
            ServerFrame::Subscribed(def) => (SUBSCRIBED_PREFIX, serde_json::to_string(def)?),
            ServerFrame::Unauthorized(def) => (
                UNAUTHORIZED_PREFIX,
                serde_json::to_string(&UnauthorizedSubscription {
                    subscription: def.clone(),
                })?,
            ),
            ServerFrame::Event(triggered) => (EVENT_PREFIX, serde_json::to_string(triggered)?),
            ServerFrame::Response(response) => {
                (REQUEST_RESPONSE_PREFIX, serde_json::to_string(response)?)
            }
        };
        Ok(format!("{prefix}{body}"))
    }

    pub fn decode(text: &str) -> Result<Self> {
        let (prefix, body) = split_frame(text)?;
        let frame = match prefix {
            SUBSCRIBED_PREFIX => ServerFrame::Subscribed(parse(prefix, body)?),
            UNAUTHORIZED_PREFIX => {
                let rejected: UnauthorizedSubscription = parse(prefix, body)?;
                ServerFrame::Unauthorized(rejected.subscription)
            }
            EVENT_PREFIX => ServerFrame::Event(parse(prefix, body)?),
            REQUEST_RESPONSE_PREFIX => ServerFrame::Response(parse(prefix, body)?),
            other => {
                return Err(LinkError::Protocol(format!(
                    "unexpected server frame prefix {other}"
                )))
            }
        };
        Ok(frame)
    }
}

/// Split `PREFIX:{json}` into the prefix (colon included) and the body.
fn split_frame(text: &str) -> Result<(&str, &str)> {
    let colon = text
        .find(':')
        .ok_or_else(|| LinkError::Protocol("frame has no prefix".to_string()))?;
    let (prefix, body) = text.split_at(colon + 1);
    if prefix.len() == 1 || !prefix[..colon].chars().all(|c| c.is_ascii_uppercase()) {
        return Err(LinkError::Protocol(format!("malformed frame prefix {prefix:?}")));
    }
    Ok((prefix, body))
}

fn parse<T: serde::de::DeserializeOwned>(prefix: &str, body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| LinkError::Protocol(format!("invalid {prefix} body: {e}")))
}
