//! Asset and attribute subscriptions with an optional initial snapshot.

use crate::connection::ConnectionController;
use crate::error::Result;
use crate::protocol::ClientFrame;
use crate::registry::SubscriptionRegistry;
use crate::types::{
    AttributeRef, EventCallback, SharedEvent, SubscriptionDefinition, SubscriptionId, ASSET_EVENT,
    ATTRIBUTE_EVENT,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which entities to follow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntitySelector {
    /// Whole assets, by id.
    Assets(Vec<String>),
    /// Individual attributes.
    Attributes(Vec<AttributeRef>),
}

impl EntitySelector {
    /// Subscription covering the selected entities.
    pub fn definition(&self) -> SubscriptionDefinition {
        match self {
            EntitySelector::Assets(ids) => SubscriptionDefinition::filtered(
                ASSET_EVENT,
                json!({ "filterType": "asset", "assetIds": ids }),
            ),
            EntitySelector::Attributes(refs) => {
                let mut asset_ids: Vec<&str> = Vec::new();
                let mut names: Vec<&str> = Vec::new();
                for attribute in refs {
                    if !asset_ids.contains(&attribute.id.as_str()) {
                        asset_ids.push(&attribute.id);
                    }
                    if !names.contains(&attribute.name.as_str()) {
                        names.push(&attribute.name);
                    }
                }
                SubscriptionDefinition::filtered(
                    ATTRIBUTE_EVENT,
                    json!({
                        "filterType": "asset",
                        "assetIds": asset_ids,
                        "attributeNames": names,
                    }),
                )
            }
        }
    }

    /// One read-current-state request per selected entity.
    pub fn snapshot_requests(&self, subscription_id: &SubscriptionId) -> Vec<SharedEvent> {
        match self {
            EntitySelector::Assets(ids) => ids
                .iter()
                .map(|id| SharedEvent::read_asset(id, subscription_id))
                .collect(),
            EntitySelector::Attributes(refs) => refs
                .iter()
                .map(|attribute| SharedEvent::read_attribute(attribute, subscription_id))
                .collect(),
        }
    }
}

pub struct SubscriptionFacade {
    registry: Arc<SubscriptionRegistry>,
    controller: Arc<ConnectionController>,
}

impl SubscriptionFacade {
    pub(crate) fn new(
        registry: Arc<SubscriptionRegistry>,
        controller: Arc<ConnectionController>,
    ) -> Self {
        Self {
            registry,
            controller,
        }
    }

    /// Subscribe to the selected entities. With `want_snapshot`, the server
    /// is also asked to push their current state on the new subscription.
    pub async fn subscribe_to_entities(
        &self,
        selector: EntitySelector,
        want_snapshot: bool,
        callback: EventCallback,
    ) -> Result<SubscriptionId> {
        let id = self
            .registry
            .subscribe(selector.definition(), callback)
            .await?;

        if want_snapshot {
            let requests = selector.snapshot_requests(&id);
            debug!(target: "eventlink::registry", %id, count = requests.len(), "requesting current state");
            for event in requests {
                if let Err(err) = self.controller.send(ClientFrame::Event(event)) {
                    warn!(target: "eventlink::registry", %id, error = %err, "snapshot request failed");
                    self.registry.unsubscribe(&id);
                    return Err(err);
                }
            }
        }

        Ok(id)
    }

    pub async fn subscribe_asset_events(
        &self,
        asset_ids: Vec<String>,
        want_snapshot: bool,
        callback: EventCallback,
    ) -> Result<SubscriptionId> {
        self.subscribe_to_entities(EntitySelector::Assets(asset_ids), want_snapshot, callback)
            .await
    }

    pub async fn subscribe_attribute_events(
        &self,
        attributes: Vec<AttributeRef>,
        want_snapshot: bool,
        callback: EventCallback,
    ) -> Result<SubscriptionId> {
        self.subscribe_to_entities(
            EntitySelector::Attributes(attributes),
            want_snapshot,
            callback,
        )
        .await
    }
}
