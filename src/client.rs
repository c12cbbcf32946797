//! The event client: one connection, one registry, one dispatch loop.

use crate::config::LinkConfig;
use crate::connection::{ConnectionController, ObserverId, StatusCallback};
use crate::credentials::{CredentialProvider, StaticCredentials};
use crate::dispatch;
use crate::error::Result;
use crate::facade::{EntitySelector, SubscriptionFacade};
use crate::protocol::ClientFrame;
use crate::registry::{PendingSubscribe, SubscriptionRegistry};
use crate::requests::RequestTracker;
use crate::transport::{Transport, WebSocketTransport};
use crate::types::{
    AttributeRef, ConnectionState, EventCallback, SharedEvent, SubscriptionDefinition,
    SubscriptionId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Client for the manager's event service.
///
/// Must be created inside a tokio runtime. Dropping the client closes the
/// connection and stops every background task.
pub struct EventClient {
    controller: Arc<ConnectionController>,
    registry: Arc<SubscriptionRegistry>,
    requests: Arc<RequestTracker>,
    facade: SubscriptionFacade,
    dispatcher: JoinHandle<()>,
}

impl EventClient {
    /// Client over any transport.
    pub fn new(config: LinkConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let (signals, signal_rx) = mpsc::unbounded_channel();
        let controller =
            ConnectionController::new(transport, config.reconnect.clone(), signals.clone());
        let registry = SubscriptionRegistry::new(
            Arc::clone(&controller),
            signals,
            config.renewal_interval(),
            config.subscribe_timeout(),
        );
        let requests = Arc::new(RequestTracker::new(
            Arc::clone(&controller),
            config.request_timeout(),
        ));
        let facade = SubscriptionFacade::new(Arc::clone(&registry), Arc::clone(&controller));

        let dispatcher = tokio::spawn(dispatch::run(
            signal_rx,
            Arc::clone(&controller),
            Arc::clone(&registry),
            Arc::clone(&requests),
        ));

        debug!(target: "eventlink::connection", manager = %config.manager_url, realm = %config.realm, "event client created");
        Ok(Self {
            controller,
            registry,
            requests,
            facade,
            dispatcher,
        })
    }

    /// Client over a WebSocket to the endpoint derived from `config`.
    ///
    /// Without a credential provider the connection is anonymous in
    /// `config.realm`.
    pub fn websocket(
        config: LinkConfig,
        credentials: Option<Arc<dyn CredentialProvider>>,
    ) -> Result<Self> {
        let endpoint = config.endpoint_url()?;
        let credentials = resolve_credentials(&config, credentials);
        let transport = Arc::new(WebSocketTransport::new(endpoint, credentials));
        Self::new(config, transport)
    }

    // --- Connection ---

    pub async fn connect(&self) -> bool {
        self.controller.connect().await
    }

    pub fn disconnect(&self) {
        self.controller.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.controller.state()
    }

    pub fn subscribe_status_change(&self, callback: StatusCallback) -> ObserverId {
        self.controller.subscribe_status_change(callback)
    }

    pub fn unsubscribe_status_change(&self, id: ObserverId) {
        self.controller.unsubscribe_status_change(id);
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.controller.watch_status()
    }

    /// Delay before the next automatic reconnect attempt.
    pub fn reconnect_delay(&self) -> Duration {
        self.controller.reconnect_delay()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.controller.reconnect_pending()
    }

    // --- Subscriptions ---

    pub fn subscribe(
        &self,
        definition: SubscriptionDefinition,
        callback: EventCallback,
    ) -> PendingSubscribe {
        self.registry.subscribe(definition, callback)
    }

    pub fn unsubscribe(&self, id: &SubscriptionId) {
        self.registry.unsubscribe(id);
    }

    pub async fn subscribe_to_entities(
        &self,
        selector: EntitySelector,
        want_snapshot: bool,
        callback: EventCallback,
    ) -> Result<SubscriptionId> {
        self.facade
            .subscribe_to_entities(selector, want_snapshot, callback)
            .await
    }

    pub async fn subscribe_asset_events(
        &self,
        asset_ids: Vec<String>,
        want_snapshot: bool,
        callback: EventCallback,
    ) -> Result<SubscriptionId> {
        self.facade
            .subscribe_asset_events(asset_ids, want_snapshot, callback)
            .await
    }

    pub async fn subscribe_attribute_events(
        &self,
        attributes: Vec<AttributeRef>,
        want_snapshot: bool,
        callback: EventCallback,
    ) -> Result<SubscriptionId> {
        self.facade
            .subscribe_attribute_events(attributes, want_snapshot, callback)
            .await
    }

    // --- Events ---

    /// Send one event to the server. Fails with `NotConnected` when the link is down.
    pub fn send_event(&self, event: SharedEvent) -> Result<()> {
        self.controller.send(ClientFrame::Event(event))
    }

    /// Send one event and wait for the server's reply to it.
    pub async fn send_event_with_reply(&self, event: SharedEvent) -> Result<SharedEvent> {
        self.requests.send_event_with_reply(event).await
    }

    // --- Introspection ---

    pub fn active_count(&self) -> usize {
        self.registry.active_count()
    }

    pub fn active_ids(&self) -> Vec<SubscriptionId> {
        self.registry.active_ids()
    }

    pub fn queued_count(&self) -> usize {
        self.registry.queued_count()
    }

    pub fn has_pending(&self) -> bool {
        self.registry.has_pending()
    }

    pub fn renewal_running(&self) -> bool {
        self.registry.renewal_running()
    }

    pub fn outstanding_requests(&self) -> usize {
        self.requests.outstanding()
    }
}

impl Drop for EventClient {
    fn drop(&mut self) {
        self.controller.disconnect();
        self.dispatcher.abort();
    }
}

/// The provider's realm wins over `config.realm` when both are given.
fn resolve_credentials(
    config: &LinkConfig,
    credentials: Option<Arc<dyn CredentialProvider>>,
) -> Arc<dyn CredentialProvider> {
    match credentials {
        Some(credentials) => {
            let realm = credentials.realm();
            if realm != config.realm {
                warn!(
                    target: "eventlink::connection",
                    configured = %config.realm,
                    %realm,
                    "credential realm differs from configured realm"
                );
            }
            credentials
        }
        None => Arc::new(StaticCredentials::anonymous(config.realm.clone())),
    }
}
