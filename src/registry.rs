//! Subscription registry: one negotiation at a time, everything else queued.
//!
//! The wire protocol correlates exactly one in-flight `SUBSCRIBE:` with the
//! next `SUBSCRIBED:` / `UNAUTHORIZED:` frame, so the registry never has more
//! than one pending request. Further requests wait in a FIFO queue. When the
//! link drops, active and pending subscriptions move to the front of that
//! queue and are renegotiated with their original definitions once the link
//! is back.

use crate::connection::ConnectionController;
use crate::dispatch::{Signal, SignalSender};
use crate::error::{LinkError, Result};
use crate::protocol::{CancelSubscription, ClientFrame, ServerFrame, TriggeredEvents};
use crate::renewal::RenewalScheduler;
use crate::types::{ConnectionState, EventCallback, SubscriptionDefinition, SubscriptionId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type SubscribeResult = oneshot::Sender<Result<SubscriptionId>>;

/// A subscribe request waiting for, or in, negotiation.
struct Request {
    definition: SubscriptionDefinition,
    callback: EventCallback,
    /// None for replays: their caller was answered by an earlier ack.
    result: Option<SubscribeResult>,
}

impl Request {
    fn is_replay(&self) -> bool {
        self.result.is_none()
    }

    fn is_abandoned(&self) -> bool {
        self.result.as_ref().is_some_and(|tx| tx.is_closed())
    }
}

/// The single in-flight negotiation.
struct Pending {
    request: Request,
    id: SubscriptionId,
    token: u64,
    /// Unsubscribed while in flight; answer the ack with an unsubscribe.
    cancelled: bool,
    timeout: Option<JoinHandle<()>>,
}

struct Active {
    definition: SubscriptionDefinition,
    callback: EventCallback,
    activated: u64,
}

#[derive(Default)]
struct RegistryState {
    active: HashMap<SubscriptionId, Active>,
    pending: Option<Pending>,
    queue: VecDeque<Request>,
    next_token: u64,
    activations: u64,
}

impl RegistryState {
    /// Active subscriptions in activation order, as replay requests.
    fn drain_active(&mut self) -> Vec<Request> {
        let mut active: Vec<Active> = self.active.drain().map(|(_, active)| active).collect();
        active.sort_by_key(|active| active.activated);
        active
            .into_iter()
            .map(|active| Request {
                definition: active.definition,
                callback: active.callback,
                result: None,
            })
            .collect()
    }

    fn push_front_all(&mut self, requests: Vec<Request>) {
        for request in requests.into_iter().rev() {
            self.queue.push_front(request);
        }
    }
}

/// Future returned by [`SubscriptionRegistry::subscribe`].
///
/// The request is registered when `subscribe` is called, not when this is
/// first polled; dropping it abandons the request if it is still queued.
pub struct PendingSubscribe {
    rx: oneshot::Receiver<Result<SubscriptionId>>,
}

impl Future for PendingSubscribe {
    type Output = Result<SubscriptionId>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(LinkError::Closed)))
    }
}

pub struct SubscriptionRegistry {
    controller: Arc<ConnectionController>,
    signals: SignalSender,
    renewal: RenewalScheduler,
    subscribe_timeout: Option<Duration>,
    next_id: AtomicU64,
    inner: Mutex<RegistryState>,
    this: Weak<SubscriptionRegistry>,
}

impl SubscriptionRegistry {
    pub(crate) fn new(
        controller: Arc<ConnectionController>,
        signals: SignalSender,
        renewal_interval: Duration,
        subscribe_timeout: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            controller,
            signals,
            renewal: RenewalScheduler::new(renewal_interval),
            subscribe_timeout,
            next_id: AtomicU64::new(1),
            inner: Mutex::new(RegistryState::default()),
            this: this.clone(),
        })
    }

    /// Subscribe to events matching `definition`.
    ///
    /// Sent immediately when connected and idle, queued otherwise. The
    /// returned future resolves with the confirmed id once acknowledged.
    pub fn subscribe(
        &self,
        definition: SubscriptionDefinition,
        callback: EventCallback,
    ) -> PendingSubscribe {
        let (tx, rx) = oneshot::channel();
        let request = Request {
            definition,
            callback,
            result: Some(tx),
        };

        let mut inner = self.inner.lock();
        if inner.pending.is_none()
            && inner.queue.is_empty()
            && self.controller.state() == ConnectionState::Connected
        {
            self.start_negotiation(&mut inner, request);
        } else {
            debug!(
                target: "eventlink::registry",
                event_type = %request.definition.event_type,
                queued = inner.queue.len() + 1,
                "queueing subscribe request"
            );
            inner.queue.push_back(request);
        }

        PendingSubscribe { rx }
    }

    /// Cancel a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: &SubscriptionId) {
        let frame = {
            let mut inner = self.inner.lock();
            match inner.active.remove(id) {
                Some(active) => {
                    if inner.active.is_empty() {
                        self.renewal.stop();
                    }
                    Some(ClientFrame::Unsubscribe(CancelSubscription {
                        event_type: active.definition.event_type,
                        subscription_id: id.clone(),
                    }))
                }
                None => {
                    // Demoted by a disconnect and waiting to be replayed.
                    inner.queue.retain(|request| {
                        !(request.is_replay()
                            && request.definition.subscription_id.as_ref() == Some(id))
                    });
                    if let Some(pending) = inner.pending.as_mut() {
                        if pending.id == *id && pending.request.is_replay() {
                            pending.cancelled = true;
                        }
                    }
                    None
                }
            }
        };

        if let Some(frame) = frame {
            if let Err(err) = self.controller.send(frame) {
                debug!(target: "eventlink::registry", %id, error = %err, "unsubscribe not sent");
            }
        }
    }

    pub(crate) fn handle_frame(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Subscribed(confirmed) => self.on_subscribed(confirmed),
            ServerFrame::Unauthorized(rejected) => self.on_unauthorized(rejected),
            ServerFrame::Event(triggered) => self.deliver(triggered),
            ServerFrame::Response(_) => {
                debug!(target: "eventlink::registry", "ignoring request/response frame");
            }
        }
    }

    /// Link (re)established: renegotiate everything that was active.
    pub(crate) fn on_connected(&self) {
        {
            let mut inner = self.inner.lock();
            let replays = inner.drain_active();
            if !replays.is_empty() {
                debug!(target: "eventlink::registry", count = replays.len(), "replaying subscriptions");
                self.renewal.stop();
                inner.push_front_all(replays);
            }
        }
        self.process_next();
    }

    /// Link lost: the server forgets every subscription, so queue them all
    /// for renegotiation ahead of caller requests.
    pub(crate) fn on_disconnected(&self) {
        let mut inner = self.inner.lock();
        let mut requeue = inner.drain_active();

        if let Some(pending) = inner.pending.take() {
            if let Some(timeout) = pending.timeout {
                timeout.abort();
            }
            if !pending.cancelled {
                requeue.push(pending.request);
            }
        }

        self.renewal.stop();
        if !requeue.is_empty() {
            debug!(target: "eventlink::registry", count = requeue.len(), "requeueing subscriptions after disconnect");
            inner.push_front_all(requeue);
        }
    }

    /// Start the next queued negotiation if the link is up and idle.
    pub(crate) fn process_next(&self) {
        let mut inner = self.inner.lock();
        if inner.pending.is_some() || self.controller.state() != ConnectionState::Connected {
            return;
        }

        while let Some(request) = inner.queue.pop_front() {
            if request.is_abandoned() {
                debug!(target: "eventlink::registry", "skipping abandoned subscribe request");
                continue;
            }
            self.start_negotiation(&mut inner, request);
            break;
        }
    }

    fn start_negotiation(&self, inner: &mut RegistryState, mut request: Request) {
        let id = request
            .definition
            .subscription_id
            .get_or_insert_with(|| self.fresh_id())
            .clone();

        inner.next_token += 1;
        let token = inner.next_token;
        let timeout = self.subscribe_timeout.map(|limit| {
            let registry = self.this.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                if let Some(registry) = registry.upgrade() {
                    registry.expire_pending(token);
                }
            })
        });

        let frame = ClientFrame::Subscribe(request.definition.clone());
        debug!(target: "eventlink::registry", %id, event_type = %request.definition.event_type, "sending subscribe");
        inner.pending = Some(Pending {
            request,
            id: id.clone(),
            token,
            cancelled: false,
            timeout,
        });

        // A failed send means the link is going down; the close requeues us.
        if let Err(err) = self.controller.send(frame) {
            warn!(target: "eventlink::registry", %id, error = %err, "failed to send subscribe");
        }
    }

    /// Take the pending negotiation if `answer` refers to it.
    fn take_pending_for(
        &self,
        inner: &mut RegistryState,
        answer: &SubscriptionDefinition,
        kind: &str,
    ) -> Option<Pending> {
        let Some(pending) = inner.pending.as_ref() else {
            warn!(target: "eventlink::registry", kind, "answer with no subscribe in flight");
            return None;
        };
        if let Some(answered) = &answer.subscription_id {
            if *answered != pending.id {
                warn!(
                    target: "eventlink::registry",
                    kind,
                    answered = %answered,
                    pending = %pending.id,
                    "answer for a different subscription, dropping"
                );
                return None;
            }
        }

        let mut pending = inner.pending.take()?;
        if let Some(timeout) = pending.timeout.take() {
            timeout.abort();
        }
        Some(pending)
    }

    fn on_subscribed(&self, confirmed: SubscriptionDefinition) {
        let mut unsubscribe = None;
        {
            let mut inner = self.inner.lock();
            let Some(pending) = self.take_pending_for(&mut inner, &confirmed, "subscribed") else {
                return;
            };
            let id = confirmed.subscription_id.unwrap_or(pending.id);

            if pending.cancelled {
                debug!(target: "eventlink::registry", %id, "subscription cancelled while in flight");
                unsubscribe = Some(ClientFrame::Unsubscribe(CancelSubscription {
                    event_type: pending.request.definition.event_type.clone(),
                    subscription_id: id.clone(),
                }));
            } else {
                inner.activations += 1;
                let activated = inner.activations;
                inner.active.insert(
                    id.clone(),
                    Active {
                        definition: pending.request.definition,
                        callback: pending.request.callback,
                        activated,
                    },
                );
                if inner.active.len() == 1 {
                    self.start_renewal();
                }
                debug!(target: "eventlink::registry", %id, "subscription active");
            }

            if let Some(result) = pending.request.result {
                let _ = result.send(Ok(id));
            }
        }

        if let Some(frame) = unsubscribe {
            if let Err(err) = self.controller.send(frame) {
                debug!(target: "eventlink::registry", error = %err, "unsubscribe not sent");
            }
        }
        let _ = self.signals.send(Signal::ProcessQueue);
    }

    fn on_unauthorized(&self, rejected: SubscriptionDefinition) {
        {
            let mut inner = self.inner.lock();
            let Some(pending) = self.take_pending_for(&mut inner, &rejected, "unauthorized") else {
                return;
            };
            let event_type = pending.request.definition.event_type;
            warn!(target: "eventlink::registry", id = %pending.id, %event_type, "subscription not authorized");
            if let Some(result) = pending.request.result {
                let _ = result.send(Err(LinkError::Unauthorized { event_type }));
            }
        }
        let _ = self.signals.send(Signal::ProcessQueue);
    }

    /// The negotiation identified by `token` got no answer in time.
    ///
    /// A caller's request fails with `Timeout`. A replay has nobody to report
    /// to, so it goes back to the head of the queue and is sent again.
    fn expire_pending(&self, token: u64) {
        let mut cancel = None;
        {
            let mut inner = self.inner.lock();
            if inner.pending.as_ref().map(|pending| pending.token) != Some(token) {
                return;
            }
            let Some(pending) = inner.pending.take() else {
                return;
            };

            if pending.request.is_replay() && !pending.cancelled {
                warn!(target: "eventlink::registry", id = %pending.id, "replayed subscription timed out, retrying");
                inner.queue.push_front(pending.request);
            } else {
                warn!(target: "eventlink::registry", id = %pending.id, "subscribe timed out");
                // The server may still process it late.
                cancel = Some(CancelSubscription {
                    event_type: pending.request.definition.event_type.clone(),
                    subscription_id: pending.id.clone(),
                });
                if let Some(result) = pending.request.result {
                    let _ = result.send(Err(LinkError::Timeout(format!(
                        "no answer to subscription {}",
                        pending.id
                    ))));
                }
            }
        }

        if let Some(cancel) = cancel {
            if let Err(err) = self.controller.send(ClientFrame::Unsubscribe(cancel)) {
                debug!(target: "eventlink::registry", error = %err, "unsubscribe not sent");
            }
        }
        let _ = self.signals.send(Signal::ProcessQueue);
    }

    fn deliver(&self, triggered: TriggeredEvents) {
        let callback = self
            .inner
            .lock()
            .active
            .get(&triggered.subscription_id)
            .map(|active| Arc::clone(&active.callback));

        match callback {
            Some(callback) => {
                for event in triggered.events {
                    callback(event);
                }
            }
            None => {
                debug!(
                    target: "eventlink::registry",
                    id = %triggered.subscription_id,
                    "events for inactive subscription dropped"
                );
            }
        }
    }

    fn start_renewal(&self) {
        let registry = self.this.clone();
        self.renewal.start(move || match registry.upgrade() {
            Some(registry) => registry.renew(),
            None => false,
        });
    }

    /// Send one renewal for every active id. Returns false when nothing is active.
    fn renew(&self) -> bool {
        let ids = self.active_ids();
        if ids.is_empty() {
            return false;
        }
        debug!(target: "eventlink::renewal", count = ids.len(), "renewing subscriptions");
        if let Err(err) = self.controller.send(ClientFrame::Renew(ids)) {
            debug!(target: "eventlink::renewal", error = %err, "renewal not sent");
        }
        true
    }

    fn fresh_id(&self) -> SubscriptionId {
        SubscriptionId(format!("sub-{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    // --- Introspection ---

    /// Active ids in activation order.
    pub fn active_ids(&self) -> Vec<SubscriptionId> {
        let inner = self.inner.lock();
        let mut active: Vec<(&SubscriptionId, u64)> = inner
            .active
            .iter()
            .map(|(id, active)| (id, active.activated))
            .collect();
        active.sort_by_key(|(_, activated)| *activated);
        active.into_iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn has_pending(&self) -> bool {
        self.inner.lock().pending.is_some()
    }

    pub fn renewal_running(&self) -> bool {
        self.renewal.is_running()
    }
}
