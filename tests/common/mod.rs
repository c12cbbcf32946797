//! Scripted in-memory transport shared by the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use eventlink::protocol::{CancelSubscription, RequestResponse, TriggeredEvents};
use eventlink::{
    ClientFrame, EventCallback, EventClient, FrameSink, LinkConfig, LinkError, Result,
    ServerFrame, SharedEvent, SubscriptionDefinition, SubscriptionId, Transport,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Records every frame the client sends and lets the test play the server.
#[derive(Default)]
pub struct ScriptedTransport {
    sent: Mutex<Vec<ClientFrame>>,
    sink: Mutex<Option<FrameSink>>,
    refuse_opens: AtomicBool,
    fail_event_sends: AtomicBool,
    close_next_open: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following open fail (or succeed again).
    pub fn refuse_opens(&self, refuse: bool) {
        self.refuse_opens.store(refuse, Ordering::SeqCst);
    }

    /// Make `EVENT:` sends fail while the link stays up.
    pub fn fail_event_sends(&self, fail: bool) {
        self.fail_event_sends.store(fail, Ordering::SeqCst);
    }

    /// The next open reports the link closed before it returns success.
    pub fn close_next_open(&self) {
        self.close_next_open.store(true, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.sink.lock().is_some()
    }

    // --- Server side ---

    fn push(&self, frame: ServerFrame) {
        let sink = self.sink.lock().clone();
        let sink = sink.expect("no open connection to push on");
        assert!(sink.deliver(frame), "client is gone");
    }

    /// Push raw text as if it came off the wire.
    pub fn push_text(&self, text: &str) {
        let sink = self.sink.lock().clone();
        sink.expect("no open connection to push on").deliver_text(text);
    }

    /// Acknowledge the most recent SUBSCRIBE.
    pub fn ack_last(&self) -> SubscriptionDefinition {
        let definition = self.last_subscribe();
        self.push(ServerFrame::Subscribed(definition.clone()));
        definition
    }

    pub fn ack(&self, definition: SubscriptionDefinition) {
        self.push(ServerFrame::Subscribed(definition));
    }

    /// Reject the most recent SUBSCRIBE.
    pub fn reject_last(&self) {
        let definition = self.last_subscribe();
        self.push(ServerFrame::Unauthorized(definition));
    }

    pub fn push_events(&self, id: &SubscriptionId, events: Vec<SharedEvent>) {
        self.push(ServerFrame::Event(TriggeredEvents {
            subscription_id: id.clone(),
            events,
        }));
    }

    /// Answer the most recent request/response frame.
    pub fn reply_last(&self, event: SharedEvent) {
        let message_id = self
            .requests()
            .last()
            .map(|request| request.message_id.clone())
            .expect("no request sent");
        self.push(ServerFrame::Response(RequestResponse { message_id, event }));
    }

    /// Remote end goes away.
    pub fn drop_link(&self) {
        if let Some(sink) = self.sink.lock().take() {
            sink.closed();
        }
    }

    // --- What the client sent ---

    pub fn sent(&self) -> Vec<ClientFrame> {
        self.sent.lock().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    pub fn subscribes(&self) -> Vec<SubscriptionDefinition> {
        self.sent()
            .into_iter()
            .filter_map(|frame| match frame {
                ClientFrame::Subscribe(definition) => Some(definition),
                _ => None,
            })
            .collect()
    }

    pub fn last_subscribe(&self) -> SubscriptionDefinition {
        self.subscribes().pop().expect("no SUBSCRIBE sent")
    }

    pub fn unsubscribes(&self) -> Vec<CancelSubscription> {
        self.sent()
            .into_iter()
            .filter_map(|frame| match frame {
                ClientFrame::Unsubscribe(cancel) => Some(cancel),
                _ => None,
            })
            .collect()
    }

    pub fn renewals(&self) -> Vec<Vec<SubscriptionId>> {
        self.sent()
            .into_iter()
            .filter_map(|frame| match frame {
                ClientFrame::Renew(ids) => Some(ids),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<SharedEvent> {
        self.sent()
            .into_iter()
            .filter_map(|frame| match frame {
                ClientFrame::Event(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    pub fn requests(&self) -> Vec<RequestResponse> {
        self.sent()
            .into_iter()
            .filter_map(|frame| match frame {
                ClientFrame::Request(request) => Some(request),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn endpoint(&self) -> String {
        "mem://scripted".to_string()
    }

    async fn open(&self, sink: FrameSink) -> bool {
        self.opens.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.refuse_opens.load(Ordering::SeqCst) {
            return false;
        }
        if self.close_next_open.swap(false, Ordering::SeqCst) {
            sink.closed();
            tokio::task::yield_now().await;
            return true;
        }
        *self.sink.lock() = Some(sink);
        true
    }

    fn send(&self, frame: ClientFrame) -> Result<()> {
        if self.sink.lock().is_none() {
            return Err(LinkError::NotConnected);
        }
        if matches!(frame, ClientFrame::Event(_)) && self.fail_event_sends.load(Ordering::SeqCst) {
            return Err(LinkError::Transport("event send refused".to_string()));
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(sink) = self.sink.lock().take() {
            sink.closed();
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn client(transport: &Arc<ScriptedTransport>) -> EventClient {
    client_with(transport, LinkConfig::default())
}

pub fn client_with(transport: &Arc<ScriptedTransport>, config: LinkConfig) -> EventClient {
    init_tracing();
    EventClient::new(config, Arc::clone(transport) as Arc<dyn Transport>).unwrap()
}

/// Connect and let the on-connected hook run.
pub async fn connected(transport: &Arc<ScriptedTransport>) -> EventClient {
    let client = client(transport);
    assert!(client.connect().await);
    settle().await;
    client
}

/// Let every runnable task make progress without advancing the clock.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

pub fn noop() -> EventCallback {
    Arc::new(|_| {})
}

/// Callback that collects every delivered event.
pub fn collector() -> (EventCallback, Arc<Mutex<Vec<SharedEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (Arc::new(move |event| sink.lock().push(event)), seen)
}

pub fn definition(event_type: &str) -> SubscriptionDefinition {
    SubscriptionDefinition::new(event_type)
}
