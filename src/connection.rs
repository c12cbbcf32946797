//! Connection lifecycle: the Disconnected / Connecting / Connected state
//! machine wrapped around a [`Transport`].
//!
//! - Concurrent `connect()` calls share one transport open.
//! - An unsolicited close schedules a reconnect with linear backoff, capped
//!   at the configured maximum and reset by every successful connect.
//! - `disconnect()` suppresses reconnects until the next `connect()`.
//! - Status observers are called from a notifier task, never from inside
//!   the call that changed the state.

use crate::backoff::ReconnectBackoff;
use crate::config::BackoffConfig;
use crate::dispatch::{Signal, SignalSender};
use crate::error::{LinkError, Result};
use crate::protocol::ClientFrame;
use crate::transport::{FrameSink, Transport};
use crate::types::ConnectionState;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Callback invoked on every connection state change.
pub type StatusCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Handle for removing a status observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

type ObserverList = Arc<Mutex<Vec<(ObserverId, StatusCallback)>>>;

struct ControllerState {
    state: ConnectionState,
    disconnect_requested: bool,
    /// Incremented by every connect attempt; stamps the attempt's sink.
    epoch: u64,
    /// Present while a connect attempt is in flight.
    connect_waiters: Option<Vec<oneshot::Sender<bool>>>,
    /// The in-flight attempt's transport reported a close before `open` returned.
    closed_early: bool,
    reconnect_timer: Option<JoinHandle<()>>,
    backoff: ReconnectBackoff,
}

pub struct ConnectionController {
    transport: Arc<dyn Transport>,
    signals: SignalSender,
    inner: Mutex<ControllerState>,
    observers: ObserverList,
    next_observer: AtomicU64,
    status_tx: mpsc::UnboundedSender<ConnectionState>,
    status_watch: watch::Sender<ConnectionState>,
    notifier: JoinHandle<()>,
}

impl ConnectionController {
    /// Must be called inside a tokio runtime.
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        backoff: BackoffConfig,
        signals: SignalSender,
    ) -> Arc<Self> {
        let observers: ObserverList = Arc::new(Mutex::new(Vec::new()));
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let notifier = tokio::spawn(notify_observers(status_rx, Arc::clone(&observers)));
        let (status_watch, _) = watch::channel(ConnectionState::Disconnected);

        Arc::new(Self {
            transport,
            signals,
            inner: Mutex::new(ControllerState {
                state: ConnectionState::Disconnected,
                disconnect_requested: false,
                epoch: 0,
                connect_waiters: None,
                closed_early: false,
                reconnect_timer: None,
                backoff: ReconnectBackoff::new(backoff),
            }),
            observers,
            next_observer: AtomicU64::new(1),
            status_tx,
            status_watch,
            notifier,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Connect, or join the attempt already in flight.
    ///
    /// Resolves `true` immediately when already connected. A failed attempt
    /// resolves `false` and does not schedule a retry.
    pub async fn connect(self: &Arc<Self>) -> bool {
        let waiter = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Connected {
                return true;
            }

            inner.disconnect_requested = false;

            let (tx, rx) = oneshot::channel();
            if let Some(waiters) = inner.connect_waiters.as_mut() {
                waiters.push(tx);
            } else {
                inner.connect_waiters = Some(vec![tx]);
                inner.closed_early = false;
                inner.epoch += 1;
                let epoch = inner.epoch;
                self.set_state(&mut inner, ConnectionState::Connecting);

                let this = Arc::clone(self);
                tokio::spawn(async move { this.run_attempt(epoch).await });
            }
            rx
        };

        waiter.await.unwrap_or(false)
    }

    async fn run_attempt(self: Arc<Self>, epoch: u64) {
        let sink = FrameSink::new(epoch, self.signals.clone());
        let opened = self.transport.open(sink).await;

        let mut close_transport = false;
        let (connected, waiters) = {
            let mut inner = self.inner.lock();
            let waiters = inner.connect_waiters.take().unwrap_or_default();

            let connected = if !opened {
                debug!(
                    target: "eventlink::connection",
                    endpoint = %self.transport.endpoint(),
                    "failed to connect to event service"
                );
                self.set_state(&mut inner, ConnectionState::Disconnected);
                false
            } else if inner.disconnect_requested {
                // disconnect() arrived while the transport was still opening
                inner.epoch += 1;
                close_transport = true;
                self.set_state(&mut inner, ConnectionState::Disconnected);
                false
            } else if inner.closed_early {
                // The link died before open() returned; treat it as a drop.
                debug!(
                    target: "eventlink::connection",
                    endpoint = %self.transport.endpoint(),
                    "event service closed the connection while opening"
                );
                inner.epoch += 1;
                close_transport = true;
                self.set_state(&mut inner, ConnectionState::Disconnected);
                self.schedule_reconnect(&mut inner);
                false
            } else {
                if let Some(timer) = inner.reconnect_timer.take() {
                    timer.abort();
                }
                inner.backoff.reset();
                info!(
                    target: "eventlink::connection",
                    endpoint = %self.transport.endpoint(),
                    "connected to event service"
                );
                self.set_state(&mut inner, ConnectionState::Connected);
                let _ = self.signals.send(Signal::Connected { epoch });
                true
            };
            (connected, waiters)
        };

        if close_transport {
            self.transport.close();
        }
        for waiter in waiters {
            let _ = waiter.send(connected);
        }
    }

    /// Close the link and suppress automatic reconnects. Idempotent.
    pub fn disconnect(&self) {
        let close = {
            let mut inner = self.inner.lock();
            if inner.disconnect_requested {
                return;
            }
            inner.disconnect_requested = true;

            if let Some(timer) = inner.reconnect_timer.take() {
                timer.abort();
            }

            inner.state != ConnectionState::Disconnected
        };

        if close {
            debug!(target: "eventlink::connection", "disconnect requested");
            self.transport.close();
        }
    }

    /// Send a frame on the current connection.
    pub fn send(&self, frame: ClientFrame) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(LinkError::NotConnected);
        }
        self.transport.send(frame)
    }

    /// Whether `epoch` identifies the most recent connect attempt.
    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.inner.lock().epoch == epoch
    }

    /// Transport reported the end of the connection opened as `epoch`.
    /// Returns true if this was a transition out of Connected.
    pub(crate) fn handle_closed(self: &Arc<Self>, epoch: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.epoch == epoch && inner.state == ConnectionState::Connecting {
            debug!(target: "eventlink::connection", epoch, "connection closed before open completed");
            inner.closed_early = true;
            return false;
        }
        if inner.epoch != epoch || inner.state != ConnectionState::Connected {
            debug!(target: "eventlink::connection", epoch, "ignoring close of stale connection");
            return false;
        }

        info!(
            target: "eventlink::connection",
            requested = inner.disconnect_requested,
            "disconnected from event service"
        );
        self.set_state(&mut inner, ConnectionState::Disconnected);
        self.schedule_reconnect(&mut inner);
        true
    }

    fn schedule_reconnect(self: &Arc<Self>, inner: &mut ControllerState) {
        if inner.reconnect_timer.is_some() || inner.disconnect_requested {
            return;
        }

        let delay = inner.backoff.next_delay();
        debug!(
            target: "eventlink::connection",
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        let this = Arc::clone(self);
        inner.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut inner = this.inner.lock();
                inner.reconnect_timer = None;
                if inner.disconnect_requested {
                    return;
                }
            }

            if !this.connect().await {
                let mut inner = this.inner.lock();
                this.schedule_reconnect(&mut inner);
            }
        }));
    }

    /// Delay the next scheduled reconnect would wait.
    pub fn reconnect_delay(&self) -> Duration {
        self.inner.lock().backoff.current_delay()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.inner.lock().reconnect_timer.is_some()
    }

    fn set_state(&self, inner: &mut ControllerState, state: ConnectionState) {
        if inner.state == state {
            return;
        }
        debug!(target: "eventlink::connection", from = %inner.state, to = %state, "status changed");
        inner.state = state;
        self.status_watch.send_replace(state);
        let _ = self.status_tx.send(state);
    }

    // --- Status observers ---

    pub fn subscribe_status_change(&self, callback: StatusCallback) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::SeqCst));
        self.observers.lock().push((id, callback));
        id
    }

    pub fn unsubscribe_status_change(&self, id: ObserverId) {
        self.observers.lock().retain(|(observer, _)| *observer != id);
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.status_watch.subscribe()
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.get_mut().reconnect_timer.take() {
            timer.abort();
        }
        self.notifier.abort();
    }
}

async fn notify_observers(
    mut changes: mpsc::UnboundedReceiver<ConnectionState>,
    observers: ObserverList,
) {
    while let Some(state) = changes.recv().await {
        let current: Vec<StatusCallback> = observers
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in current {
            callback(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Transport whose opens succeed or fail on command.
    struct Flaky {
        succeed: Mutex<bool>,
        opens: AtomicUsize,
        closes: AtomicUsize,
        sink: Mutex<Option<FrameSink>>,
    }

    impl Flaky {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                succeed: Mutex::new(succeed),
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                sink: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Transport for Flaky {
        fn endpoint(&self) -> String {
            "mem://flaky".to_string()
        }

        async fn open(&self, sink: FrameSink) -> bool {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            let ok = *self.succeed.lock();
            if ok {
                *self.sink.lock() = Some(sink);
            }
            ok
        }

        fn send(&self, _frame: ClientFrame) -> Result<()> {
            Ok(())
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if let Some(sink) = self.sink.lock().take() {
                sink.closed();
            }
        }
    }

    fn make_controller(transport: Arc<Flaky>) -> (Arc<ConnectionController>, mpsc::UnboundedReceiver<Signal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionController::new(transport, BackoffConfig::default(), tx), rx)
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_open() {
        let transport = Flaky::new(true);
        let (controller, _signals) = make_controller(Arc::clone(&transport));

        let (a, b, c) = tokio::join!(controller.connect(), controller.connect(), controller.connect());
        assert!(a && b && c);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
        assert_eq!(controller.state(), ConnectionState::Connected);

        // Already connected: no new open
        assert!(controller.connect().await);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_does_not_retry() {
        let transport = Flaky::new(false);
        let (controller, _signals) = make_controller(Arc::clone(&transport));

        assert!(!controller.connect().await);
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(!controller.reconnect_pending());
    }

    #[tokio::test]
    async fn test_connected_signal_posted() {
        let transport = Flaky::new(true);
        let (controller, mut signals) = make_controller(transport);

        assert!(controller.connect().await);
        assert!(matches!(signals.recv().await, Some(Signal::Connected { epoch: 1 })));
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let transport = Flaky::new(true);
        let (controller, _signals) = make_controller(transport);

        let result = controller.send(ClientFrame::Renew(vec![]));
        assert!(matches!(result, Err(LinkError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let transport = Flaky::new(true);
        let (controller, _signals) = make_controller(Arc::clone(&transport));

        controller.disconnect();
        assert_eq!(transport.closes.load(Ordering::SeqCst), 0);

        controller.connect().await;
        controller.disconnect();
        controller.disconnect();
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_requested_close_does_not_reconnect() {
        let transport = Flaky::new(true);
        let (controller, _signals) = make_controller(Arc::clone(&transport));

        controller.connect().await;
        controller.disconnect();
        assert!(controller.handle_closed(1));
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(!controller.reconnect_pending());
    }

    #[tokio::test]
    async fn test_stale_close_is_ignored() {
        let transport = Flaky::new(true);
        let (controller, _signals) = make_controller(transport);

        controller.connect().await;
        assert!(!controller.handle_closed(0));
        assert_eq!(controller.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_observers_notified_in_order() {
        let transport = Flaky::new(true);
        let (controller, _signals) = make_controller(transport);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = controller.subscribe_status_change(Arc::new(move |state| sink.lock().push(state)));

        let mut status = controller.watch_status();
        controller.connect().await;
        status.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

        // Notifier runs on its own task
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            *seen.lock(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );

        controller.unsubscribe_status_change(id);
        controller.disconnect();
        controller.handle_closed(1);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(seen.lock().len(), 2);
    }
}
