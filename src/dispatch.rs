//! The dispatch loop: the single consumer of transport and lifecycle signals.
//!
//! Every hook (frame routing, on-connected, on-disconnected, queue advance)
//! runs here on its own turn, so nothing a callback does can re-enter a state
//! transition that is still in progress.

use crate::connection::ConnectionController;
use crate::protocol::ServerFrame;
use crate::registry::SubscriptionRegistry;
use crate::requests::RequestTracker;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Signals consumed by the dispatch loop.
#[derive(Debug)]
pub(crate) enum Signal {
    /// Decoded inbound frame from the connection opened as `epoch`.
    Frame { epoch: u64, frame: ServerFrame },
    /// The connection opened as `epoch` has ended.
    Closed { epoch: u64 },
    /// The connection opened as `epoch` is established.
    Connected { epoch: u64 },
    /// Start the next queued subscribe negotiation, if any.
    ProcessQueue,
}

pub(crate) type SignalSender = mpsc::UnboundedSender<Signal>;
pub(crate) type SignalReceiver = mpsc::UnboundedReceiver<Signal>;

pub(crate) async fn run(
    mut signals: SignalReceiver,
    controller: Arc<ConnectionController>,
    registry: Arc<SubscriptionRegistry>,
    requests: Arc<RequestTracker>,
) {
    while let Some(signal) = signals.recv().await {
        match signal {
            Signal::Frame { epoch, frame } => {
                if !controller.is_current(epoch) {
                    debug!(target: "eventlink::dispatch", epoch, "dropping frame from stale connection");
                    continue;
                }
                match frame {
                    ServerFrame::Response(response) => requests.resolve(response),
                    other => registry.handle_frame(other),
                }
            }
            Signal::Closed { epoch } => {
                if controller.handle_closed(epoch) {
                    registry.on_disconnected();
                    requests.fail_all();
                }
            }
            Signal::Connected { epoch } => {
                if controller.is_current(epoch) {
                    registry.on_connected();
                }
            }
            Signal::ProcessQueue => registry.process_next(),
        }
    }
}
