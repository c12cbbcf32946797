//! Physical connection to the event service.
//!
//! A [`Transport`] only moves frames. It opens and closes one connection at a
//! time, encodes outbound [`ClientFrame`]s, and decodes inbound text into
//! [`ServerFrame`]s which it hands to the [`FrameSink`] it was opened with.
//! Subscription semantics live above it.

mod websocket;

pub use websocket::WebSocketTransport;

use crate::dispatch::{Signal, SignalSender};
use crate::error::Result;
use crate::protocol::{ClientFrame, ServerFrame};
use async_trait::async_trait;
use tracing::warn;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Where this transport connects to, for logging.
    fn endpoint(&self) -> String;

    /// Open the connection. Resolves `false` on an ordinary connection
    /// failure. After resolving `true` the transport must call
    /// [`FrameSink::closed`] exactly once when the connection ends,
    /// including after a local [`Transport::close`].
    async fn open(&self, sink: FrameSink) -> bool;

    /// Queue one frame for sending.
    fn send(&self, frame: ClientFrame) -> Result<()>;

    /// Close the current connection, if any.
    fn close(&self);
}

/// Inbound side of one opened connection.
///
/// Each sink is stamped with the epoch of the connect attempt that created
/// it, so frames and close notices from a superseded connection are ignored.
#[derive(Clone, Debug)]
pub struct FrameSink {
    epoch: u64,
    signals: SignalSender,
}

impl FrameSink {
    pub(crate) fn new(epoch: u64, signals: SignalSender) -> Self {
        Self { epoch, signals }
    }

    /// Deliver one decoded frame. Returns false once the client is gone.
    pub fn deliver(&self, frame: ServerFrame) -> bool {
        self.signals
            .send(Signal::Frame {
                epoch: self.epoch,
                frame,
            })
            .is_ok()
    }

    /// Decode and deliver one text frame. Malformed frames are logged and
    /// dropped. Returns false once the client is gone.
    pub fn deliver_text(&self, text: &str) -> bool {
        match ServerFrame::decode(text) {
            Ok(frame) => self.deliver(frame),
            Err(err) => {
                warn!(target: "eventlink::transport", error = %err, "dropping malformed frame");
                !self.signals.is_closed()
            }
        }
    }

    /// Report that the connection has ended.
    pub fn closed(&self) {
        let _ = self.signals.send(Signal::Closed { epoch: self.epoch });
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_malformed_text_is_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = FrameSink::new(4, tx);

        assert!(sink.deliver_text("garbage"));
        assert!(sink.deliver_text(r#"EVENT:{"subscriptionId":"s","events":[]}"#));

        match rx.try_recv().unwrap() {
            Signal::Frame { epoch, frame } => {
                assert_eq!(epoch, 4);
                assert!(matches!(frame, ServerFrame::Event(_)));
            }
            other => panic!("Expected Frame signal, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_carries_epoch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        FrameSink::new(9, tx).closed();
        assert!(matches!(rx.try_recv().unwrap(), Signal::Closed { epoch: 9 }));
    }

    #[test]
    fn test_deliver_after_client_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = FrameSink::new(1, tx);
        drop(rx);
        assert!(!sink.deliver_text("garbage"));
        assert!(!sink.deliver_text(r#"SUBSCRIBED:{"eventType":"asset"}"#));
    }
}
