use super::{FrameSink, Transport};
use crate::credentials::{authorised_url, CredentialProvider};
use crate::error::{LinkError, Result};
use crate::protocol::ClientFrame;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

/// How long a local close waits for the peer to finish the close handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// WebSocket implementation of the Transport trait.
pub struct WebSocketTransport {
    endpoint: Url,
    credentials: Arc<dyn CredentialProvider>,
    link: Mutex<Option<Link>>,
}

/// One open socket: the outbound queue and the tasks pumping it.
struct Link {
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    sink: FrameSink,
}

impl WebSocketTransport {
    pub fn new(endpoint: Url, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            endpoint,
            credentials,
            link: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn endpoint(&self) -> String {
        self.endpoint.to_string()
    }

    async fn open(&self, sink: FrameSink) -> bool {
        let url = authorised_url(&self.endpoint, self.credentials.as_ref());

        let ws_stream = match connect_async(url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(err) => {
                warn!(
                    target: "eventlink::transport",
                    endpoint = %self.endpoint,
                    error = %err,
                    "failed to open event socket"
                );
                return false;
            }
        };

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        // Dropping `outbound` (see `close`) ends this loop and sends a close frame.
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(err) = ws_sender.send(msg).await {
                    debug!(target: "eventlink::transport", error = %err, "event socket write failed");
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let reader_sink = sink.clone();
        let reader = tokio::spawn(async move {
            let sink = reader_sink;
            while let Some(msg) = ws_receiver.next().await {
                let delivered = match msg {
                    Ok(Message::Text(text)) => sink.deliver_text(&text),
                    Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                        Ok(text) => sink.deliver_text(text),
                        Err(err) => {
                            warn!(target: "eventlink::transport", error = %err, "dropping non-utf8 frame");
                            true
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(target: "eventlink::transport", ?frame, "event socket closed by peer");
                        break;
                    }
                    Ok(_) => true,
                    Err(err) => {
                        debug!(target: "eventlink::transport", error = %err, "event socket read failed");
                        break;
                    }
                };
                if !delivered {
                    break;
                }
            }
            sink.closed();
        });

        let previous = self.link.lock().replace(Link {
            outbound,
            reader,
            writer,
            sink,
        });
        if let Some(previous) = previous {
            previous.reader.abort();
            previous.writer.abort();
        }

        debug!(target: "eventlink::transport", endpoint = %self.endpoint, "event socket open");
        true
    }

    fn send(&self, frame: ClientFrame) -> Result<()> {
        let text = frame.encode()?;
        let link = self.link.lock();
        let link = link.as_ref().ok_or(LinkError::NotConnected)?;
        link.outbound
            .send(Message::Text(text))
            .map_err(|_| LinkError::Transport("event socket writer has stopped".to_string()))
    }

    fn close(&self) {
        let Some(link) = self.link.lock().take() else {
            return;
        };
        debug!(target: "eventlink::transport", endpoint = %self.endpoint, "closing event socket");

        // Dropping the outbound queue lets the writer send the close frame.
        // The reader reports `closed` once the peer answers, or we do it
        // ourselves after the grace period.
        let Link {
            outbound,
            reader,
            writer,
            sink,
        } = link;
        drop(outbound);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(finish_close(reader, writer, sink));
            }
            Err(_) => {
                reader.abort();
                writer.abort();
                sink.closed();
            }
        }
    }
}

async fn finish_close(mut reader: JoinHandle<()>, writer: JoinHandle<()>, sink: FrameSink) {
    if tokio::time::timeout(CLOSE_GRACE, &mut reader).await.is_ok() {
        return;
    }

    debug!(target: "eventlink::transport", "peer did not answer close, dropping event socket");
    reader.abort();
    writer.abort();
    // A reader that finished on its own already reported.
    if let Err(err) = reader.await {
        if err.is_cancelled() {
            sink.closed();
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.reader.abort();
            link.writer.abort();
        }
    }
}
