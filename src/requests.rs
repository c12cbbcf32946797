//! Request/response events correlated by message id.

use crate::connection::ConnectionController;
use crate::error::{LinkError, Result};
use crate::protocol::{ClientFrame, RequestResponse};
use crate::types::SharedEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

pub struct RequestTracker {
    controller: Arc<ConnectionController>,
    timeout: Duration,
    waiting: Mutex<HashMap<String, oneshot::Sender<SharedEvent>>>,
}

impl RequestTracker {
    pub(crate) fn new(controller: Arc<ConnectionController>, timeout: Duration) -> Self {
        Self {
            controller,
            timeout,
            waiting: Mutex::new(HashMap::new()),
        }
    }

    /// Send `event` and wait for the server's reply to it.
    pub async fn send_event_with_reply(&self, event: SharedEvent) -> Result<SharedEvent> {
        let message_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().insert(message_id.clone(), tx);

        let frame = ClientFrame::Request(RequestResponse {
            message_id: message_id.clone(),
            event,
        });
        if let Err(err) = self.controller.send(frame) {
            self.waiting.lock().remove(&message_id);
            return Err(err);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Sender dropped by `fail_all`
            Ok(Err(_)) => Err(LinkError::NotConnected),
            Err(_) => {
                self.waiting.lock().remove(&message_id);
                Err(LinkError::Timeout(format!(
                    "no reply to request {message_id} within {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    pub(crate) fn resolve(&self, response: RequestResponse) {
        match self.waiting.lock().remove(&response.message_id) {
            Some(tx) => {
                let _ = tx.send(response.event);
            }
            None => {
                debug!(
                    target: "eventlink::requests",
                    message_id = %response.message_id,
                    "reply for unknown or expired request"
                );
            }
        }
    }

    /// Fail every outstanding request; the connection they were sent on is gone.
    pub(crate) fn fail_all(&self) {
        let dropped = std::mem::take(&mut *self.waiting.lock());
        if !dropped.is_empty() {
            debug!(
                target: "eventlink::requests",
                count = dropped.len(),
                "failing outstanding requests after disconnect"
            );
        }
    }

    pub fn outstanding(&self) -> usize {
        self.waiting.lock().len()
    }
}
