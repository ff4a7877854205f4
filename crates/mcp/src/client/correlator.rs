// Pending-call table matching responses to the requests that caused them

use crate::error::{McpError, McpResult};
use crate::protocol::{JsonRpcResponse, RequestId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{oneshot, Mutex};

type Outcome = McpResult<JsonRpcResponse>;

/// A registered call waiting for its response
pub struct PendingCall {
    pub id: RequestId,
    pub(crate) receiver: oneshot::Receiver<Outcome>,
}

struct Table {
    pending: HashMap<RequestId, oneshot::Sender<Outcome>>,
    /// Set once the connection is gone; new calls fail with it
    closed: Option<String>,
}

/// Tracks in-flight requests by id.
///
/// Each entry is removed exactly once: on its response, on abandonment
/// (timeout) or when the connection fails.
pub struct Correlator {
    next_id: AtomicI64,
    table: Mutex<Table>,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            table: Mutex::new(Table {
                pending: HashMap::new(),
                closed: None,
            }),
        }
    }

    /// Allocate a fresh id and a slot for its response
    pub async fn register(&self) -> McpResult<PendingCall> {
        let mut table = self.table.lock().await;
        if let Some(reason) = &table.closed {
            return Err(McpError::PeerUnavailable(reason.clone()));
        }

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = oneshot::channel();
        table.pending.insert(id.clone(), sender);

        Ok(PendingCall { id, receiver })
    }

    /// Deliver a response to its caller; false if nobody is waiting for it
    pub async fn resolve(&self, response: JsonRpcResponse) -> bool {
        let sender = self.table.lock().await.pending.remove(&response.id);
        let Some(sender) = sender else {
            tracing::debug!(id = %response.id, "Discarding response with no pending call");
            return false;
        };

        let id = response.id.clone();
        if sender.send(Ok(response)).is_err() {
            // Caller gave up between our lookup and the send
            tracing::debug!(%id, "Caller no longer waiting for response");
            return false;
        }
        true
    }

    /// Forget a call (timeout); a late response will be discarded
    pub async fn abandon(&self, id: &RequestId) -> bool {
        self.table.lock().await.pending.remove(id).is_some()
    }

    /// Fail every pending call and refuse new ones
    pub async fn fail_all(&self, reason: &str) -> usize {
        let mut table = self.table.lock().await;
        table.closed = Some(reason.to_string());

        let pending: Vec<_> = table.pending.drain().collect();
        let count = pending.len();
        for (_, sender) in pending {
            let _ = sender.send(Err(McpError::PeerUnavailable(reason.to_string())));
        }
        count
    }

    pub async fn pending_count(&self) -> usize {
        self.table.lock().await.pending.len()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}
