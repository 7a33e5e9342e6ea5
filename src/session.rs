//! Session Router: live connection-to-user mapping and queue handoff.
//!
//! The registry is the only mutable shared state outside the stores. It is
//! written by connect/disconnect and read by the inbound-input path and the
//! delivery channel; nothing else mutates it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::core::errors::ApiError;
use crate::protocol::{WsIncoming, WsOutgoing};
use crate::queue::{WorkItem, WorkQueue};

struct ConnectionEntry {
    user_id: String,
    outbound: mpsc::Sender<WsOutgoing>,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<String, ConnectionEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(
        &self,
        connection_id: &str,
        user_id: &str,
        outbound: mpsc::Sender<WsOutgoing>,
    ) {
        let mut map = self.inner.lock().expect("registry lock poisoned");
        map.insert(
            connection_id.to_string(),
            ConnectionEntry {
                user_id: user_id.to_string(),
                outbound,
            },
        );
    }

    /// Removing an absent mapping is not an error.
    pub fn disconnect(&self, connection_id: &str) {
        let mut map = self.inner.lock().expect("registry lock poisoned");
        map.remove(connection_id);
    }

    pub fn user_for(&self, connection_id: &str) -> Option<String> {
        let map = self.inner.lock().expect("registry lock poisoned");
        map.get(connection_id).map(|entry| entry.user_id.clone())
    }

    pub(crate) fn sender_for(&self, connection_id: &str) -> Option<mpsc::Sender<WsOutgoing>> {
        let map = self.inner.lock().expect("registry lock poisoned");
        map.get(connection_id).map(|entry| entry.outbound.clone())
    }
}

#[derive(Clone)]
pub struct SessionRouter {
    registry: ConnectionRegistry,
    queue: WorkQueue,
}

impl SessionRouter {
    pub fn new(registry: ConnectionRegistry, queue: WorkQueue) -> Self {
        Self { registry, queue }
    }

    /// Resolves the connection's user, builds a work item and enqueues it.
    /// Input arriving for an unknown connection is a protocol violation.
    pub async fn route_input(
        &self,
        connection_id: &str,
        message: WsIncoming,
    ) -> Result<(), ApiError> {
        let user_id = self
            .registry
            .user_for(connection_id)
            .ok_or_else(|| ApiError::UnknownConnection(connection_id.to_string()))?;

        let WsIncoming::Question { thread_id, input } = message;
        if input.trim().is_empty() {
            return Ok(());
        }

        self.queue
            .enqueue(WorkItem {
                connection_id: connection_id.to_string(),
                thread_id,
                question: input,
                user_id,
            })
            .await
    }
}
