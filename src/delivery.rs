//! Delivery channel: pushes outbound events to one live connection.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;

use crate::core::errors::ApiError;
use crate::protocol::WsOutgoing;
use crate::session::ConnectionRegistry;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The remote endpoint no longer exists. Short-circuits remaining
    /// delivery for the current work item without escalating.
    #[error("connection gone")]
    Gone,
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

impl From<DeliveryError> for ApiError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::Gone => ApiError::Gone,
            DeliveryError::Transient(msg) => ApiError::Transient(msg),
        }
    }
}

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, connection_id: &str, event: &WsOutgoing) -> Result<(), DeliveryError>;
}

/// Delivery backed by the connection registry. Each connection owns a
/// bounded outbound channel drained by its writer task; channel order is
/// the delivery order on the wire.
#[derive(Clone)]
pub struct RegistryDelivery {
    registry: ConnectionRegistry,
}

impl RegistryDelivery {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl DeliveryChannel for RegistryDelivery {
    async fn send(&self, connection_id: &str, event: &WsOutgoing) -> Result<(), DeliveryError> {
        let sender = self
            .registry
            .sender_for(connection_id)
            .ok_or(DeliveryError::Gone)?;

        match sender.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Gone),
            Err(TrySendError::Full(_)) => Err(DeliveryError::Transient(format!(
                "outbound queue full for connection {}",
                connection_id
            ))),
        }
    }
}
