use std::sync::Arc;

use crate::auth::Authenticator;
use crate::core::config::Config;
use crate::queue::WorkQueue;
use crate::session::ConnectionRegistry;
use crate::threads::ThreadStore;

/// Shared state for the HTTP/WebSocket surface. The dispatcher gets its
/// collaborators injected separately at construction and does not read
/// from here.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: ThreadStore,
    pub auth: Arc<dyn Authenticator>,
    pub registry: ConnectionRegistry,
    pub queue: WorkQueue,
}
