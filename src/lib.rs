pub mod auth;
pub mod core;
pub mod delivery;
pub mod dispatcher;
pub mod generation;
pub mod logging;
pub mod prompts;
pub mod protocol;
pub mod queue;
pub mod references;
pub mod retrieval;
pub mod server;
pub mod session;
pub mod state;
pub mod threads;

#[cfg(test)]
mod testutil;
