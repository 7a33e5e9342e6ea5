use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;

use ragchat_backend::auth::HttpAuthenticator;
use ragchat_backend::core::config::Config;
use ragchat_backend::delivery::RegistryDelivery;
use ragchat_backend::dispatcher::WorkDispatcher;
use ragchat_backend::generation::client::{HttpGenerationClient, InferenceParams};
use ragchat_backend::generation::GenerationOrchestrator;
use ragchat_backend::logging;
use ragchat_backend::queue::work_queue;
use ragchat_backend::retrieval::HttpRetriever;
use ragchat_backend::server::router::router;
use ragchat_backend::session::ConnectionRegistry;
use ragchat_backend::state::AppState;
use ragchat_backend::threads::ThreadStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    logging::init(&config.storage.log_dir);

    let store = ThreadStore::new(config.storage.db_path.clone()).await?;
    let registry = ConnectionRegistry::new();
    let (queue, queue_rx) = work_queue(config.pipeline.queue_depth);

    let retriever = Arc::new(HttpRetriever::new(
        config.retrieval.endpoint.clone(),
        config.retrieval.top_k,
    ));
    let generation = Arc::new(HttpGenerationClient::new(
        config.generation.endpoint.clone(),
        config.generation.model.clone(),
    ));
    let orchestrator =
        GenerationOrchestrator::new(generation, InferenceParams::from(&config.generation));
    let delivery = Arc::new(RegistryDelivery::new(registry.clone()));

    let dispatcher = Arc::new(WorkDispatcher::new(
        store.clone(),
        retriever,
        orchestrator,
        delivery,
        config.pipeline.memory_turns,
        Duration::from_secs(config.pipeline.timeout_secs),
    ));
    tokio::spawn(dispatcher.run(queue_rx));

    let auth = Arc::new(HttpAuthenticator::new(config.auth.endpoint.clone()));
    let bind_addr = config.server.bind_addr.clone();
    let state = Arc::new(AppState {
        config,
        store,
        auth,
        registry,
        queue,
    });

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .await
        .context("server error")?;

    Ok(())
}
