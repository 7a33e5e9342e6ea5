//! Work Dispatcher: pulls one work item at a time and drives the pipeline
//! end to end, from thread resolution through retrieval, streamed
//! generation, reference delivery and turn persistence.
//!
//! All collaborators are injected at construction; the dispatcher holds no
//! process-wide mutable state and takes no locks. Correctness under
//! concurrent dispatchers rests on the stores' per-key atomicity.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::core::errors::ApiError;
use crate::delivery::DeliveryChannel;
use crate::generation::GenerationOrchestrator;
use crate::prompts::GENERATION_PROMPT;
use crate::protocol::{ErrorCode, WsOutgoing};
use crate::queue::WorkItem;
use crate::references::aggregate_references;
use crate::retrieval::Retriever;
use crate::threads::{Thread, ThreadStore};

pub struct WorkDispatcher {
    store: ThreadStore,
    retriever: Arc<dyn Retriever>,
    orchestrator: GenerationOrchestrator,
    delivery: Arc<dyn DeliveryChannel>,
    memory_turns: i64,
    budget: Duration,
}

impl WorkDispatcher {
    pub fn new(
        store: ThreadStore,
        retriever: Arc<dyn Retriever>,
        orchestrator: GenerationOrchestrator,
        delivery: Arc<dyn DeliveryChannel>,
        memory_turns: i64,
        budget: Duration,
    ) -> Self {
        Self {
            store,
            retriever,
            orchestrator,
            delivery,
            memory_turns,
            budget,
        }
    }

    /// Consumes the work queue. One item per pull: a slow or failed
    /// pipeline only ever delays its own queue, never a batch.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<WorkItem>) {
        while let Some(item) = rx.recv().await {
            self.handle(item).await;
        }
        tracing::info!("work queue closed, dispatcher stopping");
    }

    /// Runs one item under the wall-clock budget and applies the error
    /// policy: `Gone` is terminal but expected; anything else after the ack
    /// gets one best-effort error notification.
    pub async fn handle(&self, item: WorkItem) {
        match tokio::time::timeout(self.budget, self.process(&item)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.is_gone() => {
                tracing::info!(connection = %item.connection_id, "client gone");
            }
            Ok(Err(err)) => {
                tracing::error!(connection = %item.connection_id, %err, "pipeline failed");
                self.notify_failure(&item.connection_id).await;
            }
            Err(_) => {
                tracing::error!(
                    connection = %item.connection_id,
                    budget_secs = self.budget.as_secs(),
                    "pipeline exceeded its time budget"
                );
                self.notify_failure(&item.connection_id).await;
            }
        }
    }

    async fn process(&self, item: &WorkItem) -> Result<(), ApiError> {
        let Some(thread) = self.resolve_thread(item).await? else {
            self.delivery
                .send(
                    &item.connection_id,
                    &WsOutgoing::Error {
                        code: ErrorCode::ThreadNotFound,
                    },
                )
                .await?;
            return Ok(());
        };

        self.delivery
            .send(
                &item.connection_id,
                &WsOutgoing::Ack {
                    thread_id: thread.metadata.thread_id.clone(),
                },
            )
            .await?;

        let retrieval_results = self.retriever.search(&item.question).await?;
        tracing::info!(hits = retrieval_results.len(), "retrieved reference passages");

        let answer = self
            .orchestrator
            .generate(
                &item.question,
                &retrieval_results,
                &thread,
                &item.connection_id,
                self.delivery.as_ref(),
            )
            .await?;

        // References go out after the full answer to keep time-to-first-token low.
        self.delivery
            .send(
                &item.connection_id,
                &WsOutgoing::References {
                    references: aggregate_references(&retrieval_results),
                },
            )
            .await?;
        self.delivery
            .send(&item.connection_id, &WsOutgoing::Eos)
            .await?;

        // Persistence only happens after a fully successful generation.
        self.store
            .append_turn(
                &item.user_id,
                &thread.metadata,
                GENERATION_PROMPT,
                &item.question,
                &answer,
                &retrieval_results,
            )
            .await?;

        Ok(())
    }

    /// An absent thread id means a new thread; a present one must exist and
    /// belong to the requesting user. The returned window holds only turns
    /// older than the in-flight question.
    async fn resolve_thread(&self, item: &WorkItem) -> Result<Option<Thread>, ApiError> {
        match &item.thread_id {
            None => {
                let metadata = self
                    .store
                    .create_thread(&item.user_id, &item.question)
                    .await?;
                Ok(Some(Thread {
                    metadata,
                    turns: vec![],
                }))
            }
            Some(thread_id) => {
                self.store
                    .get_thread(&item.user_id, thread_id, None, self.memory_turns)
                    .await
            }
        }
    }

    async fn notify_failure(&self, connection_id: &str) {
        let event = WsOutgoing::Error {
            code: ErrorCode::InternalServerError,
        };
        if let Err(err) = self.delivery.send(connection_id, &event).await {
            tracing::warn!(connection = %connection_id, %err, "could not deliver error event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::client::InferenceParams;
    use crate::testutil::{sample_hit, RecordingDelivery, ScriptedGeneration, StaticRetriever};
    use tempfile::TempDir;

    fn params() -> InferenceParams {
        InferenceParams {
            max_tokens: 100,
            temperature: 0.2,
            top_p: 0.99,
            stop_sequences: vec![],
        }
    }

    async fn store() -> (TempDir, ThreadStore) {
        let dir = TempDir::new().unwrap();
        let store = ThreadStore::new(dir.path().join("test.db")).await.unwrap();
        (dir, store)
    }

    fn dispatcher(
        store: ThreadStore,
        retriever: StaticRetriever,
        generation: ScriptedGeneration,
        delivery: Arc<RecordingDelivery>,
    ) -> WorkDispatcher {
        WorkDispatcher::new(
            store,
            Arc::new(retriever),
            GenerationOrchestrator::new(Arc::new(generation), params()),
            delivery,
            10,
            Duration::from_secs(30),
        )
    }

    fn item(thread_id: Option<&str>, question: &str) -> WorkItem {
        WorkItem {
            connection_id: "conn-1".to_string(),
            thread_id: thread_id.map(str::to_string),
            question: question.to_string(),
            user_id: "user-1".to_string(),
        }
    }

    #[tokio::test]
    async fn new_conversation_creates_thread_and_acks_first() {
        let (_dir, store) = store().await;
        let delivery = Arc::new(RecordingDelivery::new());
        let dispatcher = dispatcher(
            store.clone(),
            StaticRetriever::with(vec![sample_hit("passage", "kb/a.pdf")]),
            ScriptedGeneration::ok(&["The ", "answer."]),
            delivery.clone(),
        );

        dispatcher.handle(item(None, "What is X?")).await;

        let threads = store.list_threads("user-1").await.unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].title, "What is X?");

        let events = delivery.events();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[0],
            WsOutgoing::Ack {
                thread_id: threads[0].thread_id.clone()
            }
        );
        assert_eq!(
            events[1],
            WsOutgoing::Chunk {
                text: "The ".to_string()
            }
        );
        assert_eq!(
            events[2],
            WsOutgoing::Chunk {
                text: "answer.".to_string()
            }
        );
        assert!(matches!(events[3], WsOutgoing::References { .. }));
        assert_eq!(events[4], WsOutgoing::Eos);

        // The turn was persisted with the full streamed answer.
        let thread = store
            .get_thread("user-1", &threads[0].thread_id, None, 10)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(thread.turns.len(), 1);
        assert_eq!(thread.turns[0].llm_answer, "The answer.");
        assert_eq!(thread.turns[0].references[0].filename, "a.pdf");
    }

    #[tokio::test]
    async fn empty_retrieval_still_completes_with_empty_references() {
        let (_dir, store) = store().await;
        let delivery = Arc::new(RecordingDelivery::new());
        let dispatcher = dispatcher(
            store.clone(),
            StaticRetriever::empty(),
            ScriptedGeneration::ok(&[crate::prompts::REFUSAL_ANSWER]),
            delivery.clone(),
        );

        dispatcher.handle(item(None, "Anything?")).await;

        let events = delivery.events();
        let references = events
            .iter()
            .find_map(|e| match e {
                WsOutgoing::References { references } => Some(references.clone()),
                _ => None,
            })
            .expect("references event sent");
        assert!(references.is_empty());
        assert_eq!(*events.last().unwrap(), WsOutgoing::Eos);
    }

    #[tokio::test]
    async fn unknown_thread_sends_typed_error_and_stops() {
        let (_dir, store) = store().await;
        let delivery = Arc::new(RecordingDelivery::new());
        let dispatcher = dispatcher(
            store.clone(),
            StaticRetriever::empty(),
            ScriptedGeneration::ok(&["unused"]),
            delivery.clone(),
        );

        dispatcher.handle(item(Some("missing"), "q")).await;

        assert_eq!(
            delivery.events(),
            vec![WsOutgoing::Error {
                code: ErrorCode::ThreadNotFound
            }]
        );
        assert!(store.list_threads("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_thread_is_fatal_and_runs_no_further_steps() {
        let (_dir, store) = store().await;
        let metadata = store.create_thread("user-1", "q").await.unwrap();
        store
            .forge_duplicate_metadata("user-1", &metadata)
            .await
            .unwrap();

        let delivery = Arc::new(RecordingDelivery::new());
        let dispatcher = dispatcher(
            store.clone(),
            StaticRetriever::empty(),
            ScriptedGeneration::ok(&["unused"]),
            delivery.clone(),
        );

        dispatcher
            .handle(item(Some(&metadata.thread_id), "again"))
            .await;

        // No ack, no chunks: one internal error event only.
        assert_eq!(
            delivery.events(),
            vec![WsOutgoing::Error {
                code: ErrorCode::InternalServerError
            }]
        );
    }

    #[tokio::test]
    async fn gone_mid_stream_stops_without_error_or_persistence() {
        let (_dir, store) = store().await;
        let metadata = store.create_thread("user-1", "first").await.unwrap();

        let delivery = Arc::new(RecordingDelivery::gone_after_chunks(2));
        let dispatcher = dispatcher(
            store.clone(),
            StaticRetriever::empty(),
            ScriptedGeneration::ok(&["1", "2", "3", "4", "5"]),
            delivery.clone(),
        );

        dispatcher
            .handle(item(Some(&metadata.thread_id), "question"))
            .await;

        let events = delivery.events();
        assert_eq!(events.len(), 3); // ack + two chunks
        assert!(!events
            .iter()
            .any(|e| matches!(e, WsOutgoing::Error { .. })));
        assert!(!events.iter().any(|e| matches!(e, WsOutgoing::Eos)));

        let thread = store
            .get_thread("user-1", &metadata.thread_id, None, 10)
            .await
            .unwrap()
            .unwrap();
        assert!(thread.turns.is_empty());
    }

    #[tokio::test]
    async fn failure_after_ack_sends_one_error_and_persists_nothing() {
        let (_dir, store) = store().await;
        let metadata = store.create_thread("user-1", "first").await.unwrap();

        let delivery = Arc::new(RecordingDelivery::new());
        let dispatcher = dispatcher(
            store.clone(),
            StaticRetriever::empty(),
            ScriptedGeneration::failing("model unavailable"),
            delivery.clone(),
        );

        dispatcher
            .handle(item(Some(&metadata.thread_id), "question"))
            .await;

        let events = delivery.events();
        let errors: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, WsOutgoing::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            *errors[0],
            WsOutgoing::Error {
                code: ErrorCode::InternalServerError
            }
        );
        assert!(!events.iter().any(|e| matches!(e, WsOutgoing::Eos)));

        let thread = store
            .get_thread("user-1", &metadata.thread_id, None, 10)
            .await
            .unwrap()
            .unwrap();
        assert!(thread.turns.is_empty());
    }

    #[tokio::test]
    async fn memory_window_excludes_the_in_flight_question() {
        let (_dir, store) = store().await;
        let metadata = store.create_thread("user-1", "first").await.unwrap();
        // Prior turns sit strictly in the past relative to the new question.
        let base = metadata.created_at - 1000;
        for n in 1..=3 {
            store
                .put_turn_at(
                    "user-1",
                    &metadata,
                    "tmpl",
                    &format!("q{}", n),
                    &format!("a{}", n),
                    &[],
                    base + n,
                )
                .await
                .unwrap();
        }

        let delivery = Arc::new(RecordingDelivery::new());
        let dispatcher = dispatcher(
            store.clone(),
            StaticRetriever::empty(),
            ScriptedGeneration::ok(&["a4"]),
            delivery.clone(),
        );

        dispatcher
            .handle(item(Some(&metadata.thread_id), "q4"))
            .await;

        // Prior turns plus the new one; the new turn is not its own context.
        let thread = store
            .get_thread("user-1", &metadata.thread_id, None, 10)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(thread.turns.len(), 4);
        assert_eq!(thread.turns[0].user_question, "q4");
    }
}
