//! Generation Orchestrator: prompt assembly and stream-to-delivery driving.
//!
//! Per request the orchestrator moves through retrieval context assembly,
//! streaming generation and finalization. Chunk events are pushed through
//! the delivery channel one at a time; a send must complete before the next
//! starts, so wire order always equals model emission order. The stream
//! only finalizes on its explicit stop signal; exhaustion without that
//! signal is a failure.

pub mod client;

use std::sync::Arc;

use crate::core::errors::ApiError;
use crate::delivery::DeliveryChannel;
use crate::prompts::GENERATION_PROMPT;
use crate::protocol::WsOutgoing;
use crate::references::filename_of;
use crate::retrieval::RetrievalResult;
use crate::threads::Thread;

use client::{ChatMessage, GenerationClient, GenerationEvent, InferenceParams};

pub struct GenerationOrchestrator {
    client: Arc<dyn GenerationClient>,
    params: InferenceParams,
}

impl GenerationOrchestrator {
    pub fn new(client: Arc<dyn GenerationClient>, params: InferenceParams) -> Self {
        Self { client, params }
    }

    /// Streams an answer for `question`, pushing each delta to the
    /// connection as a chunk event, and returns the full answer text.
    pub async fn generate(
        &self,
        question: &str,
        retrieval_results: &[RetrievalResult],
        thread: &Thread,
        connection_id: &str,
        delivery: &dyn DeliveryChannel,
    ) -> Result<String, ApiError> {
        let (system, messages) = build_prompt(question, retrieval_results, thread);
        let mut stream = self.client.stream(&system, messages, &self.params).await?;

        let mut answer = String::new();
        let mut stopped = false;

        while let Some(event) = stream.recv().await {
            match event? {
                GenerationEvent::Delta(delta) => {
                    if delta.is_empty() {
                        continue;
                    }
                    answer.push_str(&delta);
                    delivery
                        .send(connection_id, &WsOutgoing::Chunk { text: delta })
                        .await?;
                }
                GenerationEvent::Stop => {
                    stopped = true;
                    break;
                }
            }
        }

        if !stopped {
            return Err(ApiError::GenerationIncomplete);
        }

        tracing::debug!(chars = answer.len(), "generation finalized");
        Ok(answer)
    }
}

/// Builds the system instruction (retrieved passages embedded as grounding)
/// and the message list: prior turns oldest to newest, bounded upstream by
/// the memory window, then the current question.
pub fn build_prompt(
    question: &str,
    retrieval_results: &[RetrievalResult],
    thread: &Thread,
) -> (String, Vec<ChatMessage>) {
    let reference_items: Vec<String> = retrieval_results
        .iter()
        .map(|r| {
            format!(
                "\n    <document_name>{}</document_name>\n    <text>{}</text>\n",
                filename_of(&r.source_id),
                r.text
            )
        })
        .collect();
    let references = format!(
        "\n  <reference>\n{}\n  </reference>\n",
        reference_items.join("\n  </reference>\n  <reference>\n")
    );
    let system = GENERATION_PROMPT.replace("__REFERENCES__", &references);

    // Turns arrive newest first from the store.
    let mut messages = Vec::with_capacity(thread.turns.len() * 2 + 1);
    for turn in thread.turns.iter().rev() {
        messages.push(ChatMessage::user(turn.user_question.clone()));
        messages.push(ChatMessage::assistant(turn.llm_answer.clone()));
    }
    messages.push(ChatMessage::user(question));

    (system, messages)
}
