//! Shared in-memory doubles for pipeline tests.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::errors::ApiError;
use crate::delivery::{DeliveryChannel, DeliveryError};
use crate::generation::client::{
    ChatMessage, GenerationClient, GenerationEvent, InferenceParams,
};
use crate::protocol::WsOutgoing;
use crate::retrieval::{RetrievalResult, Retriever};

/// Records every delivered event; optionally reports the connection gone
/// once a number of chunk events has been delivered.
pub struct RecordingDelivery {
    events: Mutex<Vec<WsOutgoing>>,
    gone_after_chunks: Option<usize>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            gone_after_chunks: None,
        }
    }

    pub fn gone_after_chunks(limit: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            gone_after_chunks: Some(limit),
        }
    }

    pub fn events(&self) -> Vec<WsOutgoing> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingDelivery {
    async fn send(&self, _connection_id: &str, event: &WsOutgoing) -> Result<(), DeliveryError> {
        let mut events = self.events.lock().unwrap();
        if let Some(limit) = self.gone_after_chunks {
            let chunks = events
                .iter()
                .filter(|e| matches!(e, WsOutgoing::Chunk { .. }))
                .count();
            if chunks >= limit {
                return Err(DeliveryError::Gone);
            }
        }
        events.push(event.clone());
        Ok(())
    }
}

enum ScriptItem {
    Delta(String),
    Stop,
    Error(String),
}

/// Replays a fixed sequence of generation events.
pub struct ScriptedGeneration {
    script: Mutex<Vec<ScriptItem>>,
}

impl ScriptedGeneration {
    /// Deltas followed by an explicit stop.
    pub fn ok(deltas: &[&str]) -> Self {
        let mut script: Vec<ScriptItem> = deltas
            .iter()
            .map(|d| ScriptItem::Delta(d.to_string()))
            .collect();
        script.push(ScriptItem::Stop);
        Self {
            script: Mutex::new(script),
        }
    }

    /// Deltas with the stop marker missing (stream exhaustion).
    pub fn without_stop(deltas: &[&str]) -> Self {
        Self {
            script: Mutex::new(
                deltas
                    .iter()
                    .map(|d| ScriptItem::Delta(d.to_string()))
                    .collect(),
            ),
        }
    }

    /// A stream that fails mid-flight.
    pub fn failing(message: &str) -> Self {
        Self {
            script: Mutex::new(vec![
                ScriptItem::Delta("partial".to_string()),
                ScriptItem::Error(message.to_string()),
            ]),
        }
    }
}

#[async_trait]
impl GenerationClient for ScriptedGeneration {
    async fn stream(
        &self,
        _system: &str,
        _messages: Vec<ChatMessage>,
        _params: &InferenceParams,
    ) -> Result<mpsc::Receiver<Result<GenerationEvent, ApiError>>, ApiError> {
        let script = std::mem::take(&mut *self.script.lock().unwrap());
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for item in script {
                let event = match item {
                    ScriptItem::Delta(text) => Ok(GenerationEvent::Delta(text)),
                    ScriptItem::Stop => Ok(GenerationEvent::Stop),
                    ScriptItem::Error(msg) => Err(ApiError::Internal(msg)),
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// Returns the same result set for every query.
pub struct StaticRetriever {
    pub results: Vec<RetrievalResult>,
}

impl StaticRetriever {
    pub fn empty() -> Self {
        Self { results: vec![] }
    }

    pub fn with(results: Vec<RetrievalResult>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn search(&self, _query: &str) -> Result<Vec<RetrievalResult>, ApiError> {
        Ok(self.results.clone())
    }
}

pub fn sample_hit(text: &str, source_id: &str) -> RetrievalResult {
    RetrievalResult {
        text: text.to_string(),
        source_id: source_id.to_string(),
        page: None,
        score: None,
    }
}
