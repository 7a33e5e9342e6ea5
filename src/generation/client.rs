//! Generation client: streams incremental text deltas from the model
//! service, terminated by an explicit stop event.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::core::config::GenerationConfig;
use crate::core::errors::ApiError;

/// One event on the generation stream. `Stop` is the explicit end marker;
/// a stream that closes without it is incomplete.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Delta(String),
    Stop,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Inference parameters, fixed per deployment.
#[derive(Debug, Clone)]
pub struct InferenceParams {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub stop_sequences: Vec<String>,
}

impl From<&GenerationConfig> for InferenceParams {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            stop_sequences: config.stop_sequences.clone(),
        }
    }
}

#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Starts a streaming completion. The receiver yields delta events in
    /// model emission order; the stream is finite and non-restartable.
    async fn stream(
        &self,
        system: &str,
        messages: Vec<ChatMessage>,
        params: &InferenceParams,
    ) -> Result<mpsc::Receiver<Result<GenerationEvent, ApiError>>, ApiError>;
}

/// OpenAI-compatible chat-completions client (SSE streaming). Content
/// safety runs inside the remote service; a blocked response arrives as a
/// normal delta-plus-stop sequence and never corrupts the stream protocol.
#[derive(Clone)]
pub struct HttpGenerationClient {
    base_url: String,
    model: String,
    client: Client,
}

impl HttpGenerationClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn stream(
        &self,
        system: &str,
        messages: Vec<ChatMessage>,
        params: &InferenceParams,
    ) -> Result<mpsc::Receiver<Result<GenerationEvent, ApiError>>, ApiError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut wire_messages = vec![json!({"role": "system", "content": system})];
        wire_messages.extend(messages.iter().map(|m| json!(m)));

        let body = json!({
            "model": self.model,
            "messages": wire_messages,
            "stream": true,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "stop": params.stop_sequences,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Internal(format!(
                "generation stream error: {}",
                text
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        let chunk_str = String::from_utf8_lossy(&bytes);
                        for line in chunk_str.lines() {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            if line == "data: [DONE]" {
                                let _ = tx.send(Ok(GenerationEvent::Stop)).await;
                                return;
                            }

                            if let Some(data) = line.strip_prefix("data: ") {
                                if let Ok(json) = serde_json::from_str::<Value>(data) {
                                    if let Some(content) =
                                        json["choices"][0]["delta"]["content"].as_str()
                                    {
                                        if !content.is_empty()
                                            && tx
                                                .send(Ok(GenerationEvent::Delta(
                                                    content.to_string(),
                                                )))
                                                .await
                                                .is_err()
                                        {
                                            return;
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ApiError::internal(e))).await;
                        return;
                    }
                }
            }
            // Stream exhausted without the explicit stop marker; the
            // consumer treats the missing Stop as GenerationIncomplete.
        });

        Ok(rx)
    }
}

fn request_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() || err.is_connect() {
        ApiError::Transient(err.to_string())
    } else {
        ApiError::internal(err)
    }
}
