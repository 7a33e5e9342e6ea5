//! Retrieval client wrapping the external search capability.
//!
//! Hit shapes coming back from retrieval services vary; the client
//! normalizes them into `RetrievalResult` and tolerates missing optional
//! fields. An empty result set is a legitimate answer meaning "no grounding
//! available" and must never be treated as an error.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::errors::ApiError;

/// One passage hit from the search capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub text: String,
    #[serde(rename = "sourceId")]
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<RetrievalResult>, ApiError>;
}

#[derive(Clone)]
pub struct HttpRetriever {
    base_url: String,
    top_k: usize,
    client: Client,
}

impl HttpRetriever {
    pub fn new(base_url: String, top_k: usize) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            top_k,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn search(&self, query: &str) -> Result<Vec<RetrievalResult>, ApiError> {
        let url = format!("{}/retrieve", self.base_url);
        let body = json!({
            "query": query,
            "limit": self.top_k,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        if !res.status().is_success() {
            return Err(ApiError::Internal(format!(
                "retrieval request failed: {}",
                res.status()
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::internal)?;
        Ok(parse_results(&payload))
    }
}

fn request_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() || err.is_connect() {
        ApiError::Transient(err.to_string())
    } else {
        ApiError::internal(err)
    }
}

/// Normalizes a raw retrieval payload into the uniform result shape.
///
/// Accepts `results` or `items` as the hit array, `text`/`content` for the
/// passage body and `sourceId`/`documentId` for the source. Hits without
/// both a body and a source are dropped; score and page stay optional.
pub(crate) fn parse_results(payload: &Value) -> Vec<RetrievalResult> {
    let items = payload
        .get("results")
        .or_else(|| payload.get("items"))
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut results = Vec::new();
    for item in items {
        let text = item
            .get("text")
            .or_else(|| item.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let source_id = item
            .get("sourceId")
            .or_else(|| item.get("documentId"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        if text.is_empty() || source_id.is_empty() {
            continue;
        }
        results.push(RetrievalResult {
            text,
            source_id,
            page: item.get("page").and_then(|v| v.as_i64()),
            score: item.get("score").and_then(|v| v.as_f64()),
        });
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_heterogeneous_hit_shapes() {
        let payload = json!({
            "results": [
                {"text": "alpha", "sourceId": "docs/guide.pdf", "page": 3, "score": 0.91},
                {"content": "beta", "documentId": "docs/faq.md"},
            ]
        });

        let results = parse_results(&payload);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "alpha");
        assert_eq!(results[0].page, Some(3));
        assert_eq!(results[1].source_id, "docs/faq.md");
        assert_eq!(results[1].page, None);
        assert_eq!(results[1].score, None);
    }

    #[test]
    fn empty_payload_is_a_valid_empty_result_set() {
        assert!(parse_results(&json!({})).is_empty());
        assert!(parse_results(&json!({"results": []})).is_empty());
    }

    #[test]
    fn drops_hits_missing_body_or_source() {
        let payload = json!({
            "results": [
                {"text": "no source"},
                {"sourceId": "no/body.txt"},
                {"text": "kept", "sourceId": "ok.txt"},
            ]
        });
        let results = parse_results(&payload);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_id, "ok.txt");
    }
}
