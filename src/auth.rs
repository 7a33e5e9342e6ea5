//! Authentication collaborator: opaque bearer credential in, stable
//! subject identifier out. Any failure is a deny.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String, ApiError>;
}

#[derive(Clone)]
pub struct HttpAuthenticator {
    base_url: String,
    client: Client,
}

#[derive(Deserialize)]
struct VerifyResponse {
    sub: String,
}

impl HttpAuthenticator {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn verify(&self, token: &str) -> Result<String, ApiError> {
        let url = format!("{}/verify", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(&json!({ "token": token }))
            .send()
            .await
            .map_err(|_| ApiError::Unauthorized)?;

        if !res.status().is_success() {
            return Err(ApiError::Unauthorized);
        }

        let payload: VerifyResponse = res.json().await.map_err(|_| ApiError::Unauthorized)?;
        if payload.sub.is_empty() {
            return Err(ApiError::Unauthorized);
        }
        Ok(payload.sub)
    }
}
