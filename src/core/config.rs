//! Typed service configuration, loaded from a TOML file.
//!
//! The file path comes from `RAGCHAT_CONFIG` (default `ragchat.toml`); a
//! missing file falls back to defaults so the service can start in a dev
//! environment without any setup. Inference parameters are fixed per
//! deployment here, never per request.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::errors::ApiError;

const CONFIG_ENV_VAR: &str = "RAGCHAT_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "ragchat.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8200".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/chat_history.db"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounded window of prior turns supplied to generation as context.
    pub memory_turns: i64,
    /// Capacity of the decoupling work queue.
    pub queue_depth: usize,
    /// Wall-clock budget for one work item, end to end. An external queue
    /// feeding this service must keep its redelivery visibility window
    /// above this value.
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            memory_turns: 10,
            queue_depth: 64,
            timeout_secs: 110,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub endpoint: String,
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8201".to_string(),
            top_k: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8202".to_string(),
            model: "default".to_string(),
            max_tokens: 2000,
            temperature: 0.2,
            top_p: 0.99,
            stop_sequences: vec!["Human: ".to_string(), "Assistant: ".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub endpoint: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8203".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ApiError> {
        let path = std::env::var(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ApiError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(ApiError::internal)?;
        toml::from_str(&raw).map_err(ApiError::internal)
    }
}
