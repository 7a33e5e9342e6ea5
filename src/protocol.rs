//! Wire types for the WebSocket surface, one closed enum per direction.

use serde::{Deserialize, Serialize};

use crate::references::Reference;

pub const WS_APP_PROTOCOL: &str = "ragchat.v1";
pub const WS_TOKEN_PREFIX: &str = "bearer.";

/// Inbound user message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsIncoming {
    Question {
        #[serde(rename = "threadId")]
        thread_id: Option<String>,
        input: String,
    },
}

/// Outbound delivery event. For a single work item the sequence is exactly
/// one `ack` or `error`, then zero-or-more `chunk`, then one `references`
/// and one `eos` on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutgoing {
    Ack {
        #[serde(rename = "threadId")]
        thread_id: String,
    },
    Chunk {
        text: String,
    },
    References {
        references: Vec<Reference>,
    },
    Eos,
    Error {
        code: ErrorCode,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "THREAD_NOT_FOUND")]
    ThreadNotFound,
    #[serde(rename = "INTERNAL_SERVER_ERROR")]
    InternalServerError,
}
