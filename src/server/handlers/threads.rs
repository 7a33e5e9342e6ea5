//! Read-only REST surface over the thread store.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

const DEFAULT_PAGE_TURNS: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct TurnPage {
    /// Only turns created strictly before this timestamp (epoch millis).
    pub before: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_threads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&state, &headers).await?;
    let threads = state.store.list_threads(&user_id).await?;
    Ok(Json(json!({ "threads": threads })))
}

pub async fn get_thread(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(thread_id): Path<String>,
    Query(page): Query<TurnPage>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&state, &headers).await?;
    let thread = state
        .store
        .get_thread(
            &user_id,
            &thread_id,
            page.before,
            page.limit.unwrap_or(DEFAULT_PAGE_TURNS),
        )
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("thread {}", thread_id)))?;
    Ok(Json(thread))
}

async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;
    state.auth.verify(token).await
}
