//! Thread Store: persistence of conversation metadata and turns.
//!
//! Metadata and turns share one keyspace partitioned by user and
//! distinguished by a sort-key prefix (`meta#<createdAt>` vs
//! `turn#<threadId>#<timestamp>`), so retrieving a thread's turns is a
//! single range scan while a user's metadata stays enumerable through the
//! secondary thread-id index. Timestamps in sort keys are zero-padded so
//! string order equals numeric order.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::references::{aggregate_references, Reference};
use crate::retrieval::RetrievalResult;

const SCHEMA_VERSION: i64 = 1;
const MAX_TURN_LIMIT: i64 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct ThreadMetadata {
    #[serde(rename = "threadId")]
    pub thread_id: String,
    pub title: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

/// One question/answer exchange. Immutable once written.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadTurn {
    #[serde(rename = "userQuestion")]
    pub user_question: String,
    #[serde(rename = "llmAnswer")]
    pub llm_answer: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    pub references: Vec<Reference>,
}

/// Metadata plus a recency-ordered window of turns (newest first).
#[derive(Debug, Clone, Serialize)]
pub struct Thread {
    pub metadata: ThreadMetadata,
    pub turns: Vec<ThreadTurn>,
}

#[derive(Debug, Clone)]
pub struct ThreadStore {
    pool: SqlitePool,
}

impl ThreadStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(connect_options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { pool };
        store.init_db().await?;
        Ok(store)
    }

    async fn init_db(&self) -> Result<(), ApiError> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        if version != SCHEMA_VERSION {
            self.rebuild_schema().await?;
        }

        Ok(())
    }

    async fn rebuild_schema(&self) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query("DROP TABLE IF EXISTS chat_items")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "\
            CREATE TABLE chat_items (
                user_id TEXT NOT NULL,
                sort_key TEXT NOT NULL,
                thread_id TEXT,
                title TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER,
                user_question TEXT,
                llm_answer TEXT,
                retrieval_results TEXT,
                system_template TEXT,
                PRIMARY KEY (user_id, sort_key)
            )",
        )
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX idx_chat_items_thread ON chat_items(user_id, thread_id)")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        let pragma = format!("PRAGMA user_version = {}", SCHEMA_VERSION);
        sqlx::query(&pragma)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    /// Allocates a new thread for the user. The first question becomes the
    /// thread title.
    pub async fn create_thread(
        &self,
        user_id: &str,
        first_question: &str,
    ) -> Result<ThreadMetadata, ApiError> {
        let thread_id = Uuid::new_v4().to_string();
        let timestamp = now_millis();

        sqlx::query(
            "\
            INSERT INTO chat_items (user_id, sort_key, thread_id, title, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        )
        .bind(user_id)
        .bind(meta_sort_key(timestamp, &thread_id))
        .bind(&thread_id)
        .bind(first_question)
        .bind(timestamp)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(ThreadMetadata {
            thread_id,
            title: first_question.to_string(),
            created_at: timestamp,
            updated_at: timestamp,
        })
    }

    /// Loads a thread with up to `limit` turns, newest first, optionally
    /// restricted to turns created strictly before `before`.
    ///
    /// Returns `None` when no metadata matches; more than one match is a
    /// `DuplicateThread` fault and aborts the caller.
    pub async fn get_thread(
        &self,
        user_id: &str,
        thread_id: &str,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Option<Thread>, ApiError> {
        let Some(metadata) = self.get_thread_metadata(user_id, thread_id).await? else {
            return Ok(None);
        };

        let lower = turn_sort_key_prefix(thread_id);
        let upper = match before {
            Some(cursor) => turn_sort_key(thread_id, cursor),
            // '~' sorts above every zero-padded digit.
            None => format!("{}~", lower),
        };
        let limit = limit.clamp(1, MAX_TURN_LIMIT);

        let rows = sqlx::query(
            "\
            SELECT user_question, llm_answer, retrieval_results, created_at
            FROM chat_items
            WHERE user_id = ?1 AND sort_key > ?2 AND sort_key < ?3
            ORDER BY sort_key DESC
            LIMIT ?4",
        )
        .bind(user_id)
        .bind(&lower)
        .bind(&upper)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let turns = rows
            .into_iter()
            .map(turn_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::internal)?;

        Ok(Some(Thread { metadata, turns }))
    }

    async fn get_thread_metadata(
        &self,
        user_id: &str,
        thread_id: &str,
    ) -> Result<Option<ThreadMetadata>, ApiError> {
        let rows = sqlx::query(
            "\
            SELECT thread_id, title, created_at, updated_at
            FROM chat_items
            WHERE user_id = ?1 AND thread_id = ?2 AND sort_key LIKE 'meta#%'",
        )
        .bind(user_id)
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        if rows.len() > 1 {
            return Err(ApiError::DuplicateThread(thread_id.to_string()));
        }
        match rows.into_iter().next() {
            None => Ok(None),
            Some(row) => metadata_from_row(row).map(Some).map_err(ApiError::internal),
        }
    }

    /// Enumerates a user's threads, most recently updated first.
    pub async fn list_threads(&self, user_id: &str) -> Result<Vec<ThreadMetadata>, ApiError> {
        let rows = sqlx::query(
            "\
            SELECT thread_id, title, created_at, updated_at
            FROM chat_items
            WHERE user_id = ?1 AND sort_key LIKE 'meta#%'
            ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.into_iter()
            .map(metadata_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::internal)
    }

    /// Appends a turn, then bumps `updated_at` on the metadata row. Two
    /// independent single-row writes; the store assumes no multi-item
    /// transactions, matching the persistence collaborator contract.
    pub async fn append_turn(
        &self,
        user_id: &str,
        metadata: &ThreadMetadata,
        system_template: &str,
        question: &str,
        answer: &str,
        retrieval_results: &[RetrievalResult],
    ) -> Result<(), ApiError> {
        self.put_turn_at(
            user_id,
            metadata,
            system_template,
            question,
            answer,
            retrieval_results,
            now_millis(),
        )
        .await
    }

    pub(crate) async fn put_turn_at(
        &self,
        user_id: &str,
        metadata: &ThreadMetadata,
        system_template: &str,
        question: &str,
        answer: &str,
        retrieval_results: &[RetrievalResult],
        timestamp: i64,
    ) -> Result<(), ApiError> {
        let raw_results = serde_json::to_string(retrieval_results).map_err(ApiError::internal)?;

        sqlx::query(
            "\
            INSERT INTO chat_items
                (user_id, sort_key, created_at, user_question, llm_answer,
                 retrieval_results, system_template)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(user_id)
        .bind(turn_sort_key(&metadata.thread_id, timestamp))
        .bind(timestamp)
        .bind(question)
        .bind(answer)
        .bind(raw_results)
        .bind(system_template)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "UPDATE chat_items SET updated_at = ?1 WHERE user_id = ?2 AND sort_key = ?3",
        )
        .bind(timestamp)
        .bind(user_id)
        .bind(meta_sort_key(metadata.created_at, &metadata.thread_id))
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }
}

#[cfg(test)]
impl ThreadStore {
    /// Inserts a second metadata row for an existing thread, simulating the
    /// data-corruption case the duplicate check guards against.
    pub(crate) async fn forge_duplicate_metadata(
        &self,
        user_id: &str,
        metadata: &ThreadMetadata,
    ) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT INTO chat_items (user_id, sort_key, thread_id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'forged', ?4, ?4)",
        )
        .bind(user_id)
        .bind(meta_sort_key(metadata.created_at + 1, &metadata.thread_id))
        .bind(&metadata.thread_id)
        .bind(metadata.created_at + 1)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(())
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn meta_sort_key(created_at: i64, thread_id: &str) -> String {
    format!("meta#{:013}#{}", created_at, thread_id)
}

fn turn_sort_key_prefix(thread_id: &str) -> String {
    format!("turn#{}#", thread_id)
}

fn turn_sort_key(thread_id: &str, timestamp: i64) -> String {
    format!("turn#{}#{:013}", thread_id, timestamp)
}

fn metadata_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ThreadMetadata, sqlx::Error> {
    Ok(ThreadMetadata {
        thread_id: row.try_get("thread_id")?,
        title: row.try_get("title")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn turn_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ThreadTurn, sqlx::Error> {
    let raw_results: String = row.try_get("retrieval_results")?;
    let results: Vec<RetrievalResult> = serde_json::from_str(&raw_results).unwrap_or_default();

    Ok(ThreadTurn {
        user_question: row.try_get("user_question")?,
        llm_answer: row.try_get("llm_answer")?,
        created_at: row.try_get("created_at")?,
        references: aggregate_references(&results),
    })
}
