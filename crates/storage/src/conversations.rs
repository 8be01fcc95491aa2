//! Per-session conversation rows. Payloads are opaque JSON owned by the caller.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ConversationRow {
    pub session_id: String,
    pub last_query: String,
    pub last_result: Option<String>,
    pub history_json: String,
    pub updated_at: i64,
}

pub async fn load(pool: &SqlitePool, session_id: &str) -> anyhow::Result<Option<ConversationRow>> {
    let row = sqlx::query_as::<_, ConversationRow>(
        "SELECT session_id, last_query, last_result, history_json, updated_at \
         FROM conversations WHERE session_id = ?1",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn upsert(
    pool: &SqlitePool,
    session_id: &str,
    last_query: &str,
    last_result: Option<&str>,
    history_json: &str,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO conversations (session_id, last_query, last_result, history_json, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(session_id) DO UPDATE SET
            last_query=excluded.last_query,
            last_result=excluded.last_result,
            history_json=excluded.history_json,
            updated_at=excluded.updated_at
        "#,
    )
    .bind(session_id)
    .bind(last_query)
    .bind(last_result)
    .bind(history_json)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns true when a row was removed.
pub async fn delete(pool: &SqlitePool, session_id: &str) -> anyhow::Result<bool> {
    let done = sqlx::query("DELETE FROM conversations WHERE session_id = ?1")
        .bind(session_id)
        .execute(pool)
        .await?;
    Ok(done.rows_affected() > 0)
}
