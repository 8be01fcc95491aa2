//! Per-session conversation state.

use crate::models::ClassificationResult;
use crate::prompts::truncate_chars;
use anyhow::Context;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;

pub const MAX_TURNS: usize = 10;
pub const ASSISTANT_TURN_CHARS: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub last_query: Option<String>,
    pub last_result: Option<ClassificationResult>,
    /// `(user, assistant)` pairs, oldest first.
    pub history: Vec<(String, String)>,
}

impl ConversationContext {
    pub fn update(&mut self, query: &str, result: ClassificationResult) {
        self.last_query = Some(query.to_string());
        self.last_result = Some(result);
    }

    /// Appends a turn, keeping only the most recent [`MAX_TURNS`].
    pub fn add_turn(&mut self, user: &str, assistant: &str) {
        self.history.push((user.to_string(), assistant.to_string()));
        if self.history.len() > MAX_TURNS {
            let excess = self.history.len() - MAX_TURNS;
            self.history.drain(..excess);
        }
    }

    pub fn has_context(&self) -> bool {
        self.last_result.is_some()
    }

    /// History rendered for the follow-up prompt; long assistant turns are cut.
    pub fn history_text(&self) -> String {
        let mut lines = Vec::new();
        for (i, (user, assistant)) in self.history.iter().enumerate() {
            lines.push(format!("Turn {}:", i + 1));
            lines.push(format!("User: {user}"));
            let cut = truncate_chars(assistant, ASSISTANT_TURN_CHARS);
            if cut.len() < assistant.len() {
                lines.push(format!("Assistant: {cut}..."));
            } else {
                lines.push(format!("Assistant: {cut}"));
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    /// Missing sessions load as an empty context.
    async fn load(&self, session_id: &str) -> anyhow::Result<ConversationContext>;
    async fn save(&self, session_id: &str, ctx: &ConversationContext) -> anyhow::Result<()>;
    /// Returns true when a session existed.
    async fn clear(&self, session_id: &str) -> anyhow::Result<bool>;
}

#[derive(Default, Clone)]
pub struct InMemoryConversationStore {
    sessions: Arc<DashMap<String, ConversationContext>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, session_id: &str) -> anyhow::Result<ConversationContext> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|r| r.clone())
            .unwrap_or_default())
    }

    async fn save(&self, session_id: &str, ctx: &ConversationContext) -> anyhow::Result<()> {
        self.sessions.insert(session_id.to_string(), ctx.clone());
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> anyhow::Result<bool> {
        Ok(self.sessions.remove(session_id).is_some())
    }
}

/// Sessions persisted in SQLite through the storage crate.
#[derive(Clone)]
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    pub async fn open(database: &str) -> anyhow::Result<Self> {
        let pool = storage::connect(database).await.context("db connect")?;
        storage::migrate(&pool).await.context("db migrate")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn load(&self, session_id: &str) -> anyhow::Result<ConversationContext> {
        let Some(row) = storage::conversations::load(&self.pool, session_id).await? else {
            return Ok(ConversationContext::default());
        };
        let last_result = row
            .last_result
            .as_deref()
            .map(|s| serde_json::from_str::<ClassificationResult>(s))
            .transpose()
            .with_context(|| format!("decoding stored result for session {session_id}"))?;
        let history: Vec<(String, String)> = serde_json::from_str(&row.history_json)
            .with_context(|| format!("decoding stored history for session {session_id}"))?;
        Ok(ConversationContext {
            last_query: Some(row.last_query).filter(|q| !q.is_empty()),
            last_result,
            history,
        })
    }

    async fn save(&self, session_id: &str, ctx: &ConversationContext) -> anyhow::Result<()> {
        let last_result = ctx
            .last_result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let history = serde_json::to_string(&ctx.history)?;
        storage::conversations::upsert(
            &self.pool,
            session_id,
            ctx.last_query.as_deref().unwrap_or_default(),
            last_result.as_deref(),
            &history,
        )
        .await
    }

    async fn clear(&self, session_id: &str) -> anyhow::Result<bool> {
        storage::conversations::delete(&self.pool, session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_keeps_last_ten_turns() {
        let mut ctx = ConversationContext::default();
        for i in 0..13 {
            ctx.add_turn(&format!("q{i}"), "a");
        }
        assert_eq!(ctx.history.len(), MAX_TURNS);
        assert_eq!(ctx.history[0].0, "q3");
    }

    #[test]
    fn history_text_truncates_assistant_turns() {
        let mut ctx = ConversationContext::default();
        ctx.add_turn("hola", &"é".repeat(700));
        ctx.add_turn("y?", "corto");
        let text = ctx.history_text();
        assert!(text.contains(&format!("Assistant: {}...", "é".repeat(500))));
        assert!(!text.contains(&"é".repeat(501)));
        assert!(text.contains("Assistant: corto\n"));
        assert!(text.starts_with("Turn 1:\nUser: hola"));
    }
}
