use crate::models::RetrievedHit;
use providers::{IndexSchema, SearchBackend};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Creates the backing index at most once per guard. Concurrent callers wait on
/// the same attempt; a failed attempt is retried by the next caller.
pub struct IndexGuard {
    backend: Arc<dyn SearchBackend>,
    schema: IndexSchema,
    ready: OnceCell<()>,
}

impl IndexGuard {
    pub fn new(backend: Arc<dyn SearchBackend>, schema: IndexSchema) -> Self {
        Self {
            backend,
            schema,
            ready: OnceCell::new(),
        }
    }

    pub async fn ensure(&self) -> anyhow::Result<()> {
        self.ready
            .get_or_try_init(|| async {
                self.backend.ensure_schema(&self.schema).await?;
                tracing::debug!(index = self.backend.index_name(), "search index ready");
                Ok::<(), anyhow::Error>(())
            })
            .await?;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }
}

pub async fn keyword_search(
    backend: &dyn SearchBackend,
    text: &str,
    limit: usize,
    timeout: Duration,
) -> anyhow::Result<Vec<RetrievedHit>> {
    let hits = tokio::time::timeout(timeout, backend.keyword_search(text, limit))
        .await
        .map_err(|_| anyhow::anyhow!("keyword search timed out after {:?}", timeout))??;
    Ok(hits.into_iter().map(RetrievedHit::from).collect())
}

pub async fn vector_search(
    backend: &dyn SearchBackend,
    vector: &[f32],
    limit: usize,
    timeout: Duration,
) -> anyhow::Result<Vec<RetrievedHit>> {
    let hits = tokio::time::timeout(timeout, backend.vector_search(vector, limit))
        .await
        .map_err(|_| anyhow::anyhow!("vector search timed out after {:?}", timeout))??;
    Ok(hits.into_iter().map(RetrievedHit::from).collect())
}
