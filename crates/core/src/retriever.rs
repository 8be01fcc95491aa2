//! Hybrid retrieval: keyword and vector rankings fused into one evidence list.
//!
//! The retriever never fails. A source that errors or times out contributes
//! nothing and is reported in [`RetrievalReport`] so the orchestrator can warn.

use crate::config::FusionPolicy;
use crate::models::RetrievedHit;
use crate::search::{self, IndexGuard};
use providers::{EmbeddingProvider, SearchBackend};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SourceStatus {
    Hits(usize),
    /// Not attempted, e.g. no embedding could be obtained.
    Skipped,
    Failed(String),
}

impl SourceStatus {
    pub fn hits(&self) -> Option<usize> {
        match self {
            SourceStatus::Hits(n) => Some(*n),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SourceStatus::Failed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalReport {
    pub hits: Vec<RetrievedHit>,
    pub keyword: SourceStatus,
    pub vector: SourceStatus,
}

impl RetrievalReport {
    /// No source produced an answer and at least one of them failed.
    pub fn backend_unreachable(&self) -> bool {
        let kw_failed = matches!(self.keyword, SourceStatus::Failed(_));
        match self.vector {
            SourceStatus::Hits(_) => false,
            SourceStatus::Failed(_) => kw_failed,
            SourceStatus::Skipped => kw_failed,
        }
    }
}

pub struct FusionRetriever {
    backend: Arc<dyn SearchBackend>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    index: Option<IndexGuard>,
    policy: FusionPolicy,
    rrf_k: f32,
    search_timeout: Duration,
    embed_timeout: Duration,
}

impl FusionRetriever {
    pub fn new(backend: Arc<dyn SearchBackend>, policy: FusionPolicy) -> Self {
        Self {
            backend,
            embedder: None,
            index: None,
            policy,
            rrf_k: 60.0,
            search_timeout: Duration::from_secs(5),
            embed_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Lazily create the index on first use.
    pub fn with_index_guard(mut self, guard: IndexGuard) -> Self {
        self.index = Some(guard);
        self
    }

    pub fn with_rrf_k(mut self, k: f32) -> Self {
        self.rrf_k = k;
        self
    }

    pub fn with_timeouts(mut self, search: Duration, embed: Duration) -> Self {
        self.search_timeout = search;
        self.embed_timeout = embed;
        self
    }

    pub fn policy(&self) -> FusionPolicy {
        self.policy
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    pub fn search_timeout(&self) -> Duration {
        self.search_timeout
    }

    pub fn index_guard(&self) -> Option<&IndexGuard> {
        self.index.as_ref()
    }

    pub async fn retrieve(&self, query: &str, limit: usize) -> Vec<RetrievedHit> {
        self.retrieve_with_report(query, limit).await.hits
    }

    pub async fn retrieve_with_report(&self, query: &str, limit: usize) -> RetrievalReport {
        if let Some(guard) = &self.index {
            match tokio::time::timeout(self.search_timeout, guard.ensure()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("could not ensure search index: {e:#}"),
                Err(_) => warn!(
                    timeout_ms = self.search_timeout.as_millis() as u64,
                    "search index check timed out"
                ),
            }
        }

        let (keyword, vector) = tokio::join!(
            search::keyword_search(self.backend.as_ref(), query, limit, self.search_timeout),
            self.vector_path(query, limit)
        );

        let (keyword_hits, keyword_status) = match keyword {
            Ok(hits) => {
                let n = hits.len();
                (hits, SourceStatus::Hits(n))
            }
            Err(e) => {
                warn!("keyword search failed: {e:#}");
                (Vec::new(), SourceStatus::Failed(format!("{e:#}")))
            }
        };
        let (vector_hits, vector_status) = vector;

        let hits = match self.policy {
            FusionPolicy::Rrf => {
                let sources = if self.embedder.is_some() { 2 } else { 1 };
                reciprocal_rank_fusion(&keyword_hits, &vector_hits, self.rrf_k, sources, limit)
            }
            FusionPolicy::PreferVector => prefer_vector(keyword_hits, vector_hits, limit),
        };
        debug!(
            fused = hits.len(),
            keyword = ?keyword_status,
            vector = ?vector_status,
            "retrieval finished"
        );
        RetrievalReport {
            hits,
            keyword: keyword_status,
            vector: vector_status,
        }
    }

    async fn vector_path(&self, query: &str, limit: usize) -> (Vec<RetrievedHit>, SourceStatus) {
        let Some(embedder) = &self.embedder else {
            return (Vec::new(), SourceStatus::Skipped);
        };
        let texts = [query.to_string()];
        let embedded = match tokio::time::timeout(self.embed_timeout, embedder.embed(&texts)).await
        {
            Ok(Ok(resp)) => resp.vectors.into_iter().next().unwrap_or_default(),
            Ok(Err(e)) => {
                warn!("query embedding failed: {e}");
                return (Vec::new(), SourceStatus::Failed(e.to_string()));
            }
            Err(_) => {
                warn!("query embedding timed out");
                return (Vec::new(), SourceStatus::Failed("embedding timed out".into()));
            }
        };
        if embedded.is_empty() {
            return (Vec::new(), SourceStatus::Skipped);
        }
        match search::vector_search(self.backend.as_ref(), &embedded, limit, self.search_timeout)
            .await
        {
            Ok(hits) => {
                let n = hits.len();
                (hits, SourceStatus::Hits(n))
            }
            Err(e) => {
                warn!("vector search failed: {e:#}");
                (Vec::new(), SourceStatus::Failed(format!("{e:#}")))
            }
        }
    }
}

/// Reciprocal Rank Fusion: `score(d) = Σ 1/(k + rank(d))`, ranks starting at 1.
///
/// Scores are divided by the best achievable sum over `sources` configured
/// rankings, so a fragment ranked first everywhere scores 1.0. Rank alone says
/// nothing about relevance, so each fused hit keeps the best raw backend score
/// in `relevance`.
pub fn reciprocal_rank_fusion(
    keyword: &[RetrievedHit],
    vector: &[RetrievedHit],
    k: f32,
    sources: usize,
    limit: usize,
) -> Vec<RetrievedHit> {
    let ideal = sources.max(1) as f32 / (k + 1.0);
    let mut fused: HashMap<String, RetrievedHit> = HashMap::new();
    for list in [keyword, vector] {
        let mut seen = std::collections::HashSet::new();
        let mut rank = 0usize;
        for hit in list {
            // Repeated ids inside one ranking count once, at their best rank.
            if !seen.insert(hit.fragment_id.as_str()) {
                continue;
            }
            rank += 1;
            let contribution = 1.0 / (k + rank as f32) / ideal;
            fused
                .entry(hit.fragment_id.clone())
                .and_modify(|h| {
                    h.score += contribution;
                    h.relevance = h.relevance.max(hit.relevance);
                })
                .or_insert_with(|| RetrievedHit {
                    score: contribution,
                    ..hit.clone()
                });
        }
    }
    rank_and_truncate(fused.into_values().collect(), limit)
}

/// Vector ranking when it produced anything, keyword ranking otherwise.
pub fn prefer_vector(
    keyword: Vec<RetrievedHit>,
    vector: Vec<RetrievedHit>,
    limit: usize,
) -> Vec<RetrievedHit> {
    let chosen = if vector.is_empty() { keyword } else { vector };
    dedupe_and_rank(chosen, limit)
}

/// Keeps the highest score per fragment id, then ranks.
pub fn dedupe_and_rank(hits: Vec<RetrievedHit>, limit: usize) -> Vec<RetrievedHit> {
    let mut best: HashMap<String, RetrievedHit> = HashMap::new();
    for mut hit in hits {
        match best.get_mut(&hit.fragment_id) {
            Some(existing) if existing.score >= hit.score => {
                existing.relevance = existing.relevance.max(hit.relevance);
            }
            Some(existing) => {
                hit.relevance = hit.relevance.max(existing.relevance);
                *existing = hit;
            }
            None => {
                best.insert(hit.fragment_id.clone(), hit);
            }
        }
    }
    rank_and_truncate(best.into_values().collect(), limit)
}

fn rank_and_truncate(mut hits: Vec<RetrievedHit>, limit: usize) -> Vec<RetrievedHit> {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.fragment_id.cmp(&b.fragment_id))
    });
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> RetrievedHit {
        RetrievedHit {
            fragment_id: id.into(),
            score,
            relevance: score,
            text: format!("text {id}"),
            bucket: None,
            doc_id: None,
            unit: None,
        }
    }

    fn ids(hits: &[RetrievedHit]) -> Vec<&str> {
        hits.iter().map(|h| h.fragment_id.as_str()).collect()
    }

    #[test]
    fn rrf_rewards_cross_source_agreement() {
        let keyword = vec![hit("a", 9.0), hit("b", 7.0), hit("c", 1.0)];
        let vector = vec![hit("b", 0.9), hit("d", 0.8)];
        let fused = reciprocal_rank_fusion(&keyword, &vector, 60.0, 2, 10);
        assert_eq!(fused[0].fragment_id, "b");
        // b: rank 2 keyword + rank 1 vector
        let expected = (1.0 / 62.0 + 1.0 / 61.0) / (2.0 / 61.0);
        assert!((fused[0].score - expected).abs() < 1e-6);
        assert_eq!(fused.len(), 4);
    }

    #[test]
    fn rrf_top_in_both_scores_one() {
        let fused = reciprocal_rank_fusion(&[hit("a", 1.0)], &[hit("a", 0.5)], 60.0, 2, 5);
        assert!((fused[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rrf_single_source_outage_halves_scores() {
        let fused = reciprocal_rank_fusion(&[hit("a", 1.0), hit("b", 0.5)], &[], 60.0, 2, 5);
        assert!((fused[0].score - 0.5).abs() < 1e-6);
        assert_eq!(ids(&fused), vec!["a", "b"]);
    }

    #[test]
    fn ties_break_by_fragment_id() {
        let keyword = vec![hit("z", 1.0)];
        let vector = vec![hit("m", 1.0)];
        let fused = reciprocal_rank_fusion(&keyword, &vector, 60.0, 2, 5);
        assert_eq!(ids(&fused), vec!["m", "z"]);
        let again = reciprocal_rank_fusion(&keyword, &vector, 60.0, 2, 5);
        assert_eq!(fused, again);
    }

    #[test]
    fn duplicates_within_one_ranking_count_once() {
        let keyword = vec![hit("a", 3.0), hit("a", 2.0), hit("b", 1.0)];
        let fused = reciprocal_rank_fusion(&keyword, &[], 60.0, 1, 5);
        assert_eq!(ids(&fused), vec!["a", "b"]);
        assert!((fused[0].score - 1.0).abs() < 1e-6);
        // b is second in the ranking, not third
        assert!((fused[1].score - 61.0 / 62.0).abs() < 1e-6);
    }

    #[test]
    fn rrf_keeps_best_raw_relevance() {
        let keyword = vec![hit("a", 0.01), hit("b", 0.005)];
        let vector = vec![hit("a", 0.02), hit("c", 0.9)];
        let fused = reciprocal_rank_fusion(&keyword, &vector, 60.0, 2, 10);
        let a = fused.iter().find(|h| h.fragment_id == "a").unwrap();
        // Ranked first in both lists, yet barely relevant.
        assert!((a.score - 1.0).abs() < 1e-6);
        assert!((a.relevance - 0.02).abs() < 1e-6);
        let c = fused.iter().find(|h| h.fragment_id == "c").unwrap();
        assert!((c.relevance - 0.9).abs() < 1e-6);
    }

    #[test]
    fn prefer_vector_falls_back_to_keyword() {
        let chosen = prefer_vector(vec![hit("k", 4.0)], vec![], 5);
        assert_eq!(ids(&chosen), vec!["k"]);
        let chosen = prefer_vector(vec![hit("k", 4.0)], vec![hit("v", 0.7)], 5);
        assert_eq!(ids(&chosen), vec!["v"]);
    }

    #[test]
    fn dedupe_keeps_highest_score_and_truncates() {
        let ranked = dedupe_and_rank(
            vec![hit("a", 0.2), hit("b", 0.9), hit("a", 0.6), hit("c", 0.1)],
            2,
        );
        assert_eq!(ids(&ranked), vec!["b", "a"]);
        assert!((ranked[1].score - 0.6).abs() < 1e-6);
    }

    #[test]
    fn report_flags_unreachable_backend() {
        let report = RetrievalReport {
            hits: vec![],
            keyword: SourceStatus::Failed("down".into()),
            vector: SourceStatus::Skipped,
        };
        assert!(report.backend_unreachable());
        let report = RetrievalReport {
            hits: vec![],
            keyword: SourceStatus::Hits(0),
            vector: SourceStatus::Failed("down".into()),
        };
        assert!(!report.backend_unreachable());
    }
}
