use crate::{check_status, IndexSchema, ProviderError, SearchBackend};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source fields requested from the index on every search.
const SOURCE_FIELDS: &[&str] = &[
    "fragment_id",
    "text",
    "source",
    "bucket",
    "doc_id",
    "unit",
    "edition",
    "validity_from",
    "validity_to",
    "metadata",
];

#[derive(Clone)]
pub struct OpenSearchConfig {
    pub url: String,
    pub index: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone)]
pub struct OpenSearchClient {
    client: Client,
    cfg: OpenSearchConfig,
}

/// A `date` field value: the index accepts ISO strings and epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateValue {
    EpochMillis(i64),
    Text(String),
}

/// A stored corpus fragment as the index returns it in `_source`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fragment {
    pub fragment_id: Option<String>,
    pub text: String,
    pub source: Option<String>,
    pub bucket: Option<String>,
    pub doc_id: Option<String>,
    pub unit: Option<String>,
    pub edition: Option<String>,
    pub validity_from: Option<DateValue>,
    pub validity_to: Option<DateValue>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub fragment: Fragment,
}

impl Fragment {
    /// Corpus bucket, falling back to the ingestion `source` label.
    pub fn bucket(&self) -> Option<&str> {
        self.bucket
            .as_deref()
            .or(self.source.as_deref())
            .filter(|b| !b.is_empty())
    }
}

impl SearchHit {
    /// Fragment id from the document body, falling back to the index `_id`.
    pub fn fragment_id(&self) -> &str {
        self.fragment
            .fragment_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    /// Decoded one by one so a single odd document cannot sink the batch.
    #[serde(default)]
    hits: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f32>,
    #[serde(rename = "_source", default)]
    source: Fragment,
}

impl OpenSearchClient {
    pub fn new(cfg: OpenSearchConfig) -> Self {
        Self {
            client: Client::new(),
            cfg,
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.cfg.username {
            Some(user) => builder.basic_auth(user, self.cfg.password.as_ref()),
            None => builder,
        }
    }

    async fn search(&self, body: serde_json::Value) -> Result<Vec<SearchHit>, ProviderError> {
        let url = format!("{}/{}/_search", self.cfg.url, self.cfg.index);
        let resp = self
            .request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let resp = check_status(resp).await?;
        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(into_hits(parsed))
    }
}

fn into_hits(parsed: SearchResponse) -> Vec<SearchHit> {
    parsed
        .hits
        .hits
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<RawHit>(raw) {
            Ok(h) => Some(SearchHit {
                id: h.id,
                score: h.score.unwrap_or(0.0).max(0.0),
                fragment: h.source,
            }),
            Err(e) => {
                tracing::warn!("skipping undecodable search hit: {e}");
                None
            }
        })
        .collect()
}

/// Index body: keyword ids, a BM25 text field and a fixed-dimension kNN vector.
pub fn index_mapping(schema: &IndexSchema) -> serde_json::Value {
    serde_json::json!({
        "settings": { "index": { "knn": true } },
        "mappings": {
            "properties": {
                "fragment_id": { "type": "keyword" },
                "source": { "type": "keyword" },
                "doc_id": { "type": "keyword" },
                "chapter": { "type": "keyword" },
                "heading": { "type": "keyword" },
                "subheading": { "type": "keyword" },
                "unit": { "type": "keyword" },
                "text": { "type": "text" },
                "edition": { "type": "keyword" },
                "validity_from": { "type": "date", "format": "strict_date_optional_time||epoch_millis" },
                "validity_to": { "type": "date", "format": "strict_date_optional_time||epoch_millis" },
                "metadata": { "type": "object", "enabled": true },
                "embedding": {
                    "type": "knn_vector",
                    "dimension": schema.vector_dim,
                    "method": { "name": "hnsw", "space_type": schema.metric, "engine": "nmslib" }
                }
            }
        }
    })
}

#[async_trait::async_trait]
impl SearchBackend for OpenSearchClient {
    async fn keyword_search(&self, text: &str, k: usize) -> Result<Vec<SearchHit>, ProviderError> {
        let body = serde_json::json!({
            "size": k,
            "query": { "match": { "text": { "query": text } } },
            "_source": SOURCE_FIELDS,
        });
        self.search(body).await
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        let body = serde_json::json!({
            "size": k,
            "query": { "knn": { "embedding": { "vector": embedding, "k": k } } },
            "_source": SOURCE_FIELDS,
        });
        self.search(body).await
    }

    async fn ensure_schema(&self, schema: &IndexSchema) -> Result<(), ProviderError> {
        let url = format!("{}/{}", self.cfg.url, self.cfg.index);
        let head = self
            .request(reqwest::Method::HEAD, url.clone())
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        if head.status().is_success() {
            return Ok(());
        }
        if head.status() != StatusCode::NOT_FOUND {
            return Err(ProviderError::RequestFailed(format!(
                "index probe returned status {}",
                head.status()
            )));
        }
        let resp = self
            .request(reqwest::Method::PUT, url)
            .json(&index_mapping(schema))
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        if resp.status().is_success() {
            tracing::info!(index = %self.cfg.index, dim = schema.vector_dim, "created search index");
            return Ok(());
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        // Another caller created it between HEAD and PUT.
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(ProviderError::RequestFailed(format!(
            "status {} body {}",
            status, body
        )))
    }

    fn index_name(&self) -> &str {
        &self.cfg.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_search_hits_with_missing_scores() {
        let raw = serde_json::json!({
            "hits": { "hits": [
                { "_id": "a1", "_score": 3.5, "_source": {
                    "fragment_id": "frag-1", "text": "Neumáticos nuevos de caucho", "source": "hs_notes",
                    "doc_id": "ch40", "unit": "4011" } },
                { "_id": "b2", "_score": null, "_source": { "text": "otro" } }
            ]}
        });
        let parsed: SearchResponse = serde_json::from_value(raw).unwrap();
        let hits = into_hits(parsed);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].fragment_id(), "frag-1");
        assert_eq!(hits[0].fragment.bucket(), Some("hs_notes"));
        assert_eq!(hits[1].fragment_id(), "b2");
        assert_eq!(hits[1].score, 0.0);
    }

    #[test]
    fn source_and_bucket_coexist_and_dates_accept_epochs() {
        let raw = serde_json::json!({
            "hits": { "hits": [
                { "_id": "a1", "_score": 2.0, "_source": {
                    "text": "Notas de sección", "source": "DOC", "bucket": "WCO",
                    "validity_from": 1672531200000i64, "validity_to": "2027-12-31" } }
            ]}
        });
        let hits = into_hits(serde_json::from_value(raw).unwrap());
        assert_eq!(hits.len(), 1);
        let fragment = &hits[0].fragment;
        assert_eq!(fragment.bucket(), Some("WCO"));
        assert_eq!(fragment.source.as_deref(), Some("DOC"));
        assert_eq!(fragment.validity_from, Some(DateValue::EpochMillis(1_672_531_200_000)));
        assert_eq!(fragment.validity_to, Some(DateValue::Text("2027-12-31".into())));
    }

    #[test]
    fn undecodable_hits_are_skipped() {
        let raw = serde_json::json!({
            "hits": { "hits": [
                { "_id": "bad", "_score": 1.0, "_source": { "text": 42 } },
                { "_score": 1.0, "_source": { "text": "no id" } },
                { "_id": "good", "_score": 1.5, "_source": { "text": "Neumáticos" } }
            ]}
        });
        let hits = into_hits(serde_json::from_value(raw).unwrap());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fragment_id(), "good");
    }

    #[test]
    fn mapping_carries_vector_dimension_and_space() {
        let mapping = index_mapping(&IndexSchema {
            vector_dim: 768,
            metric: "cosinesimil".into(),
        });
        let emb = &mapping["mappings"]["properties"]["embedding"];
        assert_eq!(emb["dimension"], 768);
        assert_eq!(emb["method"]["space_type"], "cosinesimil");
        assert_eq!(mapping["mappings"]["properties"]["text"]["type"], "text");
    }
}
