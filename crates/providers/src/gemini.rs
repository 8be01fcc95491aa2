use crate::{
    check_status, EmbedResponse, EmbeddingProvider, GenerationRequest, GenerationService,
    ProviderError,
};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
}

#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    cfg: Arc<GeminiConfig>,
}

impl GeminiProvider {
    pub fn new(mut cfg: GeminiConfig) -> Self {
        cfg.embedding_model = with_model_prefix(&cfg.embedding_model);
        cfg.chat_model = with_model_prefix(&cfg.chat_model);
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        }
    }
}

/// The REST API addresses models as `models/<name>`.
pub fn with_model_prefix(name: &str) -> String {
    if name.starts_with("models/") || name.starts_with("tunedModels/") {
        name.to_string()
    } else {
        format!("models/{}", name)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ContentCandidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentCandidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Pulls the answer text out of a `generateContent` response, mapping safety
/// blocks and part-less candidates onto provider errors.
fn response_text(resp: GenerateContentResponse) -> Result<String, ProviderError> {
    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ProviderError::Blocked(reason));
    }
    let first = resp
        .candidates
        .into_iter()
        .next()
        .ok_or(ProviderError::EmptyResponse)?;
    let text: String = first
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return match first.finish_reason.as_deref() {
            Some(reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT")) => {
                Err(ProviderError::Blocked(reason.to_string()))
            }
            _ => Err(ProviderError::EmptyResponse),
        };
    }
    Ok(text)
}

#[async_trait::async_trait]
impl GenerationService for GeminiProvider {
    fn model(&self) -> &str {
        &self.cfg.chat_model
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, ProviderError> {
        let mut generation_config = serde_json::json!({
            "temperature": request.temperature,
            "topP": 0.9,
            "topK": 40,
            "maxOutputTokens": request.max_output_tokens,
        });
        if let Some(schema) = request.output_schema {
            generation_config["responseMimeType"] = "application/json".into();
            generation_config["responseSchema"] = schema.clone();
        }
        let mut body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": generation_config,
        });
        if let Some(system) = request.system {
            body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": system }] });
        }

        let resp = self
            .client
            .post(format!(
                "{}/v1beta/{}:generateContent",
                self.cfg.base_url, self.cfg.chat_model
            ))
            .header("x-goog-api-key", &self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let resp = check_status(resp).await?;
        let parsed: GenerateContentResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        response_text(parsed)
    }
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[async_trait::async_trait]
impl EmbeddingProvider for GeminiProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|t| {
                // The endpoint rejects empty content.
                let text = if t.trim().is_empty() { " " } else { t.as_str() };
                serde_json::json!({
                    "model": self.cfg.embedding_model,
                    "content": { "parts": [{ "text": text }] },
                })
            })
            .collect();

        let resp = self
            .client
            .post(format!(
                "{}/v1beta/{}:batchEmbedContents",
                self.cfg.base_url, self.cfg.embedding_model
            ))
            .header("x-goog-api-key", &self.cfg.api_key)
            .json(&serde_json::json!({ "requests": requests }))
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let resp = check_status(resp).await?;
        let parsed: BatchEmbedResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        if parsed.embeddings.len() != texts.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        Ok(EmbedResponse {
            vectors: parsed.embeddings.into_iter().map(|e| e.values).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn joins_text_parts() {
        let resp = parse(serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"a\":" }, { "text": "1}" }] },
                             "finishReason": "STOP" }]
        }));
        assert_eq!(response_text(resp).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn prompt_block_is_reported_as_blocked() {
        let resp = parse(serde_json::json!({
            "candidates": [],
            "promptFeedback": { "blockReason": "SAFETY" }
        }));
        assert!(matches!(response_text(resp), Err(ProviderError::Blocked(r)) if r == "SAFETY"));
    }

    #[test]
    fn partless_candidate_with_safety_finish_is_blocked() {
        let resp = parse(serde_json::json!({
            "candidates": [{ "finishReason": "SAFETY" }]
        }));
        assert!(matches!(response_text(resp), Err(ProviderError::Blocked(_))));
    }

    #[test]
    fn missing_candidates_is_empty() {
        let resp = parse(serde_json::json!({}));
        assert!(matches!(response_text(resp), Err(ProviderError::EmptyResponse)));
    }

    #[test]
    fn model_prefix_is_added_once() {
        assert_eq!(with_model_prefix("gemini-2.0-flash"), "models/gemini-2.0-flash");
        assert_eq!(with_model_prefix("models/text-embedding-004"), "models/text-embedding-004");
    }
}
