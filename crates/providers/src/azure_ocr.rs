use crate::{check_status, OcrService, ProviderError};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Clone)]
pub struct AzureOcrConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub api_version: String,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

/// Azure Document Intelligence layout extraction.
#[derive(Clone)]
pub struct AzureOcrProvider {
    client: Client,
    cfg: AzureOcrConfig,
}

impl AzureOcrProvider {
    pub fn new(cfg: AzureOcrConfig) -> Self {
        Self {
            client: Client::new(),
            cfg,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    analyze_result: Option<AnalyzeResult>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    content: String,
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    lines: Vec<Line>,
}

#[derive(Debug, Deserialize)]
struct Line {
    content: String,
}

/// Lines joined per page, pages separated by a blank line.
fn page_text(result: AnalyzeResult) -> String {
    let pages: Vec<String> = result
        .pages
        .into_iter()
        .map(|p| {
            p.lines
                .into_iter()
                .map(|l| l.content)
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|p| !p.trim().is_empty())
        .collect();
    if pages.is_empty() {
        result.content
    } else {
        pages.join("\n\n")
    }
}

#[async_trait::async_trait]
impl OcrService for AzureOcrProvider {
    async fn extract_text(
        &self,
        document: &[u8],
        content_type: &str,
    ) -> Result<String, ProviderError> {
        let url = format!(
            "{}/documentintelligence/documentModels/{}:analyze?api-version={}",
            self.cfg.endpoint.trim_end_matches('/'),
            self.cfg.model,
            self.cfg.api_version
        );
        let resp = self
            .client
            .post(url)
            .header("Ocp-Apim-Subscription-Key", &self.cfg.api_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(document.to_vec())
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let resp = check_status(resp).await?;
        let operation = resp
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse("missing Operation-Location".into()))?;

        for _ in 0..self.cfg.max_polls {
            tokio::time::sleep(self.cfg.poll_interval).await;
            let resp = self
                .client
                .get(&operation)
                .header("Ocp-Apim-Subscription-Key", &self.cfg.api_key)
                .send()
                .await
                .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
            let resp = check_status(resp).await?;
            let op: AnalyzeOperation = resp
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
            match op.status.as_str() {
                "succeeded" => {
                    let text = page_text(op.analyze_result.unwrap_or_default());
                    if text.trim().is_empty() {
                        return Err(ProviderError::EmptyResponse);
                    }
                    return Ok(text);
                }
                "failed" | "canceled" => {
                    return Err(ProviderError::RequestFailed(format!(
                        "analysis {}: {}",
                        op.status,
                        op.error.map(|e| e.to_string()).unwrap_or_default()
                    )));
                }
                _ => tracing::debug!(status = %op.status, "document analysis pending"),
            }
        }
        Err(ProviderError::RequestFailed(format!(
            "analysis did not finish after {} polls",
            self.cfg.max_polls
        )))
    }
}
