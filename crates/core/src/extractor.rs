//! Text extraction from an uploaded attachment.

use anyhow::Context;
use providers::OcrService;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A file supplied alongside (or instead of) the query text.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            content_type: None,
        }
    }

    pub async fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();
        Ok(Self::new(name, bytes))
    }

    /// Declared type, then magic bytes, then the file extension.
    pub fn mime(&self) -> String {
        if let Some(ct) = &self.content_type {
            return ct.clone();
        }
        if let Some(kind) = infer::get(&self.bytes) {
            return kind.mime_type().to_string();
        }
        guess_mime(&self.name).to_string()
    }
}

fn guess_mime(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "md" | "csv" | "log" => "text/plain",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

fn is_texty(mime: &str) -> bool {
    mime.starts_with("text/") || mime.contains("json")
}

pub struct TextExtractor {
    ocr: Arc<dyn OcrService>,
    timeout: Duration,
    max_text_bytes: usize,
}

impl TextExtractor {
    pub fn new(ocr: Arc<dyn OcrService>, timeout: Duration) -> Self {
        Self {
            ocr,
            timeout,
            max_text_bytes: 64 * 1024,
        }
    }

    /// Plain text is decoded directly; everything else goes through OCR.
    pub async fn extract(&self, attachment: &Attachment) -> anyhow::Result<String> {
        let mime = attachment.mime();
        if is_texty(&mime) {
            let end = attachment.bytes.len().min(self.max_text_bytes);
            let text = String::from_utf8_lossy(&attachment.bytes[..end]).to_string();
            tracing::debug!(name = %attachment.name, chars = text.len(), "read text attachment");
            return Ok(text.trim().to_string());
        }
        let text = tokio::time::timeout(self.timeout, self.ocr.extract_text(&attachment.bytes, &mime))
            .await
            .map_err(|_| anyhow::anyhow!("OCR timed out after {:?}", self.timeout))?
            .with_context(|| format!("OCR failed for {}", attachment.name))?;
        tracing::info!(name = %attachment.name, %mime, chars = text.len(), "OCR extracted text");
        Ok(text.trim().to_string())
    }
}

/// Query text followed by the extracted text, whichever are present.
pub fn merge_query(text: Option<&str>, extracted: Option<&str>) -> String {
    let parts: Vec<&str> = [text, extracted]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_from_magic_bytes_then_extension() {
        let png = Attachment::new("scan.bin", vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        assert_eq!(png.mime(), "image/png");
        let txt = Attachment::new("ficha.txt", b"Resina epoxi".to_vec());
        assert_eq!(txt.mime(), "text/plain");
        let mut declared = Attachment::new("x", vec![]);
        declared.content_type = Some("application/pdf".into());
        assert_eq!(declared.mime(), "application/pdf");
    }

    #[test]
    fn merge_skips_blank_parts() {
        assert_eq!(merge_query(Some(" tubo "), Some("acero")), "tubo\n\nacero");
        assert_eq!(merge_query(None, Some("acero")), "acero");
        assert_eq!(merge_query(Some("  "), None), "");
    }
}
