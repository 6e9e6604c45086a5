//! Gemini `generateContent` client for image generation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{truncate_body, ApiError, Result};

/// Common interface for the image-generation collaborator.
///
/// One call per generation attempt: a prompt plus zero or more local input
/// images in, raw image bytes out. Every error is collaborator-reported and
/// treated as an expected failure by the orchestrator.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        model_id: &str,
        image_paths: &[PathBuf],
        prompt: &str,
    ) -> Result<Vec<u8>>;
}

pub struct GeminiImageClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiImageClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Build the `parts` array: the prompt first, then each image inline.
    async fn build_parts(&self, image_paths: &[PathBuf], prompt: &str) -> Result<Vec<Value>> {
        let mut parts = vec![json!({ "text": prompt })];
        for path in image_paths {
            let bytes = tokio::fs::read(path).await?;
            parts.push(json!({
                "inline_data": {
                    "mime_type": guess_mime(path),
                    "data": STANDARD.encode(&bytes),
                }
            }));
        }
        Ok(parts)
    }
}

#[async_trait]
impl ImageGenerator for GeminiImageClient {
    async fn generate(
        &self,
        model_id: &str,
        image_paths: &[PathBuf],
        prompt: &str,
    ) -> Result<Vec<u8>> {
        let parts = self.build_parts(image_paths, prompt).await?;
        let body = json!({
            "contents": [{ "role": "user", "parts": parts }]
        });
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model_id, self.api_key
        );

        debug!(model = %model_id, images = image_paths.len(), "sending generation request");

        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        if status != 200 {
            return Err(ApiError::Api {
                status,
                message: truncate_body(&text, 200),
            });
        }

        let payload: Value =
            serde_json::from_str(&text).map_err(|e| ApiError::Parse(e.to_string()))?;
        let encoded = extract_inline_image(&payload).ok_or(ApiError::NoImage)?;
        Ok(STANDARD.decode(encoded.trim())?)
    }
}

/// Pull the first inline image payload out of a `generateContent` response.
///
/// Checks the documented `candidates[].content.parts[].inline_data` path
/// first, then scans the whole payload. Responses have been observed with
/// the image nested under other keys and with both snake_case and camelCase
/// field names.
fn extract_inline_image(payload: &Value) -> Option<&str> {
    if let Some(candidates) = payload.get("candidates").and_then(Value::as_array) {
        for candidate in candidates {
            let parts = candidate.pointer("/content/parts").and_then(Value::as_array);
            for part in parts.into_iter().flatten() {
                if let Some(data) = inline_data(part) {
                    return Some(data);
                }
            }
        }
    }

    // Fallback: walk every object in the payload.
    let mut queue = vec![payload];
    while let Some(current) = queue.pop() {
        match current {
            Value::Object(map) => {
                for (key, value) in map {
                    if key == "inline_data" || key == "inlineData" {
                        if let Some(data) = value.get("data").and_then(Value::as_str) {
                            if !data.trim().is_empty() {
                                return Some(data);
                            }
                        }
                    }
                    if value.is_object() || value.is_array() {
                        queue.push(value);
                    }
                }
            }
            Value::Array(items) => queue.extend(items.iter()),
            _ => {}
        }
    }
    None
}

fn inline_data(part: &Value) -> Option<&str> {
    let inline = part.get("inline_data").or_else(|| part.get("inlineData"))?;
    let data = inline.get("data")?.as_str()?;
    if data.trim().is_empty() {
        None
    } else {
        Some(data)
    }
}

/// Telegram photos arrive as JPEG; anything unrecognised is sent as PNG.
fn guess_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
    {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        _ => "image/png",
    }
}
