//! Model provider abstraction and implementations.
//!
//! Defines the [`Provider`] trait through which every chat, vision and OCR
//! call is made, plus two concrete providers:
//! - **[`DisabledProvider`]**: fails every call; used when no provider is configured.
//! - **[`OpenAiCompatibleProvider`]**: OpenAI-style `/chat/completions` for chat
//!   and vision, and a JSON OCR layout-parsing endpoint.
//!
//! A single provider value is built at startup with [`create_provider`] and
//! handed to the components that need it, so tests can substitute their own.
//!
//! # Retry Strategy
//!
//! HTTP calls use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::models::ParseResult;

/// Image bytes plus the MIME type they are sent with.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// What the OCR layout parser is told about the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrFileType {
    Pdf,
    Image,
}

impl OcrFileType {
    pub fn for_extension(ext: &str) -> Self {
        if ext.eq_ignore_ascii_case("pdf") {
            OcrFileType::Pdf
        } else {
            OcrFileType::Image
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OcrFileType::Pdf => "pdf",
            OcrFileType::Image => "image",
        }
    }
}

/// Result of an OCR layout-parse call.
#[derive(Debug, Clone)]
pub enum OcrOutcome {
    Parsed {
        markdown: String,
        pages: ParseResult,
    },
    /// The service answered but carried no data; `raw` is its full response.
    NoData { raw: Value },
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    async fn chat(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> HarnessResult<String>;

    async fn vision_chat(
        &self,
        model: &str,
        images: &[ImageInput],
        prompt: &str,
        max_tokens: u32,
    ) -> HarnessResult<String>;

    async fn ocr_parse(&self, bytes: &[u8], file_type: OcrFileType) -> HarnessResult<OcrOutcome>;
}

// ============ Disabled Provider ============

/// A provider that refuses every call.
///
/// Used when `provider.kind = "disabled"`. Cached parse and channel results
/// keep working; anything that needs a fresh model call fails per channel.
pub struct DisabledProvider;

#[async_trait]
impl Provider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn chat(
        &self,
        _model: &str,
        _system_prompt: &str,
        _user_prompt: &str,
        _temperature: f32,
        _max_tokens: u32,
    ) -> HarnessResult<String> {
        Err(HarnessError::provider("provider is disabled"))
    }

    async fn vision_chat(
        &self,
        _model: &str,
        _images: &[ImageInput],
        _prompt: &str,
        _max_tokens: u32,
    ) -> HarnessResult<String> {
        Err(HarnessError::provider("provider is disabled"))
    }

    async fn ocr_parse(&self, _bytes: &[u8], _file_type: OcrFileType) -> HarnessResult<OcrOutcome> {
        Err(HarnessError::provider("provider is disabled"))
    }
}

// ============ OpenAI-compatible Provider ============

/// Provider speaking the OpenAI chat-completions wire format.
///
/// The API key is read once from the environment variable named by
/// `provider.api_key_env`.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    ocr_url: Option<String>,
    max_retries: u32,
}

impl OpenAiCompatibleProvider {
    /// # Errors
    ///
    /// Returns an error if the API key variable is unset or the HTTP client
    /// cannot be built.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            ocr_url: config.ocr_url.clone(),
            max_retries: config.max_retries,
        })
    }

    async fn post_json(&self, url: &str, body: &Value) -> HarnessResult<Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json::<Value>().await.map_err(|e| {
                            HarnessError::provider(format!("invalid response body: {}", e))
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err =
                        HarnessError::provider(format!("API error {}: {}", status, body_text));

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(%url, %status, attempt, "provider call failed, retrying");
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) => {
                    tracing::warn!(%url, error = %e, attempt, "provider request failed");
                    last_err = Some(HarnessError::provider(e.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| HarnessError::provider("request failed after retries")))
    }

    async fn complete(&self, body: Value) -> HarnessResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let json = self.post_json(&url, &body).await?;
        parse_completion_response(&json)
    }
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> HarnessResult<String> {
        self.complete(json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
        }))
        .await
    }

    async fn vision_chat(
        &self,
        model: &str,
        images: &[ImageInput],
        prompt: &str,
        max_tokens: u32,
    ) -> HarnessResult<String> {
        let mut content: Vec<Value> = images.iter().map(image_content_part).collect();
        content.push(json!({"type": "text", "text": prompt}));

        self.complete(json!({
            "model": model,
            "messages": [{"role": "user", "content": content}],
            "max_tokens": max_tokens,
        }))
        .await
    }

    async fn ocr_parse(&self, bytes: &[u8], file_type: OcrFileType) -> HarnessResult<OcrOutcome> {
        let url = self
            .ocr_url
            .as_deref()
            .ok_or_else(|| HarnessError::provider("provider.ocr_url is not configured"))?;

        let form = json!({
            "image_base64": base64::engine::general_purpose::STANDARD.encode(bytes),
            "image_url": "",
            "version": "v3",
            "file_type": file_type.as_str(),
            "page_start": 0,
            "page_num": 1,
            "parse_mode": "auto",
            "table_mode": "markdown",
            "filter_header": "true",
        });

        let response = self.post_json(url, &form).await?;
        parse_ocr_response(response)
    }
}

/// Builds a `data:` URL content part for one image.
fn image_content_part(image: &ImageInput) -> Value {
    let encoded = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
    json!({
        "type": "image_url",
        "image_url": {"url": format!("data:{};base64,{}", image.mime_type, encoded)},
    })
}

/// Extracts `choices[0].message.content` from a chat-completions response.
fn parse_completion_response(json: &Value) -> HarnessResult<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HarnessError::provider("invalid completion response: missing content"))
}

/// Interprets an OCR response of the form `{data: {markdown, detail}}`.
///
/// `detail` carries the page list either as a JSON string or inline.
fn parse_ocr_response(response: Value) -> HarnessResult<OcrOutcome> {
    let data = match response.get("data") {
        Some(data) if !data.is_null() => data,
        _ => return Ok(OcrOutcome::NoData { raw: response }),
    };

    let markdown = data
        .get("markdown")
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string();

    let pages: ParseResult = match data.get("detail") {
        Some(Value::String(detail)) => serde_json::from_str(detail)
            .map_err(|e| HarnessError::provider(format!("invalid OCR detail: {}", e)))?,
        Some(detail) if detail.is_array() => serde_json::from_value(detail.clone())
            .map_err(|e| HarnessError::provider(format!("invalid OCR detail: {}", e)))?,
        _ => return Ok(OcrOutcome::NoData { raw: response }),
    };

    Ok(OcrOutcome::Parsed { markdown, pages })
}

/// MIME type the vision channel sends for a file extension.
pub fn image_mime_type(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" | "apng" => "image/png",
        "gif" => "image/gif",
        _ => "image/png",
    }
}

/// Create the [`Provider`] selected by configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAiCompatibleProvider`] |
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config.kind.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAiCompatibleProvider::new(config)?)),
        other => bail!("Unknown provider kind: {}", other),
    }
}
