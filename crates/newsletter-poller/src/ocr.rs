//! OCR backends used to read times off invitation images.

use crate::config::OcrConfig;
use crate::error::PipelineError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;

/// Image bytes in, best-effort text out
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<String, PipelineError>;
}

/// Used when no OCR backend is configured; every image fails.
pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    async fn recognize(&self, _image: &[u8]) -> Result<String, PipelineError> {
        Err(PipelineError::Ocr("no OCR backend configured".to_string()))
    }
}

/// Google Cloud Vision `TEXT_DETECTION` over the REST API
pub struct VisionOcr {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageAnnotation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageAnnotation {
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    full_text_annotation: Option<FullText>,
    error: Option<VisionStatus>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct FullText {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct VisionStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

impl VisionOcr {
    pub fn new(config: &OcrConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create OCR HTTP client")?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl OcrEngine for VisionOcr {
    async fn recognize(&self, image: &[u8]) -> Result<String, PipelineError> {
        let body = serde_json::json!({
            "requests": [{
                "image": { "content": STANDARD.encode(image) },
                "features": [{ "type": "TEXT_DETECTION" }],
            }]
        });

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::Ocr(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(200).collect();
            return Err(PipelineError::Ocr(format!(
                "Vision API returned {}: {}",
                status, detail
            )));
        }

        let parsed: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Ocr(format!("unreadable Vision response: {}", e)))?;

        let annotation = parsed
            .responses
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Ocr("empty Vision response".to_string()))?;

        if let Some(err) = annotation.error {
            return Err(PipelineError::Ocr(format!("{} (code {})", err.message, err.code)));
        }

        let text = annotation
            .text_annotations
            .into_iter()
            .next()
            .map(|a| a.description)
            .or_else(|| annotation.full_text_annotation.map(|f| f.text))
            .unwrap_or_default();

        if text.trim().is_empty() {
            tracing::warn!("Vision OCR found no text");
        } else {
            tracing::debug!("Vision OCR text: {}", text.chars().take(200).collect::<String>());
        }

        Ok(text)
    }
}
