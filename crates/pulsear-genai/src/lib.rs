//! Gemini generative-text adapter.
//!
//! Implements the core's [`TextGenerator`] seam against the Gemini
//! `generateContent` REST endpoint. When a scene photo is supplied it is
//! sent as an `inline_data` JPEG part ahead of the text prompt. The client
//! reports failures faithfully and never retries; deadlines and retry
//! policy belong to the suggestion engine.

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};

use pulsear_core::{GenerateError, TextGenerator};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
/// Upper bound on error-body text kept for diagnostics.
const MAX_ERROR_BODY: usize = 300;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    /// Model name, e.g. "gemini-2.0-flash".
    pub model: String,
    /// API base; overridable for tests and proxies.
    pub endpoint: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

/// Gemini `generateContent` client.
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn request_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }

    /// Single-turn request body: optional JPEG part first, then the prompt.
    fn build_request_body(prompt: &str, image_jpeg: Option<&[u8]>) -> Value {
        let mut parts = Vec::new();
        if let Some(bytes) = image_jpeg {
            parts.push(json!({
                "inline_data": {
                    "mime_type": "image/jpeg",
                    "data": base64::engine::general_purpose::STANDARD.encode(bytes),
                }
            }));
        }
        parts.push(json!({ "text": prompt }));

        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }]
        })
    }

    /// Concatenated text of the first candidate's parts.
    fn extract_text(body: &Value) -> Option<String> {
        let parts = body
            .get("candidates")?
            .get(0)?
            .get("content")?
            .get("parts")?
            .as_array()?;

        let mut text = String::new();
        for part in parts {
            if let Some(t) = part.get("text").and_then(Value::as_str) {
                text.push_str(t);
            }
        }
        let text = text.trim().to_string();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        image_jpeg: Option<&[u8]>,
    ) -> Result<String, GenerateError> {
        let body = Self::build_request_body(prompt, image_jpeg);

        tracing::debug!(
            model = %self.config.model,
            with_image = image_jpeg.is_some(),
            prompt_chars = prompt.len(),
            "calling generative service"
        );

        let response = self
            .http
            .post(self.request_url())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerateError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            message.truncate(
                message
                    .char_indices()
                    .nth(MAX_ERROR_BODY)
                    .map(|(i, _)| i)
                    .unwrap_or(message.len()),
            );
            return Err(GenerateError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GenerateError::Transport(e.to_string()))?;

        Self::extract_text(&body).ok_or(GenerateError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_text_only() {
        let body = GeminiClient::build_request_body("help them", None);
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["text"], "help them");
    }

    #[test]
    fn test_request_body_image_part_comes_first() {
        let body = GeminiClient::build_request_body("help them", Some(&[0xff, 0xd8, 0xff]));
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["inline_data"]["mime_type"], "image/jpeg");
        assert_eq!(
            parts[0]["inline_data"]["data"],
            base64::engine::general_purpose::STANDARD.encode([0xff, 0xd8, 0xff])
        );
        assert_eq!(parts[1]["text"], "help them");
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let body = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "Apply pressure. " },
                        { "text": "Call for help." }
                    ]
                }
            }]
        });
        assert_eq!(
            GeminiClient::extract_text(&body).unwrap(),
            "Apply pressure. Call for help."
        );
    }

    #[test]
    fn test_extract_text_empty_response() {
        assert!(GeminiClient::extract_text(&json!({})).is_none());
        assert!(GeminiClient::extract_text(&json!({ "candidates": [] })).is_none());
        let blank = json!({
            "candidates": [{ "content": { "parts": [{ "text": "  " }] } }]
        });
        assert!(GeminiClient::extract_text(&blank).is_none());
    }

    #[test]
    fn test_request_url() {
        let client = GeminiClient::new(GeminiConfig {
            api_key: "k".into(),
            model: "gemini-2.0-flash".into(),
            endpoint: "https://example.test/v1beta/".into(),
        });
        assert_eq!(
            client.request_url(),
            "https://example.test/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }
}
