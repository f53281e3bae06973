//! Google Gemini backend built on `gemini-rust`.
//!
//! The request asks for `application/json` output constrained by
//! [`response_schema`]. The grounded search tool is not attached because the
//! API rejects it together with a response schema.

use super::schema::{interpret_reply, response_schema};
use super::{AnalysisRequest, AnalyzeResponse, ProviderKind, Usage, VisionProvider};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::image_processing::parse_data_url;
use async_trait::async_trait;
use gemini_rust::{Blob, Content, Gemini, Message, Part, Role};
use serde_json::Value;
use tracing::debug;

/// Finish and block reasons that mean the content was withheld on safety grounds.
const SAFETY_REASONS: &[&str] = &[
    "SAFETY",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
    "IMAGE_SAFETY",
];

pub struct GeminiProvider {
    api_key: String,
    base_url: url::Url,
}

impl GeminiProvider {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.api_key(ProviderKind::Google)?.to_string();
        let mut raw = config.base_url(ProviderKind::Google).to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = url::Url::parse(&raw).map_err(|e| AppError::config(format!("Invalid base URL: {}", e)))?;
        Ok(Self { api_key, base_url })
    }

    /// The client is bound to a model, so one is built per request.
    fn client(&self, model: &str) -> Result<Gemini> {
        let model_name = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        let model_url = format!("{}{}", self.base_url, model_name);

        Gemini::with_model_and_base_url(&self.api_key, model_url, self.base_url.clone())
            .map_err(|e| AppError::config(format!("Failed to create Gemini client: {}", e)))
    }

    fn message(request: &AnalysisRequest) -> Result<Message> {
        let mut parts = vec![Part::Text {
            text: request.prompt.clone(),
            thought: None,
            thought_signature: None,
        }];
        for url in &request.images {
            let (mime_type, data) = parse_data_url(url)?;
            parts.push(Part::InlineData {
                inline_data: Blob {
                    mime_type,
                    data: data.to_string(),
                },
                media_resolution: None,
            });
        }

        Ok(Message {
            role: Role::User,
            content: Content {
                role: Some(Role::User),
                parts: Some(parts),
            },
        })
    }
}

/// Text, safety indicator and usage extracted from a Gemini response.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct GeminiReply {
    pub text: String,
    pub safety_block: Option<String>,
    pub usage: Option<Usage>,
}

/// Reads the reply out of the JSON form of a `generateContent` response.
pub(crate) fn reply_from_gemini_json(response: &Value) -> GeminiReply {
    let candidate = response.pointer("/candidates/0");

    let text = candidate
        .and_then(|c| c.pointer("/content/parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| !p.get("thought").and_then(Value::as_bool).unwrap_or(false))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let finish = candidate
        .and_then(|c| c.get("finishReason"))
        .and_then(Value::as_str);
    let blocked = response
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str);
    let safety_block = [blocked, finish]
        .into_iter()
        .flatten()
        .find(|reason| SAFETY_REASONS.contains(&reason.to_ascii_uppercase().as_str()))
        .map(str::to_string);

    let usage = response.get("usageMetadata").map(|meta| Usage {
        prompt_tokens: meta.get("promptTokenCount").and_then(Value::as_u64),
        completion_tokens: meta.get("candidatesTokenCount").and_then(Value::as_u64),
        total_tokens: meta.get("totalTokenCount").and_then(Value::as_u64),
        cost_usd: None,
    });

    GeminiReply {
        text,
        safety_block,
        usage,
    }
}

/// Maps a `gemini-rust` client failure onto an analysis error.
fn classify_client_error(message: String) -> AppError {
    match status_in(&message) {
        Some(status) => AppError::api(status, format!("Gemini request failed: {}", message)),
        None => AppError::network(format!("Gemini request failed: {}", message)),
    }
}

/// Finds an HTTP status code in a client error description.
fn status_in(message: &str) -> Option<u16> {
    let idx = message.find("code: ").or_else(|| message.find("status: "))?;
    let rest = &message[idx..];
    let digits: String = rest
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok().filter(|s| (100..600).contains(s))
}

#[async_trait]
impl VisionProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalyzeResponse> {
        let message = Self::message(request)?;
        let client = self.client(&request.model)?;

        let response = client
            .generate_content()
            .with_messages(vec![message])
            .with_temperature(0.1)
            .with_response_mime_type("application/json")
            .with_response_schema(response_schema())
            .execute()
            .await
            .map_err(|e| classify_client_error(format!("{:?}", e)))?;

        let json = serde_json::to_value(&response)?;
        let reply = reply_from_gemini_json(&json);
        debug!(safety = ?reply.safety_block, chars = reply.text.len(), "gemini response received");

        let result = interpret_reply(
            ProviderKind::Google.display_name(),
            &reply.text,
            reply.safety_block.as_deref(),
        )?;
        Ok(AnalyzeResponse {
            result,
            usage: reply.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn joins_text_parts_and_skips_thoughts() {
        let response = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "thinking...", "thought": true },
                    { "text": "{\"description\":\"Vase\"," },
                    { "text": "\"price\":90}" }
                ] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 500, "candidatesTokenCount": 20, "totalTokenCount": 520 }
        });

        let reply = reply_from_gemini_json(&response);
        assert_eq!(reply.text, "{\"description\":\"Vase\",\"price\":90}");
        assert_eq!(reply.safety_block, None);
        assert_eq!(reply.usage.unwrap().total_tokens, Some(520));
    }

    #[test]
    fn safety_finish_reason_is_reported() {
        let response = json!({ "candidates": [{ "finishReason": "SAFETY" }] });
        assert_eq!(reply_from_gemini_json(&response).safety_block.as_deref(), Some("SAFETY"));

        let blocked = json!({ "promptFeedback": { "blockReason": "PROHIBITED_CONTENT" } });
        let reply = reply_from_gemini_json(&blocked);
        assert_eq!(reply.safety_block.as_deref(), Some("PROHIBITED_CONTENT"));
        assert!(reply.text.is_empty());
    }

    #[test]
    fn client_errors_with_a_status_are_api_errors() {
        match classify_client_error("BadResponse { code: 429, description: None }".to_string()) {
            AppError::Analysis { status, .. } => assert_eq!(status, Some(429)),
            other => panic!("unexpected: {other}"),
        }
        assert_eq!(
            classify_client_error("PerformRequest { source: connect error }".to_string()).analysis_kind(),
            Some(crate::error::AnalysisErrorKind::Network)
        );
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let config = Config::builder()
            .with_api_key(ProviderKind::Google, "g-key")
            .with_base_url(ProviderKind::Google, "http://127.0.0.1:9/v1beta")
            .build()
            .unwrap();
        let provider = GeminiProvider::new(&config).unwrap();
        assert_eq!(provider.base_url.as_str(), "http://127.0.0.1:9/v1beta/");
        assert!(provider.client("gemini-2.5-flash").is_ok());
    }
}
