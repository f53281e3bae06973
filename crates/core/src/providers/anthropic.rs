//! Anthropic Messages API backend.

use super::schema::interpret_reply;
use super::{AnalysisRequest, AnalyzeResponse, ProviderKind, Usage, VisionProvider, error_for_status, http_client};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::image_processing::parse_data_url;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

const API_VERSION: &str = "2023-06-01";
// Room for a full description plus every similar link found.
const MAX_TOKENS: u32 = 2048;
const SYSTEM_PROMPT: &str =
    "You are a resale pricing analyst. Respond ONLY with compact JSON containing the requested fields.";

pub struct AnthropicProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.api_key(ProviderKind::Anthropic)?.to_string();
        Ok(Self {
            client: http_client(config)?,
            endpoint: format!(
                "{}/messages",
                config.base_url(ProviderKind::Anthropic).trim_end_matches('/')
            ),
            api_key,
        })
    }

    fn request_body(request: &AnalysisRequest) -> Result<Value> {
        let mut content = Vec::with_capacity(request.images.len() + 1);
        for url in &request.images {
            let (mime, data) = parse_data_url(url)?;
            content.push(json!({
                "type": "image",
                "source": { "type": "base64", "media_type": mime, "data": data },
            }));
        }
        content.push(json!({ "type": "text", "text": request.prompt }));

        Ok(json!({
            "model": request.model,
            "max_tokens": MAX_TOKENS,
            "temperature": 0.1,
            "system": SYSTEM_PROMPT,
            "messages": [{ "role": "user", "content": content }],
        }))
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[async_trait]
impl VisionProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalyzeResponse> {
        let body = Self::request_body(request)?;
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;
        let response = error_for_status(ProviderKind::Anthropic, response).await?;

        let raw = response.text().await?;
        let message: MessagesResponse = serde_json::from_str(&raw)
            .map_err(|e| AppError::parse(format!("Anthropic returned an unexpected format: {}", e)))?;
        debug!(stop_reason = ?message.stop_reason, blocks = message.content.len(), "anthropic message received");

        let text = message
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        let block = message.stop_reason.as_deref().filter(|r| *r == "refusal");

        let result = interpret_reply(ProviderKind::Anthropic.display_name(), &text, block)?;
        let usage = message.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: match (u.input_tokens, u.output_tokens) {
                (Some(i), Some(o)) => Some(i + o),
                _ => None,
            },
            cost_usd: None,
        });

        Ok(AnalyzeResponse { result, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisErrorKind;
    use mockito::{Matcher, Server};

    fn provider(url: &str) -> AnthropicProvider {
        let config = Config::builder()
            .with_api_key(ProviderKind::Anthropic, "sk-ant")
            .with_base_url(ProviderKind::Anthropic, url)
            .build()
            .unwrap();
        AnthropicProvider::new(&config).unwrap()
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            images: vec!["data:image/png;base64,iVBORw0K".to_string()],
            prompt: "Identify".to_string(),
            model: "claude-haiku-4-5".to_string(),
        }
    }

    #[tokio::test]
    async fn sends_base64_blocks_and_sums_usage() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/messages")
            .match_header("x-api-key", "sk-ant")
            .match_header("anthropic-version", API_VERSION)
            .match_body(Matcher::PartialJson(json!({
                "messages": [{ "role": "user", "content": [
                    { "type": "image", "source": { "type": "base64", "media_type": "image/png", "data": "iVBORw0K" } },
                    { "type": "text", "text": "Identify" }
                ] }]
            })))
            .with_status(200)
            .with_body(
                json!({
                    "content": [{ "type": "text", "text": "{\"description\":\"Jakke\",\"price\":\"350 kr\"}" }],
                    "stop_reason": "end_turn",
                    "usage": { "input_tokens": 1200, "output_tokens": 60 }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let response = provider(&server.url()).analyze(&request()).await.unwrap();
        mock.assert_async().await;
        assert_eq!(response.result.price, 350.0);
        assert_eq!(response.usage.unwrap().total_tokens, Some(1260));
    }

    #[test]
    fn request_leaves_room_for_links() {
        let body = AnthropicProvider::request_body(&request()).unwrap();
        assert!(body["max_tokens"].as_u64().unwrap() >= 2048);
        assert_eq!(body["system"], json!(SYSTEM_PROMPT));
    }

    #[tokio::test]
    async fn refusal_is_a_safety_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/messages")
            .with_status(200)
            .with_body(json!({ "content": [], "stop_reason": "refusal" }).to_string())
            .create_async()
            .await;

        let err = provider(&server.url()).analyze(&request()).await.unwrap_err();
        assert_eq!(err.analysis_kind(), Some(AnalysisErrorKind::Safety));
    }

    #[tokio::test]
    async fn malformed_image_fails_before_sending() {
        let server = Server::new_async().await;
        let mut bad = request();
        bad.images = vec!["not-a-data-url".to_string()];
        let err = provider(&server.url()).analyze(&bad).await.unwrap_err();
        assert_eq!(err.analysis_kind(), Some(AnalysisErrorKind::Format));
    }
}
