//! OpenAI-compatible chat-completions backend.
//!
//! OpenAI, xAI and OpenRouter share the same wire format and differ only in
//! base URL, extra headers, system prompt and whether `response_format`
//! with a JSON schema is accepted.

use super::schema::{interpret_reply, strict_response_schema};
use super::{AnalysisRequest, AnalyzeResponse, ProviderKind, Usage, VisionProvider, error_for_status, http_client};
use crate::config::Config;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a resale pricing analyst. Respond ONLY with compact JSON containing the requested fields.";
const GROK_SYSTEM_PROMPT: &str =
    "You are Grok assisting resale experts. Always answer strictly with JSON using the provided fields.";
const OPENROUTER_TITLE: &str = "WeCircle Assistent";
const TEMPERATURE: f64 = 0.1;

pub struct OpenAiCompatible {
    kind: ProviderKind,
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    headers: Vec<(&'static str, String)>,
    system_prompt: &'static str,
    use_schema: bool,
}

impl OpenAiCompatible {
    /// OpenAI proper: strict JSON schema output.
    pub fn openai(config: &Config) -> Result<Self> {
        Self::build(ProviderKind::OpenAi, config, DEFAULT_SYSTEM_PROMPT, true, Vec::new())
    }

    pub fn xai(config: &Config) -> Result<Self> {
        Self::build(ProviderKind::Xai, config, GROK_SYSTEM_PROMPT, false, Vec::new())
    }

    /// OpenRouter requires attribution headers.
    pub fn openrouter(config: &Config) -> Result<Self> {
        let headers = vec![
            ("HTTP-Referer", config.openrouter_referer.clone()),
            ("X-Title", OPENROUTER_TITLE.to_string()),
        ];
        Self::build(ProviderKind::OpenRouter, config, DEFAULT_SYSTEM_PROMPT, false, headers)
    }

    fn build(
        kind: ProviderKind,
        config: &Config,
        system_prompt: &'static str,
        use_schema: bool,
        headers: Vec<(&'static str, String)>,
    ) -> Result<Self> {
        let api_key = config.api_key(kind)?.to_string();
        Ok(Self {
            kind,
            client: http_client(config)?,
            endpoint: format!("{}/chat/completions", config.base_url(kind).trim_end_matches('/')),
            api_key,
            headers,
            system_prompt,
            use_schema,
        })
    }

    fn request_body(&self, request: &AnalysisRequest) -> Value {
        let mut user_content = vec![json!({ "type": "text", "text": request.prompt })];
        user_content.extend(
            request
                .images
                .iter()
                .map(|url| json!({ "type": "image_url", "image_url": { "url": url } })),
        );

        let mut body = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": user_content },
            ],
            "temperature": TEMPERATURE,
        });

        if self.use_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": "ListingAnalysis", "strict": true, "schema": strict_response_schema() },
            });
        }
        body
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChatMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<Value>,
    refusal: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
    cost: Option<f64>,
}

/// Message content may be a plain string or a list of typed parts.
fn content_to_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
        _ => String::new(),
    }
}

/// Safety indicator of a completion: a content filter stop or a refusal.
fn safety_block(choice: &Choice) -> Option<String> {
    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Some("content_filter".to_string());
    }
    choice
        .message
        .as_ref()
        .and_then(|m| m.refusal.as_deref())
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl VisionProvider for OpenAiCompatible {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalyzeResponse> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request));
        for (name, value) in &self.headers {
            builder = builder.header(*name, value);
        }

        let response = error_for_status(self.kind, builder.send().await?).await?;
        let raw = response.text().await?;
        let completion: ChatCompletion = serde_json::from_str(&raw).map_err(|e| {
            AppError::parse(format!("{} returned an unexpected format: {}", self.kind.display_name(), e))
        })?;
        debug!(provider = %self.kind, choices = completion.choices.len(), "chat completion received");

        let choice = completion.choices.first();
        let text = choice
            .and_then(|c| c.message.as_ref())
            .map(|m| content_to_text(m.content.as_ref()))
            .unwrap_or_default();
        let block = choice.and_then(safety_block);

        let result = interpret_reply(self.kind.display_name(), &text, block.as_deref())?;
        let usage = completion.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
            cost_usd: u.cost,
        });

        Ok(AnalyzeResponse { result, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisErrorKind;
    use mockito::{Matcher, Server};

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            images: vec!["data:image/jpeg;base64,AAAA".to_string()],
            prompt: "Identify the item".to_string(),
            model: "test-model".to_string(),
        }
    }

    fn config_for(kind: ProviderKind, url: &str) -> Config {
        Config::builder()
            .with_api_key(kind, "secret")
            .with_base_url(kind, url)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn openrouter_sends_attribution_and_parses_fenced_reply() {
        let mut server = Server::new_async().await;
        let body = json!({
            "choices": [{
                "message": { "content": "```json\n{\"description\":\"Stol\",\"price\":200}\n```" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 900, "completion_tokens": 40, "total_tokens": 940, "cost": 0.0012 }
        });
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer secret")
            .match_header("x-title", OPENROUTER_TITLE)
            .match_body(Matcher::PartialJson(json!({ "model": "test-model", "temperature": 0.1 })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let provider = OpenAiCompatible::openrouter(&config_for(ProviderKind::OpenRouter, &server.url())).unwrap();
        let response = provider.analyze(&request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.result.description, "Stol");
        assert_eq!(response.result.price, 200.0);
        let usage = response.usage.unwrap();
        assert_eq!(usage.total_tokens, Some(940));
        assert_eq!(usage.cost_usd, Some(0.0012));
    }

    #[tokio::test]
    async fn openai_requests_strict_schema() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({
                "response_format": {
                    "type": "json_schema",
                    "json_schema": {
                        "name": "ListingAnalysis",
                        "strict": true,
                        "schema": { "additionalProperties": false }
                    }
                }
            })))
            .with_status(200)
            .with_body(
                json!({ "choices": [{ "message": { "content": [{ "type": "text", "text": "{\"description\":\"Lamp\",\"price\":75}" }] } }] })
                    .to_string(),
            )
            .create_async()
            .await;

        let provider = OpenAiCompatible::openai(&config_for(ProviderKind::OpenAi, &server.url())).unwrap();
        let response = provider.analyze(&request()).await.unwrap();
        mock.assert_async().await;
        assert_eq!(response.result.price, 75.0);
        assert!(response.usage.is_none());
    }

    #[tokio::test]
    async fn content_filter_is_a_safety_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(json!({ "choices": [{ "message": { "content": null }, "finish_reason": "content_filter" }] }).to_string())
            .create_async()
            .await;

        let provider = OpenAiCompatible::xai(&config_for(ProviderKind::Xai, &server.url())).unwrap();
        let err = provider.analyze(&request()).await.unwrap_err();
        assert_eq!(err.analysis_kind(), Some(AnalysisErrorKind::Safety));
    }

    #[tokio::test]
    async fn non_success_status_is_an_api_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("invalid api key")
            .create_async()
            .await;

        let provider = OpenAiCompatible::openai(&config_for(ProviderKind::OpenAi, &server.url())).unwrap();
        match provider.analyze(&request()).await {
            Err(AppError::Analysis { kind, status, message }) => {
                assert_eq!(kind, AnalysisErrorKind::Api);
                assert_eq!(status, Some(401));
                assert!(message.contains("invalid api key"));
            }
            other => panic!("unexpected: {:?}", other.map(|r| r.result)),
        }
    }

    #[tokio::test]
    async fn garbage_body_is_a_parse_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body("<html>oops</html>")
            .create_async()
            .await;

        let provider = OpenAiCompatible::openai(&config_for(ProviderKind::OpenAi, &server.url())).unwrap();
        let err = provider.analyze(&request()).await.unwrap_err();
        assert_eq!(err.analysis_kind(), Some(AnalysisErrorKind::Parse));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        let config = config_for(ProviderKind::OpenAi, "http://127.0.0.1:9");
        let provider = OpenAiCompatible::openai(&config).unwrap();
        let err = provider.analyze(&request()).await.unwrap_err();
        assert_eq!(err.analysis_kind(), Some(AnalysisErrorKind::Network));
    }
}
