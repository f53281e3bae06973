//! Multimodal AI provider backends.
//!
//! Every backend implements [`VisionProvider`]: it takes the same
//! [`AnalysisRequest`] and returns the same normalised
//! [`AnalysisResult`]. What differs per backend (authentication, request
//! envelope, whether a strict output schema is supported, how refusals are
//! signalled) stays inside its module.
//!
//! | provider     | module        | envelope                     |
//! |--------------|---------------|------------------------------|
//! | `google`     | [`gemini`]    | inline data parts            |
//! | `openai`     | [`openai`]    | chat messages + json_schema  |
//! | `xai`        | [`openai`]    | chat messages, fenced JSON   |
//! | `openrouter` | [`openai`]    | chat messages, fenced JSON   |
//! | `anthropic`  | [`anthropic`] | messages with base64 blocks  |

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod schema;

pub use schema::{AnalysisResult, ItemField, is_missing_value};

use crate::config::Config;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies a provider backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    OpenAi,
    Anthropic,
    Xai,
    OpenRouter,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Google,
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Xai,
        ProviderKind::OpenRouter,
    ];

    pub const fn id(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Xai => "xai",
            Self::OpenRouter => "openrouter",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Google => "Google Gemini",
            Self::OpenAi => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Xai => "xAI",
            Self::OpenRouter => "OpenRouter",
        }
    }

    /// Environment variable holding the provider credential.
    pub const fn env_key(self) -> &'static str {
        match self {
            Self::Google => "GEMINI_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Xai => "XAI_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::Google => "https://generativelanguage.googleapis.com/v1beta/",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Xai => "https://api.x.ai/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    /// Catalogue of `(model id, display name)` offered for this provider.
    pub const fn models(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Google => &[
                ("gemini-2.5-flash", "Gemini 2.5 Flash"),
                ("gemini-2.5-pro", "Gemini 2.5 Pro"),
                ("gemini-flash-latest", "Gemini Flash (latest)"),
            ],
            Self::OpenAi => &[("gpt-4.1", "GPT-4.1"), ("gpt-4o-mini", "GPT-4o mini")],
            Self::Anthropic => &[
                ("claude-sonnet-4-5", "Claude Sonnet 4.5"),
                ("claude-haiku-4-5", "Claude Haiku 4.5"),
            ],
            Self::Xai => &[("grok-4-fast", "Grok 4 Fast"), ("grok-4", "Grok 4")],
            Self::OpenRouter => &[
                ("openai/gpt-4.1", "OpenAI GPT-4.1"),
                ("google/gemini-2.5-flash", "Google Gemini 2.5 Flash"),
                ("x-ai/grok-4.1-fast", "xAI Grok 4.1 Fast"),
                ("amazon/nova-2-lite-v1", "Amazon Nova 2 Lite v1"),
                (
                    "nvidia/nemotron-nano-12b-v2-vl:free",
                    "NVIDIA Nemotron Nano 12B v2 VL (Free)",
                ),
            ],
        }
    }

    pub fn default_model(self) -> &'static str {
        self.models()[0].0
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.id().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| AppError::config(format!("Provider '{}' is not supported", wanted)))
    }
}

/// One analysis call: images as data URLs, the full prompt and the model.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub images: Vec<String>,
    pub prompt: String,
    pub model: String,
}

/// Token and cost telemetry reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub cost_usd: Option<f64>,
}

/// Normalised result plus optional usage telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub result: AnalysisResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A multimodal backend that can turn photos and a prompt into a listing
/// analysis.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalyzeResponse>;
}

/// Builds the backend for `kind` using credentials from `config`.
///
/// # Errors
///
/// Returns [`AppError::MissingEnvVar`] when the credential is absent.
pub fn build_provider(kind: ProviderKind, config: &Config) -> Result<Box<dyn VisionProvider>> {
    let provider: Box<dyn VisionProvider> = match kind {
        ProviderKind::Google => Box::new(gemini::GeminiProvider::new(config)?),
        ProviderKind::OpenAi => Box::new(openai::OpenAiCompatible::openai(config)?),
        ProviderKind::Xai => Box::new(openai::OpenAiCompatible::xai(config)?),
        ProviderKind::OpenRouter => Box::new(openai::OpenAiCompatible::openrouter(config)?),
        ProviderKind::Anthropic => Box::new(anthropic::AnthropicProvider::new(config)?),
    };
    Ok(provider)
}

/// Shared HTTP client for the REST backends.
pub(crate) fn http_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| AppError::config(format!("Failed to build HTTP client: {}", e)))
}

/// Turns a non-2xx response into an `api` error carrying the body text.
pub(crate) async fn error_for_status(provider: ProviderKind, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        format!("{} returned HTTP {}", provider.display_name(), status)
    } else {
        format!("{} returned HTTP {}: {}", provider.display_name(), status, body.trim())
    };
    Err(AppError::api(status.as_u16(), message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for kind in ProviderKind::ALL {
            assert_eq!(ProviderKind::from_str(kind.id()).unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.id()));
        }
        assert_eq!(ProviderKind::from_str(" OpenRouter ").unwrap(), ProviderKind::OpenRouter);
    }

    #[test]
    fn building_without_key_fails() {
        let config = Config::builder().build().unwrap();
        for kind in ProviderKind::ALL {
            match build_provider(kind, &config) {
                Err(AppError::MissingEnvVar(var)) => assert_eq!(var, kind.env_key()),
                Err(other) => panic!("unexpected error for {}: {}", kind, other),
                Ok(_) => panic!("{} built without a key", kind),
            }
        }
    }
}
