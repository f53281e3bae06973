//! Environment configuration.
//!
//! Credentials and transport settings come from the process environment
//! (including `.env` files). User preferences such as language and prompt
//! template live in [`crate::settings::Settings`] instead.

use crate::error::{AppError, Result};
use crate::providers::ProviderKind;
use dotenvy::dotenv;
use serde::Serialize;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DECODE_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_OPENROUTER_REFERER: &str = "https://wecircle-assistent.vercel.app";
pub const DEFAULT_USER: &str = "local";

#[derive(Clone, Debug)]
pub struct Config {
    api_keys: HashMap<ProviderKind, String>,
    base_urls: HashMap<ProviderKind, String>,
    /// Provider override; takes precedence over the persisted settings.
    pub provider: Option<ProviderKind>,
    /// Model override; takes precedence over the persisted settings.
    pub model: Option<String>,
    pub request_timeout: Duration,
    pub decode_timeout: Duration,
    pub openrouter_referer: String,
    pub sync_url: Option<String>,
    pub sync_token: Option<String>,
    pub user_id: String,
}

/// Whether a provider's backend credential is present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub provider: ProviderKind,
    pub has_key: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists, ignore if it doesn't
        let _ = dotenv();

        let mut builder = Self::builder();
        for kind in ProviderKind::ALL {
            if let Some(key) = non_empty_var(kind.env_key()) {
                builder = builder.with_api_key(kind, key);
            }
        }

        if let Some(provider) = non_empty_var("SNAPLIST_PROVIDER") {
            builder = builder.with_provider(ProviderKind::from_str(&provider)?);
        }
        if let Some(model) = non_empty_var("SNAPLIST_MODEL") {
            builder = builder.with_model(model);
        }
        if let Some(secs) = non_empty_var("SNAPLIST_REQUEST_TIMEOUT_SECS") {
            builder = builder.with_request_timeout(parse_secs("SNAPLIST_REQUEST_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = non_empty_var("SNAPLIST_DECODE_TIMEOUT_SECS") {
            builder = builder.with_decode_timeout(parse_secs("SNAPLIST_DECODE_TIMEOUT_SECS", &secs)?);
        }
        if let Some(referer) = non_empty_var("OPENROUTER_REFERER") {
            builder = builder.with_openrouter_referer(referer);
        }
        if let Some(url) = non_empty_var("SNAPLIST_SYNC_URL") {
            builder = builder.with_sync(url, non_empty_var("SNAPLIST_SYNC_TOKEN"));
        }
        if let Some(user) = non_empty_var("SNAPLIST_USER") {
            builder = builder.with_user(user);
        }

        builder.build()
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Returns the credential for `kind`, or a `MissingEnvVar` error naming
    /// the variable that should hold it.
    pub fn api_key(&self, kind: ProviderKind) -> Result<&str> {
        self.api_keys
            .get(&kind)
            .map(String::as_str)
            .ok_or_else(|| AppError::MissingEnvVar(kind.env_key().to_string()))
    }

    /// Base URL for `kind`, honouring overrides.
    pub fn base_url(&self, kind: ProviderKind) -> &str {
        self.base_urls
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.default_base_url())
    }

    /// Reports, for each known provider, whether its credential is present.
    pub fn provider_statuses(&self) -> Vec<ProviderStatus> {
        ProviderKind::ALL
            .iter()
            .map(|kind| ProviderStatus {
                provider: *kind,
                has_key: self.api_keys.contains_key(kind),
            })
            .collect()
    }
}

#[derive(Default)]
pub struct ConfigBuilder {
    api_keys: HashMap<ProviderKind, String>,
    base_urls: HashMap<ProviderKind, String>,
    provider: Option<ProviderKind>,
    model: Option<String>,
    request_timeout: Option<Duration>,
    decode_timeout: Option<Duration>,
    openrouter_referer: Option<String>,
    sync_url: Option<String>,
    sync_token: Option<String>,
    user_id: Option<String>,
}

impl ConfigBuilder {
    pub fn with_api_key(mut self, kind: ProviderKind, key: impl Into<String>) -> Self {
        let key = key.into();
        if key.trim().is_empty() {
            self.api_keys.remove(&kind);
        } else {
            self.api_keys.insert(kind, key);
        }
        self
    }

    pub fn with_base_url(mut self, kind: ProviderKind, url: impl Into<String>) -> Self {
        self.base_urls.insert(kind, url.into());
        self
    }

    pub fn with_provider(mut self, kind: ProviderKind) -> Self {
        self.provider = Some(kind);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_decode_timeout(mut self, timeout: Duration) -> Self {
        self.decode_timeout = Some(timeout);
        self
    }

    pub fn with_openrouter_referer(mut self, referer: impl Into<String>) -> Self {
        self.openrouter_referer = Some(referer.into());
        self
    }

    pub fn with_sync(mut self, url: impl Into<String>, token: Option<String>) -> Self {
        self.sync_url = Some(url.into());
        self.sync_token = token;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user_id = Some(user.into());
        self
    }

    pub fn build(self) -> Result<Config> {
        for url in self.base_urls.values().chain(self.sync_url.iter()) {
            url::Url::parse(url).map_err(|e| AppError::config(format!("Invalid URL '{}': {}", url, e)))?;
        }

        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let decode_timeout = self.decode_timeout.unwrap_or(DEFAULT_DECODE_TIMEOUT);
        if request_timeout.is_zero() || decode_timeout.is_zero() {
            return Err(AppError::config("Timeouts must be greater than zero"));
        }

        Ok(Config {
            api_keys: self.api_keys,
            base_urls: self.base_urls,
            provider: self.provider,
            model: self.model,
            request_timeout,
            decode_timeout,
            openrouter_referer: self
                .openrouter_referer
                .unwrap_or_else(|| DEFAULT_OPENROUTER_REFERER.to_string()),
            sync_url: self.sync_url,
            sync_token: self.sync_token,
            user_id: self.user_id.unwrap_or_else(|| DEFAULT_USER.to_string()),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_secs(name: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| AppError::config(format!("{} must be a whole number of seconds", name)))
}
