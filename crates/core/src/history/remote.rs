//! REST item store used as the sync target.
//!
//! | operation | request                      |
//! |-----------|------------------------------|
//! | list      | `GET    {base}/items?user=…`      |
//! | save      | `PUT    {base}/items/{id}?user=…` |
//! | delete    | `DELETE {base}/items/{id}?user=…` |
//!
//! Requests carry a bearer token when one is configured.

use super::{ItemStore, ListingItem, sort_newest_first};
use crate::config::Config;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, instrument};
use url::Url;

pub struct RemoteItemStore {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
    user: String,
}

impl RemoteItemStore {
    pub fn new(config: &Config, base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| AppError::config(format!("Invalid sync URL '{}': {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(AppError::config(format!("Sync URL '{}' cannot be a base", base_url)));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base,
            token: config.sync_token.clone(),
            user: config.user_id.clone(),
        })
    }

    /// Remote store for the configured sync URL, if any.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        config.sync_url.as_deref().map(|url| Self::new(config, url)).transpose()
    }

    fn items_url(&self, id: Option<&str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("items");
            if let Some(id) = id {
                segments.push(id);
            }
        }
        url.query_pairs_mut().append_pair("user", &self.user);
        url
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| AppError::storage(format!("Sync backend unreachable while {}: {}", what, e)))?;
        let status = response.status();
        if status.is_success() || (status == StatusCode::NOT_FOUND && what == "deleting") {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AppError::storage(format!(
            "Sync backend returned HTTP {} while {}: {}",
            status,
            what,
            body.trim()
        )))
    }
}

#[async_trait]
impl ItemStore for RemoteItemStore {
    #[instrument(skip(self), fields(user = %self.user))]
    async fn list(&self) -> Result<Vec<ListingItem>> {
        let response = self
            .send(self.request(reqwest::Method::GET, self.items_url(None)), "listing")
            .await?;
        let mut items: Vec<ListingItem> = response
            .json()
            .await
            .map_err(|e| AppError::storage(format!("Sync backend returned an unexpected list: {}", e)))?;
        sort_newest_first(&mut items);
        debug!(count = items.len(), "remote items listed");
        Ok(items)
    }

    #[instrument(skip(self, item), fields(user = %self.user, id = %item.id))]
    async fn save(&self, item: &ListingItem) -> Result<()> {
        let builder = self
            .request(reqwest::Method::PUT, self.items_url(Some(&item.id)))
            .json(item);
        self.send(builder, "saving").await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user = %self.user))]
    async fn delete(&self, id: &str) -> Result<()> {
        self.send(self.request(reqwest::Method::DELETE, self.items_url(Some(id))), "deleting")
            .await?;
        Ok(())
    }
}
