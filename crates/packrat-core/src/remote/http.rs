//! PostgREST-style HTTP implementation of [`RemoteStore`].

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::util::{compact_text, is_http_url, normalize_text_option};

use super::{RemoteStore, RowFilter};

/// Connection settings for the hosted row store.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base REST endpoint, e.g. `https://project.example.co/rest/v1`
    pub rest_url: String,
    /// Public API key sent with every request.
    pub api_key: String,
    /// Per-user bearer token; row policies are enforced against it.
    pub bearer_token: Option<String>,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("rest_url", &self.rest_url)
            .field("api_key", &"[REDACTED]")
            .field("bearer_token", &"[REDACTED]")
            .finish()
    }
}

impl RemoteConfig {
    /// Read the remote configuration from `PACKRAT_API_URL`,
    /// `PACKRAT_API_KEY`, and optionally `PACKRAT_API_TOKEN`.
    ///
    /// Returns `None` when no remote is configured (local-only mode).
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let rest_url = normalize_text_option(std::env::var("PACKRAT_API_URL").ok())?;
        let api_key = normalize_text_option(std::env::var("PACKRAT_API_KEY").ok())?;
        Some(Self {
            rest_url,
            api_key,
            bearer_token: normalize_text_option(std::env::var("PACKRAT_API_TOKEN").ok()),
        })
    }
}

/// HTTP [`RemoteStore`] speaking the PostgREST filter/order dialect.
#[derive(Debug, Clone)]
pub struct PostgrestRemoteStore {
    base_url: String,
    config: RemoteConfig,
    client: reqwest::Client,
}

impl PostgrestRemoteStore {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let base_url = normalize_base_url(&config.rest_url)?;
        Ok(Self {
            base_url,
            config,
            client: reqwest::Client::builder().build()?,
        })
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}/{table}", self.base_url))
            .header("apikey", &self.config.api_key)
            .header("Accept", "application/json");
        if let Some(token) = &self.config.bearer_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }
}

impl RemoteStore for PostgrestRemoteStore {
    async fn select_since(
        &self,
        table: &str,
        filter: &RowFilter,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>> {
        let mut query: Vec<(String, String)> = vec![
            ("select".to_string(), "*".to_string()),
            ("order".to_string(), "updated_at.asc".to_string()),
        ];
        if let Some(user_id) = &filter.user_id {
            query.push(("user_id".to_string(), format!("eq.{user_id}")));
        }
        if let Some(trip_ids) = &filter.trip_ids {
            query.push(("trip_id".to_string(), format!("in.({})", trip_ids.join(","))));
        }
        if let Some(since) = since {
            query.push(("updated_at".to_string(), format!("gt.{}", since.to_rfc3339())));
        }

        let response = self
            .request(reqwest::Method::GET, table)
            .query(&query)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn upsert(&self, table: &str, row: Value) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, table)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row])
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<()> {
        let response = self
            .request(reqwest::Method::PATCH, table)
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=minimal")
            .json(&patch)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn probe(&self) -> bool {
        self.request(reqwest::Method::HEAD, "")
            .send()
            .await
            .is_ok()
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    error: Option<String>,
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = parse_api_error(status, &body);

    // Row-policy and auth rejections are logged distinctly by the push
    // pipeline but handled like any other retriable failure.
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(Error::PolicyRejection(message))
    } else {
        Err(Error::Remote(message))
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let url = normalize_text_option(Some(raw.to_string()))
        .ok_or_else(|| Error::InvalidInput("remote URL must not be empty".to_string()))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "remote URL must include http:// or https://".to_string(),
        ))
    }
}
