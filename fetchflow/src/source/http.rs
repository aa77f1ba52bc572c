//! HTTP implementation of [`RemoteSource`] for a Discourse-style forum.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::RemoteSource;
use crate::config::SourceConfig;
use crate::core::{Identifier, RawRecord};
use crate::errors::{ConfigError, StageError};

/// Reads the listing and records over HTTP with one reused client.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    config: SourceConfig,
}

impl HttpSource {
    /// Creates a source from its configuration.
    pub fn new(config: SourceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout()?)
            .build()
            .map_err(|e| ConfigError::invalid("source", e.to_string()))?;
        Ok(Self { client, config })
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &SourceConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, StageError> {
        debug!(url = %url, "GET");
        let response = self.client.get(url).send().await.map_err(classify_request)?;

        let status = response.status();
        if let Some(error) = classify_status(status) {
            return Err(error);
        }

        let body = response.bytes().await.map_err(classify_request)?;
        serde_json::from_slice(&body)
            .map_err(|e| StageError::malformed(format!("undecodable body from {url}: {e}")))
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn list_identifiers(&self) -> Result<Vec<Identifier>, StageError> {
        let url = self.url(&self.config.listing_path);
        let body = self.get_json(&url).await?;

        let entries = body
            .pointer(&self.config.identifiers_pointer)
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| {
                StageError::malformed(format!(
                    "listing has no array at '{}'",
                    self.config.identifiers_pointer
                ))
            })?;

        entries
            .iter()
            .map(|entry| {
                let raw = if entry.is_object() {
                    entry.get(&self.config.id_field)
                } else {
                    Some(entry)
                };
                raw.and_then(Identifier::from_json).ok_or_else(|| {
                    StageError::malformed(format!("listing entry without usable identifier: {entry}"))
                })
            })
            .collect()
    }

    async fn fetch_record(&self, identifier: &Identifier) -> Result<RawRecord, StageError> {
        let path = self
            .config
            .record_path_template
            .replace("{id}", &identifier.to_string());
        let body = self.get_json(&self.url(&path)).await?;
        if !body.is_object() {
            return Err(StageError::malformed(format!(
                "record {identifier} is not a JSON object"
            )));
        }
        Ok(RawRecord::new(body))
    }
}

/// Maps a non-success status to its error class.
fn classify_status(status: StatusCode) -> Option<StageError> {
    if status.is_success() {
        return None;
    }
    let message = format!("HTTP {status}");
    Some(match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => StageError::malformed(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => StageError::transient(message),
        s if s.is_server_error() => StageError::transient(message),
        _ => StageError::non_retryable(message),
    })
}

fn classify_request(err: reqwest::Error) -> StageError {
    if err.is_decode() {
        StageError::malformed(err.to_string())
    } else {
        StageError::transient(err.to_string())
    }
}
