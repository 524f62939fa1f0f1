//! HTTP adapter: `PATCH {base}/records/{target_id}` with `{"fields": ...}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;
use tracing::debug;

use bulkpatch_core::Operation;

use super::{DownstreamError, RecordUpdater};

#[derive(Debug, Clone)]
pub struct HttpUpdaterConfig {
    pub base_url: Url,
    pub bearer_token: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpRecordUpdater {
    client: Client,
    config: HttpUpdaterConfig,
}

impl HttpRecordUpdater {
    pub fn new(config: HttpUpdaterConfig) -> Result<Self, DownstreamError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DownstreamError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn record_url(&self, target_id: &str) -> Result<Url, DownstreamError> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DownstreamError::Client {
                status: 0,
                message: format!("base url '{}' cannot carry a path", self.config.base_url),
            })?
            .pop_if_empty()
            .push("records")
            .push(target_id);
        Ok(url)
    }
}

/// Parse a `Retry-After` header given in whole seconds.
fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl RecordUpdater for HttpRecordUpdater {
    async fn apply(&self, operation: &Operation) -> Result<(), DownstreamError> {
        let url = self.record_url(&operation.target_id)?;
        let mut req = self
            .client
            .patch(url)
            .json(&json!({ "fields": operation.fields }));
        if let Some(token) = &self.config.bearer_token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DownstreamError::Network(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            debug!(target_id = %operation.target_id, status = status.as_u16(), "record updated");
            return Ok(());
        }

        let hint = if status == StatusCode::TOO_MANY_REQUESTS {
            retry_after(&resp)
        } else {
            None
        };
        let body = resp.text().await.unwrap_or_default();
        Err(DownstreamError::from_status(status.as_u16(), body, hint))
    }
}
