//! Live-results snapshot source.
//!
//! Thin HTTP wrapper for `GET /api/surveys/{id}/live-results`. Pure parsing in
//! `parse_live_results` for testability.

use std::time::Duration;

use async_trait::async_trait;

use crate::state::LiveResults;

const REQUEST_TIMEOUT_SECS: u64 = 15;
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Errors produced while fetching a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("failed to build HTTP client: {0}")]
    HttpClientBuild(String),
    #[error("invalid survey id: {0:?}")]
    InvalidSurveyId(String),
    #[error("live-results request failed: {0}")]
    Request(String),
    #[error("live-results returned {status}: {body}")]
    Response { status: u16, body: String },
    #[error("live-results response could not be parsed: {0}")]
    Parse(String),
}

/// Anything that can produce the authoritative live results for a survey.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    async fn live_results(&self, survey_id: &str) -> Result<LiveResults, ApiError>;
}

// =============================================================================
// HTTP
// =============================================================================

pub struct HttpSnapshotSource {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSnapshotSource {
    /// `base_url` is an `http(s)://` origin without a trailing slash.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ApiError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: base_url.into() })
    }

    #[must_use]
    pub fn url_for(&self, survey_id: &str) -> String {
        live_results_url(&self.base_url, survey_id)
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn live_results(&self, survey_id: &str) -> Result<LiveResults, ApiError> {
        if survey_id.is_empty() || survey_id.contains(['/', '?', '#', ' ']) {
            return Err(ApiError::InvalidSurveyId(survey_id.to_owned()));
        }

        let response = self
            .http
            .get(self.url_for(survey_id))
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| ApiError::Request(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(ApiError::Response { status, body: text });
        }

        parse_live_results(&text)
    }
}

#[must_use]
pub fn live_results_url(base_url: &str, survey_id: &str) -> String {
    format!("{}/api/surveys/{survey_id}/live-results", base_url.trim_end_matches('/'))
}

/// Decode a live-results body. Accepts the document bare or wrapped in a
/// `{"data": ...}` envelope.
pub fn parse_live_results(body: &str) -> Result<LiveResults, ApiError> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| ApiError::Parse(e.to_string()))?;
    let document = match value {
        serde_json::Value::Object(mut map) if map.get("data").is_some_and(serde_json::Value::is_object) => {
            map.remove("data").unwrap_or_default()
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(map),
        other => return Err(ApiError::Parse(format!("expected an object, got {other}"))),
    };
    serde_json::from_value(document).map_err(|e| ApiError::Parse(e.to_string()))
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
