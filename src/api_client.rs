//! HTTP client for the Query Service.
//!
//! The pipeline and the `gazette list` command both go through this client
//! rather than opening the database, so the service stays the single owner
//! of persistence rules.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::errors::PersistError;
use crate::models::{CreateOutcome, GazetteRecord, NewGazette};
use crate::period::YearMonth;
use crate::traits::GazetteApi;

pub struct HttpGazetteApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGazetteApi {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PersistError> {
        Self::new(&config.api_base_url, config.api_timeout_secs)
    }

    /// `base_url` is the API root, e.g. `http://app:8000/api`.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, PersistError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/gazettes/", self.base_url)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Turn a non-success response into a [`PersistError`]. 4xx is the caller's
/// fault; anything else means the service could not do its job.
async fn error_from_response(resp: reqwest::Response) -> PersistError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error.message)
        .unwrap_or(text);

    if status.is_client_error() {
        PersistError::Rejected {
            status: status.as_u16(),
            message,
        }
    } else {
        PersistError::Unavailable(format!("HTTP {}: {}", status.as_u16(), message))
    }
}

#[async_trait]
impl GazetteApi for HttpGazetteApi {
    async fn create(&self, new: &NewGazette) -> Result<CreateOutcome, PersistError> {
        let resp = self.client.post(self.endpoint()).json(new).send().await?;

        match resp.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(resp.json::<CreateOutcome>().await?),
            _ => Err(error_from_response(resp).await),
        }
    }

    async fn list(&self, filter: Option<YearMonth>) -> Result<Vec<GazetteRecord>, PersistError> {
        let mut req = self.client.get(self.endpoint());
        if let Some(period) = filter {
            req = req.query(&[
                ("year", period.year().to_string()),
                ("month", period.month().to_string()),
            ]);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        Ok(resp.json::<Vec<GazetteRecord>>().await?)
    }
}
