//! Public file host upload.
//!
//! Posts each document as `multipart/form-data` and treats the trimmed
//! response body as the public URL. No retries here: a rejected upload is
//! reported and the run moves on.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::time::Duration;

use crate::config::UploadConfig;
use crate::errors::UploadError;
use crate::source::LocalDocument;
use crate::traits::BlobSink;

pub struct HttpBlobSink {
    client: reqwest::Client,
    config: UploadConfig,
}

impl HttpBlobSink {
    pub fn new(config: UploadConfig) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl BlobSink for HttpBlobSink {
    async fn upload(&self, document: &LocalDocument) -> Result<String, UploadError> {
        let bytes = tokio::fs::read(&document.path)
            .await
            .map_err(|source| UploadError::Io {
                path: document.path.clone(),
                source,
            })?;
        if bytes.is_empty() {
            return Err(UploadError::EmptyFile(document.path.clone()));
        }

        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(document.file_name())
            .mime_str(&self.config.content_type)?;
        let form = Form::new().part(self.config.field_name.clone(), part);

        let resp = self
            .client
            .post(&self.config.url)
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(UploadError::RateLimited);
        }
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let url = body.trim();
        if url.is_empty() {
            return Err(UploadError::EmptyUrl);
        }

        tracing::debug!(file = %document.file_name(), size, url, "uploaded");
        Ok(url.to_string())
    }
}
