use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::models::{ReconciledLogEntry, UploadRecord};

pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("an auth token is required to upload attendance")]
    MissingCredential,
    #[error("failed to build upload client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("upload request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("backend rejected upload with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Outcome handed back to callers. A failed upload is data, not an error, so
/// the reconciled log always reaches the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResult {
    pub fn succeeded(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: &UploadError) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadForwarder {
    client: reqwest::blocking::Client,
    require_token: bool,
}

impl UploadForwarder {
    pub fn new(timeout: Duration, require_token: bool) -> Result<Self, UploadError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(UploadError::Client)?;

        Ok(Self {
            client,
            require_token,
        })
    }

    pub fn upload(
        &self,
        entries: &[ReconciledLogEntry],
        endpoint: &str,
        auth_token: Option<&str>,
    ) -> UploadResult {
        match self.try_upload(entries, endpoint, auth_token) {
            Ok(result) => {
                tracing::info!(endpoint, records = entries.len(), "attendance uploaded");
                UploadResult::succeeded(result)
            }
            Err(error) => {
                tracing::warn!(endpoint, records = entries.len(), error = %error, "attendance upload failed");
                UploadResult::failed(&error)
            }
        }
    }

    pub fn try_upload(
        &self,
        entries: &[ReconciledLogEntry],
        endpoint: &str,
        auth_token: Option<&str>,
    ) -> Result<Value, UploadError> {
        let token = auth_token.map(str::trim).filter(|token| !token.is_empty());
        if self.require_token && token.is_none() {
            return Err(UploadError::MissingCredential);
        }

        let records: Vec<UploadRecord> = entries.iter().map(UploadRecord::from).collect();

        let mut request = self.client.post(endpoint).json(&records);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(UploadError::Transport)?;
        let status = response.status();
        let body = response.text().map_err(UploadError::Transport)?;

        if !status.is_success() {
            return Err(UploadError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(serde_json::json!({ "success": true }));
        }

        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}
