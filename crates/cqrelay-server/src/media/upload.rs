//! Client for the upload service.
//!
//! Contract: `POST <endpoint>` with multipart fields `file` (bytes) and `name`
//! (text), answered by JSON `{"url", "name", "local_path"}` where any field may
//! be empty. No retries and no timeout beyond reqwest's defaults.

use cqrelay_core::{RelayError, RelayResult};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use tracing::debug;

/// Successful upload response. Missing and `null` fields read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UploadResponse {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub local_path: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone)]
pub struct UploadClient {
    http: Client,
    endpoint: String,
}

impl UploadClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Upload `bytes` under `name`.
    ///
    /// Non-2xx statuses, transport errors and undecodable bodies are errors.
    pub async fn upload(&self, bytes: Vec<u8>, name: &str) -> RelayResult<UploadResponse> {
        let size = bytes.len();
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(name.to_string()))
            .text("name", name.to_string());

        let response = self
            .http
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RelayError::Upload(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RelayError::Upload(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(RelayError::Upload(format!(
                "server returned {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }

        let parsed: UploadResponse = serde_json::from_slice(&body)
            .map_err(|e| RelayError::Upload(format!("invalid response body: {e}")))?;
        debug!(name, size, url = %parsed.url, local_path = %parsed.local_path, "upload complete");
        Ok(parsed)
    }
}
