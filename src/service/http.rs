use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::common::error::{AttendanceError, Result};
use crate::service::protocol::ApiEnvelope;

pub(crate) fn build_client(timeout_seconds: u64, bearer: Option<&str>) -> Result<Client> {
    let mut headers = HeaderMap::new();
    if let Some(key) = bearer {
        let value = HeaderValue::from_str(&format!("Bearer {}", key))
            .map_err(|e| AttendanceError::Config(format!("Invalid API key: {}", e)))?;
        headers.insert(AUTHORIZATION, value);
    }

    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .default_headers(headers)
        .build()?)
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Decode a JSON body. Non-2xx answers become `Remote` errors carrying the
/// server's `message` (or FastAPI's `detail`) so they classify like any
/// other business failure.
pub(crate) fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body: serde_json::Value = response.json().unwrap_or(serde_json::Value::Null);
        let message = body
            .get("message")
            .or_else(|| body.get("detail"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status));
        tracing::warn!("Remote call failed with {}: {}", status, message);
        return Err(AttendanceError::remote(message));
    }
    Ok(response.json()?)
}

pub(crate) fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<ApiEnvelope<T>> {
    let envelope: ApiEnvelope<T> = read_json(response)?;
    if !envelope.success {
        tracing::warn!(
            "Backend refused request: {}",
            envelope.message.as_deref().unwrap_or("no message")
        );
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_without_doubled_slashes() {
        assert_eq!(join_url("http://localhost:8000/", "/api/users"), "http://localhost:8000/api/users");
        assert_eq!(join_url("http://localhost:8000", "recognize"), "http://localhost:8000/recognize");
    }
}
