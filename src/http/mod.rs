//! The authenticated request dispatcher.
//!
//! [`ApiClient`] issues one outbound call to the vendor: it merges the
//! fixed identity query parameters and browser headers with caller
//! overrides, signs the request (recomputing the device time on every
//! attempt, retries included), applies a bounded linear-backoff retry on
//! transient failures, and normalizes the response envelope.

pub mod envelope;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ClientConfig, APP_ID, VERSION_CODE};
use crate::credential::Credential;
use crate::error::{JimengError, Result};
use crate::signing::api_signature;

/// Additional retries after the first attempt.
const MAX_RETRIES: u32 = 3;

/// Fixed browser headers presented on every call.
const BROWSER_HEADERS: &[(&str, &str)] = &[
    ("accept", "application/json, text/plain, */*"),
    ("accept-language", "zh-CN,zh;q=0.9"),
    ("cache-control", "no-cache"),
    ("origin", "https://jimeng.jianying.com"),
    ("pragma", "no-cache"),
    ("priority", "u=1, i"),
    ("referer", "https://jimeng.jianying.com"),
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-site", "same-origin"),
    (
        "user-agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36",
    ),
];

/// Per-call options layered over the dispatcher defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra query parameters; same-named fixed parameters are replaced.
    pub params: Vec<(String, String)>,
    /// Extra headers; same-named defaults are replaced.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
    /// Per-call timeout override.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Authenticated dispatcher for vendor API calls.
#[derive(Debug, Clone)]
pub struct ApiClient {
    config: Arc<ClientConfig>,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: Arc<ClientConfig>, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Borrow the underlying HTTP client for non-vendor calls (source
    /// download, storage transfer).
    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Send one API call and normalize the response envelope.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        credential: &Credential,
        options: RequestOptions,
    ) -> Result<Value> {
        let response = self
            .send_raw(method, path, credential, &options)
            .await?;
        let payload: Value = response.json().await.map_err(JimengError::from)?;
        envelope::normalize(payload)
    }

    /// Send one API call and return the raw response without envelope
    /// handling, for callers that consume the body as a stream.
    pub async fn send_streaming(
        &self,
        method: Method,
        path: &str,
        credential: &Credential,
        options: RequestOptions,
    ) -> Result<reqwest::Response> {
        self.send_raw(method, path, credential, &options).await
    }

    /// The shared attempt loop: sign per attempt, retry transient
    /// failures with linear backoff, surface the last error once the
    /// bound is exhausted.
    async fn send_raw(
        &self,
        method: Method,
        path: &str,
        credential: &Credential,
        options: &RequestOptions,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.config.base_url, path);
        let params = self.merge_params(&options.params);
        let headers = merge_headers(&options.headers);
        let timeout = options.timeout.unwrap_or(self.config.api_timeout);

        let mut last_error: Option<JimengError> = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = self.config.retry_delay_unit * attempt;
                warn!(attempt, path, delay_ms = delay.as_millis() as u64, "retrying request");
                tokio::time::sleep(delay).await;
            }

            // The signature embeds the device time, so both are
            // recomputed for every attempt.
            let device_time = Utc::now().timestamp();
            let sign = api_signature(path, device_time);

            let mut request = self
                .http
                .request(method.clone(), &url)
                .query(&params)
                .timeout(timeout)
                .header("appid", APP_ID.to_string())
                .header("appvr", VERSION_CODE)
                .header("pf", crate::config::PLATFORM_CODE)
                .header("cookie", credential.cookie(&self.config.fingerprint))
                .header("device-time", device_time.to_string())
                .header("sign", sign)
                .header("sign-ver", "1");
            for (key, value) in &headers {
                request = request.header(key.as_str(), value.as_str());
            }
            if let Some(body) = &options.body {
                request = request.json(body);
            }

            debug!(%method, path, attempt, "dispatching request");
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() >= 400 {
                        let body = response.text().await.unwrap_or_default();
                        warn!(status = status.as_u16(), path, "http error from vendor");
                        last_error = Some(JimengError::ApiError {
                            status: status.as_u16(),
                            body,
                        });
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    let transient = err.is_timeout() || err.is_connect();
                    last_error = Some(JimengError::TransportError(err.to_string()));
                    if !transient {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            JimengError::TransportError("request loop ended without a response".to_string())
        }))
    }

    /// Fixed identity parameters with caller overrides applied on top.
    fn merge_params(&self, overrides: &[(String, String)]) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = vec![
            ("aid".to_string(), APP_ID.to_string()),
            ("device_platform".to_string(), "web".to_string()),
            ("region".to_string(), "CN".to_string()),
            (
                "webId".to_string(),
                self.config.fingerprint.web_id.to_string(),
            ),
        ];
        for (key, value) in overrides {
            if let Some(existing) = params.iter_mut().find(|(k, _)| k == key) {
                existing.1 = value.clone();
            } else {
                params.push((key.clone(), value.clone()));
            }
        }
        params
    }
}

/// Browser defaults with caller overrides replacing same-named entries
/// (header names compared case-insensitively).
fn merge_headers(overrides: &[(String, String)]) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = BROWSER_HEADERS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    for (key, value) in overrides {
        let lower = key.to_ascii_lowercase();
        if let Some(existing) = headers.iter_mut().find(|(k, _)| *k == lower) {
            existing.1 = value.clone();
        } else {
            headers.push((lower, value.clone()));
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceFingerprint;

    fn client() -> ApiClient {
        let config = ClientConfig::builder()
            .fingerprint(DeviceFingerprint::fixed(71, 72, "user"))
            .build();
        ApiClient::new(Arc::new(config), reqwest::Client::new())
    }

    #[test]
    fn caller_params_override_fixed_ones() {
        let client = client();
        let merged = client.merge_params(&[
            ("region".to_string(), "US".to_string()),
            ("scene".to_string(), "2".to_string()),
        ]);
        assert!(merged.contains(&("region".to_string(), "US".to_string())));
        assert!(merged.contains(&("scene".to_string(), "2".to_string())));
        assert!(merged.contains(&("aid".to_string(), APP_ID.to_string())));
        assert_eq!(merged.iter().filter(|(k, _)| k == "region").count(), 1);
    }

    #[test]
    fn caller_headers_replace_same_named_defaults() {
        let merged = merge_headers(&[
            ("Referer".to_string(), "https://jimeng.jianying.com/ai-tool/image/generate".to_string()),
            ("x-custom".to_string(), "1".to_string()),
        ]);
        assert_eq!(merged.iter().filter(|(k, _)| k == "referer").count(), 1);
        assert!(merged.contains(&(
            "referer".to_string(),
            "https://jimeng.jianying.com/ai-tool/image/generate".to_string()
        )));
        assert!(merged.contains(&("x-custom".to_string(), "1".to_string())));
        assert!(merged.iter().any(|(k, _)| k == "user-agent"));
    }

    #[test]
    fn fixed_params_carry_the_fingerprint() {
        let client = client();
        let merged = client.merge_params(&[]);
        assert!(merged.contains(&("webId".to_string(), "72".to_string())));
    }
}
