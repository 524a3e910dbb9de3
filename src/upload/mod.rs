//! The file upload pipeline.
//!
//! Turns a raw content source into a vendor-recognized content handle:
//! token acquisition, SigV4-style signed apply, checksum-verified binary
//! transfer, and commit. Any step failure aborts the whole pipeline with
//! step context; there are no cross-step retries (transport-level retry
//! lives in the dispatcher alone, and each upload gets a fresh credential
//! triple).

pub mod source;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::credential::Credential;
use crate::error::{JimengError, Result, UploadStep};
use crate::http::{ApiClient, RequestOptions};
use crate::signing::{canonical_query, sign_storage_request, UploadCredentials};

pub use source::{FileSource, ResolvedFile};

/// The durable output of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub image_uri: String,
    pub uri: String,
}

#[derive(Debug, Deserialize)]
struct ApplyResponse {
    #[serde(rename = "Result")]
    result: Option<ApplyResult>,
}

#[derive(Debug, Deserialize)]
struct ApplyResult {
    #[serde(rename = "UploadAddress")]
    upload_address: UploadAddress,
}

#[derive(Debug, Deserialize)]
struct UploadAddress {
    #[serde(rename = "UploadHosts")]
    upload_hosts: Vec<String>,
    #[serde(rename = "StoreInfos")]
    store_infos: Vec<StoreInfo>,
    #[serde(rename = "SessionKey")]
    session_key: String,
}

#[derive(Debug, Deserialize)]
struct StoreInfo {
    #[serde(rename = "StoreUri")]
    store_uri: String,
    #[serde(rename = "Auth")]
    auth: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(rename = "Result")]
    result: Option<CommitResult>,
}

#[derive(Debug, Deserialize)]
struct CommitResult {
    #[serde(rename = "Results")]
    results: Vec<CommitEntry>,
}

#[derive(Debug, Deserialize)]
struct CommitEntry {
    #[serde(rename = "Uri")]
    uri: String,
}

/// Content-addressed upload against the vendor's storage provider.
#[derive(Debug, Clone)]
pub struct UploadPipeline {
    api: ApiClient,
}

impl UploadPipeline {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Upload a source and return its content handle.
    pub async fn upload(
        &self,
        credential: &Credential,
        source: FileSource,
    ) -> Result<UploadedFile> {
        let config = self.api.config().clone();
        let resolved = source.resolve(self.api.http(), &config).await?;
        info!(
            filename = %resolved.filename,
            size = resolved.bytes.len(),
            "starting upload"
        );

        let upload_credentials = self.exchange_token(credential).await?;

        let checksum = format!("{:x}", crc32fast::hash(&resolved.bytes));
        debug!(%checksum, "computed content checksum");

        let address = self
            .apply_upload(&upload_credentials, resolved.bytes.len(), &config)
            .await?;
        let store = address.store_infos.first().ok_or_else(|| {
            JimengError::upload(UploadStep::ApplyUpload, "no store info returned")
        })?;
        let host = address.upload_hosts.first().ok_or_else(|| {
            JimengError::upload(UploadStep::ApplyUpload, "no upload host returned")
        })?;

        self.transfer_bytes(host, store, &checksum, &resolved.bytes, &config)
            .await?;

        let uri = self
            .commit_upload(
                &upload_credentials,
                &address.session_key,
                resolved.bytes.len(),
                &config,
            )
            .await?;
        info!(%uri, "upload committed");
        Ok(UploadedFile {
            image_uri: uri.clone(),
            uri,
        })
    }

    /// Exchange the account credential for a short-lived storage triple.
    async fn exchange_token(&self, credential: &Credential) -> Result<UploadCredentials> {
        let data = self
            .api
            .send(
                Method::POST,
                "/mweb/v1/get_upload_token",
                credential,
                RequestOptions::new()
                    .param("da_version", "3.2.2")
                    .param("aigc_features", "app_lip_sync")
                    .json(json!({ "scene": 2 })),
            )
            .await
            .map_err(|e| JimengError::upload(UploadStep::TokenExchange, e.to_string()))?;
        let credentials: UploadCredentials = serde_json::from_value(data).map_err(|_| {
            JimengError::upload(
                UploadStep::TokenExchange,
                "token response missing credential triple; the account session may have expired",
            )
        })?;
        if credentials.access_key_id.is_empty() {
            return Err(JimengError::upload(
                UploadStep::TokenExchange,
                "empty access key in token response",
            ));
        }
        Ok(credentials)
    }

    /// Ask the storage provider where to put the bytes.
    async fn apply_upload(
        &self,
        credentials: &UploadCredentials,
        file_size: usize,
        config: &crate::config::ClientConfig,
    ) -> Result<UploadAddress> {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(11)
            .map(char::from)
            .collect();
        let query = vec![
            ("Action".to_string(), "ApplyImageUpload".to_string()),
            ("FileSize".to_string(), file_size.to_string()),
            ("ServiceId".to_string(), config.storage_service_id.clone()),
            ("Version".to_string(), "2018-08-01".to_string()),
            ("s".to_string(), nonce),
        ];
        let headers = sign_storage_request(
            credentials,
            &config.storage_region,
            &config.storage_service,
            "GET",
            &query,
            None,
            Utc::now(),
        )?;

        let url = format!("{}/?{}", config.storage_url, canonical_query(&query));
        let mut request = self
            .api
            .http()
            .get(&url)
            .timeout(config.storage_timeout);
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| JimengError::upload(UploadStep::ApplyUpload, e.to_string()))?;
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| JimengError::upload(UploadStep::ApplyUpload, e.to_string()))?;
        check_storage_error(&payload, UploadStep::ApplyUpload)?;

        let parsed: ApplyResponse = serde_json::from_value(payload)
            .map_err(|e| JimengError::upload(UploadStep::ApplyUpload, e.to_string()))?;
        parsed
            .result
            .map(|r| r.upload_address)
            .ok_or_else(|| JimengError::upload(UploadStep::ApplyUpload, "missing Result"))
    }

    /// Push the raw bytes to the storage host with the per-upload
    /// authorization and checksum headers.
    async fn transfer_bytes(
        &self,
        host: &str,
        store: &StoreInfo,
        checksum: &str,
        bytes: &[u8],
        config: &crate::config::ClientConfig,
    ) -> Result<()> {
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };
        let url = format!("{base}/upload/v1/{}", store.store_uri);
        debug!(%url, "transferring bytes");

        let response = self
            .api
            .http()
            .post(&url)
            .timeout(config.transfer_timeout)
            .header("authorization", &store.auth)
            .header("content-crc32", checksum)
            .header("content-type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| JimengError::upload(UploadStep::TransferBytes, e.to_string()))?;
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| JimengError::upload(UploadStep::TransferBytes, e.to_string()))?;
        let code = payload.get("code").and_then(serde_json::Value::as_i64);
        if code != Some(2000) {
            let message = payload
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("upload rejected by storage host");
            return Err(JimengError::upload(UploadStep::TransferBytes, message));
        }
        Ok(())
    }

    /// Commit the session, yielding the final content handle.
    async fn commit_upload(
        &self,
        credentials: &UploadCredentials,
        session_key: &str,
        file_size: usize,
        config: &crate::config::ClientConfig,
    ) -> Result<String> {
        let query = vec![
            ("Action".to_string(), "CommitImageUpload".to_string()),
            ("FileSize".to_string(), file_size.to_string()),
            ("ServiceId".to_string(), config.storage_service_id.clone()),
            ("Version".to_string(), "2018-08-01".to_string()),
        ];
        let body = json!({ "SessionKey": session_key });
        let headers = sign_storage_request(
            credentials,
            &config.storage_region,
            &config.storage_service,
            "POST",
            &query,
            Some(&body),
            Utc::now(),
        )?;

        let url = format!("{}/?{}", config.storage_url, canonical_query(&query));
        let mut request = self
            .api
            .http()
            .post(&url)
            .timeout(config.storage_timeout)
            .header("content-type", "application/json")
            .json(&body);
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| JimengError::upload(UploadStep::CommitUpload, e.to_string()))?;
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| JimengError::upload(UploadStep::CommitUpload, e.to_string()))?;
        check_storage_error(&payload, UploadStep::CommitUpload)?;

        let parsed: CommitResponse = serde_json::from_value(payload)
            .map_err(|e| JimengError::upload(UploadStep::CommitUpload, e.to_string()))?;
        parsed
            .result
            .and_then(|r| r.results.into_iter().next())
            .map(|entry| entry.uri)
            .ok_or_else(|| JimengError::upload(UploadStep::CommitUpload, "missing commit Uri"))
    }
}

/// The storage provider reports failures under a `"Response "` key (the
/// trailing space is part of the wire format).
fn check_storage_error(payload: &serde_json::Value, step: UploadStep) -> Result<()> {
    if let Some(error) = payload.get("Response ").and_then(|r| r.get("Error")) {
        let message = error
            .get("Message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("storage provider error");
        return Err(JimengError::upload(step, message));
    }
    Ok(())
}
