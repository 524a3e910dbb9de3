//! Mock API tests for the upload pipeline: token exchange, signed apply,
//! checksum-verified transfer, and commit.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use jimeng_client::config::DeviceFingerprint;
use jimeng_client::upload::FileSource;
use jimeng_client::{ClientConfig, JimengClient, JimengError, UploadStep};

fn envelope(data: serde_json::Value) -> serde_json::Value {
    json!({ "ret": "0", "errmsg": "", "data": data })
}

fn client(server: &MockServer) -> JimengClient {
    let config = ClientConfig::builder()
        .base_url(server.uri())
        .storage_url(server.uri())
        .fingerprint(DeviceFingerprint::fixed(7_100, 7_200, "test-user"))
        .retry_delay_unit(Duration::from_millis(2))
        .build();
    JimengClient::with_config(config, "test-token").unwrap()
}

async fn mount_token_exchange(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/mweb/v1/get_upload_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "access_key_id": "AKTEST",
            "secret_access_key": "secret",
            "session_token": "sts-token"
        }))))
        .mount(server)
        .await;
}

#[tokio::test]
async fn upload_runs_all_four_steps() {
    let mock_server = MockServer::start().await;
    mount_token_exchange(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("Action", "ApplyImageUpload"))
        .and(query_param("FileSize", "5"))
        .and(query_param("ServiceId", "tb4s082cfz"))
        .and(header_exists("authorization"))
        .and(header("x-amz-security-token", "sts-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Result": {
                "UploadAddress": {
                    "UploadHosts": [mock_server.uri()],
                    "StoreInfos": [{ "StoreUri": "proj/abc", "Auth": "store-auth" }],
                    "SessionKey": "sk-1"
                }
            }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;
    // CRC32 of "hello" is 3610a686.
    Mock::given(method("POST"))
        .and(path("/upload/v1/proj/abc"))
        .and(header("authorization", "store-auth"))
        .and(header("content-crc32", "3610a686"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 2000 })))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(query_param("Action", "CommitImageUpload"))
        .and(header_exists("x-amz-content-sha256"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Result": { "Results": [{ "Uri": "proj/abc" }] }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server);
    let uploaded = client
        .upload_file(FileSource::parse("data:image/png;base64,aGVsbG8="))
        .await
        .unwrap();
    assert_eq!(uploaded.image_uri, "proj/abc");
    assert_eq!(uploaded.uri, "proj/abc");
}

#[tokio::test]
async fn missing_credential_triple_fails_the_token_step() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mweb/v1/get_upload_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .mount(&mock_server)
        .await;

    let client = client(&mock_server);
    let err = client
        .upload_file(FileSource::parse("data:image/png;base64,aGVsbG8="))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        JimengError::UploadFailed {
            step: UploadStep::TokenExchange,
            ..
        }
    ));
}

#[tokio::test]
async fn storage_error_response_fails_the_apply_step() {
    let mock_server = MockServer::start().await;
    mount_token_exchange(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("Action", "ApplyImageUpload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Response ": { "Error": { "Message": "expired sts token" } }
        })))
        .mount(&mock_server)
        .await;

    let client = client(&mock_server);
    let err = client
        .upload_file(FileSource::parse("data:image/png;base64,aGVsbG8="))
        .await
        .unwrap_err();
    match err {
        JimengError::UploadFailed { step, message } => {
            assert_eq!(step, UploadStep::ApplyUpload);
            assert!(message.contains("expired sts token"));
        }
        other => panic!("expected UploadFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn rejected_checksum_fails_the_transfer_step() {
    let mock_server = MockServer::start().await;
    mount_token_exchange(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("Action", "ApplyImageUpload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Result": {
                "UploadAddress": {
                    "UploadHosts": [mock_server.uri()],
                    "StoreInfos": [{ "StoreUri": "proj/abc", "Auth": "store-auth" }],
                    "SessionKey": "sk-1"
                }
            }
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/v1/proj/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1001,
            "message": "crc mismatch"
        })))
        .mount(&mock_server)
        .await;

    let client = client(&mock_server);
    let err = client
        .upload_file(FileSource::parse("data:image/png;base64,aGVsbG8="))
        .await
        .unwrap_err();
    match err {
        JimengError::UploadFailed { step, message } => {
            assert_eq!(step, UploadStep::TransferBytes);
            assert!(message.contains("crc mismatch"));
        }
        other => panic!("expected UploadFailed, got {other:?}"),
    }
}
