//! SigV4-style signing for the storage provider.
//!
//! Upload apply/commit calls are authorized with a detached signature in
//! the AWS request-signing shape: a signing key derived by chaining
//! HMAC-SHA256 over date, region, service, and a terminal constant, applied
//! to a string-to-sign built from the canonical request. The path is always
//! `/`; the query string is sorted and percent-encoded; the body hash is
//! the empty-string hash when no body is sent.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{JimengError, Result};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const TERMINATOR: &str = "aws4_request";

/// Short-lived credential triple issued by the upload token exchange.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct UploadCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

/// Percent-encode and sort query parameters into canonical form.
///
/// The same string is used both inside the canonical request and on the
/// wire, so the two can never disagree.
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Sign a storage request, returning the full header set to attach.
///
/// Output headers: `X-Amz-Date`, `X-Amz-Security-Token`,
/// `X-Amz-Content-Sha256` (only when a body is present), and
/// `Authorization`. Deterministic for fixed inputs.
pub fn sign_storage_request(
    credentials: &UploadCredentials,
    region: &str,
    service: &str,
    method: &str,
    query: &[(String, String)],
    body: Option<&serde_json::Value>,
    now: DateTime<Utc>,
) -> Result<Vec<(String, String)>> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let amz_day = now.format("%Y%m%d").to_string();

    let body_bytes = body.map(serde_json::to_vec).transpose()?;
    let body_hash = hex_sha256(body_bytes.as_deref().unwrap_or(b""));

    let mut headers: Vec<(String, String)> = vec![
        ("X-Amz-Date".to_string(), amz_date.clone()),
        (
            "X-Amz-Security-Token".to_string(),
            credentials.session_token.clone(),
        ),
    ];
    if body_bytes.is_some() {
        headers.push(("X-Amz-Content-Sha256".to_string(), body_hash.clone()));
    }

    let mut canonical_pairs: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect();
    canonical_pairs.sort();
    let signed_headers = canonical_pairs
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers = canonical_pairs
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect::<String>();

    let canonical_request = [
        method.to_ascii_uppercase().as_str(),
        "/",
        &canonical_query(query),
        &canonical_headers,
        &signed_headers,
        &body_hash,
    ]
    .join("\n");

    let scope = format!("{amz_day}/{region}/{service}/{TERMINATOR}");
    let string_to_sign = [
        ALGORITHM,
        &amz_date,
        &scope,
        &hex_sha256(canonical_request.as_bytes()),
    ]
    .join("\n");

    let signing_key = derive_signing_key(
        &credentials.secret_access_key,
        &amz_day,
        region,
        service,
    )?;
    let signature = hex_encode(&hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key_id
    );
    headers.push(("Authorization".to_string(), authorization));
    Ok(headers)
}

/// Chain the four-component signing key.
fn derive_signing_key(secret: &str, day: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), day.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, TERMINATOR.as_bytes())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| JimengError::InvalidInput(format!("hmac key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hex_sha256(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("{digest:x}")
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn credentials() -> UploadCredentials {
        UploadCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret-key".to_string(),
            session_token: "session-token".to_string(),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 12, 2, 9, 24).unwrap()
    }

    fn query() -> Vec<(String, String)> {
        vec![
            ("Action".to_string(), "ApplyImageUpload".to_string()),
            ("FileSize".to_string(), "1024".to_string()),
            ("ServiceId".to_string(), "tb4s082cfz".to_string()),
            ("Version".to_string(), "2018-08-01".to_string()),
        ]
    }

    fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> &'a str {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap()
    }

    #[test]
    fn signing_is_deterministic() {
        let a = sign_storage_request(
            &credentials(), "cn-north-1", "imagex", "GET", &query(), None, fixed_now(),
        )
        .unwrap();
        let b = sign_storage_request(
            &credentials(), "cn-north-1", "imagex", "GET", &query(), None, fixed_now(),
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn changing_any_input_changes_the_signature() {
        let base = sign_storage_request(
            &credentials(), "cn-north-1", "imagex", "GET", &query(), None, fixed_now(),
        )
        .unwrap();
        let base_auth = header_value(&base, "Authorization").to_string();

        let other_method = sign_storage_request(
            &credentials(), "cn-north-1", "imagex", "POST", &query(), None, fixed_now(),
        )
        .unwrap();
        assert_ne!(base_auth, header_value(&other_method, "Authorization"));

        let mut other_query = query();
        other_query[1].1 = "2048".to_string();
        let with_query = sign_storage_request(
            &credentials(), "cn-north-1", "imagex", "GET", &other_query, None, fixed_now(),
        )
        .unwrap();
        assert_ne!(base_auth, header_value(&with_query, "Authorization"));

        let other_creds = UploadCredentials {
            secret_access_key: "another-secret".to_string(),
            ..credentials()
        };
        let with_creds = sign_storage_request(
            &other_creds, "cn-north-1", "imagex", "GET", &query(), None, fixed_now(),
        )
        .unwrap();
        assert_ne!(base_auth, header_value(&with_creds, "Authorization"));
    }

    #[test]
    fn body_presence_adds_content_hash_header() {
        let body = serde_json::json!({ "SessionKey": "abc" });
        let headers = sign_storage_request(
            &credentials(), "cn-north-1", "imagex", "POST", &query(), Some(&body), fixed_now(),
        )
        .unwrap();
        assert!(headers.iter().any(|(k, _)| k == "X-Amz-Content-Sha256"));

        let without = sign_storage_request(
            &credentials(), "cn-north-1", "imagex", "GET", &query(), None, fixed_now(),
        )
        .unwrap();
        assert!(!without.iter().any(|(k, _)| k == "X-Amz-Content-Sha256"));
    }

    #[test]
    fn authorization_carries_scope_and_signed_headers() {
        let headers = sign_storage_request(
            &credentials(), "cn-north-1", "imagex", "GET", &query(), None, fixed_now(),
        )
        .unwrap();
        let auth = header_value(&headers, "Authorization");
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20241212/cn-north-1/imagex/aws4_request"));
        assert!(auth.contains("SignedHeaders=x-amz-date;x-amz-security-token"));
        assert_eq!(header_value(&headers, "X-Amz-Date"), "20241212T020924Z");
    }

    #[test]
    fn canonical_query_sorts_and_encodes() {
        let params = vec![
            ("b".to_string(), "2 2".to_string()),
            ("a".to_string(), "1".to_string()),
        ];
        assert_eq!(canonical_query(&params), "a=1&b=2%202");
    }
}
