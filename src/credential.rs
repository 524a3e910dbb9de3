//! Account credentials and the credential pool.
//!
//! The vendor has no refresh exchange today: the opaque "refresh token" is
//! used directly as the session identifier, so the raw value goes into the
//! session cookie on every call. The secret is held in
//! [`secrecy::SecretString`] and only exposed at header-assembly time.

use chrono::Utc;
use rand::seq::SliceRandom;
use secrecy::{ExposeSecret, SecretString};

use crate::config::DeviceFingerprint;
use crate::error::{JimengError, Result};

/// An opaque bearer credential identifying one logical account.
#[derive(Debug, Clone)]
pub struct Credential {
    token: SecretString,
}

impl Credential {
    /// Wrap a raw token value.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }

    /// Expose the raw token for header/cookie assembly.
    pub(crate) fn expose(&self) -> &str {
        self.token.expose_secret()
    }

    /// Assemble the session cookie the web client would carry.
    ///
    /// `sid_guard` embeds the token with a 60-day validity window; the
    /// remaining pairs bind the fingerprint so the vendor sees a stable
    /// "browser".
    pub(crate) fn cookie(&self, fingerprint: &DeviceFingerprint) -> String {
        let token = self.expose();
        let now = Utc::now().timestamp();
        [
            format!("_tea_web_id={}", fingerprint.web_id),
            "is_staff_user=false".to_string(),
            "store-region=cn-gd".to_string(),
            "store-region-src=uid".to_string(),
            format!("sid_guard={token}%7C{now}%7C5184000%7CMon%2C+03-Feb-2025+08%3A17%3A09+GMT"),
            format!("uid_tt={}", fingerprint.user_id),
            format!("uid_tt_ss={}", fingerprint.user_id),
            format!("sid_tt={token}"),
            format!("sessionid={token}"),
            format!("sessionid_ss={token}"),
        ]
        .join("; ")
    }
}

/// A set of interchangeable credentials for one deployment.
///
/// Parsed from an `Authorization` header whose bearer value may carry a
/// comma-separated list. Selection is an unweighted random pick per call:
/// plain load spreading, no session affinity.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
}

impl CredentialPool {
    /// Parse a pool from an authorization header value.
    pub fn from_authorization(authorization: &str) -> Result<Self> {
        let trimmed = authorization.trim();
        let value = trimmed
            .strip_prefix("Bearer")
            .map(str::trim_start)
            .unwrap_or(trimmed);
        let credentials: Vec<Credential> = value
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(Credential::new)
            .collect();
        if credentials.is_empty() {
            return Err(JimengError::InvalidInput(
                "authorization header carries no tokens".to_string(),
            ));
        }
        Ok(Self { credentials })
    }

    /// Number of credentials in the pool.
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Iterate over every credential in the pool.
    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.credentials.iter()
    }

    /// Pick one credential uniformly at random.
    pub fn pick(&self) -> &Credential {
        self.credentials
            .choose(&mut rand::thread_rng())
            .expect("pool is never empty after construction")
    }
}
