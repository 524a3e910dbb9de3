//! Client configuration and identity values.
//!
//! Everything the vendor expects to see about the "browser" making the
//! calls lives here: app/platform/version codes, the per-process device
//! fingerprint, base URLs, per-call timeouts, and poll tuning. The config
//! is built once and injected into every component; nothing in the crate
//! reaches for ambient global state, so tests can pin a fixed fingerprint
//! and deterministic signatures fall out for free.

use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

/// App id the web client registers under.
pub const APP_ID: u64 = 513695;
/// Web client version string sent in headers and mixed into the signature.
pub const VERSION_CODE: &str = "5.8.0";
/// Platform code for the web surface.
pub const PLATFORM_CODE: &str = "7";
/// Maximum accepted size for any upload source.
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Per-process device identity presented to the vendor.
///
/// The vendor fingerprints web clients with a device id / web id pair in
/// the 7e18 band plus a uuid-shaped user id. Generated once at startup and
/// reused for every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFingerprint {
    pub device_id: u64,
    pub web_id: u64,
    pub user_id: String,
}

impl DeviceFingerprint {
    /// Generate a fresh random fingerprint.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            device_id: rng.gen_range(7_000_000_000_000_000_000..8_000_000_000_000_000_000),
            web_id: rng.gen_range(7_000_000_000_000_000_000..8_000_000_000_000_000_000),
            user_id: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Build a fixed fingerprint, used by tests that need stable values.
    pub fn fixed(device_id: u64, web_id: u64, user_id: impl Into<String>) -> Self {
        Self {
            device_id,
            web_id,
            user_id: user_id.into(),
        }
    }
}

/// Poll tuning for one generation surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Attempts allowed before the job is declared timed out.
    pub budget: u32,
    /// Delay before the first status query.
    pub initial_delay: Duration,
    /// Base interval between queries.
    pub interval: Duration,
    /// Upper bound for the growing interval (video only; equal to
    /// `interval` disables growth).
    pub max_interval: Duration,
}

impl PollConfig {
    /// Image jobs: short fixed interval, generous budget.
    pub fn images() -> Self {
        Self {
            budget: 120,
            initial_delay: Duration::ZERO,
            interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(1),
        }
    }

    /// Video jobs: large initial delay, growing interval up to a cap.
    pub fn videos() -> Self {
        Self {
            budget: 60,
            initial_delay: Duration::from_secs(5),
            interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(10),
        }
    }
}

/// Immutable configuration for a [`crate::JimengClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API origin, `https://jimeng.jianying.com` in production.
    pub base_url: String,
    /// Storage provider origin for apply/commit calls.
    pub storage_url: String,
    /// Storage service id embedded in upload requests.
    pub storage_service_id: String,
    /// Region for the storage signing scope.
    pub storage_region: String,
    /// Service name for the storage signing scope.
    pub storage_service: String,
    /// Device identity injected into headers, cookies, and signatures.
    pub fingerprint: DeviceFingerprint,
    /// Timeout for generic API calls (generation submit, status query).
    pub api_timeout: Duration,
    /// Timeout for the HEAD existence check on remote sources.
    pub head_timeout: Duration,
    /// Timeout for source download and binary upload transfers.
    pub transfer_timeout: Duration,
    /// Timeout for storage apply/commit calls.
    pub storage_timeout: Duration,
    /// Poll tuning for image jobs.
    pub image_poll: PollConfig,
    /// Poll tuning for video jobs.
    pub video_poll: PollConfig,
    /// Base delay unit for the dispatcher's linear retry backoff.
    pub retry_delay_unit: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://jimeng.jianying.com".to_string(),
            storage_url: "https://imagex.bytedanceapi.com".to_string(),
            storage_service_id: "tb4s082cfz".to_string(),
            storage_region: "cn-north-1".to_string(),
            storage_service: "imagex".to_string(),
            fingerprint: DeviceFingerprint::generate(),
            api_timeout: Duration::from_secs(45),
            head_timeout: Duration::from_secs(15),
            transfer_timeout: Duration::from_secs(60),
            storage_timeout: Duration::from_secs(30),
            image_poll: PollConfig::images(),
            video_poll: PollConfig::videos(),
            retry_delay_unit: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// Returns a builder for constructing `ClientConfig`.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    base_url: Option<String>,
    storage_url: Option<String>,
    fingerprint: Option<DeviceFingerprint>,
    api_timeout: Option<Duration>,
    image_poll: Option<PollConfig>,
    video_poll: Option<PollConfig>,
    retry_delay_unit: Option<Duration>,
}

impl ClientConfigBuilder {
    pub fn base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn storage_url<S: Into<String>>(mut self, url: S) -> Self {
        self.storage_url = Some(url.into());
        self
    }

    pub fn fingerprint(mut self, fingerprint: DeviceFingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn api_timeout(mut self, timeout: Duration) -> Self {
        self.api_timeout = Some(timeout);
        self
    }

    pub fn image_poll(mut self, poll: PollConfig) -> Self {
        self.image_poll = Some(poll);
        self
    }

    pub fn video_poll(mut self, poll: PollConfig) -> Self {
        self.video_poll = Some(poll);
        self
    }

    pub fn retry_delay_unit(mut self, unit: Duration) -> Self {
        self.retry_delay_unit = Some(unit);
        self
    }

    /// Build the configuration, falling back to production defaults.
    pub fn build(self) -> ClientConfig {
        let defaults = ClientConfig::default();
        ClientConfig {
            base_url: self.base_url.unwrap_or(defaults.base_url),
            storage_url: self.storage_url.unwrap_or(defaults.storage_url),
            fingerprint: self.fingerprint.unwrap_or(defaults.fingerprint),
            api_timeout: self.api_timeout.unwrap_or(defaults.api_timeout),
            image_poll: self.image_poll.unwrap_or(defaults.image_poll),
            video_poll: self.video_poll.unwrap_or(defaults.video_poll),
            retry_delay_unit: self.retry_delay_unit.unwrap_or(defaults.retry_delay_unit),
            ..defaults
        }
    }
}
