//! An async Rust client for the Jimeng (Dreamina) image and video
//! generation service.
//!
//! The service has no public API: this crate speaks the web client's
//! private protocol. That means per-request MD5 signatures over a device
//! timestamp, a session cookie assembled from an opaque account token, a
//! SigV4-signed storage handshake for reference uploads, and job polling
//! against the draft-history endpoints.
//!
//! [`JimengClient`] is the entry point:
//!
//! ```no_run
//! use jimeng_client::{JimengClient, VideoOptions};
//!
//! # async fn run() -> jimeng_client::Result<()> {
//! let client = JimengClient::new("my-session-token")?;
//! let url = client
//!     .generate_video("jimeng-video-3.0", "waves rolling onto a beach", VideoOptions::default())
//!     .await?;
//! println!("{url}");
//! # Ok(())
//! # }
//! ```
//!
//! Video jobs can also ride the quality ladder: when the account cannot
//! afford the requested resolution/duration,
//! [`JimengClient::generate_video_with_retry`] re-submits at lower
//! quality instead of failing.

pub mod client;
pub mod config;
pub mod credential;
pub mod credit;
pub mod error;
pub mod generation;
pub mod http;
pub mod signing;
pub mod upload;

pub use client::JimengClient;
pub use config::{ClientConfig, ClientConfigBuilder, DeviceFingerprint, PollConfig};
pub use credential::{Credential, CredentialPool};
pub use credit::CreditInfo;
pub use error::{JimengError, Result, UploadStep};
pub use generation::{DegradationPlan, ImageOptions, VideoOptions};
pub use upload::{FileSource, UploadedFile};
