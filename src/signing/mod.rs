//! Request signing.
//!
//! Two unrelated schemes live here:
//! - [`api`]: the vendor's shared-secret device-time signature attached to
//!   every generic API call.
//! - [`storage`]: the SigV4-style detached signature the storage provider
//!   expects for upload apply/commit calls.
//!
//! Both are pure functions of their inputs; time is passed in by the
//! caller so signatures are reproducible in tests.

pub mod api;
pub mod storage;

pub use api::api_signature;
pub use storage::{canonical_query, sign_storage_request, UploadCredentials};
