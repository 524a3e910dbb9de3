//! Error types for the Jimeng client.
//!
//! Every fallible operation in the crate returns [`JimengError`]. Business
//! failures (insufficient balance, content filtered) are distinct variants so
//! that callers and the degradation policy can match on the kind instead of
//! inspecting message text.

use thiserror::Error;

/// Convenience result alias used across the crate.
pub type Result<T> = std::result::Result<T, JimengError>;

/// All errors surfaced by the Jimeng client.
#[derive(Debug, Error, Clone)]
pub enum JimengError {
    /// A file source was unreachable, missing, or over the size limit.
    #[error("Invalid file source: {0}")]
    InvalidFileUrl(String),

    /// A step of the upload pipeline failed. `step` names the pipeline
    /// stage so operators can see how far the upload got.
    #[error("Upload failed at {step}: {message}")]
    UploadFailed { step: UploadStep, message: String },

    /// The vendor returned a non-success envelope (`ret` other than "0").
    #[error("Request failed: {message}")]
    RequestFailed { message: String },

    /// The vendor reported HTTP-level failure after retries were exhausted.
    #[error("API error {status}: {body}")]
    ApiError { status: u16, body: String },

    /// The account does not have enough credits (envelope `ret` "5000" or
    /// job fail code in the 2039 class).
    #[error("Insufficient credit balance: {0}")]
    InsufficientBalance(String),

    /// The vendor rejected the generation for content policy reasons
    /// (job fail code 2038). Never retried.
    #[error("Generation blocked by content filter")]
    ContentFiltered,

    /// The job reached a terminal failure state without a more specific
    /// classification.
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// The poll budget was exhausted before the job reached a terminal
    /// state.
    #[error("Generation timed out after {attempts} polls")]
    GenerationTimeout { attempts: u32 },

    /// Network or timeout failure after the dispatcher's retry bound.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// A response body could not be parsed.
    #[error("JSON error: {0}")]
    JsonError(String),

    /// The caller supplied an unusable parameter.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// The stage of the upload pipeline a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStep {
    ResolveSource,
    TokenExchange,
    ApplyUpload,
    TransferBytes,
    CommitUpload,
}

impl std::fmt::Display for UploadStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ResolveSource => "source resolution",
            Self::TokenExchange => "token exchange",
            Self::ApplyUpload => "apply upload",
            Self::TransferBytes => "byte transfer",
            Self::CommitUpload => "commit upload",
        };
        f.write_str(name)
    }
}

impl JimengError {
    /// Whether the dispatcher may retry this error at the transport level.
    ///
    /// Business failures are structural, not transient: repeating the same
    /// request cannot fix an empty balance or a filtered prompt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportError(_) | Self::ApiError { .. }
        )
    }

    /// Whether this error should trigger the quality degradation ladder.
    pub fn is_insufficient_balance(&self) -> bool {
        matches!(self, Self::InsufficientBalance(_))
    }

    /// Build an upload pipeline failure with step context.
    pub fn upload(step: UploadStep, message: impl Into<String>) -> Self {
        Self::UploadFailed {
            step,
            message: message.into(),
        }
    }

    /// Build a generic vendor request failure.
    pub fn request_failed(message: impl Into<String>) -> Self {
        Self::RequestFailed {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for JimengError {
    fn from(err: reqwest::Error) -> Self {
        Self::TransportError(err.to_string())
    }
}

impl From<serde_json::Error> for JimengError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_errors_are_not_retryable() {
        assert!(!JimengError::InsufficientBalance("5000".into()).is_retryable());
        assert!(!JimengError::ContentFiltered.is_retryable());
        assert!(!JimengError::request_failed("bad params").is_retryable());
    }

    #[test]
    fn transport_errors_are_retryable() {
        assert!(JimengError::TransportError("connection reset".into()).is_retryable());
        assert!(JimengError::ApiError {
            status: 502,
            body: "bad gateway".into()
        }
        .is_retryable());
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: JimengError = json_err.into();
        assert!(matches!(err, JimengError::JsonError(_)));
    }

    #[test]
    fn upload_error_carries_step() {
        let err = JimengError::upload(UploadStep::TransferBytes, "code 4000");
        assert_eq!(
            err.to_string(),
            "Upload failed at byte transfer: code 4000"
        );
    }
}
