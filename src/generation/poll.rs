//! The job poll state machine.
//!
//! The transition logic is a pure function over what one status query
//! observed (status code, fail code, result presence) plus the remaining
//! poll budget. The generation surfaces drive it in a loop and own the
//! sleeping, so the machine is testable without real delays.

use std::time::Duration;

use crate::config::PollConfig;
use crate::error::JimengError;

/// Vendor status code for a terminally failed job.
pub const STATUS_FAILED: i64 = 30;
/// Fail code for content-policy rejection.
pub const FAIL_CODE_CONTENT_FILTERED: &str = "2038";
/// Fail code class for insufficient credits at generation time.
pub const FAIL_CODE_INSUFFICIENT_BALANCE: &str = "2039";

/// What one status query reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollObservation {
    pub status: i64,
    pub fail_code: Option<String>,
    /// Whether any result item is populated yet.
    pub has_result: bool,
}

/// The machine's verdict after one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Still processing; poll again.
    Continue,
    /// The job left the processing set without a reported failure, or a
    /// result item appeared. Result extraction decides final success.
    Finished,
    /// The vendor reported a terminal failure.
    Failed { fail_code: Option<String> },
    /// The poll budget ran out while still processing.
    TimedOut,
}

/// Advance the machine by one observation.
///
/// `attempts_remaining` counts polls still allowed after this one.
pub fn step(
    processing_codes: &[i64],
    observation: &PollObservation,
    attempts_remaining: u32,
) -> Transition {
    if observation.status == STATUS_FAILED {
        return Transition::Failed {
            fail_code: observation.fail_code.clone(),
        };
    }
    if observation.has_result {
        return Transition::Finished;
    }
    if processing_codes.contains(&observation.status) {
        if attempts_remaining == 0 {
            return Transition::TimedOut;
        }
        return Transition::Continue;
    }
    Transition::Finished
}

/// Map a vendor-reported terminal failure to the domain error.
pub fn terminal_error(fail_code: Option<&str>) -> JimengError {
    match fail_code {
        Some(code) if code == FAIL_CODE_CONTENT_FILTERED => JimengError::ContentFiltered,
        Some(code) if code.starts_with(FAIL_CODE_INSUFFICIENT_BALANCE) => {
            JimengError::InsufficientBalance(format!("generation fail code {code}"))
        }
        Some(code) => JimengError::GenerationFailed(format!("fail code {code}")),
        None => JimengError::GenerationFailed("vendor reported failure".to_string()),
    }
}

/// Delay before the given (zero-based) poll attempt.
///
/// Grows linearly from `interval` up to `max_interval`; surfaces with
/// `interval == max_interval` poll at a fixed rate.
pub fn delay_for_attempt(config: &PollConfig, attempt: u32) -> Duration {
    let grown = config.interval * (attempt + 1);
    grown.min(config.max_interval).max(config.interval)
}

/// Delay before re-querying when the history record has not shown up
/// yet. A record can lag well behind submission, so the growth matches
/// [`delay_for_attempt`] but with a ceiling three times higher (30 s for
/// the production video tuning).
pub fn delay_for_missing_record(config: &PollConfig, attempt: u32) -> Duration {
    let grown = config.interval * (attempt + 1);
    grown.min(config.max_interval * 3).max(config.interval)
}
