//! Credit-degradation retry for video jobs.
//!
//! When the account cannot afford the requested quality, the job is
//! retried down a fixed quality ladder instead of failing outright. The
//! ladder walk itself is a pure plan so the ordering is testable; the
//! driver owns re-submission.

use tracing::{info, warn};

use crate::credential::Credential;
use crate::error::{JimengError, Result};

use super::video::{VideoGenerator, VideoOptions};

/// Quality ladder, best first.
const RESOLUTIONS: &[&str] = &["1080p", "720p", "480p"];
const DURATIONS: &[u32] = &[10, 5];

/// A cursor over the (resolution, duration) quality ladder.
///
/// Duration degrades before resolution, and stepping down a resolution
/// resets duration to the longest option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradationPlan {
    resolution_idx: usize,
    duration_idx: usize,
}

impl DegradationPlan {
    /// Seed the cursor at the requested quality. Values off the ladder
    /// snap to its top.
    pub fn new(resolution: &str, duration: u32) -> Self {
        Self {
            resolution_idx: RESOLUTIONS.iter().position(|r| *r == resolution).unwrap_or(0),
            duration_idx: DURATIONS.iter().position(|d| *d == duration).unwrap_or(0),
        }
    }

    /// The quality the next attempt should use.
    pub fn current(&self) -> (&'static str, u32) {
        (
            RESOLUTIONS[self.resolution_idx],
            DURATIONS[self.duration_idx],
        )
    }

    /// Step down one rung. Returns the new quality, or `None` when the
    /// ladder is exhausted.
    pub fn advance(&mut self) -> Option<(&'static str, u32)> {
        if self.duration_idx + 1 < DURATIONS.len() {
            self.duration_idx += 1;
        } else if self.resolution_idx + 1 < RESOLUTIONS.len() {
            self.resolution_idx += 1;
            self.duration_idx = 0;
        } else {
            return None;
        }
        Some(self.current())
    }
}

/// Run a video job, stepping down the quality ladder on each
/// insufficient-balance rejection. Any other error is terminal, and so
/// is running out of ladder.
pub async fn generate_video_with_retry(
    generator: &VideoGenerator,
    model: &str,
    prompt: &str,
    options: VideoOptions,
    credential: &Credential,
) -> Result<String> {
    let requested_duration = options.duration.unwrap_or(10);
    let mut plan = DegradationPlan::new(&options.resolution, requested_duration);

    loop {
        let (resolution, duration) = plan.current();
        let attempt_options = VideoOptions {
            resolution: resolution.to_string(),
            duration: Some(duration),
            ..options.clone()
        };
        match generator
            .generate(model, prompt, attempt_options, credential)
            .await
        {
            Ok(url) => return Ok(url),
            Err(err) if err.is_insufficient_balance() => {
                match plan.advance() {
                    Some((next_resolution, next_duration)) => {
                        warn!(
                            resolution,
                            duration,
                            next_resolution,
                            next_duration,
                            "insufficient credits, stepping down quality"
                        );
                    }
                    None => {
                        info!("quality ladder exhausted");
                        return Err(JimengError::InsufficientBalance(
                            "insufficient credits at every quality level".to_string(),
                        ));
                    }
                }
            }
            Err(err) => return Err(err),
        }
    }
}
