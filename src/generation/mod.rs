//! Generation surfaces: job submission, polling, and degradation retry.

pub mod degrade;
pub mod image;
pub mod poll;
pub mod video;

pub use degrade::{generate_video_with_retry, DegradationPlan};
pub use image::{ImageGenerator, ImageOptions};
pub use video::{VideoGenerator, VideoOptions};
