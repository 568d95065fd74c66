pub mod config;
pub mod detection;
pub mod error;

pub use config::{ConfigError, CrowdsightConfig};
pub use detection::{Detection, DetectionResult, FrameResult, FrameSummary, VideoStatistics};
pub use error::{Error, Result};
