//! crowdsight-eye: detection, annotation and batch video processing
//!
//! Wraps the external object-detection service behind the [`Detector`]
//! trait, renders detections onto frames (markers, heatmap, side panel)
//! and drives whole videos through both, one frame at a time.

pub mod error;
pub mod inference;
pub mod render;
pub mod video;

pub use error::VisionError;
pub use inference::{normalize_response, Detector, HttpDetector};
pub use render::{render_dots, render_heatmap, render_panel};
pub use video::{FfmpegTool, JobStage, MediaTool, PipelineSettings, VideoPipeline, VideoReport};
