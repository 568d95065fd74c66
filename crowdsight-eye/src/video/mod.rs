//! Batch video processing

pub mod media;
pub mod pipeline;

pub use media::{FfmpegTool, MediaTool};
pub use pipeline::{JobStage, PipelineSettings, VideoPipeline, VideoReport};
