//! Frame extraction and video reassembly through an external encoder

use crate::error::VisionError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// printf-style pattern shared by extraction output and reassembly input
pub const FRAME_PATTERN: &str = "frame_%05d.jpg";

/// File name of the 1-based frame `number` under [`FRAME_PATTERN`]
pub fn frame_file_name(number: u32) -> String {
    format!("frame_{:05}.jpg", number)
}

/// Demux/encode capability used by the batch pipeline
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Sample `video` at `frame_rate_hz` into `out_dir`; returns the frames in capture order.
    async fn extract_frames(
        &self,
        video: &Path,
        out_dir: &Path,
        frame_rate_hz: f64,
    ) -> Result<Vec<PathBuf>, VisionError>;

    /// Encode the [`FRAME_PATTERN`] sequence in `frames_dir` into `output`.
    async fn reassemble(
        &self,
        frames_dir: &Path,
        frame_rate_hz: f64,
        output: &Path,
    ) -> Result<PathBuf, VisionError>;
}

/// List `.jpg` files in `dir`, sorted lexically (capture order for [`FRAME_PATTERN`])
pub async fn list_frames(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut frames = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_jpg = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("jpg"))
            .unwrap_or(false);
        if is_jpg {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

/// [`MediaTool`] backed by the `ffmpeg` command-line encoder
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    binary: String,
}

impl FfmpegTool {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run the encoder; the error message carries the tail of its stderr.
    async fn run(&self, args: &[String]) -> Result<(), String> {
        debug!(binary = %self.binary, ?args, "Spawning encoder");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| format!("failed to spawn {}: {}", self.binary, e))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = {
            let chars: Vec<char> = stderr.trim_end().chars().collect();
            let start = chars.len().saturating_sub(400);
            chars[start..].iter().collect()
        };
        Err(format!("{} exited with {}: {}", self.binary, output.status, tail))
    }
}

impl Default for FfmpegTool {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn extract_frames(
        &self,
        video: &Path,
        out_dir: &Path,
        frame_rate_hz: f64,
    ) -> Result<Vec<PathBuf>, VisionError> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| VisionError::Extraction(format!("cannot create {}: {}", out_dir.display(), e)))?;

        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            video.display().to_string(),
            "-vf".to_string(),
            format!("fps={}", frame_rate_hz),
            out_dir.join(FRAME_PATTERN).display().to_string(),
        ];
        self.run(&args).await.map_err(VisionError::Extraction)?;

        let frames = list_frames(out_dir)
            .await
            .map_err(|e| VisionError::Extraction(format!("cannot list frames: {}", e)))?;
        info!(frames = frames.len(), video = %video.display(), "Extracted frames");
        Ok(frames)
    }

    async fn reassemble(
        &self,
        frames_dir: &Path,
        frame_rate_hz: f64,
        output: &Path,
    ) -> Result<PathBuf, VisionError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VisionError::Reassembly(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let args = vec![
            "-y".to_string(),
            "-framerate".to_string(),
            frame_rate_hz.to_string(),
            "-i".to_string(),
            frames_dir.join(FRAME_PATTERN).display().to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            output.display().to_string(),
        ];
        self.run(&args).await.map_err(VisionError::Reassembly)?;

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(VisionError::Reassembly(format!(
                "encoder reported success but {} is missing",
                output.display()
            )));
        }
        info!(output = %output.display(), "Reassembled video");
        Ok(output.to_path_buf())
    }
}
