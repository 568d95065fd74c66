//! Error types for crowdsight-eye

use crowdsight_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    /// Network failure, timeout or non-2xx reply from the detection service
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response from detection service: {0}")]
    InvalidResponse(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Frame extraction failed: {0}")]
    Extraction(String),

    #[error("Video reassembly failed: {0}")]
    Reassembly(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl From<reqwest::Error> for VisionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            VisionError::Transport(format!("request timed out: {}", err))
        } else {
            VisionError::Transport(err.to_string())
        }
    }
}

impl From<VisionError> for CoreError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::Core(inner) => inner,
            VisionError::Io(inner) => CoreError::Io(inner),
            other => CoreError::Processing(format!("Vision error: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vision_error_display() {
        let err = VisionError::Transport("connection refused".to_string());
        assert!(err.to_string().contains("Transport error"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_vision_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let vision_err: VisionError = io_err.into();
        match vision_err {
            VisionError::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_vision_error_to_core_error() {
        let core_err: CoreError = VisionError::Reassembly("ffmpeg exited 1".to_string()).into();
        match core_err {
            CoreError::Processing(msg) => {
                assert!(msg.contains("Vision error"));
                assert!(msg.contains("ffmpeg exited 1"));
            }
            _ => panic!("Expected Processing error"),
        }
    }
}
