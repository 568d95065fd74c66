// Live frame processing: detect, then render markers and heatmap

use crate::dispatch::{FrameJob, FrameProcessor, LiveOutcome};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crowdsight_eye::{render_dots, render_heatmap, Detector, VisionError};
use image::ImageFormat;
use std::sync::Arc;

const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Strip an optional `data:...;base64,` prefix and decode
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let encoded = match payload.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    BASE64.decode(encoded.trim())
}

pub fn jpeg_data_url(bytes: &[u8]) -> String {
    format!("{}{}", JPEG_DATA_URL_PREFIX, BASE64.encode(bytes))
}

/// Data URL labelled with the format sniffed from the bytes themselves
pub fn image_data_url(bytes: &[u8]) -> String {
    let mime = match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::WebP) => "image/webp",
        Ok(ImageFormat::Bmp) => "image/bmp",
        Ok(ImageFormat::Tiff) => "image/tiff",
        _ => "application/octet-stream",
    };
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}

/// [`FrameProcessor`] backed by a [`Detector`]
pub struct LiveFrameProcessor {
    detector: Arc<dyn Detector>,
}

impl LiveFrameProcessor {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self { detector }
    }
}

#[async_trait]
impl FrameProcessor for LiveFrameProcessor {
    async fn process(&self, job: &FrameJob) -> Result<LiveOutcome, VisionError> {
        let result = self.detector.infer(&job.source_bytes).await?;

        let frame = job.source_bytes.clone();
        let detections = result.detections.clone();
        let (annotated, heatmap) = tokio::task::spawn_blocking(move || {
            (render_dots(&frame, &detections), render_heatmap(&frame, &detections))
        })
        .await
        .map_err(|e| VisionError::Render(format!("render task failed: {}", e)))?;

        Ok(LiveOutcome {
            count: result.count,
            annotated_image: jpeg_data_url(&annotated),
            heatmap_image: jpeg_data_url(&heatmap),
            predictions: result.detections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdsight_core::{Detection, DetectionResult};
    use serde_json::Value as JsonValue;
    use uuid::Uuid;

    struct FixedDetector(Option<DetectionResult>);

    #[async_trait]
    impl Detector for FixedDetector {
        async fn infer(&self, _frame: &[u8]) -> Result<DetectionResult, VisionError> {
            self.0
                .clone()
                .ok_or_else(|| VisionError::Transport("request timed out".to_string()))
        }
    }

    #[test]
    fn test_decode_strips_data_url() {
        assert_eq!(decode_image_payload("data:image/png;base64,aGVsbG8=").unwrap(), b"hello");
        assert_eq!(decode_image_payload("aGVsbG8=").unwrap(), b"hello");
        assert!(decode_image_payload("data:image/png;base64,***").is_err());
    }

    #[test]
    fn test_jpeg_data_url() {
        assert_eq!(jpeg_data_url(b"hello"), "data:image/jpeg;base64,aGVsbG8=");
    }

    #[test]
    fn test_image_data_url_sniffs_format() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert!(image_data_url(&png).starts_with("data:image/png;base64,"));
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0];
        assert!(image_data_url(&jpeg).starts_with("data:image/jpeg;base64,"));
        assert!(image_data_url(b"hello").starts_with("data:application/octet-stream;base64,"));
    }

    #[tokio::test]
    async fn test_outcome_uses_service_count() {
        let result = DetectionResult::new(
            vec![Detection::new(5.0, 5.0, 2.0, 2.0, 0.9, "person")],
            Some(4),
            JsonValue::Null,
        );
        let processor = LiveFrameProcessor::new(Arc::new(FixedDetector(Some(result))));
        let job = FrameJob {
            source_bytes: b"not an image".to_vec(),
            submitter: Uuid::new_v4(),
        };

        let outcome = processor.process(&job).await.unwrap();
        assert_eq!(outcome.count, 4);
        assert_eq!(outcome.predictions.len(), 1);
        // undecodable input comes back unmodified
        assert_eq!(outcome.annotated_image, jpeg_data_url(b"not an image"));
        assert_eq!(outcome.heatmap_image, jpeg_data_url(b"not an image"));
    }

    #[tokio::test]
    async fn test_inference_failure_propagates() {
        let processor = LiveFrameProcessor::new(Arc::new(FixedDetector(None)));
        let job = FrameJob {
            source_bytes: vec![1, 2, 3],
            submitter: Uuid::new_v4(),
        };
        assert!(matches!(
            processor.process(&job).await,
            Err(VisionError::Transport(_))
        ));
    }
}
