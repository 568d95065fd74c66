//! Client for the external object-detection service

use crate::error::VisionError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crowdsight_core::config::InferenceConfig;
use crowdsight_core::{Detection, DetectionResult};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::debug;

/// Something that turns an encoded image into detections.
///
/// Implementations perform exactly one attempt per call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Detector: Send + Sync {
    async fn infer(&self, frame: &[u8]) -> Result<DetectionResult, VisionError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InferenceRequest {
    image_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence_threshold: Option<f32>,
}

/// HTTP detector talking JSON to the detection service
pub struct HttpDetector {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    confidence_threshold: Option<f32>,
}

impl HttpDetector {
    pub fn new(config: &InferenceConfig) -> Result<Self, VisionError> {
        Self::with_timeout(config, config.timeout())
    }

    pub fn with_timeout(config: &InferenceConfig, timeout: Duration) -> Result<Self, VisionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VisionError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            confidence_threshold: config.confidence_threshold,
        })
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn infer(&self, frame: &[u8]) -> Result<DetectionResult, VisionError> {
        let body = InferenceRequest {
            image_base64: BASE64.encode(frame),
            confidence_threshold: self.confidence_threshold,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.query(&[("api_key", key)]);
        }

        debug!(bytes = frame.len(), "Sending frame to detection service");
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text = if text.len() > 500 {
                let mut cut = 500;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                &text[..cut]
            } else {
                &text[..]
            };
            return Err(VisionError::Transport(format!("HTTP {}: {}", status, text)));
        }

        let raw: JsonValue = response
            .json()
            .await
            .map_err(|e| VisionError::InvalidResponse(e.to_string()))?;

        let result = normalize_response(raw);
        debug!(count = result.count, "Detection service replied");
        Ok(result)
    }
}

/// Normalize whatever the service returned into a [`DetectionResult`].
///
/// Predictions are read from `predictions`, or from `predictions.predictions`
/// when the service nests them. The object count comes from `count` or
/// `object_count` and falls back to the number of predictions.
pub fn normalize_response(raw: JsonValue) -> DetectionResult {
    let predictions = match raw.get("predictions") {
        Some(JsonValue::Array(items)) => Some(items),
        Some(nested @ JsonValue::Object(_)) => nested.get("predictions").and_then(JsonValue::as_array),
        _ => None,
    };

    let detections: Vec<Detection> = predictions
        .map(|items| items.iter().map(parse_prediction).collect())
        .unwrap_or_default();

    let reported = raw
        .get("count")
        .or_else(|| raw.get("object_count"))
        .and_then(JsonValue::as_u64)
        .map(|c| c.min(u32::MAX as u64) as u32);

    DetectionResult::new(detections, reported, raw)
}

fn parse_prediction(item: &JsonValue) -> Detection {
    let num = |key: &str| item.get(key).and_then(JsonValue::as_f64).unwrap_or(0.0) as f32;
    let class_name = item
        .get("class")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();

    let confidence = num("confidence");
    Detection {
        x: num("x"),
        y: num("y"),
        width: num("width"),
        height: num("height"),
        confidence: if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 },
        class_name,
    }
}
