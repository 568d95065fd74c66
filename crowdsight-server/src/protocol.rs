// Live channel wire protocol
// JSON text frames, internally tagged by "type"

use crowdsight_core::Detection;
use serde::{Deserialize, Serialize};

/// Messages a viewer sends to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// A camera frame, base64 encoded (optionally as a data URL)
    #[serde(rename_all = "camelCase")]
    Frame { image_base64: String },

    UpdateThreshold { threshold: u32 },
}

/// Messages the server pushes to viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Frame accepted into the pipeline (not yet processed)
    Ack { received: bool },

    Prediction(Prediction),

    ThresholdUpdated { threshold: u32 },

    /// Crowd count reached the alert threshold
    Alert {
        count: u32,
        threshold: u32,
        timestamp: String,
    },

    Error { message: String },
}

/// Outcome of one live frame; failures carry only `error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotated_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heatmap_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predictions: Option<Vec<Detection>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub const BUSY_MESSAGE: &str = "Server busy, frame dropped";

impl Prediction {
    pub fn success(
        count: u32,
        annotated_image: String,
        heatmap_image: String,
        predictions: Vec<Detection>,
        threshold: u32,
    ) -> Self {
        Self {
            success: true,
            count: Some(count),
            annotated_image: Some(annotated_image),
            heatmap_image: Some(heatmap_image),
            predictions: Some(predictions),
            threshold: Some(threshold),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            count: None,
            annotated_image: None,
            heatmap_image: None,
            predictions: None,
            threshold: None,
            error: Some(error.into()),
        }
    }
}

impl ClientMessage {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn ack() -> Self {
        ServerMessage::Ack { received: true }
    }

    pub fn busy() -> Self {
        ServerMessage::Prediction(Prediction::failure(BUSY_MESSAGE))
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn alert(count: u32, threshold: u32) -> Self {
        ServerMessage::Alert {
            count,
            threshold,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
