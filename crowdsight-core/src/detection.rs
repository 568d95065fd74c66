//! Detection data model shared by the live and batch paths

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Suffix appended to the timestamp label of a frame whose inference call failed.
pub const ERROR_LABEL_SUFFIX: &str = " (ERROR)";

/// One detected object. `x`/`y` are the box center in source-image pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    #[serde(rename = "class")]
    pub class_name: String,
}

impl Detection {
    pub fn new(x: f32, y: f32, width: f32, height: f32, confidence: f32, class_name: impl Into<String>) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
            class_name: class_name.into(),
        }
    }

    /// Center point to draw at, or `None` when either coordinate is missing.
    ///
    /// The detection service reports absent coordinates as zero, so a zero
    /// (or non-finite) `x` or `y` means "do not render".
    pub fn anchor(&self) -> Option<(f32, f32)> {
        let usable = |v: f32| v.is_finite() && v != 0.0;
        if usable(self.x) && usable(self.y) {
            Some((self.x, self.y))
        } else {
            None
        }
    }

    /// Confidence as a whole percentage, e.g. `0.876` -> `88`.
    pub fn confidence_percent(&self) -> u32 {
        if !self.confidence.is_finite() {
            return 0;
        }
        (self.confidence.clamp(0.0, 1.0) * 100.0).round() as u32
    }
}

/// Canonical result of one inference call.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub count: u32,
    #[serde(skip)]
    pub raw: JsonValue,
}

impl DetectionResult {
    /// Build a result; `reported_count` is the service's own object count and
    /// wins over the length of `detections` when present.
    pub fn new(detections: Vec<Detection>, reported_count: Option<u32>, raw: JsonValue) -> Self {
        let count = reported_count.unwrap_or(detections.len() as u32);
        Self {
            detections,
            count,
            raw,
        }
    }
}

/// Outcome of one frame in a batch video job.
#[derive(Debug, Clone)]
pub struct FrameResult {
    /// 1-based position in the extracted sequence
    pub frame_number: u32,
    pub timestamp_label: String,
    pub detection: Option<DetectionResult>,
    pub annotated: Vec<u8>,
    pub failed: bool,
}

impl FrameResult {
    /// Count contributed to statistics; failed frames contribute zero.
    pub fn count(&self) -> u32 {
        if self.failed {
            return 0;
        }
        self.detection.as_ref().map(|d| d.count).unwrap_or(0)
    }

    pub fn summary(&self) -> FrameSummary {
        FrameSummary {
            frame_number: self.frame_number,
            timestamp: self.timestamp_label.clone(),
            count: self.count(),
            success: !self.failed,
            predictions: self
                .detection
                .as_ref()
                .map(|d| d.detections.clone())
                .unwrap_or_default(),
        }
    }
}

/// Per-frame entry of the video response envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSummary {
    pub frame_number: u32,
    pub timestamp: String,
    pub count: u32,
    pub success: bool,
    pub predictions: Vec<Detection>,
}

/// Aggregates over the frames of a video job that did not fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatistics {
    pub total_people: u64,
    pub average_people: f64,
    pub max_people: u32,
    pub duration: String,
}

impl VideoStatistics {
    pub fn from_results(results: &[FrameResult], frame_rate_hz: f64) -> Self {
        let valid: Vec<u32> = results.iter().filter(|r| !r.failed).map(|r| r.count()).collect();

        let total_people: u64 = valid.iter().map(|&c| u64::from(c)).sum();
        let max_people = valid.iter().copied().max().unwrap_or(0);
        let average_people = if valid.is_empty() {
            0.0
        } else {
            total_people as f64 / valid.len() as f64
        };

        Self {
            total_people,
            average_people,
            max_people,
            duration: seconds_label(results.len() as f64 / frame_rate_hz),
        }
    }
}

/// Timestamp label for the frame at `index` (0-based) sampled at `frame_rate_hz`.
pub fn timestamp_label(index: usize, frame_rate_hz: f64) -> String {
    seconds_label(index as f64 / frame_rate_hz)
}

fn seconds_label(seconds: f64) -> String {
    if seconds.is_finite() {
        format!("{:.1}s", seconds)
    } else {
        "0.0s".to_string()
    }
}
