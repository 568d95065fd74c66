use super::font::{draw_text, text_height};
use super::{confidence_color, LABEL_BG, WHITE};
use crate::error::VisionError;
use crowdsight_core::Detection;
use image::RgbaImage;
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut};
use tracing::debug;

/// Marker sizing: `clamp(sqrt(width * height) / divisor, min, max)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerScale {
    pub divisor: f32,
    pub min_radius: f32,
    pub max_radius: f32,
}

/// Live stream markers
pub const LIVE_SCALE: MarkerScale = MarkerScale {
    divisor: 5.0,
    min_radius: 5.0,
    max_radius: 20.0,
};

/// Video frames with side panel
pub const PANEL_SCALE: MarkerScale = MarkerScale {
    divisor: 6.0,
    min_radius: 5.0,
    max_radius: 15.0,
};

const LABEL_SCALE: u32 = 2;
/// Coordinates beyond this are treated as corrupt rather than clipped
const MAX_COORDINATE: f32 = 1.0e6;

impl MarkerScale {
    pub fn radius(&self, detection: &Detection) -> f32 {
        let area = detection.width * detection.height;
        let raw = if area.is_finite() && area > 0.0 {
            area.sqrt() / self.divisor
        } else {
            0.0
        };
        raw.clamp(self.min_radius, self.max_radius)
    }
}

/// Draw every detection that has usable coordinates; returns how many were drawn.
pub(crate) fn draw_markers(img: &mut RgbaImage, detections: &[Detection], scale: &MarkerScale) -> usize {
    let mut drawn = 0;
    for (idx, detection) in detections.iter().enumerate() {
        let Some((x, y)) = detection.anchor() else {
            continue;
        };
        match draw_marker(img, x, y, detection, scale) {
            Ok(()) => drawn += 1,
            Err(e) => debug!(idx, error = %e, "Skipping detection marker"),
        }
    }
    drawn
}

fn draw_marker(
    img: &mut RgbaImage,
    x: f32,
    y: f32,
    detection: &Detection,
    scale: &MarkerScale,
) -> Result<(), VisionError> {
    if x.abs() > MAX_COORDINATE || y.abs() > MAX_COORDINATE {
        return Err(VisionError::Render(format!(
            "marker at ({}, {}) is outside any plausible frame",
            x, y
        )));
    }

    let center = (x.round() as i32, y.round() as i32);
    let radius = scale.radius(detection).round() as i32;
    let percent = detection.confidence_percent();

    draw_filled_circle_mut(img, center, radius, confidence_color(percent));
    draw_hollow_circle_mut(img, center, radius, WHITE);

    let label = format!("{}%", percent);
    let label_x = center.0 + radius + 4;
    let label_y = center.1 - text_height(LABEL_SCALE) as i32 / 2;
    draw_text(img, &label, label_x, label_y, LABEL_SCALE, WHITE, Some(LABEL_BG));
    Ok(())
}
