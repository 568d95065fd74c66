use super::font::{draw_text, fill_rect, text_height};
use super::markers::{draw_markers, PANEL_SCALE};
use super::{confidence_color, AMBER, GREEN, RED, WHITE};
use crowdsight_core::Detection;
use image::{imageops, Rgba, RgbaImage};

/// Width of the statistics panel appended to the right of a video frame
pub const PANEL_WIDTH: u32 = 300;

const TITLE: &str = "PEOPLE COUNTER";
const MAX_LISTED: usize = 8;
const PANEL_BG: Rgba<u8> = Rgba([24, 26, 34, 255]);
const DIVIDER: Rgba<u8> = Rgba([70, 74, 90, 255]);
const MUTED: Rgba<u8> = Rgba([170, 174, 190, 255]);
const MARGIN: i32 = 16;

/// Crowd density bucket derived from the count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DensityStatus {
    High,
    Moderate,
    Low,
}

impl DensityStatus {
    pub fn label(&self) -> &'static str {
        match self {
            DensityStatus::High => "HIGH DENSITY",
            DensityStatus::Moderate => "MODERATE",
            DensityStatus::Low => "LOW DENSITY",
        }
    }

    pub fn color(&self) -> Rgba<u8> {
        match self {
            DensityStatus::High => RED,
            DensityStatus::Moderate => AMBER,
            DensityStatus::Low => GREEN,
        }
    }
}

pub fn density_status(count: usize) -> DensityStatus {
    if count > 10 {
        DensityStatus::High
    } else if count > 5 {
        DensityStatus::Moderate
    } else {
        DensityStatus::Low
    }
}

pub(crate) fn draw_panel(
    frame: &RgbaImage,
    detections: &[Detection],
    count: u32,
    frame_number: u32,
    timestamp_label: &str,
) -> RgbaImage {
    let (width, height) = frame.dimensions();
    let mut canvas = RgbaImage::from_pixel(width + PANEL_WIDTH, height, PANEL_BG);
    imageops::replace(&mut canvas, frame, 0, 0);

    draw_markers(&mut canvas, detections, &PANEL_SCALE);

    let left = width as i32 + MARGIN;
    fill_rect(&mut canvas, width as i32, 0, 2, height as i32, DIVIDER);

    let mut y = MARGIN;
    draw_text(&mut canvas, TITLE, left, y, 2, WHITE, None);
    y += text_height(2) as i32 + 14;

    draw_text(&mut canvas, &count.to_string(), left, y, 7, WHITE, None);
    y += text_height(7) as i32 + 6;
    draw_text(&mut canvas, "PEOPLE DETECTED", left, y, 1, MUTED, None);
    y += text_height(1) as i32 + 14;

    draw_text(&mut canvas, &format!("FRAME: {}", frame_number), left, y, 2, WHITE, None);
    y += text_height(2) as i32 + 8;
    draw_text(&mut canvas, &format!("TIME: {}", timestamp_label), left, y, 2, WHITE, None);
    y += text_height(2) as i32 + 14;

    let status = density_status(count as usize);
    let swatch = text_height(2) as i32;
    fill_rect(&mut canvas, left, y, swatch, swatch, status.color());
    draw_text(&mut canvas, status.label(), left + swatch + 8, y, 2, status.color(), None);
    y += swatch + 16;

    fill_rect(&mut canvas, left, y, PANEL_WIDTH as i32 - 2 * MARGIN, 1, DIVIDER);
    y += 10;
    draw_text(&mut canvas, "DETECTIONS", left, y, 1, MUTED, None);
    y += text_height(1) as i32 + 8;

    for (idx, detection) in detections.iter().take(MAX_LISTED).enumerate() {
        let percent = detection.confidence_percent();
        let class_name = if detection.class_name.is_empty() {
            "object"
        } else {
            detection.class_name.as_str()
        };
        let line = format!("#{} {} {}%", idx + 1, class_name, percent);
        draw_text(&mut canvas, &line, left, y, 2, confidence_color(percent), None);
        y += text_height(2) as i32 + 6;
    }

    if detections.len() > MAX_LISTED {
        let more = format!("+{} MORE", detections.len() - MAX_LISTED);
        draw_text(&mut canvas, &more, left, y, 2, MUTED, None);
    }

    canvas
}
