//! Annotation rendering
//!
//! Every public entry point takes encoded frame bytes and returns encoded
//! JPEG bytes. Rendering never fails past this module: a frame that cannot
//! be decoded or re-encoded comes back unmodified, and a detection that
//! cannot be drawn is skipped while the remaining ones still render.

pub mod font;
mod heatmap;
mod markers;
mod panel;

pub use markers::{MarkerScale, LIVE_SCALE, PANEL_SCALE};
pub use panel::{density_status, DensityStatus, PANEL_WIDTH};

use crate::error::VisionError;
use crowdsight_core::Detection;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, Rgba, RgbaImage};
use tracing::warn;

const JPEG_QUALITY: u8 = 90;

pub(crate) const GREEN: Rgba<u8> = Rgba([0, 200, 83, 255]);
pub(crate) const AMBER: Rgba<u8> = Rgba([255, 171, 0, 255]);
pub(crate) const RED: Rgba<u8> = Rgba([229, 57, 53, 255]);
pub(crate) const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub(crate) const LABEL_BG: Rgba<u8> = Rgba([0, 0, 0, 200]);

/// Color tier for a confidence percentage: >80 green, >60 amber, else red
pub fn confidence_color(percent: u32) -> Rgba<u8> {
    if percent > 80 {
        GREEN
    } else if percent > 60 {
        AMBER
    } else {
        RED
    }
}

/// Draw a marker and confidence label for every detection.
pub fn render_dots(frame: &[u8], detections: &[Detection]) -> Vec<u8> {
    with_fallback(frame, "dots", || {
        let mut img = decode(frame)?;
        markers::draw_markers(&mut img, detections, &LIVE_SCALE);
        encode(&img)
    })
}

/// Radial-gradient density map over a dimmed copy of the frame.
pub fn render_heatmap(frame: &[u8], detections: &[Detection]) -> Vec<u8> {
    with_fallback(frame, "heatmap", || {
        let img = decode(frame)?;
        encode(&heatmap::draw_heatmap(&img, detections))
    })
}

/// Video-frame variant: markers plus a statistics side panel on a wider canvas.
/// `count` is the frame's resolved people count, shown as the headline number.
pub fn render_panel(
    frame: &[u8],
    detections: &[Detection],
    count: u32,
    frame_number: u32,
    timestamp_label: &str,
) -> Vec<u8> {
    with_fallback(frame, "panel", || {
        let img = decode(frame)?;
        encode(&panel::draw_panel(&img, detections, count, frame_number, timestamp_label))
    })
}

fn with_fallback<F>(frame: &[u8], kind: &str, render: F) -> Vec<u8>
where
    F: FnOnce() -> Result<Vec<u8>, VisionError>,
{
    match render() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(kind, error = %e, "Rendering failed, returning original frame");
            frame.to_vec()
        }
    }
}

pub(crate) fn decode(frame: &[u8]) -> Result<RgbaImage, VisionError> {
    if frame.is_empty() {
        return Err(VisionError::Render("empty frame".to_string()));
    }
    Ok(image::load_from_memory(frame)?.to_rgba8())
}

pub(crate) fn encode(img: &RgbaImage) -> Result<Vec<u8>, VisionError> {
    let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ColorType::Rgb8,
    )?;
    Ok(out)
}

/// Source-over blend of `color` at `alpha` (0..=1) onto pixel (`x`, `y`)
pub(crate) fn blend_pixel(img: &mut RgbaImage, x: u32, y: u32, color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    let dst = img.get_pixel_mut(x, y);
    for c in 0..3 {
        let blended = color[c] as f32 * alpha + dst.0[c] as f32 * (1.0 - alpha);
        dst.0[c] = blended.round().clamp(0.0, 255.0) as u8;
    }
    dst.0[3] = 255;
}


#[cfg(test)]
mod tests {
    use super::test_support::solid_frame;
    use super::*;

    fn person(x: f32, y: f32) -> Detection {
        Detection::new(x, y, 40.0, 80.0, 0.9, "person")
    }

    #[test]
    fn test_confidence_color_tiers() {
        assert_eq!(confidence_color(95), GREEN);
        assert_eq!(confidence_color(81), GREEN);
        assert_eq!(confidence_color(80), AMBER);
        assert_eq!(confidence_color(61), AMBER);
        assert_eq!(confidence_color(60), RED);
        assert_eq!(confidence_color(0), RED);
    }

    #[test]
    fn test_render_dots_keeps_dimensions() {
        let frame = solid_frame(160, 120, [40, 40, 40]);
        let out = render_dots(&frame, &[person(80.0, 60.0)]);
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!((img.width(), img.height()), (160, 120));
    }

    #[test]
    fn test_render_is_deterministic() {
        let frame = solid_frame(160, 120, [40, 40, 40]);
        let dets = vec![person(50.0, 40.0), person(120.0, 90.0)];
        assert_eq!(render_dots(&frame, &dets), render_dots(&frame, &dets));
        assert_eq!(render_heatmap(&frame, &dets), render_heatmap(&frame, &dets));
        assert_eq!(
            render_panel(&frame, &dets, 2, 3, "1.0s"),
            render_panel(&frame, &dets, 2, 3, "1.0s")
        );
    }

    #[test]
    fn test_undecodable_frame_is_returned_unchanged() {
        let garbage = b"definitely not an image".to_vec();
        assert_eq!(render_dots(&garbage, &[person(5.0, 5.0)]), garbage);
        assert_eq!(render_heatmap(&garbage, &[person(5.0, 5.0)]), garbage);
        assert_eq!(render_panel(&garbage, &[], 0, 1, "0.0s"), garbage);
        assert!(render_dots(&[], &[]).is_empty());
    }

    #[test]
    fn test_missing_coordinates_are_not_drawn() {
        let frame = solid_frame(100, 100, [0, 0, 0]);
        let baseline = render_dots(&frame, &[]);
        let skipped = render_dots(
            &frame,
            &[
                Detection::new(0.0, 50.0, 40.0, 40.0, 0.9, "person"),
                Detection::new(50.0, 0.0, 40.0, 40.0, 0.9, "person"),
            ],
        );
        assert_eq!(baseline, skipped);
    }

    #[test]
    fn test_panel_widens_canvas() {
        let frame = solid_frame(200, 150, [10, 10, 10]);
        let out = render_panel(&frame, &[person(100.0, 75.0)], 1, 1, "0.0s");
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!(img.width(), 200 + PANEL_WIDTH);
        assert_eq!(img.height(), 150);
    }

    #[test]
    fn test_blend_pixel() {
        let mut img = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
        blend_pixel(&mut img, 0, 0, [200, 100, 50], 0.5);
        assert_eq!(img.get_pixel(0, 0).0, [100, 50, 25, 255]);
        blend_pixel(&mut img, 0, 0, [255, 255, 255], 0.0);
        assert_eq!(img.get_pixel(0, 0).0, [100, 50, 25, 255]);
    }
}
