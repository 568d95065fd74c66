use super::blend_pixel;
use crowdsight_core::Detection;
use image::{Rgba, RgbaImage};

/// Opacity of the original frame underneath the heat blobs
const BACKDROP_OPACITY: f32 = 0.7;
/// Blob radius as a fraction of the shorter frame side
const RADIUS_FRACTION: f32 = 0.1;

/// (offset, rgb, alpha) stops from the blob center outwards
const GRADIENT: [(f32, [u8; 3], f32); 3] = [
    (0.0, [255, 0, 0], 1.0),
    (0.5, [255, 255, 0], 0.5),
    (1.0, [0, 0, 255], 0.0),
];

pub(crate) fn draw_heatmap(frame: &RgbaImage, detections: &[Detection]) -> RgbaImage {
    let (width, height) = frame.dimensions();
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));

    for (x, y, pixel) in frame.enumerate_pixels() {
        blend_pixel(&mut canvas, x, y, [pixel.0[0], pixel.0[1], pixel.0[2]], BACKDROP_OPACITY);
    }

    let radius = width.min(height) as f32 * RADIUS_FRACTION;
    if radius < 1.0 {
        return canvas;
    }

    // drawn in order: later blobs paint over earlier ones
    for detection in detections {
        if let Some((cx, cy)) = detection.anchor() {
            paint_blob(&mut canvas, cx, cy, radius);
        }
    }
    canvas
}

fn paint_blob(canvas: &mut RgbaImage, cx: f32, cy: f32, radius: f32) {
    let (width, height) = canvas.dimensions();
    let x0 = (cx - radius).floor().max(0.0);
    let y0 = (cy - radius).floor().max(0.0);
    let x1 = (cx + radius).ceil().min(width as f32 - 1.0);
    let y1 = (cy + radius).ceil().min(height as f32 - 1.0);
    if x0 > x1 || y0 > y1 {
        return;
    }

    for py in y0 as u32..=y1 as u32 {
        for px in x0 as u32..=x1 as u32 {
            let dx = px as f32 - cx;
            let dy = py as f32 - cy;
            let dist = (dx * dx + dy * dy).sqrt();
            if dist > radius {
                continue;
            }
            let (rgb, alpha) = gradient_at(dist / radius);
            blend_pixel(canvas, px, py, rgb, alpha);
        }
    }
}

/// Linear interpolation across the gradient stops, `t` in 0..=1
fn gradient_at(t: f32) -> ([u8; 3], f32) {
    let t = t.clamp(0.0, 1.0);
    for pair in GRADIENT.windows(2) {
        let (start, from_rgb, from_a) = pair[0];
        let (end, to_rgb, to_a) = pair[1];
        if t <= end {
            let local = if end > start { (t - start) / (end - start) } else { 0.0 };
            let mut rgb = [0u8; 3];
            for c in 0..3 {
                let v = from_rgb[c] as f32 + (to_rgb[c] as f32 - from_rgb[c] as f32) * local;
                rgb[c] = v.round() as u8;
            }
            return (rgb, from_a + (to_a - from_a) * local);
        }
    }
    let (_, rgb, alpha) = GRADIENT[GRADIENT.len() - 1];
    (rgb, alpha)
}
