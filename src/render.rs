use std::io::Cursor;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use log::{debug, trace};

use crate::gesture::ScrollState;
use crate::session::VisibleSurface;

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);
/// Bound panel still decoding (or not materialized).
const PENDING: Rgba<u8> = Rgba([48, 48, 48, 255]);
const FAILED: Rgba<u8> = Rgba([96, 24, 24, 255]);

/// Compose the visible panels into one viewport image under the zoom
/// transform of `state` (scale about the viewport center, then translate).
///
/// Only the part of each panel that lands inside the viewport is resampled,
/// so the cost is bounded by the viewport size, not by panel height times
/// zoom.
pub fn compose_viewport(
    surfaces: &[VisibleSurface],
    state: &ScrollState,
    width: u32,
    height: u32,
) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(width.max(1), height.max(1), BACKGROUND);
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let scale = state.scale;

    for surface in surfaces {
        let rect = Rect {
            left: cx - cx * scale + state.x,
            top: cy + (surface.offset - state.offset - cy) * scale + state.y,
            width: width as f32 * scale,
            height: surface.height * scale,
        };
        match &surface.image {
            Some(img) if img.width() > 0 && img.height() > 0 => draw_image(&mut canvas, img, rect),
            _ => {
                let color = if surface.failed { FAILED } else { PENDING };
                fill(&mut canvas, rect, color);
            }
        }
        trace!(
            "render: panel {} at ({:.0},{:.0}) {:.0}x{:.0}",
            surface.index, rect.left, rect.top, rect.width, rect.height
        );
    }
    debug!(
        "render: composed {} panel(s) into {width}x{height} (scale={:.2})",
        surfaces.len(),
        scale
    );
    canvas
}

/// Destination of a panel in viewport pixels.
#[derive(Debug, Clone, Copy)]
struct Rect {
    left: f32,
    top: f32,
    width: f32,
    height: f32,
}

impl Rect {
    /// Part of the rect inside a `w` x `h` canvas as `(x0, y0, x1, y1)`.
    fn clip(&self, w: u32, h: u32) -> Option<(f32, f32, f32, f32)> {
        let finite = [self.left, self.top, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.width <= 0.0 || self.height <= 0.0 {
            return None;
        }
        let x0 = self.left.max(0.0);
        let y0 = self.top.max(0.0);
        let x1 = (self.left + self.width).min(w as f32);
        let y1 = (self.top + self.height).min(h as f32);
        (x0 < x1 && y0 < y1).then_some((x0, y0, x1, y1))
    }
}

fn fill(canvas: &mut RgbaImage, rect: Rect, color: Rgba<u8>) {
    let Some((x0, y0, x1, y1)) = rect.clip(canvas.width(), canvas.height()) else {
        return;
    };
    let (x0, y0) = (x0.round() as u32, y0.round() as u32);
    let (x1, y1) = (x1.round() as u32, y1.round() as u32);
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x, y, color);
        }
    }
}

/// Crop the source to the visible part of `rect` and resample only that.
fn draw_image(canvas: &mut RgbaImage, img: &DynamicImage, rect: Rect) {
    let Some((x0, y0, x1, y1)) = rect.clip(canvas.width(), canvas.height()) else {
        return;
    };
    let (sw, sh) = (img.width() as f32, img.height() as f32);
    // Viewport pixels per source pixel.
    let (px, py) = (rect.width / sw, rect.height / sh);

    let sx0 = ((x0 - rect.left) / px).floor().clamp(0.0, sw - 1.0);
    let sy0 = ((y0 - rect.top) / py).floor().clamp(0.0, sh - 1.0);
    let sx1 = ((x1 - rect.left) / px).ceil().clamp(sx0 + 1.0, sw);
    let sy1 = ((y1 - rect.top) / py).ceil().clamp(sy0 + 1.0, sh);

    let crop = img.crop_imm(sx0 as u32, sy0 as u32, (sx1 - sx0) as u32, (sy1 - sy0) as u32);
    let dw = ((sx1 - sx0) * px).round().max(1.0) as u32;
    let dh = ((sy1 - sy0) * py).round().max(1.0) as u32;
    let scaled = crop.resize_exact(dw, dh, FilterType::Triangle).to_rgba8();
    let dx = (rect.left + sx0 * px).round() as i64;
    let dy = (rect.top + sy0 * py).round() as i64;
    imageops::replace(canvas, &scaled, dx, dy);
}

/// Encode a composed viewport as PNG bytes.
pub fn encode_png(image: RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .context("PNG encoding failed")?;
    Ok(buf)
}
