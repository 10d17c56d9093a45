//! Rasterizer: paints a display list onto an RGBA canvas at a device scale
//! and flattens it into an opaque [`Bitmap`].

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use rusttype::Scale;

use super::layout::{GLYPH_WIDTH, LINE_HEIGHT};
use super::paint::PaintCommand;
use super::resources::ImageSet;
use super::{Bitmap, CaptureOptions, TextFont};
use crate::error::{CaptureFailure, Error, Result};

const PLACEHOLDER_FILL: Rgba<u8> = Rgba([238, 238, 238, 255]);
const PLACEHOLDER_EDGE: Rgba<u8> = Rgba([170, 170, 170, 255]);

/// Longest canvas side, in device pixels
pub const MAX_CANVAS_SIDE: u64 = 32_767;
/// Largest canvas area, in device pixels
pub const MAX_CANVAS_PIXELS: u64 = 16_384 * 16_384;

/// Device size of a `width`×`height` CSS pixel canvas at `scale`.
///
/// Fails before anything is allocated when the canvas has no pixels or
/// exceeds [`MAX_CANVAS_SIDE`] or [`MAX_CANVAS_PIXELS`].
pub fn canvas_size(width: u32, height: u32, scale: f32) -> Result<(u32, u32)> {
    let extent = |v: u32| (v as f64 * scale as f64).round() as u64;
    let (canvas_w, canvas_h) = (extent(width), extent(height));
    if canvas_w == 0 || canvas_h == 0 {
        return Err(Error::ConfigError(format!(
            "canvas {}x{} at scale {} has no pixels",
            width, height, scale
        )));
    }
    let too_large = canvas_w > MAX_CANVAS_SIDE
        || canvas_h > MAX_CANVAS_SIDE
        || canvas_w.saturating_mul(canvas_h) > MAX_CANVAS_PIXELS;
    if too_large {
        return Err(CaptureFailure::TooLarge {
            width: canvas_w,
            height: canvas_h,
        }
        .into());
    }
    Ok((canvas_w as u32, canvas_h as u32))
}

/// Paint `commands` for a `width`×`height` CSS pixel region.
///
/// The output is `scale` times larger in each dimension.
pub fn rasterize(
    commands: &[PaintCommand],
    width: u32,
    height: u32,
    options: &CaptureOptions,
    images: &ImageSet,
) -> Result<Bitmap> {
    let scale = options.scale;
    let (canvas_w, canvas_h) = canvas_size(width, height, scale)?;

    let [r, g, b] = options.background;
    let mut canvas = RgbaImage::from_pixel(canvas_w, canvas_h, Rgba([r, g, b, 255]));

    for cmd in commands {
        match cmd {
            PaintCommand::SolidRect { x, y, width, height, rgba } => {
                fill(&mut canvas, *x, *y, *width, *height, scale, to_rgba(*rgba));
            }
            PaintCommand::Outline { x, y, width, height, rgba } => {
                outline(&mut canvas, *x, *y, *width, *height, scale, to_rgba(*rgba));
            }
            PaintCommand::Text { x, y, text, scale: text_scale, rgba } => {
                draw_text_run(
                    &mut canvas,
                    *x,
                    *y,
                    text,
                    *text_scale,
                    to_rgba(*rgba),
                    scale,
                    options.font.as_ref(),
                );
            }
            PaintCommand::Image { x, y, width, height, src } => match images.get(src) {
                Some(img) => blit(&mut canvas, img, *x, *y, *width, *height, scale),
                None => {
                    fill(&mut canvas, *x, *y, *width, *height, scale, PLACEHOLDER_FILL);
                    outline(&mut canvas, *x, *y, *width, *height, scale, PLACEHOLDER_EDGE);
                }
            },
        }
    }

    Bitmap::from_image(DynamicImage::ImageRgba8(canvas).to_rgb8())
}

fn device(v: i32, scale: f32) -> i32 {
    (v as f32 * scale).round() as i32
}

fn device_len(v: u32, scale: f32) -> u32 {
    (v as f32 * scale).round().max(1.0) as u32
}

fn to_rgba((r, g, b, a): (u8, u8, u8, u8)) -> Rgba<u8> {
    Rgba([r, g, b, a])
}

fn fill(canvas: &mut RgbaImage, x: i32, y: i32, w: u32, h: u32, scale: f32, color: Rgba<u8>) {
    if w == 0 || h == 0 {
        return;
    }
    let rect = Rect::at(device(x, scale), device(y, scale))
        .of_size(device_len(w, scale), device_len(h, scale));
    draw_filled_rect_mut(canvas, rect, color);
}

fn outline(canvas: &mut RgbaImage, x: i32, y: i32, w: u32, h: u32, scale: f32, color: Rgba<u8>) {
    if w == 0 || h == 0 {
        return;
    }
    let rect = Rect::at(device(x, scale), device(y, scale))
        .of_size(device_len(w, scale), device_len(h, scale));
    draw_hollow_rect_mut(canvas, rect, color);
}

#[allow(clippy::too_many_arguments)]
fn draw_text_run(
    canvas: &mut RgbaImage,
    x: i32,
    y: i32,
    text: &str,
    text_scale: u32,
    color: Rgba<u8>,
    scale: f32,
    font: Option<&TextFont>,
) {
    let text_scale = text_scale.max(1);
    let line_h = (LINE_HEIGHT * text_scale) as i32;
    let glyph_w = (GLYPH_WIDTH * text_scale) as i32;

    for (row, line) in text.lines().enumerate() {
        let line_y = y + row as i32 * line_h;
        match font {
            Some(font) => {
                let px = LINE_HEIGHT as f32 * text_scale as f32 * scale;
                draw_text_mut(
                    canvas,
                    color,
                    device(x, scale),
                    device(line_y, scale),
                    Scale::uniform(px),
                    font.font(),
                    line,
                );
            }
            None => {
                // Block glyphs: one filled cell per visible character.
                let inset = text_scale as i32;
                for (i, ch) in line.chars().enumerate() {
                    if ch.is_whitespace() {
                        continue;
                    }
                    fill(
                        canvas,
                        x + i as i32 * glyph_w + inset,
                        line_y + inset,
                        (GLYPH_WIDTH - 2) * text_scale,
                        (LINE_HEIGHT - 3) * text_scale,
                        scale,
                        color,
                    );
                }
            }
        }
    }
}

fn blit(canvas: &mut RgbaImage, img: &DynamicImage, x: i32, y: i32, w: u32, h: u32, scale: f32) {
    let resized = imageops::resize(
        &img.to_rgba8(),
        device_len(w, scale),
        device_len(h, scale),
        FilterType::Triangle,
    );
    imageops::overlay(canvas, &resized, device(x, scale) as i64, device(y, scale) as i64);
}
