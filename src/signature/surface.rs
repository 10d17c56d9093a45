//! Pixel surface the signature is drawn onto.
//!
//! Callers work in CSS pixels; the backing canvas is `pixel_ratio` times
//! larger and every coordinate is scaled on the way in.

use std::io::Cursor;

use image::{ImageOutputFormat, Rgba, RgbaImage};
use imageproc::drawing::draw_filled_circle_mut;

use super::StrokePoint;
use crate::error::{Error, Result};

pub struct DrawingSurface {
    css_width: u32,
    css_height: u32,
    ratio: f32,
    canvas: RgbaImage,
    background: Rgba<u8>,
    pen: Rgba<u8>,
}

impl DrawingSurface {
    pub fn new(
        css_width: u32,
        css_height: u32,
        ratio: f32,
        background: [u8; 4],
        pen: [u8; 4],
    ) -> Result<Self> {
        if css_width == 0 || css_height == 0 {
            return Err(Error::ConfigError(format!(
                "signature surface must have a size, got {}x{}",
                css_width, css_height
            )));
        }
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(Error::ConfigError(format!("invalid pixel ratio {}", ratio)));
        }
        let width = (css_width as f32 * ratio).round().max(1.0) as u32;
        let height = (css_height as f32 * ratio).round().max(1.0) as u32;
        let background = Rgba(background);
        Ok(Self {
            css_width,
            css_height,
            ratio,
            canvas: RgbaImage::from_pixel(width, height, background),
            background,
            pen: Rgba(pen),
        })
    }

    pub fn css_size(&self) -> (u32, u32) {
        (self.css_width, self.css_height)
    }

    pub fn pixel_size(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    /// Refill with the background colour.
    pub fn clear(&mut self) {
        for px in self.canvas.pixels_mut() {
            *px = self.background;
        }
    }

    /// A round dot of `width` CSS pixels centred on `p`.
    ///
    /// Dots entirely off the canvas are skipped.
    pub fn dot(&mut self, p: &StrokePoint, width: f32) {
        let (x, y) = self.to_device(p.x, p.y);
        let reach = self.reach(width);
        let (w, h) = self.canvas.dimensions();
        let inside = x >= -reach && y >= -reach && x <= w as f64 + reach && y <= h as f64 + reach;
        if inside {
            self.stamp(x, y, width);
        }
    }

    /// A segment whose width interpolates from `start_width` to `end_width`.
    ///
    /// Only the part of the segment that can touch the canvas is stamped.
    pub fn segment(&mut self, a: &StrokePoint, b: &StrokePoint, start_width: f32, end_width: f32) {
        let (ax, ay) = self.to_device(a.x, a.y);
        let (bx, by) = self.to_device(b.x, b.y);
        let reach = self.reach(start_width.max(end_width));
        let Some((t0, t1)) = self.clip(ax, ay, bx, by, reach) else {
            return;
        };
        let (dx, dy) = (bx - ax, by - ay);
        let length = (t1 - t0) * dx.hypot(dy);
        // stamp at half-pixel steps so the stroke has no gaps
        let steps = (length * 2.0).ceil().max(1.0) as u32;
        for i in 0..=steps {
            let t = t0 + (t1 - t0) * i as f64 / steps as f64;
            let width = start_width + (end_width - start_width) * t as f32;
            self.stamp(ax + dx * t, ay + dy * t, width);
        }
    }

    /// Encode the canvas as PNG.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.canvas
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .map_err(|e| Error::SerializationError(format!("PNG encoding failed: {}", e)))?;
        Ok(buf)
    }

    fn to_device(&self, x: f32, y: f32) -> (f64, f64) {
        let ratio = self.ratio as f64;
        (x as f64 * ratio, y as f64 * ratio)
    }

    /// Device pixels a stamp of `width` CSS pixels extends past its centre.
    fn reach(&self, width: f32) -> f64 {
        let (w, h) = self.canvas.dimensions();
        let radius = (width as f64 * self.ratio as f64 / 2.0).clamp(1.0, (w + h) as f64);
        radius + 1.0
    }

    fn stamp(&mut self, x: f64, y: f64, width: f32) {
        let (w, h) = self.canvas.dimensions();
        let max_radius = (w + h) as f32;
        let radius = (width * self.ratio / 2.0).round().clamp(1.0, max_radius) as i32;
        draw_filled_circle_mut(&mut self.canvas, (x.round() as i32, y.round() as i32), radius, self.pen);
    }

    /// Parameter range of `a`→`b` inside the canvas grown by `reach` on every
    /// side (Liang-Barsky), or `None` when the segment misses it.
    fn clip(&self, ax: f64, ay: f64, bx: f64, by: f64, reach: f64) -> Option<(f64, f64)> {
        let (w, h) = self.canvas.dimensions();
        let (dx, dy) = (bx - ax, by - ay);
        let (mut t0, mut t1) = (0.0f64, 1.0f64);
        let edges = [
            (-dx, ax + reach),
            (dx, w as f64 + reach - ax),
            (-dy, ay + reach),
            (dy, h as f64 + reach - ay),
        ];
        for (p, q) in edges {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                t0 = t0.max(r);
            } else if r < t0 {
                return None;
            } else {
                t1 = t1.min(r);
            }
        }
        Some((t0, t1))
    }
}
