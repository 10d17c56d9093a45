//! Freehand signature capture.
//!
//! [`SignaturePad`] is an explicit state machine over pen events. Strokes are
//! kept as data and drawn onto a [`surface::DrawingSurface`] while the pad is
//! open; exporting yields a PNG [`SignatureImage`] that can be embedded into a
//! document as a data URL.

pub mod surface;

use base64::Engine as _;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use surface::DrawingSurface;

/// Largest side, in CSS pixels, of a surface sized from the strokes alone
const MAX_OFFSCREEN_SIDE: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PadState {
    Empty,
    /// Pen is down but no point has been recorded yet
    Drawing,
    HasInk,
}

/// Pen and surface settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PadOptions {
    pub background: [u8; 4],
    pub pen_color: [u8; 4],
    /// Device pixels per CSS pixel
    pub pixel_ratio: f32,
    pub min_width: f32,
    pub max_width: f32,
    /// Points closer than this (CSS px) to the previous one are skipped
    pub min_distance: f32,
    /// Weight of the newest velocity sample, 0..=1
    pub velocity_filter_weight: f32,
}

impl Default for PadOptions {
    fn default() -> Self {
        Self {
            background: [255, 255, 255, 255],
            pen_color: [0, 0, 0, 255],
            pixel_ratio: 2.0,
            min_width: 0.5,
            max_width: 2.5,
            min_distance: 5.0,
            velocity_filter_weight: 0.7,
        }
    }
}

impl PadOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.pixel_ratio.is_finite() || self.pixel_ratio <= 0.0 {
            return Err(Error::ConfigError(format!(
                "pixel_ratio must be positive, got {}",
                self.pixel_ratio
            )));
        }
        if !(self.min_width > 0.0 && self.min_width <= self.max_width && self.max_width.is_finite()) {
            return Err(Error::ConfigError(format!(
                "pen widths must satisfy 0 < min_width <= max_width, got {}..{}",
                self.min_width, self.max_width
            )));
        }
        if !(self.min_distance >= 0.0) {
            return Err(Error::ConfigError(format!(
                "min_distance must not be negative, got {}",
                self.min_distance
            )));
        }
        if !(0.0..=1.0).contains(&self.velocity_filter_weight) {
            return Err(Error::ConfigError(format!(
                "velocity_filter_weight must be within 0..=1, got {}",
                self.velocity_filter_weight
            )));
        }
        Ok(())
    }
}

/// A sampled pen position in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokePoint {
    pub x: f32,
    pub y: f32,
    pub time_ms: u64,
}

impl StrokePoint {
    pub fn new(x: f32, y: f32, time_ms: u64) -> Self {
        Self { x, y, time_ms }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    fn distance_to(&self, other: &StrokePoint) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// One pen-down to pen-up gesture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrokePath {
    pub points: Vec<StrokePoint>,
}

impl StrokePath {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down(StrokePoint),
    Move(StrokePoint),
    Up(StrokePoint),
}

/// Proof of the current input binding; invalidated by reopening or closing.
#[derive(Debug, PartialEq, Eq)]
pub struct InputSubscription {
    generation: u64,
}

/// PNG export of a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl SignatureImage {
    pub fn to_data_url(&self) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.png)
        )
    }
}

/// Filtered pen velocity and the width it produced.
#[derive(Debug, Clone, Copy)]
struct PenDynamics {
    velocity: f32,
    width: f32,
}

impl PenDynamics {
    fn start(options: &PadOptions) -> Self {
        Self {
            velocity: 0.0,
            width: (options.min_width + options.max_width) / 2.0,
        }
    }

    /// Advance to `to`; returns the widths at both ends of the segment.
    fn advance(&mut self, options: &PadOptions, from: &StrokePoint, to: &StrokePoint) -> (f32, f32) {
        let dt = to.time_ms.saturating_sub(from.time_ms).max(1) as f32;
        let sample = from.distance_to(to) / dt;
        let w = options.velocity_filter_weight;
        self.velocity = w * sample + (1.0 - w) * self.velocity;
        let start = self.width;
        self.width = (options.max_width / (self.velocity + 1.0)).max(options.min_width);
        (start, self.width)
    }
}

pub struct SignaturePad {
    options: PadOptions,
    surface: Option<DrawingSurface>,
    /// CSS size of the most recently opened surface
    last_size: Option<(u32, u32)>,
    generation: u64,
    subscribed: bool,
    strokes: Vec<StrokePath>,
    drawing: bool,
    dynamics: PenDynamics,
}

impl SignaturePad {
    pub fn new(options: PadOptions) -> Result<Self> {
        options.validate()?;
        let dynamics = PenDynamics::start(&options);
        Ok(Self {
            options,
            surface: None,
            last_size: None,
            generation: 0,
            subscribed: false,
            strokes: Vec::new(),
            drawing: false,
            dynamics,
        })
    }

    pub fn options(&self) -> &PadOptions {
        &self.options
    }

    /// Size a fresh surface to `css_width` × `css_height` and bind input.
    ///
    /// Any previous subscription stops being honoured. Existing strokes are
    /// replayed onto the new surface.
    pub fn open(&mut self, css_width: u32, css_height: u32) -> Result<InputSubscription> {
        let surface = DrawingSurface::new(
            css_width,
            css_height,
            self.options.pixel_ratio,
            self.options.background,
            self.options.pen_color,
        )?;
        self.surface = Some(surface);
        self.last_size = Some((css_width, css_height));
        self.replay();
        self.generation += 1;
        self.subscribed = true;
        debug!(
            "Signature pad opened at {}x{} css px (subscription {})",
            css_width, css_height, self.generation
        );
        Ok(InputSubscription {
            generation: self.generation,
        })
    }

    /// Drop the input binding and the surface. Strokes are kept.
    pub fn close(&mut self) {
        if self.drawing {
            self.pen_up();
        }
        self.subscribed = false;
        self.surface = None;
        debug!("Signature pad closed");
    }

    pub fn is_open(&self) -> bool {
        self.surface.is_some()
    }

    pub fn is_subscribed(&self, subscription: &InputSubscription) -> bool {
        self.subscribed && subscription.generation == self.generation
    }

    /// Dispatch a pointer event. Returns `false` when the event was ignored.
    pub fn handle(&mut self, subscription: &InputSubscription, event: PointerEvent) -> bool {
        if !self.is_subscribed(subscription) {
            debug!("Ignoring {:?} from stale subscription", event);
            return false;
        }
        match event {
            PointerEvent::Down(p) => {
                if !self.pen_down() {
                    return false;
                }
                self.record_point(p);
                true
            }
            PointerEvent::Move(p) => self.drawing && self.record_point(p),
            PointerEvent::Up(p) => {
                if !self.drawing {
                    return false;
                }
                self.record_point(p);
                self.pen_up();
                true
            }
        }
    }

    /// Begin a stroke. Refused while the pad has no open surface.
    pub fn pen_down(&mut self) -> bool {
        if self.surface.is_none() {
            debug!("Ignoring pen down on a closed signature pad");
            return false;
        }
        if self.drawing {
            self.pen_up();
        }
        self.strokes.push(StrokePath::default());
        self.drawing = true;
        self.dynamics = PenDynamics::start(&self.options);
        true
    }

    /// Append `p` to the active stroke. Returns whether the point was kept.
    ///
    /// Points with a non-finite coordinate are dropped.
    pub fn record_point(&mut self, p: StrokePoint) -> bool {
        if !self.drawing || self.surface.is_none() || !p.is_finite() {
            return false;
        }
        let Some(stroke) = self.strokes.last_mut() else {
            return false;
        };
        let previous = stroke.points.last().copied();
        if let Some(prev) = previous {
            if prev.distance_to(&p) < self.options.min_distance {
                return false;
            }
        }
        stroke.points.push(p);

        match previous {
            None => {
                if let Some(surface) = self.surface.as_mut() {
                    surface.dot(&p, self.dynamics.width);
                }
            }
            Some(prev) => {
                let (start, end) = self.dynamics.advance(&self.options, &prev, &p);
                if let Some(surface) = self.surface.as_mut() {
                    surface.segment(&prev, &p, start, end);
                }
            }
        }
        true
    }

    /// End the active stroke; a stroke without points is discarded.
    pub fn pen_up(&mut self) {
        if !self.drawing {
            return;
        }
        self.drawing = false;
        if self.strokes.last().map_or(false, StrokePath::is_empty) {
            self.strokes.pop();
        }
    }

    /// Wipe all strokes and the surface.
    pub fn clear(&mut self) {
        self.strokes.clear();
        self.drawing = false;
        if let Some(surface) = self.surface.as_mut() {
            surface.clear();
        }
    }

    pub fn has_ink(&self) -> bool {
        self.strokes.iter().any(|s| !s.is_empty())
    }

    pub fn state(&self) -> PadState {
        if self.has_ink() {
            PadState::HasInk
        } else if self.drawing {
            PadState::Drawing
        } else {
            PadState::Empty
        }
    }

    pub fn strokes(&self) -> &[StrokePath] {
        &self.strokes
    }

    /// Replace the drawing with `strokes`, redrawing the surface if open.
    ///
    /// Points with a non-finite coordinate and strokes left empty are dropped.
    pub fn load_strokes(&mut self, strokes: Vec<StrokePath>) {
        self.strokes = strokes
            .into_iter()
            .map(|mut s| {
                s.points.retain(StrokePoint::is_finite);
                s
            })
            .filter(|s| !s.is_empty())
            .collect();
        self.drawing = false;
        self.replay();
    }

    /// Encode the signature as PNG.
    ///
    /// A closed pad redraws its strokes offscreen at the last opened size,
    /// or at a size that fits the strokes when it was never opened.
    pub fn export(&self) -> Result<SignatureImage> {
        if !self.has_ink() {
            return Err(Error::EmptySignatureError);
        }
        let offscreen;
        let surface = match self.surface.as_ref() {
            Some(surface) => surface,
            None => {
                let (css_width, css_height) = self.last_size.unwrap_or_else(|| self.strokes_extent());
                let mut fresh = DrawingSurface::new(
                    css_width,
                    css_height,
                    self.options.pixel_ratio,
                    self.options.background,
                    self.options.pen_color,
                )?;
                self.draw_strokes(&mut fresh);
                offscreen = fresh;
                &offscreen
            }
        };
        let png = surface.to_png()?;
        let (width, height) = surface.pixel_size();
        debug!(
            "Exported signature: {} stroke(s), {}x{} px, {} bytes",
            self.strokes.len(),
            width,
            height,
            png.len()
        );
        Ok(SignatureImage { png, width, height })
    }

    fn replay(&mut self) {
        let Some(mut surface) = self.surface.take() else {
            return;
        };
        surface.clear();
        self.draw_strokes(&mut surface);
        self.surface = Some(surface);
    }

    /// Smallest CSS size holding every point plus the widest pen.
    fn strokes_extent(&self) -> (u32, u32) {
        let margin = self.options.max_width.ceil();
        let (mut width, mut height) = (1.0f32, 1.0f32);
        for p in self.strokes.iter().flat_map(|s| s.points.iter()) {
            width = width.max(p.x + margin);
            height = height.max(p.y + margin);
        }
        let side = |v: f32| v.ceil().min(MAX_OFFSCREEN_SIDE as f32) as u32;
        (side(width), side(height))
    }

    fn draw_strokes(&self, surface: &mut DrawingSurface) {
        for stroke in &self.strokes {
            let mut dynamics = PenDynamics::start(&self.options);
            let mut points = stroke.points.iter();
            let Some(first) = points.next() else {
                continue;
            };
            surface.dot(first, dynamics.width);
            let mut prev = first;
            for p in points {
                let (start, end) = dynamics.advance(&self.options, prev, p);
                surface.segment(prev, p, start, end);
                prev = p;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad() -> SignaturePad {
        SignaturePad::new(PadOptions::default()).unwrap()
    }

    fn ink_pixels(image: &SignatureImage) -> usize {
        let img = image::load_from_memory(&image.png).unwrap().to_rgba8();
        img.pixels().filter(|p| p.0[0] < 128).count()
    }

    #[test]
    fn zero_strokes_cannot_export() {
        let mut pad = pad();
        pad.open(300, 100).unwrap();
        assert_eq!(pad.state(), PadState::Empty);
        assert!(matches!(pad.export(), Err(Error::EmptySignatureError)));
    }

    #[test]
    fn state_transitions() {
        let mut pad = pad();
        pad.open(300, 100).unwrap();
        pad.pen_down();
        assert_eq!(pad.state(), PadState::Drawing);
        assert!(!pad.has_ink());
        assert!(pad.record_point(StrokePoint::new(10.0, 10.0, 0)));
        assert_eq!(pad.state(), PadState::HasInk);
        pad.pen_up();
        assert_eq!(pad.state(), PadState::HasInk);
        pad.clear();
        assert_eq!(pad.state(), PadState::Empty);
        assert!(!pad.has_ink());
        pad.clear();
        assert!(!pad.has_ink());
    }

    #[test]
    fn empty_stroke_is_discarded() {
        let mut pad = pad();
        pad.open(300, 100).unwrap();
        assert!(pad.pen_down());
        pad.pen_up();
        assert!(pad.strokes().is_empty());
        assert_eq!(pad.state(), PadState::Empty);
    }

    #[test]
    fn close_points_are_skipped() {
        let mut pad = pad();
        pad.open(300, 100).unwrap();
        pad.pen_down();
        assert!(pad.record_point(StrokePoint::new(0.0, 0.0, 0)));
        assert!(!pad.record_point(StrokePoint::new(1.0, 1.0, 10)));
        assert!(pad.record_point(StrokePoint::new(10.0, 0.0, 20)));
        pad.pen_up();
        assert_eq!(pad.strokes()[0].len(), 2);
    }

    #[test]
    fn points_outside_a_stroke_are_ignored() {
        let mut pad = pad();
        pad.open(300, 100).unwrap();
        assert!(!pad.record_point(StrokePoint::new(5.0, 5.0, 0)));
        assert!(!pad.has_ink());
    }

    #[test]
    fn closed_pad_refuses_ink() {
        let mut pad = pad();
        assert!(!pad.pen_down());
        assert!(!pad.record_point(StrokePoint::new(10.0, 10.0, 0)));
        pad.pen_up();
        assert!(!pad.has_ink());
        assert!(matches!(pad.export(), Err(Error::EmptySignatureError)));
    }

    #[test]
    fn non_finite_points_are_dropped() {
        let mut pad = pad();
        pad.open(300, 100).unwrap();
        pad.pen_down();
        assert!(pad.record_point(StrokePoint::new(10.0, 10.0, 0)));
        assert!(!pad.record_point(StrokePoint::new(f32::INFINITY, 10.0, 16)));
        assert!(!pad.record_point(StrokePoint::new(20.0, f32::NAN, 32)));
        assert!(pad.record_point(StrokePoint::new(1e30, 10.0, 48)));
        pad.pen_up();
        assert_eq!(pad.strokes()[0].len(), 2);
        let image = pad.export().unwrap();
        assert_eq!((image.width, image.height), (600, 200));
        assert!(ink_pixels(&image) > 0);
    }

    #[test]
    fn loaded_strokes_export_without_opening() {
        let stroke = StrokePath {
            points: vec![
                StrokePoint::new(10.0, 10.0, 0),
                StrokePoint::new(f32::NAN, 0.0, 8),
                StrokePoint::new(50.0, 30.0, 16),
            ],
        };
        let mut pad = pad();
        pad.load_strokes(vec![stroke]);
        assert_eq!(pad.strokes()[0].len(), 2);
        let image = pad.export().unwrap();
        assert_eq!((image.width, image.height), (106, 66));
        assert!(ink_pixels(&image) > 0);
    }

    #[test]
    fn export_draws_strokes() {
        let mut pad = pad();
        let sub = pad.open(200, 80).unwrap();
        pad.handle(&sub, PointerEvent::Down(StrokePoint::new(10.0, 40.0, 0)));
        pad.handle(&sub, PointerEvent::Move(StrokePoint::new(60.0, 30.0, 16)));
        pad.handle(&sub, PointerEvent::Up(StrokePoint::new(120.0, 50.0, 32)));
        let image = pad.export().unwrap();
        assert_eq!((image.width, image.height), (400, 160));
        assert!(ink_pixels(&image) > 0);
        assert!(image.to_data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn stale_subscription_is_ignored() {
        let mut pad = pad();
        let old = pad.open(200, 80).unwrap();
        let new = pad.open(200, 80).unwrap();
        assert!(!pad.handle(&old, PointerEvent::Down(StrokePoint::new(10.0, 10.0, 0))));
        assert!(pad.strokes().is_empty());
        assert!(pad.handle(&new, PointerEvent::Down(StrokePoint::new(10.0, 10.0, 0))));
        pad.handle(&new, PointerEvent::Up(StrokePoint::new(40.0, 10.0, 10)));
        assert_eq!(pad.strokes().len(), 1);
    }

    #[test]
    fn closing_invalidates_subscription_but_keeps_strokes() {
        let mut pad = pad();
        let sub = pad.open(100, 50).unwrap();
        pad.handle(&sub, PointerEvent::Down(StrokePoint::new(10.0, 10.0, 0)));
        pad.close();
        assert!(!pad.is_subscribed(&sub));
        assert!(!pad.is_open());
        assert!(pad.has_ink());
        let closed = pad.export().unwrap();
        assert_eq!((closed.width, closed.height), (200, 100));
        pad.open(100, 50).unwrap();
        assert_eq!(pad.export().unwrap(), closed);
    }

    #[test]
    fn fast_strokes_are_thinner() {
        let options = PadOptions::default();
        let a = StrokePoint::new(0.0, 0.0, 0);
        let mut slow = PenDynamics::start(&options);
        let (_, slow_w) = slow.advance(&options, &a, &StrokePoint::new(10.0, 0.0, 100));
        let mut fast = PenDynamics::start(&options);
        let (_, fast_w) = fast.advance(&options, &a, &StrokePoint::new(100.0, 0.0, 10));
        assert!(fast_w < slow_w);
        assert!(fast_w >= options.min_width);
        assert!(slow_w <= options.max_width);
    }

    #[test]
    fn strokes_round_trip_through_json() {
        let mut pad = pad();
        pad.open(200, 80).unwrap();
        pad.pen_down();
        pad.record_point(StrokePoint::new(10.0, 10.0, 0));
        pad.record_point(StrokePoint::new(50.0, 20.0, 20));
        pad.pen_up();
        let before = pad.export().unwrap();

        let json = serde_json::to_string(pad.strokes()).unwrap();
        let mut restored = SignaturePad::new(PadOptions::default()).unwrap();
        restored.open(200, 80).unwrap();
        restored.load_strokes(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.strokes(), pad.strokes());
        assert_eq!(restored.export().unwrap(), before);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let opts = PadOptions {
            min_width: 3.0,
            max_width: 1.0,
            ..Default::default()
        };
        assert!(matches!(SignaturePad::new(opts), Err(Error::ConfigError(_))));
    }
}
