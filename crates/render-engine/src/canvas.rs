//! The 2D render-context contract the compositor and watermark draw through.
//!
//! The trait mirrors the small slice of a canvas 2D context the recorder
//! needs: a save/restore state stack, global alpha, blend mode, filter,
//! rectangle fill, image blit, and text.

use std::path::PathBuf;

use image::RgbaImage;

use crate::blend::BlendMode;
use crate::filter::FilterChain;

/// Errors raised by a render context.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The context cannot honor the requested state (blend mode, filter).
    #[error("unsupported by render context: {0}")]
    Unsupported(String),

    /// Drawing failed (lost surface, mismatched buffer).
    #[error("draw failed: {0}")]
    Draw(String),

    /// A font file could not be read or parsed.
    #[error("font {path} unusable: {message}")]
    Font { path: PathBuf, message: String },
}

/// Axis-aligned rectangle in target pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Straight-alpha color with an alpha channel in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f32,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::rgb(0, 0, 0);
    pub const WHITE: Rgba = Rgba::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Convert to an 8-bit pixel, folding in an extra alpha factor.
    pub fn to_pixel(self, alpha: f32) -> [u8; 4] {
        let a = (self.a * alpha).clamp(0.0, 1.0);
        [self.r, self.g, self.b, (a * 255.0).round() as u8]
    }
}

/// Font selection for text drawing.
#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec {
    pub weight: u16,
    pub size_px: f32,
    pub family: String,
}

impl FontSpec {
    pub fn new(weight: u16, size_px: f32) -> Self {
        Self {
            weight,
            size_px,
            family: "ui-sans-serif, system-ui, sans-serif".to_string(),
        }
    }
}

impl Default for FontSpec {
    fn default() -> Self {
        Self::new(400, 10.0)
    }
}

/// A drawable offscreen surface.
///
/// State setters (`set_global_alpha`, `set_blend_mode`, `set_filter`,
/// `set_font`) affect subsequent draws until the matching `restore`.
pub trait RenderContext {
    /// Pixel dimensions of the target.
    fn dimensions(&self) -> (u32, u32);

    /// Push the current drawing state.
    fn save(&mut self);

    /// Pop the most recently saved drawing state. No-op on an empty stack.
    fn restore(&mut self);

    fn set_global_alpha(&mut self, alpha: f32);

    /// Select how subsequent draws combine with existing pixels.
    fn set_blend_mode(&mut self, mode: BlendMode) -> Result<(), RenderError>;

    /// Select the pixel filter applied to subsequent image draws.
    fn set_filter(&mut self, filter: &FilterChain) -> Result<(), RenderError>;

    fn set_font(&mut self, font: &FontSpec);

    /// Fill `rect` ignoring blend mode and filter (used for clearing).
    fn fill_rect(&mut self, rect: Rect, color: Rgba);

    /// Draw `image` scaled into `dst` using the current state.
    fn draw_image(&mut self, image: &RgbaImage, dst: Rect) -> Result<(), RenderError>;

    /// Advance width of `text` in the current font.
    fn measure_text(&mut self, text: &str) -> f32;

    /// Draw `text` with its alphabetic baseline at `(x, y)`.
    fn fill_text(&mut self, text: &str, x: f64, y: f64, color: Rgba);
}
