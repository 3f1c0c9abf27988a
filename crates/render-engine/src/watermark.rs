//! Watermark placement and drawing.
//!
//! Layout is a pure function of frame size, measured text width and
//! options, so it can be tested without a render context.

use crate::canvas::{FontSpec, RenderContext, Rgba};

/// Frames narrower than this aspect ratio are treated as vertical.
const VERTICAL_ASPECT: f64 = 0.9;

/// Font size as a fraction of the frame's shorter side.
const FONT_SCALE: f64 = 0.018;

/// Smallest margin in pixels regardless of ratio.
const MIN_MARGIN: f64 = 8.0;

const SHADOW_OFFSET: f64 = 2.0;

const FONT_WEIGHT: u16 = 600;

/// Where the watermark is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatermarkAlign {
    /// Top-left on vertical frames, bottom-right otherwise.
    #[default]
    Auto,
    BottomRight,
    BottomLeft,
    TopRight,
    TopLeft,
    Center,
}

impl WatermarkAlign {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Self::Auto,
            "br" => Self::BottomRight,
            "bl" => Self::BottomLeft,
            "tr" => Self::TopRight,
            "tl" => Self::TopLeft,
            "center" => Self::Center,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkOptions {
    pub opacity: f32,
    pub color: Rgba,
    pub shadow: Rgba,
    pub align: WatermarkAlign,
    pub margin_ratio: f64,
    pub min_font_px: f64,
    pub max_font_px: f64,
}

impl Default for WatermarkOptions {
    fn default() -> Self {
        Self {
            opacity: 0.66,
            color: Rgba::WHITE,
            shadow: Rgba::rgba(0, 0, 0, 0.65),
            align: WatermarkAlign::Auto,
            margin_ratio: 0.05,
            min_font_px: 14.0,
            max_font_px: 28.0,
        }
    }
}

/// Computed placement for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatermarkLayout {
    /// Left edge of the text.
    pub x: f64,
    /// Alphabetic baseline.
    pub y: f64,
    pub font_px: f64,
    pub margin: f64,
    /// Alignment after resolving `Auto`.
    pub align: WatermarkAlign,
}

/// Font size used for a `width`×`height` frame.
pub fn font_size_for(width: u32, height: u32, opts: &WatermarkOptions) -> f64 {
    let min_side = f64::from(width.min(height));
    let (lo, hi) = if opts.min_font_px <= opts.max_font_px {
        (opts.min_font_px, opts.max_font_px)
    } else {
        (opts.max_font_px, opts.min_font_px)
    };
    (min_side * FONT_SCALE).clamp(lo, hi).round()
}

impl WatermarkLayout {
    /// Place text of `text_width` pixels on a `width`×`height` frame.
    pub fn compute(width: u32, height: u32, text_width: f64, opts: &WatermarkOptions) -> Self {
        let (w, h) = (f64::from(width), f64::from(height));
        let margin = MIN_MARGIN.max((w.min(h) * opts.margin_ratio).floor());
        let vertical = h > 0.0 && w / h < VERTICAL_ASPECT;
        let align = match opts.align {
            WatermarkAlign::Auto if vertical => WatermarkAlign::TopLeft,
            WatermarkAlign::Auto => WatermarkAlign::BottomRight,
            other => other,
        };
        let font_px = font_size_for(width, height, opts);
        let (x, y) = match align {
            WatermarkAlign::BottomRight | WatermarkAlign::Auto => {
                (w - margin - text_width, h - margin)
            }
            WatermarkAlign::BottomLeft => (margin, h - margin),
            WatermarkAlign::TopRight => (w - margin - text_width, margin + font_px),
            WatermarkAlign::TopLeft => (margin, margin + font_px),
            WatermarkAlign::Center => ((w - text_width) / 2.0, h - margin),
        };
        Self {
            x,
            y,
            font_px,
            margin,
            align,
        }
    }
}

/// Draw `text` onto `ctx`. Leaves the context state as it found it.
pub fn draw_watermark<C: RenderContext + ?Sized>(
    ctx: &mut C,
    width: u32,
    height: u32,
    text: &str,
    opts: &WatermarkOptions,
) -> WatermarkLayout {
    let font_px = font_size_for(width, height, opts);
    ctx.save();
    ctx.set_global_alpha(opts.opacity);
    ctx.set_font(&FontSpec::new(FONT_WEIGHT, font_px as f32));
    let text_width = f64::from(ctx.measure_text(text));
    let layout = WatermarkLayout::compute(width, height, text_width, opts);
    ctx.fill_text(
        text,
        layout.x + SHADOW_OFFSET,
        layout.y + SHADOW_OFFSET,
        opts.shadow,
    );
    ctx.fill_text(text, layout.x, layout.y, opts.color);
    ctx.restore();
    layout
}
