//! Software render context backed by an RGBA buffer.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{Rgba as Pixel, RgbaImage};

use crate::blend::{composite_pixel, BlendMode};
use crate::canvas::{FontSpec, Rect, RenderContext, RenderError, Rgba};
use crate::filter::{apply_filters, cpu_supports, FilterChain};
use crate::text::{estimate_text_width, GlyphPainter};

#[derive(Debug, Clone)]
struct DrawState {
    alpha: f32,
    blend: BlendMode,
    filter: FilterChain,
    font: FontSpec,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            blend: BlendMode::SourceOver,
            filter: FilterChain::none(),
            font: FontSpec::default(),
        }
    }
}

/// CPU canvas used to produce encoder frames.
#[derive(Debug)]
pub struct CpuCanvas {
    buffer: RgbaImage,
    state: DrawState,
    stack: Vec<DrawState>,
    glyphs: Option<GlyphPainter>,
    warned_no_font: bool,
}

impl CpuCanvas {
    /// Create a transparent canvas. Text falls back to system font
    /// discovery.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_font(width, height, None)
    }

    /// Create a canvas that renders text with `font_path` when it loads.
    pub fn with_font(width: u32, height: u32, font_path: Option<&Path>) -> Self {
        let glyphs = GlyphPainter::discover(font_path);
        match &glyphs {
            Some(g) => tracing::debug!(font = %g.source().display(), "Canvas font loaded"),
            None => tracing::debug!("No usable font found; text will not be drawn"),
        }
        Self {
            buffer: RgbaImage::new(width.max(1), height.max(1)),
            state: DrawState::default(),
            stack: Vec::new(),
            glyphs,
            warned_no_font: false,
        }
    }

    /// Resize the backing buffer, discarding its content and state stack.
    pub fn resize(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        if self.buffer.dimensions() != (width, height) {
            self.buffer = RgbaImage::new(width, height);
        }
        self.state = DrawState::default();
        self.stack.clear();
    }

    pub fn image(&self) -> &RgbaImage {
        &self.buffer
    }

    /// Raw RGBA bytes, row-major.
    pub fn as_raw(&self) -> &[u8] {
        self.buffer.as_raw()
    }

    fn blit(&mut self, src: &RgbaImage, x0: i64, y0: i64) {
        let (tw, th) = (self.buffer.width() as i64, self.buffer.height() as i64);
        let (alpha, mode) = (self.state.alpha, self.state.blend);
        for (sx, sy, px) in src.enumerate_pixels() {
            let (x, y) = (x0 + i64::from(sx), y0 + i64::from(sy));
            if x < 0 || y < 0 || x >= tw || y >= th {
                continue;
            }
            let dst = self.buffer.get_pixel_mut(x as u32, y as u32);
            dst.0 = composite_pixel(mode, dst.0, px.0, alpha);
        }
    }
}

impl RenderContext for CpuCanvas {
    fn dimensions(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    fn save(&mut self) {
        self.stack.push(self.state.clone());
    }

    fn restore(&mut self) {
        if let Some(state) = self.stack.pop() {
            self.state = state;
        }
    }

    fn set_global_alpha(&mut self, alpha: f32) {
        if alpha.is_finite() {
            self.state.alpha = alpha.clamp(0.0, 1.0);
        }
    }

    fn set_blend_mode(&mut self, mode: BlendMode) -> Result<(), RenderError> {
        self.state.blend = mode;
        Ok(())
    }

    fn set_filter(&mut self, filter: &FilterChain) -> Result<(), RenderError> {
        cpu_supports(filter)
            .map_err(|f| RenderError::Unsupported(format!("filter function {}", f.name())))?;
        self.state.filter = filter.clone();
        Ok(())
    }

    fn set_font(&mut self, font: &FontSpec) {
        self.state.font = font.clone();
    }

    fn fill_rect(&mut self, rect: Rect, color: Rgba) {
        let (tw, th) = self.buffer.dimensions();
        let x0 = rect.x.max(0.0).floor() as u32;
        let y0 = rect.y.max(0.0).floor() as u32;
        let x1 = ((rect.x + rect.width).ceil().max(0.0) as u32).min(tw);
        let y1 = ((rect.y + rect.height).ceil().max(0.0) as u32).min(th);
        let px = Pixel(color.to_pixel(1.0));
        for y in y0..y1 {
            for x in x0..x1 {
                self.buffer.put_pixel(x, y, px);
            }
        }
    }

    fn draw_image(&mut self, image: &RgbaImage, dst: Rect) -> Result<(), RenderError> {
        if dst.is_empty() || image.width() == 0 || image.height() == 0 {
            return Ok(());
        }
        let w = dst.width.round().max(1.0) as u32;
        let h = dst.height.round().max(1.0) as u32;
        let mut scaled = if image.dimensions() == (w, h) {
            image.clone()
        } else {
            imageops::resize(image, w, h, FilterType::Triangle)
        };
        if !self.state.filter.is_none() {
            apply_filters(&mut scaled, &self.state.filter);
        }
        self.blit(&scaled, dst.x.round() as i64, dst.y.round() as i64);
        Ok(())
    }

    fn measure_text(&mut self, text: &str) -> f32 {
        let px = self.state.font.size_px;
        match &self.glyphs {
            Some(g) => g.measure(text, px),
            None => estimate_text_width(text, px),
        }
    }

    fn fill_text(&mut self, text: &str, x: f64, y: f64, color: Rgba) {
        let Some(glyphs) = &self.glyphs else {
            if !self.warned_no_font {
                tracing::warn!("No font available; skipping text rendering");
                self.warned_no_font = true;
            }
            return;
        };
        glyphs.draw(
            &mut self.buffer,
            text,
            x,
            y,
            self.state.font.size_px,
            color,
            self.state.alpha,
            self.state.blend,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterFn;

    fn solid(w: u32, h: u32, px: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Pixel(px))
    }

    #[test]
    fn fill_rect_clips_to_buffer() {
        let mut canvas = CpuCanvas::new(4, 4);
        canvas.fill_rect(Rect::new(-2.0, -2.0, 100.0, 100.0), Rgba::BLACK);
        assert!(canvas.image().pixels().all(|p| p.0 == [0, 0, 0, 255]));
    }

    #[test]
    fn draw_image_scales_into_rect() {
        let mut canvas = CpuCanvas::new(8, 8);
        canvas.fill_rect(Rect::new(0.0, 0.0, 8.0, 8.0), Rgba::BLACK);
        canvas
            .draw_image(&solid(2, 1, [255, 0, 0, 255]), Rect::new(0.0, 2.0, 8.0, 4.0))
            .unwrap();
        assert_eq!(canvas.image().get_pixel(0, 1).0, [0, 0, 0, 255]);
        assert_eq!(canvas.image().get_pixel(4, 3).0, [255, 0, 0, 255]);
        assert_eq!(canvas.image().get_pixel(7, 6).0, [0, 0, 0, 255]);
    }

    #[test]
    fn global_alpha_restored_after_restore() {
        let mut canvas = CpuCanvas::new(2, 1);
        canvas.fill_rect(Rect::new(0.0, 0.0, 2.0, 1.0), Rgba::BLACK);
        canvas.save();
        canvas.set_global_alpha(0.5);
        canvas
            .draw_image(&solid(1, 1, [200, 200, 200, 255]), Rect::new(0.0, 0.0, 1.0, 1.0))
            .unwrap();
        canvas.restore();
        canvas
            .draw_image(&solid(1, 1, [200, 200, 200, 255]), Rect::new(1.0, 0.0, 1.0, 1.0))
            .unwrap();
        assert_eq!(canvas.image().get_pixel(0, 0).0, [100, 100, 100, 255]);
        assert_eq!(canvas.image().get_pixel(1, 0).0, [200, 200, 200, 255]);
    }

    #[test]
    fn unsupported_filter_is_rejected_and_state_unchanged() {
        let mut canvas = CpuCanvas::new(1, 1);
        let chain = FilterChain::from_functions(vec![FilterFn::Other {
            name: "drop-shadow".into(),
            args: "0 0 4px red".into(),
        }]);
        assert!(matches!(
            canvas.set_filter(&chain),
            Err(RenderError::Unsupported(_))
        ));
        canvas.fill_rect(Rect::new(0.0, 0.0, 1.0, 1.0), Rgba::BLACK);
        canvas
            .draw_image(&solid(1, 1, [10, 20, 30, 255]), Rect::new(0.0, 0.0, 1.0, 1.0))
            .unwrap();
        assert_eq!(canvas.image().get_pixel(0, 0).0, [10, 20, 30, 255]);
    }

    #[test]
    fn invert_filter_applies_to_drawn_image() {
        let mut canvas = CpuCanvas::new(1, 1);
        canvas
            .set_filter(&FilterChain::from_functions(vec![FilterFn::Invert(1.0)]))
            .unwrap();
        canvas
            .draw_image(&solid(1, 1, [0, 255, 0, 255]), Rect::new(0.0, 0.0, 1.0, 1.0))
            .unwrap();
        assert_eq!(canvas.image().get_pixel(0, 0).0, [255, 0, 255, 255]);
    }

    #[test]
    fn resize_resets_state() {
        let mut canvas = CpuCanvas::new(2, 2);
        canvas.save();
        canvas.set_global_alpha(0.1);
        canvas.resize(3, 5);
        assert_eq!(canvas.dimensions(), (3, 5));
        assert_eq!(canvas.as_raw().len(), 3 * 5 * 4);
    }
}
