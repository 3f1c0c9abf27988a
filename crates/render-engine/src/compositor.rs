//! Frame compositor: flattens the host's layers into one fixed-size frame.
//!
//! Every accepted tick clears the target to black, letterboxes the primary
//! layer's aspect ratio into it, draws all layers into the same rectangle
//! in rank order, then stamps the watermark.

use vizrec_common::FrameThrottle;
use vizrec_recording_model::Preset;

use crate::blend::BlendMode;
use crate::canvas::{Rect, RenderContext, Rgba};
use crate::filter::FilterChain;
use crate::layer::{LayerCollector, LayerDescriptor};
use crate::watermark::{draw_watermark, WatermarkAlign, WatermarkOptions};

/// Largest watermark font the recorder uses.
const RECORDING_MAX_FONT_PX: f64 = 32.0;

/// Aspect-preserving destination for a `sw`×`sh` source inside a
/// `tw`×`th` target. Size and offsets are floored. `None` when the source
/// has no area.
pub fn fit_rect(tw: u32, th: u32, sw: u32, sh: u32) -> Option<Rect> {
    if sw == 0 || sh == 0 || tw == 0 || th == 0 {
        return None;
    }
    let (tw, th, sw, sh) = (f64::from(tw), f64::from(th), f64::from(sw), f64::from(sh));
    let scale = (tw / sw).min(th / sh);
    let w = (sw * scale).floor();
    let h = (sh * scale).floor();
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    Some(Rect::new(
        ((tw - w) / 2.0).floor(),
        ((th - h) / 2.0).floor(),
        w,
        h,
    ))
}

/// Watermark options used while recording with `preset`.
pub fn recording_watermark_options(preset: &Preset) -> WatermarkOptions {
    WatermarkOptions {
        align: WatermarkAlign::Auto,
        margin_ratio: preset.safe_margin,
        min_font_px: 14.0,
        max_font_px: RECORDING_MAX_FONT_PX,
        ..WatermarkOptions::default()
    }
}

/// Text and placement options for the stamped watermark.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkSpec {
    pub text: String,
    pub options: WatermarkOptions,
}

/// Running totals for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositorStats {
    pub frames: u64,
    pub skipped_ticks: u64,
    pub layer_failures: u64,
}

/// Result of one composition pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub layers_collected: usize,
    pub layers_drawn: usize,
    pub dest: Option<Rect>,
}

pub struct FrameCompositor<C: RenderContext> {
    target: C,
    collector: LayerCollector,
    throttle: FrameThrottle,
    watermark: Option<WatermarkSpec>,
    stats: CompositorStats,
}

impl<C: RenderContext> FrameCompositor<C> {
    /// Compositor drawing into `target` at most `fps` times per second.
    pub fn new(target: C, collector: LayerCollector, fps: u32) -> Self {
        Self {
            target,
            collector,
            throttle: FrameThrottle::new(fps),
            watermark: None,
            stats: CompositorStats::default(),
        }
    }

    pub fn with_watermark(mut self, watermark: Option<WatermarkSpec>) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn target(&self) -> &C {
        &self.target
    }

    pub fn into_target(self) -> C {
        self.target
    }

    pub fn stats(&self) -> CompositorStats {
        self.stats
    }

    /// Handle a display-refresh tick. Returns whether a frame was produced.
    pub fn tick(&mut self, now_ms: f64) -> bool {
        if !self.throttle.accept(now_ms) {
            self.stats.skipped_ticks += 1;
            return false;
        }
        self.compose();
        true
    }

    /// Draw one frame unconditionally.
    pub fn compose(&mut self) -> FrameReport {
        let (tw, th) = self.target.dimensions();
        self.target
            .fill_rect(Rect::new(0.0, 0.0, f64::from(tw), f64::from(th)), Rgba::BLACK);

        let layers = self.collector.collect();
        let dest = layers
            .iter()
            .find(|l| l.is_base)
            .or_else(|| layers.first())
            .and_then(|primary| {
                let (pw, ph) = primary.surface.dimensions();
                fit_rect(tw, th, pw, ph)
            });

        let mut drawn = 0;
        if let Some(dest) = dest {
            for layer in &layers {
                if self.draw_layer(layer, dest) {
                    drawn += 1;
                }
            }
        }

        if let Some(spec) = &self.watermark {
            draw_watermark(&mut self.target, tw, th, &spec.text, &spec.options);
        }

        self.stats.frames += 1;
        FrameReport {
            layers_collected: layers.len(),
            layers_drawn: drawn,
            dest,
        }
    }

    fn draw_layer(&mut self, layer: &LayerDescriptor, dest: Rect) -> bool {
        let label = layer.surface.label();
        if layer.style.hidden {
            return false;
        }
        let (w, h) = layer.surface.dimensions();
        if w == 0 || h == 0 {
            return false;
        }
        let pixels = match layer.surface.read_pixels() {
            Ok(p) => p,
            Err(e) => {
                self.stats.layer_failures += 1;
                tracing::debug!(layer = label, error = %e, "Layer read failed; skipping");
                return false;
            }
        };

        self.target.save();
        self.target.set_global_alpha(layer.style.opacity);
        if let Err(e) = self.target.set_blend_mode(layer.style.blend) {
            tracing::debug!(
                layer = label,
                mode = %layer.style.blend,
                error = %e,
                "Blend mode unsupported"
            );
            let _ = self.target.set_blend_mode(BlendMode::SourceOver);
        }
        if let Err(e) = self.target.set_filter(&layer.style.filter) {
            tracing::debug!(layer = label, error = %e, "Filter unsupported");
            let _ = self.target.set_filter(&FilterChain::none());
        }
        let result = self.target.draw_image(&pixels, dest);
        self.target.restore();

        match result {
            Ok(()) => true,
            Err(e) => {
                self.stats.layer_failures += 1;
                tracing::debug!(layer = label, error = %e, "Layer draw failed; skipping");
                false
            }
        }
    }
}
