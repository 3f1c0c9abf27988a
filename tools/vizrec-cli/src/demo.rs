//! Synthetic visualizer stage used by `vizrec record`.
//!
//! The base surface is an animated spectrum; overlays exercise z-ordering,
//! opacity, blend modes and filters through a [`StyleTable`].

use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Instant;

use image::{Rgba, RgbaImage};
use vizrec_render_engine::{
    LayerSource, RenderError, SolidSurface, StaticLayers, StyleDeclaration, StyleTable, Surface,
};

const SPECTRUM_BARS: u32 = 48;

/// Animated bar spectrum, redrawn on every sample.
pub struct SpectrumSurface {
    width: u32,
    height: u32,
    started: Instant,
}

impl SpectrumSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            started: Instant::now(),
        }
    }

    fn level(bar: u32, t: f64) -> f64 {
        let b = f64::from(bar);
        let wave = (t * 2.1 + b * 0.35).sin() * 0.5 + (t * 3.7 - b * 0.11).sin() * 0.3;
        // Low bars carry more energy.
        let tilt = 1.0 - b / f64::from(SPECTRUM_BARS) * 0.6;
        ((wave * 0.5 + 0.5) * tilt).clamp(0.02, 1.0)
    }
}

impl Surface for SpectrumSurface {
    fn label(&self) -> &str {
        "spectrum"
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read_pixels(&self) -> Result<RgbaImage, RenderError> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::Draw("spectrum has no pixels".to_string()));
        }
        let t = self.started.elapsed().as_secs_f64();
        let mut img = RgbaImage::from_pixel(self.width, self.height, Rgba([8, 6, 20, 255]));
        let bar_width = (self.width / SPECTRUM_BARS).max(1);

        for bar in 0..SPECTRUM_BARS {
            let level = Self::level(bar, t);
            let bar_height = ((level * f64::from(self.height)) as u32).max(1);
            let hue = f64::from(bar) / f64::from(SPECTRUM_BARS);
            let color = Rgba([
                (128.0 + 127.0 * (TAU * hue).cos()) as u8,
                (128.0 + 127.0 * (TAU * (hue + 0.33)).cos()) as u8,
                (128.0 + 127.0 * (TAU * (hue + 0.66)).cos()) as u8,
                255,
            ]);
            let x0 = bar * bar_width;
            for x in x0..(x0 + bar_width.saturating_sub(1)).min(self.width) {
                for y in self.height.saturating_sub(bar_height)..self.height {
                    img.put_pixel(x, y, color);
                }
            }
        }
        Ok(img)
    }
}

/// The demo layer set plus the computed styles applied to it.
pub struct DemoStage {
    pub layers: Arc<dyn LayerSource>,
    pub styles: Arc<StyleTable>,
}

/// Build the stage at the host's own resolution.
pub fn build_stage(width: u32, height: u32) -> DemoStage {
    let base: Arc<dyn Surface> = Arc::new(SpectrumSurface::new(width, height));

    let glow = SolidSurface::new("glow", width / 2, height / 2, [255, 90, 200, 255])
        .with_style(StyleDeclaration::new().z_index("1"));
    let title = SolidSurface::new("title-card", width, height / 8, [240, 240, 255, 255]);
    let hidden = SolidSurface::new("debug-grid", width, height, [255, 0, 0, 255]);

    let styles = Arc::new(StyleTable::new());
    styles.set(
        "glow",
        StyleDeclaration::new()
            .opacity("0.35")
            .mix_blend_mode("screen")
            .filter("blur(6px) saturate(1.4)"),
    );
    styles.set(
        "title-card",
        StyleDeclaration::new()
            .z_index("2")
            .opacity("0.6")
            .mix_blend_mode("overlay"),
    );
    styles.set("debug-grid", StyleDeclaration::new().display("none"));

    let overlays: Vec<Arc<dyn Surface>> = vec![Arc::new(title), Arc::new(glow), Arc::new(hidden)];
    let layers = StaticLayers {
        base: Some(base),
        overlays,
    };
    DemoStage {
        layers: Arc::new(layers),
        styles,
    }
}
