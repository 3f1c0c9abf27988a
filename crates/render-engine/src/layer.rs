//! Layer discovery and style resolution.
//!
//! The host exposes a base surface plus overlays. Every compositor pass
//! re-collects them, ranks them by z-index and resolves the visual style
//! each one should be drawn with.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use image::RgbaImage;

use crate::blend::BlendMode;
use crate::canvas::RenderError;
use crate::filter::FilterChain;

/// A host-rendered surface that can be sampled into the recording.
pub trait Surface: Send + Sync {
    /// Stable identifier used for style lookup and logging.
    fn label(&self) -> &str;

    /// Current backing size in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// Snapshot of the current pixels.
    fn read_pixels(&self) -> Result<RgbaImage, RenderError>;

    /// Style declared directly on the surface, if any.
    fn inline_style(&self) -> Option<StyleDeclaration> {
        None
    }
}

/// Raw style properties as declared by the host. Values are unparsed CSS
/// strings; resolution happens in [`LayerStyle::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleDeclaration {
    pub z_index: Option<String>,
    pub opacity: Option<String>,
    pub mix_blend_mode: Option<String>,
    pub filter: Option<String>,
    pub visibility: Option<String>,
    pub display: Option<String>,
}

impl StyleDeclaration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn z_index(mut self, value: impl Into<String>) -> Self {
        self.z_index = Some(value.into());
        self
    }

    pub fn opacity(mut self, value: impl Into<String>) -> Self {
        self.opacity = Some(value.into());
        self
    }

    pub fn mix_blend_mode(mut self, value: impl Into<String>) -> Self {
        self.mix_blend_mode = Some(value.into());
        self
    }

    pub fn filter(mut self, value: impl Into<String>) -> Self {
        self.filter = Some(value.into());
        self
    }

    pub fn visibility(mut self, value: impl Into<String>) -> Self {
        self.visibility = Some(value.into());
        self
    }

    pub fn display(mut self, value: impl Into<String>) -> Self {
        self.display = Some(value.into());
        self
    }

    /// Fields of `self` take precedence; missing ones come from `fallback`.
    pub fn over(&self, fallback: &StyleDeclaration) -> StyleDeclaration {
        let pick = |a: &Option<String>, b: &Option<String>| a.clone().or_else(|| b.clone());
        StyleDeclaration {
            z_index: pick(&self.z_index, &fallback.z_index),
            opacity: pick(&self.opacity, &fallback.opacity),
            mix_blend_mode: pick(&self.mix_blend_mode, &fallback.mix_blend_mode),
            filter: pick(&self.filter, &fallback.filter),
            visibility: pick(&self.visibility, &fallback.visibility),
            display: pick(&self.display, &fallback.display),
        }
    }

    /// Numeric z-index, or `None` for missing, `auto`, or unparsable values.
    pub fn parsed_z_index(&self) -> Option<f64> {
        let raw = self.z_index.as_deref()?.trim();
        if raw.eq_ignore_ascii_case("auto") {
            return None;
        }
        raw.parse::<f64>().ok().filter(|z| z.is_finite())
    }
}

/// Source of computed style for a surface.
pub trait StyleSampler: Send + Sync {
    fn computed_style(&self, surface: &dyn Surface) -> StyleDeclaration;
}

/// Treats the surface's inline style as its computed style.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineStyleSampler;

impl StyleSampler for InlineStyleSampler {
    fn computed_style(&self, surface: &dyn Surface) -> StyleDeclaration {
        surface.inline_style().unwrap_or_default()
    }
}

/// Explicit per-label style declarations, updatable while recording.
#[derive(Debug, Default)]
pub struct StyleTable {
    entries: RwLock<HashMap<String, StyleDeclaration>>,
}

impl StyleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, label: impl Into<String>, style: StyleDeclaration) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(label.into(), style);
    }

    pub fn remove(&self, label: &str) -> Option<StyleDeclaration> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(label)
    }

    pub fn get(&self, label: &str) -> Option<StyleDeclaration> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(label)
            .cloned()
    }
}

impl StyleSampler for StyleTable {
    fn computed_style(&self, surface: &dyn Surface) -> StyleDeclaration {
        self.get(surface.label()).unwrap_or_default()
    }
}

/// The host's current set of drawable surfaces.
pub trait LayerSource: Send + Sync {
    /// The primary visualizer surface, if one is mounted.
    fn base_surface(&self) -> Option<Arc<dyn Surface>>;

    /// Overlay surfaces in registration order.
    fn overlay_surfaces(&self) -> Vec<Arc<dyn Surface>>;
}

/// Resolved drawing parameters for one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStyle {
    pub hidden: bool,
    pub opacity: f32,
    pub blend: BlendMode,
    pub filter: FilterChain,
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            hidden: false,
            opacity: 1.0,
            blend: BlendMode::SourceOver,
            filter: FilterChain::none(),
        }
    }
}

impl LayerStyle {
    /// Resolve raw declarations, downgrading anything unrecognized to the
    /// default for that property.
    pub fn resolve(decl: &StyleDeclaration) -> Self {
        let is = |v: &Option<String>, kw: &str| {
            v.as_deref()
                .is_some_and(|s| s.trim().eq_ignore_ascii_case(kw))
        };
        let hidden = is(&decl.display, "none") || is(&decl.visibility, "hidden");

        let opacity = decl
            .opacity
            .as_deref()
            .and_then(|s| s.trim().parse::<f32>().ok())
            .filter(|o| o.is_finite())
            .map_or(1.0, |o| o.clamp(0.0, 1.0));

        let blend = match decl.mix_blend_mode.as_deref() {
            Some(raw) => BlendMode::parse(raw).unwrap_or_else(|| {
                tracing::debug!(mode = raw, "Unknown blend mode; using source-over");
                BlendMode::SourceOver
            }),
            None => BlendMode::SourceOver,
        };

        let filter = match decl.filter.as_deref() {
            Some(raw) => FilterChain::parse(raw).unwrap_or_else(|e| {
                tracing::debug!(filter = raw, error = %e, "Unparsable filter; using none");
                FilterChain::none()
            }),
            None => FilterChain::none(),
        };

        Self {
            hidden,
            opacity,
            blend,
            filter,
        }
    }
}

/// One surface ranked for the current pass.
#[derive(Clone)]
pub struct LayerDescriptor {
    pub surface: Arc<dyn Surface>,
    pub z_index: f64,
    pub is_base: bool,
    pub style: LayerStyle,
}

impl std::fmt::Debug for LayerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerDescriptor")
            .field("label", &self.surface.label())
            .field("z_index", &self.z_index)
            .field("is_base", &self.is_base)
            .field("style", &self.style)
            .finish()
    }
}

/// Collects and ranks layers from a [`LayerSource`].
#[derive(Clone)]
pub struct LayerCollector {
    source: Arc<dyn LayerSource>,
    styles: Arc<dyn StyleSampler>,
}

impl LayerCollector {
    pub fn new(source: Arc<dyn LayerSource>, styles: Arc<dyn StyleSampler>) -> Self {
        Self { source, styles }
    }

    /// Number of surfaces currently exposed, without resolving styles.
    pub fn count(&self) -> usize {
        self.surfaces().len()
    }

    /// Layers in ascending draw order. Ties keep collection order (base
    /// first, then overlays as registered).
    pub fn collect(&self) -> Vec<LayerDescriptor> {
        let mut layers: Vec<LayerDescriptor> = self
            .surfaces()
            .into_iter()
            .enumerate()
            .map(|(index, (surface, is_base))| {
                let inline = surface.inline_style().unwrap_or_default();
                let computed = self.styles.computed_style(surface.as_ref());
                let z_index = inline
                    .parsed_z_index()
                    .or_else(|| computed.parsed_z_index())
                    .unwrap_or(index as f64);
                let style = LayerStyle::resolve(&inline.over(&computed));
                LayerDescriptor {
                    surface,
                    z_index,
                    is_base,
                    style,
                }
            })
            .collect();
        layers.sort_by(|a, b| a.z_index.total_cmp(&b.z_index));
        layers
    }

    fn surfaces(&self) -> Vec<(Arc<dyn Surface>, bool)> {
        let base = self.source.base_surface();
        let mut out: Vec<(Arc<dyn Surface>, bool)> = Vec::new();
        if let Some(base) = &base {
            out.push((Arc::clone(base), true));
        }
        for overlay in self.source.overlay_surfaces() {
            let duplicate = out.iter().any(|(s, _)| same_surface(s, &overlay));
            if !duplicate {
                out.push((overlay, false));
            }
        }
        out
    }
}

fn same_surface(a: &Arc<dyn Surface>, b: &Arc<dyn Surface>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Layer of solid color, mainly for hosts that want a backdrop and for tests.
#[derive(Debug, Clone)]
pub struct SolidSurface {
    label: String,
    width: u32,
    height: u32,
    color: [u8; 4],
    style: Option<StyleDeclaration>,
}

impl SolidSurface {
    pub fn new(label: impl Into<String>, width: u32, height: u32, color: [u8; 4]) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            color,
            style: None,
        }
    }

    pub fn with_style(mut self, style: StyleDeclaration) -> Self {
        self.style = Some(style);
        self
    }
}

impl Surface for SolidSurface {
    fn label(&self) -> &str {
        &self.label
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read_pixels(&self) -> Result<RgbaImage, RenderError> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::Draw(format!("{} has no pixels", self.label)));
        }
        Ok(RgbaImage::from_pixel(
            self.width,
            self.height,
            image::Rgba(self.color),
        ))
    }

    fn inline_style(&self) -> Option<StyleDeclaration> {
        self.style.clone()
    }
}

/// Fixed base + overlays, for hosts whose layer set does not change.
#[derive(Clone, Default)]
pub struct StaticLayers {
    pub base: Option<Arc<dyn Surface>>,
    pub overlays: Vec<Arc<dyn Surface>>,
}

impl LayerSource for StaticLayers {
    fn base_surface(&self) -> Option<Arc<dyn Surface>> {
        self.base.clone()
    }

    fn overlay_surfaces(&self) -> Vec<Arc<dyn Surface>> {
        self.overlays.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn solid(label: &str) -> Arc<dyn Surface> {
        Arc::new(SolidSurface::new(label, 4, 4, [255, 255, 255, 255]))
    }

    fn styled(label: &str, style: StyleDeclaration) -> Arc<dyn Surface> {
        Arc::new(SolidSurface::new(label, 4, 4, [255, 255, 255, 255]).with_style(style))
    }

    fn labels(layers: &[LayerDescriptor]) -> Vec<&str> {
        layers.iter().map(|l| l.surface.label()).collect()
    }

    #[test]
    fn collection_order_is_default_rank() {
        let source = StaticLayers {
            base: Some(solid("base")),
            overlays: vec![solid("a"), solid("b")],
        };
        let collector = LayerCollector::new(Arc::new(source), Arc::new(InlineStyleSampler));
        let layers = collector.collect();
        assert_eq!(labels(&layers), ["base", "a", "b"]);
        assert_eq!(layers[0].z_index, 0.0);
        assert!(layers[0].is_base);
        assert_eq!(layers[2].z_index, 2.0);
    }

    #[test]
    fn inline_z_index_beats_computed() {
        let table = StyleTable::new();
        table.set("a", StyleDeclaration::new().z_index("-5"));
        table.set("b", StyleDeclaration::new().z_index("-10"));
        let source = StaticLayers {
            base: Some(solid("base")),
            overlays: vec![solid("a"), styled("b", StyleDeclaration::new().z_index("9"))],
        };
        let collector = LayerCollector::new(Arc::new(source), Arc::new(table));
        assert_eq!(labels(&collector.collect()), ["a", "base", "b"]);
    }

    #[test]
    fn auto_z_index_falls_back_to_collection_order() {
        let source = StaticLayers {
            base: Some(styled("base", StyleDeclaration::new().z_index("auto"))),
            overlays: vec![styled("a", StyleDeclaration::new().z_index("0"))],
        };
        let collector = LayerCollector::new(Arc::new(source), Arc::new(InlineStyleSampler));
        let layers = collector.collect();
        // Equal ranks keep collection order.
        assert_eq!(labels(&layers), ["base", "a"]);
    }

    #[test]
    fn base_listed_as_overlay_is_collected_once() {
        let base = solid("base");
        let source = StaticLayers {
            base: Some(Arc::clone(&base)),
            overlays: vec![base, solid("a")],
        };
        let collector = LayerCollector::new(Arc::new(source), Arc::new(InlineStyleSampler));
        assert_eq!(collector.count(), 2);
    }

    #[test]
    fn resolve_hidden_and_clamped_values() {
        let style = LayerStyle::resolve(&StyleDeclaration::new().display("none"));
        assert!(style.hidden);
        let style = LayerStyle::resolve(&StyleDeclaration::new().visibility("HIDDEN"));
        assert!(style.hidden);
        assert_eq!(
            LayerStyle::resolve(&StyleDeclaration::new().opacity("1.7")).opacity,
            1.0
        );
        assert_eq!(
            LayerStyle::resolve(&StyleDeclaration::new().opacity("-2")).opacity,
            0.0
        );
        assert_eq!(
            LayerStyle::resolve(&StyleDeclaration::new().opacity("half")).opacity,
            1.0
        );
    }

    #[test]
    fn resolve_downgrades_unknown_blend_and_filter() {
        let style = LayerStyle::resolve(
            &StyleDeclaration::new()
                .mix_blend_mode("sparkle")
                .filter("brightness("),
        );
        assert_eq!(style.blend, BlendMode::SourceOver);
        assert!(style.filter.is_none());

        let style = LayerStyle::resolve(&StyleDeclaration::new().mix_blend_mode("screen"));
        assert_eq!(style.blend, BlendMode::Screen);
    }

    #[test]
    fn inline_style_overrides_table_per_property() {
        let table = StyleTable::new();
        table.set(
            "a",
            StyleDeclaration::new().opacity("0.25").mix_blend_mode("multiply"),
        );
        let source = StaticLayers {
            base: None,
            overlays: vec![styled("a", StyleDeclaration::new().opacity("0.5"))],
        };
        let layers = LayerCollector::new(Arc::new(source), Arc::new(table)).collect();
        assert_eq!(layers[0].style.opacity, 0.5);
        assert_eq!(layers[0].style.blend, BlendMode::Multiply);
    }

    proptest! {
        #[test]
        fn collected_layers_are_rank_ordered(zs in proptest::collection::vec(
            proptest::option::of(-50i32..50), 0..12)
        ) {
            let overlays = zs
                .iter()
                .enumerate()
                .map(|(i, z)| {
                    let mut decl = StyleDeclaration::new();
                    if let Some(z) = z {
                        decl = decl.z_index(z.to_string());
                    }
                    styled(&format!("o{i}"), decl)
                })
                .collect();
            let source = StaticLayers { base: Some(solid("base")), overlays };
            let layers =
                LayerCollector::new(Arc::new(source), Arc::new(InlineStyleSampler)).collect();
            prop_assert_eq!(layers.len(), zs.len() + 1);
            for pair in layers.windows(2) {
                prop_assert!(pair[0].z_index <= pair[1].z_index);
            }
        }
    }
}
