//! Glyph rasterization for watermark text.

use std::path::{Path, PathBuf};

use fontdue::{Font, FontSettings};
use image::RgbaImage;

use crate::blend::{composite_pixel, BlendMode};
use crate::canvas::{RenderError, Rgba};

/// Fonts tried when no explicit font path is configured.
const FALLBACK_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/usr/share/fonts/noto/NotoSans-Bold.ttf",
    "/Library/Fonts/Arial Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\segoeuib.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

/// Rasterizes text with a single loaded font.
pub struct GlyphPainter {
    font: Font,
    source: PathBuf,
}

impl std::fmt::Debug for GlyphPainter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlyphPainter")
            .field("source", &self.source)
            .finish()
    }
}

impl GlyphPainter {
    /// Load a TrueType/OpenType font file.
    pub fn load(path: &Path) -> Result<Self, RenderError> {
        let unusable = |message: String| RenderError::Font {
            path: path.to_path_buf(),
            message,
        };
        let bytes = std::fs::read(path).map_err(|e| unusable(e.to_string()))?;
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| unusable(e.to_string()))?;
        Ok(Self {
            font,
            source: path.to_path_buf(),
        })
    }

    /// Load `explicit` if given, otherwise the first well-known system font
    /// that exists.
    pub fn discover(explicit: Option<&Path>) -> Option<Self> {
        if let Some(path) = explicit {
            match Self::load(path) {
                Ok(painter) => return Some(painter),
                Err(e) => {
                    tracing::warn!(error = %e, "Configured font unusable; trying system fonts")
                }
            }
        }
        FALLBACK_FONTS
            .iter()
            .map(Path::new)
            .filter(|p| p.exists())
            .find_map(|p| Self::load(p).ok())
    }

    /// File the font was loaded from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Advance width of `text` at `px`, including kerning.
    pub fn measure(&self, text: &str, px: f32) -> f32 {
        let mut width = 0.0;
        let mut prev: Option<char> = None;
        for ch in text.chars() {
            if let Some(p) = prev {
                width += self.font.horizontal_kern(p, ch, px).unwrap_or(0.0);
            }
            width += self.font.metrics(ch, px).advance_width;
            prev = Some(ch);
        }
        width
    }

    /// Draw `text` with its baseline starting at `(x, baseline)`.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &self,
        target: &mut RgbaImage,
        text: &str,
        x: f64,
        baseline: f64,
        px: f32,
        color: Rgba,
        alpha: f32,
        mode: BlendMode,
    ) {
        let (tw, th) = (target.width() as i64, target.height() as i64);
        let mut pen_x = x as f32;
        let mut prev: Option<char> = None;
        for ch in text.chars() {
            if let Some(p) = prev {
                pen_x += self.font.horizontal_kern(p, ch, px).unwrap_or(0.0);
            }
            let (metrics, coverage) = self.font.rasterize(ch, px);
            let left = (pen_x.round() as i64) + i64::from(metrics.xmin);
            let top = baseline.round() as i64 - (metrics.height as i64 + i64::from(metrics.ymin));

            for gy in 0..metrics.height {
                let py = top + gy as i64;
                if py < 0 || py >= th {
                    continue;
                }
                for gx in 0..metrics.width {
                    let px_x = left + gx as i64;
                    if px_x < 0 || px_x >= tw {
                        continue;
                    }
                    let cov = coverage[gy * metrics.width + gx];
                    if cov == 0 {
                        continue;
                    }
                    let mut src = color.to_pixel(1.0);
                    src[3] = ((f32::from(src[3]) * f32::from(cov)) / 255.0).round() as u8;
                    let dst = target.get_pixel_mut(px_x as u32, py as u32);
                    dst.0 = composite_pixel(mode, dst.0, src, alpha);
                }
            }

            pen_x += metrics.advance_width;
            prev = Some(ch);
        }
    }
}

/// Rough advance width used when no font could be loaded.
pub fn estimate_text_width(text: &str, px: f32) -> f32 {
    text.chars().count() as f32 * px * 0.56
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_scales_with_length_and_size() {
        assert_eq!(estimate_text_width("", 20.0), 0.0);
        let short = estimate_text_width("ab", 20.0);
        let long = estimate_text_width("abcd", 20.0);
        assert!((long - 2.0 * short).abs() < 1e-4);
        assert!(estimate_text_width("ab", 40.0) > short);
    }

    #[test]
    fn unreadable_font_is_a_font_error() {
        let path = Path::new("/definitely/not/a/font.ttf");
        match GlyphPainter::load(path) {
            Err(RenderError::Font { path: failed, .. }) => assert_eq!(failed, path),
            other => panic!("expected a font error, got {other:?}"),
        }

        let garbage = std::env::temp_dir().join("vizrec-not-a-font.ttf");
        std::fs::write(&garbage, b"not a font").unwrap();
        let err = GlyphPainter::load(&garbage).unwrap_err();
        assert!(matches!(err, RenderError::Font { .. }));
        assert!(err.to_string().contains("vizrec-not-a-font.ttf"));
        let _ = std::fs::remove_file(&garbage);
    }

    #[test]
    fn missing_explicit_font_falls_back_without_panicking() {
        let painter = GlyphPainter::discover(Some(Path::new("/definitely/not/a/font.ttf")));
        if let Some(p) = painter {
            assert!(p.measure("vizrec", 20.0) > 0.0);
        }
    }
}
