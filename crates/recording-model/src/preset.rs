//! Render presets.
//!
//! A preset bundles everything the recorder needs to size the render target
//! and configure the encoder.

use serde::{Deserialize, Serialize};

/// Identifier of the preset used when nothing else is selected.
pub const DEFAULT_PRESET_ID: &str = "vertical1080x1920";

/// Immutable render preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    /// Stable identifier (e.g. `vertical1080x1920`).
    pub id: String,

    /// Human-readable label.
    pub label: String,

    /// Output width in pixels.
    pub width: u32,

    /// Output height in pixels.
    pub height: u32,

    /// Target frame rate.
    pub fps: u32,

    /// Candidate encodings, most preferred first.
    pub mime_types: Vec<String>,

    /// Target video bitrate.
    pub video_bits_per_second: u64,

    /// Target audio bitrate, applied only when audio is recorded.
    pub audio_bits_per_second: Option<u64>,

    /// Watermark padding as a fraction of `min(width, height)`.
    pub safe_margin: f64,
}

impl Preset {
    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

fn default_candidates() -> Vec<String> {
    vec![
        "video/mp4;codecs=avc1.42E01E,mp4a.40.2".to_string(),
        "video/webm;codecs=vp9,opus".to_string(),
        "video/webm;codecs=vp8,opus".to_string(),
    ]
}

/// Lookup table of presets by identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetTable {
    presets: Vec<Preset>,
}

impl PresetTable {
    /// Build a table from explicit presets. Later duplicates are ignored.
    pub fn new(presets: Vec<Preset>) -> Self {
        let mut unique: Vec<Preset> = Vec::with_capacity(presets.len());
        for preset in presets {
            if unique.iter().any(|p| p.id == preset.id) {
                tracing::warn!(id = %preset.id, "Duplicate preset id ignored");
                continue;
            }
            unique.push(preset);
        }
        Self { presets: unique }
    }

    /// The presets shipped with vizrec.
    pub fn builtin() -> Self {
        Self::new(vec![
            Preset {
                id: "horizontal1920x1080".to_string(),
                label: "Horizontal 1920x1080 (16:9 - Larger Devices)".to_string(),
                width: 1920,
                height: 1080,
                fps: 45,
                mime_types: default_candidates(),
                video_bits_per_second: 9_000_000,
                audio_bits_per_second: Some(192_000),
                safe_margin: 0.05,
            },
            Preset {
                id: "vertical1080x1920".to_string(),
                label: "Vertical 1080x1920 (9:16 - Mobile Devices)".to_string(),
                width: 1080,
                height: 1920,
                fps: 45,
                mime_types: default_candidates(),
                video_bits_per_second: 8_000_000,
                audio_bits_per_second: Some(192_000),
                safe_margin: 0.06,
            },
            Preset {
                id: "square1080x1080".to_string(),
                label: "Square 1080x1080 (1:1)".to_string(),
                width: 1080,
                height: 1080,
                fps: 45,
                mime_types: default_candidates(),
                video_bits_per_second: 7_000_000,
                audio_bits_per_second: Some(192_000),
                safe_margin: 0.05,
            },
        ])
    }

    /// Look up a preset by id.
    pub fn get(&self, id: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.id == id)
    }

    /// The default preset, or the first entry when the default id is absent.
    pub fn default_preset(&self) -> Option<&Preset> {
        self.get(DEFAULT_PRESET_ID).or_else(|| self.presets.first())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.iter()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

impl Default for PresetTable {
    fn default() -> Self {
        Self::builtin()
    }
}
