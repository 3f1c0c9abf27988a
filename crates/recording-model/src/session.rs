//! Session configuration and start snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::preset::{Preset, PresetTable};

/// Lowest frame rate an override may request.
pub const MIN_FPS: u32 = 10;
/// Highest frame rate an override may request.
pub const MAX_FPS: u32 = 120;
/// Shortest allowed session, in milliseconds.
pub const MIN_DURATION_MS: u64 = 1000;

/// Partial update applied by `configure` and `start`.
///
/// Every field is optional; `None` leaves the current value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigureOptions {
    pub preset_id: Option<String>,
    pub max_duration_ms: Option<u64>,
    pub watermark: Option<bool>,
    /// Frame-rate override, rounded and clamped to `[MIN_FPS, MAX_FPS]`.
    pub fps: Option<f64>,
    /// Base file name. An empty or whitespace-only name clears the override.
    pub file_name: Option<String>,
}

impl ConfigureOptions {
    pub fn preset(mut self, id: impl Into<String>) -> Self {
        self.preset_id = Some(id.into());
        self
    }

    pub fn max_duration_ms(mut self, ms: u64) -> Self {
        self.max_duration_ms = Some(ms);
        self
    }

    pub fn watermark(mut self, enabled: bool) -> Self {
        self.watermark = Some(enabled);
        self
    }

    pub fn fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

/// Mutable configuration owned by the recording controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Identifier of the selected preset.
    pub preset_id: String,

    /// Private copy of the preset (frame rate may be overridden).
    pub preset: Preset,

    /// Auto-stop deadline in milliseconds, never below [`MIN_DURATION_MS`].
    pub max_duration_ms: u64,

    /// Whether the watermark is drawn.
    pub watermark: bool,

    /// User-supplied base file name.
    pub file_name: Option<String>,
}

impl SessionConfig {
    pub fn new(preset: Preset, max_duration_ms: u64, watermark: bool) -> Self {
        Self {
            preset_id: preset.id.clone(),
            preset,
            max_duration_ms: max_duration_ms.max(MIN_DURATION_MS),
            watermark,
            file_name: None,
        }
    }

    /// Merge `options` into this configuration.
    ///
    /// Unknown preset ids are ignored and the current preset is kept.
    pub fn apply(&mut self, options: &ConfigureOptions, presets: &PresetTable) {
        if let Some(id) = options.preset_id.as_deref() {
            match presets.get(id) {
                Some(preset) => {
                    self.preset_id = preset.id.clone();
                    self.preset = preset.clone();
                }
                None => {
                    tracing::warn!(
                        preset_id = id,
                        current = %self.preset_id,
                        "Unknown preset; keeping current"
                    );
                }
            }
        }

        if let Some(fps) = options.fps.filter(|f| f.is_finite()) {
            self.preset.fps = clamp_fps(fps);
        }

        if let Some(ms) = options.max_duration_ms {
            self.max_duration_ms = ms.max(MIN_DURATION_MS);
        }

        if let Some(watermark) = options.watermark {
            self.watermark = watermark;
        }

        if let Some(name) = options.file_name.as_deref() {
            let trimmed = name.trim();
            self.file_name = (!trimmed.is_empty()).then(|| trimmed.to_string());
        }
    }
}

/// Round and clamp a requested frame rate.
pub fn clamp_fps(fps: f64) -> u32 {
    fps.round().clamp(MIN_FPS as f64, MAX_FPS as f64) as u32
}

/// Snapshot of the configuration frozen when a session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartMetadata {
    pub preset_id: String,
    pub preset: Preset,
    pub max_duration_ms: u64,
    pub watermark: bool,
    pub file_name: Option<String>,
    /// Negotiated encoding.
    pub mime_type: String,
    /// Whether an audio branch was wired into the encoder.
    pub audio_included: bool,
}

impl StartMetadata {
    pub fn from_config(config: &SessionConfig, mime_type: String, audio_included: bool) -> Self {
        Self {
            preset_id: config.preset_id.clone(),
            preset: config.preset.clone(),
            max_duration_ms: config.max_duration_ms,
            watermark: config.watermark,
            file_name: config.file_name.clone(),
            mime_type,
            audio_included,
        }
    }
}

/// Read-only view of a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRecordingMeta {
    pub session_id: u64,
    pub preset_id: String,
    pub preset: Preset,
    pub max_duration_ms: u64,
    /// Wall-clock start of the session.
    pub started_at: DateTime<Utc>,
    /// Milliseconds elapsed since start at the time of the query.
    pub elapsed_ms: f64,
    pub file_name: Option<String>,
}
