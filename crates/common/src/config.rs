//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory where finished recordings are written.
    pub output_dir: PathBuf,

    /// Default recording settings.
    pub recording: RecordingDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default recording parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Preset used when nothing else is selected.
    pub preset_id: String,

    /// Default maximum session length in milliseconds.
    pub max_duration_ms: u64,

    /// Whether the watermark is drawn by default.
    pub watermark: bool,

    /// Watermark caption.
    pub watermark_text: String,

    /// Encoder chunk flush cadence in milliseconds.
    pub chunk_interval_ms: u64,

    /// Rate of the display-refresh clock driving the compositor (Hz).
    pub display_refresh_hz: u32,

    /// ffmpeg binary used by the process encoder.
    pub ffmpeg_path: PathBuf,

    /// Font used for watermark text. Well-known system fonts are tried when unset.
    pub font_path: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "vizrec=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: dirs_default_recordings(),
            recording: RecordingDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            preset_id: "vertical1080x1920".to_string(),
            max_duration_ms: 30_000,
            watermark: true,
            watermark_text: "made with vizrec".to_string(),
            chunk_interval_ms: 1000,
            display_refresh_hz: 60,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            font_path: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("vizrec").join("config.json")
}

/// Default output directory for finished recordings.
fn dirs_default_recordings() -> PathBuf {
    let base = std::env::var("XDG_VIDEOS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join("Videos")
        });
    base.join("vizrec")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_recording_section_fills_defaults() {
        let json = r#"{
            "output_dir": "/tmp/out",
            "recording": { "preset_id": "square1080x1080", "watermark": false },
            "logging": { "level": "debug", "json": true, "file": null }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.recording.preset_id, "square1080x1080");
        assert!(!config.recording.watermark);
        assert_eq!(config.recording.max_duration_ms, 30_000);
        assert_eq!(config.recording.chunk_interval_ms, 1000);
        assert!(config.logging.json);
    }
}
