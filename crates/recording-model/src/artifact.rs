//! Finalized recording output.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::preset::Preset;

/// URL scheme prefix for in-memory artifact handles.
pub const BLOB_URL_PREFIX: &str = "blob:vizrec/";

/// Encoded video plus the metadata describing it.
///
/// Produced once per completed session and handed to the caller; cloning is
/// cheap because the payload is shared.
#[derive(Debug, Clone, Serialize)]
pub struct ResultArtifact {
    /// Encoded container bytes.
    #[serde(skip)]
    pub payload: Arc<[u8]>,

    /// Dereferenceable handle for the payload (`blob:vizrec/<session>`).
    pub url: String,

    /// Encoding of the payload.
    pub mime_type: String,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Wall time between start and finalization.
    pub duration_ms: f64,

    pub preset_id: String,
    pub preset: Preset,

    /// Sanitized file name including extension.
    pub file_name: String,

    /// Whether the payload carries an audio track.
    pub audio_included: bool,
}

impl ResultArtifact {
    /// Build the handle URL for a session.
    pub fn url_for_session(session_id: u64) -> String {
        format!("{BLOB_URL_PREFIX}{session_id}")
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Resolve a handle produced by [`ResultArtifact::url_for_session`].
    ///
    /// Returns the payload when `url` refers to this artifact.
    pub fn dereference(&self, url: &str) -> Option<&[u8]> {
        (url == self.url).then_some(&*self.payload)
    }

    /// Write the payload into `dir` under the resolved file name.
    pub fn save_in(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.file_name);
        std::fs::write(&path, &self.payload)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::PresetTable;

    fn artifact() -> ResultArtifact {
        let preset = PresetTable::builtin()
            .get("square1080x1080")
            .unwrap()
            .clone();
        ResultArtifact {
            payload: Arc::from(vec![1u8, 2, 3]),
            url: ResultArtifact::url_for_session(7),
            mime_type: "video/webm".to_string(),
            width: preset.width,
            height: preset.height,
            duration_ms: 1500.0,
            preset_id: preset.id.clone(),
            preset,
            file_name: "clip.webm".to_string(),
            audio_included: false,
        }
    }

    #[test]
    fn url_dereferences_to_payload() {
        let artifact = artifact();
        assert_eq!(artifact.url, "blob:vizrec/7");
        assert_eq!(artifact.dereference("blob:vizrec/7"), Some(&[1u8, 2, 3][..]));
        assert_eq!(artifact.dereference("blob:vizrec/8"), None);
    }

    #[test]
    fn save_in_writes_named_file() {
        let dir = std::env::temp_dir().join(format!("vizrec-artifact-{}", std::process::id()));
        let path = artifact().save_in(&dir).unwrap();
        assert_eq!(path.file_name().unwrap(), "clip.webm");
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn metadata_serializes_without_payload() {
        let json = serde_json::to_value(artifact()).unwrap();
        assert!(json.get("payload").is_none());
        assert_eq!(json["file_name"], "clip.webm");
    }
}
