//! Record the demo stage.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use vizrec_capture_engine::{
    DisplayRefresh, FfmpegEncoderBackend, HostCapabilities, RecordingController,
};
use vizrec_common::AppConfig;
use vizrec_recording_model::{ConfigureOptions, PresetTable, ResultArtifact};

use crate::demo;

/// Per-run overrides on top of the persisted recording defaults.
#[derive(Debug, Default)]
pub struct RecordRequest {
    pub preset: Option<String>,
    pub duration_ms: Option<u64>,
    pub fps: Option<f64>,
    pub name: Option<String>,
    pub watermark: Option<bool>,
}

impl RecordRequest {
    fn options(&self) -> ConfigureOptions {
        ConfigureOptions {
            preset_id: self.preset.clone(),
            max_duration_ms: self.duration_ms,
            watermark: self.watermark,
            fps: self.fps,
            file_name: self.name.clone(),
        }
    }
}

pub async fn run(config: &AppConfig, request: RecordRequest) -> anyhow::Result<()> {
    let defaults = &config.recording;
    let backend = FfmpegEncoderBackend::detect(&defaults.ffmpeg_path).await;
    if !backend.is_available() {
        anyhow::bail!(
            "ffmpeg not found at {} (set --ffmpeg or recording.ffmpeg_path)",
            defaults.ffmpeg_path.display()
        );
    }

    let presets = PresetTable::builtin();
    if let Some(id) = &request.preset {
        if presets.get(id).is_none() {
            anyhow::bail!("Unknown preset '{id}'; run `vizrec presets` to list them");
        }
    }

    // The stage renders at its own size; the compositor letterboxes it.
    let stage = demo::build_stage(1280, 720);
    let host = HostCapabilities::new(stage.layers, Arc::new(backend))
        .with_styles(stage.styles)
        .with_refresh(Arc::new(DisplayRefresh::new(defaults.display_refresh_hz)));
    let controller = RecordingController::with_defaults(host, presets, defaults)?;
    let mut completions = controller.completions();

    if !controller.start(request.options()).await? {
        anyhow::bail!("A recording is already in progress");
    }
    let Some(meta) = controller.active_recording_meta() else {
        anyhow::bail!("Recording stopped before it started");
    };
    tracing::info!(
        session = meta.session_id,
        preset = %meta.preset_id,
        max_duration_ms = meta.max_duration_ms,
        "Recording started"
    );

    println!("Recording session {}", meta.session_id);
    println!(
        "  Preset: {} ({}x{} @ {}fps)",
        meta.preset_id, meta.preset.width, meta.preset.height, meta.preset.fps
    );
    println!("  Limit: {:.1}s", meta.max_duration_ms as f64 / 1000.0);
    println!("  Output: {}", config.output_dir.display());
    println!();
    println!("Press Ctrl+C to stop recording...");

    let artifact = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            println!();
            tracing::info!(session = meta.session_id, "Interrupted; stopping recording");
            let stopped = controller.stop().await?;
            settle(stopped, &mut completions).await?
        }
        finished = completions.recv() => {
            tracing::info!(session = meta.session_id, "Duration limit reached");
            finished.context("Recorder shut down before finishing")?
        }
    };

    save(config, &artifact)
}

/// The artifact of an interrupted session. When the duration limit won the
/// race, `stop` finds nothing and the artifact arrives on `completions`.
async fn settle(
    stopped: Option<ResultArtifact>,
    completions: &mut broadcast::Receiver<ResultArtifact>,
) -> anyhow::Result<ResultArtifact> {
    match stopped {
        Some(artifact) => Ok(artifact),
        None => {
            tracing::debug!("Session already finalized; waiting for its artifact");
            completions
                .recv()
                .await
                .context("Recording ended without an artifact")
        }
    }
}

fn save(config: &AppConfig, artifact: &ResultArtifact) -> anyhow::Result<()> {
    let path = artifact
        .save_in(&config.output_dir)
        .with_context(|| {
            format!(
                "Failed to write {} into {}",
                artifact.file_name,
                config.output_dir.display()
            )
        })?;
    tracing::info!(
        path = %path.display(),
        bytes = artifact.size(),
        audio = artifact.audio_included,
        "Recording saved"
    );

    println!("Recording saved to: {}", path.display());
    println!("  Encoding: {}", artifact.mime_type);
    println!(
        "  Duration: {:.1}s, {} bytes",
        artifact.duration_ms / 1000.0,
        artifact.size()
    );
    if !artifact.audio_included {
        println!("  Audio: not included");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vizrec_recording_model::DEFAULT_PRESET_ID;

    fn artifact(file_name: &str) -> ResultArtifact {
        let preset = PresetTable::builtin().get(DEFAULT_PRESET_ID).unwrap().clone();
        ResultArtifact {
            payload: Arc::from(vec![1u8, 2, 3]),
            url: "blob:vizrec/1".into(),
            mime_type: "video/webm;codecs=vp9".into(),
            width: preset.width,
            height: preset.height,
            duration_ms: 1500.0,
            preset_id: preset.id.clone(),
            preset,
            file_name: file_name.into(),
            audio_included: false,
        }
    }

    #[tokio::test]
    async fn stopped_artifact_is_used_directly() {
        let (_tx, mut completions) = broadcast::channel(4);
        let settled = settle(Some(artifact("manual.webm")), &mut completions).await.unwrap();
        assert_eq!(settled.file_name, "manual.webm");
    }

    #[tokio::test]
    async fn auto_stopped_artifact_is_picked_up_after_interrupt() {
        let (tx, mut completions) = broadcast::channel(4);
        tx.send(artifact("auto.webm")).unwrap();
        let settled = settle(None, &mut completions).await.unwrap();
        assert_eq!(settled.file_name, "auto.webm");
    }

    #[tokio::test]
    async fn closed_completions_is_an_error() {
        let (tx, mut completions) = broadcast::channel::<ResultArtifact>(4);
        drop(tx);
        assert!(settle(None, &mut completions).await.is_err());
    }
}
