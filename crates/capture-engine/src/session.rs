//! Recording session management.
//!
//! [`RecordingController`] runs at most one session at a time. Explicit
//! `stop()` and the auto-stop timer share one termination path: the live
//! session is taken out of the controller under its lock, so exactly one
//! caller finalizes it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use vizrec_common::{RecordingClock, RecordingDefaults, VizrecError, VizrecResult};
use vizrec_recording_model::{
    ActiveRecordingMeta, ConfigureOptions, PresetTable, ResultArtifact, SessionConfig,
    StartMetadata, MIN_DURATION_MS,
};
use vizrec_render_engine::{
    recording_watermark_options, CpuCanvas, FrameCompositor, LayerCollector, WatermarkSpec,
};

use crate::audio_tap::{AudioTapAdapter, AudioTrack};
use crate::encoder::{
    negotiate_encoding, video_branch, EncodedChunk, EncoderParams, EncoderSession, EncoderState,
};
use crate::finalize::{assemble_payload, resolve_file_name};
use crate::frame_clock::{spawn_frame_clock, FrameClockHandle};
use crate::host::{should_include_audio, HostCapabilities, RecordingStateEvent};

/// Session length used until configured otherwise.
pub const DEFAULT_MAX_DURATION_MS: u64 = 30_000;

/// Capacity of the finished-artifact broadcast.
const COMPLETION_CAPACITY: usize = 8;

/// Controller-wide settings that are not part of a session's configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    /// Watermark caption.
    pub watermark_text: String,
    /// Encoder chunk flush cadence.
    pub chunk_interval: Duration,
    /// Font for watermark text; system fonts are tried when unset.
    pub font_path: Option<PathBuf>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            watermark_text: "made with vizrec".to_string(),
            chunk_interval: Duration::from_secs(1),
            font_path: None,
        }
    }
}

impl ControllerSettings {
    pub fn from_defaults(defaults: &RecordingDefaults) -> Self {
        Self {
            watermark_text: defaults.watermark_text.clone(),
            chunk_interval: Duration::from_millis(defaults.chunk_interval_ms.max(1)),
            font_path: defaults.font_path.clone(),
        }
    }
}

/// Capture branches feeding the encoder. Released exactly once.
struct CaptureBranches {
    video_live: Option<Arc<AtomicBool>>,
    audio: Option<Arc<dyn AudioTrack>>,
}

impl CaptureBranches {
    fn release(&mut self) {
        if let Some(live) = self.video_live.take() {
            live.store(false, Ordering::SeqCst);
        }
        if let Some(track) = self.audio.take() {
            tracing::debug!(track = track.label(), "Stopping audio tap");
            track.stop();
        }
    }
}

impl Drop for CaptureBranches {
    fn drop(&mut self) {
        self.release();
    }
}

/// Pending auto-stop timer.
struct AutoStop {
    cancel: Option<oneshot::Sender<()>>,
}

impl AutoStop {
    fn schedule(shared: Weak<Shared>, session_id: u64, after: Duration) -> Self {
        let (cancel, canceled) = oneshot::channel::<()>();
        tokio::spawn(async move {
            tokio::select! {
                _ = canceled => return,
                _ = tokio::time::sleep(after) => {}
            }
            let Some(shared) = shared.upgrade() else {
                return;
            };
            tracing::info!(session_id, "Maximum duration reached; stopping");
            if let Err(e) = Shared::stop_session(&shared, Some(session_id)).await {
                tracing::error!(session_id, error = %e, "Auto-stop failed");
            }
        });
        Self {
            cancel: Some(cancel),
        }
    }

    fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

struct ActiveSession {
    id: u64,
    clock: RecordingClock,
    metadata: StartMetadata,
    encoder: Box<dyn EncoderSession>,
    frame_clock: FrameClockHandle,
    auto_stop: Option<AutoStop>,
    branches: CaptureBranches,
    collector: JoinHandle<Vec<EncodedChunk>>,
}

struct ControllerState {
    config: SessionConfig,
    session: Option<ActiveSession>,
}

struct Shared {
    host: HostCapabilities,
    presets: PresetTable,
    settings: ControllerSettings,
    state: Mutex<ControllerState>,
    completions: broadcast::Sender<ResultArtifact>,
    next_session_id: AtomicU64,
}

/// Top-level recording state machine (Idle → Active → Idle).
#[derive(Clone)]
pub struct RecordingController {
    shared: Arc<Shared>,
}

impl RecordingController {
    /// Create an idle controller using the table's default preset.
    pub fn new(
        host: HostCapabilities,
        presets: PresetTable,
        settings: ControllerSettings,
    ) -> VizrecResult<Self> {
        let preset = presets
            .default_preset()
            .cloned()
            .ok_or_else(|| VizrecError::config("Preset table is empty"))?;
        let config = SessionConfig::new(preset, DEFAULT_MAX_DURATION_MS, true);
        let (completions, _) = broadcast::channel(COMPLETION_CAPACITY);
        Ok(Self {
            shared: Arc::new(Shared {
                host,
                presets,
                settings,
                state: Mutex::new(ControllerState {
                    config,
                    session: None,
                }),
                completions,
                next_session_id: AtomicU64::new(1),
            }),
        })
    }

    /// Create a controller configured from persisted recording defaults.
    pub fn with_defaults(
        host: HostCapabilities,
        presets: PresetTable,
        defaults: &RecordingDefaults,
    ) -> VizrecResult<Self> {
        let controller = Self::new(host, presets, ControllerSettings::from_defaults(defaults))?;
        controller.configure(
            &ConfigureOptions::default()
                .preset(defaults.preset_id.clone())
                .max_duration_ms(defaults.max_duration_ms)
                .watermark(defaults.watermark),
        );
        Ok(controller)
    }

    pub fn presets(&self) -> &PresetTable {
        &self.shared.presets
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> SessionConfig {
        self.shared.lock().config.clone()
    }

    /// Merge `options` into the configuration used by the next session.
    pub fn configure(&self, options: &ConfigureOptions) {
        let mut state = self.shared.lock();
        state.config.apply(options, &self.shared.presets);
        tracing::debug!(
            preset_id = %state.config.preset_id,
            fps = state.config.preset.fps,
            max_duration_ms = state.config.max_duration_ms,
            watermark = state.config.watermark,
            "Recorder configured"
        );
    }

    /// Start a session. Returns `Ok(false)` when one is already running.
    pub async fn start(&self, options: ConfigureOptions) -> VizrecResult<bool> {
        let session_id = {
            let mut state = self.shared.lock();
            if state.session.is_some() {
                tracing::debug!("Start requested while recording; ignored");
                return Ok(false);
            }
            state.config.apply(&options, &self.shared.presets);
            let session = Shared::launch(&self.shared, &state.config)?;
            let id = session.id;
            state.session = Some(session);
            id
        };

        self.shared.host.observers.notify(RecordingStateEvent {
            is_recording: true,
            session_id,
        });
        Ok(true)
    }

    /// Stop the live session and return its artifact, or `None` when idle.
    pub async fn stop(&self) -> VizrecResult<Option<ResultArtifact>> {
        Shared::stop_session(&self.shared, None).await
    }

    /// Whether a session is live and its encoder is recording.
    pub fn is_recording(&self) -> bool {
        self.shared
            .lock()
            .session
            .as_ref()
            .is_some_and(|s| s.encoder.state() == EncoderState::Recording)
    }

    /// Snapshot of the live session, `None` when idle.
    pub fn active_recording_meta(&self) -> Option<ActiveRecordingMeta> {
        let state = self.shared.lock();
        let session = state.session.as_ref()?;
        Some(ActiveRecordingMeta {
            session_id: session.id,
            preset_id: session.metadata.preset_id.clone(),
            preset: session.metadata.preset.clone(),
            max_duration_ms: session.metadata.max_duration_ms,
            started_at: session.clock.epoch_wall(),
            elapsed_ms: session.clock.elapsed_ms(),
            file_name: session.metadata.file_name.clone(),
        })
    }

    /// Every artifact finalized after subscribing, including auto-stopped
    /// sessions.
    pub fn completions(&self) -> broadcast::Receiver<ResultArtifact> {
        self.shared.completions.subscribe()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wire up and start every part of a session. Nothing is left running
    /// when this fails.
    fn launch(shared: &Arc<Shared>, config: &SessionConfig) -> VizrecResult<ActiveSession> {
        let host = &shared.host;
        let collector = LayerCollector::new(Arc::clone(&host.layers), Arc::clone(&host.styles));
        if collector.count() == 0 {
            return Err(VizrecError::NoLayers);
        }

        let audio = if should_include_audio(host.audio_policy.as_ref()) {
            let mandated = host.audio_policy.explicit_audio_decision() == Some(true);
            match host.audio.as_ref().filter(|g| g.is_live()) {
                Some(graph) => AudioTapAdapter.tap(&**graph),
                None if mandated => return Err(VizrecError::AudioGraphUnavailable),
                None => {
                    tracing::warn!("No live audio graph; recording video only");
                    None
                }
            }
        } else {
            None
        };

        let preset = &config.preset;
        let canvas = CpuCanvas::with_font(
            preset.width,
            preset.height,
            shared.settings.font_path.as_deref(),
        );
        let watermark = config.watermark.then(|| WatermarkSpec {
            text: shared.settings.watermark_text.clone(),
            options: recording_watermark_options(preset),
        });
        let compositor =
            FrameCompositor::new(canvas, collector, preset.fps).with_watermark(watermark);

        let mime_type = negotiate_encoding(host.encoder.as_ref(), &preset.mime_types);
        let (sink, stream) = video_branch(preset.width, preset.height, preset.fps);
        let mut branches = CaptureBranches {
            video_live: Some(sink.live_flag()),
            audio: audio.clone(),
        };

        let params = EncoderParams {
            mime_type: mime_type.clone(),
            width: preset.width,
            height: preset.height,
            fps: preset.fps,
            video_bits_per_second: preset.video_bits_per_second,
            audio_bits_per_second: audio.as_ref().and(preset.audio_bits_per_second),
        };
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let mut encoder = host
            .encoder
            .create_session(params, stream, audio.clone(), chunk_tx)?;
        let collector_task = spawn_chunk_collector(chunk_rx);

        if let Err(e) = encoder.start(shared.settings.chunk_interval) {
            tracing::warn!(backend = host.encoder.name(), error = %e, "Encoder failed to start");
            branches.release();
            return Err(e);
        }

        let frame_clock = spawn_frame_clock(compositor, host.refresh.ticker(), sink);
        let audio_included = audio.is_some() && encoder.has_audio();
        let metadata = StartMetadata::from_config(config, mime_type, audio_included);
        let id = shared.next_session_id.fetch_add(1, Ordering::Relaxed);
        let max_duration = Duration::from_millis(metadata.max_duration_ms.max(MIN_DURATION_MS));
        let auto_stop = AutoStop::schedule(Arc::downgrade(shared), id, max_duration);

        tracing::info!(
            session_id = id,
            preset_id = %metadata.preset_id,
            width = preset.width,
            height = preset.height,
            fps = preset.fps,
            mime_type = %metadata.mime_type,
            audio_included,
            backend = host.encoder.name(),
            "Recording started"
        );

        Ok(ActiveSession {
            id,
            clock: RecordingClock::start(),
            metadata,
            encoder,
            frame_clock,
            auto_stop: Some(auto_stop),
            branches,
            collector: collector_task,
        })
    }

    /// Finalize the live session. With `expected` set, only that session
    /// is stopped.
    async fn stop_session(
        shared: &Arc<Shared>,
        expected: Option<u64>,
    ) -> VizrecResult<Option<ResultArtifact>> {
        let taken = {
            let mut state = shared.lock();
            match state.session.as_ref() {
                Some(s) if expected.map_or(true, |id| id == s.id) => state.session.take(),
                _ => None,
            }
        };
        let Some(ActiveSession {
            id,
            clock,
            metadata,
            mut encoder,
            mut frame_clock,
            auto_stop,
            mut branches,
            collector,
        }) = taken
        else {
            return Ok(None);
        };

        if let Some(mut timer) = auto_stop {
            timer.cancel();
        }
        let stats = frame_clock.join().await;
        if let Err(e) = encoder.finish().await {
            tracing::warn!(session_id = id, error = %e, "Encoder did not finish cleanly");
        }
        let mime_type = encoder
            .mime_type()
            .unwrap_or_else(|| metadata.mime_type.clone());
        // The collector ends once the encoder's chunk sender is gone.
        drop(encoder);
        branches.release();
        let chunks = collector.await.unwrap_or_else(|e| {
            tracing::warn!(session_id = id, error = %e, "Chunk collector failed");
            Vec::new()
        });

        let configured_name = shared.lock().config.file_name.clone();
        let file_name = resolve_file_name(
            configured_name.as_deref(),
            metadata.file_name.as_deref(),
            &mime_type,
            Utc::now().date_naive(),
        );

        let artifact = ResultArtifact {
            payload: assemble_payload(&chunks),
            url: ResultArtifact::url_for_session(id),
            mime_type,
            width: metadata.preset.width,
            height: metadata.preset.height,
            duration_ms: clock.elapsed_ms(),
            preset_id: metadata.preset_id.clone(),
            preset: metadata.preset.clone(),
            file_name,
            audio_included: metadata.audio_included,
        };

        tracing::info!(
            session_id = id,
            bytes = artifact.size(),
            chunks = chunks.len(),
            frames = stats.frames,
            duration_ms = artifact.duration_ms,
            file_name = %artifact.file_name,
            "Recording finalized"
        );

        shared.host.observers.notify(RecordingStateEvent {
            is_recording: false,
            session_id: id,
        });
        // No subscribers is fine.
        let _ = shared.completions.send(artifact.clone());
        Ok(Some(artifact))
    }
}

/// Single consumer of encoder output; keeps non-empty chunks in order.
fn spawn_chunk_collector(
    mut chunks: mpsc::UnboundedReceiver<EncodedChunk>,
) -> JoinHandle<Vec<EncodedChunk>> {
    tokio::spawn(async move {
        let mut collected = Vec::new();
        while let Some(chunk) = chunks.recv().await {
            if !chunk.is_empty() {
                collected.push(chunk);
            }
        }
        collected
    })
}
