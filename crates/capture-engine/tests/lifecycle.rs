use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use vizrec_capture_engine::{
    AudioFormat, AudioGraph, AudioInclusionPolicy, AudioSamples, AudioSourceKind, AudioTrack,
    ControllerSettings, DisplayRefresh, EncodedChunk, EncoderBackend, EncoderParams,
    EncoderSession, EncoderState, HostCapabilities, ObserverRegistry, RecordingController,
    RecordingStateEvent, TapPoint, VideoStream,
};
use vizrec_common::{VizrecError, VizrecResult};
use vizrec_recording_model::{ConfigureOptions, Preset, PresetTable};
use vizrec_render_engine::{SolidSurface, StaticLayers, Surface};

const MIME: &str = "video/webm;codecs=vp9,opus";

fn small_presets() -> PresetTable {
    PresetTable::new(vec![
        Preset {
            id: "tiny".to_string(),
            label: "Tiny 64x36".to_string(),
            width: 64,
            height: 36,
            fps: 30,
            mime_types: vec![MIME.to_string()],
            video_bits_per_second: 500_000,
            audio_bits_per_second: Some(64_000),
            safe_margin: 0.05,
        },
        Preset {
            id: "tall".to_string(),
            label: "Tall 36x64".to_string(),
            width: 36,
            height: 64,
            fps: 30,
            mime_types: vec![MIME.to_string()],
            video_bits_per_second: 500_000,
            audio_bits_per_second: Some(64_000),
            safe_margin: 0.05,
        },
    ])
}

fn stage() -> Arc<StaticLayers> {
    let base: Arc<dyn Surface> =
        Arc::new(SolidSurface::new("spectrum", 32, 18, [40, 200, 90, 255]));
    Arc::new(StaticLayers {
        base: Some(base),
        overlays: vec![],
    })
}

#[derive(Default)]
struct Recorded {
    params: Mutex<Vec<EncoderParams>>,
    audio_tracks: AtomicUsize,
    sample_streams: AtomicUsize,
    finished: AtomicUsize,
}

/// Encoder that emits a header chunk then one byte per frame.
struct FakeBackend {
    supported: Vec<String>,
    reports_audio: bool,
    recorded: Arc<Recorded>,
}

impl FakeBackend {
    fn new() -> Self {
        Self {
            supported: vec![MIME.to_string()],
            reports_audio: true,
            recorded: Arc::new(Recorded::default()),
        }
    }
}

impl EncoderBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.supported.iter().any(|m| m == mime_type)
    }

    fn create_session(
        &self,
        params: EncoderParams,
        video: VideoStream,
        audio: Option<Arc<dyn AudioTrack>>,
        chunks: mpsc::UnboundedSender<EncodedChunk>,
    ) -> VizrecResult<Box<dyn EncoderSession>> {
        self.recorded.params.lock().unwrap().push(params.clone());
        if let Some(track) = &audio {
            self.recorded.audio_tracks.fetch_add(1, Ordering::SeqCst);
            if track.take_samples().is_some() {
                self.recorded.sample_streams.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(Box::new(FakeSession {
            mime: params.mime_type,
            audio: audio.is_some() && self.reports_audio,
            video: Some(video),
            chunks: Some(chunks),
            state: EncoderState::Inactive,
            task: None,
            recorded: Arc::clone(&self.recorded),
        }))
    }
}

struct FakeSession {
    mime: String,
    audio: bool,
    video: Option<VideoStream>,
    chunks: Option<mpsc::UnboundedSender<EncodedChunk>>,
    state: EncoderState,
    task: Option<JoinHandle<()>>,
    recorded: Arc<Recorded>,
}

#[async_trait::async_trait]
impl EncoderSession for FakeSession {
    fn start(&mut self, _timeslice: Duration) -> VizrecResult<()> {
        let (Some(mut video), Some(chunks)) = (self.video.take(), self.chunks.take()) else {
            return Err(VizrecError::encoder("already started"));
        };
        self.task = Some(tokio::spawn(async move {
            let _ = chunks.send(EncodedChunk::new(b"HDR".to_vec()));
            while let Some(_frame) = video.recv().await {
                let _ = chunks.send(EncodedChunk::new(vec![b'f']));
            }
        }));
        self.state = EncoderState::Recording;
        Ok(())
    }

    fn state(&self) -> EncoderState {
        self.state
    }

    fn mime_type(&self) -> Option<String> {
        Some(self.mime.clone())
    }

    fn has_audio(&self) -> bool {
        self.audio
    }

    async fn finish(&mut self) -> VizrecResult<()> {
        self.recorded.finished.fetch_add(1, Ordering::SeqCst);
        self.state = EncoderState::Stopped;
        self.chunks = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }
}

struct FakeTrack {
    live: AtomicBool,
    samples: Mutex<Option<AudioSamples>>,
}

impl FakeTrack {
    fn new() -> Self {
        let (_tx, rx) = mpsc::channel(1);
        Self {
            live: AtomicBool::new(true),
            samples: Mutex::new(Some(rx)),
        }
    }
}

impl AudioTrack for FakeTrack {
    fn label(&self) -> &str {
        "fake-audio"
    }
    fn format(&self) -> AudioFormat {
        AudioFormat::default()
    }
    fn take_samples(&self) -> Option<AudioSamples> {
        self.samples.lock().unwrap().take()
    }
    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

struct FakeGraph {
    live: bool,
    track: Arc<FakeTrack>,
}

impl FakeGraph {
    fn live() -> Self {
        Self {
            live: true,
            track: Arc::new(FakeTrack::new()),
        }
    }
}

impl AudioGraph for FakeGraph {
    fn is_live(&self) -> bool {
        self.live
    }
    fn has_node(&self, _point: TapPoint) -> bool {
        true
    }
    fn connect_tap(&self, _point: TapPoint) -> VizrecResult<Arc<dyn AudioTrack>> {
        Ok(self.track.clone())
    }
}

struct Policy {
    explicit: Option<bool>,
    kind: AudioSourceKind,
}

impl AudioInclusionPolicy for Policy {
    fn explicit_audio_decision(&self) -> Option<bool> {
        self.explicit
    }
    fn audio_source_kind(&self) -> AudioSourceKind {
        self.kind.clone()
    }
}

fn settings() -> ControllerSettings {
    ControllerSettings {
        chunk_interval: Duration::from_millis(100),
        ..ControllerSettings::default()
    }
}

fn controller_with(host: HostCapabilities) -> RecordingController {
    RecordingController::new(host, small_presets(), settings()).unwrap()
}

fn host(backend: FakeBackend) -> HostCapabilities {
    HostCapabilities::new(stage(), Arc::new(backend))
        .with_refresh(Arc::new(DisplayRefresh::new(60)))
}

#[tokio::test(start_paused = true)]
async fn second_start_is_ignored() {
    let controller = controller_with(host(FakeBackend::new()));
    assert!(controller.start(ConfigureOptions::default()).await.unwrap());
    assert!(controller.is_recording());
    assert!(!controller.start(ConfigureOptions::default()).await.unwrap());

    let artifact = controller.stop().await.unwrap().unwrap();
    assert_eq!(artifact.url, "blob:vizrec/1");
    assert!(!controller.is_recording());
}

#[tokio::test(start_paused = true)]
async fn stop_when_idle_returns_none() {
    let controller = controller_with(host(FakeBackend::new()));
    assert!(controller.stop().await.unwrap().is_none());
    assert!(controller.active_recording_meta().is_none());
}

#[tokio::test(start_paused = true)]
async fn artifact_matches_preset_and_carries_frames() {
    let controller = controller_with(host(FakeBackend::new()));
    controller
        .start(ConfigureOptions::default().preset("tall"))
        .await
        .unwrap();

    let meta = controller.active_recording_meta().unwrap();
    assert_eq!(meta.preset_id, "tall");
    assert_eq!(meta.session_id, 1);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let artifact = controller.stop().await.unwrap().unwrap();

    assert_eq!((artifact.width, artifact.height), (36, 64));
    assert_eq!(artifact.mime_type, MIME);
    assert_eq!(artifact.preset_id, "tall");
    assert!(artifact.payload.starts_with(b"HDR"));
    assert!(artifact.payload.len() > 3, "expected frames after the header");
    assert!((artifact.duration_ms - 500.0).abs() < 50.0);
    assert!(artifact.file_name.ends_with(".webm"));
}

#[tokio::test(start_paused = true)]
async fn auto_stop_finalizes_once() {
    let controller = controller_with(host(FakeBackend::new()));
    let mut completions = controller.completions();
    controller
        .start(ConfigureOptions::default().max_duration_ms(1500))
        .await
        .unwrap();

    let artifact = tokio::time::timeout(Duration::from_secs(5), completions.recv())
        .await
        .expect("auto-stop should fire")
        .unwrap();
    assert!(artifact.duration_ms >= 1500.0);
    assert!(!controller.is_recording());

    // The explicit stop arrives after the timer already finalized.
    assert!(controller.stop().await.unwrap().is_none());
    assert!(completions.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn stop_at_the_auto_stop_deadline_finalizes_once() {
    let backend = FakeBackend::new();
    let recorded = backend.recorded.clone();
    let controller = controller_with(host(backend));
    let mut completions = controller.completions();
    controller
        .start(ConfigureOptions::default().max_duration_ms(1500))
        .await
        .unwrap();

    // Land exactly on the deadline, then stop while the timer fires.
    tokio::time::advance(Duration::from_millis(1500)).await;
    let (stopped, completed) = tokio::join!(controller.stop(), completions.recv());
    let completed = completed.unwrap();
    if let Some(artifact) = stopped.unwrap() {
        assert_eq!(artifact.url, completed.url);
    }

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(completions.try_recv().is_err());
    assert_eq!(recorded.finished.load(Ordering::SeqCst), 1);
    assert!(!controller.is_recording());
}

#[tokio::test(start_paused = true)]
async fn short_limits_are_raised_to_one_second() {
    let controller = controller_with(host(FakeBackend::new()));
    let mut completions = controller.completions();
    controller
        .start(ConfigureOptions::default().max_duration_ms(10))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(controller.is_recording());
    let artifact = completions.recv().await.unwrap();
    assert!(artifact.duration_ms >= 1000.0);
}

#[tokio::test(start_paused = true)]
async fn explicit_stop_cancels_auto_stop() {
    let controller = controller_with(host(FakeBackend::new()));
    let mut completions = controller.completions();
    controller
        .start(ConfigureOptions::default().max_duration_ms(2000))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    controller.stop().await.unwrap().unwrap();
    assert!(completions.recv().await.is_ok());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(completions.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn no_layers_is_rejected() {
    let empty = Arc::new(StaticLayers {
        base: None,
        overlays: vec![],
    });
    let host = HostCapabilities::new(empty, Arc::new(FakeBackend::new()));
    let controller = controller_with(host);
    let err = controller.start(ConfigureOptions::default()).await.unwrap_err();
    assert!(matches!(err, VizrecError::NoLayers));
    assert!(!controller.is_recording());
}

#[tokio::test(start_paused = true)]
async fn mandated_audio_requires_a_live_graph() {
    let policy = Arc::new(Policy {
        explicit: Some(true),
        kind: AudioSourceKind::Local,
    });
    let controller = controller_with(host(FakeBackend::new()).with_audio_policy(policy));
    let err = controller.start(ConfigureOptions::default()).await.unwrap_err();
    assert!(matches!(err, VizrecError::AudioGraphUnavailable));

    // Without a mandate a missing graph only downgrades to video.
    let controller = controller_with(host(FakeBackend::new()));
    assert!(controller.start(ConfigureOptions::default()).await.unwrap());
    let artifact = controller.stop().await.unwrap().unwrap();
    assert!(!artifact.audio_included);
}

#[tokio::test(start_paused = true)]
async fn live_graph_is_tapped_and_released() {
    let backend = FakeBackend::new();
    let recorded = backend.recorded.clone();
    let graph = Arc::new(FakeGraph::live());
    let track = graph.track.clone();
    let controller = controller_with(host(backend).with_audio_graph(graph));

    controller.start(ConfigureOptions::default()).await.unwrap();
    assert!(track.is_live());
    let artifact = controller.stop().await.unwrap().unwrap();

    assert!(artifact.audio_included);
    assert!(!track.is_live());
    assert_eq!(recorded.audio_tracks.load(Ordering::SeqCst), 1);
    assert_eq!(recorded.sample_streams.load(Ordering::SeqCst), 1);
    let params = recorded.params.lock().unwrap();
    assert_eq!(params[0].audio_bits_per_second, Some(64_000));
}

#[tokio::test(start_paused = true)]
async fn gated_audio_without_entitlement_records_video_only() {
    let backend = FakeBackend::new();
    let recorded = backend.recorded.clone();
    let policy = Arc::new(Policy {
        explicit: None,
        kind: AudioSourceKind::Gated {
            provider: "streaming".to_string(),
        },
    });
    let host = host(backend)
        .with_audio_graph(Arc::new(FakeGraph::live()))
        .with_audio_policy(policy);
    let controller = controller_with(host);

    controller.start(ConfigureOptions::default()).await.unwrap();
    let artifact = controller.stop().await.unwrap().unwrap();

    assert!(!artifact.audio_included);
    assert_eq!(recorded.audio_tracks.load(Ordering::SeqCst), 0);
    assert_eq!(recorded.params.lock().unwrap()[0].audio_bits_per_second, None);
}

#[tokio::test(start_paused = true)]
async fn configured_file_name_is_sanitized() {
    let controller = controller_with(host(FakeBackend::new()));
    controller
        .start(ConfigureOptions::default().file_name("My Export!!"))
        .await
        .unwrap();
    let artifact = controller.stop().await.unwrap().unwrap();
    assert_eq!(artifact.file_name, "My_Export.webm");
}

#[tokio::test(start_paused = true)]
async fn unsupported_candidates_fall_back_to_container() {
    let mut backend = FakeBackend::new();
    backend.supported = vec!["video/webm".to_string()];
    let recorded = backend.recorded.clone();
    let controller = controller_with(host(backend));

    controller.start(ConfigureOptions::default()).await.unwrap();
    let artifact = controller.stop().await.unwrap().unwrap();
    assert_eq!(artifact.mime_type, "video/webm");
    assert_eq!(recorded.params.lock().unwrap()[0].mime_type, "video/webm");
}

#[tokio::test(start_paused = true)]
async fn observers_see_start_then_stop() {
    let observers = Arc::new(ObserverRegistry::new());
    let mut events = observers.subscribe();
    let controller = controller_with(host(FakeBackend::new()).with_observers(observers));

    controller.start(ConfigureOptions::default()).await.unwrap();
    controller.stop().await.unwrap();

    assert_eq!(
        events.recv().await.unwrap(),
        RecordingStateEvent {
            is_recording: true,
            session_id: 1
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        RecordingStateEvent {
            is_recording: false,
            session_id: 1
        }
    );
}

#[tokio::test(start_paused = true)]
async fn sessions_get_fresh_ids() {
    let controller = controller_with(host(FakeBackend::new()));
    controller.start(ConfigureOptions::default()).await.unwrap();
    let first = controller.stop().await.unwrap().unwrap();
    controller.start(ConfigureOptions::default()).await.unwrap();
    let second = controller.stop().await.unwrap().unwrap();
    assert_ne!(first.url, second.url);
}
