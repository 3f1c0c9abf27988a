//! Capabilities the embedding host provides to the recorder.
//!
//! Nothing here is global: a host builds one [`HostCapabilities`] and hands
//! it to the controller.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use vizrec_render_engine::{InlineStyleSampler, LayerSource, StyleSampler};

use crate::audio_tap::AudioGraph;
use crate::encoder::EncoderBackend;

/// Where the host's audio comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AudioSourceKind {
    /// Audio the user owns (file, microphone, line in).
    #[default]
    Local,
    /// A third-party provider whose audio may only be recorded under a
    /// paid entitlement.
    Gated { provider: String },
}

/// Inputs to the audio inclusion decision.
pub trait AudioInclusionPolicy: Send + Sync {
    /// `Some` when the host has decided explicitly; this always wins.
    fn explicit_audio_decision(&self) -> Option<bool> {
        None
    }

    fn audio_source_kind(&self) -> AudioSourceKind {
        AudioSourceKind::Local
    }

    fn has_paid_entitlement(&self) -> bool {
        false
    }
}

/// Policy with no explicit decision and a local source.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAudioPolicy;

impl AudioInclusionPolicy for DefaultAudioPolicy {}

/// Whether the session should try to record audio.
pub fn should_include_audio(policy: &dyn AudioInclusionPolicy) -> bool {
    if let Some(decision) = policy.explicit_audio_decision() {
        return decision;
    }
    match policy.audio_source_kind() {
        AudioSourceKind::Gated { provider } => {
            let entitled = policy.has_paid_entitlement();
            if !entitled {
                tracing::info!(
                    provider = %provider,
                    "Gated audio source without entitlement; recording video only"
                );
            }
            entitled
        }
        AudioSourceKind::Local => true,
    }
}

/// Recording state change, published on start and stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordingStateEvent {
    pub is_recording: bool,
    pub session_id: u64,
}

/// Callback-style listener for state changes.
pub trait RecordingObserver: Send + Sync {
    fn on_recording_state(&self, event: &RecordingStateEvent) -> anyhow::Result<()>;
}

/// Fan-out of recording state events. Listener failures never reach the
/// recorder.
pub struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn RecordingObserver>>>,
    events: broadcast::Sender<RecordingStateEvent>,
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            observers: RwLock::new(Vec::new()),
            events,
        }
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn RecordingObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingStateEvent> {
        self.events.subscribe()
    }

    /// Deliver `event` to every observer and subscriber.
    pub fn notify(&self, event: RecordingStateEvent) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            match catch_unwind(AssertUnwindSafe(|| observer.on_recording_state(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Recording observer failed"),
                Err(_) => tracing::warn!("Recording observer panicked"),
            }
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Source of display-refresh timestamps.
#[async_trait::async_trait]
pub trait FrameTicker: Send {
    /// Wait for the next refresh. Returns its timestamp in milliseconds,
    /// or `None` when the clock has shut down.
    async fn next_frame(&mut self) -> Option<f64>;
}

pub trait RefreshClock: Send + Sync {
    fn ticker(&self) -> Box<dyn FrameTicker>;
}

/// Fixed-rate refresh clock emulating a display at `hz`.
#[derive(Debug, Clone, Copy)]
pub struct DisplayRefresh {
    hz: u32,
}

impl DisplayRefresh {
    pub fn new(hz: u32) -> Self {
        Self { hz: hz.max(1) }
    }

    pub fn hz(&self) -> u32 {
        self.hz
    }
}

impl Default for DisplayRefresh {
    fn default() -> Self {
        Self::new(60)
    }
}

struct IntervalTicker {
    interval: tokio::time::Interval,
    epoch: Instant,
}

#[async_trait::async_trait]
impl FrameTicker for IntervalTicker {
    async fn next_frame(&mut self) -> Option<f64> {
        let at = self.interval.tick().await;
        Some(at.duration_since(self.epoch).as_secs_f64() * 1000.0)
    }
}

impl RefreshClock for DisplayRefresh {
    fn ticker(&self) -> Box<dyn FrameTicker> {
        let period = Duration::from_secs_f64(1.0 / f64::from(self.hz));
        let epoch = Instant::now();
        let mut interval = tokio::time::interval_at(epoch, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Box::new(IntervalTicker { interval, epoch })
    }
}

/// Everything the recorder needs from its host.
#[derive(Clone)]
pub struct HostCapabilities {
    pub layers: Arc<dyn LayerSource>,
    pub styles: Arc<dyn StyleSampler>,
    pub audio: Option<Arc<dyn AudioGraph>>,
    pub audio_policy: Arc<dyn AudioInclusionPolicy>,
    pub refresh: Arc<dyn RefreshClock>,
    pub encoder: Arc<dyn EncoderBackend>,
    pub observers: Arc<ObserverRegistry>,
}

impl HostCapabilities {
    /// Capabilities with inline styles, no audio graph, the default audio
    /// policy and a 60 Hz refresh clock.
    pub fn new(layers: Arc<dyn LayerSource>, encoder: Arc<dyn EncoderBackend>) -> Self {
        Self {
            layers,
            styles: Arc::new(InlineStyleSampler),
            audio: None,
            audio_policy: Arc::new(DefaultAudioPolicy),
            refresh: Arc::new(DisplayRefresh::default()),
            encoder,
            observers: Arc::new(ObserverRegistry::new()),
        }
    }

    pub fn with_styles(mut self, styles: Arc<dyn StyleSampler>) -> Self {
        self.styles = styles;
        self
    }

    pub fn with_audio_graph(mut self, graph: Arc<dyn AudioGraph>) -> Self {
        self.audio = Some(graph);
        self
    }

    pub fn with_audio_policy(mut self, policy: Arc<dyn AudioInclusionPolicy>) -> Self {
        self.audio_policy = policy;
        self
    }

    pub fn with_refresh(mut self, refresh: Arc<dyn RefreshClock>) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_observers(mut self, observers: Arc<ObserverRegistry>) -> Self {
        self.observers = observers;
        self
    }
}
