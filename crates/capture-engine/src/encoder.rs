//! Encoder contract and encoding negotiation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use vizrec_common::VizrecResult;

use crate::audio_tap::AudioTrack;

/// Encoding tried when no preset candidate is supported.
pub const BASELINE_MIME: &str = "video/webm;codecs=vp8,opus";

/// Container-only encoding used as the last resort.
pub const FALLBACK_MIME: &str = "video/webm";

/// Frames buffered between the compositor and the encoder before new
/// frames are dropped.
pub const VIDEO_BRANCH_CAPACITY: usize = 8;

/// Pick the first encoding `backend` supports.
pub fn negotiate_encoding(backend: &dyn EncoderBackend, candidates: &[String]) -> String {
    if let Some(found) = candidates.iter().find(|c| backend.is_type_supported(c)) {
        return found.clone();
    }
    if backend.is_type_supported(BASELINE_MIME) {
        tracing::warn!(?candidates, fallback = BASELINE_MIME, "No preset encoding supported");
        return BASELINE_MIME.to_string();
    }
    tracing::warn!(
        ?candidates,
        fallback = FALLBACK_MIME,
        "Baseline encoding unsupported; using container default"
    );
    FALLBACK_MIME.to_string()
}

/// One composited frame, tightly packed RGBA.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Milliseconds since the first frame of the session.
    pub pts_ms: f64,
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
}

/// Encoder output, in generation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub data: Vec<u8>,
}

impl EncodedChunk {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Producer half of the video branch, fed by the frame clock.
#[derive(Debug)]
pub struct VideoSink {
    tx: mpsc::Sender<VideoFrame>,
    live: Arc<AtomicBool>,
    dropped: AtomicU64,
}

/// Consumer half of the video branch, read by the encoder.
#[derive(Debug)]
pub struct VideoStream {
    rx: mpsc::Receiver<VideoFrame>,
    live: Arc<AtomicBool>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Create a bounded video branch. When the encoder falls behind, new
/// frames are dropped rather than queued.
pub fn video_branch(width: u32, height: u32, fps: u32) -> (VideoSink, VideoStream) {
    let (tx, rx) = mpsc::channel(VIDEO_BRANCH_CAPACITY);
    let live = Arc::new(AtomicBool::new(true));
    (
        VideoSink {
            tx,
            live: Arc::clone(&live),
            dropped: AtomicU64::new(0),
        },
        VideoStream {
            rx,
            live,
            width,
            height,
            fps,
        },
    )
}

impl VideoSink {
    /// Offer a frame. Returns false once the consumer is gone.
    pub fn push(&self, frame: VideoFrame) -> bool {
        if !self.is_live() {
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(dropped, "Encoder behind; frame dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Shared liveness flag, cleared when the branch is released.
    pub fn live_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.live)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl VideoStream {
    /// Next frame, or `None` once the producer has stopped.
    pub async fn recv(&mut self) -> Option<VideoFrame> {
        self.rx.recv().await
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Places timestamped frames on a constant-rate output timeline.
///
/// Frame `n` of the output covers `[n, n + 1) / fps` seconds. A frame lands
/// in the slot nearest its timestamp; empty slots before it are filled by
/// repeating it, and a frame whose slot is already taken is dropped.
#[derive(Debug, Clone)]
pub struct FramePacer {
    fps: f64,
    next_slot: u64,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        Self {
            fps: f64::from(fps.max(1)),
            next_slot: 0,
        }
    }

    /// How many times a frame at `pts_ms` must be written. Zero means the
    /// frame runs ahead of the timeline and is skipped.
    pub fn slots_for(&mut self, pts_ms: f64) -> u64 {
        let target = (pts_ms.max(0.0) * self.fps / 1000.0).round() as u64;
        if target < self.next_slot {
            return 0;
        }
        let slots = target - self.next_slot + 1;
        self.next_slot = target + 1;
        slots
    }

    /// Slots filled so far.
    pub fn slots_written(&self) -> u64 {
        self.next_slot
    }

    /// Output duration covered so far, in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.next_slot as f64 * 1000.0 / self.fps
    }
}

/// Parameters for a new encoder session.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderParams {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bits_per_second: u64,
    /// Set only when an audio track is supplied.
    pub audio_bits_per_second: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Inactive,
    Recording,
    Stopped,
}

/// Factory for encoder sessions.
pub trait EncoderBackend: Send + Sync {
    fn name(&self) -> &str;

    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Create a session that reads `video` (and `audio` when given) and
    /// emits encoded chunks on `chunks` in order. The session owns the
    /// sender; dropping it signals the end of output.
    fn create_session(
        &self,
        params: EncoderParams,
        video: VideoStream,
        audio: Option<Arc<dyn AudioTrack>>,
        chunks: mpsc::UnboundedSender<EncodedChunk>,
    ) -> VizrecResult<Box<dyn EncoderSession>>;
}

#[async_trait::async_trait]
pub trait EncoderSession: Send {
    /// Begin encoding, flushing a chunk every `timeslice`.
    fn start(&mut self, timeslice: Duration) -> VizrecResult<()>;

    fn state(&self) -> EncoderState;

    /// Encoding actually produced, when the encoder reports one.
    fn mime_type(&self) -> Option<String>;

    /// Whether the output carries an audio track.
    fn has_audio(&self) -> bool;

    /// Flush remaining output and release the chunk sender.
    async fn finish(&mut self) -> VizrecResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Supports(&'static [&'static str]);

    impl EncoderBackend for Supports {
        fn name(&self) -> &str {
            "supports"
        }
        fn is_type_supported(&self, mime_type: &str) -> bool {
            self.0.iter().any(|m| *m == mime_type)
        }
        fn create_session(
            &self,
            _params: EncoderParams,
            _video: VideoStream,
            _audio: Option<Arc<dyn AudioTrack>>,
            _chunks: mpsc::UnboundedSender<EncodedChunk>,
        ) -> VizrecResult<Box<dyn EncoderSession>> {
            Err(vizrec_common::VizrecError::unsupported("test backend"))
        }
    }

    fn candidates() -> Vec<String> {
        vec![
            "video/mp4;codecs=avc1.42E01E,mp4a.40.2".to_string(),
            "video/webm;codecs=vp9,opus".to_string(),
        ]
    }

    #[test]
    fn first_supported_candidate_wins() {
        let backend = Supports(&["video/webm;codecs=vp9,opus", BASELINE_MIME]);
        assert_eq!(negotiate_encoding(&backend, &candidates()), "video/webm;codecs=vp9,opus");
    }

    #[test]
    fn baseline_then_container_fallback() {
        assert_eq!(negotiate_encoding(&Supports(&[BASELINE_MIME]), &candidates()), BASELINE_MIME);
        assert_eq!(negotiate_encoding(&Supports(&[]), &candidates()), FALLBACK_MIME);
    }

    fn frame() -> VideoFrame {
        VideoFrame {
            pts_ms: 0.0,
            width: 1,
            height: 1,
            data: Arc::from(vec![0u8; 4]),
        }
    }

    #[tokio::test]
    async fn full_branch_drops_instead_of_blocking() {
        let (sink, mut stream) = video_branch(1, 1, 30);
        for _ in 0..VIDEO_BRANCH_CAPACITY + 3 {
            assert!(sink.push(frame()));
        }
        assert_eq!(sink.dropped_frames(), 3);
        drop(sink);
        let mut received = 0;
        while stream.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, VIDEO_BRANCH_CAPACITY);
    }

    #[test]
    fn pacer_repeats_into_gaps_and_skips_early_frames() {
        let mut pacer = FramePacer::new(30);
        assert_eq!(pacer.slots_for(0.0), 1);
        // Slots at 33 ms and 67 ms were missed; this frame fills them too.
        assert_eq!(pacer.slots_for(100.0), 3);
        // Slot 3 is taken already.
        assert_eq!(pacer.slots_for(105.0), 0);
        assert_eq!(pacer.slots_for(133.0), 1);
        assert_eq!(pacer.slots_written(), 5);
    }

    #[test]
    fn pacer_keeps_duration_when_frames_arrive_slower_than_fps() {
        // 30 frames/s delivered into a 45 fps output for ten seconds.
        let mut pacer = FramePacer::new(45);
        let written: u64 = (0..300)
            .map(|i| pacer.slots_for(f64::from(i) * 1000.0 / 30.0))
            .sum();
        assert_eq!(written, pacer.slots_written());
        assert!((pacer.duration_ms() - 10_000.0).abs() < 50.0, "{}", pacer.duration_ms());
    }

    #[tokio::test(start_paused = true)]
    async fn paced_refresh_ticks_match_wall_time() {
        use crate::host::{DisplayRefresh, FrameTicker, RefreshClock};
        use vizrec_common::FrameThrottle;

        let mut ticker = DisplayRefresh::new(60).ticker();
        let mut throttle = FrameThrottle::new(45);
        let mut pacer = FramePacer::new(45);
        let mut first = None;
        let mut accepted = 0;
        while let Some(now_ms) = ticker.next_frame().await {
            if now_ms > 10_000.0 {
                break;
            }
            if !throttle.accept(now_ms) {
                continue;
            }
            accepted += 1;
            let first_ms = *first.get_or_insert(now_ms);
            pacer.slots_for(now_ms - first_ms);
        }
        // The 60 Hz clock only yields 30 frames/s at 45 fps.
        assert!(accepted <= 301, "{accepted}");
        assert!((pacer.duration_ms() - 10_000.0).abs() < 50.0, "{}", pacer.duration_ms());
    }

    #[test]
    fn push_fails_after_consumer_dropped_or_released() {
        let (sink, stream) = video_branch(1, 1, 30);
        sink.live_flag().store(false, Ordering::SeqCst);
        assert!(!stream.is_live());
        assert!(!sink.push(frame()));

        let (sink, stream) = video_branch(1, 1, 30);
        drop(stream);
        assert!(!sink.push(frame()));
    }
}
