//! The compositor task driven by the display-refresh clock.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use vizrec_render_engine::{CompositorStats, CpuCanvas, FrameCompositor, RenderContext};

use crate::encoder::{VideoFrame, VideoSink};
use crate::host::FrameTicker;

/// Handle to a running frame clock.
#[derive(Debug)]
pub struct FrameClockHandle {
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<CompositorStats>>,
}

/// Spawn the compositor loop. Each accepted tick pushes one frame into
/// `sink`. The loop ends when canceled, when the ticker stops, or when the
/// encoder side goes away.
///
/// Composition runs on the blocking pool; the async task only waits on the
/// refresh clock and hands frames to the sink.
pub fn spawn_frame_clock(
    compositor: FrameCompositor<CpuCanvas>,
    mut ticker: Box<dyn FrameTicker>,
    sink: VideoSink,
) -> FrameClockHandle {
    let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let mut compositor = Some(compositor);
        let mut stats = CompositorStats::default();
        let mut first_tick: Option<f64> = None;
        loop {
            tokio::select! {
                biased;
                _ = &mut cancel_rx => break,
                tick = ticker.next_frame() => {
                    let Some(now_ms) = tick else {
                        tracing::debug!("Refresh clock ended");
                        break;
                    };
                    let Some(current) = compositor.take() else {
                        break;
                    };
                    let composed = tokio::task::spawn_blocking(move || compose(current, now_ms));
                    let (returned, rendered) = match composed.await {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::warn!(error = %e, "Frame composition failed");
                            break;
                        }
                    };
                    stats = returned.stats();
                    compositor = Some(returned);
                    let Some((width, height, data)) = rendered else {
                        continue;
                    };
                    let origin = *first_tick.get_or_insert(now_ms);
                    let frame = VideoFrame {
                        pts_ms: now_ms - origin,
                        width,
                        height,
                        data,
                    };
                    if !sink.push(frame) {
                        tracing::debug!("Video branch closed; stopping frame clock");
                        break;
                    }
                }
            }
        }
        tracing::debug!(
            frames = stats.frames,
            skipped_ticks = stats.skipped_ticks,
            layer_failures = stats.layer_failures,
            dropped_frames = sink.dropped_frames(),
            "Frame clock stopped"
        );
        stats
    });
    FrameClockHandle {
        cancel: Some(cancel_tx),
        task: Some(task),
    }
}

type Rendered = (u32, u32, Arc<[u8]>);

/// Offer `now_ms` to the compositor, snapshotting the canvas when the tick
/// produced a frame.
fn compose(
    mut compositor: FrameCompositor<CpuCanvas>,
    now_ms: f64,
) -> (FrameCompositor<CpuCanvas>, Option<Rendered>) {
    let rendered = compositor.tick(now_ms).then(|| {
        let (width, height) = compositor.target().dimensions();
        (width, height, Arc::from(compositor.target().as_raw()))
    });
    (compositor, rendered)
}

impl FrameClockHandle {
    /// Request the loop to stop. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    /// Cancel and wait for the loop to exit, releasing its frame sink.
    pub async fn join(&mut self) -> CompositorStats {
        self.cancel();
        match self.task.take() {
            Some(task) => task.await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Frame clock task failed");
                CompositorStats::default()
            }),
            None => CompositorStats::default(),
        }
    }
}

impl Drop for FrameClockHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
