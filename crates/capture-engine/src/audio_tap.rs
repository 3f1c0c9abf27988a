//! Parallel audio branch from the host's audio graph.
//!
//! The tap never disturbs the graph's existing routing: it adds one extra
//! output and hands back a capturable track.

use std::sync::Arc;

use tokio::sync::mpsc;
use vizrec_common::VizrecResult;

/// Node of the host graph a tap can hang off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TapPoint {
    /// Output of the conditioning stage (gain, limiter).
    Conditioning,
    /// Raw source before conditioning.
    Source,
}

impl TapPoint {
    /// Tap points in order of preference.
    pub const PREFERENCE: [TapPoint; 2] = [TapPoint::Conditioning, TapPoint::Source];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conditioning => "conditioning",
            Self::Source => "source",
        }
    }
}

/// Sample layout of a track's PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

/// Interleaved `f32` sample buffers in the track's [`AudioFormat`].
pub type AudioSamples = mpsc::Receiver<Vec<f32>>;

/// A capturable audio track produced by a tap.
pub trait AudioTrack: Send + Sync {
    fn label(&self) -> &str;

    fn format(&self) -> AudioFormat;

    /// Hand over the PCM stream. Returns `Some` at most once; the stream
    /// ends when the tap is stopped.
    fn take_samples(&self) -> Option<AudioSamples>;

    /// Disconnect the tap. Must be safe to call more than once.
    fn stop(&self);

    fn is_live(&self) -> bool;
}

/// The host's live audio graph.
pub trait AudioGraph: Send + Sync {
    /// Whether the graph has been initialized and is running.
    fn is_live(&self) -> bool;

    fn has_node(&self, point: TapPoint) -> bool;

    /// Connect a parallel output at `point`.
    fn connect_tap(&self, point: TapPoint) -> VizrecResult<Arc<dyn AudioTrack>>;
}

/// Wires a tap using the first tap point that works.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioTapAdapter;

impl AudioTapAdapter {
    /// Tap `graph`. Failures are logged; `None` means record without audio.
    pub fn tap(&self, graph: &dyn AudioGraph) -> Option<Arc<dyn AudioTrack>> {
        if !graph.is_live() {
            tracing::warn!("Audio graph not live; recording without audio");
            return None;
        }

        for point in TapPoint::PREFERENCE {
            if !graph.has_node(point) {
                tracing::debug!(point = point.as_str(), "Tap point unavailable");
                continue;
            }
            match graph.connect_tap(point) {
                Ok(track) => {
                    let format = track.format();
                    tracing::info!(
                        point = point.as_str(),
                        track = track.label(),
                        sample_rate = format.sample_rate,
                        channels = format.channels,
                        "Audio tap connected"
                    );
                    return Some(track);
                }
                Err(e) => {
                    tracing::warn!(point = point.as_str(), error = %e, "Audio tap failed");
                }
            }
        }

        tracing::warn!("No audio tap point could be connected; recording without audio");
        None
    }
}
