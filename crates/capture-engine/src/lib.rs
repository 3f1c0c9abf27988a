//! vizrec Capture Engine
//!
//! Records the composited visualizer stage into a single downloadable
//! artifact. A session wires the host's layers through the compositor,
//! taps the host audio graph, and streams both into an encoder backend.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 RecordingController                  │
//! │                                                      │
//! │  RefreshClock ──▶ FrameCompositor ──▶ VideoSink ──┐  │
//! │                    (render-engine)                │  │
//! │                                                   ▼  │
//! │  AudioGraph ──▶ AudioTapAdapter ──────────▶ EncoderSession
//! │                                                   │  │
//! │                     EncodedChunk stream ◀─────────┘  │
//! │                            │                         │
//! │                            ▼                         │
//! │                finalize ──▶ ResultArtifact           │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod audio_tap;
pub mod encoder;
pub mod ffmpeg;
pub mod finalize;
pub mod frame_clock;
pub mod host;
pub mod session;

pub use audio_tap::{
    AudioFormat, AudioGraph, AudioSamples, AudioTapAdapter, AudioTrack, TapPoint,
};
pub use encoder::{
    negotiate_encoding, video_branch, EncodedChunk, EncoderBackend, EncoderParams, EncoderSession,
    EncoderState, FramePacer, VideoFrame, VideoSink, VideoStream, BASELINE_MIME, FALLBACK_MIME,
};
pub use ffmpeg::{EncodePlan, FfmpegCapabilities, FfmpegEncoderBackend, DEFAULT_AUDIO_BITRATE};
pub use finalize::{resolve_file_name, sanitize_file_name};
pub use frame_clock::{spawn_frame_clock, FrameClockHandle};
pub use host::*;
pub use session::*;
