//! vizrec Render Engine
//!
//! Flattens a live, layered visualizer into fixed-size frames for the
//! encoder.
//!
//! # Frame Pipeline
//!
//! ```text
//! LayerSource ──┐
//!               ├── LayerCollector (rank by z-index, resolve style)
//! StyleSampler ─┘         │
//!                         ▼
//!              FrameCompositor::tick  (throttled to preset fps)
//!                         │
//!        clear black ─────┤
//!        letterbox rect ──┤  per layer: opacity, blend, filter
//!                         │
//!                         ├── Watermark
//!                         ▼
//!                 RenderContext (CpuCanvas)
//!                         │
//!                         ▼
//!                   RGBA frame bytes
//! ```

pub mod blend;
pub mod canvas;
pub mod compositor;
pub mod cpu;
pub mod filter;
pub mod layer;
pub mod text;
pub mod watermark;

pub use blend::BlendMode;
pub use canvas::{FontSpec, Rect, RenderContext, RenderError, Rgba};
pub use compositor::*;
pub use cpu::CpuCanvas;
pub use filter::{FilterChain, FilterFn, FilterParseError};
pub use layer::*;
pub use watermark::*;
