//! vizrec Recording Model
//!
//! Defines the data contracts shared by the compositor and the recording
//! controller:
//! - **Presets:** Target resolution, frame rate, candidate encodings, bitrates
//! - **Session:** Mutable session configuration and the frozen start snapshot
//! - **Artifact:** The finalized, caller-facing output of a session
//!
//! Presets are never mutated in place; the session configuration holds its
//! own copy so frame-rate overrides cannot leak back into the table.

pub mod artifact;
pub mod preset;
pub mod session;

pub use artifact::*;
pub use preset::*;
pub use session::*;
