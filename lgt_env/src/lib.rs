//! LGT Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam between the tracking engine in
//! `lgt_core` and the outside world: where frames come from, and how raw
//! pixels get converted between colour spaces. Neither concern is specified
//! beyond its interface here - a production camera/file/video backend, and
//! a production-quality colour-space conversion routine, are both external
//! collaborators that an embedder supplies.
//!
//! # Core Concept
//!
//! `lgt_core`'s tracker is generic over nothing at its public boundary -
//! it is handed fully-formed `Image` views built from a [`RawFrame`]. The
//! traits here exist so that the *source* of those frames (disk, camera,
//! or - for tests and the scenario harness - an in-memory sequence) and
//! the *colour conversion* routine are swappable without touching the
//! tracking engine.
//!
//! # Example
//!
//! ```ignore
//! use lgt_env::{FrameSource, MemorySource};
//!
//! let mut source = MemorySource::new(frames);
//! while let Some(frame) = source.capture() {
//!     tracker.update(&frame);
//! }
//! ```

mod error;
mod frame;
mod optical_flow;

pub use error::EnvError;
pub use frame::{ColorConverter, FrameSource, MemorySource, RawFrame, StandardColorConverter};
pub use optical_flow::{BlockMatchFlow, OpticalFlow};
