//! LGT - Local-Global Tracker
//!
//! A single-target visual object tracker. Given a video frame and an
//! initial bounding box, it follows the object through subsequent frames by
//! re-optimising a dynamic constellation of local appearance patches each
//! frame against their individual visual models and a geometric prior
//! derived from their mutual layout, with a multi-modal probability map
//! (colour, shape, motion, bounding box) driving patch addition.

pub mod config;
pub mod error;
pub mod geometry;
pub mod image;
pub mod kalman;
pub mod modalities;
pub mod observer;
pub mod optimization;
pub mod patch;
pub mod patchset;
pub mod prng;
pub mod tracker;

pub use config::{ModalityKind, SizeBounds, TrackerConfig};
pub use error::TrackerError;
pub use geometry::{Point2f, Rect};
pub use observer::{Observer, OptimizationStatus, PatchSetSnapshot, ReweightEvent, Stage};
pub use patch::{Patch, PatchKind};
pub use patchset::Patches;
pub use tracker::Tracker;
