//! Deterministic scenario harness for the tracking engine.
//!
//! This crate drives an `lgt_core::Tracker` through synthetic frame
//! sequences and checks the literal pass/fail criteria of each scenario,
//! the way a test harness would exercise a tracker against recorded
//! ground truth.

pub mod exporter;
pub mod runner;
pub mod scenarios;

pub use exporter::SimExport;
pub use runner::{FrameRecord, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
