//! Scenario runner - drives a [`lgt_core::Tracker`] through a generated
//! frame sequence and checks the literal per-scenario assertions.

use std::sync::Arc;

use lgt_core::image::Image;
use lgt_core::{Rect, Tracker, TrackerConfig};
use tracing::{debug, info, warn};

use crate::scenarios::{self, ScenarioId};

/// Per-frame tracker output, recorded for export and post-hoc inspection.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct FrameRecord {
    pub frame: usize,
    pub is_tracking: bool,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Result of running one scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub scenario: ScenarioId,
    pub seed: u64,
    pub passed: bool,
    pub failure_reason: Option<String>,
    pub frames: Vec<FrameRecord>,
}

/// Runs the deterministic tracking scenarios.
pub struct ScenarioRunner {
    seed: u64,
}

impl ScenarioRunner {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Runs `scenario` and returns its result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("running scenario {} (seed={})", scenario.name(), self.seed);
        match scenario {
            ScenarioId::Stationary => self.run_stationary(),
            ScenarioId::ConstantVelocity => self.run_constant_velocity(),
            ScenarioId::OcclusionRecovery => self.run_occlusion_recovery(),
            ScenarioId::SeedReproducibility => self.run_seed_reproducibility(),
            ScenarioId::EmptyPatchPool => self.run_empty_patch_pool(),
            ScenarioId::ConfigRoundTrip => self.run_config_round_trip(),
        }
    }

    /// Drives `tracker` through `frames`, starting with `initialize`, and
    /// records each frame's region.
    fn drive(tracker: &mut Tracker, frames: &[lgt_env::RawFrame], initial_region: Rect) -> Vec<FrameRecord> {
        let converter = scenarios::color_converter();
        let mut records = Vec::with_capacity(frames.len());
        for (i, raw) in frames.iter().enumerate() {
            let image = Image::new(raw.clone(), converter.clone() as Arc<dyn lgt_env::ColorConverter>);
            if i == 0 {
                if let Err(e) = tracker.initialize(&image, initial_region) {
                    warn!("initialize failed: {e}");
                }
            } else {
                tracker.update(&image);
            }
            let region = tracker.region();
            records.push(FrameRecord {
                frame: i,
                is_tracking: tracker.is_tracking(),
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
            });
        }
        records
    }

    fn run_stationary(&self) -> ScenarioResult {
        let scenario = scenarios::build(ScenarioId::Stationary);
        let cfg = scenarios::config_for(ScenarioId::Stationary);
        let mut tracker = Tracker::new(cfg, self.seed);
        let frames = Self::drive(&mut tracker, &scenario.frames, scenario.initial_region);

        let last = frames.last().unwrap();
        let cx = last.x + last.width / 2.0;
        let cy = last.y + last.height / 2.0;
        let target_center = (160.0, 120.0);
        let drift = ((cx - target_center.0).powi(2) + (cy - target_center.1).powi(2)).sqrt();
        let passed = last.is_tracking && drift < 4.0;

        ScenarioResult {
            scenario: ScenarioId::Stationary,
            seed: self.seed,
            passed,
            failure_reason: (!passed).then(|| format!("centre drifted {drift:.1}px from {target_center:?}")),
            frames,
        }
    }

    fn run_constant_velocity(&self) -> ScenarioResult {
        let scenario = scenarios::build(ScenarioId::ConstantVelocity);
        let cfg = scenarios::config_for(ScenarioId::ConstantVelocity);
        let mut tracker = Tracker::new(cfg, self.seed);
        let frames = Self::drive(&mut tracker, &scenario.frames, scenario.initial_region);

        let last = frames.last().unwrap();
        let cx = last.x + last.width / 2.0;
        let cy = last.y + last.height / 2.0;
        // Generator moves the corner by (2, 1) px/frame over 50 frames
        // starting at (50, 50, 40, 40); the true final centre is the initial
        // centre (70, 70) plus 49 steps of that velocity.
        let target_center = (70.0 + 2.0 * 49.0, 70.0 + 49.0);
        let drift = ((cx - target_center.0).powi(2) + (cy - target_center.1).powi(2)).sqrt();
        let passed = last.is_tracking && drift < 6.0;

        ScenarioResult {
            scenario: ScenarioId::ConstantVelocity,
            seed: self.seed,
            passed,
            failure_reason: (!passed).then(|| format!("centre drifted {drift:.1}px from {target_center:?}")),
            frames,
        }
    }

    fn run_occlusion_recovery(&self) -> ScenarioResult {
        let scenario = scenarios::build(ScenarioId::OcclusionRecovery);
        let cfg = scenarios::config_for(ScenarioId::OcclusionRecovery);
        let mut tracker = Tracker::new(cfg, self.seed);
        let frames = Self::drive(&mut tracker, &scenario.frames, scenario.initial_region);

        let went_untracked_too_early = frames[..12].iter().any(|r| !r.is_tracking);
        let recovered = frames[15..].iter().take(3).any(|r| r.is_tracking);
        let passed = !went_untracked_too_early && recovered;

        let reason = if went_untracked_too_early {
            Some("lost the target before frame 12".to_string())
        } else if !recovered {
            Some("did not recover tracking within 3 frames of reappearance".to_string())
        } else {
            None
        };

        ScenarioResult {
            scenario: ScenarioId::OcclusionRecovery,
            seed: self.seed,
            passed,
            failure_reason: reason,
            frames,
        }
    }

    fn run_seed_reproducibility(&self) -> ScenarioResult {
        let scenario = scenarios::build(ScenarioId::SeedReproducibility);
        let cfg = scenarios::config_for(ScenarioId::SeedReproducibility);

        let mut same_a = Tracker::new(cfg.clone(), self.seed);
        let mut same_b = Tracker::new(cfg.clone(), self.seed);
        let frames_a = Self::drive(&mut same_a, &scenario.frames, scenario.initial_region);
        let frames_b = Self::drive(&mut same_b, &scenario.frames, scenario.initial_region);
        let identical = frames_a
            .iter()
            .zip(frames_b.iter())
            .all(|(a, b)| a.x == b.x && a.y == b.y && a.width == b.width && a.height == b.height);

        let mut different_seed = Tracker::new(cfg, self.seed.wrapping_add(1));
        let frames_c = Self::drive(&mut different_seed, &scenario.frames, scenario.initial_region);
        let diverges = frames_a
            .iter()
            .zip(frames_c.iter())
            .any(|(a, c)| a.x != c.x || a.y != c.y);

        let passed = identical && diverges;
        let reason = if !identical {
            Some("same seed produced different trajectories".to_string())
        } else if !diverges {
            Some("different seeds produced identical trajectories".to_string())
        } else {
            None
        };

        ScenarioResult {
            scenario: ScenarioId::SeedReproducibility,
            seed: self.seed,
            passed,
            failure_reason: reason,
            frames: frames_a,
        }
    }

    fn run_empty_patch_pool(&self) -> ScenarioResult {
        let scenario = scenarios::build(ScenarioId::EmptyPatchPool);
        let cfg = scenarios::config_for(ScenarioId::EmptyPatchPool);
        let mut tracker = Tracker::new(cfg, self.seed);
        let frames = Self::drive(&mut tracker, &scenario.frames, scenario.initial_region);

        let last = frames.last().unwrap();
        let passed = !last.is_tracking && last.width == 0.0 && last.height == 0.0;

        ScenarioResult {
            scenario: ScenarioId::EmptyPatchPool,
            seed: self.seed,
            passed,
            failure_reason: (!passed).then(|| "pool did not drain to empty".to_string()),
            frames,
        }
    }

    fn run_config_round_trip(&self) -> ScenarioResult {
        let scenario = scenarios::build(ScenarioId::ConfigRoundTrip);
        let cfg = scenarios::config_for(ScenarioId::ConfigRoundTrip);

        let serialized = serde_json::to_string(&cfg).expect("default config always serializes");
        let reconstructed: TrackerConfig =
            serde_json::from_str(&serialized).expect("round-tripped config always deserializes");

        let mut original = Tracker::new(cfg, self.seed);
        let mut rebuilt = Tracker::new(reconstructed, self.seed);
        let frames_a = Self::drive(&mut original, &scenario.frames, scenario.initial_region);
        let frames_b = Self::drive(&mut rebuilt, &scenario.frames, scenario.initial_region);

        let identical = frames_a
            .iter()
            .zip(frames_b.iter())
            .all(|(a, b)| a.x == b.x && a.y == b.y && a.width == b.width && a.height == b.height);

        debug!("config round trip produced {} matching frames", frames_a.len());

        ScenarioResult {
            scenario: ScenarioId::ConfigRoundTrip,
            seed: self.seed,
            passed: identical,
            failure_reason: (!identical).then(|| "round-tripped config changed behaviour".to_string()),
            frames: frames_a,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stationary_scenario_passes() {
        let result = ScenarioRunner::new(7).run(ScenarioId::Stationary);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn constant_velocity_scenario_passes() {
        let result = ScenarioRunner::new(5).run(ScenarioId::ConstantVelocity);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn occlusion_recovery_scenario_passes() {
        let result = ScenarioRunner::new(13).run(ScenarioId::OcclusionRecovery);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn empty_patch_pool_scenario_passes() {
        let result = ScenarioRunner::new(3).run(ScenarioId::EmptyPatchPool);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn seed_reproducibility_scenario_passes() {
        let result = ScenarioRunner::new(99).run(ScenarioId::SeedReproducibility);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn config_round_trip_scenario_passes() {
        let result = ScenarioRunner::new(11).run(ScenarioId::ConfigRoundTrip);
        assert!(result.passed, "{:?}", result.failure_reason);
    }
}
