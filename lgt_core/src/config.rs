//! Typed configuration surface.
//!
//! `from_map`/`to_map` perform the "key lookup" the Non-goals exclude a full
//! text-format parser for - an embedder is expected to have already turned
//! an on-disk format, environment variables, or CLI flags into a flat
//! `HashMap<String, String>` before handing it here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::TrackerError;
use crate::patch::PatchKind;

/// One of the four probability-map cues a tracker can be configured to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModalityKind {
    ColorHistogram,
    ConvexHull,
    MotionLk,
    Bounding,
}

impl ModalityKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "colorhist" => Some(Self::ColorHistogram),
            "convex" => Some(Self::ConvexHull),
            "motionlk" => Some(Self::MotionLk),
            "bounding" => Some(Self::Bounding),
            "none" => None,
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::ColorHistogram => "colorhist",
            Self::ConvexHull => "convex",
            Self::MotionLk => "motionlk",
            Self::Bounding => "bounding",
        }
    }
}

/// Size constraints on the tracked region, each bound optional.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SizeBounds {
    pub min_width: Option<f32>,
    pub min_height: Option<f32>,
    pub max_width: Option<f32>,
    pub max_height: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub tracker_name: String,

    pub sampling_size: i32,
    pub sampling_threshold: f32,
    pub sampling_mask: f32,

    pub pool_max: usize,
    pub pool_min: usize,
    pub pool_persistence: f32,
    /// `None` until computed once at `initialize` (§9 Open Question).
    pub pool_median_threshold: Option<f32>,

    pub patch_type: PatchKind,
    pub patch_scale: f32,

    pub reweight_persistence: f32,
    pub reweight_similarity: f32,
    pub reweight_distance: f32,

    pub remove_weight: f32,
    pub merge_distance: f32,

    pub optimization_geometry: f32,
    pub optimization_visual: f32,

    pub optimization_global_move: f32,
    pub optimization_global_rotate: f32,
    pub optimization_global_scale: f32,
    pub optimization_global_min_samples: usize,
    pub optimization_global_max_samples: usize,
    pub optimization_global_add_samples: usize,
    pub optimization_global_elite_samples: usize,
    pub optimization_global_iterations: usize,
    pub optimization_global_terminate: f32,
    pub optimization_global_clamp_scale: bool,

    pub optimization_local_samples: usize,
    pub optimization_local_elite_samples: usize,
    pub optimization_local_iterations: usize,
    pub optimization_local_move: f32,

    pub size: SizeBounds,

    pub modalities: Vec<ModalityKind>,

    pub color_foreground_size: f32,
    pub color_background_margin: f32,
    pub color_background_size: f32,
    /// Separate FG/BG mixing rates (`color.cpp`'s `foreground_presistence`/
    /// `background_presistence`) - the background model should adapt slower
    /// than the foreground, so the two are never tied to one factor.
    pub color_fg_persistence: f32,
    pub color_bg_persistence: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tracker_name: "lgt".to_string(),

            sampling_size: 100,
            sampling_threshold: 0.2,
            sampling_mask: 1.5,

            pool_max: 50,
            pool_min: 10,
            pool_persistence: 0.8,
            pool_median_threshold: None,

            patch_type: PatchKind::Histogram,
            patch_scale: 1.0,

            reweight_persistence: 0.5,
            reweight_similarity: 1.0,
            reweight_distance: 0.1,

            remove_weight: 0.1,
            merge_distance: 1.0,

            optimization_geometry: 1.0,
            optimization_visual: 1.0,

            optimization_global_move: 2.0,
            optimization_global_rotate: 0.1,
            optimization_global_scale: 0.1,
            optimization_global_min_samples: 20,
            optimization_global_max_samples: 200,
            optimization_global_add_samples: 20,
            optimization_global_elite_samples: 10,
            optimization_global_iterations: 10,
            optimization_global_terminate: 1e-4,
            optimization_global_clamp_scale: false,

            optimization_local_samples: 15,
            optimization_local_elite_samples: 5,
            optimization_local_iterations: 5,
            optimization_local_move: 2.0,

            size: SizeBounds::default(),

            modalities: vec![
                ModalityKind::ColorHistogram,
                ModalityKind::ConvexHull,
                ModalityKind::MotionLk,
                ModalityKind::Bounding,
            ],

            color_foreground_size: 1.5,
            color_background_margin: 5.0,
            color_background_size: 20.0,
            color_fg_persistence: 0.9,
            color_bg_persistence: 0.9,
        }
    }
}

impl TrackerConfig {
    /// Parses the recognised keys from §6's Configuration Surface table out
    /// of a flat key/value map, starting from `Default` and overriding only
    /// the keys present. Unknown keys are ignored (passed through, per spec).
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, TrackerError> {
        let mut cfg = Self::default();

        macro_rules! parse_into {
            ($key:expr, $field:expr, $ty:ty) => {
                if let Some(v) = map.get($key) {
                    $field = v
                        .parse::<$ty>()
                        .map_err(|_| TrackerError::configuration(format!("bad value for {}: {v}", $key)))?;
                }
            };
        }

        if let Some(v) = map.get("tracker") {
            cfg.tracker_name = v.clone();
        }
        parse_into!("sampling.size", cfg.sampling_size, i32);
        parse_into!("sampling.threshold", cfg.sampling_threshold, f32);
        parse_into!("sampling.mask", cfg.sampling_mask, f32);
        parse_into!("pool.max", cfg.pool_max, usize);
        parse_into!("pool.min", cfg.pool_min, usize);
        parse_into!("pool.persistence", cfg.pool_persistence, f32);
        if let Some(v) = map.get("pool.median_threshold") {
            cfg.pool_median_threshold = Some(
                v.parse::<f32>()
                    .map_err(|_| TrackerError::configuration(format!("bad value for pool.median_threshold: {v}")))?,
            );
        }
        if let Some(v) = map.get("patch.type") {
            cfg.patch_type = match v.as_str() {
                "histogram" => PatchKind::Histogram,
                "rgb" => PatchKind::Rgb,
                "hs" => PatchKind::Hs,
                "ssd" => PatchKind::Ssd,
                other => return Err(TrackerError::configuration(format!("unknown patch.type: {other}"))),
            };
        }
        parse_into!("patch.scale", cfg.patch_scale, f32);
        parse_into!("reweight.persistence", cfg.reweight_persistence, f32);
        parse_into!("reweight.similarity", cfg.reweight_similarity, f32);
        parse_into!("reweight.distance", cfg.reweight_distance, f32);
        parse_into!("remove.weight", cfg.remove_weight, f32);
        parse_into!("merge.distance", cfg.merge_distance, f32);
        parse_into!("optimization.geometry", cfg.optimization_geometry, f32);
        parse_into!("optimization.visual", cfg.optimization_visual, f32);
        parse_into!("optimization.global.move", cfg.optimization_global_move, f32);
        parse_into!("optimization.global.rotate", cfg.optimization_global_rotate, f32);
        parse_into!("optimization.global.scale", cfg.optimization_global_scale, f32);
        parse_into!(
            "optimization.global.minsamples",
            cfg.optimization_global_min_samples,
            usize
        );
        parse_into!(
            "optimization.global.maxsamples",
            cfg.optimization_global_max_samples,
            usize
        );
        parse_into!("optimization.global.add", cfg.optimization_global_add_samples, usize);
        parse_into!(
            "optimization.global.elite",
            cfg.optimization_global_elite_samples,
            usize
        );
        parse_into!(
            "optimization.global.iterations",
            cfg.optimization_global_iterations,
            usize
        );
        parse_into!("optimization.global.terminate", cfg.optimization_global_terminate, f32);
        parse_into!(
            "optimization.global.clamp_scale",
            cfg.optimization_global_clamp_scale,
            bool
        );
        parse_into!("optimization.local.samples", cfg.optimization_local_samples, usize);
        parse_into!(
            "optimization.local.elite",
            cfg.optimization_local_elite_samples,
            usize
        );
        parse_into!(
            "optimization.local.iterations",
            cfg.optimization_local_iterations,
            usize
        );
        parse_into!("optimization.local.move", cfg.optimization_local_move, f32);
        parse_into!("color.region.foreground", cfg.color_foreground_size, f32);
        parse_into!("color.region.margin", cfg.color_background_margin, f32);
        parse_into!("color.region.background", cfg.color_background_size, f32);
        parse_into!("color.persistence.foreground", cfg.color_fg_persistence, f32);
        parse_into!("color.persistence.background", cfg.color_bg_persistence, f32);
        if let Some(v) = map.get("size.min.width") {
            cfg.size.min_width = Some(
                v.parse()
                    .map_err(|_| TrackerError::configuration(format!("bad value for size.min.width: {v}")))?,
            );
        }
        if let Some(v) = map.get("size.min.height") {
            cfg.size.min_height = Some(
                v.parse()
                    .map_err(|_| TrackerError::configuration(format!("bad value for size.min.height: {v}")))?,
            );
        }
        if let Some(v) = map.get("size.max.width") {
            cfg.size.max_width = Some(
                v.parse()
                    .map_err(|_| TrackerError::configuration(format!("bad value for size.max.width: {v}")))?,
            );
        }
        if let Some(v) = map.get("size.max.height") {
            cfg.size.max_height = Some(
                v.parse()
                    .map_err(|_| TrackerError::configuration(format!("bad value for size.max.height: {v}")))?,
            );
        }

        let mut cues: Vec<ModalityKind> = Vec::new();
        let mut i = 1;
        loop {
            let key = format!("cue{i}");
            match map.get(&key) {
                Some(v) => {
                    if let Some(kind) = ModalityKind::parse(v) {
                        cues.push(kind);
                    }
                    i += 1;
                }
                None => break,
            }
        }
        if !cues.is_empty() {
            cfg.modalities = cues;
        }

        Ok(cfg)
    }

    /// Inverse of `from_map`, covering every key `from_map` understands, so a
    /// round-tripped config reconstructs byte-identical behaviour.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("tracker".to_string(), self.tracker_name.clone());
        m.insert("sampling.size".to_string(), self.sampling_size.to_string());
        m.insert("sampling.threshold".to_string(), self.sampling_threshold.to_string());
        m.insert("sampling.mask".to_string(), self.sampling_mask.to_string());
        m.insert("pool.max".to_string(), self.pool_max.to_string());
        m.insert("pool.min".to_string(), self.pool_min.to_string());
        m.insert("pool.persistence".to_string(), self.pool_persistence.to_string());
        if let Some(t) = self.pool_median_threshold {
            m.insert("pool.median_threshold".to_string(), t.to_string());
        }
        m.insert(
            "patch.type".to_string(),
            match self.patch_type {
                PatchKind::Histogram => "histogram",
                PatchKind::Rgb => "rgb",
                PatchKind::Hs => "hs",
                PatchKind::Ssd => "ssd",
            }
            .to_string(),
        );
        m.insert("patch.scale".to_string(), self.patch_scale.to_string());
        m.insert("reweight.persistence".to_string(), self.reweight_persistence.to_string());
        m.insert("reweight.similarity".to_string(), self.reweight_similarity.to_string());
        m.insert("reweight.distance".to_string(), self.reweight_distance.to_string());
        m.insert("remove.weight".to_string(), self.remove_weight.to_string());
        m.insert("merge.distance".to_string(), self.merge_distance.to_string());
        m.insert("optimization.geometry".to_string(), self.optimization_geometry.to_string());
        m.insert("optimization.visual".to_string(), self.optimization_visual.to_string());
        m.insert(
            "optimization.global.move".to_string(),
            self.optimization_global_move.to_string(),
        );
        m.insert(
            "optimization.global.rotate".to_string(),
            self.optimization_global_rotate.to_string(),
        );
        m.insert(
            "optimization.global.scale".to_string(),
            self.optimization_global_scale.to_string(),
        );
        m.insert(
            "optimization.global.minsamples".to_string(),
            self.optimization_global_min_samples.to_string(),
        );
        m.insert(
            "optimization.global.maxsamples".to_string(),
            self.optimization_global_max_samples.to_string(),
        );
        m.insert(
            "optimization.global.add".to_string(),
            self.optimization_global_add_samples.to_string(),
        );
        m.insert(
            "optimization.global.elite".to_string(),
            self.optimization_global_elite_samples.to_string(),
        );
        m.insert(
            "optimization.global.iterations".to_string(),
            self.optimization_global_iterations.to_string(),
        );
        m.insert(
            "optimization.global.terminate".to_string(),
            self.optimization_global_terminate.to_string(),
        );
        m.insert(
            "optimization.global.clamp_scale".to_string(),
            self.optimization_global_clamp_scale.to_string(),
        );
        m.insert(
            "optimization.local.samples".to_string(),
            self.optimization_local_samples.to_string(),
        );
        m.insert(
            "optimization.local.elite".to_string(),
            self.optimization_local_elite_samples.to_string(),
        );
        m.insert(
            "optimization.local.iterations".to_string(),
            self.optimization_local_iterations.to_string(),
        );
        m.insert("optimization.local.move".to_string(), self.optimization_local_move.to_string());
        m.insert("color.region.foreground".to_string(), self.color_foreground_size.to_string());
        m.insert("color.region.margin".to_string(), self.color_background_margin.to_string());
        m.insert("color.region.background".to_string(), self.color_background_size.to_string());
        m.insert(
            "color.persistence.foreground".to_string(),
            self.color_fg_persistence.to_string(),
        );
        m.insert(
            "color.persistence.background".to_string(),
            self.color_bg_persistence.to_string(),
        );
        if let Some(w) = self.size.min_width {
            m.insert("size.min.width".to_string(), w.to_string());
        }
        if let Some(h) = self.size.min_height {
            m.insert("size.min.height".to_string(), h.to_string());
        }
        if let Some(w) = self.size.max_width {
            m.insert("size.max.width".to_string(), w.to_string());
        }
        if let Some(h) = self.size.max_height {
            m.insert("size.max.height".to_string(), h.to_string());
        }
        for (i, cue) in self.modalities.iter().enumerate() {
            m.insert(format!("cue{}", i + 1), cue.as_str().to_string());
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_map() {
        let cfg = TrackerConfig::default();
        let map = cfg.to_map();
        let restored = TrackerConfig::from_map(&map).unwrap();
        assert_eq!(restored.pool_max, cfg.pool_max);
        assert_eq!(restored.modalities.len(), cfg.modalities.len());
        assert_eq!(restored.optimization_global_clamp_scale, cfg.optimization_global_clamp_scale);
    }

    #[test]
    fn unknown_patch_type_is_configuration_error() {
        let mut map = HashMap::new();
        map.insert("patch.type".to_string(), "bogus".to_string());
        assert!(TrackerConfig::from_map(&map).is_err());
    }

    #[test]
    fn unrecognised_keys_are_ignored() {
        let mut map = HashMap::new();
        map.insert("totally.unknown.key".to_string(), "1".to_string());
        assert!(TrackerConfig::from_map(&map).is_ok());
    }
}
