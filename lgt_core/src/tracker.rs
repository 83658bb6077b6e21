//! The per-frame pipeline tying patch pool, optimisers, Kalman predictor,
//! and modalities together.
//!
//! Stage order is fixed (§5): predict → global-CE → local-CE → reweight →
//! merge → remove → modalities.update → add. Grounded on the teacher's
//! top-level engine loop structuring (one driving struct, a fixed stage
//! sequence, synchronous observer notification) though none of the teacher's
//! distributed/entity-simulation semantics survive here.

use std::collections::HashMap;

use crate::config::{ModalityKind, TrackerConfig};
use crate::error::TrackerError;
use crate::geometry::{BowyerWatsonTriangulator, Point2f, Rect, Triangulator};
use crate::image::Image;
use crate::kalman::CentroidFilter;
use crate::modalities::{
    BoundingModality, ColorHistogramModality, ConvexHullModality, Modalities, Modality, MotionLkModality,
    ProbabilityMap, Window,
};
use crate::observer::{Observer, ObserverRegistry, OptimizationStatus, PatchSetSnapshot, ReweightEvent, Stage};
use crate::optimization;
use crate::patchset::{ActiveFilter, Patches, ReliableFilter};
use crate::prng::Prng;

fn build_modalities(config: &TrackerConfig) -> Modalities {
    let mut cues: Vec<Box<dyn Modality>> = Vec::new();
    for kind in &config.modalities {
        let modality: Box<dyn Modality> = match kind {
            ModalityKind::ColorHistogram => Box::new(ColorHistogramModality::new(
                config.color_foreground_size,
                config.color_background_margin,
                config.color_background_size,
                config.color_fg_persistence,
                config.color_bg_persistence,
            )),
            ModalityKind::ConvexHull => Box::new(ConvexHullModality::new(10.0, 0.5, 0.8)),
            ModalityKind::MotionLk => {
                Box::new(MotionLkModality::new(lgt_env::BlockMatchFlow::new(7, 8), 2, 20.0, 0.7, 30))
            }
            ModalityKind::Bounding => Box::new(BoundingModality::new(5.0)),
        };
        cues.push(modality);
    }
    Modalities::new(cues)
}

pub struct Tracker {
    config: TrackerConfig,
    patches: Patches,
    modalities: Modalities,
    triangulator: Box<dyn Triangulator>,
    kalman: Option<CentroidFilter>,
    observers: ObserverRegistry,
    prng: Prng,
    properties: HashMap<i32, f32>,
    patches_capacity: f32,
    last_region: Rect,
}

impl Tracker {
    pub fn new(config: TrackerConfig, seed: u64) -> Self {
        let modalities = build_modalities(&config);
        let patches_capacity = ((config.pool_min + config.pool_max) / 2) as f32;
        Self {
            triangulator: Box::new(BowyerWatsonTriangulator),
            modalities,
            patches: Patches::new(),
            kalman: None,
            observers: ObserverRegistry::new(),
            prng: Prng::seeded(seed),
            properties: HashMap::new(),
            patches_capacity,
            last_region: Rect::default(),
            config,
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn Observer>) -> u64 {
        self.observers.add(observer)
    }

    pub fn remove_observer(&mut self, handle: u64) {
        self.observers.remove(handle)
    }

    pub fn set_property(&mut self, code: i32, value: f32) {
        self.properties.insert(code, value);
    }

    pub fn get_property(&self, code: i32) -> Option<f32> {
        self.properties.get(&code).copied()
    }

    pub fn has_property(&self, code: i32) -> bool {
        self.properties.contains_key(&code)
    }

    pub fn remove_property(&mut self, code: i32) {
        self.properties.remove(&code);
    }

    pub fn is_tracking(&self) -> bool {
        !self.patches.is_empty()
    }

    fn active_indices(&self) -> Vec<usize> {
        self.patches.indices_matching(&ActiveFilter)
    }

    pub fn position(&self) -> (f32, f32) {
        let indices = self.active_indices();
        self.patches
            .mean_position(&indices)
            .map(|p| (p.x, p.y))
            .unwrap_or((0.0, 0.0))
    }

    pub fn region(&self) -> Rect {
        if self.patches.is_empty() {
            return Rect::default();
        }
        let indices = self.active_indices();
        let patch_size = self.patches.get(indices[0]).map(|p| p.patch_size()).unwrap_or(10);
        let (origin, w, h) = self.patches.region(&indices, patch_size);
        Rect::new(origin.x, origin.y, w, h)
    }

    /// Number of patches currently in the pool (active and inactive).
    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }

    /// The pool-size capacity estimate, an EMA tracking the actual patch
    /// count frame to frame.
    pub fn patches_capacity(&self) -> f32 {
        self.patches_capacity
    }

    /// Seeds a grid of patches over `region` and resets all per-tracker
    /// state. Fails fast on an empty image or a degenerate region.
    pub fn initialize(&mut self, image: &Image, region: Rect) -> Result<(), TrackerError> {
        if image.width() <= 0 || image.height() <= 0 {
            return Err(TrackerError::invalid_input("empty image"));
        }
        if region.width < 1.0 || region.height < 1.0 {
            return Err(TrackerError::invalid_input("degenerate region"));
        }

        self.patches = Patches::new();
        self.modalities.flush();
        self.properties.clear();

        let patch_size = ((region.width.min(region.height)) * self.config.patch_scale / 4.0)
            .round()
            .max(4.0) as i32;
        let grid = 3usize;
        let mut seeded_positions = Vec::new();
        for row in 0..grid {
            for col in 0..grid {
                let fx = (col as f32 + 0.5) / grid as f32;
                let fy = (row as f32 + 0.5) / grid as f32;
                let pos = Point2f::new(region.x + fx * region.width, region.y + fy * region.height);
                seeded_positions.push(pos);
            }
        }
        for pos in &seeded_positions {
            self.patches.push(self.config.patch_type, image, *pos, patch_size, 1.0);
        }
        let all = self.active_indices();
        self.patches.normalize_weights(&all);

        if self.config.pool_median_threshold.is_none() {
            let computed = nearest_neighbor_mean_distance(&seeded_positions) * 1.2;
            tracing::debug!(computed, "pool.median_threshold absent, computing from seeded layout");
            self.config.pool_median_threshold = Some(computed);
        }

        let diag = (region.width * region.width + region.height * region.height).sqrt();
        let centroid = region.center();
        self.kalman = Some(CentroidFilter::new(nalgebra::Vector2::new(centroid.x, centroid.y), diag));
        self.patches_capacity = self.patches.len() as f32;
        self.last_region = region;
        Ok(())
    }

    /// Advances the tracker by one frame. A no-op once the patch pool has
    /// emptied (end of track).
    pub fn update(&mut self, image: &Image) {
        if self.patches.is_empty() {
            return;
        }

        self.notify_stage(Stage::Begin);

        self.patches.push_history();

        let all = self.active_indices();
        let prev_centroid = self.patches.mean_position(&all).unwrap_or(Point2f::origin());

        if let Some(kalman) = &mut self.kalman {
            let predicted = kalman.predict();
            let delta = Point2f::new(predicted.x, predicted.y) - prev_centroid;
            for &i in &all {
                if let Some(p) = self.patches.get_mut(i) {
                    p.move_by(delta);
                }
            }
        }

        let all = self.active_indices();
        let centroid = self.patches.mean_position(&all).unwrap_or(prev_centroid);
        let affine = self.config.size.max_width.is_some() || self.config.size.max_height.is_some();
        let region_side = self.last_region.width.max(self.last_region.height);
        let (global_params, global_status) = optimization::global_optimize(
            &self.patches,
            &all,
            image,
            centroid,
            affine,
            region_side,
            &self.config,
            &mut self.prng,
        );
        let base_positions = self.patches.positions(&all);
        let transformed = optimization::apply_transform(&base_positions, centroid, &global_params);
        for (&i, p) in all.iter().zip(transformed.iter()) {
            if let Some(patch) = self.patches.get_mut(i) {
                patch.set_position(*p);
            }
        }
        self.notify_optimization(Stage::OptimizationGlobal, &[global_status]);
        self.notify_stage(Stage::OptimizationGlobal);

        let local_statuses = optimization::local_optimize(
            &mut self.patches,
            &all,
            image,
            self.triangulator.as_ref(),
            &self.config,
            &mut self.prng,
        );
        self.notify_optimization(Stage::OptimizationLocal, &local_statuses);
        self.notify_stage(Stage::OptimizationLocal);

        self.reweight(image, &all);
        self.notify_stage(Stage::UpdateWeights);

        self.merge_near_duplicates(image);

        let remove_indices: Vec<usize> = self
            .patches
            .iter()
            .enumerate()
            .filter(|(_, p)| p.weight() < self.config.remove_weight)
            .map(|(i, _)| i)
            .collect();
        self.patches.remove(remove_indices);
        self.notify_stage(Stage::RemovePatches);

        if self.patches.is_empty() {
            self.notify_stage(Stage::End);
            return;
        }

        let all = self.active_indices();
        let new_centroid = self.patches.mean_position(&all).unwrap_or(centroid);
        if let Some(kalman) = &mut self.kalman {
            kalman.correct(nalgebra::Vector2::new(new_centroid.x, new_centroid.y));
        }

        let patch_size = self.patches.get(all[0]).map(|p| p.patch_size()).unwrap_or(10);
        let (origin, w, h) = self.patches.region(&all, patch_size);
        let bounds = Rect::new(origin.x, origin.y, w, h);
        self.last_region = bounds;

        let reliable = self.patches.indices_matching(&ReliableFilter {
            min_weight: self.config.remove_weight,
            min_age: 1,
        });
        let reliable_points: Vec<(Point2f, f32)> = reliable
            .iter()
            .filter_map(|&i| self.patches.get(i).map(|p| (p.position(), p.weight())))
            .collect();
        self.modalities.update(image, &reliable_points, bounds);
        self.notify_stage(Stage::UpdateModalities);

        self.sample_add_patches(image, new_centroid);
        self.notify_stage(Stage::AddPatches);

        self.patches_capacity =
            self.config.pool_persistence * self.patches_capacity + (1.0 - self.config.pool_persistence) * self.patches.len() as f32;

        self.notify_stage(Stage::End);
    }

    fn reweight(&mut self, image: &Image, indices: &[usize]) {
        let positions = self.patches.positions(indices);
        let median_threshold = self.config.pool_median_threshold.unwrap_or(50.0);
        let mut events = Vec::with_capacity(indices.len());
        for (local_i, &global_i) in indices.iter().enumerate() {
            let similarity = {
                let resp = self
                    .patches
                    .get(global_i)
                    .map(|p| p.response(image, positions[local_i]))
                    .unwrap_or(0.0);
                (-resp * self.config.reweight_similarity).exp()
            };
            let mut distances: Vec<f32> = positions
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != local_i)
                .map(|(_, p)| (p - positions[local_i]).norm())
                .collect();
            distances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let median = if distances.is_empty() {
                0.0
            } else {
                distances[distances.len() / 2]
            };
            let proximity = 1.0 / (1.0 + ((median - median_threshold) * self.config.reweight_distance).exp());

            if let Some(patch) = self.patches.get_mut(global_i) {
                let w = patch.weight();
                let updated = self.config.reweight_persistence * w
                    + (1.0 - self.config.reweight_persistence) * similarity * proximity;
                patch.set_weight(updated);
            }
            events.push(ReweightEvent {
                patch_id: self.patches.get(global_i).map(|p| p.id()).unwrap_or(0),
                similarity,
                proximity,
            });
        }
        self.observers.notify_reweight(&events);
    }

    /// Repeatedly scans for a connected cluster of patches within the merge
    /// radius of one another and merges the whole cluster at once, restarting
    /// the scan each time (positions shift after every merge). Mirrors the
    /// original's `while (true) { for p in 0..size { selection = all m in
    /// p..size with D(p,m) < threshold; if selection.len() > 1 { merge;
    /// break } } }`.
    fn merge_near_duplicates(&mut self, image: &Image) {
        loop {
            let indices = self.active_indices();
            let positions = self.patches.positions(&indices);
            let mut cluster = None;
            for i in 0..indices.len() {
                let patch_size = self.patches.get(indices[i]).map(|p| p.patch_size()).unwrap_or(10) as f32;
                let radius = self.config.merge_distance * patch_size / 2.0;
                let selection: Vec<usize> = (i..indices.len())
                    .filter(|&j| (positions[j] - positions[i]).norm() < radius)
                    .map(|j| indices[j])
                    .collect();
                if selection.len() > 1 {
                    cluster = Some(selection);
                    break;
                }
            }
            match cluster {
                Some(group) => {
                    self.patches.merge(&group, image);
                }
                None => break,
            }
        }
    }

    fn sample_add_patches(&mut self, image: &Image, centroid: Point2f) {
        let size = self.patches.len() as i32;
        let k = ((self.patches_capacity as i32 - size + 1).min(self.config.pool_max as i32 - size))
            .max(self.config.pool_min as i32 - size);
        if k <= 0 {
            return;
        }

        let side = self.config.sampling_size.max(1);
        let half = side / 2;
        let window = Window {
            x: (centroid.x as i32 - half).max(0),
            y: (centroid.y as i32 - half).max(0),
            width: side.min(image.width()),
            height: side.min(image.height()),
        };
        let mut map = self.modalities.probability_product(image, window);
        suppress_noise(&mut map, self.config.sampling_threshold);

        let all = self.active_indices();
        let existing: Vec<Point2f> = self.patches.positions(&all);
        let patch_size = self.patches.get(all[0]).map(|p| p.patch_size()).unwrap_or(10) as f32;
        let radius = self.config.sampling_mask * patch_size;
        inhibit(&mut map, &existing, radius, window);

        for _ in 0..k {
            map.normalize();
            let total: f32 = map.values.iter().sum();
            if total < 1e-16 {
                break;
            }
            let Some((x, y, value)) = sample_inverse_cdf(&map, &mut self.prng) else {
                break;
            };
            if value < 1e-5 {
                break;
            }
            let pos = Point2f::new(x, y);
            self.patches.push(self.config.patch_type, image, pos, patch_size as i32, 0.5);
            inhibit(&mut map, &[pos], radius, window);
        }
    }

    fn notify_stage(&mut self, stage: Stage) {
        let snapshot = PatchSetSnapshot::from_positions(&self.patches);
        self.observers.notify_stage(stage, &snapshot);
    }

    fn notify_optimization(&mut self, stage: Stage, status: &[OptimizationStatus]) {
        self.observers.notify_optimization(stage, status);
    }
}

fn nearest_neighbor_mean_distance(points: &[Point2f]) -> f32 {
    if points.len() < 2 {
        return 50.0;
    }
    let mut total = 0.0;
    for (i, p) in points.iter().enumerate() {
        let nearest = points
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(_, q)| (q - p).norm())
            .fold(f32::MAX, f32::min);
        total += nearest;
    }
    total / points.len() as f32
}

fn suppress_noise(map: &mut ProbabilityMap, threshold: f32) {
    let max = map.values.iter().cloned().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return;
    }
    let floor = max * threshold;
    let w = map.window.width;
    let h = map.window.height;
    let snapshot = map.values.clone();
    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            if snapshot[idx] < floor {
                let mut equal_neighbors = 0;
                for dy in -2..=2 {
                    for dx in -2..=2 {
                        let nx = x + dx;
                        let ny = y + dy;
                        if nx >= 0 && ny >= 0 && nx < w && ny < h {
                            let nidx = (ny * w + nx) as usize;
                            if (snapshot[nidx] - snapshot[idx]).abs() < 1e-6 && snapshot[nidx] >= floor {
                                equal_neighbors += 1;
                            }
                        }
                    }
                }
                if equal_neighbors < 5 {
                    map.values[idx] = 0.0;
                }
            }
        }
    }
}

fn inhibit(map: &mut ProbabilityMap, centers: &[Point2f], radius: f32, window: Window) {
    if radius <= 0.0 {
        return;
    }
    let w = map.window.width;
    let h = map.window.height;
    for y in 0..h {
        for x in 0..w {
            let world = Point2f::new((window.x + x) as f32, (window.y + y) as f32);
            for c in centers {
                if (world - c).norm() < radius {
                    map.values[(y * w + x) as usize] = 0.0;
                    break;
                }
            }
        }
    }
}

fn sample_inverse_cdf(map: &ProbabilityMap, prng: &mut Prng) -> Option<(f32, f32, f32)> {
    let total: f32 = map.values.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let target = prng.uniform_f32(0.0, total);
    let mut acc = 0.0;
    let w = map.window.width;
    for (idx, &v) in map.values.iter().enumerate() {
        acc += v;
        if acc >= target {
            let x = map.window.x + (idx as i32 % w);
            let y = map.window.y + (idx as i32 / w);
            return Some((x as f32, y as f32, v));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use lgt_env::{RawFrame, StandardColorConverter};
    use std::sync::Arc;

    fn textured_image(width: u32, height: u32) -> Image {
        let mut rgb = vec![0u8; (width * height * 3) as usize];
        for y in 0..height {
            for x in 0..width {
                let idx = ((y * width + x) * 3) as usize;
                let v = ((x * 37 + y * 59) % 256) as u8;
                rgb[idx] = v;
                rgb[idx + 1] = v.wrapping_add(40);
                rgb[idx + 2] = v.wrapping_add(80);
            }
        }
        Image::new(RawFrame::new(width, height, rgb).unwrap(), Arc::new(StandardColorConverter))
    }

    #[test]
    fn initialize_seeds_a_patch_grid_and_tracks() {
        let img = textured_image(320, 240);
        let mut tracker = Tracker::new(TrackerConfig::default(), 42);
        tracker.initialize(&img, Rect::new(140.0, 100.0, 40.0, 40.0)).unwrap();
        assert!(tracker.is_tracking());
        assert!(tracker.patches.len() > 0);
    }

    #[test]
    fn initialize_rejects_degenerate_region() {
        let img = textured_image(50, 50);
        let mut tracker = Tracker::new(TrackerConfig::default(), 1);
        let err = tracker.initialize(&img, Rect::new(0.0, 0.0, 0.0, 10.0));
        assert!(err.is_err());
    }

    #[test]
    fn update_on_stationary_target_keeps_tracking() {
        let img = textured_image(320, 240);
        let mut tracker = Tracker::new(TrackerConfig::default(), 7);
        tracker.initialize(&img, Rect::new(140.0, 100.0, 40.0, 40.0)).unwrap();
        for _ in 0..5 {
            tracker.update(&img);
        }
        assert!(tracker.is_tracking());
        let (x, y) = tracker.position();
        assert!((x - 160.0).abs() < 20.0);
        assert!((y - 120.0).abs() < 20.0);
    }

    #[test]
    fn update_is_a_no_op_once_pool_is_empty() {
        let img = textured_image(320, 240);
        let mut cfg = TrackerConfig::default();
        cfg.remove_weight = 0.99;
        let mut tracker = Tracker::new(cfg, 3);
        tracker.initialize(&img, Rect::new(140.0, 100.0, 40.0, 40.0)).unwrap();
        tracker.update(&img);
        assert!(!tracker.is_tracking());
        tracker.update(&img);
        assert!(!tracker.is_tracking());
        assert_eq!(tracker.region(), Rect::default());
    }

    #[test]
    fn seed_reproducibility() {
        let img = textured_image(320, 240);
        let mut a = Tracker::new(TrackerConfig::default(), 99);
        let mut b = Tracker::new(TrackerConfig::default(), 99);
        a.initialize(&img, Rect::new(140.0, 100.0, 40.0, 40.0)).unwrap();
        b.initialize(&img, Rect::new(140.0, 100.0, 40.0, 40.0)).unwrap();
        for _ in 0..5 {
            a.update(&img);
            b.update(&img);
        }
        assert_eq!(a.position(), b.position());
    }
}
