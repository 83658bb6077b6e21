//! The dynamic constellation of patches the tracker maintains: a growable,
//! filterable pool with weighted geometry queries.
//!
//! Grounded on `patchset.h`'s `Patches` (mutable pool: push/remove/merge) and
//! `PatchSet` (read-only filtered view: mean_position/position_covariance).
//! Rust doesn't need the base/derived split to get both: `Patches` owns the
//! storage and exposes filtered views as iterators instead of a separate
//! filtered-copy type.

use nalgebra::Matrix2;

use crate::geometry::{self, Point2f};
use crate::image::Image;
use crate::patch::{Patch, PatchKind};

/// A predicate over patches, used to select the subset a computation runs
/// over (merge is only proposed between patches both meeting `active` and a
/// weight floor, reweighting considers only `reliable` patches, etc).
pub trait PatchFilter {
    fn keep(&self, patch: &Patch) -> bool;
}

pub struct ActiveFilter;
impl PatchFilter for ActiveFilter {
    fn keep(&self, patch: &Patch) -> bool {
        patch.is_active()
    }
}

pub struct WeightAtLeast(pub f32);
impl PatchFilter for WeightAtLeast {
    fn keep(&self, patch: &Patch) -> bool {
        patch.is_active() && patch.weight() >= self.0
    }
}

/// Active, aged enough, and above a weight floor - the set modalities and
/// the global optimizer trust for their estimates (`modalities.h`'s
/// `ReliablePatchesFilter`).
pub struct ReliableFilter {
    pub min_weight: f32,
    pub min_age: u32,
}
impl PatchFilter for ReliableFilter {
    fn keep(&self, patch: &Patch) -> bool {
        patch.is_active() && patch.weight() >= self.min_weight && patch.age() >= self.min_age
    }
}

/// The patch pool. Indices are stable across frames: removal is a swap into
/// a "removed" marker state rather than a shift, so a patch's id always maps
/// to the same slot for the lifetime of the tracker.
#[derive(Debug, Clone, Default)]
pub struct Patches {
    patches: Vec<Patch>,
    next_id: u64,
}

impl Patches {
    pub fn new() -> Self {
        Self {
            patches: Vec::new(),
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Patch> {
        self.patches.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Patch> {
        self.patches.iter_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Patch> {
        self.patches.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Patch> {
        self.patches.get_mut(index)
    }

    /// Adds a new patch at `position`, returning its pool index.
    pub fn push(
        &mut self,
        kind: PatchKind,
        image: &Image,
        position: Point2f,
        patch_size: i32,
        weight: f32,
    ) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.patches
            .push(Patch::new(id, kind, image, position, patch_size, weight));
        self.patches.len() - 1
    }

    /// Removes the patches at `indices` (order-preserving for the rest).
    pub fn remove(&mut self, mut indices: Vec<usize>) {
        indices.sort_unstable();
        indices.dedup();
        for idx in indices.into_iter().rev() {
            if idx < self.patches.len() {
                self.patches.remove(idx);
            }
        }
    }

    /// Advances every patch's state history by one frame (called once per
    /// tracker update, before optimization).
    pub fn push_history(&mut self) {
        for p in &mut self.patches {
            p.push();
        }
    }

    /// Indices of patches matching `filter`.
    pub fn indices_matching(&self, filter: &dyn PatchFilter) -> Vec<usize> {
        self.patches
            .iter()
            .enumerate()
            .filter(|(_, p)| filter.keep(p))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn positions(&self, indices: &[usize]) -> Vec<Point2f> {
        indices.iter().map(|&i| self.patches[i].position()).collect()
    }

    pub fn weights(&self, indices: &[usize]) -> Vec<f32> {
        indices.iter().map(|&i| self.patches[i].weight()).collect()
    }

    /// Weighted mean position over `indices`. `None` if empty or all weights
    /// non-positive.
    pub fn mean_position(&self, indices: &[usize]) -> Option<Point2f> {
        let positions = self.positions(indices);
        let weights = self.weights(indices);
        geometry::weighted_mean(&positions, &weights)
    }

    /// Weighted position covariance over `indices`, around `mean`.
    pub fn position_covariance(&self, indices: &[usize], mean: Point2f) -> Matrix2<f32> {
        let positions = self.positions(indices);
        let weights = self.weights(indices);
        geometry::weighted_covariance(&positions, &weights, mean)
    }

    /// Bounding region (min corner, width, height) enclosing `indices`; a
    /// single `patch_size`-wide box around the mean if there are none.
    pub fn region(&self, indices: &[usize], patch_size: i32) -> (Point2f, f32, f32) {
        if indices.is_empty() {
            return (Point2f::origin(), patch_size as f32, patch_size as f32);
        }
        let positions = self.positions(indices);
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
        for p in &positions {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let half = patch_size as f32 / 2.0;
        (
            Point2f::new(min_x - half, min_y - half),
            max_x - min_x + patch_size as f32,
            max_y - min_y + patch_size as f32,
        )
    }

    /// Merges a whole cluster of `indices` into one new patch at their
    /// weighted-mean position with weighted-mean weight, dropping the
    /// originals. Mirrors `Patches::merge` (patchset.cpp): accumulates
    /// `p.x += m.x*mw; ...` across the cluster, divides by the summed weight
    /// for the mean position and by `indices.len()` for the mean weight, then
    /// adds one new patch there - merging never averages appearance models,
    /// the new patch simply re-samples the image at the merged point.
    pub fn merge(&mut self, indices: &[usize], image: &Image) -> Option<usize> {
        if indices.len() < 2 || indices.iter().any(|&i| i >= self.patches.len()) {
            return None;
        }
        let kind = self.patches[indices[0]].kind();
        let patch_size = self.patches[indices[0]].patch_size();

        let mut sum_x = 0.0f32;
        let mut sum_y = 0.0f32;
        let mut sum_w = 0.0f32;
        for &i in indices {
            let p = self.patches[i].position();
            let w = self.patches[i].weight();
            sum_x += p.x * w;
            sum_y += p.y * w;
            sum_w += w;
        }
        let mean_position = if sum_w > 0.0 {
            Point2f::new(sum_x / sum_w, sum_y / sum_w)
        } else {
            let n = indices.len() as f32;
            let unweighted = indices
                .iter()
                .map(|&i| self.patches[i].position())
                .fold(Point2f::new(0.0, 0.0), |acc, p| Point2f::new(acc.x + p.x, acc.y + p.y));
            Point2f::new(unweighted.x / n, unweighted.y / n)
        };
        let mean_weight = sum_w / indices.len() as f32;

        self.remove(indices.to_vec());
        Some(self.push(kind, image, mean_position, patch_size, mean_weight))
    }

    /// Multiplies every patch's weight by `factor`, then rescales so the
    /// weights of `indices` sum to 1 (normalization after reweighting).
    pub fn normalize_weights(&mut self, indices: &[usize]) {
        let total: f32 = indices.iter().map(|&i| self.patches[i].weight()).sum();
        if total <= 0.0 {
            return;
        }
        for &i in indices {
            let w = self.patches[i].weight() / total;
            self.patches[i].set_weight(w);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lgt_env::{RawFrame, StandardColorConverter};
    use std::sync::Arc;

    fn image() -> Image {
        Image::new(RawFrame::filled(64, 64, (30, 60, 90)), Arc::new(StandardColorConverter))
    }

    #[test]
    fn push_and_remove_preserve_remaining_order() {
        let img = image();
        let mut pool = Patches::new();
        pool.push(PatchKind::Rgb, &img, Point2f::new(1.0, 1.0), 8, 1.0);
        pool.push(PatchKind::Rgb, &img, Point2f::new(2.0, 2.0), 8, 1.0);
        pool.push(PatchKind::Rgb, &img, Point2f::new(3.0, 3.0), 8, 1.0);
        pool.remove(vec![1]);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(1).unwrap().position(), Point2f::new(3.0, 3.0));
    }

    #[test]
    fn mean_position_is_weighted() {
        let img = image();
        let mut pool = Patches::new();
        pool.push(PatchKind::Rgb, &img, Point2f::new(0.0, 0.0), 8, 1.0);
        pool.push(PatchKind::Rgb, &img, Point2f::new(10.0, 0.0), 8, 3.0);
        let all = pool.indices_matching(&ActiveFilter);
        let mean = pool.mean_position(&all).unwrap();
        assert!((mean.x - 7.5).abs() < 1e-5);
    }

    #[test]
    fn merge_produces_weighted_mean_position_and_weight() {
        let img = image();
        let mut pool = Patches::new();
        pool.push(PatchKind::Rgb, &img, Point2f::new(0.0, 0.0), 8, 1.0);
        pool.push(PatchKind::Rgb, &img, Point2f::new(10.0, 0.0), 8, 3.0);
        let new_index = pool.merge(&[0, 1], &img).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(new_index, 0);
        // weighted-mean position: (0*1 + 10*3) / 4 = 7.5
        assert!((pool.get(0).unwrap().position().x - 7.5).abs() < 1e-6);
        // weighted-mean weight: (1 + 3) / 2 = 2.0
        assert!((pool.get(0).unwrap().weight() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn merge_of_fewer_than_two_indices_is_a_no_op() {
        let img = image();
        let mut pool = Patches::new();
        pool.push(PatchKind::Rgb, &img, Point2f::new(0.0, 0.0), 8, 1.0);
        assert!(pool.merge(&[0], &img).is_none());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn normalize_weights_sums_to_one() {
        let img = image();
        let mut pool = Patches::new();
        pool.push(PatchKind::Rgb, &img, Point2f::new(0.0, 0.0), 8, 2.0);
        pool.push(PatchKind::Rgb, &img, Point2f::new(1.0, 1.0), 8, 2.0);
        let all = pool.indices_matching(&ActiveFilter);
        pool.normalize_weights(&all);
        let sum: f32 = pool.iter().map(|p| p.weight()).sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }
}
