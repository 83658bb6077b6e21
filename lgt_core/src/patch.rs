//! A single local appearance model: identity, geometry, state history, and
//! one of four visual-model variants.
//!
//! Re-architected from the source's virtual-dispatch hierarchy
//! (`HistogramPatch`/`RGBPatch`/`HSPatch`/`SSDPatch` all inheriting from one
//! `Patch` base) into a tagged sum type: every variant implements the same
//! three operations (`initialize`, `response`, `responses_batch`) as match
//! arms instead of vtable calls. No inheritance hierarchy is required.

use std::collections::VecDeque;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::geometry::Point2f;
use crate::image::Image;

const HIST_BINS: usize = 16;
const LAMBDA_VIS: f32 = 3600.0;
const LAMBDA_VIS_H: f32 = 0.063;
const LAMBDA_VIS_S: f32 = 0.063;
const OUT_OF_BOUNDS_RGB: f32 = 195_075.0; // 255^2 * 3

/// Which appearance model a patch uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchKind {
    Histogram,
    Rgb,
    Hs,
    Ssd,
}

/// The appearance model data itself, one variant per [`PatchKind`].
#[derive(Debug, Clone)]
pub enum PatchModel {
    Histogram { bins: [f32; HIST_BINS] },
    Rgb { color: (u8, u8, u8) },
    Hs { h: f32, s: f32 },
    Ssd { template: Vec<u8>, side: i32 },
}

impl PatchModel {
    pub fn kind(&self) -> PatchKind {
        match self {
            PatchModel::Histogram { .. } => PatchKind::Histogram,
            PatchModel::Rgb { .. } => PatchKind::Rgb,
            PatchModel::Hs { .. } => PatchKind::Hs,
            PatchModel::Ssd { .. } => PatchKind::Ssd,
        }
    }

    fn initialize(kind: PatchKind, image: &Image, position: Point2f, patch_size: i32) -> Self {
        let x = position.x.round() as i32;
        let y = position.y.round() as i32;
        match kind {
            PatchKind::Histogram => PatchModel::Histogram {
                bins: histogram16(image, position, patch_size),
            },
            PatchKind::Rgb => {
                let cx = x.clamp(0, image.width() - 1);
                let cy = y.clamp(0, image.height() - 1);
                let color = image.get_rgb(cx, cy).unwrap_or((0, 0, 0));
                PatchModel::Rgb { color }
            }
            PatchKind::Hs => {
                let cx = x.clamp(0, image.width() - 1);
                let cy = y.clamp(0, image.height() - 1);
                let (h, s, _v) = image.get_hsv(cx, cy).unwrap_or((0, 0, 0));
                PatchModel::Hs {
                    h: h as f32 / 255.0,
                    s: s as f32 / 255.0,
                }
            }
            PatchKind::Ssd => {
                let half = patch_size / 2;
                let mut template = vec![0u8; (patch_size * patch_size) as usize];
                for j in 0..patch_size {
                    for i in 0..patch_size {
                        let sx = x - half + i;
                        let sy = y - half + j;
                        if let Some(v) = image.get_grey(sx, sy) {
                            template[(j * patch_size + i) as usize] = v;
                        }
                    }
                }
                PatchModel::Ssd {
                    template,
                    side: patch_size,
                }
            }
        }
    }

    /// Visual distance at `p` for the non-histogram variants (lower = more
    /// similar). Histogram needs `patch_size`, which isn't carried on the
    /// model, so [`Patch::response`] special-cases it before reaching here.
    fn response(&self, image: &Image, p: Point2f) -> f32 {
        let x = p.x.round() as i32;
        let y = p.y.round() as i32;
        match self {
            PatchModel::Histogram { .. } => {
                unreachable!("histogram response is computed by Patch::response")
            }
            PatchModel::Rgb { color } => {
                if !image.contains(x, y) {
                    return OUT_OF_BOUNDS_RGB;
                }
                let (r, g, b) = image.get_rgb(x, y).unwrap_or((0, 0, 0));
                let dr = r as f32 - color.0 as f32;
                let dg = g as f32 - color.1 as f32;
                let db = b as f32 - color.2 as f32;
                0.5 * (dr * dr + dg * dg + db * db) / LAMBDA_VIS
            }
            PatchModel::Hs { h, s } => {
                if !image.contains(x, y) {
                    return OUT_OF_BOUNDS_RGB;
                }
                let (ht, st, _v) = image.get_hsv(x, y).unwrap_or((0, 0, 0));
                let mut dh = (ht as f32 / 255.0 - h).abs();
                dh = dh.min(1.0 - dh);
                let ds = st as f32 / 255.0 - s;
                0.5 * (dh * dh / LAMBDA_VIS_H + ds * ds / LAMBDA_VIS_S)
            }
            PatchModel::Ssd { template, side } => ssd_response(image, template, *side, x, y),
        }
    }
}

/// Computes the histogram response separately since it needs `patch_size`,
/// which isn't carried on the model (the ring-buffer's geometry lives on
/// [`Patch`], not the per-variant appearance data).
fn histogram_response(image: &Image, reference: &[f32; HIST_BINS], p: Point2f, patch_size: i32) -> f32 {
    let test = histogram16(image, p, patch_size);
    1.0 - bhattacharyya(reference, &test)
}

fn histogram16(image: &Image, center: Point2f, patch_size: i32) -> [f32; HIST_BINS] {
    let mut bins = [0.0f32; HIST_BINS];
    let half = patch_size / 2;
    let cx = center.x.round() as i32;
    let cy = center.y.round() as i32;
    for j in -half..half {
        for i in -half..half {
            if let Some(v) = image.get_grey(cx + i, cy + j) {
                bins[(v >> 4) as usize] += 1.0;
            }
        }
    }
    bins
}

fn bhattacharyya(a: &[f32; HIST_BINS], b: &[f32; HIST_BINS]) -> f32 {
    let sum_a: f32 = a.iter().sum();
    let sum_b: f32 = b.iter().sum();
    if sum_a <= 0.0 && sum_b <= 0.0 {
        return 1.0; // both empty: treat response as perfect match (0) by caller
    }
    if sum_a <= 0.0 || sum_b <= 0.0 {
        return 0.0;
    }
    let mut coeff = 0.0;
    for k in 0..HIST_BINS {
        coeff += ((a[k] / sum_a) * (b[k] / sum_b)).sqrt();
    }
    coeff.clamp(0.0, 1.0)
}

fn ssd_response(image: &Image, template: &[u8], side: i32, cx: i32, cy: i32) -> f32 {
    let half = side / 2;
    let x1 = (cx - half).max(0);
    let y1 = (cy - half).max(0);
    let x2 = (cx + half).min(image.width());
    let y2 = (cy + half).min(image.height());
    if x1 >= x2 || y1 >= y2 {
        return -50.0;
    }
    let ox = x1 - (cx - half);
    let oy = y1 - (cy - half);

    let mut dist = 0.0f32;
    for j in 0..(y2 - y1) {
        for i in 0..(x2 - x1) {
            let g = image.get_grey(x1 + i, y1 + j).unwrap_or(0) as f32;
            let t = template[((oy + j) * side + (ox + i)) as usize] as f32;
            let d = g - t;
            dist += d * d;
        }
    }
    let area = ((x2 - x1) * (y2 - y1)) as f32;
    -(dist / (area * 255.0 * 255.0)) * 50.0
}

/// One historical snapshot in a patch's ring buffer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PatchState {
    pub position: Point2f,
    pub weight: f32,
    pub active: bool,
}

/// Default and hard ring-buffer capacities (patch.h: `Buffer<State>(capacity, limit)`).
pub const STATE_CAPACITY: usize = 6;
pub const STATE_LIMIT: usize = 30;

/// A single local appearance model attached to a 2-D position.
#[derive(Debug, Clone)]
pub struct Patch {
    id: u64,
    patch_size: i32,
    age: u32,
    active: bool,
    model: PatchModel,
    /// Index 0 is "current"; index k is k frames back.
    states: VecDeque<PatchState>,
}

impl Patch {
    pub fn new(
        id: u64,
        kind: PatchKind,
        image: &Image,
        position: Point2f,
        patch_size: i32,
        weight: f32,
    ) -> Self {
        let model = PatchModel::initialize(kind, image, position, patch_size);
        let mut states = VecDeque::with_capacity(STATE_CAPACITY);
        states.push_front(PatchState {
            position,
            weight,
            active: true,
        });
        Self {
            id,
            patch_size,
            age: 0,
            active: true,
            model,
            states,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> PatchKind {
        self.model.kind()
    }

    pub fn patch_size(&self) -> i32 {
        self.patch_size
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn position(&self) -> Point2f {
        self.states[0].position
    }

    pub fn position_at(&self, offset: usize) -> Option<Point2f> {
        self.states.get(offset).map(|s| s.position)
    }

    pub fn weight(&self) -> f32 {
        self.states[0].weight
    }

    pub fn set_position(&mut self, p: Point2f) {
        self.states[0].position = p;
    }

    pub fn set_weight(&mut self, w: f32) {
        self.states[0].weight = w;
    }

    pub fn move_by(&mut self, delta: Vector2<f32>) {
        self.states[0].position += delta;
    }

    pub fn history_size(&self) -> usize {
        self.states.len()
    }

    /// Duplicates the current state into a new index-0 slot and ages the
    /// patch by one frame; drops the oldest slot once the hard limit is hit.
    pub fn push(&mut self) {
        let current = self.states[0];
        self.states.push_front(current);
        if self.states.len() > STATE_LIMIT {
            self.states.pop_back();
        }
        self.age += 1;
    }

    /// Variant-dependent visual distance from the stored model to the
    /// appearance at `p` in `image`. Lower = more similar.
    pub fn response(&self, image: &Image, p: Point2f) -> f32 {
        match &self.model {
            PatchModel::Histogram { bins } => histogram_response(image, bins, p, self.patch_size),
            other => other.response(image, p),
        }
    }

    pub fn responses_batch(&self, image: &Image, positions: &[Point2f]) -> Vec<f32> {
        positions.iter().map(|&p| self.response(image, p)).collect()
    }

    /// Re-initialises the appearance model from the current image at the
    /// patch's current position (used by merge/add, never averages models).
    pub fn reinitialize(&mut self, image: &Image) {
        let kind = self.model.kind();
        self.model = PatchModel::initialize(kind, image, self.position(), self.patch_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lgt_env::{RawFrame, StandardColorConverter};
    use std::sync::Arc;

    fn image(color: (u8, u8, u8)) -> Image {
        Image::new(RawFrame::filled(64, 64, color), Arc::new(StandardColorConverter))
    }

    #[test]
    fn rgb_patch_perfect_match_has_zero_response() {
        let img = image((120, 80, 40));
        let patch = Patch::new(0, PatchKind::Rgb, &img, Point2f::new(32.0, 32.0), 10, 1.0);
        let r = patch.response(&img, Point2f::new(32.0, 32.0));
        assert!(r.abs() < 1e-6);
    }

    #[test]
    fn rgb_patch_out_of_bounds_is_large_constant() {
        let img = image((120, 80, 40));
        let patch = Patch::new(0, PatchKind::Rgb, &img, Point2f::new(32.0, 32.0), 10, 1.0);
        let r = patch.response(&img, Point2f::new(-5.0, -5.0));
        assert_eq!(r, OUT_OF_BOUNDS_RGB);
    }

    #[test]
    fn histogram_patch_perfect_match_on_uniform_image() {
        let img = image((50, 50, 50));
        let patch = Patch::new(0, PatchKind::Histogram, &img, Point2f::new(32.0, 32.0), 10, 1.0);
        let r = patch.response(&img, Point2f::new(32.0, 32.0));
        assert!(r < 1e-3, "expected near-zero response, got {r}");
    }

    #[test]
    fn ssd_patch_empty_intersection_returns_minus_fifty() {
        let img = image((10, 10, 10));
        let patch = Patch::new(0, PatchKind::Ssd, &img, Point2f::new(5.0, 5.0), 10, 1.0);
        let r = patch.response(&img, Point2f::new(10_000.0, 10_000.0));
        assert_eq!(r, -50.0);
    }

    #[test]
    fn push_duplicates_current_and_ages() {
        let img = image((0, 0, 0));
        let mut patch = Patch::new(0, PatchKind::Rgb, &img, Point2f::new(1.0, 1.0), 10, 1.0);
        patch.push();
        assert_eq!(patch.age(), 1);
        assert_eq!(patch.history_size(), 2);
        assert_eq!(patch.position_at(1), Some(Point2f::new(1.0, 1.0)));
    }

    #[test]
    fn push_respects_hard_limit() {
        let img = image((0, 0, 0));
        let mut patch = Patch::new(0, PatchKind::Rgb, &img, Point2f::new(1.0, 1.0), 10, 1.0);
        for _ in 0..(STATE_LIMIT + 10) {
            patch.push();
        }
        assert_eq!(patch.history_size(), STATE_LIMIT);
    }
}
