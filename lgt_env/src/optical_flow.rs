//! Corner detection and sparse optical flow: external image-processing
//! primitives the motion modality consumes but does not implement itself.

/// Corner/feature detection plus sparse point tracking between two grey
/// frames of identical dimensions. A production embedder typically wraps a
/// vision library (e.g. pyramidal Lucas-Kanade); `lgt_core` only assumes the
/// contract below.
pub trait OpticalFlow: Send + Sync {
    /// Detects up to `max_corners` distinctive points inside `region =
    /// (x, y, width, height)` of a grey-scale image of size `width x height`.
    fn good_features(
        &self,
        grey: &[u8],
        width: i32,
        height: i32,
        region: (i32, i32, i32, i32),
        max_corners: usize,
    ) -> Vec<(f32, f32)>;

    /// Tracks each of `points` (coordinates in `prev`) forward into `next`.
    /// `None` at index *i* means point *i* was lost.
    fn track(
        &self,
        prev: &[u8],
        next: &[u8],
        width: i32,
        height: i32,
        points: &[(f32, f32)],
    ) -> Vec<Option<(f32, f32)>>;
}

/// Deterministic reference implementation: corners are local-variance maxima
/// on a grid, tracking is a small-window SSD block match within a fixed
/// search radius. Good enough to drive the scenario harness and unit tests;
/// not tuned for production-quality tracking.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockMatchFlow {
    pub window: i32,
    pub search_radius: i32,
}

impl BlockMatchFlow {
    pub fn new(window: i32, search_radius: i32) -> Self {
        Self { window, search_radius }
    }
}

fn sample(grey: &[u8], width: i32, height: i32, x: i32, y: i32) -> i32 {
    if x < 0 || y < 0 || x >= width || y >= height {
        0
    } else {
        grey[(y * width + x) as usize] as i32
    }
}

fn local_variance(grey: &[u8], width: i32, height: i32, cx: i32, cy: i32, half: i32) -> i64 {
    let mut sum = 0i64;
    let mut sum_sq = 0i64;
    let mut n = 0i64;
    for dy in -half..=half {
        for dx in -half..=half {
            let v = sample(grey, width, height, cx + dx, cy + dy) as i64;
            sum += v;
            sum_sq += v * v;
            n += 1;
        }
    }
    if n == 0 {
        return 0;
    }
    sum_sq - (sum * sum) / n
}

impl OpticalFlow for BlockMatchFlow {
    fn good_features(
        &self,
        grey: &[u8],
        width: i32,
        height: i32,
        region: (i32, i32, i32, i32),
        max_corners: usize,
    ) -> Vec<(f32, f32)> {
        let (rx, ry, rw, rh) = region;
        let step = (self.window).max(4);
        let half = self.window / 2;
        let mut scored: Vec<((i32, i32), i64)> = Vec::new();
        let mut y = ry + half;
        while y < ry + rh {
            let mut x = rx + half;
            while x < rx + rw {
                let score = local_variance(grey, width, height, x, y, half);
                scored.push(((x, y), score));
                x += step;
            }
            y += step;
        }
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored
            .into_iter()
            .take(max_corners)
            .map(|((x, y), _)| (x as f32, y as f32))
            .collect()
    }

    fn track(
        &self,
        prev: &[u8],
        next: &[u8],
        width: i32,
        height: i32,
        points: &[(f32, f32)],
    ) -> Vec<Option<(f32, f32)>> {
        let half = self.window / 2;
        points
            .iter()
            .map(|&(px, py)| {
                let cx = px.round() as i32;
                let cy = py.round() as i32;
                let mut best: Option<((i32, i32), i64)> = None;
                for dy in -self.search_radius..=self.search_radius {
                    for dx in -self.search_radius..=self.search_radius {
                        let tx = cx + dx;
                        let ty = cy + dy;
                        let mut ssd = 0i64;
                        for wy in -half..=half {
                            for wx in -half..=half {
                                let a = sample(prev, width, height, cx + wx, cy + wy);
                                let b = sample(next, width, height, tx + wx, ty + wy);
                                let d = (a - b) as i64;
                                ssd += d * d;
                            }
                        }
                        if best.map(|(_, s)| ssd < s).unwrap_or(true) {
                            best = Some(((tx, ty), ssd));
                        }
                    }
                }
                best.map(|((x, y), _)| (x as f32, y as f32))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stationary_texture_tracks_to_same_point() {
        let width = 20;
        let height = 20;
        let mut grey = vec![50u8; (width * height) as usize];
        for y in 8..12 {
            for x in 8..12 {
                grey[(y * width + x) as usize] = 200;
            }
        }
        let flow = BlockMatchFlow::new(5, 3);
        let corners = flow.good_features(&grey, width, height, (0, 0, width, height), 4);
        assert!(!corners.is_empty());
        let tracked = flow.track(&grey, &grey, width, height, &corners);
        for (orig, moved) in corners.iter().zip(tracked.iter()) {
            let (mx, my) = moved.unwrap();
            assert!((mx - orig.0).abs() < 1.0);
            assert!((my - orig.1).abs() < 1.0);
        }
    }
}
