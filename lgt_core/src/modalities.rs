//! Multi-modal probability cues whose pointwise product drives patch
//! addition.
//!
//! Grounded on `modalities.h` (base `Modality`/aggregating `Modalities`),
//! `color.cpp` (FG/BG 3-D histogram, Bayesian mix), `shape.cpp` (convex-hull
//! persistence image and the bounding-box indicator), and `motion.cpp`
//! (Lucas-Kanade consensus map). Corner detection and optical flow proper
//! are reached through `lgt_env::OpticalFlow`; everything else here -
//! histogram accumulation, the Bayesian ratio, hull rasterisation, consensus
//! scoring - is owned by the core.

use std::collections::VecDeque;

use lgt_env::OpticalFlow;

use crate::geometry::{self, Point2f, Rect};
use crate::image::Image;

/// A window of the image, described in the same coordinate space as
/// `Image`: `(origin_x, origin_y, width, height)`.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A per-pixel probability map over a [`Window`], row-major, `width*height`
/// entries.
#[derive(Debug, Clone)]
pub struct ProbabilityMap {
    pub window: Window,
    pub values: Vec<f32>,
}

impl ProbabilityMap {
    pub fn zeros(window: Window) -> Self {
        Self {
            values: vec![0.0; (window.width.max(0) * window.height.max(0)) as usize],
            window,
        }
    }

    pub fn uniform(window: Window) -> Self {
        let n = (window.width.max(0) * window.height.max(0)).max(1) as f32;
        Self {
            values: vec![1.0 / n; (window.width.max(0) * window.height.max(0)) as usize],
            window,
        }
    }

    pub fn normalize(&mut self) {
        let sum: f32 = self.values.iter().sum();
        if sum > 0.0 {
            for v in &mut self.values {
                *v /= sum;
            }
        }
    }

    fn multiply_in_place(&mut self, other: &ProbabilityMap) {
        debug_assert_eq!(self.values.len(), other.values.len());
        for (a, b) in self.values.iter_mut().zip(other.values.iter()) {
            *a *= b;
        }
    }
}

/// One probability-producing cue. Mirrors `modalities.h`'s `Modality` base:
/// `flush` clears persistent state, `update` ingests the current frame, and
/// `probability` renders a map over a window once `usable()`.
pub trait Modality {
    fn flush(&mut self);
    fn update(&mut self, image: &Image, reliable: &[(Point2f, f32)], bounds: Rect);
    fn usable(&self) -> bool;
    fn probability(&self, image: &Image, window: Window) -> ProbabilityMap;
}

// ---------------------------------------------------------------------
// Colour 3-D histogram
// ---------------------------------------------------------------------

const COLOR_BINS: usize = 8;

fn bin_index(h: u8, s: u8, v: u8) -> usize {
    let hb = (h as usize * COLOR_BINS) / 256;
    let sb = (s as usize * COLOR_BINS) / 256;
    let vb = (v as usize * COLOR_BINS) / 256;
    (hb * COLOR_BINS + sb) * COLOR_BINS + vb
}

pub struct ColorHistogramModality {
    foreground_size: f32,
    background_margin: f32,
    background_size: f32,
    fg_persistence: f32,
    bg_persistence: f32,
    fg_hist: Option<Vec<f32>>,
    bg_hist: Option<Vec<f32>>,
    apriori: f32,
}

impl ColorHistogramModality {
    pub fn new(
        foreground_size: f32,
        background_margin: f32,
        background_size: f32,
        fg_persistence: f32,
        bg_persistence: f32,
    ) -> Self {
        Self {
            foreground_size,
            background_margin,
            background_size,
            fg_persistence,
            bg_persistence,
            fg_hist: None,
            bg_hist: None,
            apriori: 0.5,
        }
    }

    fn accumulate_disc(image: &Image, center: Point2f, radius: f32, hist: &mut [f32]) {
        let r = radius.ceil() as i32;
        let cx = center.x.round() as i32;
        let cy = center.y.round() as i32;
        for dy in -r..=r {
            for dx in -r..=r {
                if ((dx * dx + dy * dy) as f32) > radius * radius {
                    continue;
                }
                if let Some((h, s, v)) = image.get_hsv(cx + dx, cy + dy) {
                    hist[bin_index(h, s, v)] += 1.0;
                }
            }
        }
    }

    fn accumulate_ring(image: &Image, bounds: Rect, inner: f32, outer: f32, hist: &mut [f32]) {
        let x0 = (bounds.x - outer).floor() as i32;
        let y0 = (bounds.y - outer).floor() as i32;
        let x1 = (bounds.x + bounds.width + outer).ceil() as i32;
        let y1 = (bounds.y + bounds.height + outer).ceil() as i32;
        let inner_rect = bounds.expanded(inner);
        let outer_rect = bounds.expanded(outer);
        for y in y0..y1 {
            for x in x0..x1 {
                let p = Point2f::new(x as f32, y as f32);
                if outer_rect.contains_point(p) && !inner_rect.contains_point(p) {
                    if let Some((h, s, v)) = image.get_hsv(x, y) {
                        hist[bin_index(h, s, v)] += 1.0;
                    }
                }
            }
        }
    }

    fn mix(previous: &Option<Vec<f32>>, fresh: Vec<f32>, persistence: f32) -> Vec<f32> {
        match previous {
            Some(prev) => prev
                .iter()
                .zip(fresh.iter())
                .map(|(&p, &n)| persistence * p + (1.0 - persistence) * n)
                .collect(),
            None => fresh,
        }
    }
}

impl Modality for ColorHistogramModality {
    fn flush(&mut self) {
        self.fg_hist = None;
        self.bg_hist = None;
    }

    fn update(&mut self, image: &Image, reliable: &[(Point2f, f32)], bounds: Rect) {
        let n_bins = COLOR_BINS * COLOR_BINS * COLOR_BINS;
        let mut fg_fresh = vec![0.0f32; n_bins];
        let patch_radius = bounds.width.max(bounds.height) / 2.0 / self.foreground_size.max(1.0).sqrt();
        for (p, _w) in reliable {
            Self::accumulate_disc(image, *p, self.foreground_size * patch_radius.max(1.0), &mut fg_fresh);
        }
        let mut bg_fresh = vec![0.0f32; n_bins];
        Self::accumulate_ring(
            image,
            bounds,
            self.background_margin,
            self.background_margin + self.background_size,
            &mut bg_fresh,
        );

        self.fg_hist = Some(Self::mix(&self.fg_hist, fg_fresh, self.fg_persistence));
        self.bg_hist = Some(Self::mix(&self.bg_hist, bg_fresh, self.bg_persistence));

        let area_img = (image.width() * image.height()) as f32;
        self.apriori = if area_img > 0.0 {
            (bounds.area() / area_img).clamp(1e-4, 1.0 - 1e-4)
        } else {
            0.5
        };
    }

    fn usable(&self) -> bool {
        self.fg_hist.is_some() && self.bg_hist.is_some()
    }

    fn probability(&self, image: &Image, window: Window) -> ProbabilityMap {
        let mut map = ProbabilityMap::zeros(window);
        let (Some(fg), Some(bg)) = (&self.fg_hist, &self.bg_hist) else {
            return map;
        };
        let fg_sum: f32 = fg.iter().sum();
        let bg_sum: f32 = bg.iter().sum();
        if fg_sum <= 0.0 && bg_sum <= 0.0 {
            return map;
        }
        let pi = self.apriori;
        for j in 0..window.height {
            for i in 0..window.width {
                let x = window.x + i;
                let y = window.y + j;
                if let Some((h, s, v)) = image.get_hsv(x, y) {
                    let idx = bin_index(h, s, v);
                    let ofd = if fg_sum > 0.0 { fg[idx] / fg_sum } else { 0.0 };
                    let obd = if bg_sum > 0.0 { bg[idx] / bg_sum } else { 0.0 };
                    let numer = pi * ofd;
                    let denom = numer + (1.0 - pi) * obd;
                    let p = if denom > 0.0 { numer / denom } else { 0.0 };
                    map.values[(j * window.width + i) as usize] = p;
                }
            }
        }
        map.normalize();
        map
    }
}

// ---------------------------------------------------------------------
// Convex hull shape
// ---------------------------------------------------------------------

pub struct ConvexHullModality {
    margin: f32,
    margin_diminish: f32,
    persistence: f32,
    history: Vec<f32>,
    history_dims: (i32, i32),
    has_hull: bool,
}

impl ConvexHullModality {
    pub fn new(margin: f32, margin_diminish: f32, persistence: f32) -> Self {
        Self {
            margin,
            margin_diminish,
            persistence,
            history: Vec::new(),
            history_dims: (0, 0),
            has_hull: false,
        }
    }

    fn ensure_dims(&mut self, width: i32, height: i32) {
        if self.history_dims != (width, height) {
            self.history = vec![0.0; (width * height) as usize];
            self.history_dims = (width, height);
        }
    }

    fn point_in_hull(p: Point2f, hull: &[Point2f]) -> bool {
        if hull.len() < 3 {
            return false;
        }
        let mut sign = 0i32;
        for i in 0..hull.len() {
            let a = hull[i];
            let b = hull[(i + 1) % hull.len()];
            let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
            if cross.abs() < f32::EPSILON {
                continue;
            }
            let s = if cross > 0.0 { 1 } else { -1 };
            if sign == 0 {
                sign = s;
            } else if s != sign {
                return false;
            }
        }
        true
    }
}

impl Modality for ConvexHullModality {
    fn flush(&mut self) {
        self.history.clear();
        self.history_dims = (0, 0);
        self.has_hull = false;
    }

    fn update(&mut self, image: &Image, reliable: &[(Point2f, f32)], _bounds: Rect) {
        self.ensure_dims(image.width(), image.height());
        if reliable.len() < 3 {
            self.has_hull = false;
            return;
        }
        let points: Vec<Point2f> = reliable.iter().map(|(p, _)| *p).collect();
        let hull = geometry::convex_hull(&points);
        let centroid = Point2f::from(
            points.iter().fold(nalgebra::Vector2::zeros(), |acc, p| acc + p.coords) / points.len() as f32,
        );
        let inner_hull = hull.clone();
        let outer_hull = geometry::expand_hull(&hull, centroid, self.margin);

        let (w, h) = self.history_dims;
        let mut temp = vec![0.0f32; (w * h) as usize];
        for y in 0..h {
            for x in 0..w {
                let p = Point2f::new(x as f32, y as f32);
                let value = if Self::point_in_hull(p, &inner_hull) {
                    1.0
                } else if Self::point_in_hull(p, &outer_hull) {
                    1.0 - self.margin_diminish
                } else {
                    0.0
                };
                temp[(y * w + x) as usize] = value;
            }
        }

        for (h_val, t_val) in self.history.iter_mut().zip(temp.iter()) {
            *h_val = *h_val * self.persistence + t_val * (1.0 - self.persistence);
        }
        self.has_hull = true;
    }

    fn usable(&self) -> bool {
        self.has_hull
    }

    fn probability(&self, _image: &Image, window: Window) -> ProbabilityMap {
        let mut map = ProbabilityMap::zeros(window);
        let (w, _h) = self.history_dims;
        if w == 0 {
            return map;
        }
        for j in 0..window.height {
            for i in 0..window.width {
                let x = window.x + i;
                let y = window.y + j;
                if x >= 0 && y >= 0 && x < self.history_dims.0 && y < self.history_dims.1 {
                    map.values[(j * window.width + i) as usize] = self.history[(y * w + x) as usize];
                }
            }
        }
        map.normalize();
        map
    }
}

// ---------------------------------------------------------------------
// Lucas-Kanade motion consensus
// ---------------------------------------------------------------------

pub struct MotionLkModality<F: OpticalFlow> {
    flow: F,
    step: usize,
    damping: f32,
    persistence: f32,
    max_corners: usize,
    grey_history: VecDeque<Vec<u8>>,
    dims: (i32, i32),
    motion_history: VecDeque<(f32, f32)>,
    map: Vec<f32>,
}

impl<F: OpticalFlow> MotionLkModality<F> {
    pub fn new(flow: F, step: usize, damping: f32, persistence: f32, max_corners: usize) -> Self {
        Self {
            flow,
            step,
            damping,
            persistence,
            max_corners,
            grey_history: VecDeque::with_capacity(2),
            dims: (0, 0),
            motion_history: VecDeque::with_capacity(2),
            map: Vec::new(),
        }
    }

    fn grey_plane(image: &Image) -> Vec<u8> {
        let (w, h) = (image.width(), image.height());
        let mut out = vec![0u8; (w * h) as usize];
        for y in 0..h {
            for x in 0..w {
                out[(y * w + x) as usize] = image.get_grey(x, y).unwrap_or(0);
            }
        }
        out
    }

    fn gaussian_blur(values: &mut [f32], width: i32, height: i32, side: i32) {
        let half = side / 2;
        let src = values.to_vec();
        let sigma = side as f32 / 3.0;
        let mut kernel = vec![0.0f32; (2 * half + 1) as usize];
        let mut ksum = 0.0;
        for (k, item) in kernel.iter_mut().enumerate() {
            let d = k as i32 - half;
            *item = (-((d * d) as f32) / (2.0 * sigma * sigma)).exp();
            ksum += *item;
        }
        for k in &mut kernel {
            *k /= ksum;
        }
        let mut tmp = vec![0.0f32; src.len()];
        for y in 0..height {
            for x in 0..width {
                let mut acc = 0.0;
                for (k, &kv) in kernel.iter().enumerate() {
                    let sx = (x + k as i32 - half).clamp(0, width - 1);
                    acc += src[(y * width + sx) as usize] * kv;
                }
                tmp[(y * width + x) as usize] = acc;
            }
        }
        for x in 0..width {
            for y in 0..height {
                let mut acc = 0.0;
                for (k, &kv) in kernel.iter().enumerate() {
                    let sy = (y + k as i32 - half).clamp(0, height - 1);
                    acc += tmp[(sy * width + x) as usize] * kv;
                }
                values[(y * width + x) as usize] = acc;
            }
        }
    }
}

impl<F: OpticalFlow> Modality for MotionLkModality<F> {
    fn flush(&mut self) {
        self.grey_history.clear();
        self.motion_history.clear();
        self.map.clear();
        self.dims = (0, 0);
    }

    fn update(&mut self, image: &Image, reliable: &[(Point2f, f32)], bounds: Rect) {
        let (w, h) = (image.width(), image.height());
        self.dims = (w, h);
        let grey = Self::grey_plane(image);

        if let Some(prev) = self.grey_history.back() {
            let region = (
                bounds.x.floor() as i32,
                bounds.y.floor() as i32,
                bounds.width.ceil() as i32,
                bounds.height.ceil() as i32,
            );
            let corners = self.flow.good_features(prev, w, h, region, self.max_corners);
            let tracked = self.flow.track(prev, &grey, w, h, &corners);

            let reference_motion: (f32, f32) = {
                let n = self.motion_history.len().min(self.step).max(1) as f32;
                let sum = self
                    .motion_history
                    .iter()
                    .rev()
                    .take(self.step)
                    .fold((0.0, 0.0), |acc, m| (acc.0 + m.0, acc.1 + m.1));
                (sum.0 / n, sum.1 / n)
            };

            if self.map.len() != (w * h) as usize {
                self.map = vec![0.0; (w * h) as usize];
            }
            let mut temp = vec![0.0f32; (w * h) as usize];
            let mut dx_sum = 0.0;
            let mut dy_sum = 0.0;
            let mut n_tracked = 0.0;
            for (corner, moved) in corners.iter().zip(tracked.iter()) {
                if let Some((mx, my)) = moved {
                    let motion = (mx - corner.0, my - corner.1);
                    dx_sum += motion.0;
                    dy_sum += motion.1;
                    n_tracked += 1.0;
                    let dref = ((motion.0 - reference_motion.0).powi(2) + (motion.1 - reference_motion.1).powi(2)).sqrt();
                    let score = (-dref / self.damping.max(1e-3)).exp();
                    let cx = corner.0.round() as i32;
                    let cy = corner.1.round() as i32;
                    if cx >= 0 && cy >= 0 && cx < w && cy < h {
                        temp[(cy * w + cx) as usize] = score;
                    }
                }
            }
            if n_tracked > 0.0 {
                self.motion_history.push_back((dx_sum / n_tracked, dy_sum / n_tracked));
                if self.motion_history.len() > 2 {
                    self.motion_history.pop_front();
                }
            }

            for (m, t) in self.map.iter_mut().zip(temp.iter()) {
                *m = *m * self.persistence + t * (1.0 - self.persistence);
            }
            Self::gaussian_blur(&mut self.map, w, h, 55.min(w.min(h)).max(3) | 1);
        }

        self.grey_history.push_back(grey);
        if self.grey_history.len() > 2 {
            self.grey_history.pop_front();
        }
        let _ = reliable;
    }

    fn usable(&self) -> bool {
        self.grey_history.len() >= 2
    }

    fn probability(&self, _image: &Image, window: Window) -> ProbabilityMap {
        let mut map = ProbabilityMap::zeros(window);
        if self.map.is_empty() {
            return map;
        }
        let (w, h) = self.dims;
        for j in 0..window.height {
            for i in 0..window.width {
                let x = window.x + i;
                let y = window.y + j;
                if x >= 0 && y >= 0 && x < w && y < h {
                    map.values[(j * window.width + i) as usize] = self.map[(y * w + x) as usize];
                }
            }
        }
        map.normalize();
        map
    }
}

// ---------------------------------------------------------------------
// Bounding box
// ---------------------------------------------------------------------

pub struct BoundingModality {
    expand: f32,
    last_bounds: Option<Rect>,
}

impl BoundingModality {
    pub fn new(expand: f32) -> Self {
        Self {
            expand,
            last_bounds: None,
        }
    }
}

impl Modality for BoundingModality {
    fn flush(&mut self) {
        self.last_bounds = None;
    }

    fn update(&mut self, _image: &Image, _reliable: &[(Point2f, f32)], bounds: Rect) {
        self.last_bounds = Some(bounds.expanded(self.expand));
    }

    fn usable(&self) -> bool {
        self.last_bounds.is_some()
    }

    fn probability(&self, _image: &Image, window: Window) -> ProbabilityMap {
        let mut map = ProbabilityMap::zeros(window);
        let Some(bounds) = self.last_bounds else {
            return map;
        };
        for j in 0..window.height {
            for i in 0..window.width {
                let x = window.x + i;
                let y = window.y + j;
                if bounds.contains_point(Point2f::new(x as f32, y as f32)) {
                    map.values[(j * window.width + i) as usize] = 1.0;
                }
            }
        }
        map.normalize();
        map
    }
}

// ---------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------

/// Ordered list of cues; `update` drives every modality, `probability_product`
/// fuses their usable maps by pointwise product.
pub struct Modalities {
    cues: Vec<Box<dyn Modality>>,
}

impl Modalities {
    pub fn new(cues: Vec<Box<dyn Modality>>) -> Self {
        Self { cues }
    }

    pub fn update(&mut self, image: &Image, reliable: &[(Point2f, f32)], bounds: Rect) {
        for cue in &mut self.cues {
            cue.update(image, reliable, bounds);
        }
    }

    pub fn flush(&mut self) {
        for cue in &mut self.cues {
            cue.flush();
        }
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// The fused probability map over `window`: start uniform, multiply in
    /// every usable cue's map; `0` everywhere if no cue contributed.
    pub fn probability_product(&self, image: &Image, window: Window) -> ProbabilityMap {
        let mut product = ProbabilityMap::uniform(window);
        let mut any = false;
        for cue in &self.cues {
            if cue.usable() {
                let map = cue.probability(image, window);
                product.multiply_in_place(&map);
                any = true;
            }
        }
        if !any {
            for v in &mut product.values {
                *v = 0.0;
            }
        }
        product
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lgt_env::{BlockMatchFlow, RawFrame, StandardColorConverter};
    use std::sync::Arc;

    fn image(color: (u8, u8, u8)) -> Image {
        Image::new(RawFrame::filled(64, 64, color), Arc::new(StandardColorConverter))
    }

    #[test]
    fn bounding_modality_indicator_sums_to_one() {
        let img = image((10, 10, 10));
        let mut m = BoundingModality::new(0.0);
        let bounds = Rect::new(10.0, 10.0, 20.0, 20.0);
        m.update(&img, &[], bounds);
        assert!(m.usable());
        let map = m.probability(
            &img,
            Window {
                x: 0,
                y: 0,
                width: 64,
                height: 64,
            },
        );
        let sum: f32 = map.values.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn convex_hull_requires_three_points() {
        let img = image((10, 10, 10));
        let mut m = ConvexHullModality::new(5.0, 0.5, 0.8);
        m.update(&img, &[(Point2f::new(1.0, 1.0), 1.0), (Point2f::new(2.0, 2.0), 1.0)], Rect::default());
        assert!(!m.usable());
    }

    #[test]
    fn color_histogram_needs_both_sides_before_usable() {
        let img = image((128, 64, 32));
        let mut m = ColorHistogramModality::new(1.5, 5.0, 20.0, 0.9, 0.9);
        assert!(!m.usable());
        m.update(
            &img,
            &[(Point2f::new(32.0, 32.0), 1.0)],
            Rect::new(20.0, 20.0, 24.0, 24.0),
        );
        assert!(m.usable());
    }

    #[test]
    fn modalities_product_is_zero_when_nothing_usable() {
        let img = image((5, 5, 5));
        let agg = Modalities::new(vec![Box::new(BoundingModality::new(0.0))]);
        let map = agg.probability_product(
            &img,
            Window {
                x: 0,
                y: 0,
                width: 8,
                height: 8,
            },
        );
        assert!(map.values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn motion_modality_usable_after_two_frames() {
        let img1 = image((60, 60, 60));
        let img2 = image((60, 60, 60));
        let mut m = MotionLkModality::new(BlockMatchFlow::new(5, 3), 2, 20.0, 0.7, 10);
        assert!(!m.usable());
        m.update(&img1, &[], Rect::new(0.0, 0.0, 60.0, 60.0));
        assert!(!m.usable());
        m.update(&img2, &[], Rect::new(0.0, 0.0, 60.0, 60.0));
        assert!(m.usable());
    }
}
