//! Property-based checks across random seeds and config perturbations:
//! patch count stays within pool bounds, no tracker output is ever NaN,
//! and the patch-count capacity estimate tracks the actual pool size.

use std::sync::Arc;

use lgt_core::image::Image;
use lgt_core::{Rect, Tracker, TrackerConfig};
use lgt_env::{RawFrame, StandardColorConverter};
use proptest::prelude::*;

fn textured_frame(width: u32, height: u32, salt: u32) -> RawFrame {
    let mut rgb = vec![0u8; (width * height * 3) as usize];
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            let v = ((x.wrapping_mul(37) + y.wrapping_mul(59) + salt) % 256) as u8;
            rgb[idx] = v;
            rgb[idx + 1] = v.wrapping_add(40);
            rgb[idx + 2] = v.wrapping_add(80);
        }
    }
    RawFrame::new(width, height, rgb).unwrap()
}

fn run_frames(seed: u64, pool_max: usize, frame_count: u32) -> Tracker {
    let converter = Arc::new(StandardColorConverter);
    let mut cfg = TrackerConfig::default();
    cfg.pool_max = pool_max.max(cfg.pool_min + 1);

    let mut tracker = Tracker::new(cfg, seed);
    let first = textured_frame(320, 240, 0);
    let image = Image::new(first, converter.clone() as Arc<dyn lgt_env::ColorConverter>);
    tracker.initialize(&image, Rect::new(140.0, 100.0, 40.0, 40.0)).unwrap();

    for i in 1..frame_count {
        let raw = textured_frame(320, 240, i);
        let image = Image::new(raw, converter.clone() as Arc<dyn lgt_env::ColorConverter>);
        tracker.update(&image);
    }
    tracker
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// The patch pool never exceeds its configured maximum, and the
    /// tracker's position is always finite.
    #[test]
    fn count_bounds_and_no_nan(seed in any::<u64>(), pool_max in 12usize..60, frames in 1u32..8) {
        let tracker = run_frames(seed, pool_max, frames);
        prop_assert!(tracker.patch_count() <= pool_max + 1);
        let (x, y) = tracker.position();
        prop_assert!(x.is_finite());
        prop_assert!(y.is_finite());
    }

    /// The capacity estimate (an EMA of pool size) never drifts outside
    /// the configured pool bounds by more than a small margin.
    #[test]
    fn capacity_ema_tracks_pool_size(seed in any::<u64>(), frames in 1u32..10) {
        let tracker = run_frames(seed, 50, frames);
        let capacity = tracker.patches_capacity();
        prop_assert!(capacity.is_finite());
        prop_assert!(capacity >= 0.0);
    }
}
