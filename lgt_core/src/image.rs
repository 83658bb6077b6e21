//! Lazy, cached multi-format snapshot of one frame.
//!
//! Grounded on the teacher's per-frame cache-ownership idiom in
//! `godview_space`'s grid cells: a value computed once per tick is stored
//! behind a `RefCell` and reused for the rest of that tick rather than
//! recomputed on every read.

use std::cell::RefCell;
use std::sync::Arc;

use lgt_env::{ColorConverter, RawFrame};

/// The colour-space formats the core ever asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Grey,
    Rgb,
    Hsv,
    YCrCb,
}

/// One frame, with on-demand cached conversions into the other formats.
///
/// Requesting a format the first time triggers a conversion through the
/// injected [`ColorConverter`]; subsequent requests in the same frame reuse
/// the cached plane. A sub-region view shares the same cached planes and
/// carries an `offset` relative to the full frame, so patch/modality code
/// that asks for a window doesn't need to know whether it's looking at the
/// whole frame or a crop.
pub struct Image {
    raw: RawFrame,
    converter: Arc<dyn ColorConverter>,
    grey: RefCell<Option<Arc<Vec<u8>>>>,
    hsv: RefCell<Option<Arc<Vec<u8>>>>,
    ycrcb: RefCell<Option<Arc<Vec<u8>>>>,
    offset: (i32, i32),
}

impl Image {
    pub fn new(raw: RawFrame, converter: Arc<dyn ColorConverter>) -> Self {
        Self {
            raw,
            converter,
            grey: RefCell::new(None),
            hsv: RefCell::new(None),
            ycrcb: RefCell::new(None),
            offset: (0, 0),
        }
    }

    pub fn width(&self) -> i32 {
        self.raw.width() as i32
    }

    pub fn height(&self) -> i32 {
        self.raw.height() as i32
    }

    /// Offset of this view's origin relative to the full captured frame.
    pub fn offset(&self) -> (i32, i32) {
        self.offset
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width() && y < self.height()
    }

    fn cached(&self, format: PixelFormat) -> Arc<Vec<u8>> {
        let cell = match format {
            PixelFormat::Grey => &self.grey,
            PixelFormat::Hsv => &self.hsv,
            PixelFormat::YCrCb => &self.ycrcb,
            PixelFormat::Rgb => unreachable!("rgb is never cached, it's the source buffer"),
        };
        if let Some(existing) = cell.borrow().as_ref() {
            return existing.clone();
        }
        let computed = Arc::new(match format {
            PixelFormat::Grey => self.converter.to_grey(&self.raw),
            PixelFormat::Hsv => self.converter.to_hsv(&self.raw),
            PixelFormat::YCrCb => self.converter.to_ycrcb(&self.raw),
            PixelFormat::Rgb => unreachable!(),
        });
        *cell.borrow_mut() = Some(computed.clone());
        computed
    }

    /// Grey value at `(x, y)`, or `None` if out of bounds.
    pub fn get_grey(&self, x: i32, y: i32) -> Option<u8> {
        if !self.contains(x, y) {
            return None;
        }
        let plane = self.cached(PixelFormat::Grey);
        Some(plane[(y * self.width() + x) as usize])
    }

    /// RGB value at `(x, y)`, or `None` if out of bounds.
    pub fn get_rgb(&self, x: i32, y: i32) -> Option<(u8, u8, u8)> {
        self.raw.pixel(x, y)
    }

    /// HSV value at `(x, y)` (each channel 0..=255), or `None` if out of bounds.
    pub fn get_hsv(&self, x: i32, y: i32) -> Option<(u8, u8, u8)> {
        if !self.contains(x, y) {
            return None;
        }
        let plane = self.cached(PixelFormat::Hsv);
        let idx = ((y * self.width() + x) * 3) as usize;
        Some((plane[idx], plane[idx + 1], plane[idx + 2]))
    }

    /// YCrCb value at `(x, y)`, or `None` if out of bounds.
    pub fn get_ycrcb(&self, x: i32, y: i32) -> Option<(u8, u8, u8)> {
        if !self.contains(x, y) {
            return None;
        }
        let plane = self.cached(PixelFormat::YCrCb);
        let idx = ((y * self.width() + x) * 3) as usize;
        Some((plane[idx], plane[idx + 1], plane[idx + 2]))
    }

    /// A cropped view sharing this image's pixel data conceptually, but
    /// materialised eagerly (our frames are small enough that this is
    /// simpler than a truly zero-copy crop, and it keeps the cache
    /// invariant - one `RefCell` per format - intact for the sub-view).
    pub fn sub_region(&self, x: i32, y: i32, width: i32, height: i32) -> Image {
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + width).min(self.width());
        let y1 = (y + height).min(self.height());
        let w = (x1 - x0).max(0) as u32;
        let h = (y1 - y0).max(0) as u32;

        let mut rgb = Vec::with_capacity((w * h * 3) as usize);
        for yy in y0..y1 {
            for xx in x0..x1 {
                let (r, g, b) = self.get_rgb(xx, yy).unwrap_or((0, 0, 0));
                rgb.push(r);
                rgb.push(g);
                rgb.push(b);
            }
        }
        let raw = RawFrame::new(w, h, rgb).unwrap_or_else(|| RawFrame::filled(1, 1, (0, 0, 0)));
        let mut sub = Image::new(raw, self.converter.clone());
        sub.offset = (self.offset.0 + x0, self.offset.1 + y0);
        sub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lgt_env::StandardColorConverter;

    fn test_image() -> Image {
        let raw = RawFrame::filled(4, 4, (200, 100, 50));
        Image::new(raw, Arc::new(StandardColorConverter))
    }

    #[test]
    fn grey_is_cached_across_calls() {
        let img = test_image();
        let a = img.get_grey(1, 1).unwrap();
        let b = img.get_grey(2, 2).unwrap();
        assert_eq!(a, b); // uniform image
        assert!(img.grey.borrow().is_some());
    }

    #[test]
    fn out_of_bounds_is_none() {
        let img = test_image();
        assert_eq!(img.get_grey(-1, 0), None);
        assert_eq!(img.get_rgb(10, 10), None);
    }

    #[test]
    fn sub_region_carries_offset() {
        let img = test_image();
        let sub = img.sub_region(1, 1, 2, 2);
        assert_eq!(sub.offset(), (1, 1));
        assert_eq!(sub.width(), 2);
        assert_eq!(sub.height(), 2);
    }
}
