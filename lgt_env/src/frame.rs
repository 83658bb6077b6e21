//! Raw frame representation, the frame source seam, and colour conversion.

/// One captured video frame as an interleaved 8-bit RGB buffer.
///
/// This is the entire "image/video source layer" contract from the core's
/// point of view: a source hands over pixels, width and height, nothing
/// more. Colour-space conversion, caching, and sub-region views are a core
/// concern (see `lgt_core::image::Image`), not this crate's.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    width: u32,
    height: u32,
    /// Row-major, 3 bytes per pixel (R, G, B).
    rgb: Vec<u8>,
}

impl RawFrame {
    /// Builds a frame from an interleaved RGB buffer.
    ///
    /// Returns `None` if `rgb.len() != width * height * 3`.
    pub fn new(width: u32, height: u32, rgb: Vec<u8>) -> Option<Self> {
        if rgb.len() != (width as usize) * (height as usize) * 3 {
            return None;
        }
        Some(Self { width, height, rgb })
    }

    /// Builds a uniformly coloured frame.
    pub fn filled(width: u32, height: u32, color: (u8, u8, u8)) -> Self {
        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..(width as usize * height as usize) {
            rgb.push(color.0);
            rgb.push(color.1);
            rgb.push(color.2);
        }
        Self { width, height, rgb }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgb_buffer(&self) -> &[u8] {
        &self.rgb
    }

    pub fn rgb_buffer_mut(&mut self) -> &mut [u8] {
        &mut self.rgb
    }

    /// Reads the pixel at `(x, y)`, or `None` if out of bounds.
    pub fn pixel(&self, x: i32, y: i32) -> Option<(u8, u8, u8)> {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        Some((self.rgb[idx], self.rgb[idx + 1], self.rgb[idx + 2]))
    }

    /// Sets the pixel at `(x, y)`. No-op if out of bounds.
    pub fn set_pixel(&mut self, x: i32, y: i32, color: (u8, u8, u8)) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        self.rgb[idx] = color.0;
        self.rgb[idx + 1] = color.1;
        self.rgb[idx + 2] = color.2;
    }
}

/// The frame-source collaborator: "blocking read of next frame", returning
/// `None` on end-of-stream exactly like the source spec's `capture` → false.
pub trait FrameSource {
    /// Returns the next frame, or `None` on EOF.
    fn capture(&mut self) -> Option<RawFrame>;
}

/// A deterministic, in-memory frame source, used by `lgt_core`'s own tests
/// and by the `lgt_sim` scenario harness. Not a production backend.
pub struct MemorySource {
    frames: std::vec::IntoIter<RawFrame>,
}

impl MemorySource {
    pub fn new(frames: Vec<RawFrame>) -> Self {
        Self {
            frames: frames.into_iter(),
        }
    }
}

impl FrameSource for MemorySource {
    fn capture(&mut self) -> Option<RawFrame> {
        self.frames.next()
    }
}

/// Colour-space conversion, specified here only by precondition/postcondition:
/// given a well-formed [`RawFrame`], each method returns one plane (or
/// interleaved planes) of the requested colour space, same pixel count as
/// the input. The exact numerical conversion formulas are an external,
/// swappable concern - `lgt_core` never hard-codes one.
pub trait ColorConverter: Send + Sync {
    /// Single-channel 8-bit luma, one byte per pixel, row-major.
    fn to_grey(&self, frame: &RawFrame) -> Vec<u8>;

    /// Interleaved H, S, V bytes (each rescaled to 0..=255), row-major.
    fn to_hsv(&self, frame: &RawFrame) -> Vec<u8>;

    /// Interleaved Y, Cr, Cb bytes, row-major.
    fn to_ycrcb(&self, frame: &RawFrame) -> Vec<u8>;
}

/// Reference conversion routine (ITU-R BT.601-style luma, standard HSV/YCrCb).
///
/// Good enough to drive deterministic tests and the scenario harness; a
/// production embedder is expected to supply its own (SIMD, hardware, or
/// simply a different colour matrix) implementation of [`ColorConverter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardColorConverter;

impl ColorConverter for StandardColorConverter {
    fn to_grey(&self, frame: &RawFrame) -> Vec<u8> {
        frame
            .rgb
            .chunks_exact(3)
            .map(|p| {
                let (r, g, b) = (p[0] as f32, p[1] as f32, p[2] as f32);
                (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    fn to_hsv(&self, frame: &RawFrame) -> Vec<u8> {
        let mut out = Vec::with_capacity(frame.rgb.len());
        for p in frame.rgb.chunks_exact(3) {
            let (r, g, b) = (p[0] as f32 / 255.0, p[1] as f32 / 255.0, p[2] as f32 / 255.0);
            let max = r.max(g).max(b);
            let min = r.min(g).min(b);
            let delta = max - min;

            let h = if delta <= f32::EPSILON {
                0.0
            } else if max == r {
                60.0 * (((g - b) / delta).rem_euclid(6.0))
            } else if max == g {
                60.0 * (((b - r) / delta) + 2.0)
            } else {
                60.0 * (((r - g) / delta) + 4.0)
            };
            let s = if max <= f32::EPSILON { 0.0 } else { delta / max };
            let v = max;

            out.push(((h / 360.0) * 255.0).round().clamp(0.0, 255.0) as u8);
            out.push((s * 255.0).round().clamp(0.0, 255.0) as u8);
            out.push((v * 255.0).round().clamp(0.0, 255.0) as u8);
        }
        out
    }

    fn to_ycrcb(&self, frame: &RawFrame) -> Vec<u8> {
        let mut out = Vec::with_capacity(frame.rgb.len());
        for p in frame.rgb.chunks_exact(3) {
            let (r, g, b) = (p[0] as f32, p[1] as f32, p[2] as f32);
            let y = 0.299 * r + 0.587 * g + 0.114 * b;
            let cr = (r - y) * 0.713 + 128.0;
            let cb = (b - y) * 0.564 + 128.0;
            out.push(y.round().clamp(0.0, 255.0) as u8);
            out.push(cr.round().clamp(0.0, 255.0) as u8);
            out.push(cb.round().clamp(0.0, 255.0) as u8);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_frame_rejects_mismatched_buffer() {
        assert!(RawFrame::new(2, 2, vec![0u8; 5]).is_none());
    }

    #[test]
    fn raw_frame_pixel_roundtrip() {
        let mut f = RawFrame::filled(4, 4, (10, 20, 30));
        f.set_pixel(1, 1, (1, 2, 3));
        assert_eq!(f.pixel(1, 1), Some((1, 2, 3)));
        assert_eq!(f.pixel(0, 0), Some((10, 20, 30)));
        assert_eq!(f.pixel(-1, 0), None);
        assert_eq!(f.pixel(4, 0), None);
    }

    #[test]
    fn grey_of_white_is_white() {
        let f = RawFrame::filled(2, 2, (255, 255, 255));
        let grey = StandardColorConverter.to_grey(&f);
        assert!(grey.iter().all(|&v| v == 255));
    }

    #[test]
    fn hsv_of_pure_red() {
        let f = RawFrame::filled(1, 1, (255, 0, 0));
        let hsv = StandardColorConverter.to_hsv(&f);
        // hue 0, saturation max, value max
        assert_eq!(hsv[0], 0);
        assert_eq!(hsv[1], 255);
        assert_eq!(hsv[2], 255);
    }

    #[test]
    fn memory_source_yields_frames_then_eof() {
        let frames = vec![RawFrame::filled(1, 1, (0, 0, 0)); 2];
        let mut src = MemorySource::new(frames);
        assert!(src.capture().is_some());
        assert!(src.capture().is_some());
        assert!(src.capture().is_none());
    }
}
