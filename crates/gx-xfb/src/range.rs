/// Bytes per XFB pixel (interleaved YUYV, two bytes per pixel).
pub const XFB_BYTES_PER_PIXEL: u64 = 2;

/// Half-open byte range `[start, end)` in guest address space.
///
/// Widened to `u64` so `address + 2 * width * height` cannot wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct XfbRange {
    pub start: u64,
    pub end: u64,
}

impl XfbRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Range covered by an XFB of `width` x `height` pixels at `address`.
    pub fn from_dimensions(address: u32, width: u32, height: u32) -> Self {
        let start = address as u64;
        Self {
            start,
            end: start + XFB_BYTES_PER_PIXEL * width as u64 * height as u64,
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &XfbRange) -> bool {
        ranges_overlap(self.start, self.end, other.start, other.end)
    }

    /// `other` lies entirely inside `self`.
    pub fn contains(&self, other: &XfbRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }
}

/// Overlap test for half-open ranges `[a0, a1)` and `[b0, b1)`. Touching ranges do not overlap.
pub fn ranges_overlap(a0: u64, a1: u64, b0: u64, b1: u64) -> bool {
    a0 < b1 && b0 < a1
}
