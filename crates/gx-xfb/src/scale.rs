//! Mapping between virtual XFB coordinates and the presentation target.

/// Scales `coord` from an XFB of `last_xfb` pixels to a target of `target` pixels.
///
/// `last_xfb` of zero is treated as one.
pub fn scale_to_target(coord: i32, target: u32, last_xfb: u32) -> i32 {
    let last = last_xfb.max(1) as i64;
    (coord as i64 * target as i64 / last) as i32
}
