//! Range quantization of height values
//!
//! Heights are stored as unsigned codes of `bits` width relative to the
//! `[min, max]` range of the block they live in. These functions are pure;
//! the height store decides which range and width apply.

/// Largest supported code width
pub const MAX_BITS_PER_SAMPLE: u32 = 8;

/// Largest code representable with `bits` bits
#[inline]
pub fn max_code(bits: u32) -> u32 {
    debug_assert!(bits <= 32);
    if bits == 0 {
        0
    } else {
        u32::MAX >> (32 - bits)
    }
}

#[inline]
fn is_degenerate(min: f32, max: f32, bits: u32) -> bool {
    bits == 0 || !(max > min)
}

/// Map `height` into `[0, 2^bits - 1]`, rounding to the nearest code
///
/// A flat range (`min == max`) or zero-width code maps everything to 0.
pub fn quantize(height: f32, min: f32, max: f32, bits: u32) -> u32 {
    if is_degenerate(min, max, bits) {
        return 0;
    }
    let top = max_code(bits);
    let t = (height - min) / (max - min);
    let code = (t * top as f32).round();
    code.clamp(0.0, top as f32) as u32
}

/// Inverse of [`quantize`]
///
/// The end codes reproduce `min` and `max` exactly so flat and extreme
/// samples survive a round trip without drift.
pub fn dequantize(code: u32, min: f32, max: f32, bits: u32) -> f32 {
    if is_degenerate(min, max, bits) || code == 0 {
        return min;
    }
    let top = max_code(bits);
    if code >= top {
        return max;
    }
    (min + (max - min) * (code as f32 / top as f32)).min(max)
}

/// Worst-case absolute reconstruction error for a range at a code width
pub fn max_error(min: f32, max: f32, bits: u32) -> f32 {
    if is_degenerate(min, max, bits) {
        return 0.0;
    }
    0.5 * (max - min) / max_code(bits) as f32
}

/// Smallest width in `[1, MAX_BITS_PER_SAMPLE]` whose error stays within `tolerance`
///
/// Degenerate ranges need no precision at all but still report 1 so callers
/// always have a usable width. When no width is precise enough the maximum
/// is returned.
pub fn min_bits_for_error(min: f32, max: f32, tolerance: f32) -> u32 {
    if !(max > min) {
        return 1;
    }
    (1..=MAX_BITS_PER_SAMPLE)
        .find(|&bits| max_error(min, max, bits) <= tolerance)
        .unwrap_or(MAX_BITS_PER_SAMPLE)
}
