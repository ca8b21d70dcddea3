//! Packed bit-field storage
//!
//! Fixed-width unsigned values (at most 8 bits) packed LSB-first into a byte
//! buffer. Used for both height codes and per-quad material indices.

/// Bytes needed to store `count` values of `bits` width
#[inline]
pub const fn packed_len(count: usize, bits: u32) -> usize {
    (count * bits as usize).div_ceil(8)
}

/// Minimum bits to address `count` distinct values; 0 when there is at most one
#[inline]
pub const fn bits_for_count(count: usize) -> u32 {
    if count <= 1 {
        0
    } else {
        usize::BITS - (count - 1).leading_zeros()
    }
}

/// Read value `index` from a buffer packed at `bits` per value
#[inline]
pub fn read(buffer: &[u8], index: usize, bits: u32) -> u32 {
    debug_assert!(bits <= 8);
    if bits == 0 {
        return 0;
    }
    let bit = index * bits as usize;
    let byte = bit / 8;
    let shift = bit % 8;
    // A value spans at most two bytes
    let lo = buffer[byte] as u32;
    let hi = if shift + bits as usize > 8 {
        (buffer[byte + 1] as u32) << 8
    } else {
        0
    };
    ((lo | hi) >> shift) & ((1u32 << bits) - 1)
}

/// Write value `index` into a buffer packed at `bits` per value
#[inline]
pub fn write(buffer: &mut [u8], index: usize, bits: u32, value: u32) {
    debug_assert!(bits <= 8);
    if bits == 0 {
        return;
    }
    let mask = (1u32 << bits) - 1;
    debug_assert!(value <= mask, "value {} does not fit in {} bits", value, bits);
    let bit = index * bits as usize;
    let byte = bit / 8;
    let shift = bit % 8;
    let window = (mask << shift, (value & mask) << shift);

    buffer[byte] = (buffer[byte] & !(window.0 as u8)) | window.1 as u8;
    if shift + bits as usize > 8 {
        let (m, v) = ((window.0 >> 8) as u8, (window.1 >> 8) as u8);
        buffer[byte + 1] = (buffer[byte + 1] & !m) | v;
    }
}
