//! Block addressing for the sample grid
//!
//! Blocks tile the `(N-1) x (N-1)` quads in `B x B` groups; the last block per
//! axis is partial when `N-1` is not a multiple of `B`. A block's footprint is
//! every sample its quads touch, so neighbouring footprints share one row or
//! column. Each sample is stored by exactly one block (its owner), which is
//! always a block whose footprint contains it.

use crate::bits;
use crate::error::{HeightFieldError, Result};
use std::ops::RangeInclusive;

/// Slack applied to continuous intervals before mapping them to blocks
const EDGE_PADDING: f32 = 1.0e-4;

/// Location of a sample inside its owning block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockCoord {
    pub block_x: u32,
    pub block_y: u32,
    pub local_x: u32,
    pub local_y: u32,
}

/// Grid-to-block mapping for one height field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockLayout {
    sample_count: u32,
    block_size: u32,
    blocks_per_side: u32,
}

impl BlockLayout {
    pub fn new(sample_count: u32, block_size: u32) -> Self {
        debug_assert!(sample_count >= 2 && block_size >= 1);
        Self {
            sample_count,
            block_size,
            blocks_per_side: (sample_count - 1).div_ceil(block_size),
        }
    }

    #[inline]
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    #[inline]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    #[inline]
    pub fn blocks_per_side(&self) -> u32 {
        self.blocks_per_side
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        (self.blocks_per_side * self.blocks_per_side) as usize
    }

    /// Quads per side
    #[inline]
    pub fn quad_count(&self) -> u32 {
        self.sample_count - 1
    }

    #[inline]
    pub fn block_index(&self, block_x: u32, block_y: u32) -> usize {
        (block_y * self.blocks_per_side + block_x) as usize
    }

    /// Owning block along one axis
    #[inline]
    fn owner(&self, v: u32) -> u32 {
        (v / self.block_size).min(self.blocks_per_side - 1)
    }

    /// Owning block and block-local position of a sample
    pub fn block_of(&self, x: u32, y: u32) -> BlockCoord {
        debug_assert!(x < self.sample_count && y < self.sample_count);
        let block_x = self.owner(x);
        let block_y = self.owner(y);
        BlockCoord {
            block_x,
            block_y,
            local_x: x - block_x * self.block_size,
            local_y: y - block_y * self.block_size,
        }
    }

    /// First sample and number of samples stored by a block along one axis
    ///
    /// The last block also stores the final sample row/column.
    #[inline]
    pub fn owned_span(&self, block: u32) -> (u32, u32) {
        let start = block * self.block_size;
        let end = if block + 1 == self.blocks_per_side {
            self.sample_count
        } else {
            start + self.block_size
        };
        (start, end - start)
    }

    /// Samples touched by the quads of a block along one axis
    #[inline]
    pub fn footprint(&self, block: u32) -> RangeInclusive<u32> {
        let start = block * self.block_size;
        start..=(start + self.block_size).min(self.sample_count - 1)
    }

    /// Quads covered by a block along one axis (half open)
    #[inline]
    pub fn quad_span(&self, block: u32) -> (u32, u32) {
        let start = block * self.block_size;
        (start, (start + self.block_size).min(self.quad_count()))
    }

    /// Blocks whose footprint intersects samples `[start, start + len)` along one axis
    ///
    /// Includes the block just below `start` because its footprint ends on
    /// the sample at `start` when `start` is block aligned.
    pub fn blocks_touching(&self, start: u32, len: u32) -> RangeInclusive<u32> {
        debug_assert!(len > 0);
        let first = (start.saturating_sub(1) / self.block_size).min(self.blocks_per_side - 1);
        let last = self.owner(start + len - 1);
        first..=last
    }

    /// Blocks whose quads intersect the continuous interval `[lo, hi]` along one axis
    ///
    /// The interval is widened by `EDGE_PADDING` so a coordinate lying on a
    /// block boundary selects the blocks on both sides. Returns `None` when the
    /// interval misses the grid.
    pub fn blocks_overlapping(&self, lo: f32, hi: f32) -> Option<RangeInclusive<u32>> {
        let limit = self.quad_count() as f32;
        if lo.is_nan() || hi.is_nan() {
            return None;
        }
        let (lo, hi) = (lo - EDGE_PADDING, hi + EDGE_PADDING);
        if hi < 0.0 || lo > limit {
            return None;
        }
        let first = (lo.max(0.0) / self.block_size as f32).floor() as u32;
        let last = (hi.min(limit) / self.block_size as f32).floor() as u32;
        Some(first.min(self.blocks_per_side - 1)..=last.min(self.blocks_per_side - 1))
    }

    /// Reject rectangles that leave `[0, limit)` on either axis
    pub fn check_rect(x: u32, y: u32, width: u32, height: u32, limit: u32) -> Result<()> {
        let fits = |start: u32, len: u32| start.checked_add(len).is_some_and(|end| end <= limit);
        if fits(x, width) && fits(y, height) {
            Ok(())
        } else {
            Err(HeightFieldError::RectOutOfBounds {
                x,
                y,
                width,
                height,
                limit,
            })
        }
    }
}

/// Bytes of packed code storage for a block holding `samples` non-hole samples
///
/// A block without samples allocates nothing.
#[inline]
pub fn sample_byte_size(bits_per_sample: u32, samples: usize) -> usize {
    bits::packed_len(samples, bits_per_sample)
}

/// Elements a caller buffer needs for a `width x height` rectangle at `stride`
pub fn required_len(width: u32, height: u32, stride: usize) -> usize {
    if width == 0 || height == 0 {
        0
    } else {
        (height as usize - 1) * stride + width as usize
    }
}
