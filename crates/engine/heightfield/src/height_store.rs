//! Quantized height storage
//!
//! Heights are kept in grid-local units, range-quantized per block at one
//! global code width. Each block stores its `[min, max]` (taken over its
//! footprint) and a packed code for every non-hole sample it owns; holes are
//! tracked in a separate bitmap and never consume code space.
//!
//! A grid without a single collidable sample stores nothing at all.

use crate::bits;
use crate::error::Result;
use crate::layout::{self, BlockLayout};
use crate::quantize::{dequantize, min_bits_for_error, quantize};
use crate::scratch::ScratchAllocator;
use std::mem;

/// Height value marking a sample without collision
pub const NO_COLLISION_VALUE: f32 = f32::MAX;

/// Largest supported block size
pub const MAX_BLOCK_SIZE: u32 = 8;

/// Samples in the largest possible footprint (or owned area) of a block
pub(crate) const MAX_BLOCK_SAMPLES: usize = ((MAX_BLOCK_SIZE + 1) * (MAX_BLOCK_SIZE + 1)) as usize;

#[inline]
pub fn is_no_collision(height: f32) -> bool {
    height == NO_COLLISION_VALUE
}

/// One quantization block
#[derive(Clone, Debug)]
struct RangeBlock {
    /// Lowest non-hole footprint height; greater than `max` when there is none
    min: f32,
    max: f32,
    /// Packed codes of the owned non-hole samples, block-local row-major
    codes: Vec<u8>,
}

impl Default for RangeBlock {
    fn default() -> Self {
        Self {
            min: f32::MAX,
            max: f32::MIN,
            codes: Vec::new(),
        }
    }
}

impl RangeBlock {
    #[inline]
    fn has_range(&self) -> bool {
        self.min <= self.max
    }
}

/// Fold the non-hole heights of a block footprint into a `(min, max)` pair
fn footprint_range(layout: &BlockLayout, bx: u32, by: u32, value: &impl Fn(u32, u32) -> f32) -> (f32, f32) {
    let mut range = (f32::MAX, f32::MIN);
    for y in layout.footprint(by) {
        for x in layout.footprint(bx) {
            let h = value(x, y);
            if !is_no_collision(h) {
                range = (range.0.min(h), range.1.max(h));
            }
        }
    }
    range
}

/// Quantized height buffer for a square sample grid
#[derive(Clone, Debug)]
pub struct HeightStore {
    layout: BlockLayout,
    bits_per_sample: u32,
    /// Empty when every sample is a hole
    blocks: Vec<RangeBlock>,
    /// One bit per sample, set for holes; allocated together with `blocks`
    holes: Vec<u64>,
}

impl HeightStore {
    /// Quantize `heights` (grid-local, row-major, `N * N`) at `bits_per_sample`
    pub fn build(layout: BlockLayout, heights: &[f32], bits_per_sample: u32) -> Self {
        let n = layout.sample_count() as usize;
        debug_assert_eq!(heights.len(), n * n);

        let mut store = Self {
            layout,
            bits_per_sample,
            blocks: Vec::new(),
            holes: Vec::new(),
        };

        if heights.iter().all(|&h| is_no_collision(h)) {
            return store;
        }

        store.blocks = vec![RangeBlock::default(); layout.block_count()];
        store.holes = vec![0; (n * n).div_ceil(64)];

        let value = |x: u32, y: u32| heights[y as usize * n + x as usize];
        for by in 0..layout.blocks_per_side() {
            for bx in 0..layout.blocks_per_side() {
                store.encode_block(bx, by, &value);
            }
        }
        store
    }

    /// Smallest code width keeping every block's reconstruction error within `tolerance`
    ///
    /// `heights` are grid-local. Flat or fully-hole grids report 1.
    pub fn bits_for_error(layout: &BlockLayout, heights: &[f32], tolerance: f32) -> u32 {
        let n = layout.sample_count() as usize;
        let value = |x: u32, y: u32| heights[y as usize * n + x as usize];
        let mut bits = 1;
        for by in 0..layout.blocks_per_side() {
            for bx in 0..layout.blocks_per_side() {
                let (min, max) = footprint_range(layout, bx, by, &value);
                if min <= max {
                    bits = bits.max(min_bits_for_error(min, max, tolerance));
                }
            }
        }
        bits
    }

    #[inline]
    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    #[inline]
    /// Width of the stored codes; 1 while no sample has collision
    ///
    /// The width requested at build time is kept for the first edit that adds
    /// collision.
    pub fn bits_per_sample(&self) -> u32 {
        if self.is_empty() {
            1
        } else {
            self.bits_per_sample
        }
    }

    /// True when no sample has collision and no storage is allocated
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[inline]
    fn sample_index(&self, x: u32, y: u32) -> usize {
        y as usize * self.layout.sample_count() as usize + x as usize
    }

    #[inline]
    fn hole_bit(&self, x: u32, y: u32) -> bool {
        let i = self.sample_index(x, y);
        self.holes[i / 64] & (1u64 << (i % 64)) != 0
    }

    #[inline]
    fn set_hole_bit(&mut self, x: u32, y: u32, hole: bool) {
        let i = self.sample_index(x, y);
        let mask = 1u64 << (i % 64);
        if hole {
            self.holes[i / 64] |= mask;
        } else {
            self.holes[i / 64] &= !mask;
        }
    }

    /// Whether sample `(x, y)` has no collision
    pub fn is_hole(&self, x: u32, y: u32) -> bool {
        assert!(
            x < self.layout.sample_count() && y < self.layout.sample_count(),
            "sample ({}, {}) outside {}x{} grid",
            x,
            y,
            self.layout.sample_count(),
            self.layout.sample_count()
        );
        self.is_empty() || self.hole_bit(x, y)
    }

    /// Whether all four corners of quad `(x, y)` have collision
    pub fn is_quad_solid(&self, x: u32, y: u32) -> bool {
        !(self.is_hole(x, y) || self.is_hole(x + 1, y) || self.is_hole(x, y + 1) || self.is_hole(x + 1, y + 1))
    }

    /// Decoded grid-local height of one sample, or [`NO_COLLISION_VALUE`]
    pub fn sample(&self, x: u32, y: u32) -> f32 {
        if self.is_hole(x, y) {
            return NO_COLLISION_VALUE;
        }
        let coord = self.layout.block_of(x, y);
        let (start_x, owned_w) = self.layout.owned_span(coord.block_x);
        let (start_y, _) = self.layout.owned_span(coord.block_y);

        // Rank of the sample among the block's stored codes
        let mut rank = 0;
        for ly in 0..=coord.local_y {
            let row_end = if ly == coord.local_y { coord.local_x } else { owned_w };
            rank += (0..row_end)
                .filter(|&lx| !self.hole_bit(start_x + lx, start_y + ly))
                .count();
        }

        let block = &self.blocks[self.layout.block_index(coord.block_x, coord.block_y)];
        let code = bits::read(&block.codes, rank, self.bits_per_sample);
        dequantize(code, block.min, block.max, self.bits_per_sample)
    }

    /// Decode every sample owned by a block into `out` (row-major, owned width)
    ///
    /// Returns the owned `(width, height)`.
    fn decode_owned(&self, bx: u32, by: u32, out: &mut [f32]) -> (u32, u32) {
        let (start_x, width) = self.layout.owned_span(bx);
        let (start_y, height) = self.layout.owned_span(by);
        if self.is_empty() {
            out[..(width * height) as usize].fill(NO_COLLISION_VALUE);
            return (width, height);
        }

        let block = &self.blocks[self.layout.block_index(bx, by)];
        let mut next = 0;
        for ly in 0..height {
            for lx in 0..width {
                out[(ly * width + lx) as usize] = if self.hole_bit(start_x + lx, start_y + ly) {
                    NO_COLLISION_VALUE
                } else {
                    let code = bits::read(&block.codes, next, self.bits_per_sample);
                    next += 1;
                    dequantize(code, block.min, block.max, self.bits_per_sample)
                };
            }
        }
        (width, height)
    }

    /// Decode the footprint of a block into `out` (row-major, footprint width)
    ///
    /// Returns the footprint `(width, height)`; sample `(i, j)` of the output
    /// is grid sample `(bx * B + i, by * B + j)`.
    pub(crate) fn decode_footprint(&self, bx: u32, by: u32, out: &mut [f32]) -> (u32, u32) {
        let mut owned = [0.0f32; MAX_BLOCK_SAMPLES];
        let (owned_w, owned_h) = self.decode_owned(bx, by, &mut owned);

        let fx = self.layout.footprint(bx);
        let fy = self.layout.footprint(by);
        let (x0, y0) = (*fx.start(), *fy.start());
        let width = fx.end() - x0 + 1;
        let height = fy.end() - y0 + 1;
        for j in 0..height {
            for i in 0..width {
                out[(j * width + i) as usize] = if i < owned_w && j < owned_h {
                    owned[(j * owned_w + i) as usize]
                } else {
                    // Shared edge owned by the next block
                    self.sample(x0 + i, y0 + j)
                };
            }
        }
        (width, height)
    }

    /// Visit decoded grid-local heights of a rectangle, block by block
    ///
    /// `f` receives rectangle-relative coordinates. The rectangle must be
    /// inside the grid and non-empty.
    pub fn read_rect(&self, x: u32, y: u32, width: u32, height: u32, mut f: impl FnMut(u32, u32, f32)) {
        debug_assert!(width > 0 && height > 0);
        let (x_end, y_end) = (x + width, y + height);
        let first = self.layout.block_of(x, y);
        let last = self.layout.block_of(x_end - 1, y_end - 1);

        let mut owned = [0.0f32; MAX_BLOCK_SAMPLES];
        for by in first.block_y..=last.block_y {
            for bx in first.block_x..=last.block_x {
                let (ow, oh) = self.decode_owned(bx, by, &mut owned);
                let (sx, _) = self.layout.owned_span(bx);
                let (sy, _) = self.layout.owned_span(by);
                for gy in sy.max(y)..(sy + oh).min(y_end) {
                    for gx in sx.max(x)..(sx + ow).min(x_end) {
                        f(gx - x, gy - y, owned[((gy - sy) * ow + gx - sx) as usize]);
                    }
                }
            }
        }
    }

    /// Conservative grid-local height range of the quads in a block
    ///
    /// Covers every decoded height on the footprint, including the shared
    /// edge samples stored by neighbouring blocks. `None` when no sample on
    /// the footprint has collision.
    pub fn block_bounds(&self, bx: u32, by: u32) -> Option<(f32, f32)> {
        if self.is_empty() {
            return None;
        }
        let last = self.layout.blocks_per_side() - 1;
        let mut range = (f32::MAX, f32::MIN);
        for oy in by..=(by + 1).min(last) {
            for ox in bx..=(bx + 1).min(last) {
                let block = &self.blocks[self.layout.block_index(ox, oy)];
                if block.has_range() {
                    range = (range.0.min(block.min), range.1.max(block.max));
                }
            }
        }
        (range.0 <= range.1).then_some(range)
    }

    /// Grid-local height range over all blocks
    pub fn height_range(&self) -> Option<(f32, f32)> {
        self.blocks
            .iter()
            .filter(|b| b.has_range())
            .fold(None, |acc, b| match acc {
                None => Some((b.min, b.max)),
                Some((lo, hi)) => Some((lo.min(b.min), hi.max(b.max))),
            })
    }

    /// Recompute a block's range from its footprint and re-encode its owned samples
    ///
    /// `value` yields grid-local heights (or the hole sentinel) for any sample
    /// on the footprint. The block's code buffer is reused.
    fn encode_block(&mut self, bx: u32, by: u32, value: &impl Fn(u32, u32) -> f32) {
        let bits_per_sample = self.bits_per_sample;
        let (min, max) = footprint_range(&self.layout, bx, by, value);
        let (start_x, width) = self.layout.owned_span(bx);
        let (start_y, height) = self.layout.owned_span(by);

        let mut codes = mem::take(&mut self.blocks[self.layout.block_index(bx, by)].codes);
        let mut count = 0;
        for y in start_y..start_y + height {
            for x in start_x..start_x + width {
                let hole = is_no_collision(value(x, y));
                self.set_hole_bit(x, y, hole);
                count += usize::from(!hole);
            }
        }

        codes.clear();
        codes.resize(layout::sample_byte_size(bits_per_sample, count), 0);
        let mut next = 0;
        for y in start_y..start_y + height {
            for x in start_x..start_x + width {
                let h = value(x, y);
                if !is_no_collision(h) {
                    bits::write(&mut codes, next, bits_per_sample, quantize(h, min, max, bits_per_sample));
                    next += 1;
                }
            }
        }

        let block = &mut self.blocks[self.layout.block_index(bx, by)];
        *block = RangeBlock { min, max, codes };
    }

    /// Allocate empty blocks and an all-hole bitmap for a store built from holes only
    fn materialize(&mut self) {
        let n = self.layout.sample_count() as usize;
        self.blocks = vec![RangeBlock::default(); self.layout.block_count()];
        self.holes = vec![u64::MAX; (n * n).div_ceil(64)];
    }

    /// Overwrite a rectangle of samples and re-quantize the blocks it touches
    ///
    /// `values` are read at `stride` and converted with `to_local`; the hole
    /// sentinel must map to itself. Every block whose footprint overlaps the
    /// rectangle gets a new range and re-encodes all of its owned samples, so
    /// unedited samples in those blocks may move within the quantization
    /// error. Blocks outside that set are not written.
    pub fn set_rect(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        values: &[f32],
        stride: usize,
        to_local: impl Fn(f32) -> f32,
        scratch: &mut dyn ScratchAllocator,
    ) -> Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        if self.is_empty() {
            self.materialize();
        }

        let layout = self.layout;
        let blocks_x = layout.blocks_touching(x, width);
        let blocks_y = layout.blocks_touching(y, height);

        // Sample window covering every touched footprint
        let x0 = *blocks_x.start() * layout.block_size();
        let y0 = *blocks_y.start() * layout.block_size();
        let x1 = *layout.footprint(*blocks_x.end()).end();
        let y1 = *layout.footprint(*blocks_y.end()).end();
        let (win_w, win_h) = (x1 - x0 + 1, y1 - y0 + 1);

        let mut window = scratch.alloc_f32((win_w * win_h) as usize);
        self.read_rect(x0, y0, win_w, win_h, |i, j, h| {
            window[(j * win_w + i) as usize] = h;
        });

        for j in 0..height {
            for i in 0..width {
                let h = values[j as usize * stride + i as usize];
                let local = if is_no_collision(h) { NO_COLLISION_VALUE } else { to_local(h) };
                window[((y + j - y0) * win_w + (x + i - x0)) as usize] = local;
            }
        }

        let value = |sx: u32, sy: u32| window[((sy - y0) * win_w + (sx - x0)) as usize];
        for by in blocks_y.clone() {
            for bx in blocks_x.clone() {
                self.encode_block(bx, by, &value);
            }
        }

        tracing::trace!(
            "set_heights {}x{} at ({}, {}) re-quantized {} blocks",
            width,
            height,
            x,
            y,
            blocks_x.count() * blocks_y.count()
        );

        scratch.free_f32(window);
        Ok(())
    }

    /// Number of quads with collision
    pub fn solid_quad_count(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let quads = self.layout.quad_count();
        (0..quads)
            .flat_map(|y| (0..quads).map(move |x| (x, y)))
            .filter(|&(x, y)| self.is_quad_solid(x, y))
            .count()
    }

    /// Heap memory held by the store
    pub fn heap_bytes(&self) -> usize {
        self.blocks.capacity() * mem::size_of::<RangeBlock>()
            + self.blocks.iter().map(|b| b.codes.capacity()).sum::<usize>()
            + self.holes.capacity() * mem::size_of::<u64>()
    }
}
