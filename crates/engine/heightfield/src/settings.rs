//! Construction settings for [`HeightFieldShape`]

use crate::error::{HeightFieldError, Result};
use crate::height_store::{is_no_collision, HeightStore, MAX_BLOCK_SIZE};
use crate::layout::BlockLayout;
use crate::material::{MaterialRef, MaterialStore};
use crate::quantize::MAX_BITS_PER_SAMPLE;
use crate::shape::HeightFieldShape;
use glam::Vec3;

/// Input for building a height field
///
/// Sample `(x, y)` sits at world position
/// `offset + scale * (x, height_samples[y * sample_count + x], y)`.
#[derive(Clone, Debug)]
pub struct HeightFieldSettings {
    /// World position of sample (0, 0) at height 0
    pub offset: Vec3,
    /// Spacing along x/z and height multiplier along y; negative components mirror
    pub scale: Vec3,
    /// Samples per side; must be a power-of-two multiple of `block_size`
    pub sample_count: u32,
    /// Quads per block side, in `[2, 8]`
    pub block_size: u32,
    /// Code width for stored heights, in `[1, 8]`
    pub bits_per_sample: u32,
    /// Allowed error in sample units; when set, `bits_per_sample` is lowered
    /// to the smallest width that still meets it
    pub max_error: Option<f32>,
    /// Row-major heights, [`NO_COLLISION_VALUE`](crate::NO_COLLISION_VALUE) marks holes
    pub height_samples: Vec<f32>,
    /// Material palette
    pub materials: Vec<MaterialRef>,
    /// One palette index per quad, row-major; empty selects entry 0 everywhere
    pub material_indices: Vec<u8>,
}

impl Default for HeightFieldSettings {
    fn default() -> Self {
        Self {
            offset: Vec3::ZERO,
            scale: Vec3::ONE,
            sample_count: 0,
            block_size: 2,
            bits_per_sample: 8,
            max_error: None,
            height_samples: Vec::new(),
            materials: Vec::new(),
            material_indices: Vec::new(),
        }
    }
}

impl HeightFieldSettings {
    /// Settings for a `sample_count x sample_count` grid of heights
    pub fn new(height_samples: Vec<f32>, offset: Vec3, scale: Vec3, sample_count: u32) -> Self {
        Self {
            offset,
            scale,
            sample_count,
            height_samples,
            ..Default::default()
        }
    }

    /// Attach a material palette and per-quad indices
    pub fn with_materials(mut self, materials: Vec<MaterialRef>, material_indices: Vec<u8>) -> Self {
        self.materials = materials;
        self.material_indices = material_indices;
        self
    }

    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_bits_per_sample(mut self, bits_per_sample: u32) -> Self {
        self.bits_per_sample = bits_per_sample;
        self
    }

    pub fn with_max_error(mut self, max_error: f32) -> Self {
        self.max_error = Some(max_error);
        self
    }

    pub(crate) fn layout(&self) -> BlockLayout {
        BlockLayout::new(self.sample_count, self.block_size)
    }

    /// Check the settings, returning the first problem found
    pub fn validate(&self) -> Result<()> {
        if !(2..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            return Err(HeightFieldError::InvalidBlockSize {
                block_size: self.block_size,
            });
        }
        let n = self.sample_count;
        if n < 2 || n % self.block_size != 0 || !(n / self.block_size).is_power_of_two() {
            return Err(HeightFieldError::InvalidSampleCount { sample_count: n });
        }
        if !(1..=MAX_BITS_PER_SAMPLE).contains(&self.bits_per_sample) {
            return Err(HeightFieldError::InvalidBitsPerSample {
                bits: self.bits_per_sample,
            });
        }
        if !self.scale.is_finite() || self.scale.cmpeq(Vec3::ZERO).any() {
            return Err(HeightFieldError::InvalidScale { scale: self.scale });
        }

        let expected = (n * n) as usize;
        if self.height_samples.len() != expected {
            return Err(HeightFieldError::HeightSampleCountMismatch {
                expected,
                found: self.height_samples.len(),
            });
        }
        if let Some(i) = self
            .height_samples
            .iter()
            .position(|&h| !h.is_finite() && !is_no_collision(h))
        {
            let i = i as u32;
            return Err(HeightFieldError::InvalidHeight { x: i % n, y: i / n });
        }
        MaterialStore::check(n - 1, self.materials.len(), &self.material_indices)
    }

    /// Smallest bits per sample that keeps every block within `max_error`
    ///
    /// `max_error` is in sample units (before `scale.y`). Flat or fully-hole
    /// grids report 1.
    pub fn calculate_bits_per_sample_for_error(&self, max_error: f32) -> u32 {
        let n = self.sample_count as usize;
        if self.sample_count < 2 || self.block_size == 0 || self.height_samples.len() < n * n {
            return 1;
        }
        HeightStore::bits_for_error(&self.layout(), &self.height_samples, max_error)
    }

    /// Build the shape
    pub fn create(&self) -> Result<HeightFieldShape> {
        HeightFieldShape::new(self)
    }
}
