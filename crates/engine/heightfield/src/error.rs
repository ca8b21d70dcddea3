//! Error types for height field construction and editing

use glam::Vec3;
use thiserror::Error;

/// Result type for height field operations
pub type Result<T> = std::result::Result<T, HeightFieldError>;

/// Errors that can occur when building, querying or editing a height field
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HeightFieldError {
    /// Sample count below 2, or not a power-of-two multiple of the block size
    #[error("invalid sample count {sample_count}: must be >= 2 and a power-of-two multiple of the block size")]
    InvalidSampleCount { sample_count: u32 },

    /// Height sample that is neither finite nor the no-collision sentinel
    #[error("invalid height at sample ({x}, {y}): must be finite or the no-collision value")]
    InvalidHeight { x: u32, y: u32 },

    /// Block size outside the supported range
    #[error("invalid block size {block_size}: must be in [2, 8]")]
    InvalidBlockSize { block_size: u32 },

    /// Bits per sample outside the supported range
    #[error("invalid bits per sample {bits}: must be in [1, 8]")]
    InvalidBitsPerSample { bits: u32 },

    /// Scale has a zero or non-finite component
    #[error("invalid scale {scale}: every component must be finite and non-zero")]
    InvalidScale { scale: Vec3 },

    /// Height sample array does not cover the grid
    #[error("expected {expected} height samples, found {found}")]
    HeightSampleCountMismatch { expected: usize, found: usize },

    /// Material index array does not cover the quads
    #[error("expected {expected} material indices, found {found}")]
    MaterialIndexCountMismatch { expected: usize, found: usize },

    /// A material index points past the end of the material list
    #[error("material index {index} out of range for {material_count} materials")]
    MaterialIndexOutOfRange { index: u32, material_count: usize },

    /// Merging materials would exceed what a material index can address
    #[error("material list would grow to {count} entries, maximum is {max}")]
    TooManyMaterials { count: usize, max: usize },

    /// Query or update rectangle leaves the grid
    #[error("rectangle at ({x}, {y}) of size {width}x{height} exceeds grid limit {limit}")]
    RectOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        limit: u32,
    },

    /// Caller buffer is too short for the rectangle and stride
    #[error("buffer too small: need {required} elements, got {found}")]
    BufferTooSmall { required: usize, found: usize },
}
