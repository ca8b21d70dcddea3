//! Compressed height field collision shape
//!
//! A square grid of height samples stored at a few bits per sample. The grid
//! is cut into blocks that are range-quantized independently, so the
//! reconstruction error of a sample depends only on the height range of its
//! block. Samples can be marked as holes, quads carry materials, and the
//! surface supports ray casts, triangle queries and in-place rectangle edits.

mod bits;
mod error;
mod geometry;
mod height_store;
mod layout;
mod material;
mod quantize;
mod raycast;
mod scratch;
mod settings;
mod shape;

pub use error::{HeightFieldError, Result};
pub use geometry::{GridTransform, QUAD_TRIANGLES};
pub use height_store::{is_no_collision, MAX_BLOCK_SIZE, NO_COLLISION_VALUE};
pub use layout::{BlockCoord, BlockLayout};
pub use material::{default_material, same_material, MaterialRef, PhysicsMaterial, MAX_MATERIALS};
pub use quantize::{dequantize, max_error, min_bits_for_error, quantize, MAX_BITS_PER_SAMPLE};
pub use raycast::{BackFaceMode, HeightFieldRay, RayCastOptions, RayHit};
pub use scratch::{HeapScratch, ScratchAllocator, ScratchPool};
pub use settings::HeightFieldSettings;
pub use shape::{HeightFieldShape, ShapeStats};

// Re-export for convenience
pub use glam;
pub use rapier3d;
