//! Compressed height field collision shape
//!
//! Composes the quantized height store, the material store and the grid
//! transform, and exposes reads, ray casts and rectangle edits in world
//! units.

use crate::error::{HeightFieldError, Result};
use crate::geometry::{local_triangle, local_triangles, triangle_normal, GridTransform, QuadCorners, QUAD_TRIANGLES};
use crate::height_store::{is_no_collision, HeightStore, MAX_BLOCK_SAMPLES, NO_COLLISION_VALUE};
use crate::layout::{required_len, BlockLayout};
use crate::material::{MaterialRef, MaterialStore};
use crate::raycast::{self, HeightFieldRay, RayCastOptions, RayHit};
use crate::scratch::ScratchAllocator;
use crate::settings::HeightFieldSettings;
use glam::Vec3;
use rapier3d::math::Point;
use rapier3d::parry::bounding_volume::Aabb;
use rapier3d::parry::shape::Triangle;
use rapier3d::prelude::SharedShape;
use std::mem;

/// Size and complexity of a shape
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShapeStats {
    /// Samples in the grid (`N * N`)
    pub sample_count: usize,
    /// Collision triangles (two per quad without holes)
    pub triangle_count: usize,
    /// Bytes used by the shape object and everything it allocated
    pub size_bytes: usize,
}

/// Height field stored at reduced precision
///
/// Heights are range-quantized per block, holes are kept in a bitmap and
/// every quad carries a material. Reads and ray casts never modify the shape;
/// [`set_heights`](Self::set_heights) and
/// [`set_materials`](Self::set_materials) need exclusive access.
#[derive(Clone, Debug)]
pub struct HeightFieldShape {
    transform: GridTransform,
    heights: HeightStore,
    materials: MaterialStore,
}

/// Reject output or input slices that cannot hold a rectangle at `stride`
fn check_buffer(width: u32, height: u32, stride: usize, found: usize) -> Result<()> {
    let required = required_len(width, height, stride);
    if found < required {
        return Err(HeightFieldError::BufferTooSmall { required, found });
    }
    Ok(())
}

impl HeightFieldShape {
    /// Build a shape from settings
    ///
    /// # Arguments
    /// * `settings` - Grid, transform, quantization and material input
    ///
    /// # Returns
    /// The shape, or the first validation error in `settings`
    pub fn new(settings: &HeightFieldSettings) -> Result<Self> {
        settings.validate()?;

        let layout = settings.layout();
        let mut bits = settings.bits_per_sample;
        if let Some(max_error) = settings.max_error {
            bits = bits.min(settings.calculate_bits_per_sample_for_error(max_error));
        }

        let heights = HeightStore::build(layout, &settings.height_samples, bits);
        let materials = if heights.is_empty() {
            // Nothing to collide with, so nothing can carry a material
            MaterialStore::empty(layout.quad_count())
        } else {
            MaterialStore::build(
                layout.quad_count(),
                settings.materials.clone(),
                &settings.material_indices,
            )?
        };

        let shape = Self {
            transform: GridTransform::new(settings.offset, settings.scale),
            heights,
            materials,
        };

        tracing::debug!(
            "Created height field: {}x{} samples, {} blocks of {}, {} bits per sample, {} materials, {} bytes",
            layout.sample_count(),
            layout.sample_count(),
            layout.block_count(),
            layout.block_size(),
            bits,
            shape.materials.materials().len(),
            shape.stats().size_bytes
        );

        Ok(shape)
    }

    #[inline]
    fn layout(&self) -> &BlockLayout {
        self.heights.layout()
    }

    /// Samples per side
    pub fn sample_count(&self) -> u32 {
        self.layout().sample_count()
    }

    pub fn block_size(&self) -> u32 {
        self.layout().block_size()
    }

    pub fn bits_per_sample(&self) -> u32 {
        self.heights.bits_per_sample()
    }

    pub fn offset(&self) -> Vec3 {
        self.transform.offset()
    }

    pub fn scale(&self) -> Vec3 {
        self.transform.scale()
    }

    /// Whether sample `(x, y)` has no collision
    ///
    /// # Panics
    /// If `(x, y)` is outside the grid.
    pub fn is_no_collision(&self, x: u32, y: u32) -> bool {
        self.heights.is_hole(x, y)
    }

    /// World position of sample `(x, y)`
    ///
    /// For a hole the height component is [`NO_COLLISION_VALUE`].
    ///
    /// # Panics
    /// If `(x, y)` is outside the grid.
    pub fn get_position(&self, x: u32, y: u32) -> Vec3 {
        let height = self.heights.sample(x, y);
        let mut position = self.transform.to_world(Vec3::new(x as f32, height, y as f32));
        if height == NO_COLLISION_VALUE {
            position.y = NO_COLLISION_VALUE;
        }
        position
    }

    /// Copy world-space heights of a sample rectangle into `out`
    ///
    /// Row `j` of the rectangle starts at `out[j * stride]`. Holes are
    /// written as [`NO_COLLISION_VALUE`].
    pub fn get_heights(&self, x: u32, y: u32, width: u32, height: u32, out: &mut [f32], stride: usize) -> Result<()> {
        BlockLayout::check_rect(x, y, width, height, self.sample_count())?;
        check_buffer(width, height, stride, out.len())?;
        if width == 0 || height == 0 {
            return Ok(());
        }

        let transform = &self.transform;
        self.heights.read_rect(x, y, width, height, |i, j, local| {
            out[j as usize * stride + i as usize] = transform.height_to_world(local);
        });
        Ok(())
    }

    /// Overwrite world-space heights of a sample rectangle
    ///
    /// `values` may contain [`NO_COLLISION_VALUE`] to punch holes; any other
    /// non-finite value fails with [`HeightFieldError::InvalidHeight`] before
    /// anything is written. Every
    /// block touching the rectangle is quantized again, which can move
    /// nearby unedited samples within the quantization error; all other
    /// samples keep their exact stored value.
    ///
    /// # Arguments
    /// * `x`, `y`, `width`, `height` - Sample rectangle, must lie inside the grid
    /// * `values` - New heights, row `j` starting at `values[j * stride]`
    /// * `stride` - Distance between rows in `values`
    /// * `scratch` - Temporary memory for the call
    pub fn set_heights(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        values: &[f32],
        stride: usize,
        scratch: &mut dyn ScratchAllocator,
    ) -> Result<()> {
        BlockLayout::check_rect(x, y, width, height, self.sample_count())?;
        check_buffer(width, height, stride, values.len())?;

        let transform = self.transform;
        for j in 0..height {
            let row = &values[j as usize * stride..j as usize * stride + width as usize];
            let bad = row
                .iter()
                .position(|&h| !is_no_collision(h) && !transform.height_to_local(h).is_finite());
            if let Some(i) = bad {
                return Err(HeightFieldError::InvalidHeight {
                    x: x + i as u32,
                    y: y + j,
                });
            }
        }

        self.heights
            .set_rect(x, y, width, height, values, stride, |h| transform.height_to_local(h), scratch)
    }

    /// Copy the palette indices of a quad rectangle into `out`
    pub fn get_materials(&self, x: u32, y: u32, width: u32, height: u32, out: &mut [u8], stride: usize) -> Result<()> {
        BlockLayout::check_rect(x, y, width, height, self.layout().quad_count())?;
        check_buffer(width, height, stride, out.len())?;
        self.materials.read_rect(x, y, width, height, out, stride);
        Ok(())
    }

    /// Material of quad `(x, y)`
    ///
    /// # Panics
    /// If `(x, y)` is outside the quad grid.
    pub fn get_material(&self, x: u32, y: u32) -> &MaterialRef {
        self.materials.material_at(x, y)
    }

    /// Material of the triangle a ray hit
    pub fn hit_material(&self, hit: &RayHit) -> &MaterialRef {
        self.get_material(hit.quad_x, hit.quad_y)
    }

    /// Assign materials to a quad rectangle
    ///
    /// With `materials`, `indices` refer to that list and its entries are
    /// merged into the shape's palette; without it they refer to
    /// [`material_list`](Self::material_list). Fails without changing
    /// anything when the palette would outgrow 256 entries or an index is out
    /// of range.
    pub fn set_materials(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        indices: &[u8],
        stride: usize,
        materials: Option<&[MaterialRef]>,
        scratch: &mut dyn ScratchAllocator,
    ) -> Result<()> {
        BlockLayout::check_rect(x, y, width, height, self.layout().quad_count())?;
        check_buffer(width, height, stride, indices.len())?;
        self.materials
            .set_rect(x, y, width, height, indices, stride, materials, scratch)
    }

    /// Palette referenced by the material indices
    pub fn material_list(&self) -> &[MaterialRef] {
        self.materials.materials()
    }

    /// Closest intersection of a world-space ray with the surface
    pub fn cast_ray(&self, ray: &HeightFieldRay, options: &RayCastOptions) -> Option<RayHit> {
        raycast::cast_ray(&self.heights, &self.transform, ray, options)
    }

    /// Triangle count and memory use
    pub fn stats(&self) -> ShapeStats {
        let n = self.sample_count() as usize;
        ShapeStats {
            sample_count: n * n,
            triangle_count: 2 * self.heights.solid_quad_count(),
            size_bytes: mem::size_of::<Self>() + self.heights.heap_bytes() + self.materials.heap_bytes(),
        }
    }

    /// World bounds of the surface
    ///
    /// Conservative in height (block ranges, not individual samples). A shape
    /// without collision returns an invalid AABB.
    pub fn local_bounds(&self) -> Aabb {
        match self.heights.height_range() {
            Some((lo, hi)) => {
                let extent = self.layout().quad_count() as f32;
                self.transform
                    .to_world_aabb(Vec3::new(0.0, lo, 0.0), Vec3::new(extent, hi, extent))
            }
            None => Aabb::new_invalid(),
        }
    }

    fn quad_corners(&self, x: u32, y: u32) -> QuadCorners {
        QuadCorners([
            self.heights.sample(x, y),
            self.heights.sample(x + 1, y),
            self.heights.sample(x, y + 1),
            self.heights.sample(x + 1, y + 1),
        ])
    }

    /// World-space triangle `triangle` (0 or 1) of quad `(x, y)`
    ///
    /// `None` for quads touching a hole and for a triangle index above 1.
    ///
    /// # Panics
    /// If `(x, y)` is outside the quad grid.
    pub fn triangle(&self, x: u32, y: u32, triangle: usize) -> Option<Triangle> {
        if triangle >= QUAD_TRIANGLES.len() {
            return None;
        }
        let corners = self.quad_corners(x, y);
        if corners.has_hole() {
            return None;
        }
        Some(self.transform.to_world_triangle(&local_triangle(x, y, &corners, triangle)))
    }

    /// World-space unit normal of a collision triangle
    ///
    /// # Panics
    /// If `(x, y)` is outside the quad grid.
    pub fn surface_normal(&self, x: u32, y: u32, triangle: usize) -> Option<Vec3> {
        self.triangle(x, y, triangle)
            .map(|t| triangle_normal(&t).normalize_or_zero())
    }

    /// Visit world-space triangles of quads inside an optional grid-local box
    ///
    /// Blocks are skipped on their horizontal extent and height range before
    /// anything is decoded.
    fn visit_triangles(&self, bounds: Option<(Vec3, Vec3)>, f: &mut dyn FnMut(u32, u32, u8, &Triangle)) {
        if self.heights.is_empty() {
            return;
        }
        let layout = *self.layout();
        let last = layout.blocks_per_side() - 1;
        let (blocks_x, blocks_y) = match bounds {
            Some((lo, hi)) => {
                let (Some(bx), Some(by)) = (
                    layout.blocks_overlapping(lo.x, hi.x),
                    layout.blocks_overlapping(lo.z, hi.z),
                ) else {
                    return;
                };
                (bx, by)
            }
            None => (0..=last, 0..=last),
        };

        let mut footprint = [0.0f32; MAX_BLOCK_SAMPLES];
        for by in blocks_y {
            for bx in blocks_x.clone() {
                let Some((block_lo, block_hi)) = self.heights.block_bounds(bx, by) else {
                    continue;
                };
                if let Some((lo, hi)) = bounds {
                    if block_hi < lo.y || block_lo > hi.y {
                        continue;
                    }
                }

                let (width, _) = self.heights.decode_footprint(bx, by, &mut footprint);
                let (qx0, qx1) = layout.quad_span(bx);
                let (qy0, qy1) = layout.quad_span(by);
                let at = |x: u32, y: u32| footprint[((y - qy0) * width + (x - qx0)) as usize];
                for qy in qy0..qy1 {
                    for qx in qx0..qx1 {
                        if let Some((lo, hi)) = bounds {
                            let (fx, fy) = (qx as f32, qy as f32);
                            if fx + 1.0 < lo.x || fx > hi.x || fy + 1.0 < lo.z || fy > hi.z {
                                continue;
                            }
                        }
                        let corners = QuadCorners([at(qx, qy), at(qx + 1, qy), at(qx, qy + 1), at(qx + 1, qy + 1)]);
                        if let Some(triangles) = local_triangles(qx, qy, &corners) {
                            for (index, local) in triangles.iter().enumerate() {
                                f(qx, qy, index as u8, &self.transform.to_world_triangle(local));
                            }
                        }
                    }
                }
            }
        }
    }

    /// Visit every collision triangle whose quad may overlap a world AABB
    ///
    /// # Arguments
    /// * `aabb` - Query box in world space
    /// * `f` - Called with quad x, quad y, triangle index and the world-space triangle
    pub fn for_each_triangle_in_aabb(&self, aabb: &Aabb, mut f: impl FnMut(u32, u32, u8, &Triangle)) {
        let bounds = self.transform.to_local_aabb(aabb);
        self.visit_triangles(Some(bounds), &mut f);
    }

    /// Generate a TriMesh shape from the collision triangles
    ///
    /// Limited to triangles near `aabb` when given. Returns None if there are
    /// no triangles. The TriMesh can be used to create a Rapier collider.
    pub fn to_trimesh(&self, aabb: Option<&Aabb>) -> Option<SharedShape> {
        let mut vertices: Vec<Point<f32>> = Vec::new();
        let mut indices: Vec<[u32; 3]> = Vec::new();
        let mut push = |_: u32, _: u32, _: u8, triangle: &Triangle| {
            let base_idx = vertices.len() as u32;
            vertices.push(triangle.a);
            vertices.push(triangle.b);
            vertices.push(triangle.c);
            indices.push([base_idx, base_idx + 1, base_idx + 2]);
        };
        self.visit_triangles(aabb.map(|a| self.transform.to_local_aabb(a)), &mut push);

        if vertices.is_empty() {
            return None;
        }
        SharedShape::trimesh(vertices, indices).ok()
    }
}
