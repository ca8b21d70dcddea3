//! Triangle reconstruction from decoded quads
//!
//! Converts four corner heights to Rapier `Triangle` shapes, in grid-local
//! space (`x`, height, `y`) or in world space through the shape's offset and
//! scale.

use crate::height_store::is_no_collision;
use glam::Vec3;
use rapier3d::math::{Point, Real};
use rapier3d::parry::bounding_volume::Aabb;
use rapier3d::parry::shape::Triangle;

/// Corner offsets of the two triangles of a quad, in winding order
///
/// Both face +Y in grid-local space.
pub const QUAD_TRIANGLES: [[(u32, u32); 3]; 2] = [[(0, 0), (0, 1), (1, 1)], [(0, 0), (1, 1), (1, 0)]];

#[inline]
pub(crate) fn to_point(v: Vec3) -> Point<Real> {
    Point::new(v.x, v.y, v.z)
}

#[inline]
pub(crate) fn to_vec3(p: &Point<Real>) -> Vec3 {
    Vec3::new(p.x, p.y, p.z)
}

/// Heights at the four corners of a quad
///
/// Indexed by `dy * 2 + dx`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuadCorners(pub [f32; 4]);

impl QuadCorners {
    #[inline]
    pub fn get(&self, dx: u32, dy: u32) -> f32 {
        self.0[(dy * 2 + dx) as usize]
    }

    /// True when any corner is a hole
    #[inline]
    pub fn has_hole(&self) -> bool {
        self.0.iter().any(|&h| is_no_collision(h))
    }
}

/// Grid-local triangle `tri` (0 or 1) of quad `(x, y)`
pub fn local_triangle(x: u32, y: u32, corners: &QuadCorners, tri: usize) -> Triangle {
    let vertex = |(dx, dy): (u32, u32)| to_point(Vec3::new((x + dx) as f32, corners.get(dx, dy), (y + dy) as f32));
    let [a, b, c] = QUAD_TRIANGLES[tri];
    Triangle::new(vertex(a), vertex(b), vertex(c))
}

/// Both grid-local triangles of quad `(x, y)`, or `None` if a corner is a hole
pub fn local_triangles(x: u32, y: u32, corners: &QuadCorners) -> Option<[Triangle; 2]> {
    if corners.has_hole() {
        return None;
    }
    Some([local_triangle(x, y, corners, 0), local_triangle(x, y, corners, 1)])
}

/// Unnormalized face normal following the triangle's winding
pub fn triangle_normal(tri: &Triangle) -> Vec3 {
    let (a, b, c) = (to_vec3(&tri.a), to_vec3(&tri.b), to_vec3(&tri.c));
    (b - a).cross(c - a)
}

/// Mapping between grid-local and world space
///
/// `world = offset + scale * local`, per axis. A scale with an odd number of
/// negative components mirrors the surface; world triangles then swap two
/// vertices so their normals keep pointing to the same side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridTransform {
    offset: Vec3,
    scale: Vec3,
}

impl GridTransform {
    pub fn new(offset: Vec3, scale: Vec3) -> Self {
        Self { offset, scale }
    }

    #[inline]
    pub fn offset(&self) -> Vec3 {
        self.offset
    }

    #[inline]
    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    /// Whether the scale flips handedness
    #[inline]
    pub fn is_mirrored(&self) -> bool {
        self.scale.x * self.scale.y * self.scale.z < 0.0
    }

    #[inline]
    pub fn to_world(&self, local: Vec3) -> Vec3 {
        self.offset + self.scale * local
    }

    #[inline]
    pub fn to_local(&self, world: Vec3) -> Vec3 {
        (world - self.offset) / self.scale
    }

    /// Direction vectors ignore the offset
    #[inline]
    pub fn direction_to_local(&self, direction: Vec3) -> Vec3 {
        direction / self.scale
    }

    /// World height of a grid-local height; holes pass through
    #[inline]
    pub fn height_to_world(&self, local: f32) -> f32 {
        if is_no_collision(local) {
            local
        } else {
            self.offset.y + self.scale.y * local
        }
    }

    /// Grid-local height of a world height; holes pass through
    #[inline]
    pub fn height_to_local(&self, world: f32) -> f32 {
        if is_no_collision(world) {
            world
        } else {
            (world - self.offset.y) / self.scale.y
        }
    }

    /// World-space copy of a grid-local triangle
    pub fn to_world_triangle(&self, local: &Triangle) -> Triangle {
        let a = to_point(self.to_world(to_vec3(&local.a)));
        let b = to_point(self.to_world(to_vec3(&local.b)));
        let c = to_point(self.to_world(to_vec3(&local.c)));
        if self.is_mirrored() {
            Triangle::new(a, c, b)
        } else {
            Triangle::new(a, b, c)
        }
    }

    /// World AABB of a grid-local box
    pub fn to_world_aabb(&self, local_min: Vec3, local_max: Vec3) -> Aabb {
        let a = self.to_world(local_min);
        let b = self.to_world(local_max);
        Aabb::new(to_point(a.min(b)), to_point(a.max(b)))
    }

    /// Grid-local box of a world AABB
    pub fn to_local_aabb(&self, world: &Aabb) -> (Vec3, Vec3) {
        let a = self.to_local(to_vec3(&world.mins));
        let b = self.to_local(to_vec3(&world.maxs));
        (a.min(b), a.max(b))
    }
}
