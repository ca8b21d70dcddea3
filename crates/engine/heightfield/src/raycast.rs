//! Ray casting against the reconstructed surface
//!
//! The ray is moved into grid-local space, where every block is bounded by a
//! box spanning its quads horizontally and its decoded height range
//! vertically. Blocks whose box the ray misses (or only reaches beyond the
//! best hit so far) are skipped without decoding; surviving blocks are
//! decoded and their triangles tested exactly.

use crate::geometry::{local_triangles, to_point, triangle_normal, GridTransform, QuadCorners};
use crate::height_store::{HeightStore, MAX_BLOCK_SAMPLES};
use glam::Vec3;
use rapier3d::math::Vector;
use rapier3d::parry::bounding_volume::Aabb;
use rapier3d::parry::query::{Ray, RayCast};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Ray segment in world space
///
/// Points on the ray are `origin + fraction * direction`; the direction's
/// length is the length of the tested segment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeightFieldRay {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl HeightFieldRay {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    /// Point at `fraction` along the segment
    pub fn point_at(&self, fraction: f32) -> Vec3 {
        self.origin + self.direction * fraction
    }
}

/// How triangles facing away from the ray are treated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BackFaceMode {
    /// Only hit triangles whose front side faces the ray origin
    #[default]
    IgnoreBackFaces,
    CollideWithBackFaces,
}

/// Ray cast settings
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RayCastOptions {
    pub back_face_mode: BackFaceMode,
    /// Hits beyond this fraction of the direction are ignored
    pub max_fraction: f32,
}

impl Default for RayCastOptions {
    fn default() -> Self {
        Self {
            back_face_mode: BackFaceMode::IgnoreBackFaces,
            max_fraction: 1.0,
        }
    }
}

/// Closest intersection of a ray with the surface
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    /// Hit point is `origin + fraction * direction`
    pub fraction: f32,
    pub quad_x: u32,
    pub quad_y: u32,
    /// Triangle within the quad (0 or 1)
    pub triangle: u8,
}

/// Slack added to block boxes so grazing rays are not pruned by rounding
const BOX_PADDING: f32 = 1.0e-4;

/// Find the closest hit of `ray` with the surface stored in `store`
pub(crate) fn cast_ray(
    store: &HeightStore,
    transform: &GridTransform,
    ray: &HeightFieldRay,
    options: &RayCastOptions,
) -> Option<RayHit> {
    if store.is_empty() || !(options.max_fraction > 0.0) {
        return None;
    }
    let origin = transform.to_local(ray.origin);
    let direction = transform.direction_to_local(ray.direction);
    if direction == Vec3::ZERO || !origin.is_finite() || !direction.is_finite() {
        return None;
    }

    let layout = store.layout();
    let end = origin + direction * options.max_fraction;
    let blocks_x = layout.blocks_overlapping(origin.x.min(end.x), origin.x.max(end.x))?;
    let blocks_y = layout.blocks_overlapping(origin.z.min(end.z), origin.z.max(end.z))?;

    let local_ray = Ray::new(to_point(origin), Vector::new(direction.x, direction.y, direction.z));
    let ignore_back_faces = options.back_face_mode == BackFaceMode::IgnoreBackFaces;
    let mut best: Option<RayHit> = None;
    let mut best_fraction = options.max_fraction;
    let mut footprint = [0.0f32; MAX_BLOCK_SAMPLES];
    let mut decoded = 0usize;

    for by in blocks_y {
        for bx in blocks_x.clone() {
            let Some((lo, hi)) = store.block_bounds(bx, by) else {
                continue;
            };
            let (qx0, qx1) = layout.quad_span(bx);
            let (qy0, qy1) = layout.quad_span(by);
            let pad = BOX_PADDING * (1.0 + lo.abs().max(hi.abs()));
            let bounds = Aabb::new(
                to_point(Vec3::new(qx0 as f32 - BOX_PADDING, lo - pad, qy0 as f32 - BOX_PADDING)),
                to_point(Vec3::new(qx1 as f32 + BOX_PADDING, hi + pad, qy1 as f32 + BOX_PADDING)),
            );
            if bounds.cast_local_ray(&local_ray, best_fraction, true).is_none() {
                continue;
            }

            decoded += 1;
            let (width, _) = store.decode_footprint(bx, by, &mut footprint);
            let at = |x: u32, y: u32| footprint[((y - qy0) * width + (x - qx0)) as usize];
            for qy in qy0..qy1 {
                for qx in qx0..qx1 {
                    let corners = QuadCorners([at(qx, qy), at(qx + 1, qy), at(qx, qy + 1), at(qx + 1, qy + 1)]);
                    let Some(triangles) = local_triangles(qx, qy, &corners) else {
                        continue;
                    };
                    for (index, triangle) in triangles.iter().enumerate() {
                        if ignore_back_faces && direction.dot(triangle_normal(triangle)) > 0.0 {
                            continue;
                        }
                        if let Some(fraction) = triangle.cast_local_ray(&local_ray, best_fraction, true) {
                            if best.is_none() || fraction < best_fraction {
                                best_fraction = fraction;
                                best = Some(RayHit {
                                    fraction,
                                    quad_x: qx,
                                    quad_y: qy,
                                    triangle: index as u8,
                                });
                            }
                        }
                    }
                }
            }
        }
    }

    tracing::trace!("cast_ray decoded {} blocks, hit: {:?}", decoded, best);
    best
}
