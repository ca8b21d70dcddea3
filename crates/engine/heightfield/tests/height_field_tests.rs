//! Height field scenario tests
//!
//! Builds shapes from settings and verifies positions, materials, ray hits,
//! rectangle reads and rectangle edits against the input data.

use crossworld_heightfield::glam::Vec3;
use crossworld_heightfield::{
    default_material, same_material, HeightFieldError, HeightFieldRay, HeightFieldSettings, HeightFieldShape,
    MaterialRef, PhysicsMaterial, RayCastOptions, ScratchPool, NO_COLLISION_VALUE,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const MIN_HEIGHT: f32 = -5.0;
const MAX_HEIGHT: f32 = 10.0;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn make_materials(count: usize) -> Vec<MaterialRef> {
    (0..count)
        .map(|i| Arc::new(PhysicsMaterial::new(format!("Material {}", i))))
        .collect()
}

/// Attach `count` materials and, when there is more than one, random indices
fn randomize_materials(settings: &mut HeightFieldSettings, count: usize) {
    settings.materials = make_materials(count);
    if count > 1 {
        let mut rng = StdRng::seed_from_u64(0x6d61);
        let quads = (settings.sample_count - 1) as usize;
        settings.material_indices = (0..quads * quads).map(|_| rng.random_range(0..count) as u8).collect();
    }
}

fn random_heights(rng: &mut StdRng, count: usize) -> Vec<f32> {
    (0..count).map(|_| rng.random_range(MIN_HEIGHT..MAX_HEIGHT)).collect()
}

fn random_settings(seed: u64) -> HeightFieldSettings {
    let mut rng = StdRng::seed_from_u64(seed);
    HeightFieldSettings::new(
        random_heights(&mut rng, 32 * 32),
        Vec3::new(0.3, 0.5, 0.7),
        Vec3::new(1.1, 1.2, 1.3),
        32,
    )
    .with_block_size(4)
    .with_bits_per_sample(8)
}

/// Whether any quad using sample `(x, y)` as a corner has collision
fn touches_solid_quad(settings: &HeightFieldSettings, x: u32, y: u32) -> bool {
    let n = settings.sample_count;
    let solid = |sx: u32, sy: u32| settings.height_samples[(sy * n + sx) as usize] != NO_COLLISION_VALUE;
    let quads = n - 1;
    (x.saturating_sub(1)..=x.min(quads - 1)).any(|qx| {
        (y.saturating_sub(1)..=y.min(quads - 1))
            .any(|qy| solid(qx, qy) && solid(qx + 1, qy) && solid(qx, qy + 1) && solid(qx + 1, qy + 1))
    })
}

/// Build the shape and compare every sample against the input
fn validate_positions(settings: &HeightFieldSettings, max_error: f32) -> HeightFieldShape {
    init_tracing();
    let shape = settings.create().expect("settings should be valid");
    let n = settings.sample_count;
    let options = RayCastOptions::default();

    let mut max_diff = -1.0f32;
    for y in 0..n {
        for x in 0..n {
            // Straight down from well above the surface
            let ray = HeightFieldRay::new(
                settings.offset + settings.scale * Vec3::new(x as f32, 100.0, y as f32),
                settings.scale.y * Vec3::new(0.0, -200.0, 0.0),
            );
            let hit = shape.cast_ray(&ray, &options);

            let height = settings.height_samples[(y * n + x) as usize];
            if height == NO_COLLISION_VALUE {
                assert!(shape.is_no_collision(x, y), "({}, {}) should be a hole", x, y);
                assert!(hit.is_none(), "ray through hole ({}, {}) hit {:?}", x, y, hit);
                continue;
            }

            assert!(!shape.is_no_collision(x, y), "({}, {}) should have collision", x, y);
            let original = settings.offset + settings.scale * Vec3::new(x as f32, height, y as f32);
            let position = shape.get_position(x, y);
            max_diff = max_diff.max((original - position).length());

            // Materials live on quads
            if x < n - 1 && y < n - 1 {
                let expected = if !settings.material_indices.is_empty() {
                    &settings.materials[settings.material_indices[(y * (n - 1) + x) as usize] as usize]
                } else if let Some(first) = settings.materials.first() {
                    first
                } else {
                    default_material()
                };
                assert!(
                    same_material(expected, shape.get_material(x, y)),
                    "material mismatch at quad ({}, {})",
                    x,
                    y
                );
            }

            // Border rays may or may not hit
            if x > 0 && y > 0 && x < n - 1 && y < n - 1 && touches_solid_quad(settings, x, y) {
                let hit = hit.unwrap_or_else(|| panic!("ray at ({}, {}) should hit", x, y));
                let hit_position = ray.point_at(hit.fraction);
                assert!(
                    (hit_position - position).length() <= 1.0e-3,
                    "hit {:?} differs from position {:?} at ({}, {})",
                    hit_position,
                    position,
                    x,
                    y
                );
            }
        }
    }

    assert!(max_diff <= max_error, "max error {} exceeds {}", max_diff, max_error);
    shape
}

#[test]
fn test_plane() {
    let n = 32u32;
    let mut settings = HeightFieldSettings::new(
        vec![1.0; (n * n) as usize],
        Vec3::new(3.0, 5.0, 7.0),
        Vec3::new(9.0, 13.0, 17.0),
        n,
    )
    .with_block_size(4)
    .with_bits_per_sample(1);

    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..10 {
        let index = rng.random_range(0..settings.height_samples.len());
        settings.height_samples[index] = NO_COLLISION_VALUE;
    }

    // A flat plane fits in a single bit
    assert_eq!(settings.calculate_bits_per_sample_for_error(0.0), 1);

    randomize_materials(&mut settings, 256);
    validate_positions(&settings, 0.0);
}

#[test]
fn test_plane_close_to_origin() {
    // Flat and tiny: quantization must not add any error
    let n = 32u32;
    let mut settings = HeightFieldSettings::new(vec![1.0e-6; (n * n) as usize], Vec3::ZERO, Vec3::ONE, n)
        .with_block_size(4)
        .with_bits_per_sample(1);

    assert_eq!(settings.calculate_bits_per_sample_for_error(0.0), 1);

    randomize_materials(&mut settings, 50);
    validate_positions(&settings, 0.0);
}

#[test]
fn test_random_height_field() {
    let mut settings = random_settings(42);

    for bits in 1..=8u32 {
        // Error of quantizing the whole range at this width; blocks only do better
        let max_error = 0.5 * (MAX_HEIGHT - MIN_HEIGHT) / ((1u32 << bits) - 1) as f32;
        let calculated = settings.calculate_bits_per_sample_for_error(max_error);
        assert!(calculated <= bits, "needed {} bits for the error of {} bits", calculated, bits);
    }

    randomize_materials(&mut settings, 1);
    let tolerance = settings.scale.y * (MAX_HEIGHT - MIN_HEIGHT) / ((1u32 << settings.bits_per_sample) - 1) as f32;
    validate_positions(&settings, tolerance);
}

#[test]
fn test_max_error_setting() {
    let tolerance = 0.1;
    let settings = random_settings(7).with_max_error(tolerance);
    let shape = settings.create().unwrap();
    assert_eq!(shape.bits_per_sample(), settings.calculate_bits_per_sample_for_error(tolerance));
    validate_positions(&settings, settings.scale.y * tolerance + 1.0e-4);
}

#[test]
fn test_empty_height_field() {
    let n = 32u32;
    let mut settings = HeightFieldSettings::new(vec![NO_COLLISION_VALUE; (n * n) as usize], Vec3::ZERO, Vec3::ONE, n);

    assert_eq!(settings.calculate_bits_per_sample_for_error(0.0), 1);

    randomize_materials(&mut settings, 50);
    let shape = validate_positions(&settings, 0.0);

    // Nothing but the shape itself
    let stats = shape.stats();
    assert_eq!(stats.triangle_count, 0);
    assert_eq!(stats.size_bytes, std::mem::size_of::<HeightFieldShape>());
    assert!(shape.material_list().is_empty());
    assert_eq!(shape.bits_per_sample(), 1);
}

#[test]
fn test_get_heights() {
    const NO_COLLISION_INDEX: usize = 10;
    let n = 32u32;
    let mut settings = random_settings(3);
    settings.height_samples[NO_COLLISION_INDEX] = NO_COLLISION_VALUE;
    let shape = settings.create().unwrap();
    let world = |i: usize| settings.offset.y + settings.scale.y * settings.height_samples[i];

    let mut sampled = vec![0.0f32; (n * n) as usize];
    shape.get_heights(0, 0, n, n, &mut sampled, n as usize).unwrap();
    for (i, &h) in sampled.iter().enumerate() {
        if i == NO_COLLISION_INDEX {
            assert_eq!(h, NO_COLLISION_VALUE);
        } else {
            assert!((h - world(i)).abs() <= 0.05, "sample {}: {} vs {}", i, h, world(i));
        }
    }

    // Random data gains nothing from per-block ranges
    let tolerance = (MAX_HEIGHT - MIN_HEIGHT) / ((1u32 << settings.bits_per_sample) - 2) as f32;
    let (sx, sy, cx, cy) = (4u32, 8u32, 16u32, 8u32);
    let mut sub = vec![0.0f32; (cx * cy) as usize];
    shape.get_heights(sx, sy, cx, cy, &mut sub, cx as usize).unwrap();
    for y in 0..cy {
        for x in 0..cx {
            let expected = world(((sy + y) * n + sx + x) as usize);
            let actual = sub[(y * cx + x) as usize];
            assert!((actual - expected).abs() <= tolerance, "({}, {}): {} vs {}", x, y, actual, expected);
        }
    }

    // Unaligned rectangle with a wide stride matches the full read
    let stride = 11usize;
    let mut strided = vec![-1.0f32; stride * 5];
    shape.get_heights(3, 1, 7, 5, &mut strided, stride).unwrap();
    for y in 0..5u32 {
        for x in 0..7u32 {
            assert_eq!(strided[y as usize * stride + x as usize], sampled[((1 + y) * n + 3 + x) as usize]);
        }
        assert_eq!(strided[y as usize * stride + 7], -1.0, "padding must stay untouched");
    }
}

#[test]
fn test_set_heights() {
    let n = 32u32;
    let settings = random_settings(11);
    let block_size = settings.block_size;
    let mut shape = settings.create().unwrap();

    let mut original = vec![0.0f32; (n * n) as usize];
    shape.get_heights(0, 0, n, n, &mut original, n as usize).unwrap();

    let (sx, sy, cx, cy) = (4u32, 16u32, 16u32, 8u32);
    let mut rng = StdRng::seed_from_u64(12);
    let mut patched = random_heights(&mut rng, (cx * cy) as usize);
    let no_collision_index = ((sy + 1) * n + sx + 2) as usize;
    patched[(cx + 2) as usize] = NO_COLLISION_VALUE;

    let mut pool = ScratchPool::new();
    shape.set_heights(sx, sy, cx, cy, &patched, cx as usize, &mut pool).unwrap();
    assert_eq!(pool.outstanding(), 0, "scratch buffers must be returned");

    let tolerance = (MAX_HEIGHT - MIN_HEIGHT) / ((1u32 << settings.bits_per_sample) - 2) as f32;
    let mut verify = vec![0.0f32; (n * n) as usize];
    shape.get_heights(0, 0, n, n, &mut verify, n as usize).unwrap();
    for y in 0..n {
        for x in 0..n {
            let idx = (y * n + x) as usize;
            let inside = x >= sx && x < sx + cx && y >= sy && y < sy + cy;
            let requantized = x >= sx.saturating_sub(block_size) && x < sx + cx && y >= sy.saturating_sub(block_size) && y < sy + cy;
            if idx == no_collision_index {
                assert_eq!(verify[idx], NO_COLLISION_VALUE);
                assert!(shape.is_no_collision(x, y));
            } else if inside {
                let expected = patched[((y - sy) * cx + x - sx) as usize];
                assert!((verify[idx] - expected).abs() <= tolerance, "patched ({}, {}): {} vs {}", x, y, verify[idx], expected);
            } else if requantized {
                // Not edited, but its block was quantized again
                assert!((verify[idx] - original[idx]).abs() <= tolerance, "nearby ({}, {}) drifted", x, y);
            } else {
                assert_eq!(verify[idx], original[idx], "untouched ({}, {}) changed", x, y);
            }
        }
    }
}

#[test]
fn test_set_heights_on_empty_shape() {
    let n = 16u32;
    let settings = HeightFieldSettings::new(vec![NO_COLLISION_VALUE; (n * n) as usize], Vec3::ZERO, Vec3::ONE, n)
        .with_block_size(4);
    let mut shape = settings.create().unwrap();
    assert_eq!(shape.stats().triangle_count, 0);
    assert_eq!(shape.bits_per_sample(), 1);

    let patch = vec![2.0f32; 9];
    let mut pool = ScratchPool::new();
    shape.set_heights(5, 5, 3, 3, &patch, 3, &mut pool).unwrap();
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(shape.stats().triangle_count, 2 * 4);
    assert_eq!(shape.bits_per_sample(), settings.bits_per_sample);
    assert!(!shape.is_no_collision(6, 6));
    assert!(shape.is_no_collision(4, 6));

    let ray = HeightFieldRay::new(Vec3::new(6.5, 10.0, 6.5), Vec3::new(0.0, -20.0, 0.0));
    let hit = shape.cast_ray(&ray, &RayCastOptions::default()).expect("patched area should be hit");
    assert!((ray.point_at(hit.fraction).y - 2.0).abs() < 1.0e-3);

    // Punch the patch out again
    shape
        .set_heights(5, 5, 3, 3, &[NO_COLLISION_VALUE; 9], 3, &mut pool)
        .unwrap();
    assert_eq!(shape.stats().triangle_count, 0);
    assert!(shape.cast_ray(&ray, &RayCastOptions::default()).is_none());
}

#[test]
fn test_set_materials() {
    let n = 32u32;
    let quads = n - 1;
    let m = make_materials(6);

    let settings = HeightFieldSettings::new(vec![0.0; (n * n) as usize], Vec3::ZERO, Vec3::ONE, n)
        .with_block_size(4)
        .with_materials(vec![m[0].clone()], vec![0; (quads * quads) as usize]);
    let mut shape = settings.create().unwrap();

    let mut current: Vec<MaterialRef> = vec![m[0].clone(); (quads * quads) as usize];

    let check = |shape: &HeightFieldShape, current: &[MaterialRef]| {
        let list = shape.material_list();
        let mut indices = vec![0u8; (quads * quads) as usize];
        shape.get_materials(0, 0, quads, quads, &mut indices, quads as usize).unwrap();
        for (i, (&index, expected)) in indices.iter().zip(current).enumerate() {
            assert!(same_material(&list[index as usize], expected), "quad {} has wrong material", i);
        }
    };
    check(&shape, &current);

    let update = |shape: &mut HeightFieldShape,
                      current: &mut Vec<MaterialRef>,
                      (sx, sy, cx, cy): (u32, u32, u32, u32),
                      list: Option<&[MaterialRef]>| {
        let palette: Vec<MaterialRef> = list.map_or_else(|| shape.material_list().to_vec(), <[MaterialRef]>::to_vec);
        let mut rng = StdRng::seed_from_u64(u64::from(sx * 1000 + sy));
        let mut patch = vec![0u8; (cx * cy) as usize];
        for y in 0..cy {
            for x in 0..cx {
                let index = rng.random_range(0..palette.len());
                patch[(y * cx + x) as usize] = index as u8;
                current[((sy + y) * quads + sx + x) as usize] = palette[index].clone();
            }
        }
        let mut pool = ScratchPool::new();
        shape
            .set_materials(sx, sy, cx, cy, &patch, cx as usize, list, &mut pool)
            .expect("update should succeed");
        assert_eq!(pool.outstanding(), 0);
    };

    let palettes: [(u32, u32, u32, u32, Vec<MaterialRef>); 5] = [
        (4, 16, 16, 8, vec![m[1].clone(), m[0].clone()]),
        (8, 16, 16, 8, vec![m[0].clone(), m[2].clone()]),
        (8, 8, 16, 8, vec![m[0].clone(), m[1].clone(), m[2].clone(), m[3].clone()]),
        (0, 0, 30, 30, vec![m[0].clone(), m[1].clone(), m[4].clone(), m[2].clone(), m[3].clone()]),
        (1, 1, 30, 30, vec![m[4].clone(), m[3].clone(), m[0].clone(), m[1].clone(), m[2].clone(), m[5].clone()]),
    ];
    for (sx, sy, cx, cy, palette) in &palettes {
        update(&mut shape, &mut current, (*sx, *sy, *cx, *cy), Some(palette.as_slice()));
        check(&shape, &current);
    }
    assert_eq!(shape.material_list().len(), 6, "palette should be deduplicated");

    // Indices into the shape's own list
    update(&mut shape, &mut current, (2, 5, 10, 15), None);
    check(&shape, &current);

    for y in 0..quads {
        for x in 0..quads {
            assert!(same_material(shape.get_material(x, y), &current[(y * quads + x) as usize]));
        }
    }
}

#[test]
fn test_set_materials_overflow_is_atomic() {
    let n = 16u32;
    let quads = n - 1;
    let mut settings = HeightFieldSettings::new(vec![0.0; (n * n) as usize], Vec3::ZERO, Vec3::ONE, n).with_block_size(4);
    randomize_materials(&mut settings, 256);
    let mut shape = settings.create().unwrap();

    let mut before = vec![0u8; (quads * quads) as usize];
    shape.get_materials(0, 0, quads, quads, &mut before, quads as usize).unwrap();

    let newcomer = make_materials(1);
    let mut pool = ScratchPool::new();
    let result = shape.set_materials(0, 0, 2, 2, &[0; 4], 2, Some(newcomer.as_slice()), &mut pool);
    assert_eq!(result, Err(HeightFieldError::TooManyMaterials { count: 257, max: 256 }));
    assert_eq!(pool.outstanding(), 0, "scratch must be released on failure");

    let mut after = vec![0u8; (quads * quads) as usize];
    shape.get_materials(0, 0, quads, quads, &mut after, quads as usize).unwrap();
    assert_eq!(before, after);
    assert_eq!(shape.material_list().len(), 256);

    // Reusing a known material still works at the ceiling
    let known = vec![settings.materials[17].clone()];
    shape.set_materials(0, 0, 2, 2, &[0; 4], 2, Some(known.as_slice()), &mut pool).unwrap();
    assert!(same_material(shape.get_material(1, 1), &settings.materials[17]));
}
