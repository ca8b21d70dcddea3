//! Material palette and per-quad material indices
//!
//! Materials are shared handles owned by whoever created them. The store
//! keeps an ordered, deduplicated palette of handles and a packed grid of
//! palette positions, one per quad, packed at the narrowest width that can
//! address the palette.

use crate::bits;
use crate::error::{HeightFieldError, Result};
use crate::scratch::ScratchAllocator;
use std::mem;
use std::sync::{Arc, LazyLock};

/// Maximum palette size; indices are stored in at most 8 bits
pub const MAX_MATERIALS: usize = 256;

/// Surface material referenced by collision triangles
///
/// The height field treats materials as opaque: only their identity matters.
#[derive(Debug)]
pub struct PhysicsMaterial {
    name: String,
}

impl PhysicsMaterial {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Shared material handle; two handles are the same material when they point
/// to the same allocation
pub type MaterialRef = Arc<PhysicsMaterial>;

static DEFAULT_MATERIAL: LazyLock<MaterialRef> = LazyLock::new(|| Arc::new(PhysicsMaterial::new("Default")));

/// Material used by quads of a shape without a palette
pub fn default_material() -> &'static MaterialRef {
    &DEFAULT_MATERIAL
}

/// Identity comparison of material handles
#[inline]
pub fn same_material(a: &MaterialRef, b: &MaterialRef) -> bool {
    Arc::ptr_eq(a, b)
}

/// Palette plus packed per-quad index grid
#[derive(Clone, Debug)]
pub struct MaterialStore {
    /// Quads per side
    quad_count: u32,
    materials: Vec<MaterialRef>,
    index_bits: u32,
    /// Empty while `index_bits` is 0
    indices: Vec<u8>,
}

impl MaterialStore {
    /// Store without materials; every quad resolves to the default material
    pub fn empty(quad_count: u32) -> Self {
        Self {
            quad_count,
            materials: Vec::new(),
            index_bits: 0,
            indices: Vec::new(),
        }
    }

    /// Build from a palette and one index per quad (row-major)
    ///
    /// The palette is taken as given, duplicates included. An empty `indices`
    /// slice selects palette entry 0 everywhere.
    pub fn build(quad_count: u32, materials: Vec<MaterialRef>, indices: &[u8]) -> Result<Self> {
        Self::check(quad_count, materials.len(), indices)?;

        let quads = (quad_count * quad_count) as usize;
        let index_bits = bits::bits_for_count(materials.len());
        let mut packed = vec![0u8; bits::packed_len(quads, index_bits)];
        for (i, &index) in indices.iter().enumerate() {
            bits::write(&mut packed, i, index_bits, index as u32);
        }

        Ok(Self {
            quad_count,
            materials,
            index_bits,
            indices: packed,
        })
    }

    /// Validate a palette size and per-quad index array without building
    pub fn check(quad_count: u32, material_count: usize, indices: &[u8]) -> Result<()> {
        if material_count > MAX_MATERIALS {
            return Err(HeightFieldError::TooManyMaterials {
                count: material_count,
                max: MAX_MATERIALS,
            });
        }
        if indices.is_empty() {
            return Ok(());
        }

        let quads = (quad_count * quad_count) as usize;
        if indices.len() != quads {
            return Err(HeightFieldError::MaterialIndexCountMismatch {
                expected: quads,
                found: indices.len(),
            });
        }
        let limit = material_count.max(1);
        match indices.iter().find(|&&i| i as usize >= limit) {
            Some(&index) => Err(HeightFieldError::MaterialIndexOutOfRange {
                index: index as u32,
                material_count,
            }),
            None => Ok(()),
        }
    }

    pub fn materials(&self) -> &[MaterialRef] {
        &self.materials
    }

    /// Width of one packed index
    pub fn index_bits(&self) -> u32 {
        self.index_bits
    }

    #[inline]
    fn quad_index(&self, x: u32, y: u32) -> usize {
        y as usize * self.quad_count as usize + x as usize
    }

    /// Palette position of quad `(x, y)`
    pub fn index_at(&self, x: u32, y: u32) -> u8 {
        assert!(
            x < self.quad_count && y < self.quad_count,
            "quad ({}, {}) outside {}x{} quads",
            x,
            y,
            self.quad_count,
            self.quad_count
        );
        bits::read(&self.indices, self.quad_index(x, y), self.index_bits) as u8
    }

    /// Material of quad `(x, y)`, or the default when the palette is empty
    pub fn material_at(&self, x: u32, y: u32) -> &MaterialRef {
        let index = self.index_at(x, y);
        self.materials.get(index as usize).unwrap_or(default_material())
    }

    /// Copy the palette positions of a rectangle of quads into `out`
    ///
    /// The rectangle must already be checked against the quad grid.
    pub fn read_rect(&self, x: u32, y: u32, width: u32, height: u32, out: &mut [u8], stride: usize) {
        for j in 0..height {
            let row = &mut out[j as usize * stride..j as usize * stride + width as usize];
            for (i, slot) in row.iter_mut().enumerate() {
                *slot = bits::read(&self.indices, self.quad_index(x + i as u32, y + j), self.index_bits) as u8;
            }
        }
    }

    /// Assign materials to a rectangle of quads
    ///
    /// With `palette`, `indices` address `palette` and its handles are merged
    /// into the store's list by identity: existing entries keep their
    /// position, new ones are appended in palette order. An empty list first
    /// receives the default material at position 0 so quads outside the
    /// rectangle keep resolving to it. Without `palette`, `indices` address
    /// the current list directly.
    ///
    /// Fails with [`HeightFieldError::TooManyMaterials`] when the merged list
    /// would exceed [`MAX_MATERIALS`], or
    /// [`HeightFieldError::MaterialIndexOutOfRange`] for an index outside the
    /// list in use. On failure nothing is modified. Scratch buffers are
    /// released on every path.
    pub fn set_rect(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        indices: &[u8],
        stride: usize,
        palette: Option<&[MaterialRef]>,
        scratch: &mut dyn ScratchAllocator,
    ) -> Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }

        let mut remap = scratch.alloc_u16(palette.map_or(0, <[MaterialRef]>::len));
        let result = self.plan(width, height, indices, stride, palette, &mut remap);
        let result = result.map(|merged_len| {
            if let Some(palette) = palette {
                self.merge_palette(palette, &remap, merged_len);
            }
            for j in 0..height {
                for i in 0..width {
                    let index = indices[j as usize * stride + i as usize];
                    let mapped = if palette.is_some() { remap[index as usize] as u32 } else { index as u32 };
                    let at = self.quad_index(x + i, y + j);
                    bits::write(&mut self.indices, at, self.index_bits, mapped);
                }
            }
        });

        if let Err(err) = &result {
            tracing::debug!("set_materials rejected: {}", err);
        }
        scratch.free_u16(remap);
        result
    }

    /// Validate an update and compute where each palette entry will land
    ///
    /// Fills `remap` (one slot per palette entry) and returns the merged list
    /// length. Does not touch the store.
    fn plan(
        &self,
        width: u32,
        height: u32,
        indices: &[u8],
        stride: usize,
        palette: Option<&[MaterialRef]>,
        remap: &mut [u16],
    ) -> Result<usize> {
        let (limit, merged_len) = match palette {
            Some(palette) => {
                // An empty list gains the default material before anything else
                let base: &[MaterialRef] = if self.materials.is_empty() {
                    std::slice::from_ref(default_material())
                } else {
                    &self.materials
                };
                let mut len = base.len();
                for (i, material) in palette.iter().enumerate() {
                    let existing = base
                        .iter()
                        .position(|m| same_material(m, material))
                        .or_else(|| (0..i).find(|&j| same_material(&palette[j], material)).map(|j| remap[j] as usize));
                    remap[i] = match existing {
                        Some(position) => position as u16,
                        None => {
                            len += 1;
                            (len - 1) as u16
                        }
                    };
                }
                if len > MAX_MATERIALS {
                    return Err(HeightFieldError::TooManyMaterials {
                        count: len,
                        max: MAX_MATERIALS,
                    });
                }
                (palette.len(), len)
            }
            None => (self.materials.len().max(1), self.materials.len()),
        };

        for j in 0..height as usize {
            let row = &indices[j * stride..j * stride + width as usize];
            if let Some(&index) = row.iter().find(|&&i| i as usize >= limit) {
                return Err(HeightFieldError::MaterialIndexOutOfRange {
                    index: index as u32,
                    material_count: limit,
                });
            }
        }
        Ok(merged_len)
    }

    /// Append new palette entries and widen the index grid if needed
    fn merge_palette(&mut self, palette: &[MaterialRef], remap: &[u16], merged_len: usize) {
        if self.materials.is_empty() {
            self.materials.push(default_material().clone());
        }
        for (material, &position) in palette.iter().zip(remap) {
            if position as usize == self.materials.len() {
                self.materials.push(material.clone());
            }
        }
        debug_assert_eq!(self.materials.len(), merged_len);

        let bits = bits::bits_for_count(self.materials.len());
        if bits > self.index_bits {
            self.repack(bits);
        }
    }

    /// Rewrite the whole index grid at a wider width
    ///
    /// The new grid is filled completely before it replaces the old one.
    fn repack(&mut self, bits: u32) {
        let quads = (self.quad_count * self.quad_count) as usize;
        let mut packed = vec![0u8; bits::packed_len(quads, bits)];
        for i in 0..quads {
            bits::write(&mut packed, i, bits, bits::read(&self.indices, i, self.index_bits));
        }
        tracing::debug!(
            "material index grid widened from {} to {} bits ({} materials)",
            self.index_bits,
            bits,
            self.materials.len()
        );
        self.indices = packed;
        self.index_bits = bits;
    }

    /// Heap memory held by the store
    pub fn heap_bytes(&self) -> usize {
        self.materials.capacity() * mem::size_of::<MaterialRef>() + self.indices.capacity()
    }
}
