//! Coordinate mapping between global blocks, sections, chunks and LOD cells
//!
//! The world is an unbounded XY grid of sections. Each section spans the
//! full Z range and holds `section_size x section_size` chunk columns at
//! LOD 0; every LOD step halves the number of columns and doubles the
//! physical extent of one chunk. A chunk always holds `chunk_size^3` cells,
//! and a LOD-k cell covers `2^k` blocks per axis.
//!
//! All divisions are floor divisions, so negative block coordinates land in
//! the non-negative local ranges `[0, chunk_size)` and `[0, section_size)`.

use crate::core::types::{IVec2, IVec3, Vec3};
use crate::core::{Error, Result};
use crate::math::Aabb;

/// Upper bound on LOD levels (cell shifts stay well inside i32)
pub const MAX_LOD_LEVELS: u32 = 8;

/// The six face neighbour offsets
pub const FACE_DIRECTIONS: [IVec3; 6] = [
    IVec3::new(-1, 0, 0),
    IVec3::new(1, 0, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(0, 0, -1),
    IVec3::new(0, 0, 1),
];

/// The four lateral (XY) neighbour offsets
pub const LATERAL_DIRECTIONS: [IVec3; 4] = [
    IVec3::new(-1, 0, 0),
    IVec3::new(1, 0, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(0, 1, 0),
];

/// Global parameters fixed at world creation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorldParams {
    chunk_size: u32,
    section_size: u32,
    lod_levels: u32,
}

impl WorldParams {
    /// Validate and build world parameters.
    ///
    /// `chunk_size` must be a power of two, and both sizes must stay non-zero
    /// (and `section_size` evenly divisible) through `lod_levels - 1` halvings.
    pub fn new(chunk_size: u32, section_size: u32, lod_levels: u32) -> Result<Self> {
        if !chunk_size.is_power_of_two() {
            return Err(Error::Config(format!(
                "chunk_size must be a power of two, got {chunk_size}"
            )));
        }
        if lod_levels == 0 || lod_levels > MAX_LOD_LEVELS {
            return Err(Error::Config(format!(
                "lod_levels must be in 1..={MAX_LOD_LEVELS}, got {lod_levels}"
            )));
        }
        let shift = lod_levels - 1;
        if chunk_size >> shift == 0 {
            return Err(Error::Config(format!(
                "chunk_size {chunk_size} vanishes after {shift} LOD halvings"
            )));
        }
        if section_size >> shift == 0 || section_size % (1 << shift) != 0 {
            return Err(Error::Config(format!(
                "section_size {section_size} cannot be halved {shift} times"
            )));
        }
        Ok(Self {
            chunk_size,
            section_size,
            lod_levels,
        })
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn section_size(&self) -> u32 {
        self.section_size
    }

    /// Number of LOD levels; also the "nothing resident / not rendered" sentinel
    pub fn lod_levels(&self) -> u32 {
        self.lod_levels
    }

    /// Cells stored per chunk
    pub fn cells_per_chunk(&self) -> usize {
        (self.chunk_size as usize).pow(3)
    }

    /// Section width in blocks
    pub fn section_blocks(&self) -> i32 {
        (self.chunk_size * self.section_size) as i32
    }

    /// Chunk columns per section side at `lod`
    pub fn chunks_per_side(&self, lod: u32) -> i32 {
        (self.section_size >> lod) as i32
    }

    /// Split a global block coordinate into section, chunk and local cell.
    pub fn split_block(&self, block: IVec3) -> BlockLocation {
        let cs = self.chunk_size as i32;
        let ss = self.section_size as i32;
        let global_chunk = IVec3::new(
            block.x.div_euclid(cs),
            block.y.div_euclid(cs),
            block.z.div_euclid(cs),
        );
        BlockLocation {
            section: IVec2::new(global_chunk.x.div_euclid(ss), global_chunk.y.div_euclid(ss)),
            chunk: IVec3::new(
                global_chunk.x.rem_euclid(ss),
                global_chunk.y.rem_euclid(ss),
                global_chunk.z,
            ),
            local: IVec3::new(block.x.rem_euclid(cs), block.y.rem_euclid(cs), block.z.rem_euclid(cs)),
        }
    }

    /// Inverse of [`split_block`](Self::split_block).
    pub fn chunk_local_to_global(&self, location: &BlockLocation) -> IVec3 {
        let cs = self.chunk_size as i32;
        let ss = self.section_size as i32;
        IVec3::new(
            (location.section.x * ss + location.chunk.x) * cs + location.local.x,
            (location.section.y * ss + location.chunk.y) * cs + location.local.y,
            location.chunk.z * cs + location.local.z,
        )
    }

    /// Section containing a block-space position.
    pub fn section_of_position(&self, pos: Vec3) -> IVec2 {
        let size = self.section_blocks() as f32;
        IVec2::new((pos.x / size).floor() as i32, (pos.y / size).floor() as i32)
    }

    /// Chunk key and local cell for a global cell coordinate at `lod`.
    ///
    /// Cell coordinates at LOD k are block coordinates shifted right by k.
    pub fn locate_cell(&self, lod: u32, cell: IVec3) -> (ChunkKey, IVec3) {
        let cs = self.chunk_size as i32;
        let global_chunk = IVec3::new(
            cell.x.div_euclid(cs),
            cell.y.div_euclid(cs),
            cell.z.div_euclid(cs),
        );
        let local = IVec3::new(cell.x.rem_euclid(cs), cell.y.rem_euclid(cs), cell.z.rem_euclid(cs));
        (self.key_from_global_chunk(lod, global_chunk), local)
    }

    /// Key for a global chunk coordinate at `lod`.
    pub fn key_from_global_chunk(&self, lod: u32, global_chunk: IVec3) -> ChunkKey {
        let n = self.chunks_per_side(lod);
        ChunkKey {
            section: IVec2::new(global_chunk.x.div_euclid(n), global_chunk.y.div_euclid(n)),
            lod,
            chunk: IVec3::new(global_chunk.x.rem_euclid(n), global_chunk.y.rem_euclid(n), global_chunk.z),
        }
    }

    /// Global chunk coordinate of a key at its own LOD.
    pub fn global_chunk(&self, key: &ChunkKey) -> IVec3 {
        let n = self.chunks_per_side(key.lod);
        IVec3::new(
            key.section.x * n + key.chunk.x,
            key.section.y * n + key.chunk.y,
            key.chunk.z,
        )
    }

    /// Global cell coordinate of a chunk's first cell.
    pub fn chunk_origin_cell(&self, key: &ChunkKey) -> IVec3 {
        self.global_chunk(key) * self.chunk_size as i32
    }

    /// The same-LOD chunk across `direction` (may lie in another section).
    pub fn neighbour_key(&self, key: &ChunkKey, direction: IVec3) -> ChunkKey {
        self.key_from_global_chunk(key.lod, self.global_chunk(key) + direction)
    }

    /// The chunk at `lod` that covers `key` (`lod >= key.lod`).
    pub fn ancestor_key(&self, key: &ChunkKey, lod: u32) -> ChunkKey {
        let shift = lod - key.lod;
        self.key_from_global_chunk(lod, self.global_chunk(key) >> shift)
    }

    /// Block-space bounds of a section over chunk layers `min_z..=max_z`.
    pub fn section_bounds(&self, section: IVec2, min_z: i32, max_z: i32) -> Aabb {
        let size = self.section_blocks() as f32;
        let cs = self.chunk_size as f32;
        Aabb::new(
            Vec3::new(section.x as f32 * size, section.y as f32 * size, min_z as f32 * cs),
            Vec3::new(
                (section.x + 1) as f32 * size,
                (section.y + 1) as f32 * size,
                (max_z + 1) as f32 * cs,
            ),
        )
    }

    /// Block-space bounds of a chunk; each LOD step doubles the extent.
    pub fn chunk_bounds(&self, key: &ChunkKey) -> Aabb {
        let extent = (self.chunk_size << key.lod) as f32;
        let min = self.global_chunk(key).as_vec3() * extent;
        Aabb::new(min, min + Vec3::splat(extent))
    }
}

/// A block split into its section, chunk and local cell
///
/// `chunk.x`/`chunk.y` are relative to the section; `chunk.z` is the global
/// chunk layer since sections span the whole Z range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockLocation {
    pub section: IVec2,
    pub chunk: IVec3,
    pub local: IVec3,
}

impl BlockLocation {
    /// Key of the LOD-0 chunk holding this block
    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            section: self.section,
            lod: 0,
            chunk: self.chunk,
        }
    }
}

/// Identifies one chunk slot: owning section, LOD, and chunk position
/// (XY relative to the section, Z the global chunk layer at that LOD).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub section: IVec2,
    pub lod: u32,
    pub chunk: IVec3,
}

impl ChunkKey {
    pub fn new(section: IVec2, lod: u32, chunk: IVec3) -> Self {
        Self { section, lod, chunk }
    }
}

/// Flat index of a local cell inside a `chunk_size^3` array.
#[inline]
pub fn cell_index(chunk_size: u32, local: IVec3) -> usize {
    let cs = chunk_size as usize;
    (local.z as usize * cs + local.y as usize) * cs + local.x as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> WorldParams {
        WorldParams::new(16, 8, 3).unwrap()
    }

    #[test]
    fn test_params_validation() {
        assert!(WorldParams::new(16, 8, 3).is_ok());
        assert!(WorldParams::new(4, 4, 3).is_ok());
        assert!(WorldParams::new(12, 8, 3).is_err());
        assert!(WorldParams::new(0, 8, 1).is_err());
        assert!(WorldParams::new(2, 8, 3).is_err());
        assert!(WorldParams::new(16, 2, 3).is_err());
        assert!(WorldParams::new(16, 6, 3).is_err());
        assert!(WorldParams::new(16, 8, 0).is_err());
    }

    #[test]
    fn test_split_positive_block() {
        let loc = params().split_block(IVec3::new(17, 3, 0));
        assert_eq!(loc.section, IVec2::new(0, 0));
        assert_eq!(loc.chunk, IVec3::new(1, 0, 0));
        assert_eq!(loc.local, IVec3::new(1, 3, 0));
    }

    #[test]
    fn test_split_negative_block() {
        let loc = params().split_block(IVec3::new(-1, -1, -1));
        assert_eq!(loc.section, IVec2::new(-1, -1));
        assert_eq!(loc.chunk, IVec3::new(7, 7, -1));
        assert_eq!(loc.local, IVec3::new(15, 15, 15));

        let loc = params().split_block(IVec3::new(-128, -129, -16));
        assert_eq!(loc.section, IVec2::new(-1, -2));
        assert_eq!(loc.chunk, IVec3::new(0, 7, -1));
        assert_eq!(loc.local, IVec3::new(0, 15, 0));
    }

    #[test]
    fn test_split_is_bijection() {
        let p = params();
        for x in (-300..300).step_by(7) {
            for y in (-300..300).step_by(11) {
                for z in [-257, -17, -16, -1, 0, 1, 15, 16, 255] {
                    let block = IVec3::new(x, y, z);
                    let loc = p.split_block(block);
                    assert!((0..16).contains(&loc.local.x));
                    assert!((0..16).contains(&loc.local.y));
                    assert!((0..16).contains(&loc.local.z));
                    assert!((0..8).contains(&loc.chunk.x));
                    assert!((0..8).contains(&loc.chunk.y));
                    assert_eq!(p.chunk_local_to_global(&loc), block);
                }
            }
        }
    }

    #[test]
    fn test_locate_cell_at_lod() {
        let p = params();
        // Block 200 -> LOD 1 cell 100 -> global chunk 6 -> section 1, column 2 (4 columns at LOD 1)
        let (key, local) = p.locate_cell(1, IVec3::new(200 >> 1, 0, 0));
        assert_eq!(key.section, IVec2::new(1, 0));
        assert_eq!(key.lod, 1);
        assert_eq!(key.chunk, IVec3::new(2, 0, 0));
        assert_eq!(local, IVec3::new(4, 0, 0));
    }

    #[test]
    fn test_neighbour_crosses_section() {
        let p = params();
        let key = ChunkKey::new(IVec2::new(0, 0), 0, IVec3::new(0, 3, 2));
        let west = p.neighbour_key(&key, IVec3::new(-1, 0, 0));
        assert_eq!(west.section, IVec2::new(-1, 0));
        assert_eq!(west.chunk, IVec3::new(7, 3, 2));
    }

    #[test]
    fn test_ancestor_key() {
        let p = params();
        let key = ChunkKey::new(IVec2::new(-1, 0), 0, IVec3::new(7, 5, -1));
        let parent = p.ancestor_key(&key, 1);
        assert_eq!(parent.section, IVec2::new(-1, 0));
        assert_eq!(parent.chunk, IVec3::new(3, 2, -1));
        let grand = p.ancestor_key(&key, 2);
        assert_eq!(grand.chunk, IVec3::new(1, 1, -1));
    }

    #[test]
    fn test_chunk_bounds_double_per_lod() {
        let p = params();
        let lod0 = p.chunk_bounds(&ChunkKey::new(IVec2::new(1, 0), 0, IVec3::new(1, 0, 0)));
        assert_eq!(lod0.min, Vec3::new(144.0, 0.0, 0.0));
        assert_eq!(lod0.size(), Vec3::splat(16.0));

        let lod2 = p.chunk_bounds(&ChunkKey::new(IVec2::new(1, 0), 2, IVec3::new(1, 0, -1)));
        assert_eq!(lod2.min, Vec3::new(192.0, 0.0, -64.0));
        assert_eq!(lod2.size(), Vec3::splat(64.0));
    }

    #[test]
    fn test_section_bounds() {
        let bounds = params().section_bounds(IVec2::new(-1, 2), -1, 3);
        assert_eq!(bounds.min, Vec3::new(-128.0, 256.0, -16.0));
        assert_eq!(bounds.max, Vec3::new(0.0, 384.0, 64.0));
    }

    #[test]
    fn test_section_of_position() {
        let p = params();
        assert_eq!(p.section_of_position(Vec3::new(0.0, 0.0, 0.0)), IVec2::ZERO);
        assert_eq!(p.section_of_position(Vec3::new(-0.5, 127.9, 50.0)), IVec2::new(-1, 0));
    }
}
