//! Sections: XY tiles spanning the full Z range, one chunk grid per LOD

use crate::core::types::{IVec2, IVec3};
use crate::voxel::block::{block_type, AIR};
use crate::voxel::chunk::{Cell, Chunk, ChunkData};
use crate::voxel::coords::{ChunkKey, WorldParams};

/// Load lifecycle of a section
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LoadState {
    #[default]
    Unloaded,
    /// Being filled by the terrain generator
    Generating,
    /// Resident and identical to its stored copy
    Loaded,
    /// Resident with edits not yet written back
    Changed,
}

/// Chunk slots of one LOD: `side x side` columns over layers `min_z..=max_z`
#[derive(Debug)]
pub struct LodGrid {
    side: i32,
    min_z: i32,
    max_z: i32,
    slots: Vec<Option<Box<Chunk>>>,
}

impl LodGrid {
    fn new(side: i32, min_z: i32, max_z: i32) -> Self {
        let height = (max_z - min_z + 1).max(0) as usize;
        let mut slots = Vec::new();
        slots.resize_with(side as usize * side as usize * height, || None);
        Self {
            side,
            min_z,
            max_z,
            slots,
        }
    }

    pub fn side(&self) -> i32 {
        self.side
    }

    /// Inclusive chunk-layer range at this LOD (empty when `min > max`)
    pub fn z_range(&self) -> (i32, i32) {
        (self.min_z, self.max_z)
    }

    fn slot_index(&self, pos: IVec3) -> Option<usize> {
        if pos.x < 0 || pos.y < 0 || pos.x >= self.side || pos.y >= self.side {
            return None;
        }
        if pos.z < self.min_z || pos.z > self.max_z {
            return None;
        }
        let side = self.side as usize;
        Some((((pos.z - self.min_z) as usize * side) + pos.y as usize) * side + pos.x as usize)
    }

    pub fn get(&self, pos: IVec3) -> Option<&Chunk> {
        self.slot_index(pos).and_then(|i| self.slots[i].as_deref())
    }

    pub fn get_mut(&mut self, pos: IVec3) -> Option<&mut Chunk> {
        self.slot_index(pos).and_then(|i| self.slots[i].as_deref_mut())
    }

    /// Slot positions in storage order (z, then y, then x)
    pub fn positions(&self) -> impl Iterator<Item = IVec3> + '_ {
        let side = self.side;
        (self.min_z..=self.max_z)
            .flat_map(move |z| (0..side).flat_map(move |y| (0..side).map(move |x| IVec3::new(x, y, z))))
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.slots.iter().filter_map(|slot| slot.as_deref())
    }

    pub fn chunks_mut(&mut self) -> impl Iterator<Item = &mut Chunk> {
        self.slots.iter_mut().filter_map(|slot| slot.as_deref_mut())
    }

    fn put(&mut self, chunk: Box<Chunk>) -> bool {
        match self.slot_index(chunk.key.chunk) {
            Some(i) => {
                self.slots[i] = Some(chunk);
                true
            }
            None => false,
        }
    }

    fn take(&mut self, pos: IVec3) -> Option<Box<Chunk>> {
        self.slot_index(pos).and_then(|i| self.slots[i].take())
    }

    fn drain(&mut self) -> Vec<Box<Chunk>> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    /// Reallocate for a new layer range, keeping every chunk that still fits.
    fn resize_z(&mut self, min_z: i32, max_z: i32) {
        let chunks = self.drain();
        *self = LodGrid::new(self.side, min_z, max_z);
        for chunk in chunks {
            let key = chunk.key;
            if !self.put(chunk) {
                log::error!("Chunk {key:?} dropped while resizing its section grid");
            }
        }
    }
}

/// One XY tile of the world
#[derive(Debug)]
pub struct Section {
    pos: IVec2,
    params: WorldParams,
    min_chunk_z: i32,
    max_chunk_z: i32,
    pub load_state: LoadState,
    loaded_lod: u32,
    pending_meshes: u32,
    lods: Vec<LodGrid>,
}

impl Section {
    /// New section with no resident LOD, covering LOD-0 layers `min_z..=max_z`
    pub fn new(params: WorldParams, pos: IVec2, min_z: i32, max_z: i32) -> Self {
        let lods = (0..params.lod_levels())
            .map(|k| {
                let side = params.chunks_per_side(k);
                if min_z > max_z {
                    LodGrid::new(side, 0, -1)
                } else {
                    LodGrid::new(side, min_z >> k, max_z >> k)
                }
            })
            .collect();
        Self {
            pos,
            params,
            min_chunk_z: min_z,
            max_chunk_z: max_z,
            load_state: LoadState::Unloaded,
            loaded_lod: params.lod_levels(),
            pending_meshes: 0,
            lods,
        }
    }

    pub fn pos(&self) -> IVec2 {
        self.pos
    }

    pub fn params(&self) -> &WorldParams {
        &self.params
    }

    pub fn min_chunk_z(&self) -> i32 {
        self.min_chunk_z
    }

    pub fn max_chunk_z(&self) -> i32 {
        self.max_chunk_z
    }

    /// Finest resident LOD; `lod_levels` when nothing is resident
    pub fn loaded_lod(&self) -> u32 {
        self.loaded_lod
    }

    /// Mark LODs `lod..` resident. Sections built outside a world start with
    /// nothing resident.
    pub fn set_loaded_lod(&mut self, lod: u32) {
        debug_assert!(lod <= self.params.lod_levels());
        self.loaded_lod = lod;
    }

    /// Chunks of this section that are queued or being meshed
    pub fn pending_meshes(&self) -> u32 {
        self.pending_meshes
    }

    pub(crate) fn add_pending_mesh(&mut self) {
        self.pending_meshes += 1;
    }

    pub(crate) fn remove_pending_mesh(&mut self) {
        debug_assert!(self.pending_meshes > 0, "pending mesh counter underflow");
        self.pending_meshes = self.pending_meshes.saturating_sub(1);
    }

    /// LOD `lod` is held in memory
    pub fn is_resident(&self, lod: u32) -> bool {
        lod >= self.loaded_lod && lod < self.params.lod_levels()
    }

    pub fn is_changed(&self) -> bool {
        self.load_state == LoadState::Changed
    }

    pub fn grid(&self, lod: u32) -> &LodGrid {
        &self.lods[lod as usize]
    }

    pub fn chunk(&self, lod: u32, pos: IVec3) -> Option<&Chunk> {
        self.lods.get(lod as usize)?.get(pos)
    }

    pub fn chunk_mut(&mut self, lod: u32, pos: IVec3) -> Option<&mut Chunk> {
        self.lods.get_mut(lod as usize)?.get_mut(pos)
    }

    /// Chunks resident at `lod`
    pub fn chunks(&self, lod: u32) -> impl Iterator<Item = &Chunk> {
        self.lods.get(lod as usize).into_iter().flat_map(LodGrid::chunks)
    }

    pub fn chunks_mut(&mut self, lod: u32) -> impl Iterator<Item = &mut Chunk> {
        self.lods.get_mut(lod as usize).into_iter().flat_map(LodGrid::chunks_mut)
    }

    /// All chunks over every resident LOD
    pub fn all_chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.lods.iter().flat_map(LodGrid::chunks)
    }

    /// Extend the LOD-0 layer range so it includes layer `z`.
    pub fn grow_z(&mut self, z: i32) {
        let (min_z, max_z) = if self.min_chunk_z > self.max_chunk_z {
            (z, z)
        } else if z < self.min_chunk_z {
            (z, self.max_chunk_z)
        } else if z > self.max_chunk_z {
            (self.min_chunk_z, z)
        } else {
            return;
        };
        self.min_chunk_z = min_z;
        self.max_chunk_z = max_z;
        for (k, grid) in self.lods.iter_mut().enumerate() {
            grid.resize_z(min_z >> k, max_z >> k);
        }
    }

    /// Chunk at `lod`/`pos`, inserting an empty one if absent.
    ///
    /// Returns `None` when `pos` lies outside the section's columns.
    pub fn chunk_or_insert(&mut self, lod: u32, pos: IVec3) -> Option<&mut Chunk> {
        let side = self.params.chunks_per_side(lod);
        if lod >= self.params.lod_levels() || pos.x < 0 || pos.y < 0 || pos.x >= side || pos.y >= side {
            return None;
        }
        let lowest = pos.z << lod;
        self.grow_z(lowest);
        self.grow_z(lowest + (1 << lod) - 1);

        let grid = &mut self.lods[lod as usize];
        if grid.get(pos).is_none() {
            let key = ChunkKey::new(self.pos, lod, pos);
            let chunk = Chunk::new(key, self.params.chunk_size(), self.params.lod_levels());
            grid.put(Box::new(chunk));
        }
        grid.get_mut(pos)
    }

    /// Place a chunk built elsewhere (e.g. decoded from disk).
    pub(crate) fn insert_chunk(&mut self, chunk: Chunk) {
        let lod = chunk.key.lod;
        let lowest = chunk.key.chunk.z << lod;
        self.grow_z(lowest);
        self.grow_z(lowest + (1 << lod) - 1);
        let key = chunk.key;
        if !self.lods[lod as usize].put(Box::new(chunk)) {
            log::error!("Chunk {key:?} does not fit section {:?}", self.pos);
        }
    }

    pub(crate) fn remove_chunk(&mut self, lod: u32, pos: IVec3) -> Option<Box<Chunk>> {
        self.lods.get_mut(lod as usize)?.take(pos)
    }

    /// Drop every LOD finer than `lod` and make `lod` the finest resident one.
    ///
    /// Returns the removed chunks so their render proxies can be released.
    pub(crate) fn trim_to(&mut self, lod: u32) -> Vec<Box<Chunk>> {
        let mut removed = Vec::new();
        for k in 0..lod.min(self.params.lod_levels()) {
            removed.extend(self.lods[k as usize].drain());
        }
        self.loaded_lod = lod.max(self.loaded_lod);
        removed
    }

    /// Every chunk of every LOD, leaving the section empty.
    pub(crate) fn drain_all(&mut self) -> Vec<Box<Chunk>> {
        self.lods.iter_mut().flat_map(LodGrid::drain).collect()
    }

    /// Cell at global cell coordinate `cell` of `lod`; absent chunks read as air.
    pub fn cell(&self, lod: u32, cell: IVec3) -> Cell {
        let (key, local) = self.params.locate_cell(lod, cell);
        debug_assert_eq!(key.section, self.pos, "cell {cell} of LOD {lod} is outside section");
        self.chunk(lod, key.chunk)
            .map(|chunk| chunk.data.cell(local))
            .unwrap_or_default()
    }

    /// Write a cell, materialising its chunk only for non-empty values.
    ///
    /// Returns the chunk key and whether the cell changed.
    pub fn set_cell(&mut self, lod: u32, cell: IVec3, value: Cell) -> (ChunkKey, bool) {
        let (key, local) = self.params.locate_cell(lod, cell);
        debug_assert_eq!(key.section, self.pos, "cell {cell} of LOD {lod} is outside section");
        if value == Cell::default() && self.chunk(lod, key.chunk).is_none() {
            return (key, false);
        }
        let changed = match self.chunk_or_insert(lod, key.chunk) {
            Some(chunk) => chunk.data.set_cell(local, value),
            None => false,
        };
        (key, changed)
    }

    /// Recompute the coarser-LOD cells covering one LOD-0 block.
    ///
    /// Stops at the first level whose cell did not change. Returns the keys
    /// of the coarser chunks that changed.
    pub fn refresh_parent_cells(&mut self, block: IVec3) -> Vec<ChunkKey> {
        let mut changed = Vec::new();
        for lod in 1..self.params.lod_levels() {
            if !self.is_resident(lod) {
                break;
            }
            let cell = block >> lod;
            let value = downsample(self.children_of(lod, cell));
            let (key, did_change) = self.set_cell(lod, cell, value);
            if !did_change {
                break;
            }
            changed.push(key);
        }
        changed
    }

    /// Rebuild every coarser LOD from LOD 0 (after generation).
    pub fn rebuild_derived_lods(&mut self) {
        let cs = self.params.chunk_size() as i32;
        for lod in 1..self.params.lod_levels() {
            let positions: Vec<IVec3> = self.lods[lod as usize].positions().collect();
            for pos in positions {
                let key = ChunkKey::new(self.pos, lod, pos);
                let has_children = CHILD_OFFSETS.iter().any(|&offset| {
                    let child = self.params.global_chunk(&key) * 2 + offset;
                    let child_key = self.params.key_from_global_chunk(lod - 1, child);
                    self.chunk(lod - 1, child_key.chunk).is_some()
                });
                if !has_children {
                    self.remove_chunk(lod, pos);
                    continue;
                }

                let origin = self.params.chunk_origin_cell(&key);
                let mut data = ChunkData::new(self.params.chunk_size());
                for z in 0..cs {
                    for y in 0..cs {
                        for x in 0..cs {
                            let local = IVec3::new(x, y, z);
                            let value = downsample(self.children_of(lod, origin + local));
                            data.set_cell(local, value);
                        }
                    }
                }

                if data.is_empty() {
                    self.remove_chunk(lod, pos);
                } else {
                    let mut chunk = Chunk::from_data(key, data, self.params.lod_levels());
                    if let Some(old) = self.remove_chunk(lod, pos) {
                        chunk.render_lod = old.render_lod;
                        chunk.proxy = old.proxy;
                        chunk.physics = old.physics;
                    }
                    self.insert_chunk(chunk);
                }
            }
        }
    }

    fn children_of(&self, lod: u32, cell: IVec3) -> [Cell; 8] {
        CHILD_OFFSETS.map(|offset| self.cell(lod - 1, cell * 2 + offset))
    }
}

/// Offsets of the eight children of a cell, child index `i` = `x | y << 1 | z << 2`
const CHILD_OFFSETS: [IVec3; 8] = [
    IVec3::new(0, 0, 0),
    IVec3::new(1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(1, 1, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(1, 0, 1),
    IVec3::new(0, 1, 1),
    IVec3::new(1, 1, 1),
];

/// Collapse eight child cells into one coarser cell.
///
/// The block is the most frequent non-air child value when at least half the
/// children are solid (ties go to the lowest child index), otherwise air.
/// Rotation follows the chosen child; light is the brightest child.
pub fn downsample(children: [Cell; 8]) -> Cell {
    let light = children.iter().map(|c| c.light).max().unwrap_or(0);
    let solid = children.iter().filter(|c| block_type(c.block) != AIR).count();
    if solid * 2 < children.len() {
        return Cell { block: AIR, rotation: 0, light };
    }

    let mut best: Option<(usize, usize)> = None;
    for (i, child) in children.iter().enumerate() {
        if block_type(child.block) == AIR {
            continue;
        }
        let count = children.iter().filter(|c| c.block == child.block).count();
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((i, count));
        }
    }

    match best {
        Some((i, _)) => Cell {
            block: children[i].block,
            rotation: children[i].rotation,
            light,
        },
        None => Cell { block: AIR, rotation: 0, light },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> WorldParams {
        WorldParams::new(4, 4, 3).unwrap()
    }

    fn solid(block: u16) -> Cell {
        Cell { block, rotation: block as u8, light: 0 }
    }

    #[test]
    fn test_downsample_majority_and_ties() {
        let air = Cell { block: 0, rotation: 0, light: 9 };
        let cells = [solid(2), solid(3), solid(3), solid(2), air, air, air, air];
        let merged = downsample(cells);
        // 2 and 3 tie at two each; child 0 wins
        assert_eq!(merged.block, 2);
        assert_eq!(merged.rotation, 2);
        assert_eq!(merged.light, 9);

        let sparse = [solid(1), solid(1), solid(1), air, air, air, air, air];
        assert_eq!(downsample(sparse).block, AIR);
    }

    #[test]
    fn test_grow_z_preserves_chunks() {
        let mut section = Section::new(params(), IVec2::new(0, 0), 0, 0);
        section.set_loaded_lod(0);
        section.chunk_or_insert(0, IVec3::new(1, 2, 0)).unwrap().data.blocks[0] = 7;
        section.grow_z(-3);
        section.grow_z(2);
        assert_eq!(section.min_chunk_z(), -3);
        assert_eq!(section.max_chunk_z(), 2);
        assert_eq!(section.chunk(0, IVec3::new(1, 2, 0)).unwrap().data.blocks[0], 7);
        assert_eq!(section.grid(2).z_range(), (-1, 0));
    }

    #[test]
    fn test_chunk_or_insert_rejects_outside_columns() {
        let mut section = Section::new(params(), IVec2::new(0, 0), 0, 0);
        assert!(section.chunk_or_insert(1, IVec3::new(2, 0, 0)).is_none());
        assert!(section.chunk_or_insert(1, IVec3::new(1, 1, 5)).is_some());
        assert_eq!(section.max_chunk_z(), 11);
    }

    #[test]
    fn test_refresh_parent_cells_propagates() {
        let mut section = Section::new(params(), IVec2::new(0, 0), 0, 0);
        section.set_loaded_lod(0);
        for offset in CHILD_OFFSETS.iter().take(4) {
            section.set_cell(0, *offset, solid(3));
        }
        let changed = section.refresh_parent_cells(IVec3::ZERO);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].lod, 1);
        assert_eq!(section.cell(1, IVec3::ZERO).block, 3);
        // LOD 2 cell has only one solid child of eight
        assert_eq!(section.cell(2, IVec3::ZERO).block, AIR);
    }

    #[test]
    fn test_rebuild_derived_lods() {
        let mut section = Section::new(params(), IVec2::new(0, 0), 0, 0);
        section.set_loaded_lod(0);
        for z in 0..4 {
            for y in 0..16 {
                for x in 0..16 {
                    section.set_cell(0, IVec3::new(x, y, z), solid(1));
                }
            }
        }
        section.rebuild_derived_lods();
        assert_eq!(section.cell(1, IVec3::new(7, 7, 1)).block, 1);
        assert_eq!(section.cell(1, IVec3::new(7, 7, 2)).block, AIR);
        assert_eq!(section.cell(2, IVec3::new(3, 3, 0)).block, 1);
        assert_eq!(section.chunks(1).count(), 4);
    }

    #[test]
    fn test_trim_removes_finer_lods() {
        let mut section = Section::new(params(), IVec2::new(0, 0), 0, 0);
        section.set_loaded_lod(0);
        section.set_cell(0, IVec3::ZERO, solid(1));
        section.set_cell(1, IVec3::ZERO, solid(1));
        let removed = section.trim_to(1);
        assert_eq!(removed.len(), 1);
        assert_eq!(section.loaded_lod(), 1);
        assert!(section.is_resident(1));
        assert!(!section.is_resident(0));
        assert_eq!(section.chunks(1).count(), 1);
    }
}
