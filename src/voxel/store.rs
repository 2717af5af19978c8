//! In-memory spatial index of sections
//!
//! A dense array of optional sections over a rectangle of section
//! coordinates. The rectangle only grows; growing remaps every occupied slot
//! into the new array.

use std::collections::HashSet;

use crate::core::types::{IVec2, IVec3};
use crate::voxel::chunk::Chunk;
use crate::voxel::coords::{ChunkKey, WorldParams};
use crate::voxel::section::Section;

/// Residency of a section or chunk, answered without forcing a load
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Residency {
    /// Nothing stored or resident for this position
    Unavailable,
    /// Stored (or resident too coarse) but not loaded at the asked LOD
    Available,
    /// Resident at the asked LOD or finer
    Loaded,
}

/// Inclusive rectangle of section coordinates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectionRect {
    pub min: IVec2,
    pub max: IVec2,
}

impl SectionRect {
    pub fn new(min: IVec2, max: IVec2) -> Self {
        Self { min, max }
    }

    /// The empty rectangle, encoded as min (0,0) max (-1,-1)
    pub fn empty() -> Self {
        Self {
            min: IVec2::ZERO,
            max: IVec2::splat(-1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max.x < self.min.x || self.max.y < self.min.y
    }

    pub fn contains(&self, pos: IVec2) -> bool {
        !self.is_empty()
            && pos.x >= self.min.x
            && pos.y >= self.min.y
            && pos.x <= self.max.x
            && pos.y <= self.max.y
    }

    /// Smallest rectangle containing both `self` and `pos`
    pub fn including(&self, pos: IVec2) -> Self {
        if self.is_empty() {
            Self::new(pos, pos)
        } else {
            Self::new(self.min.min(pos), self.max.max(pos))
        }
    }

    pub fn width(&self) -> usize {
        if self.is_empty() { 0 } else { (self.max.x - self.min.x + 1) as usize }
    }

    pub fn height(&self) -> usize {
        if self.is_empty() { 0 } else { (self.max.y - self.min.y + 1) as usize }
    }

    fn index(&self, pos: IVec2) -> Option<usize> {
        if !self.contains(pos) {
            return None;
        }
        Some((pos.y - self.min.y) as usize * self.width() + (pos.x - self.min.x) as usize)
    }
}

/// Owns every resident section and the set of available (stored) ones
#[derive(Debug)]
pub struct SectionStore {
    params: WorldParams,
    rect: SectionRect,
    slots: Vec<Option<Box<Section>>>,
    available: HashSet<IVec2>,
}

impl SectionStore {
    pub fn new(params: WorldParams) -> Self {
        Self {
            params,
            rect: SectionRect::empty(),
            slots: Vec::new(),
            available: HashSet::new(),
        }
    }

    pub fn params(&self) -> &WorldParams {
        &self.params
    }

    /// Current index rectangle
    pub fn rect(&self) -> SectionRect {
        self.rect
    }

    /// Grow the index rectangle to cover `rect`, preserving every resident section.
    ///
    /// This is the only operation that reallocates the section array.
    pub fn resize_index(&mut self, rect: SectionRect) {
        let target = if self.rect.is_empty() {
            rect
        } else if rect.is_empty() {
            self.rect
        } else {
            SectionRect::new(self.rect.min.min(rect.min), self.rect.max.max(rect.max))
        };
        if target == self.rect {
            return;
        }

        let mut slots = Vec::new();
        slots.resize_with(target.width() * target.height(), || None);
        for section in self.slots.drain(..).flatten() {
            if let Some(i) = target.index(section.pos()) {
                slots[i] = Some(section);
            }
        }
        log::debug!(
            "Section index resized from {:?} to {:?}",
            (self.rect.min, self.rect.max),
            (target.min, target.max)
        );
        self.rect = target;
        self.slots = slots;
    }

    pub fn section(&self, pos: IVec2) -> Option<&Section> {
        self.rect.index(pos).and_then(|i| self.slots[i].as_deref())
    }

    pub fn section_mut(&mut self, pos: IVec2) -> Option<&mut Section> {
        self.rect.index(pos).and_then(|i| self.slots[i].as_deref_mut())
    }

    pub fn chunk(&self, key: &ChunkKey) -> Option<&Chunk> {
        self.section(key.section)?.chunk(key.lod, key.chunk)
    }

    pub fn chunk_mut(&mut self, key: &ChunkKey) -> Option<&mut Chunk> {
        self.section_mut(key.section)?.chunk_mut(key.lod, key.chunk)
    }

    /// Insert a section, growing the index rectangle when needed.
    pub fn insert_section(&mut self, section: Section) -> &mut Section {
        let pos = section.pos();
        if !self.rect.contains(pos) {
            self.resize_index(self.rect.including(pos));
        }
        let i = match self.rect.index(pos) {
            Some(i) => i,
            None => unreachable!("rectangle was grown to include {pos}"),
        };
        debug_assert!(self.slots[i].is_none(), "section {pos} inserted twice");
        self.slots[i].insert(Box::new(section))
    }

    /// Remove a resident section, returning it.
    pub fn remove_section(&mut self, pos: IVec2) -> Option<Box<Section>> {
        self.rect.index(pos).and_then(|i| self.slots[i].take())
    }

    pub fn is_resident(&self, pos: IVec2) -> bool {
        self.section(pos).is_some()
    }

    /// Whether the section exists in storage (may not be loaded)
    pub fn is_available(&self, pos: IVec2) -> bool {
        self.available.contains(&pos)
    }

    pub fn set_available(&mut self, pos: IVec2, available: bool) {
        if available {
            self.available.insert(pos);
        } else {
            self.available.remove(&pos);
        }
    }

    /// Available section coordinates, sorted for stable output
    pub fn available_sections(&self) -> Vec<IVec2> {
        let mut sections: Vec<IVec2> = self.available.iter().copied().collect();
        sections.sort_by_key(|p| (p.y, p.x));
        sections
    }

    /// Coordinates of every resident section
    pub fn resident_sections(&self) -> Vec<IVec2> {
        self.slots.iter().flatten().map(|s| s.pos()).collect()
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.slots.iter().filter_map(|s| s.as_deref())
    }

    /// Residency of a section at `lod` without loading it.
    pub fn section_status(&self, pos: IVec2, lod: u32) -> Residency {
        match self.section(pos) {
            Some(section) if section.loaded_lod() <= lod => Residency::Loaded,
            Some(_) => Residency::Available,
            None if self.is_available(pos) => Residency::Available,
            None => Residency::Unavailable,
        }
    }

    /// Residency of the chunk slot `key`: `Loaded` when its section holds
    /// `key.lod` or finer (the slot itself may be empty air).
    pub fn chunk_status(&self, key: &ChunkKey) -> Residency {
        self.section_status(key.section, key.lod)
    }

    /// Cell-level read of a resident LOD-0 block.
    pub fn block_value(&self, block: IVec3) -> Option<u16> {
        let loc = self.params.split_block(block);
        let section = self.section(loc.section)?;
        if !section.is_resident(0) {
            return None;
        }
        Some(
            section
                .chunk(0, loc.chunk)
                .map_or(0, |chunk| chunk.data.block(loc.local)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::chunk::Cell;

    fn params() -> WorldParams {
        WorldParams::new(4, 4, 2).unwrap()
    }

    fn resident(params: WorldParams, pos: IVec2) -> Section {
        let mut section = Section::new(params, pos, 0, 0);
        section.set_loaded_lod(0);
        section
    }

    #[test]
    fn test_insert_grows_rect() {
        let p = params();
        let mut store = SectionStore::new(p);
        assert!(store.rect().is_empty());
        store.insert_section(resident(p, IVec2::new(2, -1)));
        assert_eq!(store.rect(), SectionRect::new(IVec2::new(2, -1), IVec2::new(2, -1)));
        store.insert_section(resident(p, IVec2::new(-1, 1)));
        assert_eq!(store.rect(), SectionRect::new(IVec2::new(-1, -1), IVec2::new(2, 1)));
        assert!(store.is_resident(IVec2::new(2, -1)));
        assert!(store.is_resident(IVec2::new(-1, 1)));
        assert!(!store.is_resident(IVec2::new(0, 0)));
    }

    #[test]
    fn test_resize_index_preserves_data() {
        let p = params();
        let mut store = SectionStore::new(p);
        let section = store.insert_section(resident(p, IVec2::ZERO));
        section.set_cell(0, IVec3::new(3, 2, 1), Cell { block: 9, rotation: 0, light: 4 });

        store.resize_index(SectionRect::new(IVec2::splat(-1), IVec2::splat(1)));
        assert_eq!(store.rect().width(), 3);
        assert_eq!(store.rect().height(), 3);
        let section = store.section(IVec2::ZERO).unwrap();
        assert_eq!(section.pos(), IVec2::ZERO);
        assert_eq!(section.cell(0, IVec3::new(3, 2, 1)).block, 9);
        assert_eq!(store.block_value(IVec3::new(3, 2, 1)), Some(9));
        assert!(store.section(IVec2::new(-1, -1)).is_none());
    }

    #[test]
    fn test_out_of_range_lookups() {
        let store = SectionStore::new(params());
        assert!(store.section(IVec2::new(100, 100)).is_none());
        let key = ChunkKey::new(IVec2::new(5, 5), 0, IVec3::ZERO);
        assert!(store.chunk(&key).is_none());
        assert_eq!(store.chunk_status(&key), Residency::Unavailable);
    }

    #[test]
    fn test_status_tracks_lod() {
        let p = params();
        let mut store = SectionStore::new(p);
        let mut coarse = Section::new(p, IVec2::ZERO, 0, 0);
        coarse.set_loaded_lod(1);
        store.insert_section(coarse);
        store.set_available(IVec2::ZERO, true);
        store.set_available(IVec2::new(1, 0), true);

        assert_eq!(store.section_status(IVec2::ZERO, 1), Residency::Loaded);
        assert_eq!(store.section_status(IVec2::ZERO, 0), Residency::Available);
        assert_eq!(store.section_status(IVec2::new(1, 0), 1), Residency::Available);
        assert_eq!(store.section_status(IVec2::new(2, 0), 1), Residency::Unavailable);
        assert_eq!(store.available_sections(), vec![IVec2::ZERO, IVec2::new(1, 0)]);
    }
}
