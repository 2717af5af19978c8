//! Procedural terrain: the generator contract and the section it fills

pub mod generator;
pub use generator::{FlatGenerator, NoiseTerrainGenerator, TerrainParams};

use crate::core::types::{IVec2, IVec3};
use crate::voxel::chunk::Cell;
use crate::voxel::coords::WorldParams;
use crate::voxel::section::{LoadState, Section};

/// Synthesises sections the world has never stored
pub trait TerrainGenerator: Send + Sync {
    /// Whether section `(x, y)` can be generated at all
    fn can_generate_section(&self, x: i32, y: i32) -> bool;

    /// Inclusive LOD-0 chunk-layer range the section will span
    fn z_range(&self, x: i32, y: i32) -> (i32, i32);

    /// Fill LOD 0 of the section. Returning false discards it.
    fn generate_blocks(&self, x: i32, y: i32, section: &mut GeneratedSection) -> bool;
}

/// A section being filled by a [`TerrainGenerator`]
///
/// Blocks are addressed by column within the section (`0..section_blocks`)
/// and global block Z.
pub struct GeneratedSection {
    section: Section,
}

impl GeneratedSection {
    pub(crate) fn new(params: WorldParams, pos: IVec2, min_z: i32, max_z: i32) -> Self {
        let mut section = Section::new(params, pos, min_z, max_z);
        section.set_loaded_lod(0);
        section.load_state = LoadState::Generating;
        Self { section }
    }

    pub fn pos(&self) -> IVec2 {
        self.section.pos()
    }

    pub fn params(&self) -> &WorldParams {
        self.section.params()
    }

    /// Blocks per section side
    pub fn width(&self) -> i32 {
        self.params().section_blocks()
    }

    /// Global block coordinate of column (0, 0) at Z 0
    pub fn origin(&self) -> IVec3 {
        let pos = self.pos() * self.width();
        IVec3::new(pos.x, pos.y, 0)
    }

    pub fn set_block(&mut self, x: i32, y: i32, z: i32, value: u16) {
        if !(0..self.width()).contains(&x) || !(0..self.width()).contains(&y) {
            log::error!("Generated block ({x}, {y}) lies outside section {}", self.pos());
            return;
        }
        let cell = self.origin() + IVec3::new(x, y, z);
        self.section.set_cell(
            0,
            cell,
            Cell {
                block: value,
                ..Cell::default()
            },
        );
    }

    /// Set blocks `z_min..z_max` of one column.
    pub fn fill_column(&mut self, x: i32, y: i32, z_min: i32, z_max: i32, value: u16) {
        for z in z_min..z_max {
            self.set_block(x, y, z, value);
        }
    }

    /// Derive the coarser LODs and hand the section over as changed.
    pub(crate) fn finish(mut self) -> Section {
        self.section.rebuild_derived_lods();
        self.section.load_state = LoadState::Changed;
        self.section
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_section_derives_lods() {
        let params = WorldParams::new(4, 4, 2).unwrap();
        let mut generated = GeneratedSection::new(params, IVec2::new(-1, 0), 0, 0);
        assert_eq!(generated.origin(), IVec3::new(-16, 0, 0));
        for x in 0..16 {
            for y in 0..16 {
                generated.fill_column(x, y, 0, 2, 3);
            }
        }
        generated.set_block(16, 0, 0, 3);

        let section = generated.finish();
        assert_eq!(section.load_state, LoadState::Changed);
        assert_eq!(section.loaded_lod(), 0);
        assert_eq!(section.cell(0, IVec3::new(-16, 0, 1)).block, 3);
        assert_eq!(section.cell(1, IVec3::new(-8, 0, 0)).block, 3);
        assert_eq!(section.chunks(0).count(), 16);
    }
}
