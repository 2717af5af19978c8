//! Block light flood fill
//!
//! Light lives on LOD-0 cells in `0..=MAX_LIGHT` and drops by one per face
//! step. Spreading is a plain BFS; retracting zeroes everything that was
//! darker than the removed level and then refloods from the brighter cells
//! found on the boundary. Every write goes through the block-changed hook,
//! so sections are marked changed and rendered chunks re-mesh. Spreading
//! into a section that does not exist yet creates it.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::core::types::IVec3;
use crate::core::Result;
use crate::voxel::block::block_type;
use crate::voxel::chunk::Cell;
use crate::voxel::coords::{BlockLocation, FACE_DIRECTIONS};
use crate::voxel::world::World;

impl World {
    /// Set `source` to `level` and flood outwards.
    pub fn spread_light(&mut self, source: IVec3, level: u8) -> Result<()> {
        let palette = Arc::clone(&self.services.palette);
        let loc = self.writable_block(source)?;
        let cell = self.cell_at(&loc);
        self.write_cell(&loc, Cell { light: level, ..cell });

        let mut queue = VecDeque::from([(source, level)]);
        while let Some((pos, level)) = queue.pop_front() {
            if level < 2 {
                continue;
            }
            for direction in FACE_DIRECTIONS {
                let next = pos + direction;
                let loc = self.writable_block(next)?;
                let cell = self.cell_at(&loc);
                if palette.is_light_blocking(block_type(cell.block)) || cell.light + 2 > level {
                    continue;
                }
                self.write_cell(&loc, Cell { light: level - 1, ..cell });
                queue.push_back((next, level - 1));
            }
        }
        Ok(())
    }

    /// Remove the light at `source` and everything that depended on it.
    pub fn unspread_light(&mut self, source: IVec3) -> Result<()> {
        let palette = Arc::clone(&self.services.palette);
        let loc = self.writable_block(source)?;
        let cell = self.cell_at(&loc);
        if cell.light == 0 {
            return Ok(());
        }
        self.write_cell(&loc, Cell { light: 0, ..cell });

        let mut removal = VecDeque::from([(source, cell.light)]);
        let mut reflood = Vec::new();
        while let Some((pos, level)) = removal.pop_front() {
            for direction in FACE_DIRECTIONS {
                let next = pos + direction;
                let Some(loc) = self.resident_cell(next) else {
                    continue;
                };
                let cell = self.cell_at(&loc);
                if cell.light == 0 {
                    continue;
                }
                if cell.light >= level {
                    reflood.push(next);
                    continue;
                }
                // Other emitters keep their own level and relight what we clear
                let emission = palette.light_emission(block_type(cell.block));
                self.write_cell(&loc, Cell { light: emission, ..cell });
                if emission > 0 {
                    reflood.push(next);
                }
                removal.push_back((next, cell.light));
            }
        }

        for pos in reflood {
            let Some(loc) = self.resident_cell(pos) else {
                continue;
            };
            let light = self.cell_at(&loc).light;
            if light > 0 {
                self.spread_light(pos, light)?;
            }
        }
        Ok(())
    }

    /// After a light-blocking block is cleared, let lit neighbours flow in.
    pub(crate) fn reflood_from_neighbours(&mut self, pos: IVec3) -> Result<()> {
        for direction in FACE_DIRECTIONS {
            let next = pos + direction;
            let Some(loc) = self.resident_cell(next) else {
                continue;
            };
            let light = self.cell_at(&loc).light;
            if light >= 2 {
                self.spread_light(next, light)?;
            }
        }
        Ok(())
    }

    /// Location of `pos` when its section is resident at LOD 0.
    fn resident_cell(&self, pos: IVec3) -> Option<BlockLocation> {
        let loc = self.params.split_block(pos);
        self.store
            .section(loc.section)
            .is_some_and(|s| s.is_resident(0))
            .then_some(loc)
    }
}
