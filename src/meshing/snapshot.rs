//! Immutable chunk snapshots handed to mesh workers

use crate::core::types::IVec3;
use crate::voxel::chunk::ChunkData;
use crate::voxel::coords::{ChunkKey, FACE_DIRECTIONS};
use crate::voxel::store::SectionStore;

/// The layer of a neighbouring chunk that touches the snapshot chunk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FacePlane {
    pub blocks: Vec<u16>,
    pub light: Vec<u8>,
}

/// Which local axes index a face plane: `(normal axis, u axis, v axis)`
pub(crate) fn plane_axes(direction: IVec3) -> (usize, usize, usize) {
    if direction.x != 0 {
        (0, 1, 2)
    } else if direction.y != 0 {
        (1, 0, 2)
    } else {
        (2, 0, 1)
    }
}

impl FacePlane {
    /// Copy the layer of `neighbour` adjacent to a chunk lying in `-direction` from it.
    fn capture(neighbour: &ChunkData, direction: IVec3) -> Self {
        let cs = neighbour.size() as i32;
        let (normal, u_axis, v_axis) = plane_axes(direction);
        let layer = if direction[normal] > 0 { 0 } else { cs - 1 };
        let mut blocks = Vec::with_capacity((cs * cs) as usize);
        let mut light = Vec::with_capacity((cs * cs) as usize);
        for v in 0..cs {
            for u in 0..cs {
                let mut local = IVec3::ZERO;
                local[normal] = layer;
                local[u_axis] = u;
                local[v_axis] = v;
                blocks.push(neighbour.block(local));
                light.push(neighbour.light(local));
            }
        }
        Self { blocks, light }
    }

    /// All-air plane for a neighbour slot that is resident but empty
    fn air(chunk_size: u32) -> Self {
        let cells = (chunk_size * chunk_size) as usize;
        Self {
            blocks: vec![0; cells],
            light: vec![0; cells],
        }
    }
}

/// A chunk's cells plus the six touching neighbour layers
///
/// A `None` neighbour means its section is not resident at this LOD; mesh
/// builders should treat it as unknown (usually: emit the boundary face).
#[derive(Clone, Debug)]
pub struct ChunkSnapshot {
    pub key: ChunkKey,
    pub data: ChunkData,
    /// Neighbour planes in [`FACE_DIRECTIONS`] order
    pub neighbours: [Option<FacePlane>; 6],
}

impl ChunkSnapshot {
    /// Capture `key` and its face neighbours from the store.
    pub fn capture(store: &SectionStore, key: &ChunkKey) -> Option<Self> {
        let chunk = store.chunk(key)?;
        let params = store.params();
        let neighbours = FACE_DIRECTIONS.map(|direction| {
            let neighbour_key = params.neighbour_key(key, direction);
            let section = store.section(neighbour_key.section)?;
            if !section.is_resident(key.lod) {
                return None;
            }
            Some(match section.chunk(key.lod, neighbour_key.chunk) {
                Some(neighbour) => FacePlane::capture(&neighbour.data, direction),
                None => FacePlane::air(params.chunk_size()),
            })
        });
        Some(Self {
            key: *key,
            data: chunk.data.clone(),
            neighbours,
        })
    }

    pub fn chunk_size(&self) -> u32 {
        self.data.size()
    }

    /// Block at a local position, reaching one cell into face neighbours.
    ///
    /// Returns `None` outside that range or for unknown neighbours.
    pub fn block(&self, local: IVec3) -> Option<u16> {
        if self.is_inside(local) {
            return Some(self.data.block(local));
        }
        let (plane, index) = self.plane_cell(local)?;
        Some(plane.blocks[index])
    }

    /// Light at a local position, with the same reach as [`Self::block`].
    pub fn light(&self, local: IVec3) -> Option<u8> {
        if self.is_inside(local) {
            return Some(self.data.light(local));
        }
        let (plane, index) = self.plane_cell(local)?;
        Some(plane.light[index])
    }

    fn is_inside(&self, local: IVec3) -> bool {
        let cs = self.chunk_size() as i32;
        (0..3).all(|axis| (0..cs).contains(&local[axis]))
    }

    /// Neighbour plane and index within it for a cell just outside one face
    fn plane_cell(&self, local: IVec3) -> Option<(&FacePlane, usize)> {
        let cs = self.chunk_size() as i32;
        let outside: Vec<usize> = (0..3).filter(|&axis| !(0..cs).contains(&local[axis])).collect();
        if outside.len() != 1 {
            return None;
        }
        let axis = outside[0];
        if local[axis] != -1 && local[axis] != cs {
            return None;
        }
        let mut direction = IVec3::ZERO;
        direction[axis] = if local[axis] < 0 { -1 } else { 1 };
        let face = FACE_DIRECTIONS.iter().position(|&d| d == direction)?;
        let plane = self.neighbours[face].as_ref()?;
        let (_, u_axis, v_axis) = plane_axes(direction);
        Some((plane, (local[v_axis] * cs + local[u_axis]) as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::IVec2;
    use crate::voxel::chunk::Cell;
    use crate::voxel::coords::WorldParams;
    use crate::voxel::section::Section;

    #[test]
    fn test_capture_reads_neighbour_layers() {
        let params = WorldParams::new(4, 2, 1).unwrap();
        let mut store = SectionStore::new(params);
        let mut section = Section::new(params, IVec2::ZERO, 0, 0);
        section.set_loaded_lod(0);
        // Chunk (1,0,0) starts at block x=4; mark its x=4 layer
        section.set_cell(0, IVec3::new(4, 2, 1), Cell { block: 7, rotation: 0, light: 3 });
        section.set_cell(0, IVec3::new(0, 0, 0), Cell { block: 1, rotation: 0, light: 0 });
        store.insert_section(section);

        let key = ChunkKey::new(IVec2::ZERO, 0, IVec3::ZERO);
        let snapshot = ChunkSnapshot::capture(&store, &key).unwrap();
        assert_eq!(snapshot.block(IVec3::ZERO), Some(1));
        assert_eq!(snapshot.block(IVec3::new(4, 2, 1)), Some(7));
        assert_eq!(snapshot.light(IVec3::new(4, 2, 1)), Some(3));
        assert_eq!(snapshot.block(IVec3::new(4, 0, 0)), Some(0));
        // +y neighbour is resident air; -x neighbour section is not resident
        assert_eq!(snapshot.block(IVec3::new(0, 4, 0)), Some(0));
        assert_eq!(snapshot.block(IVec3::new(-1, 0, 0)), None);
        assert_eq!(snapshot.block(IVec3::new(4, 4, 0)), None);
    }

    #[test]
    fn test_capture_missing_chunk() {
        let params = WorldParams::new(4, 2, 1).unwrap();
        let store = SectionStore::new(params);
        let key = ChunkKey::new(IVec2::ZERO, 0, IVec3::ZERO);
        assert!(ChunkSnapshot::capture(&store, &key).is_none());
    }
}
