//! Chunk storage and the per-chunk meshing state machine

use crate::core::types::IVec3;
use crate::physics::PhysicsObjectId;
use crate::render::RenderProxyId;
use crate::voxel::coords::{cell_index, ChunkKey};

/// Flat cell arrays of one chunk (`chunk_size^3` entries each)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkData {
    size: u32,
    pub blocks: Vec<u16>,
    pub rotation: Vec<u8>,
    pub light: Vec<u8>,
}

impl ChunkData {
    /// All-air, unlit chunk data
    pub fn new(size: u32) -> Self {
        let cells = (size as usize).pow(3);
        Self {
            size,
            blocks: vec![0; cells],
            rotation: vec![0; cells],
            light: vec![0; cells],
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// True when every block, rotation and light value is zero
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|&b| b == 0)
            && self.rotation.iter().all(|&r| r == 0)
            && self.light.iter().all(|&l| l == 0)
    }

    /// True when there is nothing to draw (all air)
    pub fn is_air(&self) -> bool {
        self.blocks.iter().all(|&b| b == 0)
    }

    #[inline]
    pub fn index(&self, local: IVec3) -> usize {
        cell_index(self.size, local)
    }

    #[inline]
    pub fn block(&self, local: IVec3) -> u16 {
        self.blocks[self.index(local)]
    }

    #[inline]
    pub fn light(&self, local: IVec3) -> u8 {
        self.light[self.index(local)]
    }

    #[inline]
    pub fn rotation(&self, local: IVec3) -> u8 {
        self.rotation[self.index(local)]
    }

    /// `(block, rotation, light)` of one cell
    #[inline]
    pub fn cell(&self, local: IVec3) -> Cell {
        let i = self.index(local);
        Cell {
            block: self.blocks[i],
            rotation: self.rotation[i],
            light: self.light[i],
        }
    }

    /// Write one cell; returns whether anything changed.
    #[inline]
    pub fn set_cell(&mut self, local: IVec3, cell: Cell) -> bool {
        let i = self.index(local);
        let changed = self.blocks[i] != cell.block
            || self.rotation[i] != cell.rotation
            || self.light[i] != cell.light;
        self.blocks[i] = cell.block;
        self.rotation[i] = cell.rotation;
        self.light[i] = cell.light;
        changed
    }
}

/// Contents of one cell
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Cell {
    pub block: u16,
    pub rotation: u8,
    pub light: u8,
}

/// Mesh lifecycle of a chunk
///
/// Idle -> Pending -> InProgress -> Idle, or
/// InProgress -> InProgressWithChanges -> (on completion) Pending.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MeshState {
    #[default]
    Idle,
    /// Queued, waiting for dispatch
    Pending,
    /// A worker is building the mesh
    InProgress,
    /// Edited while the worker was building; re-queue on completion
    InProgressWithChanges,
}

/// Inputs to [`MeshState::transition`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeshEvent {
    /// A rebuild was requested
    Enqueue,
    /// The queued entry was handed to a worker
    Dispatch,
    /// The worker result was applied
    Complete,
    /// The queued entry was dropped before dispatch
    Cancel,
}

impl MeshState {
    /// The single authoritative transition function; `None` means invalid.
    pub fn transition(self, event: MeshEvent) -> Option<MeshState> {
        use MeshEvent::*;
        use MeshState::*;
        match (self, event) {
            (Idle, Enqueue) | (Pending, Enqueue) => Some(Pending),
            (Pending, Dispatch) => Some(InProgress),
            (Pending, Cancel) => Some(Idle),
            (InProgress, Enqueue) | (InProgressWithChanges, Enqueue) => Some(InProgressWithChanges),
            (InProgress, Complete) => Some(Idle),
            (InProgressWithChanges, Complete) => Some(Pending),
            _ => None,
        }
    }

    /// True while a worker holds a snapshot of the chunk
    pub fn is_in_progress(self) -> bool {
        matches!(self, MeshState::InProgress | MeshState::InProgressWithChanges)
    }
}

/// A resident chunk at one LOD
#[derive(Debug)]
pub struct Chunk {
    pub key: ChunkKey,
    pub data: ChunkData,
    mesh_state: MeshState,
    /// LOD this chunk is currently drawn at (`lod_levels` = not rendered)
    pub render_lod: u32,
    pub proxy: Option<RenderProxyId>,
    pub physics: Option<PhysicsObjectId>,
}

impl Chunk {
    /// Empty chunk that is not rendered
    pub fn new(key: ChunkKey, size: u32, not_rendered: u32) -> Self {
        Self::from_data(key, ChunkData::new(size), not_rendered)
    }

    pub fn from_data(key: ChunkKey, data: ChunkData, not_rendered: u32) -> Self {
        Self {
            key,
            data,
            mesh_state: MeshState::Idle,
            render_lod: not_rendered,
            proxy: None,
            physics: None,
        }
    }

    pub fn mesh_state(&self) -> MeshState {
        self.mesh_state
    }

    /// Apply a mesh event; invalid transitions are logged and ignored.
    pub fn apply(&mut self, event: MeshEvent) -> bool {
        match self.mesh_state.transition(event) {
            Some(next) => {
                log::trace!("Chunk {:?}: {:?} --{:?}--> {:?}", self.key, self.mesh_state, event, next);
                self.mesh_state = next;
                true
            }
            None => {
                log::error!(
                    "Chunk {:?}: invalid mesh transition {:?} on {:?}",
                    self.key,
                    event,
                    self.mesh_state
                );
                false
            }
        }
    }
}
