//! Asynchronous chunk meshing
//!
//! Chunks are queued on the main thread, snapshotted and built on a worker
//! pool, and the finished geometry is published back on the main thread.

pub mod faces;
pub mod pipeline;
pub mod snapshot;
pub mod worker;

use bytemuck::{Pod, Zeroable};

pub use faces::FaceMesher;
pub use pipeline::{MeshPipeline, PendingMeshingChunk};
pub use snapshot::{ChunkSnapshot, FacePlane};
pub use worker::{MeshJob, MeshResult, MeshWorkers};

/// One mesh vertex: position plus a packed attribute word (face, light, material)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub packed: u32,
}

/// A run of indices drawn with one material
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeshBatch {
    pub material: u16,
    pub first_index: u32,
    pub index_count: u32,
}

/// Geometry produced for one chunk
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    pub batches: Vec<MeshBatch>,
}

impl MeshData {
    /// True when there is nothing to draw
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Vertex data as raw bytes for upload
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }
}

/// Turns a chunk snapshot into geometry; runs on worker threads.
pub trait MeshBuilder: Send + Sync {
    fn build(&self, snapshot: &ChunkSnapshot) -> MeshData;
}
