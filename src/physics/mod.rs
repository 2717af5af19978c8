//! Physics collaborator interface for chunk collision objects

use crate::meshing::MeshData;
use crate::voxel::coords::ChunkKey;

/// Handle to a physics-engine object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PhysicsObjectId(pub u64);

/// Owns collision shapes built from LOD-0 chunk meshes.
///
/// Called on the main thread only.
pub trait Physics: Send + Sync {
    fn add_object(&self, key: ChunkKey, mesh: &MeshData) -> PhysicsObjectId;

    fn remove_object(&self, object: PhysicsObjectId);

    /// Rebuild the collision shape of an existing object.
    fn update_single_object(&self, object: PhysicsObjectId, mesh: &MeshData);
}
