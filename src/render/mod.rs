//! Renderer collaborator interface
//!
//! The engine never touches GPU resources itself. Chunk meshes are handed to
//! a [`Renderer`] that owns proxies (one per rendered chunk) and decides
//! what "adding to the scene" means.

use crate::meshing::MeshData;
use crate::voxel::coords::ChunkKey;

/// Handle to a renderer-owned chunk proxy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderProxyId(pub u64);

/// Receives chunk geometry for drawing
///
/// `create_proxy` may be called from a mesh worker thread (first-time
/// chunks have no proxy anyone else could be reading); every other method
/// is called on the main thread only.
pub trait Renderer: Send + Sync {
    /// Create a proxy holding `mesh`; not yet visible.
    fn create_proxy(&self, key: ChunkKey, mesh: &MeshData) -> RenderProxyId;

    /// Replace the geometry of an existing proxy.
    fn update_proxy(&self, proxy: RenderProxyId, mesh: &MeshData);

    /// Make a proxy visible.
    fn add_renderable(&self, proxy: RenderProxyId);

    /// Hide and release a proxy.
    fn remove_renderable(&self, proxy: RenderProxyId);
}

/// Renderer that draws nothing (headless tools)
#[derive(Debug, Default)]
pub struct NullRenderer {
    next: std::sync::atomic::AtomicU64,
}

impl Renderer for NullRenderer {
    fn create_proxy(&self, _key: ChunkKey, _mesh: &MeshData) -> RenderProxyId {
        RenderProxyId(self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
    }

    fn update_proxy(&self, _proxy: RenderProxyId, _mesh: &MeshData) {}

    fn add_renderable(&self, _proxy: RenderProxyId) {}

    fn remove_renderable(&self, _proxy: RenderProxyId) {}
}
