//! Queue -> worker -> publish pipeline for chunk meshes
//!
//! Only one build is ever in flight per chunk. Requests made while a chunk
//! is queued update the queued entry; requests made while it is being built
//! mark it `InProgressWithChanges`, and the completion re-queues it.

use std::collections::HashMap;
use std::time::Duration;

use crate::core::types::Vec3;
use crate::meshing::{ChunkSnapshot, MeshJob, MeshResult, MeshWorkers};
use crate::physics::Physics;
use crate::render::Renderer;
use crate::voxel::chunk::{Chunk, MeshEvent, MeshState};
use crate::voxel::coords::ChunkKey;
use crate::voxel::store::SectionStore;

/// A queued mesh request
#[derive(Clone, Debug, PartialEq)]
pub struct PendingMeshingChunk {
    pub key: ChunkKey,
    /// Render LOD when the request was made
    pub old_lod: u32,
    /// Render LOD the new mesh is for
    pub new_lod: u32,
    /// Chunk centre in block space
    pub view_center: Vec3,
    /// Squared distance to the nearest observer at last sort
    pub min_view_distance: f32,
}

/// Main-thread side of the meshing pipeline
pub struct MeshPipeline {
    queue: HashMap<ChunkKey, PendingMeshingChunk>,
    /// Latest requested LOD for chunks edited during their build
    rerun: HashMap<ChunkKey, u32>,
    workers: MeshWorkers,
    in_flight: usize,
    max_dispatch: usize,
}

impl MeshPipeline {
    pub fn new(workers: MeshWorkers, max_dispatch: usize) -> Self {
        Self {
            queue: HashMap::new(),
            rerun: HashMap::new(),
            workers,
            in_flight: 0,
            max_dispatch: max_dispatch.max(1),
        }
    }

    /// Number of queued (not yet dispatched) chunks
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Number of builds running on workers
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight == 0
    }

    pub fn is_queued(&self, key: &ChunkKey) -> bool {
        self.queue.contains_key(key)
    }

    /// Request a (re)build of `key` for render LOD `new_lod`.
    ///
    /// Returns false when the chunk is not resident.
    pub fn request(&mut self, store: &mut SectionStore, key: ChunkKey, new_lod: u32) -> bool {
        let params = *store.params();
        let Some(chunk) = store.chunk_mut(&key) else {
            return false;
        };
        let before = chunk.mesh_state();
        let old_lod = chunk.render_lod;
        if !chunk.apply(MeshEvent::Enqueue) {
            return false;
        }

        match before {
            MeshState::Idle => {
                self.queue.insert(
                    key,
                    PendingMeshingChunk {
                        key,
                        old_lod,
                        new_lod,
                        view_center: params.chunk_bounds(&key).center(),
                        min_view_distance: f32::MAX,
                    },
                );
                if let Some(section) = store.section_mut(key.section) {
                    section.add_pending_mesh();
                }
                log::trace!("Queued mesh for {key:?} (LOD {old_lod} -> {new_lod})");
            }
            MeshState::Pending => {
                if let Some(entry) = self.queue.get_mut(&key) {
                    entry.new_lod = new_lod;
                }
            }
            MeshState::InProgress | MeshState::InProgressWithChanges => {
                self.rerun.insert(key, new_lod);
            }
        }
        true
    }

    /// Drop a queued request. Returns false if the chunk is not `Pending`.
    pub fn cancel(&mut self, store: &mut SectionStore, key: &ChunkKey) -> bool {
        let Some(chunk) = store.chunk_mut(key) else {
            return false;
        };
        if chunk.mesh_state() != MeshState::Pending || !chunk.apply(MeshEvent::Cancel) {
            return false;
        }
        self.queue.remove(key);
        if let Some(section) = store.section_mut(key.section) {
            section.remove_pending_mesh();
        }
        log::trace!("Cancelled mesh for {key:?}");
        true
    }

    /// Sort the queue by distance to the nearest observer and hand up to the
    /// per-tick cap to workers. Returns the number dispatched.
    pub fn dispatch(&mut self, store: &mut SectionStore, observers: &[Vec3]) -> usize {
        if self.queue.is_empty() {
            return 0;
        }

        let mut entries: Vec<PendingMeshingChunk> = self.queue.drain().map(|(_, e)| e).collect();
        for entry in &mut entries {
            entry.min_view_distance = observers
                .iter()
                .map(|o| o.distance_squared(entry.view_center))
                .fold(f32::MAX, f32::min);
        }
        entries.sort_by(|a, b| {
            a.min_view_distance
                .total_cmp(&b.min_view_distance)
                .then_with(|| a.key.lod.cmp(&b.key.lod))
        });

        let rest = entries.split_off(entries.len().min(self.max_dispatch));
        self.queue.extend(rest.into_iter().map(|e| (e.key, e)));

        let mut dispatched = 0;
        for entry in entries {
            let key = entry.key;
            let create_proxy = match store.chunk_mut(&key) {
                Some(chunk) => {
                    if !chunk.apply(MeshEvent::Dispatch) {
                        continue;
                    }
                    chunk.proxy.is_none()
                }
                None => {
                    log::error!("Queued chunk {key:?} is no longer resident");
                    if let Some(section) = store.section_mut(key.section) {
                        section.remove_pending_mesh();
                    }
                    continue;
                }
            };
            let Some(snapshot) = ChunkSnapshot::capture(store, &key) else {
                continue;
            };
            self.workers.spawn(MeshJob {
                snapshot,
                new_lod: entry.new_lod,
                create_proxy,
            });
            self.in_flight += 1;
            dispatched += 1;
        }
        if dispatched > 0 {
            log::trace!("Dispatched {dispatched} meshes, {} still queued", self.queue.len());
        }
        dispatched
    }

    /// Apply every finished build. Returns the number applied.
    pub fn poll_completed(
        &mut self,
        store: &mut SectionStore,
        renderer: &dyn Renderer,
        physics: Option<&dyn Physics>,
    ) -> usize {
        let results = self.workers.try_completed();
        let count = results.len();
        for result in results {
            self.apply(store, renderer, physics, result);
        }
        count
    }

    /// Block up to `timeout` for at least one completion, then apply all
    /// available ones.
    pub fn wait_for_completions(
        &mut self,
        store: &mut SectionStore,
        renderer: &dyn Renderer,
        physics: Option<&dyn Physics>,
        timeout: Duration,
    ) -> usize {
        if self.in_flight == 0 {
            return 0;
        }
        let results = self.workers.wait_completed(timeout);
        let count = results.len();
        for result in results {
            self.apply(store, renderer, physics, result);
        }
        count
    }

    fn apply(
        &mut self,
        store: &mut SectionStore,
        renderer: &dyn Renderer,
        physics: Option<&dyn Physics>,
        result: MeshResult,
    ) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let key = result.key;
        let params = *store.params();
        let Some(chunk) = store.chunk_mut(&key) else {
            log::error!("Mesh completed for non-resident chunk {key:?}");
            if let Some(proxy) = result.proxy {
                renderer.remove_renderable(proxy);
            }
            return;
        };

        match &result.mesh {
            Some(mesh) if !mesh.is_empty() => {
                match (result.proxy, chunk.proxy) {
                    (Some(created), existing) => {
                        if let Some(old) = existing {
                            renderer.remove_renderable(old);
                        }
                        chunk.proxy = Some(created);
                        renderer.add_renderable(created);
                    }
                    (None, Some(proxy)) => renderer.update_proxy(proxy, mesh),
                    (None, None) => {
                        let proxy = renderer.create_proxy(key, mesh);
                        renderer.add_renderable(proxy);
                        chunk.proxy = Some(proxy);
                    }
                }
                if let (0, Some(physics)) = (key.lod, physics) {
                    match chunk.physics {
                        Some(object) => physics.update_single_object(object, mesh),
                        None => chunk.physics = Some(physics.add_object(key, mesh)),
                    }
                }
            }
            Some(_) => release_render_state(chunk, renderer, physics),
            None => log::warn!("Mesh build failed for {key:?}; keeping previous geometry"),
        }
        chunk.render_lod = result.new_lod;

        chunk.apply(MeshEvent::Complete);
        if chunk.mesh_state() == MeshState::Pending {
            let new_lod = self.rerun.remove(&key).unwrap_or(result.new_lod);
            self.queue.insert(
                key,
                PendingMeshingChunk {
                    key,
                    old_lod: chunk.render_lod,
                    new_lod,
                    view_center: params.chunk_bounds(&key).center(),
                    min_view_distance: f32::MAX,
                },
            );
            log::trace!("Re-queued {key:?} after edits during its build");
        } else if let Some(section) = store.section_mut(key.section) {
            section.remove_pending_mesh();
        }
    }
}

/// Remove a chunk's proxy and collision object.
pub(crate) fn release_render_state(chunk: &mut Chunk, renderer: &dyn Renderer, physics: Option<&dyn Physics>) {
    if let Some(proxy) = chunk.proxy.take() {
        renderer.remove_renderable(proxy);
    }
    if let Some(object) = chunk.physics.take() {
        if let Some(physics) = physics {
            physics.remove_object(object);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::core::types::{IVec2, IVec3};
    use crate::testing::{CountingBuilder, GatedBuilder, RecordingPhysics, RecordingRenderer, RenderEvent};
    use crate::voxel::chunk::Cell;
    use crate::voxel::coords::WorldParams;
    use crate::voxel::section::Section;

    const WAIT: Duration = Duration::from_secs(5);

    fn store_with_chunks(keys: &[IVec3]) -> SectionStore {
        let params = WorldParams::new(4, 4, 1).unwrap();
        let mut store = SectionStore::new(params);
        let mut section = Section::new(params, IVec2::ZERO, 0, 0);
        section.set_loaded_lod(0);
        for chunk in keys {
            section.set_cell(0, *chunk * 4, Cell { block: 1, rotation: 0, light: 0 });
        }
        store.insert_section(section);
        store
    }

    fn key(x: i32, y: i32) -> ChunkKey {
        ChunkKey::new(IVec2::ZERO, 0, IVec3::new(x, y, 0))
    }

    fn pipeline(builder: Arc<dyn crate::meshing::MeshBuilder>, renderer: Arc<RecordingRenderer>, cap: usize) -> MeshPipeline {
        MeshPipeline::new(MeshWorkers::new(2, builder, renderer).unwrap(), cap)
    }

    #[test]
    fn test_request_coalesces_while_pending() {
        let mut store = store_with_chunks(&[IVec3::ZERO]);
        let renderer = Arc::new(RecordingRenderer::default());
        let mut pipeline = pipeline(Arc::new(CountingBuilder::default()), renderer, 8);

        assert!(pipeline.request(&mut store, key(0, 0), 0));
        assert!(pipeline.request(&mut store, key(0, 0), 0));
        assert_eq!(pipeline.queued(), 1);
        assert_eq!(store.section(IVec2::ZERO).unwrap().pending_meshes(), 1);
        assert!(!pipeline.request(&mut store, key(3, 3), 0));
    }

    #[test]
    fn test_dispatch_publishes_on_completion() {
        let mut store = store_with_chunks(&[IVec3::ZERO]);
        let renderer = Arc::new(RecordingRenderer::default());
        let physics = RecordingPhysics::default();
        let mut pipeline = pipeline(Arc::new(CountingBuilder::default()), renderer.clone(), 8);

        pipeline.request(&mut store, key(0, 0), 0);
        assert_eq!(pipeline.dispatch(&mut store, &[Vec3::ZERO]), 1);
        assert_eq!(store.chunk(&key(0, 0)).unwrap().mesh_state(), MeshState::InProgress);

        let applied = pipeline.wait_for_completions(&mut store, renderer.as_ref(), Some(&physics), WAIT);
        assert_eq!(applied, 1);
        let chunk = store.chunk(&key(0, 0)).unwrap();
        assert_eq!(chunk.mesh_state(), MeshState::Idle);
        assert_eq!(chunk.render_lod, 0);
        assert!(chunk.proxy.is_some());
        assert!(chunk.physics.is_some());
        assert_eq!(store.section(IVec2::ZERO).unwrap().pending_meshes(), 0);
        assert!(renderer.events().contains(&RenderEvent::Added(chunk.proxy.unwrap())));
        assert!(pipeline.is_idle());
    }

    #[test]
    fn test_dispatch_nearest_first_with_cap() {
        let mut store = store_with_chunks(&[IVec3::new(0, 0, 0), IVec3::new(3, 3, 0), IVec3::new(1, 0, 0)]);
        let renderer = Arc::new(RecordingRenderer::default());
        let mut pipeline = pipeline(Arc::new(CountingBuilder::default()), renderer, 2);

        for k in [key(3, 3), key(0, 0), key(1, 0)] {
            pipeline.request(&mut store, k, 0);
        }
        let observer = Vec3::new(14.0, 14.0, 2.0);
        assert_eq!(pipeline.dispatch(&mut store, &[observer]), 2);
        assert_eq!(store.chunk(&key(3, 3)).unwrap().mesh_state(), MeshState::InProgress);
        assert_eq!(store.chunk(&key(1, 0)).unwrap().mesh_state(), MeshState::InProgress);
        assert_eq!(store.chunk(&key(0, 0)).unwrap().mesh_state(), MeshState::Pending);
        assert!(pipeline.is_queued(&key(0, 0)));
    }

    #[test]
    fn test_edit_during_build_schedules_exactly_one_rebuild() {
        let mut store = store_with_chunks(&[IVec3::ZERO]);
        let renderer = Arc::new(RecordingRenderer::default());
        let builder = Arc::new(GatedBuilder::new());
        let mut pipeline = pipeline(builder.clone(), renderer.clone(), 8);

        pipeline.request(&mut store, key(0, 0), 0);
        assert_eq!(pipeline.dispatch(&mut store, &[]), 1);
        for _ in 0..5 {
            pipeline.request(&mut store, key(0, 0), 0);
        }
        assert_eq!(store.chunk(&key(0, 0)).unwrap().mesh_state(), MeshState::InProgressWithChanges);
        assert_eq!(pipeline.queued(), 0);

        builder.release(1);
        assert_eq!(pipeline.wait_for_completions(&mut store, renderer.as_ref(), None, WAIT), 1);
        assert_eq!(store.chunk(&key(0, 0)).unwrap().mesh_state(), MeshState::Pending);
        assert_eq!(pipeline.queued(), 1);
        assert_eq!(store.section(IVec2::ZERO).unwrap().pending_meshes(), 1);

        assert_eq!(pipeline.dispatch(&mut store, &[]), 1);
        builder.release(1);
        pipeline.wait_for_completions(&mut store, renderer.as_ref(), None, WAIT);
        assert_eq!(store.chunk(&key(0, 0)).unwrap().mesh_state(), MeshState::Idle);
        assert_eq!(builder.builds(), 2);
        assert!(pipeline.is_idle());
    }

    #[test]
    fn test_cancel_pending() {
        let mut store = store_with_chunks(&[IVec3::ZERO]);
        let renderer = Arc::new(RecordingRenderer::default());
        let mut pipeline = pipeline(Arc::new(CountingBuilder::default()), renderer, 8);

        pipeline.request(&mut store, key(0, 0), 0);
        assert!(pipeline.cancel(&mut store, &key(0, 0)));
        assert_eq!(pipeline.queued(), 0);
        assert_eq!(store.chunk(&key(0, 0)).unwrap().mesh_state(), MeshState::Idle);
        assert_eq!(store.section(IVec2::ZERO).unwrap().pending_meshes(), 0);
        assert!(!pipeline.cancel(&mut store, &key(0, 0)));
    }

    #[test]
    fn test_empty_mesh_removes_proxy() {
        let mut store = store_with_chunks(&[IVec3::ZERO]);
        let renderer = Arc::new(RecordingRenderer::default());
        let mut pipeline = pipeline(Arc::new(CountingBuilder::default()), renderer.clone(), 8);

        pipeline.request(&mut store, key(0, 0), 0);
        pipeline.dispatch(&mut store, &[]);
        pipeline.wait_for_completions(&mut store, renderer.as_ref(), None, WAIT);
        let proxy = store.chunk(&key(0, 0)).unwrap().proxy.unwrap();

        store
            .section_mut(IVec2::ZERO)
            .unwrap()
            .set_cell(0, IVec3::ZERO, Cell::default());
        pipeline.request(&mut store, key(0, 0), 0);
        pipeline.dispatch(&mut store, &[]);
        pipeline.wait_for_completions(&mut store, renderer.as_ref(), None, WAIT);

        let chunk = store.chunk(&key(0, 0)).unwrap();
        assert!(chunk.proxy.is_none());
        assert_eq!(chunk.render_lod, 0);
        assert!(renderer.events().contains(&RenderEvent::Removed(proxy)));
    }
}
