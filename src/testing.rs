//! Test doubles and world constructors shared by unit tests

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::core::WorldConfig;
use crate::meshing::{ChunkSnapshot, MeshBatch, MeshBuilder, MeshData, MeshVertex};
use crate::physics::{Physics, PhysicsObjectId};
use crate::render::{RenderProxyId, Renderer};
use crate::streaming::gateway::INDEX_NAME;
use crate::streaming::{KeyedStore, MemoryStore, StoreWriter};
use crate::terrain::{GeneratedSection, TerrainGenerator};
use crate::voxel::coords::ChunkKey;
use crate::voxel::world::{World, WorldServices};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderEvent {
    Created(RenderProxyId),
    Updated(RenderProxyId),
    Added(RenderProxyId),
    Removed(RenderProxyId),
}

/// Renderer that records every call
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    next: AtomicU64,
    events: Mutex<Vec<RenderEvent>>,
}

impl RecordingRenderer {
    pub fn events(&self) -> Vec<RenderEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, RenderEvent::Created(_)))
            .count()
    }

    fn record(&self, event: RenderEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl Renderer for RecordingRenderer {
    fn create_proxy(&self, _key: ChunkKey, _mesh: &MeshData) -> RenderProxyId {
        let id = RenderProxyId(self.next.fetch_add(1, Ordering::Relaxed));
        self.record(RenderEvent::Created(id));
        id
    }

    fn update_proxy(&self, proxy: RenderProxyId, _mesh: &MeshData) {
        self.record(RenderEvent::Updated(proxy));
    }

    fn add_renderable(&self, proxy: RenderProxyId) {
        self.record(RenderEvent::Added(proxy));
    }

    fn remove_renderable(&self, proxy: RenderProxyId) {
        self.record(RenderEvent::Removed(proxy));
    }
}

/// Physics engine that only counts objects
#[derive(Debug, Default)]
pub struct RecordingPhysics {
    next: AtomicU64,
    pub added: AtomicUsize,
    pub removed: AtomicUsize,
    pub updated: AtomicUsize,
}

impl Physics for RecordingPhysics {
    fn add_object(&self, _key: ChunkKey, _mesh: &MeshData) -> PhysicsObjectId {
        self.added.fetch_add(1, Ordering::Relaxed);
        PhysicsObjectId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    fn remove_object(&self, _object: PhysicsObjectId) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }

    fn update_single_object(&self, _object: PhysicsObjectId, _mesh: &MeshData) {
        self.updated.fetch_add(1, Ordering::Relaxed);
    }
}

/// One quad for any chunk holding a non-air block
fn placeholder_mesh(snapshot: &ChunkSnapshot) -> MeshData {
    if snapshot.data.blocks.iter().all(|&b| b == 0) {
        return MeshData::default();
    }
    let vertex = |x: f32, y: f32| MeshVertex {
        position: [x, y, 0.0],
        packed: 0,
    };
    MeshData {
        vertices: vec![vertex(0.0, 0.0), vertex(1.0, 0.0), vertex(1.0, 1.0), vertex(0.0, 1.0)],
        indices: vec![0, 1, 2, 0, 2, 3],
        batches: vec![MeshBatch {
            material: 1,
            first_index: 0,
            index_count: 6,
        }],
    }
}

/// Mesh builder counting how many builds ran
#[derive(Debug, Default)]
pub struct CountingBuilder {
    builds: AtomicUsize,
}

impl CountingBuilder {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl MeshBuilder for CountingBuilder {
    fn build(&self, snapshot: &ChunkSnapshot) -> MeshData {
        self.builds.fetch_add(1, Ordering::SeqCst);
        placeholder_mesh(snapshot)
    }
}

/// Mesh builder that blocks each build until the test releases it
pub struct GatedBuilder {
    gate_tx: Sender<()>,
    gate_rx: Receiver<()>,
    builds: AtomicUsize,
}

impl GatedBuilder {
    pub fn new() -> Self {
        let (gate_tx, gate_rx) = unbounded();
        Self {
            gate_tx,
            gate_rx,
            builds: AtomicUsize::new(0),
        }
    }

    /// Let `n` builds finish.
    pub fn release(&self, n: usize) {
        for _ in 0..n {
            self.gate_tx.send(()).unwrap();
        }
    }

    /// Builds that have finished
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl MeshBuilder for GatedBuilder {
    fn build(&self, snapshot: &ChunkSnapshot) -> MeshData {
        let _ = self.gate_rx.recv_timeout(Duration::from_secs(10));
        self.builds.fetch_add(1, Ordering::SeqCst);
        placeholder_mesh(snapshot)
    }
}

/// Generator that accepts every section and then fails to fill it
pub struct FailingGenerator;

impl TerrainGenerator for FailingGenerator {
    fn can_generate_section(&self, _x: i32, _y: i32) -> bool {
        true
    }

    fn z_range(&self, _x: i32, _y: i32) -> (i32, i32) {
        (0, 0)
    }

    fn generate_blocks(&self, _x: i32, _y: i32, _section: &mut GeneratedSection) -> bool {
        false
    }
}

/// In-memory store whose writes can be switched off, for the index and
/// section entries separately
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_index: Arc<AtomicBool>,
    fail_sections: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn fail_index_writes(&self, fail: bool) {
        self.fail_index.store(fail, Ordering::SeqCst);
    }

    pub fn fail_section_writes(&self, fail: bool) {
        self.fail_sections.store(fail, Ordering::SeqCst);
    }

    /// The entries written so far
    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }
}

impl KeyedStore for FlakyStore {
    fn open_read(&self, name: &str) -> io::Result<Box<dyn Read + '_>> {
        self.inner.open_read(name)
    }

    fn open_write(&self, name: &str) -> io::Result<Box<dyn StoreWriter + '_>> {
        let flag = if name == INDEX_NAME { &self.fail_index } else { &self.fail_sections };
        if flag.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, format!("write to '{name}' refused")));
        }
        self.inner.open_write(name)
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        self.inner.remove(name)
    }

    fn exists(&self, name: &str) -> bool {
        self.inner.exists(name)
    }
}

pub fn test_config() -> WorldConfig {
    let mut config = WorldConfig::default();
    config.meshing.worker_threads = 2;
    config
}

pub fn test_services() -> WorldServices {
    WorldServices::new(
        Arc::new(CountingBuilder::default()),
        Arc::new(RecordingRenderer::default()),
    )
}

pub fn test_world(config: WorldConfig) -> World {
    test_world_in(config, MemoryStore::new())
}

/// Open a world over `store`; clones of the store see everything it writes.
pub fn test_world_in(config: WorldConfig, store: MemoryStore) -> World {
    World::open(config, test_services(), Box::new(store)).unwrap()
}
