//! Mesh worker pool
//!
//! Jobs run on a dedicated rayon pool; results come back to the main thread
//! through a crossbeam channel. A panicking mesh builder is caught on the
//! worker and reported as a failed result.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::core::{Error, Result};
use crate::meshing::{ChunkSnapshot, MeshBuilder, MeshData};
use crate::render::{RenderProxyId, Renderer};
use crate::voxel::coords::ChunkKey;

/// Work handed to a mesh worker
pub struct MeshJob {
    pub snapshot: ChunkSnapshot,
    /// LOD the result will be rendered at
    pub new_lod: u32,
    /// The chunk has no proxy yet; the worker may create it
    pub create_proxy: bool,
}

/// Finished (or failed) mesh build
#[derive(Debug)]
pub struct MeshResult {
    pub key: ChunkKey,
    pub new_lod: u32,
    /// `None` when the builder panicked
    pub mesh: Option<MeshData>,
    /// Proxy created on the worker for a first-time chunk
    pub proxy: Option<RenderProxyId>,
}

/// Rayon pool plus the completion channel
pub struct MeshWorkers {
    pool: rayon::ThreadPool,
    builder: Arc<dyn MeshBuilder>,
    renderer: Arc<dyn Renderer>,
    tx: Sender<MeshResult>,
    rx: Receiver<MeshResult>,
}

impl MeshWorkers {
    /// Build a pool with `threads` workers (0 lets rayon decide).
    pub fn new(threads: usize, builder: Arc<dyn MeshBuilder>, renderer: Arc<dyn Renderer>) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("mesh-worker-{i}"))
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;
        let (tx, rx) = unbounded();
        let workers = Self {
            pool,
            builder,
            renderer,
            tx,
            rx,
        };
        log::info!("Mesh worker pool started with {} threads", workers.thread_count());
        Ok(workers)
    }

    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue a job on the pool.
    pub fn spawn(&self, job: MeshJob) {
        let builder = Arc::clone(&self.builder);
        let renderer = Arc::clone(&self.renderer);
        let tx = self.tx.clone();
        self.pool.spawn(move || {
            let key = job.snapshot.key;
            let built = panic::catch_unwind(AssertUnwindSafe(|| builder.build(&job.snapshot)));
            let mesh = match built {
                Ok(mesh) => Some(mesh),
                Err(_) => {
                    log::error!("Mesh builder panicked on chunk {key:?}");
                    None
                }
            };
            let proxy = match &mesh {
                Some(mesh) if job.create_proxy && !mesh.is_empty() => {
                    Some(renderer.create_proxy(key, mesh))
                }
                _ => None,
            };
            // The receiver only disappears when the world is being dropped
            let _ = tx.send(MeshResult {
                key,
                new_lod: job.new_lod,
                mesh,
                proxy,
            });
        });
    }

    /// Completed results, without blocking.
    pub fn try_completed(&self) -> Vec<MeshResult> {
        self.rx.try_iter().collect()
    }

    /// Block until at least one result arrives or `timeout` elapses, then
    /// drain everything available.
    pub fn wait_completed(&self, timeout: Duration) -> Vec<MeshResult> {
        let mut results = Vec::new();
        match self.rx.recv_timeout(timeout) {
            Ok(result) => results.push(result),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return results,
        }
        results.extend(self.rx.try_iter());
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{IVec2, IVec3};
    use crate::testing::{CountingBuilder, RecordingRenderer};
    use crate::voxel::chunk::ChunkData;

    fn job(create_proxy: bool, solid: bool) -> MeshJob {
        let mut data = ChunkData::new(2);
        if solid {
            data.blocks[0] = 1;
        }
        MeshJob {
            snapshot: ChunkSnapshot {
                key: ChunkKey::new(IVec2::ZERO, 0, IVec3::ZERO),
                data,
                neighbours: Default::default(),
            },
            new_lod: 0,
            create_proxy,
        }
    }

    struct PanickingBuilder;

    impl MeshBuilder for PanickingBuilder {
        fn build(&self, _snapshot: &ChunkSnapshot) -> MeshData {
            panic!("builder failure");
        }
    }

    #[test]
    fn test_worker_builds_and_creates_proxy() {
        let builder = Arc::new(CountingBuilder::default());
        let renderer = Arc::new(RecordingRenderer::default());
        let workers = MeshWorkers::new(1, builder.clone(), renderer.clone()).unwrap();
        workers.spawn(job(true, true));

        let results = workers.wait_completed(Duration::from_secs(5));
        assert_eq!(results.len(), 1);
        assert!(results[0].mesh.as_ref().is_some_and(|m| !m.is_empty()));
        assert!(results[0].proxy.is_some());
        assert_eq!(builder.builds(), 1);
        assert_eq!(renderer.created(), 1);
    }

    #[test]
    fn test_empty_mesh_creates_no_proxy() {
        let builder = Arc::new(CountingBuilder::default());
        let renderer = Arc::new(RecordingRenderer::default());
        let workers = MeshWorkers::new(1, builder, renderer.clone()).unwrap();
        workers.spawn(job(true, false));

        let results = workers.wait_completed(Duration::from_secs(5));
        assert_eq!(results.len(), 1);
        assert!(results[0].proxy.is_none());
        assert_eq!(renderer.created(), 0);
    }

    #[test]
    fn test_panicking_builder_reports_failure() {
        let renderer = Arc::new(RecordingRenderer::default());
        let workers = MeshWorkers::new(1, Arc::new(PanickingBuilder), renderer).unwrap();
        workers.spawn(job(true, true));

        let results = workers.wait_completed(Duration::from_secs(5));
        assert_eq!(results.len(), 1);
        assert!(results[0].mesh.is_none());
        assert!(results[0].proxy.is_none());
    }

    #[test]
    fn test_wait_times_out_when_idle() {
        let workers = MeshWorkers::new(
            1,
            Arc::new(CountingBuilder::default()),
            Arc::new(RecordingRenderer::default()),
        )
        .unwrap();
        assert_eq!(workers.thread_count(), 1);
        assert!(workers.wait_completed(Duration::from_millis(10)).is_empty());
        assert!(workers.try_completed().is_empty());
    }
}
