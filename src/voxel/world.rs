//! The streamed voxel world
//!
//! `World` owns the section store, the persistence gateway and the meshing
//! pipeline, and exposes block access, observer registration and the
//! per-tick update. All mutation happens on the thread that owns the world;
//! mesh workers only ever see snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::types::{IVec2, IVec3, Vec3};
use crate::core::{Error, Result, WorldConfig};
use crate::meshing::{MeshBuilder, MeshPipeline, MeshWorkers};
use crate::physics::Physics;
use crate::render::Renderer;
use crate::streaming::disk_io::KeyedStore;
use crate::streaming::gateway::PersistenceGateway;
use crate::streaming::lod::LodThresholds;
use crate::terrain::TerrainGenerator;
use crate::voxel::block::{self, BlockPalette};
use crate::voxel::chunk::{Cell, MeshState};
use crate::voxel::coords::{BlockLocation, ChunkKey, WorldParams, FACE_DIRECTIONS};
use crate::voxel::section::{LoadState, Section};
use crate::voxel::store::{SectionRect, SectionStore};

/// External collaborators a world talks to
#[derive(Clone)]
pub struct WorldServices {
    pub palette: Arc<BlockPalette>,
    pub generator: Option<Arc<dyn TerrainGenerator>>,
    pub mesh_builder: Arc<dyn MeshBuilder>,
    pub renderer: Arc<dyn Renderer>,
    pub physics: Option<Arc<dyn Physics>>,
}

impl WorldServices {
    /// Services with the default palette, no generator and no physics
    pub fn new(mesh_builder: Arc<dyn MeshBuilder>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            palette: Arc::new(BlockPalette::default()),
            generator: None,
            mesh_builder,
            renderer,
            physics: None,
        }
    }

    pub fn with_palette(mut self, palette: Arc<BlockPalette>) -> Self {
        self.palette = palette;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TerrainGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_physics(mut self, physics: Arc<dyn Physics>) -> Self {
        self.physics = Some(physics);
        self
    }
}

/// Identity of a registered observer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

/// What one [`World::update`] call did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    pub sections_loaded: usize,
    pub sections_unloaded: usize,
    /// Sections whose transition waits for outstanding mesh work
    pub sections_deferred: usize,
    pub meshes_requested: usize,
    pub meshes_dispatched: usize,
    pub meshes_completed: usize,
}

/// A streamed, editable voxel world
pub struct World {
    pub(crate) config: WorldConfig,
    pub(crate) params: WorldParams,
    pub(crate) store: SectionStore,
    pub(crate) gateway: PersistenceGateway,
    pub(crate) services: WorldServices,
    pub(crate) pipeline: MeshPipeline,
    pub(crate) thresholds: LodThresholds,
    /// Index rectangle as stored when the world was opened; missing sections
    /// inside it are void rather than generated
    pub(crate) generated_rect: SectionRect,
    observers: BTreeMap<ObserverId, Vec3>,
    next_observer: u64,
    elapsed: f64,
}

impl World {
    /// Open the world stored in `store`, creating a new one when it holds no index.
    ///
    /// Only sections outside the stored index rectangle are generated. The
    /// rectangle spans every section ever stored, so sections generated far
    /// apart in one session leave unavailable holes between them that stay
    /// void after a reopen.
    pub fn open(config: WorldConfig, services: WorldServices, store: Box<dyn KeyedStore>) -> Result<Self> {
        let params = config.params()?;
        let gateway = PersistenceGateway::new(store);
        let mut sections = SectionStore::new(params);

        let existing = gateway.load_index()?;
        if let Some(index) = &existing {
            index.check_params(&params)?;
            if index.palette != services.palette.name() {
                log::warn!(
                    "World was created with palette '{}', opening with '{}'",
                    index.palette,
                    services.palette.name()
                );
            }
            sections.resize_index(index.rect);
            for &pos in &index.available {
                sections.set_available(pos, true);
            }
        }
        let generated_rect = sections.rect();

        let workers = MeshWorkers::new(
            config.meshing.worker_threads,
            Arc::clone(&services.mesh_builder),
            Arc::clone(&services.renderer),
        )?;
        let pipeline = MeshPipeline::new(workers, config.meshing.max_dispatch_per_tick);
        let thresholds = LodThresholds::new(config.streaming.lod0_distance_sq, params.lod_levels());

        let world = Self {
            config,
            params,
            store: sections,
            gateway,
            services,
            pipeline,
            thresholds,
            generated_rect,
            observers: BTreeMap::new(),
            next_observer: 0,
            elapsed: 0.0,
        };

        match existing {
            Some(index) => log::info!(
                "Opened world: chunk {} / section {} / {} LODs, {} stored sections",
                params.chunk_size(),
                params.section_size(),
                params.lod_levels(),
                index.available.len()
            ),
            None => {
                world.persist_index();
                log::info!(
                    "Created world: chunk {} / section {} / {} LODs",
                    params.chunk_size(),
                    params.section_size(),
                    params.lod_levels()
                );
            }
        }
        Ok(world)
    }

    pub fn params(&self) -> &WorldParams {
        &self.params
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn palette(&self) -> &BlockPalette {
        &self.services.palette
    }

    pub fn sections(&self) -> &SectionStore {
        &self.store
    }

    pub fn section(&self, x: i32, y: i32) -> Option<&Section> {
        self.store.section(IVec2::new(x, y))
    }

    pub fn pipeline(&self) -> &MeshPipeline {
        &self.pipeline
    }

    /// Seconds of world time accumulated through [`update`](Self::update)
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn is_section_available(&self, x: i32, y: i32) -> bool {
        self.store.is_available(IVec2::new(x, y))
    }

    pub fn is_section_loaded(&self, x: i32, y: i32) -> bool {
        self.store.is_resident(IVec2::new(x, y))
    }

    // -- observers --

    pub fn register_observer(&mut self, position: Vec3) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.insert(id, position);
        log::debug!("Observer {id:?} registered at {position}");
        id
    }

    /// Returns false for unknown observers.
    pub fn move_observer(&mut self, id: ObserverId, position: Vec3) -> bool {
        match self.observers.get_mut(&id) {
            Some(p) => {
                *p = position;
                true
            }
            None => false,
        }
    }

    pub fn unregister_observer(&mut self, id: ObserverId) -> bool {
        self.observers.remove(&id).is_some()
    }

    pub fn observer_positions(&self) -> Vec<Vec3> {
        self.observers.values().copied().collect()
    }

    // -- per tick --

    /// Advance one tick: publish finished meshes, stream sections, retarget
    /// chunk render LODs, then dispatch queued meshes.
    pub fn update(&mut self, dt: f32) -> TickStats {
        self.elapsed += dt as f64;
        let mut stats = TickStats {
            meshes_completed: self.pipeline.poll_completed(
                &mut self.store,
                self.services.renderer.as_ref(),
                self.services.physics.as_deref(),
            ),
            ..TickStats::default()
        };

        let streamed = self.stream_sections();
        stats.sections_loaded = streamed.loaded;
        stats.sections_unloaded = streamed.unloaded;
        stats.sections_deferred = streamed.deferred;
        stats.meshes_requested = self.transition_loaded_chunk_render_lods();

        let observers = self.observer_positions();
        stats.meshes_dispatched = self.pipeline.dispatch(&mut self.store, &observers);

        if stats != TickStats::default() {
            log::debug!("Tick: {stats:?}");
        }
        stats
    }

    /// Wait up to `timeout` for in-flight meshes and publish them.
    pub fn wait_for_meshes(&mut self, timeout: Duration) -> usize {
        self.pipeline.wait_for_completions(
            &mut self.store,
            self.services.renderer.as_ref(),
            self.services.physics.as_deref(),
            timeout,
        )
    }

    // -- block access --

    /// Block value at `pos`, loading (or generating) its section at LOD 0 if needed.
    ///
    /// Unloadable positions read as air.
    pub fn get_block_value(&mut self, pos: IVec3) -> u16 {
        let loc = self.params.split_block(pos);
        if !self.store.section(loc.section).is_some_and(|s| s.is_resident(0))
            && self.can_load_section(loc.section)
        {
            if let Err(e) = self.load_section(loc.section.x, loc.section.y, 0, false) {
                log::warn!("Could not load section {} for block read: {e}", loc.section);
            }
        }
        self.store.block_value(pos).unwrap_or(block::AIR)
    }

    /// Block value at `pos` without loading anything.
    pub fn peek_block_value(&self, pos: IVec3) -> Option<u16> {
        self.store.block_value(pos)
    }

    /// Block light at `pos` without loading anything.
    pub fn block_light(&self, pos: IVec3) -> Option<u8> {
        let loc = self.params.split_block(pos);
        let section = self.store.section(loc.section)?;
        if !section.is_resident(0) {
            return None;
        }
        Some(section.chunk(0, loc.chunk).map_or(0, |c| c.data.light(loc.local)))
    }

    /// Set the type of the block at `pos`, keeping its flag bits, and update lighting.
    pub fn set_block_type(&mut self, pos: IVec3, block_type: u16) -> Result<()> {
        let loc = self.writable_block(pos)?;
        let old = self.cell_at(&loc);
        let old_type = block::block_type(old.block);
        let new_type = block::block_type(block_type);
        if old_type == new_type {
            return Ok(());
        }
        self.write_cell(
            &loc,
            Cell {
                block: block::with_block_type(old.block, new_type),
                ..old
            },
        );

        let palette = Arc::clone(&self.services.palette);
        let old_emission = palette.light_emission(old_type);
        let new_emission = palette.light_emission(new_type);
        let old_blocking = palette.is_light_blocking(old_type);
        let new_blocking = palette.is_light_blocking(new_type);

        if old_emission > 0 || (new_blocking && old.light > 0) {
            self.unspread_light(pos)?;
        }
        if new_emission > 0 {
            self.spread_light(pos, new_emission)?;
        } else if old_blocking && !new_blocking {
            self.reflood_from_neighbours(pos)?;
        }
        Ok(())
    }

    /// Set flag bit `bit` (0..4) of the block at `pos`.
    pub fn set_block_bit(&mut self, pos: IVec3, bit: u32) -> Result<()> {
        self.update_block_value(pos, |value| block::with_flag(value, bit))
    }

    /// Clear flag bit `bit` (0..4) of the block at `pos`.
    pub fn clear_block_bit(&mut self, pos: IVec3, bit: u32) -> Result<()> {
        self.update_block_value(pos, |value| block::without_flag(value, bit))
    }

    /// Set the rotation byte of the block at `pos`.
    pub fn set_block_rotation(&mut self, pos: IVec3, rotation: u8) -> Result<()> {
        let loc = self.writable_block(pos)?;
        let old = self.cell_at(&loc);
        self.write_cell(&loc, Cell { rotation, ..old });
        Ok(())
    }

    fn update_block_value(&mut self, pos: IVec3, f: impl FnOnce(u16) -> u16) -> Result<()> {
        let loc = self.writable_block(pos)?;
        let old = self.cell_at(&loc);
        self.write_cell(&loc, Cell { block: f(old.block), ..old });
        Ok(())
    }

    // -- internals shared with lighting and streaming --

    /// Make the LOD-0 section of `pos` resident (loading, generating or
    /// creating it) and return the block's location.
    pub(crate) fn writable_block(&mut self, pos: IVec3) -> Result<BlockLocation> {
        let loc = self.params.split_block(pos);
        let section_pos = loc.section;
        match self.store.section(section_pos).map(Section::loaded_lod) {
            Some(0) => {}
            Some(_) => {
                if !self.load_section(section_pos.x, section_pos.y, 0, false)? {
                    return Err(Error::SectionState {
                        x: section_pos.x,
                        y: section_pos.y,
                        reason: "LOD 0 could not be loaded".to_string(),
                    });
                }
            }
            None => {
                let loaded = self.can_load_section(section_pos)
                    && self.load_section(section_pos.x, section_pos.y, 0, false)?;
                if !loaded {
                    if self.store.is_available(section_pos) {
                        return Err(Error::SectionState {
                            x: section_pos.x,
                            y: section_pos.y,
                            reason: "stored section could not be loaded".to_string(),
                        });
                    }
                    self.create_section(section_pos.x, section_pos.y, loc.chunk.z, loc.chunk.z);
                }
            }
        }
        Ok(loc)
    }

    /// LOD-0 cell at a location; absent sections and chunks read as empty.
    pub(crate) fn cell_at(&self, loc: &BlockLocation) -> Cell {
        self.store
            .section(loc.section)
            .and_then(|s| s.chunk(0, loc.chunk))
            .map(|c| c.data.cell(loc.local))
            .unwrap_or_default()
    }

    /// Write a LOD-0 cell of a resident section and run the block-changed hook.
    pub(crate) fn write_cell(&mut self, loc: &BlockLocation, cell: Cell) {
        let pos = self.params.chunk_local_to_global(loc);
        let Some(section) = self.store.section_mut(loc.section) else {
            log::error!("Write to non-resident section {}", loc.section);
            return;
        };
        let (_, changed) = section.set_cell(0, pos, cell);
        if changed {
            self.on_block_changed(loc);
        }
    }

    /// Marks the section changed, refreshes coarser LODs and re-queues every
    /// affected chunk that is rendered or already in the mesh pipeline.
    fn on_block_changed(&mut self, loc: &BlockLocation) {
        let pos = self.params.chunk_local_to_global(loc);
        let Some(section) = self.store.section_mut(loc.section) else {
            return;
        };
        if section.load_state != LoadState::Generating {
            section.load_state = LoadState::Changed;
        }
        let mut keys = vec![loc.key()];
        keys.extend(section.refresh_parent_cells(pos));

        let last = self.params.chunk_size() as i32 - 1;
        for direction in FACE_DIRECTIONS {
            let axis = if direction.x != 0 { 0 } else if direction.y != 0 { 1 } else { 2 };
            let edge = if direction[axis] < 0 { 0 } else { last };
            if loc.local[axis] == edge {
                keys.push(self.params.neighbour_key(&loc.key(), direction));
            }
        }

        for key in keys {
            self.requeue_if_rendered(key);
        }
    }

    fn requeue_if_rendered(&mut self, key: ChunkKey) {
        let not_rendered = self.params.lod_levels();
        let wanted = match self.store.chunk(&key) {
            Some(chunk) => chunk.render_lod != not_rendered || chunk.mesh_state() != MeshState::Idle,
            None => false,
        };
        if wanted {
            self.pipeline.request(&mut self.store, key, key.lod);
        }
    }

    /// Write back every changed section. Returns how many were saved.
    pub fn flush(&mut self) -> Result<usize> {
        let changed: Vec<IVec2> = self
            .store
            .sections()
            .filter(|s| s.is_changed() && s.loaded_lod() == 0)
            .map(Section::pos)
            .collect();
        for pos in &changed {
            self.save_section(pos.x, pos.y)?;
        }
        Ok(changed.len())
    }
}
