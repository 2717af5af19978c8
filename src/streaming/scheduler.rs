//! Per-tick streaming decisions
//!
//! Sections are loaded, refined, coarsened and unloaded from the distance
//! to the nearest observer; chunks then pick the LOD they render at.

use std::collections::BTreeMap;

use crate::core::types::{IVec2, Vec3};
use crate::meshing::pipeline::release_render_state;
use crate::streaming::lod::{section_distance_sq, xy_distance_sq};
use crate::streaming::priority::{select_loads, SectionCandidate};
use crate::voxel::chunk::MeshState;
use crate::voxel::coords::{ChunkKey, LATERAL_DIRECTIONS};
use crate::voxel::section::Section;
use crate::voxel::store::Residency;
use crate::voxel::world::World;

/// Section-level outcome of one streaming pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamOutcome {
    pub loaded: usize,
    pub unloaded: usize,
    pub deferred: usize,
}

impl World {
    /// Section coordinates of every observer, deduplicated
    pub(crate) fn observer_sections(&self) -> Vec<IVec2> {
        let mut sections: Vec<IVec2> = self
            .observer_positions()
            .into_iter()
            .map(|p| self.params.section_of_position(p))
            .collect();
        sections.sort_by_key(|p| (p.y, p.x));
        sections.dedup();
        sections
    }

    /// LOD tier a section should be resident at; `lod_levels` means unload.
    pub(crate) fn section_tier(&self, pos: IVec2, observers: &[IVec2]) -> u32 {
        observers
            .iter()
            .map(|&o| section_distance_sq(pos, o))
            .min()
            .map_or(self.params.lod_levels(), |d| self.thresholds.tier(d as f32))
    }

    /// Unload, transition and load sections for the current observers.
    pub fn stream_sections(&mut self) -> StreamOutcome {
        let observers = self.observer_sections();
        let levels = self.params.lod_levels();
        let mut outcome = StreamOutcome::default();

        for pos in self.store.resident_sections() {
            let tier = self.section_tier(pos, &observers);
            let Some(section) = self.store.section(pos) else {
                continue;
            };
            if tier == section.loaded_lod() {
                continue;
            }
            if section.pending_meshes() > 0 {
                log::trace!("Section {pos} waits for {} meshes", section.pending_meshes());
                outcome.deferred += 1;
                continue;
            }

            let result = if tier == levels {
                self.unload_section(pos.x, pos.y)
            } else {
                self.load_section(pos.x, pos.y, tier, true)
            };
            match result {
                Ok(true) if tier == levels => outcome.unloaded += 1,
                Ok(true) => {}
                Ok(false) => outcome.deferred += 1,
                Err(e) => log::warn!("Streaming section {pos} to LOD {tier} failed: {e}"),
            }
        }

        let radius = self.thresholds.search_radius();
        let mut candidates: BTreeMap<(i32, i32), SectionCandidate> = BTreeMap::new();
        for &observer in &observers {
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let pos = observer + IVec2::new(dx, dy);
                    let distance_sq = section_distance_sq(pos, observer);
                    let lod = self.thresholds.tier(distance_sq as f32);
                    if lod == levels || self.store.is_resident(pos) {
                        continue;
                    }
                    candidates
                        .entry((pos.y, pos.x))
                        .and_modify(|c| {
                            if distance_sq < c.distance_sq {
                                c.distance_sq = distance_sq;
                                c.lod = lod;
                            }
                        })
                        .or_insert(SectionCandidate { pos, distance_sq, lod });
                }
            }
        }
        let loadable: Vec<SectionCandidate> = candidates
            .into_values()
            .filter(|c| self.can_load_section(c.pos))
            .collect();

        for candidate in select_loads(loadable, self.config.streaming.max_section_loads_per_tick) {
            let pos = candidate.pos;
            match self.load_section(pos.x, pos.y, candidate.lod, false) {
                Ok(true) => outcome.loaded += 1,
                Ok(false) => {}
                Err(e) => log::warn!("Loading section {pos} failed: {e}"),
            }
        }

        if outcome != StreamOutcome::default() {
            log::debug!(
                "Streamed sections: {} loaded, {} unloaded, {} deferred",
                outcome.loaded,
                outcome.unloaded,
                outcome.deferred
            );
        }
        outcome
    }

    /// LOD a chunk should render at: its own LOD, or `lod_levels` when a
    /// coarser ancestor covers it or finer children should show instead.
    pub(crate) fn chunk_render_target(&self, section: &Section, key: &ChunkKey, observers: &[Vec3]) -> u32 {
        let levels = self.params.lod_levels();
        let section_blocks = self.params.section_blocks() as f32;
        let tier_of = |key: &ChunkKey| {
            let center = self.params.chunk_bounds(key).center();
            let distance = observers
                .iter()
                .map(|&o| xy_distance_sq(center, o, section_blocks))
                .fold(f32::MAX, f32::min);
            self.thresholds.tier(distance)
        };

        let own = key.lod == section.loaded_lod() || tier_of(key) >= key.lod;
        if !own {
            return levels;
        }
        for lod in key.lod + 1..levels {
            let ancestor = self.params.ancestor_key(key, lod);
            if tier_of(&ancestor) >= lod {
                return levels;
            }
        }
        key.lod
    }

    /// Retarget the render LOD of every resident chunk. Returns the number of
    /// mesh requests made.
    pub fn transition_loaded_chunk_render_lods(&mut self) -> usize {
        let observers = self.observer_positions();
        let levels = self.params.lod_levels();

        let mut changes: Vec<(ChunkKey, u32)> = Vec::new();
        for section in self.store.sections() {
            for lod in section.loaded_lod()..levels {
                for chunk in section.chunks(lod) {
                    if chunk.mesh_state() != MeshState::Idle {
                        continue;
                    }
                    let target = self.chunk_render_target(section, &chunk.key, &observers);
                    debug_assert!(target >= section.loaded_lod());
                    if target == chunk.render_lod {
                        continue;
                    }
                    if target != levels && chunk.data.is_air() {
                        continue;
                    }
                    changes.push((chunk.key, target));
                }
            }
        }

        let mut requested = 0;
        for (key, target) in changes {
            if target == levels {
                let renderer = self.services.renderer.as_ref();
                let physics = self.services.physics.as_deref();
                if let Some(chunk) = self.store.chunk_mut(&key) {
                    release_render_state(chunk, renderer, physics);
                    chunk.render_lod = levels;
                    log::trace!("Chunk {key:?} hidden");
                }
                continue;
            }
            if !self.is_chunk_neighbours_loaded(&key) {
                continue;
            }
            if self.pipeline.request(&mut self.store, key, target) {
                requested += 1;
            }
        }
        requested
    }

    /// The four lateral neighbours of `key` are resident at its LOD or finer.
    ///
    /// Neighbours in void sections, and in sections the scheduler keeps
    /// coarser than this LOD, never will be and count as ready.
    pub fn is_chunk_neighbours_loaded(&self, key: &ChunkKey) -> bool {
        let observers = self.observer_sections();
        LATERAL_DIRECTIONS.iter().all(|&direction| {
            let neighbour = self.params.neighbour_key(key, direction);
            if neighbour.section == key.section {
                return true;
            }
            match self.store.chunk_status(&neighbour) {
                Residency::Loaded => true,
                _ if !self.can_load_section(neighbour.section) => true,
                _ => self.section_tier(neighbour.section, &observers) > key.lod,
            }
        })
    }
}
