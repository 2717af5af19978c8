//! Persistence gateway: world index and section payloads
//!
//! The world index (`index.bin`) records the world parameters, the section
//! index rectangle and the set of stored sections. Each section is one
//! entry named `"{x}_{y}.section"` holding every LOD's block, rotation and
//! light arrays. All integers are little endian.

use std::io::{self, Read, Write};
use std::ops::Range;

use crate::core::types::{IVec2, IVec3};
use crate::core::{Error, Result};
use crate::meshing::pipeline::release_render_state;
use crate::streaming::disk_io::KeyedStore;
use crate::terrain::GeneratedSection;
use crate::voxel::chunk::{Chunk, ChunkData, MeshState};
use crate::voxel::coords::{ChunkKey, WorldParams};
use crate::voxel::section::{LoadState, Section};
use crate::voxel::store::SectionRect;
use crate::voxel::world::World;

/// Entry name of the world index
pub const INDEX_NAME: &str = "index.bin";

const SECTION_MAGIC: &[u8; 4] = b"VXSC";
const SECTION_VERSION: u32 = 1;

/// Entry name of a section payload
pub fn section_name(x: i32, y: i32) -> String {
    format!("{x}_{y}.section")
}

/// Decoded world index
#[derive(Clone, Debug, PartialEq)]
pub struct WorldIndexRecord {
    pub palette: String,
    pub chunk_size: i32,
    pub section_size: i32,
    pub lod_levels: i32,
    pub rect: SectionRect,
    pub available: Vec<IVec2>,
}

impl WorldIndexRecord {
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        write_u32(writer, self.palette.len() as u32)?;
        writer.write_all(self.palette.as_bytes())?;
        for value in [
            self.chunk_size,
            self.section_size,
            self.lod_levels,
            self.rect.min.x,
            self.rect.min.y,
            self.rect.max.x,
            self.rect.max.y,
        ] {
            write_i32(writer, value)?;
        }
        write_u32(writer, self.available.len() as u32)?;
        for pos in &self.available {
            write_i32(writer, pos.x)?;
            write_i32(writer, pos.y)?;
        }
        Ok(())
    }

    pub fn read_from(reader: &mut impl Read) -> io::Result<Self> {
        let name_len = read_u32(reader)? as usize;
        if name_len > 4096 {
            return Err(invalid_data(format!("palette name of {name_len} bytes")));
        }
        let mut name = vec![0u8; name_len];
        reader.read_exact(&mut name)?;
        let palette = String::from_utf8(name).map_err(|e| invalid_data(e.to_string()))?;

        let chunk_size = read_i32(reader)?;
        let section_size = read_i32(reader)?;
        let lod_levels = read_i32(reader)?;
        let min = IVec2::new(read_i32(reader)?, read_i32(reader)?);
        let max = IVec2::new(read_i32(reader)?, read_i32(reader)?);

        let count = read_u32(reader)?;
        let mut available = Vec::new();
        for _ in 0..count {
            available.push(IVec2::new(read_i32(reader)?, read_i32(reader)?));
        }
        Ok(Self {
            palette,
            chunk_size,
            section_size,
            lod_levels,
            rect: SectionRect::new(min, max),
            available,
        })
    }

    /// Reject an index written with different world parameters.
    pub fn check_params(&self, params: &WorldParams) -> Result<()> {
        let stored = (self.chunk_size, self.section_size, self.lod_levels);
        let wanted = (
            params.chunk_size() as i32,
            params.section_size() as i32,
            params.lod_levels() as i32,
        );
        if stored != wanted {
            return Err(Error::Config(format!(
                "stored world has chunk/section/LOD parameters {stored:?}, configuration asks for {wanted:?}"
            )));
        }
        Ok(())
    }
}

/// Chunks read from a section payload
#[derive(Debug)]
pub struct DecodedSection {
    pub min_chunk_z: i32,
    pub max_chunk_z: i32,
    /// Non-empty chunks of the requested LODs
    pub chunks: Vec<Chunk>,
}

/// Encode every LOD of a section.
pub fn write_section(writer: &mut impl Write, section: &Section) -> io::Result<()> {
    let params = section.params();
    writer.write_all(SECTION_MAGIC)?;
    write_u32(writer, SECTION_VERSION)?;
    write_u32(writer, params.chunk_size())?;
    write_u32(writer, params.section_size())?;
    write_u32(writer, params.lod_levels())?;
    write_i32(writer, section.min_chunk_z())?;
    write_i32(writer, section.max_chunk_z())?;

    let blobs: Vec<Vec<u8>> = (0..params.lod_levels())
        .map(|lod| lz4_flex::compress_prepend_size(&encode_lod(section, lod)))
        .collect();
    for blob in &blobs {
        write_u32(writer, blob.len() as u32)?;
    }
    for blob in &blobs {
        writer.write_all(blob)?;
    }
    Ok(())
}

/// Decode the LODs in `lods` of a section payload written by [`write_section`].
pub fn read_section(
    reader: &mut impl Read,
    params: &WorldParams,
    pos: IVec2,
    lods: Range<u32>,
) -> io::Result<DecodedSection> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != SECTION_MAGIC {
        return Err(invalid_data("bad section magic"));
    }
    let version = read_u32(reader)?;
    if version != SECTION_VERSION {
        return Err(invalid_data(format!("unsupported section version {version}")));
    }
    let stored = (read_u32(reader)?, read_u32(reader)?, read_u32(reader)?);
    if stored != (params.chunk_size(), params.section_size(), params.lod_levels()) {
        return Err(invalid_data(format!("section written with parameters {stored:?}")));
    }
    let min_chunk_z = read_i32(reader)?;
    let max_chunk_z = read_i32(reader)?;

    let mut lengths = Vec::with_capacity(params.lod_levels() as usize);
    for _ in 0..params.lod_levels() {
        lengths.push(read_u32(reader)? as u64);
    }

    let mut chunks = Vec::new();
    for (lod, &length) in (0..params.lod_levels()).zip(&lengths) {
        if !lods.contains(&lod) {
            let skipped = io::copy(&mut reader.by_ref().take(length), &mut io::sink())?;
            if skipped != length {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated section"));
            }
            continue;
        }
        let mut blob = vec![0u8; length as usize];
        reader.read_exact(&mut blob)?;
        let raw = lz4_flex::decompress_size_prepended(&blob).map_err(|e| invalid_data(e.to_string()))?;
        decode_lod(params, pos, lod, min_chunk_z, max_chunk_z, &raw, &mut chunks)?;
    }
    Ok(DecodedSection {
        min_chunk_z,
        max_chunk_z,
        chunks,
    })
}

/// Slot positions of one LOD grid, in storage order
fn lod_slots(params: &WorldParams, lod: u32, min_z: i32, max_z: i32) -> Vec<IVec3> {
    if min_z > max_z {
        return Vec::new();
    }
    let side = params.chunks_per_side(lod);
    ((min_z >> lod)..=(max_z >> lod))
        .flat_map(|z| (0..side).flat_map(move |y| (0..side).map(move |x| IVec3::new(x, y, z))))
        .collect()
}

// blocks of every slot, then rotations, then light; absent chunks are zeros
fn encode_lod(section: &Section, lod: u32) -> Vec<u8> {
    let params = section.params();
    let cells = params.cells_per_chunk();
    let slots = lod_slots(params, lod, section.min_chunk_z(), section.max_chunk_z());
    let mut out = Vec::with_capacity(slots.len() * cells * 4);

    for pos in &slots {
        match section.chunk(lod, *pos) {
            Some(chunk) => chunk.data.blocks.iter().for_each(|b| out.extend_from_slice(&b.to_le_bytes())),
            None => out.resize(out.len() + cells * 2, 0),
        }
    }
    for pos in &slots {
        match section.chunk(lod, *pos) {
            Some(chunk) => out.extend_from_slice(&chunk.data.rotation),
            None => out.resize(out.len() + cells, 0),
        }
    }
    for pos in &slots {
        match section.chunk(lod, *pos) {
            Some(chunk) => out.extend_from_slice(&chunk.data.light),
            None => out.resize(out.len() + cells, 0),
        }
    }
    out
}

fn decode_lod(
    params: &WorldParams,
    pos: IVec2,
    lod: u32,
    min_z: i32,
    max_z: i32,
    raw: &[u8],
    chunks: &mut Vec<Chunk>,
) -> io::Result<()> {
    let cells = params.cells_per_chunk();
    let slots = lod_slots(params, lod, min_z, max_z);
    let expected = slots.len() * cells * 4;
    if raw.len() != expected {
        return Err(invalid_data(format!(
            "LOD {lod} holds {} bytes, expected {expected}",
            raw.len()
        )));
    }
    let (blocks, rest) = raw.split_at(slots.len() * cells * 2);
    let (rotation, light) = rest.split_at(slots.len() * cells);

    for (i, slot) in slots.iter().enumerate() {
        let mut data = ChunkData::new(params.chunk_size());
        for (dst, src) in data
            .blocks
            .iter_mut()
            .zip(blocks[i * cells * 2..(i + 1) * cells * 2].chunks_exact(2))
        {
            *dst = u16::from_le_bytes([src[0], src[1]]);
        }
        data.rotation.copy_from_slice(&rotation[i * cells..(i + 1) * cells]);
        data.light.copy_from_slice(&light[i * cells..(i + 1) * cells]);
        if data.is_empty() {
            continue;
        }
        let key = ChunkKey::new(pos, lod, *slot);
        chunks.push(Chunk::from_data(key, data, params.lod_levels()));
    }
    Ok(())
}

fn invalid_data(reason: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.into())
}

fn write_u32(writer: &mut impl Write, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

fn write_i32(writer: &mut impl Write, value: i32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

fn read_u32(reader: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i32(reader: &mut impl Read) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// Decode failures become [`Error::Corrupt`]; everything else stays I/O
fn map_read_error(name: &str, e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => Error::corrupt(name, e.to_string()),
        _ => Error::Io(e),
    }
}

/// Reads and writes world data through a keyed store
pub struct PersistenceGateway {
    store: Box<dyn KeyedStore>,
}

impl PersistenceGateway {
    pub fn new(store: Box<dyn KeyedStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn KeyedStore {
        self.store.as_ref()
    }

    /// Stored world index, `None` for a new world.
    pub fn load_index(&self) -> Result<Option<WorldIndexRecord>> {
        if !self.store.exists(INDEX_NAME) {
            return Ok(None);
        }
        let mut reader = self.store.open_read(INDEX_NAME)?;
        WorldIndexRecord::read_from(&mut reader)
            .map(Some)
            .map_err(|e| map_read_error(INDEX_NAME, e))
    }

    pub fn save_index(&self, index: &WorldIndexRecord) -> Result<()> {
        let mut writer = self.store.open_write(INDEX_NAME)?;
        index.write_to(&mut writer)?;
        writer.commit()?;
        Ok(())
    }

    /// Read LODs `lods` of a stored section, `None` if it has no entry.
    pub fn read_section(&self, params: &WorldParams, pos: IVec2, lods: Range<u32>) -> Result<Option<DecodedSection>> {
        let name = section_name(pos.x, pos.y);
        if !self.store.exists(&name) {
            return Ok(None);
        }
        let mut reader = self.store.open_read(&name)?;
        read_section(&mut reader, params, pos, lods)
            .map(Some)
            .map_err(|e| map_read_error(&name, e))
    }

    /// Replace a section's entry with its full current contents.
    pub fn write_section(&self, section: &Section) -> Result<()> {
        let pos = section.pos();
        let mut writer = self.store.open_write(&section_name(pos.x, pos.y))?;
        write_section(&mut writer, section)?;
        writer.commit()?;
        Ok(())
    }

    pub fn remove_section(&self, pos: IVec2) -> Result<()> {
        self.store.remove(&section_name(pos.x, pos.y))?;
        Ok(())
    }
}

impl World {
    /// Make section `(x, y)` resident at `target_lod`.
    ///
    /// A no-op when already resident at that LOD. Finer missing LODs are read
    /// from storage; when resident finer and `unload_higher` is set, the finer
    /// LODs are flushed and dropped. Unknown sections are generated when the
    /// terrain generator can produce them. Returns false when the section is
    /// not available or the trim has to wait for in-flight meshes.
    pub fn load_section(&mut self, x: i32, y: i32, target_lod: u32, unload_higher: bool) -> Result<bool> {
        let pos = IVec2::new(x, y);
        if target_lod >= self.params.lod_levels() {
            return Err(Error::SectionState {
                x,
                y,
                reason: format!("LOD {target_lod} out of range"),
            });
        }
        match self.store.section(pos).map(Section::loaded_lod) {
            Some(loaded) if loaded == target_lod => Ok(true),
            Some(loaded) if loaded > target_lod => Ok(self.load_finer_lods(pos, target_lod)),
            Some(_) if unload_higher => self.trim_section(pos, target_lod),
            Some(_) => Ok(true),
            None => self.load_stored_section(pos, target_lod),
        }
    }

    fn load_finer_lods(&mut self, pos: IVec2, target_lod: u32) -> bool {
        let Some(loaded) = self.store.section(pos).map(Section::loaded_lod) else {
            return false;
        };
        let decoded = match self.gateway.read_section(&self.params, pos, target_lod..loaded) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => {
                log::warn!("Section {pos} is resident at LOD {loaded} but has no stored payload");
                return false;
            }
            Err(e) => {
                log::warn!("Could not read LODs {target_lod}..{loaded} of section {pos}: {e}");
                return false;
            }
        };
        let Some(section) = self.store.section_mut(pos) else {
            return false;
        };
        for chunk in decoded.chunks {
            section.insert_chunk(chunk);
        }
        section.set_loaded_lod(target_lod);
        log::debug!("Section {pos} refined from LOD {loaded} to {target_lod}");
        true
    }

    fn load_stored_section(&mut self, pos: IVec2, target_lod: u32) -> Result<bool> {
        if !self.store.is_available(pos) {
            if !self.can_generate(pos) {
                return Ok(false);
            }
            self.generate_section(pos)?;
            if target_lod == 0 {
                return Ok(true);
            }
            return self.trim_section(pos, target_lod);
        }

        let decoded = match self.gateway.read_section(&self.params, pos, target_lod..self.params.lod_levels()) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => {
                log::warn!("Section {pos} is listed in the index but not stored");
                return Ok(false);
            }
            Err(e) => {
                log::warn!("Could not load section {pos}: {e}");
                return Ok(false);
            }
        };

        let mut section = Section::new(self.params, pos, decoded.min_chunk_z, decoded.max_chunk_z);
        for chunk in decoded.chunks {
            section.insert_chunk(chunk);
        }
        section.set_loaded_lod(target_lod);
        section.load_state = LoadState::Loaded;
        self.store.insert_section(section);
        log::debug!("Loaded section {pos} at LOD {target_lod}");
        Ok(true)
    }

    /// Drop LODs finer than `target_lod`, flushing edits first.
    fn trim_section(&mut self, pos: IVec2, target_lod: u32) -> Result<bool> {
        let Some(section) = self.store.section(pos) else {
            return Ok(false);
        };
        let mut queued = Vec::new();
        for lod in section.loaded_lod()..target_lod {
            for chunk in section.chunks(lod) {
                match chunk.mesh_state() {
                    MeshState::Idle => {}
                    MeshState::Pending => queued.push(chunk.key),
                    MeshState::InProgress | MeshState::InProgressWithChanges => {
                        log::debug!("Trim of section {pos} to LOD {target_lod} waits for {:?}", chunk.key);
                        return Ok(false);
                    }
                }
            }
        }
        for key in &queued {
            self.pipeline.cancel(&mut self.store, key);
        }

        if self.store.section(pos).is_some_and(|s| s.is_changed() && s.loaded_lod() == 0) {
            self.save_section(pos.x, pos.y)?;
        }

        let renderer = self.services.renderer.as_ref();
        let physics = self.services.physics.as_deref();
        let Some(section) = self.store.section_mut(pos) else {
            return Ok(false);
        };
        let from = section.loaded_lod();
        for mut chunk in section.trim_to(target_lod) {
            release_render_state(&mut chunk, renderer, physics);
        }
        log::debug!("Section {pos} trimmed from LOD {from} to {target_lod}");
        Ok(true)
    }

    /// Write a changed, fully LOD-0 resident section back to storage.
    ///
    /// Unchanged sections are left alone. On failure the section keeps its
    /// `Changed` state so a later save can retry.
    pub fn save_section(&mut self, x: i32, y: i32) -> Result<()> {
        let pos = IVec2::new(x, y);
        let Some(section) = self.store.section(pos) else {
            return Err(Error::SectionState {
                x,
                y,
                reason: "not resident".to_string(),
            });
        };
        if section.loaded_lod() != 0 {
            return Err(Error::SectionState {
                x,
                y,
                reason: format!("resident at LOD {}, only LOD-0 sections can be saved", section.loaded_lod()),
            });
        }
        if !section.is_changed() {
            return Ok(());
        }
        if let Err(e) = self.gateway.write_section(section) {
            log::warn!("Failed to save section {pos}: {e}");
            return Err(e);
        }
        if let Some(section) = self.store.section_mut(pos) {
            section.load_state = LoadState::Loaded;
        }
        if !self.store.is_available(pos) {
            self.store.set_available(pos, true);
            self.persist_index();
        }
        log::debug!("Saved section {pos}");
        Ok(())
    }

    /// Flush and free a section. Returns false while its meshes are pending.
    pub fn unload_section(&mut self, x: i32, y: i32) -> Result<bool> {
        let pos = IVec2::new(x, y);
        let Some(section) = self.store.section(pos) else {
            return Ok(true);
        };
        if section.pending_meshes() > 0 {
            return Ok(false);
        }
        if section.is_changed() {
            if section.loaded_lod() == 0 {
                self.save_section(x, y)?;
            } else {
                log::error!("Section {pos} is changed without LOD 0 resident; edits are lost");
            }
        }
        self.release_section(pos);
        log::debug!("Unloaded section {pos}");
        Ok(true)
    }

    /// Remove a section from memory and storage.
    pub fn delete_section(&mut self, x: i32, y: i32) -> Result<()> {
        let pos = IVec2::new(x, y);
        if self.store.section(pos).is_some_and(|s| s.pending_meshes() > 0) {
            return Err(Error::SectionState {
                x,
                y,
                reason: "meshes still pending".to_string(),
            });
        }
        self.release_section(pos);
        self.store.set_available(pos, false);
        if let Err(e) = self.gateway.remove_section(pos) {
            log::warn!("Could not remove stored section {pos}: {e}");
        }
        self.persist_index();
        log::debug!("Deleted section {pos}");
        Ok(())
    }

    fn release_section(&mut self, pos: IVec2) {
        let renderer = self.services.renderer.as_ref();
        let physics = self.services.physics.as_deref();
        if let Some(mut section) = self.store.remove_section(pos) {
            for mut chunk in section.drain_all() {
                release_render_state(&mut chunk, renderer, physics);
            }
        }
    }

    /// Create an empty, fully resident section covering layers `min_z..=max_z`.
    pub fn create_section(&mut self, x: i32, y: i32, min_z: i32, max_z: i32) -> &mut Section {
        let pos = IVec2::new(x, y);
        debug_assert!(!self.store.is_resident(pos), "section {pos} already resident");
        let mut section = Section::new(self.params, pos, min_z, max_z);
        section.set_loaded_lod(0);
        section.load_state = LoadState::Changed;
        self.store.set_available(pos, true);
        self.store.insert_section(section);
        self.persist_index();
        log::debug!("Created section {pos}");
        self.store.section_mut(pos).unwrap_or_else(|| unreachable!("section {pos} was just inserted"))
    }

    /// Write the world index. Failures are logged; memory stays authoritative.
    pub(crate) fn persist_index(&self) {
        let index = self.index_record();
        if let Err(e) = self.gateway.save_index(&index) {
            log::warn!("Failed to persist world index: {e}");
        }
    }

    pub(crate) fn index_record(&self) -> WorldIndexRecord {
        WorldIndexRecord {
            palette: self.services.palette.name().to_string(),
            chunk_size: self.params.chunk_size() as i32,
            section_size: self.params.section_size() as i32,
            lod_levels: self.params.lod_levels() as i32,
            rect: self.store.rect(),
            available: self.store.available_sections(),
        }
    }

    /// Section can become resident: it is stored or can be generated.
    pub fn can_load_section(&self, pos: IVec2) -> bool {
        self.store.is_resident(pos) || self.store.is_available(pos) || self.can_generate(pos)
    }

    /// Only sections never stored and outside the index rectangle of the
    /// opened world are generated; holes inside it stay void.
    pub(crate) fn can_generate(&self, pos: IVec2) -> bool {
        !self.store.is_available(pos)
            && !self.generated_rect.contains(pos)
            && self
                .services
                .generator
                .as_ref()
                .is_some_and(|g| g.can_generate_section(pos.x, pos.y))
    }

    fn generate_section(&mut self, pos: IVec2) -> Result<()> {
        let Some(generator) = self.services.generator.clone() else {
            return Err(Error::Generation { x: pos.x, y: pos.y });
        };
        let (min_z, max_z) = generator.z_range(pos.x, pos.y);
        let mut generated = GeneratedSection::new(self.params, pos, min_z, max_z);
        if !generator.generate_blocks(pos.x, pos.y, &mut generated) {
            log::warn!("Terrain generator failed for section {pos}");
            return Err(Error::Generation { x: pos.x, y: pos.y });
        }

        let section = generated.finish();
        self.store.set_available(pos, true);
        self.store.insert_section(section);
        self.persist_index();
        log::debug!("Generated section {pos}");
        Ok(())
    }
}
