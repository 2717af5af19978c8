//! Keyed byte-stream stores
//!
//! A store maps entry names to byte streams. Writes are atomic: a writer
//! returned by [`KeyedStore::open_write`] only replaces the entry when it is
//! committed, and dropping it discards everything written.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;

/// A pending write; dropped without [`commit`](StoreWriter::commit) it is discarded.
pub trait StoreWriter: Write {
    fn commit(self: Box<Self>) -> io::Result<()>;
}

/// Abstract keyed byte-stream store
pub trait KeyedStore: Send + Sync {
    fn open_read(&self, name: &str) -> io::Result<Box<dyn Read + '_>>;

    fn open_write(&self, name: &str) -> io::Result<Box<dyn StoreWriter + '_>>;

    /// Remove an entry; removing a missing entry is not an error.
    fn remove(&self, name: &str) -> io::Result<()>;

    fn exists(&self, name: &str) -> bool;

    /// Read a whole entry, `None` if it does not exist.
    fn read_all(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        let mut reader = match self.open_read(name) {
            Ok(reader) => reader,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }

    /// Atomically replace an entry with `bytes`.
    fn write_all(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.open_write(name)?;
        writer.write_all(bytes)?;
        writer.commit()
    }
}

/// Store backed by one directory, one file per entry
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open (creating if needed) a directory store.
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> io::Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid entry name '{name}'"),
            ));
        }
        Ok(self.root.join(name))
    }
}

struct DirWriter {
    file: BufWriter<NamedTempFile>,
    target: PathBuf,
}

impl Write for DirWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl StoreWriter for DirWriter {
    fn commit(self: Box<Self>) -> io::Result<()> {
        let DirWriter { file, target } = *self;
        let temp = file.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;
        temp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    }
}

impl KeyedStore for DirStore {
    fn open_read(&self, name: &str) -> io::Result<Box<dyn Read + '_>> {
        let file = File::open(self.path(name)?)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn open_write(&self, name: &str) -> io::Result<Box<dyn StoreWriter + '_>> {
        let target = self.path(name)?;
        let temp = NamedTempFile::new_in(&self.root)?;
        Ok(Box::new(DirWriter {
            file: BufWriter::new(temp),
            target,
        }))
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        match std::fs::remove_file(self.path(name)?) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).map(|p| p.is_file()).unwrap_or(false)
    }
}

/// In-memory store; clones share the same entries
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory store lock poisoned"))
    }

    /// Entry names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().map(|m| m.keys().cloned().collect()).unwrap_or_default();
        names.sort();
        names
    }

    /// Overwrite raw entry bytes (for corruption tests and tools)
    pub fn put(&self, name: &str, bytes: Vec<u8>) {
        if let Ok(mut entries) = self.lock() {
            entries.insert(name.to_string(), bytes);
        }
    }
}

struct MemoryWriter {
    store: MemoryStore,
    name: String,
    buffer: Vec<u8>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StoreWriter for MemoryWriter {
    fn commit(self: Box<Self>) -> io::Result<()> {
        let MemoryWriter { store, name, buffer } = *self;
        store.lock()?.insert(name, buffer);
        Ok(())
    }
}

impl KeyedStore for MemoryStore {
    fn open_read(&self, name: &str) -> io::Result<Box<dyn Read + '_>> {
        match self.lock()?.get(name) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            None => Err(io::Error::new(io::ErrorKind::NotFound, format!("no entry '{name}'"))),
        }
    }

    fn open_write(&self, name: &str) -> io::Result<Box<dyn StoreWriter + '_>> {
        Ok(Box::new(MemoryWriter {
            store: self.clone(),
            name: name.to_string(),
            buffer: Vec::new(),
        }))
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        self.lock()?.remove(name);
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.lock().map(|m| m.contains_key(name)).unwrap_or(false)
    }
}
