//! Section persistence and distance-driven streaming

pub mod disk_io;
pub mod gateway;
pub mod lod;
pub mod priority;
pub mod scheduler;

pub use disk_io::{DirStore, KeyedStore, MemoryStore, StoreWriter};
pub use gateway::{PersistenceGateway, WorldIndexRecord};
pub use lod::LodThresholds;
pub use priority::{select_loads, SectionCandidate};
pub use scheduler::StreamOutcome;
