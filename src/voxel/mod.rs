//! Voxel storage, world state and block operations

pub mod block;
pub mod chunk;
pub mod coords;
pub mod lighting;
pub mod raycast;
pub mod section;
pub mod store;
pub mod world;

pub use block::{BlockInfo, BlockPalette, AIR, MAX_LIGHT};
pub use chunk::{Cell, Chunk, ChunkData, MeshEvent, MeshState};
pub use coords::{BlockLocation, ChunkKey, WorldParams};
pub use raycast::RayHit;
pub use section::{LoadState, Section};
pub use store::{SectionRect, SectionStore};
pub use world::{ObserverId, TickStats, World, WorldServices};
