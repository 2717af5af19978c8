//! vxworld - a streamed voxel world
//!
//! The world is split into square sections of chunk columns. Sections are
//! loaded, generated and saved around registered observers at a level of
//! detail chosen by distance; chunks are meshed on worker threads and
//! handed to a [`render::Renderer`]. Block light is flood-filled on edit.

pub mod core;
pub mod math;
pub mod voxel;
pub mod streaming;
pub mod meshing;
pub mod terrain;
pub mod render;
pub mod physics;

#[cfg(test)]
pub(crate) mod testing;
