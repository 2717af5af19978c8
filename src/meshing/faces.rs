//! Culled-face mesher
//!
//! Emits one quad per solid cell face that touches air. Positions are
//! chunk-local in LOD-0 block units, so a LOD-k cell spans `2^k` blocks.

use std::collections::BTreeMap;

use glam::Vec3;

use crate::core::types::IVec3;
use crate::voxel::block::{block_type, AIR};
use crate::voxel::coords::FACE_DIRECTIONS;

use super::snapshot::{plane_axes, ChunkSnapshot};
use super::{MeshBatch, MeshBuilder, MeshData, MeshVertex};

/// Pack face index (3 bits), light (4 bits) and material (12 bits).
pub fn pack_vertex_attributes(face: usize, light: u8, material: u16) -> u32 {
    (face as u32 & 0x7) | ((light as u32 & 0xF) << 3) | ((material as u32 & 0xFFF) << 8)
}

/// Builds geometry for every face between a solid cell and air.
///
/// Faces against unknown neighbours (sections not resident at the chunk's
/// LOD) are emitted so chunk edges stay closed.
#[derive(Clone, Copy, Debug, Default)]
pub struct FaceMesher;

struct Face {
    corner: Vec3,
    face: usize,
    light: u8,
}

impl FaceMesher {
    fn push_face(mesh: &mut MeshData, face: &Face, scale: f32, material: u16) {
        let direction = FACE_DIRECTIONS[face.face];
        let (normal, u_axis, v_axis) = plane_axes(direction);

        let mut base = face.corner;
        if direction[normal] > 0 {
            base[normal] += scale;
        }
        let mut du = Vec3::ZERO;
        du[u_axis] = scale;
        let mut dv = Vec3::ZERO;
        dv[v_axis] = scale;

        let packed = pack_vertex_attributes(face.face, face.light, material);
        let first = mesh.vertices.len() as u32;
        for corner in [base, base + du, base + du + dv, base + dv] {
            mesh.vertices.push(MeshVertex {
                position: corner.to_array(),
                packed,
            });
        }

        // u x v points along +normal; flip winding for faces looking the other way
        let counter_clockwise = du.cross(dv)[normal] * direction[normal] as f32 > 0.0;
        let quad = if counter_clockwise {
            [0, 1, 2, 0, 2, 3]
        } else {
            [0, 2, 1, 0, 3, 2]
        };
        mesh.indices.extend(quad.iter().map(|i| first + i));
    }
}

impl MeshBuilder for FaceMesher {
    fn build(&self, snapshot: &ChunkSnapshot) -> MeshData {
        if snapshot.data.is_air() {
            return MeshData::default();
        }
        let cs = snapshot.chunk_size() as i32;
        let scale = (1u32 << snapshot.key.lod) as f32;

        // Faces grouped by material so each batch is one contiguous index run
        let mut faces: BTreeMap<u16, Vec<Face>> = BTreeMap::new();
        for z in 0..cs {
            for y in 0..cs {
                for x in 0..cs {
                    let local = IVec3::new(x, y, z);
                    let material = block_type(snapshot.data.block(local));
                    if material == AIR {
                        continue;
                    }
                    for (face, direction) in FACE_DIRECTIONS.iter().enumerate() {
                        let next = local + *direction;
                        let exposed = snapshot
                            .block(next)
                            .is_none_or(|value| block_type(value) == AIR);
                        if exposed {
                            faces.entry(material).or_default().push(Face {
                                corner: local.as_vec3() * scale,
                                face,
                                light: snapshot.light(next).unwrap_or(0),
                            });
                        }
                    }
                }
            }
        }

        let mut mesh = MeshData::default();
        for (material, group) in faces {
            let first_index = mesh.indices.len() as u32;
            for face in &group {
                Self::push_face(&mut mesh, face, scale, material);
            }
            mesh.batches.push(MeshBatch {
                material,
                first_index,
                index_count: mesh.indices.len() as u32 - first_index,
            });
        }
        mesh
    }
}
