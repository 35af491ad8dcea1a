// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, info};

use crate::AssetError;

/// Interleaved vertex as the vertex shader sees it: location 0 position,
/// location 1 colour, location 2 texture coordinate.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], color: [f32; 3], uv: [f32; 2]) -> Self {
        Self { pos, color, uv }
    }

    /// Bit-exact identity, used to merge duplicate corners.
    fn key(&self) -> [u32; 8] {
        bytemuck::cast(*self)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

const WHITE: [f32; 3] = [1.0, 1.0, 1.0];

impl Mesh {
    /// Two stacked unit quads, at z = 0 and z = -0.5.
    pub fn textured_quads() -> Self {
        let corners = [
            ([-0.5, -0.5], [1.0, 0.0, 0.0], [0.0, 0.0]),
            ([0.5, -0.5], [0.0, 1.0, 0.0], [1.0, 0.0]),
            ([0.5, 0.5], [0.0, 0.0, 1.0], [1.0, 1.0]),
            ([-0.5, 0.5], [1.0, 1.0, 1.0], [0.0, 1.0]),
        ];
        let mut vertices = Vec::with_capacity(8);
        for z in [0.0, -0.5] {
            for ([x, y], color, uv) in corners {
                vertices.push(Vertex::new([x, y, z], color, uv));
            }
        }
        let indices = vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4];
        Self { vertices, indices }
    }

    /// Load a Wavefront OBJ, triangulated, with duplicate corners merged.
    pub fn load_obj(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mesh = Self::read_obj(&mut BufReader::new(file), path)?;
        info!(
            "loaded {} ({} vertices, {} indices)",
            path.display(),
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(mesh)
    }

    /// Parse OBJ text. `origin` only labels errors. Materials are ignored;
    /// every vertex is white.
    pub fn read_obj<R: BufRead>(reader: &mut R, origin: &Path) -> Result<Self, AssetError> {
        let options = tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        };
        let (models, _) = tobj::load_obj_buf(reader, &options, |_| Ok(Default::default()))
            .map_err(|source| AssetError::Obj {
                path: origin.to_path_buf(),
                source,
            })?;

        let mut mesh = Mesh::default();
        let mut unique: HashMap<[u32; 8], u32> = HashMap::new();
        for model in &models {
            let m = &model.mesh;
            for &index in &m.indices {
                let i = index as usize;
                let pos = [m.positions[3 * i], m.positions[3 * i + 1], m.positions[3 * i + 2]];
                // OBJ puts v = 0 at the bottom; images start at the top row.
                let uv = if m.texcoords.len() >= 2 * i + 2 {
                    [m.texcoords[2 * i], 1.0 - m.texcoords[2 * i + 1]]
                } else {
                    [0.0, 0.0]
                };
                let vertex = Vertex::new(pos, WHITE, uv);

                let next = mesh.vertices.len() as u32;
                let slot = *unique.entry(vertex.key()).or_insert(next);
                if slot == next {
                    mesh.vertices.push(vertex);
                }
                mesh.indices.push(slot);
            }
        }

        if mesh.indices.is_empty() {
            return Err(AssetError::EmptyMesh {
                path: origin.to_path_buf(),
            });
        }
        debug!(
            "{}: {} models, {} unique vertices",
            origin.display(),
            models.len(),
            mesh.vertices.len()
        );
        Ok(mesh)
    }

    /// Size in bytes of the vertex data, for buffer allocation.
    pub fn vertex_bytes(&self) -> usize {
        std::mem::size_of_val(self.vertices.as_slice())
    }

    pub fn index_bytes(&self) -> usize {
        std::mem::size_of_val(self.indices.as_slice())
    }
}
