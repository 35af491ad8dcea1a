// SPDX-License-Identifier: CEPL-1.0
//! CPU-side scene inputs: the vertex layout, meshes and RGBA8 textures.
//!
//! Everything here is loaded once before rendering starts and handed to the
//! backend for upload; nothing in this crate talks to the GPU.

mod error;
mod mesh;
mod texture;

pub use error::AssetError;
pub use mesh::{Mesh, Vertex};
pub use texture::Texture;
