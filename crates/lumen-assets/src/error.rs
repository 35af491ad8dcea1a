// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing OBJ {path}: {source}")]
    Obj {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },

    #[error("decoding image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{path} contains no triangles")]
    EmptyMesh { path: PathBuf },

    #[error("texture data does not describe a {width}x{height} RGBA8 image")]
    BadTexture { width: u32, height: u32 },
}
