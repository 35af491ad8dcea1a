// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::Path;

use tracing::info;

use crate::AssetError;

/// Tightly packed RGBA8 pixels, top row first.
#[derive(Clone, Debug)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Texture {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let tex = Self::decode(&bytes, path)?;
        info!("loaded {} ({}x{})", path.display(), tex.width, tex.height);
        Ok(tex)
    }

    /// Decode an encoded image (PNG, JPEG) already in memory.
    pub fn from_encoded(bytes: &[u8]) -> Result<Self, AssetError> {
        Self::decode(bytes, Path::new("<memory>"))
    }

    fn decode(bytes: &[u8], origin: &Path) -> Result<Self, AssetError> {
        let img = image::load_from_memory(bytes).map_err(|source| AssetError::Image {
            path: origin.to_path_buf(),
            source,
        })?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self::from_rgba8(width, height, rgba.into_raw())
    }

    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, AssetError> {
        if width == 0 || height == 0 || pixels.len() != width as usize * height as usize * 4 {
            return Err(AssetError::BadTexture { width, height });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Light/dark grey checkerboard, `size` x `size` pixels in 8x8 cells.
    pub fn checkerboard(size: u32) -> Self {
        let size = size.max(1);
        let cell = (size / 8).max(1);
        let mut pixels = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let v = if (x / cell + y / cell) % 2 == 0 { 0xE0 } else { 0x40 };
                pixels.extend_from_slice(&[v, v, v, 0xFF]);
            }
        }
        Self {
            width: size,
            height: size,
            pixels,
        }
    }
}
