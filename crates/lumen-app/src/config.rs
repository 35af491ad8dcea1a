// SPDX-License-Identifier: CEPL-1.0
//! `lumen.toml`. Every field is optional.

use std::fs;
use std::path::{Path, PathBuf};

use lumen_render::MAX_FRAMES_IN_FLIGHT;
use lumen_render_vk::VkVsyncMode;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
    #[serde(default)]
    pub assets: AssetsCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "lumen".to_owned(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default = "default_vsync")]
    pub vsync: bool,
    #[serde(default)]
    pub vsync_mode: VsyncMode,
    /// What happens to vsync while the window is in the background.
    #[serde(default)]
    pub unfocused: UnfocusedPolicy,
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,
    /// Degrees per second.
    #[serde(default = "default_rotation_speed")]
    pub rotation_speed: f32,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            vsync: default_vsync(),
            vsync_mode: VsyncMode::default(),
            unfocused: UnfocusedPolicy::default(),
            frames_in_flight: default_frames_in_flight(),
            rotation_speed: default_rotation_speed(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnfocusedPolicy {
    /// Keep the focused settings.
    None,
    /// Force FIFO vsync until focus returns.
    #[default]
    VsyncOn,
}

impl From<VsyncMode> for VkVsyncMode {
    fn from(mode: VsyncMode) -> Self {
        match mode {
            VsyncMode::Fifo => VkVsyncMode::Fifo,
            VsyncMode::Mailbox => VkVsyncMode::Mailbox,
        }
    }
}

/// Unset entries fall back to the built-in quads, checkerboard and shaders.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AssetsCfg {
    pub model: Option<PathBuf>,
    pub texture: Option<PathBuf>,
    pub shader_dir: Option<PathBuf>,
}

fn default_clear() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}
fn default_vsync() -> bool {
    true
}
fn default_frames_in_flight() -> usize {
    MAX_FRAMES_IN_FLIGHT
}
fn default_rotation_speed() -> f32 {
    90.0
}

/// Missing file means defaults; an unparsable one is reported and ignored.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => toml::from_str::<AppCfg>(&s).unwrap_or_else(|e| {
            warn!("config: ignoring {}: {e}", path.display());
            AppCfg::default()
        }),
        Err(e) => {
            debug!("config: {} not read ({e}), using defaults", path.display());
            AppCfg::default()
        }
    }
}
