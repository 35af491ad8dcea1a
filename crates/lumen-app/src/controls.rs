// SPDX-License-Identifier: CEPL-1.0
//! Runtime toggles: keys and the unfocused-vsync policy.
//!
//! `v` toggles vsync, `m` switches FIFO/mailbox, `c` cycles the clear colour,
//! `r` forces a swapchain rebuild.

use lumen_render::Renderer;
use lumen_render_vk::{VkRenderer, VkVsyncMode};
use tracing::info;

use crate::config::{RenderCfg, UnfocusedPolicy};

const CLEAR_PALETTE: [[f32; 4]; 3] = [
    [0.02, 0.02, 0.04, 1.0],
    [0.25, 0.25, 0.28, 1.0],
    [0.9, 0.9, 0.92, 1.0],
];

/// One setting change to hand to the renderer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Change {
    Vsync(bool),
    VsyncMode(VkVsyncMode),
    ClearColor([f32; 4]),
    Rebuild,
}

pub struct Controls {
    vsync: bool,
    vsync_mode: VkVsyncMode,
    /// Configured colour first, then the palette.
    clear_colors: Vec<[f32; 4]>,
    clear_idx: usize,
    unfocused: UnfocusedPolicy,
    focused: bool,
}

impl Controls {
    pub fn new(cfg: &RenderCfg) -> Self {
        let mut clear_colors = vec![cfg.clear_color];
        clear_colors.extend(CLEAR_PALETTE.iter().filter(|c| **c != cfg.clear_color));
        Self {
            vsync: cfg.vsync,
            vsync_mode: cfg.vsync_mode.into(),
            clear_colors,
            clear_idx: 0,
            unfocused: cfg.unfocused,
            focused: true,
        }
    }

    /// Vsync settings are held back while the focus policy overrides them.
    fn overridden(&self) -> bool {
        !self.focused && self.unfocused == UnfocusedPolicy::VsyncOn
    }

    pub fn on_key(&mut self, key: char) -> Vec<Change> {
        match key {
            'v' => {
                self.vsync = !self.vsync;
                info!("vsync -> {}", self.vsync);
                if self.overridden() {
                    return Vec::new();
                }
                vec![Change::Vsync(self.vsync)]
            }
            'm' => {
                self.vsync_mode = match self.vsync_mode {
                    VkVsyncMode::Fifo => VkVsyncMode::Mailbox,
                    VkVsyncMode::Mailbox => VkVsyncMode::Fifo,
                };
                info!("vsync mode -> {:?}", self.vsync_mode);
                if self.overridden() {
                    return Vec::new();
                }
                vec![Change::VsyncMode(self.vsync_mode)]
            }
            'c' => {
                self.clear_idx = (self.clear_idx + 1) % self.clear_colors.len();
                vec![Change::ClearColor(self.clear_colors[self.clear_idx])]
            }
            'r' => vec![Change::Rebuild],
            _ => Vec::new(),
        }
    }

    pub fn on_focus(&mut self, focused: bool) -> Vec<Change> {
        if focused == self.focused {
            return Vec::new();
        }
        self.focused = focused;
        if self.unfocused != UnfocusedPolicy::VsyncOn {
            return Vec::new();
        }
        if focused {
            vec![Change::Vsync(self.vsync), Change::VsyncMode(self.vsync_mode)]
        } else {
            vec![Change::Vsync(true), Change::VsyncMode(VkVsyncMode::Fifo)]
        }
    }
}

pub fn apply(renderer: &mut VkRenderer, change: Change) {
    match change {
        Change::Vsync(on) => renderer.set_vsync(on),
        Change::VsyncMode(mode) => renderer.set_vsync_mode(mode),
        Change::ClearColor(rgba) => renderer.set_clear_color(rgba),
        Change::Rebuild => renderer.request_rebuild(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VsyncMode;

    fn controls(unfocused: UnfocusedPolicy) -> Controls {
        Controls::new(&RenderCfg {
            vsync: false,
            vsync_mode: VsyncMode::Mailbox,
            unfocused,
            ..RenderCfg::default()
        })
    }

    #[test]
    fn keys_toggle_settings() {
        let mut c = controls(UnfocusedPolicy::VsyncOn);
        assert_eq!(c.on_key('v'), vec![Change::Vsync(true)]);
        assert_eq!(c.on_key('v'), vec![Change::Vsync(false)]);
        assert_eq!(c.on_key('m'), vec![Change::VsyncMode(VkVsyncMode::Fifo)]);
        assert_eq!(c.on_key('r'), vec![Change::Rebuild]);
        assert!(c.on_key('x').is_empty());
    }

    #[test]
    fn clear_colour_cycles_back_to_the_configured_one() {
        let mut c = controls(UnfocusedPolicy::None);
        let start = RenderCfg::default().clear_color;
        let mut seen = Vec::new();
        for _ in 0..4 {
            let changes = c.on_key('c');
            let [Change::ClearColor(rgba)] = changes[..] else {
                panic!("{changes:?}");
            };
            seen.push(rgba);
        }
        assert_eq!(seen.last(), Some(&start));
        assert_ne!(seen[0], start);
    }

    #[test]
    fn losing_focus_forces_fifo_and_regaining_restores() {
        let mut c = controls(UnfocusedPolicy::VsyncOn);
        assert_eq!(
            c.on_focus(false),
            vec![Change::Vsync(true), Change::VsyncMode(VkVsyncMode::Fifo)]
        );
        // Remembered but held back while unfocused.
        assert!(c.on_key('m').is_empty());
        assert!(c.on_focus(false).is_empty());
        assert_eq!(
            c.on_focus(true),
            vec![Change::Vsync(false), Change::VsyncMode(VkVsyncMode::Fifo)]
        );
    }

    #[test]
    fn no_policy_ignores_focus() {
        let mut c = controls(UnfocusedPolicy::None);
        assert!(c.on_focus(false).is_empty());
        assert_eq!(c.on_key('v'), vec![Change::Vsync(true)]);
        assert!(c.on_focus(true).is_empty());
    }
}
