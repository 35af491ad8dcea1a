// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic frame lifecycle: frames in flight, image ownership, and
//! the swapchain rebuild protocol.
use anyhow::Result;

pub mod backend;
mod error;
pub mod frame_loop;
pub mod sync;

pub use backend::{
    AcquireOutcome, BundleInfo, FrameBackend, PresentOutcome, PresentationHost, SwapchainBundle,
};
pub use error::RenderError;
pub use frame_loop::{FrameLoop, FrameStatus, RebuildOutcome};
pub use sync::FrameSyncSet;

/// Default number of frames the CPU may run ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Upper bound accepted for a configured frames-in-flight count.
pub const FRAMES_IN_FLIGHT_LIMIT: usize = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Zero area, e.g. a minimized window.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

pub trait Renderer {
    /// Draw one frame. Surface staleness is handled internally.
    fn render(&mut self, host: &mut dyn PresentationHost) -> Result<FrameStatus>;

    /// Rebuild the swapchain at the next opportunity.
    fn request_rebuild(&mut self);

    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync(&mut self, _on: bool) {}
}
