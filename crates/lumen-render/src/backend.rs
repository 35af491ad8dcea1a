// SPDX-License-Identifier: CEPL-1.0
//! Seams between the frame loop and the things it drives.
//!
//! The loop only ever talks to the GPU through [`FrameBackend`] and to the
//! window through [`PresentationHost`]. Everything is a blocking call; the
//! asynchrony lives in the driver and shows up here only as fences to wait on.

use anyhow::Result;

use crate::{RenderError, RenderSize};

/// Result of asking the swapchain for the next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image is ready once the acquire semaphore signals. `suboptimal` means the
    /// surface still works but no longer matches the swapchain exactly.
    Ready { image: u32, suboptimal: bool },
    /// Surface no longer matches; nothing was acquired.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn is_stale(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// Shape of a live swapchain bundle, reported back to the loop after creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BundleInfo {
    pub extent: RenderSize,
    /// Backend-specific raw format code (for Vulkan, `vk::Format::as_raw`).
    pub format: i32,
    pub images: usize,
    pub views: usize,
    pub framebuffers: usize,
    pub command_buffers: usize,
    pub uniform_buffers: usize,
}

impl BundleInfo {
    /// Every per-image array must line up with the swapchain image list.
    pub fn validate(&self) -> Result<(), RenderError> {
        let n = self.images;
        if self.views != n
            || self.framebuffers != n
            || self.command_buffers != n
            || self.uniform_buffers != n
        {
            return Err(RenderError::BundleMismatch {
                images: self.images,
                views: self.views,
                framebuffers: self.framebuffers,
                command_buffers: self.command_buffers,
                uniform_buffers: self.uniform_buffers,
            });
        }
        Ok(())
    }
}

/// Everything derived from one swapchain. Either fully alive or dropped as a
/// whole; dropping it releases its GPU objects in reverse creation order.
pub trait SwapchainBundle {
    fn info(&self) -> BundleInfo;
}

/// GPU-side capabilities the frame loop needs.
pub trait FrameBackend {
    type Fence: Copy + std::fmt::Debug;
    type Semaphore: Copy + std::fmt::Debug;
    type Bundle: SwapchainBundle;

    fn create_fence(&mut self, signaled: bool) -> Result<Self::Fence>;
    fn create_semaphore(&mut self) -> Result<Self::Semaphore>;
    fn destroy_fence(&mut self, fence: Self::Fence);
    fn destroy_semaphore(&mut self, semaphore: Self::Semaphore);

    /// Block until the fence is signaled. No timeout.
    fn wait_fence(&mut self, fence: Self::Fence) -> Result<()>;
    fn reset_fence(&mut self, fence: Self::Fence) -> Result<()>;
    /// Block until every submitted piece of GPU work has finished.
    fn wait_idle(&mut self) -> Result<()>;

    /// Build a complete bundle for the given drawable size.
    fn create_bundle(&mut self, size: RenderSize) -> Result<Self::Bundle>;

    fn acquire(&mut self, bundle: &Self::Bundle, signal: Self::Semaphore)
        -> Result<AcquireOutcome>;

    /// Write per-frame data (uniforms) for `image`. Only called once the GPU is
    /// known to be done with that image's previous frame.
    fn update_frame_data(&mut self, bundle: &mut Self::Bundle, image: u32) -> Result<()>;

    /// Submit the command buffer of `image`: wait on `wait` at color-attachment
    /// output, signal `signal` and `fence` on completion.
    fn submit(
        &mut self,
        bundle: &Self::Bundle,
        image: u32,
        wait: Self::Semaphore,
        signal: Self::Semaphore,
        fence: Self::Fence,
    ) -> Result<()>;

    fn present(
        &mut self,
        bundle: &Self::Bundle,
        image: u32,
        wait: Self::Semaphore,
    ) -> Result<PresentOutcome>;
}

/// What the frame loop needs from the window system.
pub trait PresentationHost {
    /// Process pending platform events without blocking.
    fn poll_events(&mut self);

    /// Process platform events, allowed to block for a while. Used while the
    /// drawable has zero area.
    fn wait_events(&mut self) {
        self.poll_events();
    }

    fn should_close(&self) -> bool;

    /// Current drawable size in pixels; zero while minimized.
    fn drawable_size(&self) -> RenderSize;

    /// Returns `true` once per resize notification received since the last call.
    fn take_resize_signal(&mut self) -> bool;
}
