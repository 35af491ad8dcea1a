// SPDX-License-Identifier: CEPL-1.0
//! Rotating per-frame sync primitives plus the per-image owner table.
//!
//! Slot `i` owns `{image_available[i], render_finished[i], in_flight[i]}`.
//! `image_owners[img]` remembers which slot last submitted work for swapchain
//! image `img`, so a later frame that gets the same image back can wait for that
//! exact submission instead of just "some" older frame.

use anyhow::{Context, Result};
use tracing::debug;

use crate::backend::FrameBackend;
use crate::RenderError;

pub struct FrameSyncSet<F, S> {
    image_available: Vec<S>,
    render_finished: Vec<S>,
    in_flight: Vec<F>,
    image_owners: Vec<Option<usize>>,
}

impl<F: Copy, S: Copy> FrameSyncSet<F, S> {
    /// Create `frames` slots. Fences start signaled so the first wait on each
    /// slot returns immediately. The owner table starts empty; size it with
    /// [`resize_images`](Self::resize_images) once the swapchain exists.
    pub fn new<B>(backend: &mut B, frames: usize) -> Result<Self>
    where
        B: FrameBackend<Fence = F, Semaphore = S>,
    {
        let mut set = Self {
            image_available: Vec::with_capacity(frames),
            render_finished: Vec::with_capacity(frames),
            in_flight: Vec::with_capacity(frames),
            image_owners: Vec::new(),
        };

        // Release whatever was created if a later slot fails.
        if let Err(e) = set.populate(backend, frames) {
            set.destroy(backend);
            return Err(e);
        }
        debug!("frame sync set ready ({frames} slots)");
        Ok(set)
    }

    fn populate<B>(&mut self, backend: &mut B, frames: usize) -> Result<()>
    where
        B: FrameBackend<Fence = F, Semaphore = S>,
    {
        for slot in 0..frames {
            self.image_available.push(
                backend
                    .create_semaphore()
                    .with_context(|| format!("create image-available semaphore {slot}"))?,
            );
            self.render_finished.push(
                backend
                    .create_semaphore()
                    .with_context(|| format!("create render-finished semaphore {slot}"))?,
            );
            self.in_flight.push(
                backend
                    .create_fence(true)
                    .with_context(|| format!("create in-flight fence {slot}"))?,
            );
        }
        Ok(())
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    #[inline]
    pub fn image_available(&self, frame: usize) -> S {
        self.image_available[frame]
    }

    #[inline]
    pub fn render_finished(&self, frame: usize) -> S {
        self.render_finished[frame]
    }

    #[inline]
    pub fn fence(&self, frame: usize) -> F {
        self.in_flight[frame]
    }

    pub fn wait_for_frame<B>(&self, backend: &mut B, frame: usize) -> Result<()>
    where
        B: FrameBackend<Fence = F, Semaphore = S>,
    {
        backend
            .wait_fence(self.in_flight[frame])
            .with_context(|| format!("wait_for_fences(in-flight {frame})"))
    }

    pub fn reset_frame<B>(&self, backend: &mut B, frame: usize) -> Result<()>
    where
        B: FrameBackend<Fence = F, Semaphore = S>,
    {
        backend
            .reset_fence(self.in_flight[frame])
            .with_context(|| format!("reset_fences(in-flight {frame})"))
    }

    /// Slot whose fence currently guards `image`, if any.
    pub fn image_owner(&self, image: usize) -> Option<usize> {
        self.image_owners.get(image).copied().flatten()
    }

    pub fn image_count(&self) -> usize {
        self.image_owners.len()
    }

    pub fn record_image_owner(&mut self, image: usize, frame: usize) -> Result<(), RenderError> {
        let count = self.image_owners.len();
        let slot = self
            .image_owners
            .get_mut(image)
            .ok_or(RenderError::ImageOutOfRange { index: image, count })?;
        *slot = Some(frame);
        Ok(())
    }

    /// Block on the fence of the slot that last used `image`. Returns the slot
    /// waited on, or `None` when the image had no owner.
    pub fn wait_for_image_owner<B>(&self, backend: &mut B, image: usize) -> Result<Option<usize>>
    where
        B: FrameBackend<Fence = F, Semaphore = S>,
    {
        let count = self.image_owners.len();
        let owner = *self
            .image_owners
            .get(image)
            .ok_or(RenderError::ImageOutOfRange { index: image, count })?;

        if let Some(frame) = owner {
            backend
                .wait_fence(self.in_flight[frame])
                .with_context(|| format!("wait_for_fences(owner of image {image})"))?;
        }
        Ok(owner)
    }

    /// Forget every owner and size the table for a new swapchain. Only valid
    /// after the device went idle, since it drops the record of pending work.
    pub fn resize_images(&mut self, images: usize) {
        self.image_owners.clear();
        self.image_owners.resize(images, None);
    }

    /// Destroy all primitives. Safe to call more than once.
    pub fn destroy<B>(&mut self, backend: &mut B)
    where
        B: FrameBackend<Fence = F, Semaphore = S>,
    {
        for fence in self.in_flight.drain(..) {
            backend.destroy_fence(fence);
        }
        for sem in self.render_finished.drain(..) {
            backend.destroy_semaphore(sem);
        }
        for sem in self.image_available.drain(..) {
            backend.destroy_semaphore(sem);
        }
        self.image_owners.clear();
    }
}
