// SPDX-License-Identifier: CEPL-1.0
//! The per-frame driver and the swapchain rebuild protocol.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::backend::{AcquireOutcome, BundleInfo, FrameBackend, PresentationHost, SwapchainBundle};
use crate::sync::FrameSyncSet;
use crate::{RenderError, RenderSize, FRAMES_IN_FLIGHT_LIMIT};

/// What one call to [`FrameLoop::render_frame`] ended up doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// Submitted and presented; the swapchain is still current.
    Presented,
    /// Submitted and presented, then the swapchain was rebuilt.
    PresentedAndRebuilt,
    /// Acquire found the swapchain stale; it was rebuilt and nothing was submitted.
    Rebuilt,
    /// The window asked to close while its drawable had zero area.
    Skipped,
}

/// Outcome of [`FrameLoop::rebuild_swapchain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt(BundleInfo),
    /// Host started closing before the drawable came back; the old bundle was kept.
    Abandoned,
}

pub struct FrameLoop<B: FrameBackend> {
    backend: B,
    sync: FrameSyncSet<B::Fence, B::Semaphore>,
    bundle: Option<B::Bundle>,
    current_frame: usize,
    resize_pending: bool,
    /// First bundle postponed because the window started out minimized.
    bundle_deferred: bool,
    frames_submitted: u64,
    rebuilds: u64,
}

impl<B: FrameBackend> FrameLoop<B> {
    /// Create the sync set and the first swapchain bundle.
    pub fn new<H>(mut backend: B, frames_in_flight: usize, host: &mut H) -> Result<Self>
    where
        H: PresentationHost + ?Sized,
    {
        if frames_in_flight == 0 || frames_in_flight > FRAMES_IN_FLIGHT_LIMIT {
            return Err(RenderError::InvalidFramesInFlight {
                requested: frames_in_flight,
                max: FRAMES_IN_FLIGHT_LIMIT,
            }
            .into());
        }

        let sync = FrameSyncSet::new(&mut backend, frames_in_flight)?;
        let mut frame_loop = Self {
            backend,
            sync,
            bundle: None,
            current_frame: 0,
            resize_pending: false,
            bundle_deferred: false,
            frames_submitted: 0,
            rebuilds: 0,
        };

        match Self::wait_for_drawable(host) {
            Some(size) => {
                let info = frame_loop.install_bundle(size)?;
                info!(
                    "swapchain ready ({}x{}, {} images, {} frames in flight)",
                    info.extent.width, info.extent.height, info.images, frames_in_flight
                );
            }
            None => {
                // Nothing to draw into yet; the first frame will retry.
                frame_loop.resize_pending = true;
                frame_loop.bundle_deferred = true;
            }
        }
        Ok(frame_loop)
    }

    #[inline]
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.sync.frames_in_flight()
    }

    #[inline]
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    #[inline]
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    #[inline]
    pub fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    pub fn bundle_info(&self) -> Option<BundleInfo> {
        self.bundle.as_ref().map(SwapchainBundle::info)
    }

    pub fn image_owner(&self, image: usize) -> Option<usize> {
        self.sync.image_owner(image)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Settings changed through here usually need a new swapchain; follow up
    /// with [`request_rebuild`](Self::request_rebuild).
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Rebuild the swapchain after the next present, same as a resize signal.
    pub fn request_rebuild(&mut self) {
        self.resize_pending = true;
    }

    /// Run one iteration: wait, acquire, submit, present, advance.
    pub fn render_frame<H>(&mut self, host: &mut H) -> Result<FrameStatus>
    where
        H: PresentationHost + ?Sized,
    {
        if self.bundle.is_none() {
            // A failed rebuild is final; only the deferred first build runs here.
            if !self.bundle_deferred {
                return Err(RenderError::NoBundle.into());
            }
            // Startup happened while minimized.
            return Ok(match self.rebuild_swapchain(host)? {
                RebuildOutcome::Rebuilt(_) => FrameStatus::Rebuilt,
                RebuildOutcome::Abandoned => FrameStatus::Skipped,
            });
        }
        let frame = self.current_frame;

        // 1) Bound the number of frames in flight.
        self.sync.wait_for_frame(&mut self.backend, frame)?;

        // 2) Acquire.
        let bundle = self.bundle.as_ref().ok_or(RenderError::NoBundle)?;
        let image = match self
            .backend
            .acquire(bundle, self.sync.image_available(frame))
            .context("acquire_next_image")?
        {
            // Suboptimal is tolerated here; present will report it again.
            AcquireOutcome::Ready { image, suboptimal } => {
                if suboptimal {
                    debug!("acquire: swapchain suboptimal, continuing");
                }
                image
            }
            AcquireOutcome::OutOfDate => {
                debug!("acquire: swapchain out of date, rebuilding");
                return Ok(match self.rebuild_swapchain(host)? {
                    RebuildOutcome::Rebuilt(_) => FrameStatus::Rebuilt,
                    RebuildOutcome::Abandoned => FrameStatus::Skipped,
                });
            }
        };
        let image_idx = image as usize;

        // 3) An older frame may still be reading this image's resources.
        if let Some(owner) = self.sync.wait_for_image_owner(&mut self.backend, image_idx)? {
            if owner != frame {
                debug!("image {image} still owned by frame slot {owner}, waited");
            }
        }

        // 4) This slot now guards the image.
        self.sync.record_image_owner(image_idx, frame)?;

        // 5) Per-frame data, strictly after the owner wait.
        let bundle = self.bundle.as_mut().ok_or(RenderError::NoBundle)?;
        self.backend
            .update_frame_data(bundle, image)
            .context("update per-frame data")?;

        // 6) Reset the fence right before the submit that will signal it.
        self.sync.reset_frame(&mut self.backend, frame)?;
        let bundle = self.bundle.as_ref().ok_or(RenderError::NoBundle)?;
        self.backend
            .submit(
                bundle,
                image,
                self.sync.image_available(frame),
                self.sync.render_finished(frame),
                self.sync.fence(frame),
            )
            .context("queue_submit")?;
        self.frames_submitted += 1;

        // 7) Present.
        let outcome = self
            .backend
            .present(bundle, image, self.sync.render_finished(frame))
            .context("queue_present")?;

        // 8) Advance; the submit above already happened.
        self.current_frame = (self.current_frame + 1) % self.sync.frames_in_flight();

        // 9) Stale surface or pending resize.
        if host.take_resize_signal() {
            self.resize_pending = true;
        }
        let mut status = FrameStatus::Presented;
        if outcome.is_stale() || self.resize_pending {
            debug!(
                "present: {:?}, resize_pending={}, rebuilding",
                outcome, self.resize_pending
            );
            if let RebuildOutcome::Rebuilt(_) = self.rebuild_swapchain(host)? {
                status = FrameStatus::PresentedAndRebuilt;
            }
        }
        Ok(status)
    }

    /// Tear down and recreate the whole swapchain bundle for the current
    /// drawable size.
    pub fn rebuild_swapchain<H>(&mut self, host: &mut H) -> Result<RebuildOutcome>
    where
        H: PresentationHost + ?Sized,
    {
        // 1) Zero-area drawable: keep pumping events until it comes back.
        let Some(size) = Self::wait_for_drawable(host) else {
            info!("window closing while minimized, swapchain rebuild abandoned");
            self.resize_pending = true;
            return Ok(RebuildOutcome::Abandoned);
        };

        // Past this point a failure is fatal, deferred or not.
        self.bundle_deferred = false;

        // 2) Nothing may be in use when the old bundle goes away.
        self.backend.wait_idle().context("device_wait_idle")?;

        // 3) Old bundle releases itself in reverse creation order.
        drop(self.bundle.take());

        // 4) Build the replacement.
        let info = self.install_bundle(size)?;
        self.resize_pending = false;
        // Signals queued before the rebuild describe the size just used.
        host.take_resize_signal();
        self.rebuilds += 1;
        info!(
            "swapchain rebuilt → {}x{} ({} images)",
            info.extent.width, info.extent.height, info.images
        );
        Ok(RebuildOutcome::Rebuilt(info))
    }

    fn wait_for_drawable<H>(host: &mut H) -> Option<RenderSize>
    where
        H: PresentationHost + ?Sized,
    {
        let mut size = host.drawable_size();
        if size.is_empty() {
            info!("drawable is {}x{}, waiting", size.width, size.height);
        }
        while size.is_empty() {
            if host.should_close() {
                return None;
            }
            host.wait_events();
            size = host.drawable_size();
        }
        Some(size)
    }

    fn install_bundle(&mut self, size: RenderSize) -> Result<BundleInfo> {
        let bundle = self
            .backend
            .create_bundle(size)
            .context("create swapchain bundle")?;
        let info = bundle.info();
        // An inconsistent bundle is dropped right here, never installed.
        info.validate()?;
        self.sync.resize_images(info.images);
        self.bundle = Some(bundle);
        Ok(info)
    }
}

impl<B: FrameBackend> Drop for FrameLoop<B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            warn!("device_wait_idle during teardown failed: {e:#}");
        }
        drop(self.bundle.take());
        self.sync.destroy(&mut self.backend);
    }
}
