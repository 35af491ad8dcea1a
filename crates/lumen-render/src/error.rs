// SPDX-License-Identifier: CEPL-1.0
use thiserror::Error;

/// Fatal conditions detected by the frame loop itself.
///
/// Backend failures (driver rejections, out of memory) travel as `anyhow::Error`
/// with call-site context; these variants cover broken invariants of the loop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("no swapchain bundle is alive (an earlier rebuild failed or never ran)")]
    NoBundle,

    #[error(
        "swapchain bundle is inconsistent: {images} images, {views} views, \
         {framebuffers} framebuffers, {command_buffers} command buffers, \
         {uniform_buffers} uniform buffers"
    )]
    BundleMismatch {
        images: usize,
        views: usize,
        framebuffers: usize,
        command_buffers: usize,
        uniform_buffers: usize,
    },

    #[error("swapchain image {index} is out of range (bundle has {count} images)")]
    ImageOutOfRange { index: usize, count: usize },

    #[error("frames in flight must be within 1..={max}, got {requested}")]
    InvalidFramesInFlight { requested: usize, max: usize },
}
