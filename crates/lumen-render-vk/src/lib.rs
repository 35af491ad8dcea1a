// SPDX-License-Identifier: CEPL-1.0
//! Vulkan renderer: one textured mesh, rotating, drawn through the
//! [`FrameLoop`] from `lumen-render`.

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use lumen_assets::{Mesh, Texture};
use lumen_render::{
    FrameLoop, FrameStatus, PresentationHost, Renderer, MAX_FRAMES_IN_FLIGHT,
};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::info;

mod backend;
mod context;
mod memory;
mod pipeline;
mod scene;
mod swapchain;

pub use backend::VkBackend;
pub use pipeline::ShaderBlobs;
pub use swapchain::VkBundle;

use context::GpuContext;
use scene::SceneResources;
use swapchain::SwapchainSettings;

/// Which present mode to use when vsync is on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VkVsyncMode {
    /// Strict vsync, always available.
    #[default]
    Fifo,
    /// Low-latency vsync; falls back to FIFO if unsupported.
    Mailbox,
}

/// Uniform block at set 0, binding 0. Column-major, std140-compatible.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Transforms {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

/// Transforms for a frame `elapsed_secs` after start.
///
/// The model spins around +Z, the camera sits at (2, 2, 2) looking at the
/// origin, and the projection has its Y axis flipped for Vulkan clip space.
pub fn frame_transforms(elapsed_secs: f32, rotation_deg_per_sec: f32, aspect: f32) -> Transforms {
    let model = Mat4::from_rotation_z((elapsed_secs * rotation_deg_per_sec).to_radians());
    let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);
    let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
    proj.y_axis.y *= -1.0;
    Transforms {
        model: model.to_cols_array_2d(),
        view: view.to_cols_array_2d(),
        proj: proj.to_cols_array_2d(),
    }
}

#[derive(Clone, Debug)]
pub struct RendererOptions {
    pub vsync: bool,
    pub vsync_mode: VkVsyncMode,
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    /// Degrees per second.
    pub rotation_speed: f32,
    pub shaders: ShaderBlobs,
}

impl RendererOptions {
    /// Defaults with the shaders compiled into the crate.
    pub fn with_built_in_shaders() -> Result<Self> {
        Ok(Self {
            vsync: true,
            vsync_mode: VkVsyncMode::Fifo,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            rotation_speed: 90.0,
            shaders: ShaderBlobs::built_in()?,
        })
    }
}

pub struct VkRenderer {
    frame_loop: FrameLoop<VkBackend>,
}

impl VkRenderer {
    /// Bring up the device, upload the scene and build the first swapchain.
    ///
    /// # Safety
    /// `display` and `window` must describe a live window that outlives the
    /// returned renderer.
    pub unsafe fn new(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        host: &mut dyn PresentationHost,
        mesh: &Mesh,
        texture: &Texture,
        options: RendererOptions,
    ) -> Result<Self> {
        let ctx = GpuContext::new(display, window).context("vulkan device")?;
        let scene = SceneResources::create(&ctx, mesh, texture).context("scene upload")?;
        let settings = SwapchainSettings {
            vsync: options.vsync,
            vsync_mode: options.vsync_mode,
            clear_color: options.clear_color,
        };
        let backend = VkBackend::new(ctx, scene, options.shaders, settings, options.rotation_speed);
        let frame_loop = FrameLoop::new(backend, options.frames_in_flight, host)?;
        info!(
            "vk: renderer up (vsync={} mode={:?}, {} frames in flight)",
            options.vsync,
            options.vsync_mode,
            frame_loop.frames_in_flight()
        );
        Ok(Self { frame_loop })
    }

    /// Takes effect with the next swapchain.
    pub fn set_vsync_mode(&mut self, mode: VkVsyncMode) {
        let settings = &mut self.frame_loop.backend_mut().settings;
        if settings.vsync_mode != mode {
            settings.vsync_mode = mode;
            self.frame_loop.request_rebuild();
        }
    }

    pub fn frame_loop(&self) -> &FrameLoop<VkBackend> {
        &self.frame_loop
    }
}

impl Renderer for VkRenderer {
    fn render(&mut self, host: &mut dyn PresentationHost) -> Result<FrameStatus> {
        self.frame_loop.render_frame(host)
    }

    fn request_rebuild(&mut self) {
        self.frame_loop.request_rebuild();
    }

    // Clear values are baked into the recorded command buffers.
    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        let settings = &mut self.frame_loop.backend_mut().settings;
        if settings.clear_color != rgba {
            settings.clear_color = rgba;
            self.frame_loop.request_rebuild();
        }
    }

    fn set_vsync(&mut self, on: bool) {
        let settings = &mut self.frame_loop.backend_mut().settings;
        if settings.vsync != on {
            settings.vsync = on;
            self.frame_loop.request_rebuild();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn clip(t: &Transforms, p: Vec3) -> Vec4 {
        let m = Mat4::from_cols_array_2d(&t.proj)
            * Mat4::from_cols_array_2d(&t.view)
            * Mat4::from_cols_array_2d(&t.model);
        m * p.extend(1.0)
    }

    #[test]
    fn transforms_layout() {
        assert_eq!(std::mem::size_of::<Transforms>(), 3 * 64);
        assert_eq!(std::mem::offset_of!(Transforms, view), 64);
        assert_eq!(std::mem::offset_of!(Transforms, proj), 128);
    }

    #[test]
    fn model_starts_unrotated() {
        let t = frame_transforms(0.0, 90.0, 1.0);
        assert_eq!(t.model, Mat4::IDENTITY.to_cols_array_2d());
    }

    #[test]
    fn model_spins_around_z() {
        let t = frame_transforms(1.0, 90.0, 1.0);
        let x = Mat4::from_cols_array_2d(&t.model).transform_point3(Vec3::X);
        assert!((x - Vec3::Y).length() < 1e-5, "{x:?}");

        let still = frame_transforms(5.0, 0.0, 1.0);
        assert_eq!(still.model, Mat4::IDENTITY.to_cols_array_2d());
    }

    #[test]
    fn origin_lands_in_the_middle() {
        let c = clip(&frame_transforms(0.0, 90.0, 4.0 / 3.0), Vec3::ZERO);
        assert!(c.w > 0.0);
        assert!((c.x / c.w).abs() < 1e-5);
        assert!((c.y / c.w).abs() < 1e-5);
        let depth = c.z / c.w;
        assert!((0.0..=1.0).contains(&depth), "{depth}");
    }

    #[test]
    fn up_is_negative_clip_y() {
        let c = clip(&frame_transforms(0.0, 90.0, 1.0), Vec3::new(0.0, 0.0, 0.5));
        assert!(c.y / c.w < 0.0);
    }

    #[test]
    fn wider_aspect_narrows_x() {
        let p = Vec3::new(0.5, -0.5, 0.0);
        let square = clip(&frame_transforms(0.0, 0.0, 1.0), p);
        let wide = clip(&frame_transforms(0.0, 0.0, 2.0), p);
        let ratio = (wide.x / wide.w) / (square.x / square.w);
        assert!((ratio - 0.5).abs() < 1e-4, "{ratio}");
    }
}
