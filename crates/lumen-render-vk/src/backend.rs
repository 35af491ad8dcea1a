// SPDX-License-Identifier: CEPL-1.0
//! [`FrameBackend`] over a real Vulkan device.

use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use lumen_render::{AcquireOutcome, FrameBackend, PresentOutcome, RenderSize};

use crate::context::GpuContext;
use crate::frame_transforms;
use crate::pipeline::ShaderBlobs;
use crate::scene::SceneResources;
use crate::swapchain::{SwapchainSettings, VkBundle};

// Field order is drop order: scene objects go before the device.
pub struct VkBackend {
    scene: SceneResources,
    ctx: GpuContext,
    shaders: ShaderBlobs,
    pub(crate) settings: SwapchainSettings,
    /// Degrees per second around +Z.
    rotation_speed: f32,
    started: Instant,
}

impl VkBackend {
    pub(crate) fn new(
        ctx: GpuContext,
        scene: SceneResources,
        shaders: ShaderBlobs,
        settings: SwapchainSettings,
        rotation_speed: f32,
    ) -> Self {
        Self {
            scene,
            ctx,
            shaders,
            settings,
            rotation_speed,
            started: Instant::now(),
        }
    }
}

impl FrameBackend for VkBackend {
    type Fence = vk::Fence;
    type Semaphore = vk::Semaphore;
    type Bundle = VkBundle;

    fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence> {
        let ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.ctx.device.create_fence(&ci, None).context("create_fence") }
    }

    fn create_semaphore(&mut self) -> Result<vk::Semaphore> {
        let ci = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .create_semaphore(&ci, None)
                .context("create_semaphore")
        }
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        unsafe { self.ctx.device.destroy_fence(fence, None) }
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        unsafe { self.ctx.device.destroy_semaphore(semaphore, None) }
    }

    fn wait_fence(&mut self, fence: vk::Fence) -> Result<()> {
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[fence], true, u64::MAX)
                .context("wait_for_fences")
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<()> {
        unsafe { self.ctx.device.reset_fences(&[fence]).context("reset_fences") }
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.ctx.device.device_wait_idle().context("device_wait_idle") }
    }

    fn create_bundle(&mut self, size: RenderSize) -> Result<VkBundle> {
        unsafe { VkBundle::create(&self.ctx, &self.scene, &self.shaders, &self.settings, size) }
    }

    fn acquire(&mut self, bundle: &VkBundle, signal: vk::Semaphore) -> Result<AcquireOutcome> {
        let res = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                bundle.swapchain,
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        };
        match res {
            Ok((image, suboptimal)) => Ok(AcquireOutcome::Ready { image, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(anyhow!(e).context("acquire_next_image")),
        }
    }

    fn update_frame_data(&mut self, bundle: &mut VkBundle, image: u32) -> Result<()> {
        let elapsed = self.started.elapsed().as_secs_f32();
        let data = frame_transforms(elapsed, self.rotation_speed, bundle.aspect());
        unsafe { bundle.write_uniforms(image as usize, &data) }.context("write uniforms")
    }

    fn submit(
        &mut self,
        bundle: &VkBundle,
        image: u32,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        let cmd = *bundle
            .command_buffers
            .get(image as usize)
            .ok_or_else(|| anyhow!("no command buffer for image {image}"))?;
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &signal,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.graphics_queue, std::slice::from_ref(&submit), fence)
                .context("queue_submit")
        }
    }

    fn present(
        &mut self,
        bundle: &VkBundle,
        image: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &bundle.swapchain,
            p_image_indices: &image,
            ..Default::default()
        };
        let res = unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.present_queue, &present)
        };
        match res {
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Ok(false) => Ok(PresentOutcome::Presented),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(anyhow!(e).context("queue_present")),
        }
    }
}
