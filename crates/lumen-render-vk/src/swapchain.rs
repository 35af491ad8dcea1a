// SPDX-License-Identifier: CEPL-1.0
//! Swapchain policy plus the bundle of everything that depends on it.

use anyhow::{anyhow, Context, Result};
use ash::khr::swapchain;
use ash::vk;
use lumen_render::{BundleInfo, RenderSize, SwapchainBundle};
use tracing::info;

use crate::context::GpuContext;
use crate::memory::{create_buffer_and_memory, find_memory_type};
use crate::pipeline::{create_pipeline, create_render_pass, ShaderBlobs};
use crate::scene::SceneResources;
use crate::{frame_transforms, Transforms, VkVsyncMode};

/// Knobs that only take effect when a bundle is (re)built.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SwapchainSettings {
    pub vsync: bool,
    pub vsync_mode: VkVsyncMode,
    pub clear_color: [f32; 4],
}

pub(crate) fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    vsync: bool,
    mode: VkVsyncMode,
) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match (vsync, mode) {
        (false, _) => &[
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ],
        (true, VkVsyncMode::Mailbox) => &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        (true, VkVsyncMode::Fifo) => &[vk::PresentModeKHR::FIFO],
    };
    // FIFO is the only mode every implementation must support.
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub(crate) fn pick_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Option<(vk::SurfaceFormatKHR, &'static str)> {
    let srgb = vk::ColorSpaceKHR::SRGB_NONLINEAR;
    let find = |fmt: vk::Format| {
        formats
            .iter()
            .copied()
            .find(|f| f.format == fmt && f.color_space == srgb)
    };
    if let Some(f) = find(vk::Format::B8G8R8A8_SRGB) {
        return Some((f, "bgra8_srgb"));
    }
    if let Some(f) = find(vk::Format::R8G8B8A8_SRGB) {
        return Some((f, "rgba8_srgb"));
    }
    formats.first().map(|&f| (f, "driver_default"))
}

pub(crate) fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum).
pub(crate) fn image_count_from_caps(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

/// Swapchain and every object sized or formatted after it.
///
/// Fields start out as null handles and are filled in creation order, so a
/// bundle that failed half-way still releases exactly what it created.
pub struct VkBundle {
    device: ash::Device,
    loader: swapchain::Device,

    pub(crate) swapchain: vk::SwapchainKHR,
    format: vk::Format,
    pub(crate) extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,

    render_pass: vk::RenderPass,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,

    depth_image: vk::Image,
    depth_memory: vk::DeviceMemory,
    depth_view: vk::ImageView,
    framebuffers: Vec<vk::Framebuffer>,

    uniform_buffers: Vec<vk::Buffer>,
    uniform_memories: Vec<vk::DeviceMemory>,
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,

    cmd_pool: vk::CommandPool,
    pub(crate) command_buffers: Vec<vk::CommandBuffer>,
}

impl VkBundle {
    pub(crate) unsafe fn create(
        ctx: &GpuContext,
        scene: &SceneResources,
        shaders: &ShaderBlobs,
        settings: &SwapchainSettings,
        size: RenderSize,
    ) -> Result<Self> {
        let mut bundle = VkBundle {
            device: ctx.device.clone(),
            loader: ctx.swapchain_loader.clone(),
            swapchain: vk::SwapchainKHR::null(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            views: Vec::new(),
            render_pass: vk::RenderPass::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            depth_image: vk::Image::null(),
            depth_memory: vk::DeviceMemory::null(),
            depth_view: vk::ImageView::null(),
            framebuffers: Vec::new(),
            uniform_buffers: Vec::new(),
            uniform_memories: Vec::new(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_sets: Vec::new(),
            cmd_pool: scene.cmd_pool,
            command_buffers: Vec::new(),
        };

        bundle
            .create_swapchain(ctx, settings, size)
            .context("swapchain")?;
        bundle.create_views().context("swapchain image views")?;
        bundle.render_pass = create_render_pass(&ctx.device, bundle.format, ctx.depth_format)
            .context("render pass")?;
        let (layout, pipeline) = create_pipeline(
            &ctx.device,
            ctx.pipeline_cache,
            shaders,
            bundle.render_pass,
            bundle.extent,
            scene.set_layout,
        )
        .context("graphics pipeline")?;
        bundle.pipeline_layout = layout;
        bundle.pipeline = pipeline;
        bundle.create_depth(ctx).context("depth buffer")?;
        bundle.create_framebuffers().context("framebuffers")?;
        bundle.create_uniforms(ctx).context("uniform buffers")?;
        bundle
            .create_descriptors(scene)
            .context("descriptor sets")?;
        bundle
            .record_commands(scene, settings.clear_color)
            .context("record command buffers")?;
        Ok(bundle)
    }

    unsafe fn create_swapchain(
        &mut self,
        ctx: &GpuContext,
        settings: &SwapchainSettings,
        size: RenderSize,
    ) -> Result<()> {
        let (loader, surface) = (&ctx.inst.surface_loader, ctx.inst.surface);
        let caps = loader.get_physical_device_surface_capabilities(ctx.phys, surface)?;
        let formats = loader.get_physical_device_surface_formats(ctx.phys, surface)?;
        let modes = loader.get_physical_device_surface_present_modes(ctx.phys, surface)?;

        let (surf_format, pick_reason) =
            pick_surface_format(&formats).ok_or_else(|| anyhow!("surface reports no formats"))?;
        let present_mode = choose_present_mode(&modes, settings.vsync, settings.vsync_mode);
        let extent = extent_from_caps(&caps, size);
        let min_count = image_count_from_caps(&caps);

        info!(
            "vk: format {:?} ({}), present_mode {}, vsync={} mode={:?}, extent {}x{}, images(min={} → asked={})",
            surf_format.format,
            pick_reason,
            pm_name(present_mode),
            settings.vsync,
            settings.vsync_mode,
            extent.width,
            extent.height,
            caps.min_image_count,
            min_count
        );

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let families = [ctx.queues.graphics, ctx.queues.present];
        let (sharing_mode, family_count) = if ctx.queues.is_shared() {
            (vk::SharingMode::EXCLUSIVE, 0)
        } else {
            (vk::SharingMode::CONCURRENT, families.len() as u32)
        };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface,
            min_image_count: min_count,
            image_format: surf_format.format,
            image_color_space: surf_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: families.as_ptr(),
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };

        self.swapchain = self.loader.create_swapchain(&swap_info, None)?;
        self.images = self.loader.get_swapchain_images(self.swapchain)?;
        self.format = surf_format.format;
        self.extent = extent;
        Ok(())
    }

    unsafe fn create_views(&mut self) -> Result<()> {
        for &image in &self.images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: self.format,
                subresource_range: color_range(),
                ..Default::default()
            };
            self.views.push(self.device.create_image_view(&iv_info, None)?);
        }
        Ok(())
    }

    unsafe fn create_depth(&mut self, ctx: &GpuContext) -> Result<()> {
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: ctx.depth_format,
            extent: vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        self.depth_image = self.device.create_image(&img_ci, None)?;

        let req = self.device.get_image_memory_requirements(self.depth_image);
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: find_memory_type(
                &ctx.memory_properties,
                req.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?,
            ..Default::default()
        };
        self.depth_memory = self.device.allocate_memory(&alloc, None)?;
        self.device
            .bind_image_memory(self.depth_image, self.depth_memory, 0)?;

        let view_ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: self.depth_image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: ctx.depth_format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        self.depth_view = self.device.create_image_view(&view_ci, None)?;
        Ok(())
    }

    unsafe fn create_framebuffers(&mut self) -> Result<()> {
        for &view in &self.views {
            let attachments = [view, self.depth_view];
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: self.render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: self.extent.width,
                height: self.extent.height,
                layers: 1,
                ..Default::default()
            };
            self.framebuffers
                .push(self.device.create_framebuffer(&fb_info, None)?);
        }
        Ok(())
    }

    unsafe fn create_uniforms(&mut self, ctx: &GpuContext) -> Result<()> {
        let size = std::mem::size_of::<Transforms>() as vk::DeviceSize;
        for _ in 0..self.images.len() {
            let (buffer, memory) = create_buffer_and_memory(
                ctx,
                size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            self.uniform_buffers.push(buffer);
            self.uniform_memories.push(memory);
        }
        // Identity-ish contents until the first update, so nothing reads garbage.
        let initial = frame_transforms(0.0, 0.0, self.aspect());
        for image in 0..self.images.len() {
            self.write_uniforms(image, &initial)?;
        }
        Ok(())
    }

    unsafe fn create_descriptors(&mut self, scene: &SceneResources) -> Result<()> {
        let count = self.images.len() as u32;
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: count,
            },
        ];
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: count,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        self.descriptor_pool = self.device.create_descriptor_pool(&pool_ci, None)?;

        let layouts = vec![scene.set_layout; self.images.len()];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.descriptor_pool,
            descriptor_set_count: count,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        self.descriptor_sets = self.device.allocate_descriptor_sets(&alloc)?;

        let buffer_infos: Vec<vk::DescriptorBufferInfo> = self
            .uniform_buffers
            .iter()
            .map(|&buffer| vk::DescriptorBufferInfo {
                buffer,
                offset: 0,
                range: std::mem::size_of::<Transforms>() as vk::DeviceSize,
            })
            .collect();
        let image_info = vk::DescriptorImageInfo {
            sampler: scene.sampler,
            image_view: scene.texture_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };

        let mut writes = Vec::with_capacity(self.descriptor_sets.len() * 2);
        for (set, info) in self.descriptor_sets.iter().zip(&buffer_infos) {
            writes.push(vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: *set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: info,
                ..Default::default()
            });
            writes.push(vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: *set,
                dst_binding: 1,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                p_image_info: &image_info,
                ..Default::default()
            });
        }
        self.device.update_descriptor_sets(&writes, &[]);
        Ok(())
    }

    /// Command buffers are recorded once per bundle; everything they reference
    /// lives at least as long as the bundle.
    unsafe fn record_commands(&mut self, scene: &SceneResources, clear: [f32; 4]) -> Result<()> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: self.images.len() as u32,
            ..Default::default()
        };
        self.command_buffers = self.device.allocate_command_buffers(&alloc_info)?;

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: clear },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let d = &self.device;
        for (i, &cmd) in self.command_buffers.iter().enumerate() {
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin)?;

            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: self.render_pass,
                framebuffer: self.framebuffers[i],
                render_area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: self.extent,
                },
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            d.cmd_bind_vertex_buffers(cmd, 0, &[scene.vertex_buffer], &[0]);
            d.cmd_bind_index_buffer(cmd, scene.index_buffer, 0, vk::IndexType::UINT32);
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                std::slice::from_ref(&self.descriptor_sets[i]),
                &[],
            );
            d.cmd_draw_indexed(cmd, scene.index_count, 1, 0, 0, 0);
            d.cmd_end_render_pass(cmd);
            d.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    /// Caller guarantees no pending submission still reads this image's buffer.
    pub(crate) unsafe fn write_uniforms(&self, image: usize, data: &Transforms) -> Result<()> {
        let memory = *self
            .uniform_memories
            .get(image)
            .ok_or_else(|| anyhow!("no uniform buffer for image {image}"))?;
        let bytes = bytemuck::bytes_of(data);
        let ptr = self.device.map_memory(
            memory,
            0,
            bytes.len() as vk::DeviceSize,
            vk::MemoryMapFlags::empty(),
        )?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
        self.device.unmap_memory(memory);
        Ok(())
    }

    pub(crate) fn aspect(&self) -> f32 {
        RenderSize::new(self.extent.width, self.extent.height).aspect()
    }
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

impl SwapchainBundle for VkBundle {
    fn info(&self) -> BundleInfo {
        BundleInfo {
            extent: RenderSize::new(self.extent.width, self.extent.height),
            format: self.format.as_raw(),
            images: self.images.len(),
            views: self.views.len(),
            framebuffers: self.framebuffers.len(),
            command_buffers: self.command_buffers.len(),
            uniform_buffers: self.uniform_buffers.len(),
        }
    }
}

// STRICT TEARDOWN ORDER: exact reverse of creation. The device must be idle
// with respect to this bundle before it is dropped.
impl Drop for VkBundle {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device;

            if !self.command_buffers.is_empty() {
                d.free_command_buffers(self.cmd_pool, &self.command_buffers);
            }
            // Sets go with their pool.
            d.destroy_descriptor_pool(self.descriptor_pool, None);
            for (&b, &m) in self.uniform_buffers.iter().zip(&self.uniform_memories) {
                d.destroy_buffer(b, None);
                d.free_memory(m, None);
            }
            for &fb in &self.framebuffers {
                d.destroy_framebuffer(fb, None);
            }
            d.destroy_image_view(self.depth_view, None);
            d.destroy_image(self.depth_image, None);
            d.free_memory(self.depth_memory, None);

            d.destroy_pipeline(self.pipeline, None);
            d.destroy_pipeline_layout(self.pipeline_layout, None);
            d.destroy_render_pass(self.render_pass, None);

            for &iv in &self.views {
                d.destroy_image_view(iv, None);
            }
            // Images belong to the swapchain.
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
