// SPDX-License-Identifier: CEPL-1.0
//! GPU copies of the mesh and texture. Created once, independent of the
//! swapchain, and shared by every bundle.

use anyhow::{Context, Result};
use ash::vk;
use lumen_assets::{Mesh, Texture};
use tracing::info;

use crate::context::GpuContext;
use crate::memory::{create_device_local_buffer, create_texture_image};

pub(crate) struct SceneResources {
    device: ash::Device,
    /// Pool for both upload and per-image command buffers.
    pub cmd_pool: vk::CommandPool,

    pub vertex_buffer: vk::Buffer,
    vertex_memory: vk::DeviceMemory,
    pub index_buffer: vk::Buffer,
    index_memory: vk::DeviceMemory,
    pub index_count: u32,

    texture_image: vk::Image,
    texture_memory: vk::DeviceMemory,
    pub texture_view: vk::ImageView,
    pub sampler: vk::Sampler,

    /// Set 0: binding 0 transforms (vertex), binding 1 texture (fragment).
    pub set_layout: vk::DescriptorSetLayout,
}

impl SceneResources {
    pub unsafe fn create(ctx: &GpuContext, mesh: &Mesh, texture: &Texture) -> Result<Self> {
        let mut scene = SceneResources {
            device: ctx.device.clone(),
            cmd_pool: vk::CommandPool::null(),
            vertex_buffer: vk::Buffer::null(),
            vertex_memory: vk::DeviceMemory::null(),
            index_buffer: vk::Buffer::null(),
            index_memory: vk::DeviceMemory::null(),
            index_count: 0,
            texture_image: vk::Image::null(),
            texture_memory: vk::DeviceMemory::null(),
            texture_view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            set_layout: vk::DescriptorSetLayout::null(),
        };

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: ctx.queues.graphics,
            ..Default::default()
        };
        scene.cmd_pool = ctx
            .device
            .create_command_pool(&pool_info, None)
            .context("create_command_pool")?;

        let (vbuf, vmem) = create_device_local_buffer(
            ctx,
            scene.cmd_pool,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&mesh.vertices),
        )
        .context("vertex buffer")?;
        scene.vertex_buffer = vbuf;
        scene.vertex_memory = vmem;

        let (ibuf, imem) = create_device_local_buffer(
            ctx,
            scene.cmd_pool,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&mesh.indices),
        )
        .context("index buffer")?;
        scene.index_buffer = ibuf;
        scene.index_memory = imem;
        scene.index_count = mesh.indices.len() as u32;

        let (timg, tmem) =
            create_texture_image(ctx, scene.cmd_pool, texture).context("texture image")?;
        scene.texture_image = timg;
        scene.texture_memory = tmem;

        let view_ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: timg,
            view_type: vk::ImageViewType::TYPE_2D,
            format: vk::Format::R8G8B8A8_SRGB,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        scene.texture_view = ctx
            .device
            .create_image_view(&view_ci, None)
            .context("texture view")?;
        scene.sampler = create_sampler(ctx).context("texture sampler")?;
        scene.set_layout = create_set_layout(&ctx.device).context("descriptor set layout")?;

        info!(
            "vk: scene uploaded ({} vertices / {} B, {} indices / {} B, texture {}x{})",
            mesh.vertices.len(),
            mesh.vertex_bytes(),
            mesh.indices.len(),
            mesh.index_bytes(),
            texture.width,
            texture.height
        );
        Ok(scene)
    }
}

unsafe fn create_sampler(ctx: &GpuContext) -> Result<vk::Sampler> {
    let (anisotropy_enable, max_anisotropy) = match ctx.max_anisotropy {
        Some(max) => (vk::TRUE, max),
        None => (vk::FALSE, 1.0),
    };
    let ci = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        anisotropy_enable,
        max_anisotropy,
        compare_enable: vk::FALSE,
        compare_op: vk::CompareOp::ALWAYS,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        unnormalized_coordinates: vk::FALSE,
        ..Default::default()
    };
    Ok(ctx.device.create_sampler(&ci, None)?)
}

unsafe fn create_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
    let bindings = [
        vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        },
        vk::DescriptorSetLayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        },
    ];
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    Ok(device.create_descriptor_set_layout(&ci, None)?)
}

impl Drop for SceneResources {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device;
            d.destroy_descriptor_set_layout(self.set_layout, None);
            d.destroy_sampler(self.sampler, None);
            d.destroy_image_view(self.texture_view, None);
            d.destroy_image(self.texture_image, None);
            d.free_memory(self.texture_memory, None);
            d.destroy_buffer(self.index_buffer, None);
            d.free_memory(self.index_memory, None);
            d.destroy_buffer(self.vertex_buffer, None);
            d.free_memory(self.vertex_memory, None);
            // Frees any command buffers still allocated from it.
            d.destroy_command_pool(self.cmd_pool, None);
        }
    }
}
