// SPDX-License-Identifier: CEPL-1.0
//! Buffer and image allocation, plus blocking staging uploads.

use anyhow::{anyhow, Result};
use ash::vk;
use lumen_assets::Texture;

use crate::context::GpuContext;

pub(crate) fn find_memory_type(
    mem: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..mem.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && mem.memory_types[i as usize].property_flags.contains(req)
        })
        .ok_or_else(|| anyhow!("no memory type with {req:?} in mask {type_bits:#b}"))
}

pub(crate) unsafe fn create_buffer_and_memory(
    ctx: &GpuContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    props: vk::MemoryPropertyFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let device = &ctx.device;
    let bci = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let buf = device.create_buffer(&bci, None)?;
    let req = device.get_buffer_memory_requirements(buf);
    let mem = find_memory_type(&ctx.memory_properties, req.memory_type_bits, props).and_then(
        |memory_type_index| {
            let mai = vk::MemoryAllocateInfo {
                s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                allocation_size: req.size,
                memory_type_index,
                ..Default::default()
            };
            Ok(device.allocate_memory(&mai, None)?)
        },
    );
    let mem = match mem {
        Ok(mem) => mem,
        Err(e) => {
            device.destroy_buffer(buf, None);
            return Err(e);
        }
    };
    if let Err(e) = device.bind_buffer_memory(buf, mem, 0) {
        device.destroy_buffer(buf, None);
        device.free_memory(mem, None);
        return Err(e.into());
    }
    Ok((buf, mem))
}

/// Record into a throwaway command buffer, submit on the graphics queue and
/// wait for the queue to drain.
pub(crate) unsafe fn one_shot<F>(ctx: &GpuContext, pool: vk::CommandPool, record: F) -> Result<()>
where
    F: FnOnce(&ash::Device, vk::CommandBuffer),
{
    let device = &ctx.device;
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = device.allocate_command_buffers(&ai)?[0];

    let submit = || -> Result<()> {
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device.begin_command_buffer(cmd, &bi)?;
        record(device, cmd);
        device.end_command_buffer(cmd)?;

        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        device.queue_submit(ctx.graphics_queue, std::slice::from_ref(&si), vk::Fence::null())?;
        device.queue_wait_idle(ctx.graphics_queue)?;
        Ok(())
    };
    let result = submit();
    device.free_command_buffers(pool, std::slice::from_ref(&cmd));
    result
}

/// Host-visible staging buffer holding `data`. Caller destroys both handles.
unsafe fn staging_buffer(ctx: &GpuContext, data: &[u8]) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let size = data.len() as vk::DeviceSize;
    let (buf, mem) = create_buffer_and_memory(
        ctx,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    match ctx.device.map_memory(mem, 0, size, vk::MemoryMapFlags::empty()) {
        Ok(ptr) => {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            ctx.device.unmap_memory(mem);
            Ok((buf, mem))
        }
        Err(e) => {
            ctx.device.destroy_buffer(buf, None);
            ctx.device.free_memory(mem, None);
            Err(e.into())
        }
    }
}

/// Device-local buffer filled through a staging copy.
pub(crate) unsafe fn create_device_local_buffer(
    ctx: &GpuContext,
    pool: vk::CommandPool,
    usage: vk::BufferUsageFlags,
    data: &[u8],
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let size = data.len() as vk::DeviceSize;
    let (dst, dst_mem) = create_buffer_and_memory(
        ctx,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    let upload = staging_buffer(ctx, data).and_then(|(staging, staging_mem)| {
        let copied = one_shot(ctx, pool, |d, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            d.cmd_copy_buffer(cmd, staging, dst, std::slice::from_ref(&region));
        });
        ctx.device.destroy_buffer(staging, None);
        ctx.device.free_memory(staging_mem, None);
        copied
    });
    if let Err(e) = upload {
        ctx.device.destroy_buffer(dst, None);
        ctx.device.free_memory(dst_mem, None);
        return Err(e);
    }
    Ok((dst, dst_mem))
}

fn layout_barrier(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access_mask: vk::AccessFlags,
    dst_access_mask: vk::AccessFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask,
        dst_access_mask,
        old_layout,
        new_layout,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    }
}

/// Sampled RGBA8 sRGB image holding `texture`, left in SHADER_READ_ONLY_OPTIMAL.
pub(crate) unsafe fn create_texture_image(
    ctx: &GpuContext,
    pool: vk::CommandPool,
    texture: &Texture,
) -> Result<(vk::Image, vk::DeviceMemory)> {
    let device = &ctx.device;
    let extent = vk::Extent3D {
        width: texture.width,
        height: texture.height,
        depth: 1,
    };
    let img_ci = vk::ImageCreateInfo {
        s_type: vk::StructureType::IMAGE_CREATE_INFO,
        image_type: vk::ImageType::TYPE_2D,
        format: vk::Format::R8G8B8A8_SRGB,
        extent,
        mip_levels: 1,
        array_layers: 1,
        samples: vk::SampleCountFlags::TYPE_1,
        tiling: vk::ImageTiling::OPTIMAL,
        usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        ..Default::default()
    };
    let image = device.create_image(&img_ci, None)?;

    let mut memory = vk::DeviceMemory::null();
    let result = (|| -> Result<()> {
        let req = device.get_image_memory_requirements(image);
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: find_memory_type(
                &ctx.memory_properties,
                req.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?,
            ..Default::default()
        };
        memory = device.allocate_memory(&mai, None)?;
        device.bind_image_memory(image, memory, 0)?;

        let (staging, staging_mem) = staging_buffer(ctx, &texture.pixels)?;
        let copied = one_shot(ctx, pool, |d, cmd| {
            let to_dst = layout_barrier(
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
            );
            d.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_dst],
            );

            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                image_extent: extent,
            };
            d.cmd_copy_buffer_to_image(
                cmd,
                staging,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            let to_read = layout_barrier(
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
            );
            d.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_read],
            );
        });
        device.destroy_buffer(staging, None);
        device.free_memory(staging_mem, None);
        copied
    })();

    if let Err(e) = result {
        device.destroy_image(image, None);
        device.free_memory(memory, None);
        return Err(e);
    }
    Ok((image, memory))
}
