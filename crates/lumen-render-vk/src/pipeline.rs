// SPDX-License-Identifier: CEPL-1.0
//! Shaders, render pass, graphics pipeline and the on-disk pipeline cache.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::{fs, mem};

use anyhow::{anyhow, Context, Result};
use ash::util::read_spv;
use ash::vk;
use lumen_assets::Vertex;
use tracing::{debug, warn};

/// SPIR-V for the vertex and fragment stages.
#[derive(Clone, Debug)]
pub struct ShaderBlobs {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderBlobs {
    /// Shaders compiled into the binary by the build script.
    pub fn built_in() -> Result<Self> {
        let vs_bytes = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.vert.spv"));
        let fs_bytes = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.frag.spv"));
        Ok(Self {
            vertex: read_spv(&mut Cursor::new(&vs_bytes[..])).context("built-in vertex shader")?,
            fragment: read_spv(&mut Cursor::new(&fs_bytes[..]))
                .context("built-in fragment shader")?,
        })
    }

    /// Load `shader.vert.spv` and `shader.frag.spv` from `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let load = |name: &str| -> Result<Vec<u32>> {
            let path = dir.join(name);
            let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
            read_spv(&mut Cursor::new(bytes)).with_context(|| format!("parse {}", path.display()))
        };
        Ok(Self {
            vertex: load("shader.vert.spv")?,
            fragment: load("shader.frag.spv")?,
        })
    }
}

pub(crate) unsafe fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: depth_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ];
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };

    // The image-available wait happens at color output, so the layout change
    // out of UNDEFINED must not start before it.
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        dst_stage_mask: stages,
        src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    };

    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    Ok(device.create_render_pass(&rp_info, None)?)
}

/// Pipeline with a fixed viewport matching `extent`; rebuilt with every bundle.
pub(crate) unsafe fn create_pipeline(
    device: &ash::Device,
    cache: vk::PipelineCache,
    shaders: &ShaderBlobs,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    set_layout: vk::DescriptorSetLayout,
) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
    let vs = create_shader_module(device, &shaders.vertex).context("vertex shader module")?;
    let fs = match create_shader_module(device, &shaders.fragment) {
        Ok(fs) => fs,
        Err(e) => {
            device.destroy_shader_module(vs, None);
            return Err(e.context("fragment shader module"));
        }
    };

    let result = build_pipeline(device, cache, vs, fs, render_pass, extent, set_layout);

    // Modules are only needed while the pipeline is being created.
    device.destroy_shader_module(vs, None);
    device.destroy_shader_module(fs, None);
    result
}

unsafe fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: mem::size_of_val(code),
        ..Default::default()
    };
    Ok(device.create_shader_module(&ci, None)?)
}

unsafe fn build_pipeline(
    device: &ash::Device,
    cache: vk::PipelineCache,
    vs: vk::ShaderModule,
    fs: vk::ShaderModule,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    set_layout: vk::DescriptorSetLayout,
) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
    let entry = c"main";
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    // Vertex input layout: binding 0 with Vertex { pos, color, uv }
    let vb = vk::VertexInputBindingDescription {
        binding: 0,
        stride: mem::size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let va = [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: mem::offset_of!(Vertex, pos) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: mem::offset_of!(Vertex, color) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: mem::offset_of!(Vertex, uv) as u32,
        },
    ];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &vb,
        vertex_attribute_description_count: va.len() as u32,
        p_vertex_attribute_descriptions: va.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: &viewport,
        scissor_count: 1,
        p_scissors: &scissor,
        ..Default::default()
    };
    // Projection flips Y, which turns the winding around.
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: vk::TRUE,
        depth_write_enable: vk::TRUE,
        depth_compare_op: vk::CompareOp::LESS,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: 1,
        p_set_layouts: &set_layout,
        ..Default::default()
    };
    let layout = device.create_pipeline_layout(&layout_info, None)?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    match device.create_graphics_pipelines(cache, std::slice::from_ref(&pipeline_info), None) {
        Ok(pipelines) => Ok((layout, pipelines[0])),
        Err((_, err)) => {
            device.destroy_pipeline_layout(layout, None);
            Err(anyhow!("create_graphics_pipelines failed: {err:?}"))
        }
    }
}

fn hex_bytes(b: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut s = String::with_capacity(b.len() * 2);
    for x in b {
        let _ = write!(&mut s, "{x:02x}");
    }
    s
}

/// Cache file name keyed by vendor, device, driver and cache UUID, in the
/// working directory.
pub(crate) fn pipeline_cache_path(props: &vk::PhysicalDeviceProperties) -> PathBuf {
    let uuid = hex_bytes(&props.pipeline_cache_uuid);
    PathBuf::from(format!(
        "lumen_pipeline_cache_{:04x}_{:04x}_{:08x}_{}.bin",
        props.vendor_id, props.device_id, props.driver_version, uuid
    ))
}

pub(crate) unsafe fn create_or_load_pipeline_cache(
    device: &ash::Device,
    path: &Path,
) -> Result<vk::PipelineCache> {
    let data = fs::read(path).ok();
    let (p_initial_data, initial_data_size) = match &data {
        Some(bytes) => (bytes.as_ptr().cast::<std::ffi::c_void>(), bytes.len()),
        None => (std::ptr::null(), 0),
    };
    debug!(
        "vk: pipeline cache {} ({} bytes)",
        path.display(),
        initial_data_size
    );

    let ci = vk::PipelineCacheCreateInfo {
        s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
        initial_data_size,
        p_initial_data,
        ..Default::default()
    };
    match device.create_pipeline_cache(&ci, None) {
        Ok(cache) => Ok(cache),
        Err(e) if data.is_some() => {
            // Stale or foreign blob; start empty instead.
            warn!("vk: ignoring pipeline cache {}: {e:?}", path.display());
            let empty = vk::PipelineCacheCreateInfo::default();
            Ok(device.create_pipeline_cache(&empty, None)?)
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) unsafe fn save_pipeline_cache(
    device: &ash::Device,
    cache: vk::PipelineCache,
    path: &Path,
) -> Result<()> {
    // Some drivers fail here when the cache is empty or the device is lost.
    let Ok(bytes) = device.get_pipeline_cache_data(cache) else {
        return Ok(());
    };
    fs::write(path, &bytes).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
