// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, device and queues: everything that outlives swapchains.

use std::ffi::{c_char, c_void, CStr};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, trace, warn};

use crate::pipeline::{create_or_load_pipeline_cache, pipeline_cache_path, save_pipeline_cache};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan] {msg}");
    } else {
        trace!("[vulkan] {msg}");
    }
    vk::FALSE
}

/// Graphics and present queue family indices; often the same family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Prefer one family that does both; otherwise the first of each.
    pub fn find(
        props: &[vk::QueueFamilyProperties],
        can_present: impl Fn(u32) -> bool,
    ) -> Option<Self> {
        let graphics = |i: usize| props[i].queue_flags.contains(vk::QueueFlags::GRAPHICS);
        if let Some(i) = (0..props.len()).find(|&i| graphics(i) && can_present(i as u32)) {
            return Some(Self {
                graphics: i as u32,
                present: i as u32,
            });
        }
        let g = (0..props.len()).find(|&i| graphics(i))?;
        let p = (0..props.len()).find(|&i| can_present(i as u32))?;
        Some(Self {
            graphics: g as u32,
            present: p as u32,
        })
    }
}

/// First candidate usable as an optimal-tiling depth attachment.
pub(crate) fn pick_depth_format(supports: impl Fn(vk::Format) -> bool) -> Option<vk::Format> {
    [
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
    ]
    .into_iter()
    .find(|&f| supports(f))
}

/// Instance-level objects. Dropped after the device.
pub(crate) struct InstanceResources {
    entry: Entry,
    pub instance: ash::Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
}

impl InstanceResources {
    // STRICT ORDER:
    // 1) Create VkInstance (platform WSI + optional debug ext)
    // 2) Create VkSurfaceKHR from this instance
    // 3) Later, pick the physical device against this surface
    unsafe fn new(display: RawDisplayHandle, window: RawWindowHandle) -> Result<Self> {
        let entry = Entry::linked();

        let layers = entry
            .enumerate_instance_layer_properties()
            .context("enumerate_instance_layer_properties")?;
        let have_validation = layers
            .iter()
            .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER);
        let validation = cfg!(debug_assertions) && have_validation;
        if cfg!(debug_assertions) && !have_validation {
            warn!("vk: {VALIDATION_LAYER:?} not installed, running without validation");
        }

        let instance = create_instance(&entry, display, validation).context("create_instance")?;
        let mut res = InstanceResources {
            surface_loader: surface::Instance::new(&entry, &instance),
            entry,
            instance,
            debug: None,
            surface: vk::SurfaceKHR::null(),
        };

        if validation {
            let loader = debug_utils::Instance::new(&res.entry, &res.instance);
            let ci = vk::DebugUtilsMessengerCreateInfoEXT {
                s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
                message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                pfn_user_callback: Some(debug_callback),
                ..Default::default()
            };
            let messenger = loader
                .create_debug_utils_messenger(&ci, None)
                .context("create_debug_utils_messenger")?;
            res.debug = Some((loader, messenger));
        }

        res.surface = ash_window::create_surface(&res.entry, &res.instance, display, window, None)
            .context("ash_window::create_surface")?;
        Ok(res)
    }
}

impl Drop for InstanceResources {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe fn create_instance(
    entry: &Entry,
    display: RawDisplayHandle,
    validation: bool,
) -> Result<ash::Instance> {
    let app = c"lumen";
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display)
        .context("enumerate_required_extensions")?
        .to_vec();
    let mut layer_names: Vec<*const c_char> = Vec::new();
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        layer_names.push(VALIDATION_LAYER.as_ptr());
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layer_names.len() as u32,
        pp_enabled_layer_names: layer_names.as_ptr(),
        ..Default::default()
    };
    Ok(entry.create_instance(&create_info, None)?)
}

struct DeviceChoice {
    phys: vk::PhysicalDevice,
    queues: QueueFamilies,
    name: String,
    discrete: bool,
}

unsafe fn pick_device(inst: &InstanceResources) -> Result<DeviceChoice> {
    let instance = &inst.instance;
    let mut best: Option<DeviceChoice> = None;

    for phys in instance
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?
    {
        let props = instance.get_physical_device_properties(phys);
        let name = CStr::from_ptr(props.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let has_swapchain = instance
            .enumerate_device_extension_properties(phys)
            .unwrap_or_default()
            .iter()
            .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME);
        if !has_swapchain {
            debug!("vk: skipping {name}: no {:?}", swapchain::NAME);
            continue;
        }

        let qprops = instance.get_physical_device_queue_family_properties(phys);
        let Some(queues) = QueueFamilies::find(&qprops, |i| {
            inst.surface_loader
                .get_physical_device_surface_support(phys, i, inst.surface)
                .unwrap_or(false)
        }) else {
            debug!("vk: skipping {name}: no graphics/present queues");
            continue;
        };

        let formats = inst
            .surface_loader
            .get_physical_device_surface_formats(phys, inst.surface)
            .unwrap_or_default();
        let modes = inst
            .surface_loader
            .get_physical_device_surface_present_modes(phys, inst.surface)
            .unwrap_or_default();
        if formats.is_empty() || modes.is_empty() {
            debug!("vk: skipping {name}: surface has no formats or present modes");
            continue;
        }

        let discrete = props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
        if best.as_ref().is_none_or(|b| discrete && !b.discrete) {
            best = Some(DeviceChoice {
                phys,
                queues,
                name,
                discrete,
            });
        }
    }
    best.ok_or_else(|| anyhow!("no suitable physical device/queue family"))
}

/// Long-lived Vulkan state shared by every swapchain bundle.
pub(crate) struct GpuContext {
    pub device: ash::Device,
    pub swapchain_loader: swapchain::Device,
    pub phys: vk::PhysicalDevice,
    pub queues: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub depth_format: vk::Format,
    /// Sampler anisotropy limit, when the feature is enabled.
    pub max_anisotropy: Option<f32>,
    pub pipeline_cache: vk::PipelineCache,
    cache_path: PathBuf,
    pub inst: InstanceResources,
}

impl GpuContext {
    /// # Safety
    /// The handles must stay valid until the context is dropped.
    pub unsafe fn new(display: RawDisplayHandle, window: RawWindowHandle) -> Result<Self> {
        let inst = InstanceResources::new(display, window)?;
        let choice = pick_device(&inst)?;
        let instance = &inst.instance;
        let phys = choice.phys;
        let queues = choice.queues;

        let props = instance.get_physical_device_properties(phys);
        let features = instance.get_physical_device_features(phys);
        let anisotropy = features.sampler_anisotropy == vk::TRUE;

        let depth_format = pick_depth_format(|fmt| {
            instance
                .get_physical_device_format_properties(phys, fmt)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| anyhow!("no usable depth format on {}", choice.name))?;

        let priorities = [1.0_f32];
        let mut families = vec![queues.graphics];
        if !queues.is_shared() {
            families.push(queues.present);
        }
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&queue_family_index| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let enabled = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: if anisotropy { vk::TRUE } else { vk::FALSE },
            ..Default::default()
        };
        let device_exts = [swapchain::NAME.as_ptr()];
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            p_enabled_features: &enabled,
            ..Default::default()
        };
        let device = instance
            .create_device(phys, &dinfo, None)
            .context("create_device")?;

        let mut ctx = GpuContext {
            swapchain_loader: swapchain::Device::new(instance, &device),
            graphics_queue: device.get_device_queue(queues.graphics, 0),
            present_queue: device.get_device_queue(queues.present, 0),
            memory_properties: instance.get_physical_device_memory_properties(phys),
            device,
            phys,
            queues,
            depth_format,
            max_anisotropy: anisotropy.then_some(props.limits.max_sampler_anisotropy),
            pipeline_cache: vk::PipelineCache::null(),
            cache_path: pipeline_cache_path(&props),
            inst,
        };
        ctx.pipeline_cache = create_or_load_pipeline_cache(&ctx.device, &ctx.cache_path)
            .context("pipeline cache")?;

        info!(
            "vk: device {} ({}), queues graphics={} present={}, depth {:?}, anisotropy {:?}",
            choice.name,
            if choice.discrete { "discrete" } else { "integrated/other" },
            queues.graphics,
            queues.present,
            depth_format,
            ctx.max_anisotropy
        );
        Ok(ctx)
    }
}

// STRICT TEARDOWN ORDER:
// - device_wait_idle()
// - save + destroy pipeline cache
// - destroy device
// - surface, debug messenger, instance (InstanceResources, dropped after this)
impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device;
            d.device_wait_idle().ok();
            if self.pipeline_cache != vk::PipelineCache::null() {
                if let Err(e) = save_pipeline_cache(d, self.pipeline_cache, &self.cache_path) {
                    warn!("vk: pipeline cache not saved: {e:#}");
                }
                d.destroy_pipeline_cache(self.pipeline_cache, None);
            }
            d.destroy_device(None);
        }
    }
}
