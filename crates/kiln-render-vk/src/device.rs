// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection and logical device creation.
//!
//! Selection walks the enumerated GPUs in order and takes the first one that
//! satisfies every [`DeviceRequirements`] entry. There is no best-of-N
//! scoring; the only preference is the transfer-queue tie-break inside a
//! single device's queue families.

use std::ffi::{CStr, CString};

use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::vk;
use tracing::{debug, info, trace, warn};

use crate::error::{VkBackendError, VkBackendResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilyIndices {
    /// Distinct families in role order (graphics, present, compute, transfer).
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(4);
        for family in [self.graphics, self.present, self.compute, self.transfer]
            .into_iter()
            .flatten()
        {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }

    /// Graphics family plus the distinct families that need a queue. Checked
    /// before the logical device exists so a failure has nothing to undo.
    pub fn queue_plan(&self) -> VkBackendResult<(u32, Vec<u32>)> {
        let graphics = self.graphics.ok_or(VkBackendError::NoSuitableDevice)?;
        Ok((graphics, self.unique_families()))
    }
}

#[derive(Clone, Debug)]
pub struct DeviceRequirements {
    pub graphics: bool,
    pub present: bool,
    pub compute: bool,
    pub transfer: bool,
    pub sampler_anisotropy: bool,
    pub discrete_gpu: bool,
    pub extensions: Vec<&'static CStr>,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self {
            graphics: true,
            present: true,
            compute: false,
            transfer: true,
            sampler_anisotropy: true,
            discrete_gpu: false,
            extensions: vec![swapchain::NAME],
        }
    }
}

impl DeviceRequirements {
    /// Every requested role must have resolved to a family; unrequested
    /// roles pass regardless.
    pub fn queues_satisfied_by(&self, queues: &QueueFamilyIndices) -> bool {
        let resolved = |requested: bool, index: Option<u32>| !requested || index.is_some();
        resolved(self.graphics, queues.graphics)
            && resolved(self.present, queues.present)
            && resolved(self.compute, queues.compute)
            && resolved(self.transfer, queues.transfer)
    }
}

#[derive(Clone, Debug, Default)]
pub struct SwapchainSupportInfo {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportInfo {
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Everything learned about the selected GPU. Immutable once selected.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
    pub swapchain_support: SwapchainSupportInfo,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> String {
        device_name(&self.properties)
    }

    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Unknown",
        }
    }

    fn log_selection(&self) {
        let p = &self.properties;
        info!("selected device: '{}'", self.device_name());
        info!("GPU type is {}", self.device_type_name());
        info!(
            "GPU driver version {}.{}.{}",
            vk::api_version_major(p.driver_version),
            vk::api_version_minor(p.driver_version),
            vk::api_version_patch(p.driver_version)
        );
        info!(
            "Vulkan API version {}.{}.{}",
            vk::api_version_major(p.api_version),
            vk::api_version_minor(p.api_version),
            vk::api_version_patch(p.api_version)
        );
        let heaps = &self.memory.memory_heaps[..self.memory.memory_heap_count as usize];
        for heap in heaps {
            let gib = heap.size as f64 / 1024.0 / 1024.0 / 1024.0;
            if heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL) {
                info!("local GPU memory: {gib:.2} GiB");
            } else {
                info!("shared system memory: {gib:.2} GiB");
            }
        }
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    // device_name is a fixed-size, nul-terminated array filled by the driver
    let bytes: Vec<u8> = properties
        .device_name
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Read-only view of the GPUs an instance exposes, as seen from one surface.
pub trait PhysicalDeviceSource {
    fn physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>>;
    fn properties(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties;
    fn features(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures;
    fn memory_properties(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties;
    fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties>;
    fn supports_present(&self, device: vk::PhysicalDevice, family: u32) -> VkResult<bool>;
    fn swapchain_support(&self, device: vk::PhysicalDevice) -> VkResult<SwapchainSupportInfo>;
    fn extension_names(&self, device: vk::PhysicalDevice) -> VkResult<Vec<CString>>;
}

pub struct SurfaceProbe<'a> {
    pub instance: &'a ash::Instance,
    pub surface_loader: &'a surface::Instance,
    pub surface: vk::SurfaceKHR,
}

impl PhysicalDeviceSource for SurfaceProbe<'_> {
    fn physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        unsafe { self.instance.enumerate_physical_devices() }
    }

    fn properties(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        unsafe { self.instance.get_physical_device_properties(device) }
    }

    fn features(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
        unsafe { self.instance.get_physical_device_features(device) }
    }

    fn memory_properties(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties {
        unsafe { self.instance.get_physical_device_memory_properties(device) }
    }

    fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            self.instance
                .get_physical_device_queue_family_properties(device)
        }
    }

    fn supports_present(&self, device: vk::PhysicalDevice, family: u32) -> VkResult<bool> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_support(device, family, self.surface)
        }
    }

    fn swapchain_support(&self, device: vk::PhysicalDevice) -> VkResult<SwapchainSupportInfo> {
        query_swapchain_support(self.surface_loader, device, self.surface)
    }

    fn extension_names(&self, device: vk::PhysicalDevice) -> VkResult<Vec<CString>> {
        let props = unsafe { self.instance.enumerate_device_extension_properties(device)? };
        Ok(props
            .iter()
            .map(|e| unsafe { CStr::from_ptr(e.extension_name.as_ptr()) }.to_owned())
            .collect())
    }
}

/// Fresh query every call; callers drop the previous info before re-querying.
pub fn query_swapchain_support(
    surface_loader: &surface::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> VkResult<SwapchainSupportInfo> {
    unsafe {
        Ok(SwapchainSupportInfo {
            capabilities: surface_loader.get_physical_device_surface_capabilities(device, surface)?,
            formats: surface_loader.get_physical_device_surface_formats(device, surface)?,
            present_modes: surface_loader
                .get_physical_device_surface_present_modes(device, surface)?,
        })
    }
}

/// Graphics, compute and present take the first family that advertises
/// them. Transfer goes to the transfer-capable family with the fewest other
/// capability bits, so a dedicated transfer family beats a combined one.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> VkResult<bool>,
) -> VkResult<QueueFamilyIndices> {
    let mut indices = QueueFamilyIndices::default();
    let mut min_transfer_score = u8::MAX;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let mut transfer_score = 0u8;
        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics.get_or_insert(i);
            transfer_score += 1;
        }
        if family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
            indices.compute.get_or_insert(i);
            transfer_score += 1;
        }
        if family.queue_flags.contains(vk::QueueFlags::TRANSFER)
            && transfer_score <= min_transfer_score
        {
            min_transfer_score = transfer_score;
            indices.transfer = Some(i);
        }
        if indices.present.is_none() && supports_present(i)? {
            indices.present = Some(i);
        }
    }

    Ok(indices)
}

fn physical_device_meets_requirements(
    source: &dyn PhysicalDeviceSource,
    device: vk::PhysicalDevice,
    requirements: &DeviceRequirements,
) -> VkResult<Option<PhysicalDeviceInfo>> {
    let properties = source.properties(device);
    let features = source.features(device);
    let name = device_name(&properties);

    if requirements.discrete_gpu && properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
        info!("'{name}' is not a discrete GPU and one is required, skipping");
        return Ok(None);
    }

    let families = source.queue_families(device);
    let queues = find_queue_families(&families, |i| source.supports_present(device, i))?;

    debug!("graphics | present | compute | transfer | name");
    debug!(
        "{:>8} | {:>7} | {:>7} | {:>8} | {}",
        queues.graphics.is_some(),
        queues.present.is_some(),
        queues.compute.is_some(),
        queues.transfer.is_some(),
        name
    );

    if !requirements.queues_satisfied_by(&queues) {
        info!("'{name}' does not meet the queue requirements, skipping");
        return Ok(None);
    }
    trace!(
        "queue families for '{name}': graphics={:?} present={:?} compute={:?} transfer={:?}",
        queues.graphics,
        queues.present,
        queues.compute,
        queues.transfer
    );

    let swapchain_support = source.swapchain_support(device)?;
    if !swapchain_support.is_adequate() {
        info!("'{name}' lacks required swapchain support, skipping");
        return Ok(None);
    }

    if !requirements.extensions.is_empty() {
        let available = source.extension_names(device)?;
        if let Some(missing) = requirements
            .extensions
            .iter()
            .find(|&&want| !available.iter().any(|have| have.as_c_str() == want))
        {
            info!("'{name}' is missing required extension {missing:?}, skipping");
            return Ok(None);
        }
    }

    if requirements.sampler_anisotropy && features.sampler_anisotropy == vk::FALSE {
        info!("'{name}' does not support samplerAnisotropy, skipping");
        return Ok(None);
    }

    Ok(Some(PhysicalDeviceInfo {
        handle: device,
        properties,
        features,
        memory: source.memory_properties(device),
        queue_families: queues,
        swapchain_support,
    }))
}

/// First qualifying device wins.
pub fn select_physical_device(
    source: &dyn PhysicalDeviceSource,
    requirements: &DeviceRequirements,
) -> VkBackendResult<PhysicalDeviceInfo> {
    let devices = source.physical_devices()?;
    if devices.is_empty() {
        warn!("no devices which support Vulkan were found");
        return Err(VkBackendError::NoVulkanDevices);
    }

    for device in devices {
        if let Some(selected) = physical_device_meets_requirements(source, device, requirements)? {
            selected.log_selection();
            return Ok(selected);
        }
    }

    warn!("no physical devices were found which meet the requirements");
    Err(VkBackendError::NoSuitableDevice)
}

/// Probes the depth candidates in preference order, accepting linear-tiling
/// support first and optimal-tiling support second for each candidate.
pub fn detect_depth_format(
    format_properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    const CANDIDATES: [vk::Format; 3] = [
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
    ];
    let wanted = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;

    CANDIDATES.into_iter().find(|&format| {
        let props = format_properties(format);
        props.linear_tiling_features.contains(wanted)
            || props.optimal_tiling_features.contains(wanted)
    })
}

pub fn find_memory_index(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory.memory_type_count).find(|&i| {
        type_filter & (1 << i) != 0 && memory.memory_types[i as usize].property_flags.contains(flags)
    })
}

#[derive(Clone, Copy, Debug)]
pub struct DeviceQueues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
    pub transfer: vk::Queue,
    pub compute: Option<vk::Queue>,
}

/// Logical device plus everything the frame loop needs to talk to it. One
/// instance per backend lifetime.
pub struct VulkanDevice {
    pub(crate) instance: ash::Instance,
    pub(crate) surface_loader: surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) physical: PhysicalDeviceInfo,
    pub(crate) device: ash::Device,
    pub(crate) swapchain_loader: swapchain::Device,
    pub(crate) queues: DeviceQueues,
    pub(crate) graphics_command_pool: vk::CommandPool,
}

impl VulkanDevice {
    pub fn create(
        instance: &ash::Instance,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
        requirements: &DeviceRequirements,
    ) -> VkBackendResult<Self> {
        let probe = SurfaceProbe {
            instance,
            surface_loader,
            surface,
        };
        let physical = select_physical_device(&probe, requirements)?;

        info!("creating logical device...");
        let (graphics_family, families) = physical.queue_families.queue_plan()?;
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: if requirements.sampler_anisotropy {
                vk::TRUE
            } else {
                vk::FALSE
            },
            ..Default::default()
        };
        let extension_ptrs: Vec<*const std::ffi::c_char> =
            requirements.extensions.iter().map(|e| e.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: extension_ptrs.len() as u32,
            pp_enabled_extension_names: extension_ptrs.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };

        let device = unsafe { instance.create_device(physical.handle, &create_info, None)? };
        info!("logical device created");

        let qf = physical.queue_families;
        // roles that were not requested fall back to the graphics family
        let queue = |family: Option<u32>| unsafe {
            device.get_device_queue(family.unwrap_or(graphics_family), 0)
        };
        let queues = DeviceQueues {
            graphics: queue(qf.graphics),
            present: queue(qf.present),
            transfer: queue(qf.transfer),
            compute: qf.compute.filter(|_| requirements.compute).map(|f| queue(Some(f))),
        };
        info!("queues obtained");

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: graphics_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let graphics_command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };
        debug!("graphics command pool created");

        let swapchain_loader = swapchain::Device::new(instance, &device);
        Ok(Self {
            instance: instance.clone(),
            surface_loader: surface_loader.clone(),
            surface,
            physical,
            device,
            swapchain_loader,
            queues,
            graphics_command_pool,
        })
    }

    pub fn physical(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    pub fn queues(&self) -> &DeviceQueues {
        &self.queues
    }

    /// Caller guarantees the device is idle and every child object is gone.
    pub fn destroy(self) {
        info!("destroying logical device...");
        unsafe {
            self.device
                .destroy_command_pool(self.graphics_command_pool, None);
            self.device.destroy_device(None);
        }
    }
}
