// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection and the logical device that owns the queues and
//! the graphics command pool.

use std::ffi::CStr;

use ash::khr::swapchain;
use ash::{vk, Instance};
use chopper_render::RendererConfig;
use tracing::{debug, error, info};

use crate::error::{VkResultExt, VulkanError};
use crate::instance::Surface;

/// Queue family per role; `None` when the device has no family for it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub transfer: Option<u32>,
    pub compute: Option<u32>,
}

/// Families of a device that passed selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
}

impl QueueFamilyIndices {
    /// `present_support[i]` says whether family `i` can present to the surface.
    pub fn from_families(families: &[vk::QueueFamilyProperties], present_support: &[bool]) -> Self {
        let mut out = Self::default();
        let mut best_transfer_score = u32::MAX;

        for (i, family) in families.iter().enumerate() {
            let i = i as u32;
            let flags = family.queue_flags;
            let mut score = 0;

            if flags.contains(vk::QueueFlags::GRAPHICS) {
                out.graphics.get_or_insert(i);
                score += 1;
            }
            if flags.contains(vk::QueueFlags::COMPUTE) {
                out.compute.get_or_insert(i);
                score += 1;
            }
            // Fewer other capabilities wins; a transfer-only family scores 0.
            if flags.contains(vk::QueueFlags::TRANSFER) && score < best_transfer_score {
                best_transfer_score = score;
                out.transfer = Some(i);
            }
        }

        let can_present = |i: u32| present_support.get(i as usize).copied().unwrap_or(false);
        out.present = match out.graphics {
            Some(g) if can_present(g) => Some(g),
            _ => (0..families.len() as u32).find(|&i| can_present(i)),
        };
        out
    }

    pub fn resolve(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
            transfer: self.transfer?,
        })
    }
}

impl QueueFamilies {
    /// `(family, queue count)` per distinct family, graphics first.
    pub fn queue_requests(&self, graphics_family_size: u32) -> Vec<(u32, u32)> {
        let mut out: Vec<(u32, u32)> = Vec::with_capacity(3);
        for family in [self.graphics, self.present, self.transfer] {
            if out.iter().any(|&(f, _)| f == family) {
                continue;
            }
            let count = if family == self.graphics {
                graphics_family_size.clamp(1, 2)
            } else {
                1
            };
            out.push((family, count));
        }
        out
    }
}

#[derive(Clone, Debug, Default)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub(crate) unsafe fn query(
        surface: &Surface,
        phys: vk::PhysicalDevice,
    ) -> Result<Self, VulkanError> {
        let l = &surface.loader;
        unsafe {
            Ok(Self {
                capabilities: l
                    .get_physical_device_surface_capabilities(phys, surface.handle)
                    .call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                formats: l
                    .get_physical_device_surface_formats(phys, surface.handle)
                    .call("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                present_modes: l
                    .get_physical_device_surface_present_modes(phys, surface.handle)
                    .call("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            })
        }
    }

    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct DeviceRequirements {
    pub graphics: bool,
    pub present: bool,
    pub transfer: bool,
    pub compute: bool,
    pub discrete_gpu: bool,
    pub sampler_anisotropy: bool,
    pub extensions: Vec<&'static CStr>,
}

impl DeviceRequirements {
    pub fn from_config(cfg: &RendererConfig) -> Self {
        Self {
            graphics: true,
            present: true,
            transfer: true,
            compute: false,
            discrete_gpu: cfg.require_discrete_gpu,
            sampler_anisotropy: cfg.require_sampler_anisotropy,
            extensions: vec![swapchain::NAME],
        }
    }
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self::from_config(&RendererConfig::default())
    }
}

/// Everything selection needs to know about one physical device.
#[derive(Clone, Debug)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub queue_indices: QueueFamilyIndices,
    pub swapchain_support: SwapchainSupportDetails,
    pub extensions: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    NotDiscrete,
    MissingQueue(&'static str),
    NoSwapchainSupport,
    MissingExtension,
    NoSamplerAnisotropy,
}

impl PhysicalDeviceCandidate {
    unsafe fn gather(
        instance: &Instance,
        surface: &Surface,
        handle: vk::PhysicalDevice,
    ) -> Result<Self, VulkanError> {
        unsafe {
            let properties = instance.get_physical_device_properties(handle);
            let queue_families = instance.get_physical_device_queue_family_properties(handle);
            let present_support: Vec<bool> = (0..queue_families.len() as u32)
                .map(|i| {
                    surface
                        .loader
                        .get_physical_device_surface_support(handle, i, surface.handle)
                        .unwrap_or(false)
                })
                .collect();
            let extensions = instance
                .enumerate_device_extension_properties(handle)
                .call("vkEnumerateDeviceExtensionProperties")?
                .iter()
                .filter_map(|e| e.extension_name_as_c_str().ok())
                .map(|n| n.to_string_lossy().into_owned())
                .collect();

            Ok(Self {
                handle,
                name: properties
                    .device_name_as_c_str()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                properties,
                features: instance.get_physical_device_features(handle),
                memory: instance.get_physical_device_memory_properties(handle),
                queue_indices: QueueFamilyIndices::from_families(&queue_families, &present_support),
                queue_families,
                swapchain_support: SwapchainSupportDetails::query(surface, handle)
                    .unwrap_or_default(),
                extensions,
            })
        }
    }

    /// Checks run in a fixed order; the first failing one is reported.
    pub fn check(&self, req: &DeviceRequirements) -> Result<(), Rejection> {
        if req.discrete_gpu && self.properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
            return Err(Rejection::NotDiscrete);
        }

        let q = &self.queue_indices;
        for (wanted, found, role) in [
            (req.graphics, q.graphics, "graphics"),
            (req.present, q.present, "present"),
            (req.compute, q.compute, "compute"),
            (req.transfer, q.transfer, "transfer"),
        ] {
            if wanted && found.is_none() {
                return Err(Rejection::MissingQueue(role));
            }
        }

        if !self.swapchain_support.is_adequate() {
            return Err(Rejection::NoSwapchainSupport);
        }

        let has_all = req.extensions.iter().all(|want| {
            let want = want.to_string_lossy();
            self.extensions.iter().any(|e| *e == want)
        });
        if !has_all {
            return Err(Rejection::MissingExtension);
        }

        if req.sampler_anisotropy && self.features.sampler_anisotropy != vk::TRUE {
            return Err(Rejection::NoSamplerAnisotropy);
        }
        Ok(())
    }
}

/// First candidate that meets every requirement, in enumeration order.
pub fn select_candidate<'a>(
    candidates: &'a [PhysicalDeviceCandidate],
    req: &DeviceRequirements,
) -> Option<&'a PhysicalDeviceCandidate> {
    candidates.iter().find(|c| match c.check(req) {
        Ok(()) => true,
        Err(why) => {
            info!("vk: skipping device '{}': {:?}", c.name, why);
            false
        }
    })
}

pub fn find_memory_type_index(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && memory.memory_types[i as usize].property_flags.contains(flags)
    })
}

pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub fn choose_depth_format(
    candidates: &[vk::Format],
    mut props: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&f| {
        let p = props(f);
        let want = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        p.linear_tiling_features.contains(want) || p.optimal_tiling_features.contains(want)
    })
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

fn version_string(v: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(v),
        vk::api_version_minor(v),
        vk::api_version_patch(v)
    )
}

fn log_picked(c: &PhysicalDeviceCandidate) {
    info!("vk: picked device '{}' ({:?})", c.name, c.properties.device_type);
    info!("vk: driver version {}", version_string(c.properties.driver_version));
    info!("vk: API version {}", version_string(c.properties.api_version));
    for heap in &c.memory.memory_heaps[..c.memory.memory_heap_count as usize] {
        let gib = heap.size as f64 / (1024.0 * 1024.0 * 1024.0);
        if heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL) {
            info!("vk: local GPU memory {:.2} GiB", gib);
        } else {
            info!("vk: shared system memory {:.2} GiB", gib);
        }
    }
}

pub struct LogicalDevice {
    pub(crate) physical: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) families: QueueFamilies,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
    pub(crate) transfer_queue: vk::Queue,
    pub(crate) command_pool: vk::CommandPool,
    pub(crate) memory: vk::PhysicalDeviceMemoryProperties,
    pub(crate) depth_format: vk::Format,
}

impl LogicalDevice {
    /// Picks the first suitable GPU and creates the device, queues and command pool.
    pub(crate) unsafe fn select_and_create(
        instance: &Instance,
        surface: &Surface,
        req: &DeviceRequirements,
    ) -> Result<Self, VulkanError> {
        let handles =
            unsafe { instance.enumerate_physical_devices() }.call("vkEnumeratePhysicalDevices")?;
        if handles.is_empty() {
            error!("critical: no devices with Vulkan support found");
            return Err(VulkanError::NoSuitableDevice);
        }

        let mut candidates = Vec::with_capacity(handles.len());
        for h in handles {
            candidates.push(unsafe { PhysicalDeviceCandidate::gather(instance, surface, h) }?);
        }
        let Some(picked) = select_candidate(&candidates, req) else {
            error!("critical: no device satisfies the renderer requirements");
            return Err(VulkanError::NoSuitableDevice);
        };
        log_picked(picked);

        let families = picked
            .queue_indices
            .resolve()
            .ok_or(VulkanError::NoSuitableDevice)?;
        let graphics_size = picked.queue_families[families.graphics as usize].queue_count;
        let requests = families.queue_requests(graphics_size);

        let priorities = [1.0_f32, 1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = requests
            .iter()
            .map(|&(family, count)| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: count,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: if req.sampler_anisotropy { vk::TRUE } else { vk::FALSE },
            ..Default::default()
        };
        let ext_ptrs: Vec<_> = req.extensions.iter().map(|e| e.as_ptr()).collect();

        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };

        let device = unsafe { instance.create_device(picked.handle, &dinfo, None) }
            .call("vkCreateDevice")?;
        debug!("vk: logical device created, queues {:?}", requests);

        let (graphics_queue, present_queue, transfer_queue) = unsafe {
            (
                device.get_device_queue(families.graphics, 0),
                device.get_device_queue(families.present, 0),
                device.get_device_queue(families.transfer, 0),
            )
        };

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: families.graphics,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(p) => p,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(VulkanError::Call {
                    call: "vkCreateCommandPool",
                    result: e,
                });
            }
        };
        debug!("vk: command pool created");

        let phys = picked.handle;
        let depth_format = choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |f| unsafe {
            instance.get_physical_device_format_properties(phys, f)
        })
        .unwrap_or_else(|| {
            error!("vk: no supported depth format, falling back to D32_SFLOAT");
            vk::Format::D32_SFLOAT
        });
        debug!("vk: depth format {:?}", depth_format);

        Ok(Self {
            physical: phys,
            device,
            families,
            graphics_queue,
            present_queue,
            transfer_queue,
            command_pool,
            memory: picked.memory,
            depth_format,
        })
    }

    pub(crate) fn find_memory_type(
        &self,
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<u32, VulkanError> {
        find_memory_type_index(&self.memory, type_bits, flags)
            .ok_or(VulkanError::NoMemoryType { type_bits, flags })
    }

    pub(crate) unsafe fn swapchain_support(
        &self,
        surface: &Surface,
    ) -> Result<SwapchainSupportDetails, VulkanError> {
        unsafe { SwapchainSupportDetails::query(surface, self.physical) }
    }

    /// Queue of the transfer family. Same handle as the graphics queue when the
    /// families coincide.
    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    pub(crate) fn wait_idle(&self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            error!("vk: vkDeviceWaitIdle failed: {e}");
        }
    }

    pub(crate) unsafe fn destroy(self) {
        debug!("vk: destroying command pool and logical device");
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    fn gct() -> vk::QueueFlags {
        vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER
    }

    fn candidate(name: &str, ty: vk::PhysicalDeviceType) -> PhysicalDeviceCandidate {
        let families = vec![family(gct(), 16), family(vk::QueueFlags::TRANSFER, 2)];
        PhysicalDeviceCandidate {
            handle: vk::PhysicalDevice::null(),
            name: name.to_owned(),
            properties: vk::PhysicalDeviceProperties {
                device_type: ty,
                ..Default::default()
            },
            features: vk::PhysicalDeviceFeatures {
                sampler_anisotropy: vk::TRUE,
                ..Default::default()
            },
            memory: Default::default(),
            queue_indices: QueueFamilyIndices::from_families(&families, &[true, false]),
            queue_families: families,
            swapchain_support: SwapchainSupportDetails {
                capabilities: Default::default(),
                formats: vec![vk::SurfaceFormatKHR::default()],
                present_modes: vec![vk::PresentModeKHR::FIFO],
            },
            extensions: vec!["VK_KHR_swapchain".to_owned()],
        }
    }

    #[test]
    fn dedicated_transfer_family_is_preferred() {
        let families = [
            family(gct(), 16),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 8),
            family(vk::QueueFlags::TRANSFER, 2),
        ];
        let q = QueueFamilyIndices::from_families(&families, &[true, false, false]);
        assert_eq!(q.graphics, Some(0));
        assert_eq!(q.compute, Some(0));
        assert_eq!(q.transfer, Some(2));
        assert_eq!(q.present, Some(0));
    }

    #[test]
    fn first_of_equally_specialized_transfer_families_wins() {
        let families = [
            family(gct(), 16),
            family(vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::TRANSFER, 2),
        ];
        let q = QueueFamilyIndices::from_families(&families, &[true, true, true]);
        assert_eq!(q.transfer, Some(1));
    }

    #[test]
    fn present_falls_back_when_graphics_cannot_present() {
        let families = [family(gct(), 16), family(vk::QueueFlags::COMPUTE, 4)];
        let q = QueueFamilyIndices::from_families(&families, &[false, true]);
        assert_eq!(q.graphics, Some(0));
        assert_eq!(q.present, Some(1));
        assert_eq!(q.transfer, Some(0));
    }

    #[test]
    fn missing_roles_stay_none() {
        let families = [family(vk::QueueFlags::COMPUTE, 1)];
        let q = QueueFamilyIndices::from_families(&families, &[false]);
        assert_eq!(q.graphics, None);
        assert_eq!(q.present, None);
        assert_eq!(q.transfer, None);
        assert!(q.resolve().is_none());
    }

    #[test]
    fn one_request_per_unique_family() {
        let f = QueueFamilies {
            graphics: 0,
            present: 0,
            transfer: 2,
        };
        assert_eq!(f.queue_requests(16), vec![(0, 2), (2, 1)]);
        assert_eq!(f.queue_requests(1), vec![(0, 1), (2, 1)]);

        let f = QueueFamilies {
            graphics: 0,
            present: 1,
            transfer: 1,
        };
        assert_eq!(f.queue_requests(4), vec![(0, 2), (1, 1)]);
    }

    #[test]
    fn first_qualifying_device_wins() {
        let req = DeviceRequirements::default();
        let list = vec![
            candidate("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU),
            candidate("dgpu-a", vk::PhysicalDeviceType::DISCRETE_GPU),
            candidate("dgpu-b", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        assert_eq!(select_candidate(&list, &req).map(|c| c.name.as_str()), Some("dgpu-a"));
    }

    #[test]
    fn none_qualifying_fails() {
        let req = DeviceRequirements::default();
        let mut no_aniso = candidate("a", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_aniso.features.sampler_anisotropy = vk::FALSE;
        let mut no_swapchain = candidate("b", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_swapchain.extensions.clear();
        let mut no_modes = candidate("c", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_modes.swapchain_support.present_modes.clear();
        let mut no_present = candidate("d", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_present.queue_indices.present = None;

        assert_eq!(no_aniso.check(&req), Err(Rejection::NoSamplerAnisotropy));
        assert_eq!(no_swapchain.check(&req), Err(Rejection::MissingExtension));
        assert_eq!(no_modes.check(&req), Err(Rejection::NoSwapchainSupport));
        assert_eq!(no_present.check(&req), Err(Rejection::MissingQueue("present")));

        let list = vec![no_aniso, no_swapchain, no_modes, no_present];
        assert!(select_candidate(&list, &req).is_none());
        assert!(select_candidate(&[], &req).is_none());
    }

    #[test]
    fn discrete_requirement_is_configurable() {
        let cfg = RendererConfig {
            require_discrete_gpu: false,
            ..Default::default()
        };
        let req = DeviceRequirements::from_config(&cfg);
        let list = vec![candidate("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU)];
        assert_eq!(select_candidate(&list, &req).map(|c| c.name.as_str()), Some("igpu"));
    }

    #[test]
    fn discrete_check_comes_first() {
        let mut c = candidate("cpu", vk::PhysicalDeviceType::CPU);
        c.extensions.clear();
        assert_eq!(c.check(&DeviceRequirements::default()), Err(Rejection::NotDiscrete));
    }

    #[test]
    fn memory_type_respects_filter_and_flags() {
        let mut mem = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        mem.memory_types[0].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        mem.memory_types[1].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        mem.memory_types[2].property_flags =
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE;

        let local = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        assert_eq!(find_memory_type_index(&mem, 0b111, local), Some(1));
        assert_eq!(find_memory_type_index(&mem, 0b101, local), Some(2));
        assert_eq!(find_memory_type_index(&mem, 0b001, local), None);
    }

    #[test]
    fn depth_format_takes_first_supported() {
        let picked = choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |f| {
            if f == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatProperties {
                    linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                    ..Default::default()
                }
            } else {
                vk::FormatProperties::default()
            }
        });
        assert_eq!(picked, Some(vk::Format::D24_UNORM_S8_UINT));
        assert!(choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |_| Default::default()).is_none());
    }

    #[test]
    fn stencil_formats() {
        assert!(has_stencil(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil(vk::Format::D32_SFLOAT));
    }
}
