// SPDX-License-Identifier: CEPL-1.0
//! Presentable image chain: images, views, the shared depth attachment and one
//! framebuffer per image.

use ash::khr::swapchain;
use ash::{vk, Instance};
use chopper_render::RenderSize;
use tracing::{debug, error, info};

use crate::device::{LogicalDevice, QueueFamilies};
use crate::error::{VkResultExt, VulkanError};
use crate::frame::{Acquire, Present};
use crate::image::{self, DepthAttachment};
use crate::instance::Surface;

/// BGRA8 UNORM with sRGB nonlinear if offered, else whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// vsync on: mailbox, else FIFO. vsync off: immediate, then mailbox, then FIFO.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    let prefs: &[vk::PresentModeKHR] = if vsync {
        &[vk::PresentModeKHR::MAILBOX]
    } else {
        &[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX]
    };
    prefs
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
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

/// A minimized window's surface reports a 0-sized current extent, which
/// `vkCreateSwapchainKHR` rejects.
pub fn is_zero_extent(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

/// One more than the minimum, capped by the maximum (0 == "no max").
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

/// Concurrent only when graphics and present live in different families.
pub fn sharing_mode(families: &QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.graphics != families.present {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ChainOptions {
    pub vsync: bool,
    pub depth: bool,
}

pub struct Swapchain {
    loader: swapchain::Device,
    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: Option<DepthAttachment>,
    framebuffers: Vec<vk::Framebuffer>,
    opts: ChainOptions,
}

impl Swapchain {
    pub(crate) unsafe fn create(
        instance: &Instance,
        device: &LogicalDevice,
        surface: &Surface,
        size: RenderSize,
        opts: ChainOptions,
    ) -> Result<Self, VulkanError> {
        let support = unsafe { device.swapchain_support(surface) }?;
        let caps = support.capabilities;
        let format = choose_surface_format(&support.formats).ok_or(VulkanError::NoSurfaceFormat)?;
        let present_mode = choose_present_mode(&support.present_modes, opts.vsync);
        let extent = choose_extent(&caps, size);
        if is_zero_extent(extent) {
            return Err(VulkanError::ZeroAreaSurface);
        }
        let image_count = choose_image_count(&caps);
        let (sharing, family_indices) = sharing_mode(&device.families);

        info!(
            "vk: swapchain format {:?}/{:?}, present mode {:?}, extent {}x{}, images {} (min {})",
            format.format,
            format.color_space,
            present_mode,
            extent.width,
            extent.height,
            image_count,
            caps.min_image_count
        );

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.handle,
            min_image_count: image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing,
            queue_family_index_count: family_indices.len() as u32,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };

        let loader = swapchain::Device::new(instance, &device.device);
        let handle =
            unsafe { loader.create_swapchain(&swap_info, None) }.call("vkCreateSwapchainKHR")?;

        let mut chain = Self {
            loader,
            handle,
            format,
            present_mode,
            extent,
            images: Vec::new(),
            views: Vec::new(),
            depth: None,
            framebuffers: Vec::new(),
            opts,
        };
        match unsafe { chain.create_attachments(device) } {
            Ok(()) => Ok(chain),
            Err(e) => {
                unsafe { chain.destroy(&device.device) };
                Err(e)
            }
        }
    }

    unsafe fn create_attachments(&mut self, device: &LogicalDevice) -> Result<(), VulkanError> {
        let d = &device.device;
        self.images = unsafe { self.loader.get_swapchain_images(self.handle) }
            .call("vkGetSwapchainImagesKHR")?;
        for &img in &self.images {
            let view = unsafe {
                image::create_view(d, img, self.format.format, vk::ImageAspectFlags::COLOR)
            }?;
            self.views.push(view);
        }
        if self.opts.depth {
            self.depth = Some(unsafe { DepthAttachment::new(device, self.extent) }?);
        }
        debug!("vk: {} chain images with views", self.images.len());
        Ok(())
    }

    /// One framebuffer per image: (color view, depth view when present).
    pub(crate) unsafe fn create_framebuffers(
        &mut self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
    ) -> Result<(), VulkanError> {
        unsafe { self.destroy_framebuffers(device) };
        for &view in &self.views {
            let mut attachments = vec![view];
            if let Some(depth) = &self.depth {
                attachments.push(depth.view());
            }
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: self.extent.width,
                height: self.extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = unsafe { device.create_framebuffer(&fb_info, None) }
                .call("vkCreateFramebuffer")?;
            self.framebuffers.push(fb);
        }
        Ok(())
    }

    unsafe fn destroy_framebuffers(&mut self, device: &ash::Device) {
        for fb in self.framebuffers.drain(..) {
            unsafe { device.destroy_framebuffer(fb, None) };
        }
    }

    pub(crate) unsafe fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Acquire {
        match unsafe {
            self.loader
                .acquire_next_image(self.handle, timeout, semaphore, fence)
        } {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    debug!("vk: acquired image {} from a suboptimal chain", index);
                }
                Acquire::Image(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Acquire::OutOfDate,
            Err(e) => {
                error!("critical: vkAcquireNextImageKHR failed: {e}");
                Acquire::Failed
            }
        }
    }

    pub(crate) unsafe fn present(
        &self,
        device: &LogicalDevice,
        wait: vk::Semaphore,
        index: u32,
    ) -> Present {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.handle,
            p_image_indices: &index,
            ..Default::default()
        };
        match unsafe { self.loader.queue_present(device.present_queue, &present) } {
            Ok(false) => Present::Presented,
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Present::Suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Present::OutOfDate,
            Err(e) => {
                error!("vk: vkQueuePresentKHR failed: {e}");
                Present::Failed
            }
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth.as_ref().map(|d| d.format())
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn framebuffer(&self, index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index as usize).copied()
    }

    pub(crate) unsafe fn destroy(mut self, device: &ash::Device) {
        unsafe {
            self.destroy_framebuffers(device);
            for view in self.views.drain(..) {
                device.destroy_image_view(view, None);
            }
            if let Some(depth) = self.depth.take() {
                depth.destroy(device);
            }
            // Images belong to the presentation engine and go with the swapchain.
            self.loader.destroy_swapchain(self.handle, None);
        }
        debug!("vk: swapchain destroyed");
    }
}
