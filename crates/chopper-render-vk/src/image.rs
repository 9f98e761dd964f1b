// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::trace;

use crate::device::{has_stencil, LogicalDevice};
use crate::error::{VkResultExt, VulkanError};

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub memory_flags: vk::MemoryPropertyFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// A 2-D image with its own memory and a single view.
/// A zero-area request yields an image with nothing allocated.
#[derive(Debug)]
pub struct Image {
    handle: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    extent: vk::Extent2D,
    format: vk::Format,
}

pub fn needs_allocation(extent: vk::Extent2D) -> bool {
    extent.width > 0 && extent.height > 0
}

impl Image {
    /// Placeholder carrying the description but no device objects.
    pub fn unallocated(desc: &ImageDesc) -> Self {
        Self {
            handle: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            extent: desc.extent,
            format: desc.format,
        }
    }

    pub(crate) unsafe fn new(device: &LogicalDevice, desc: &ImageDesc) -> Result<Self, VulkanError> {
        let mut out = Self::unallocated(desc);
        if !needs_allocation(desc.extent) {
            trace!("vk: skipping zero-area image");
            return Ok(out);
        }

        // On failure `out` holds whatever was created so far.
        match unsafe { out.allocate(device, desc) } {
            Ok(()) => Ok(out),
            Err(e) => {
                unsafe { out.destroy(&device.device) };
                Err(e)
            }
        }
    }

    unsafe fn allocate(&mut self, device: &LogicalDevice, desc: &ImageDesc) -> Result<(), VulkanError> {
        let d = &device.device;
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: desc.tiling,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        self.handle = unsafe { d.create_image(&img_ci, None) }.call("vkCreateImage")?;

        let req = unsafe { d.get_image_memory_requirements(self.handle) };
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: device.find_memory_type(req.memory_type_bits, desc.memory_flags)?,
            ..Default::default()
        };
        self.memory = unsafe { d.allocate_memory(&alloc, None) }.call("vkAllocateMemory")?;
        unsafe { d.bind_image_memory(self.handle, self.memory, 0) }.call("vkBindImageMemory")?;

        self.view = unsafe { create_view(d, self.handle, desc.format, desc.aspect) }?;
        Ok(())
    }

    pub fn is_allocated(&self) -> bool {
        self.handle != vk::Image::null()
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub(crate) unsafe fn destroy(self, device: &ash::Device) {
        unsafe {
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
            }
            if self.handle != vk::Image::null() {
                device.destroy_image(self.handle, None);
            }
            if self.memory != vk::DeviceMemory::null() {
                device.free_memory(self.memory, None);
            }
        }
    }
}

pub(crate) unsafe fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<vk::ImageView, VulkanError> {
    let view_ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    unsafe { device.create_image_view(&view_ci, None) }.call("vkCreateImageView")
}

pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Device-local depth buffer shared by every framebuffer of the chain.
#[derive(Debug)]
pub struct DepthAttachment {
    image: Image,
}

impl DepthAttachment {
    pub(crate) unsafe fn new(device: &LogicalDevice, extent: vk::Extent2D) -> Result<Self, VulkanError> {
        let format = device.depth_format;
        let desc = ImageDesc {
            extent,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            memory_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            aspect: depth_aspect(format),
        };
        Ok(Self {
            image: unsafe { Image::new(device, &desc) }?,
        })
    }

    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }

    pub(crate) unsafe fn destroy(self, device: &ash::Device) {
        unsafe { self.image.destroy(device) };
    }
}
