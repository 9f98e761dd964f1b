// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::error::{VkResultExt, VulkanError};

/// Frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSync {
    unsafe fn new(device: &ash::Device) -> Result<Self, VulkanError> {
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        unsafe {
            let image_available = device.create_semaphore(&sem_ci, None).call("vkCreateSemaphore")?;
            let render_finished = match device.create_semaphore(&sem_ci, None) {
                Ok(s) => s,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(VulkanError::Call {
                        call: "vkCreateSemaphore",
                        result: e,
                    });
                }
            };
            let in_flight = match device.create_fence(&fence_ci, None) {
                Ok(f) => f,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                    return Err(VulkanError::Call {
                        call: "vkCreateFence",
                        result: e,
                    });
                }
            };
            Ok(Self {
                image_available,
                render_finished,
                in_flight,
            })
        }
    }

    unsafe fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}

/// Per-slot semaphores and fences, fences created signaled.
#[derive(Debug)]
pub struct FrameSyncSet {
    slots: Vec<FrameSync>,
}

impl FrameSyncSet {
    pub(crate) unsafe fn create(device: &ash::Device) -> Result<Self, VulkanError> {
        let mut set = Self {
            slots: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
        };
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            match unsafe { FrameSync::new(device) } {
                Ok(s) => set.slots.push(s),
                Err(e) => {
                    unsafe { set.release(device) };
                    return Err(e);
                }
            }
        }
        debug!("vk: {} frame sync slots created", MAX_FRAMES_IN_FLIGHT);
        Ok(set)
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSync> {
        self.slots.get(index)
    }

    pub(crate) unsafe fn wait(&self, device: &ash::Device, index: usize) -> Result<(), VulkanError> {
        let s = self.slots.get(index).ok_or(VulkanError::Missing("frame sync slot"))?;
        unsafe { device.wait_for_fences(&[s.in_flight], true, u64::MAX) }.call("vkWaitForFences")
    }

    pub(crate) unsafe fn reset(&self, device: &ash::Device, index: usize) -> Result<(), VulkanError> {
        let s = self.slots.get(index).ok_or(VulkanError::Missing("frame sync slot"))?;
        unsafe { device.reset_fences(&[s.in_flight]) }.call("vkResetFences")
    }

    /// Replaces one slot's objects with fresh ones (fence signaled). The device must be idle.
    pub(crate) unsafe fn rebuild(&mut self, device: &ash::Device, index: usize) -> Result<(), VulkanError> {
        let fresh = unsafe { FrameSync::new(device) }?;
        match self.slots.get_mut(index) {
            Some(slot) => {
                let old = std::mem::replace(slot, fresh);
                unsafe { old.destroy(device) };
                Ok(())
            }
            None => {
                unsafe { fresh.destroy(device) };
                Err(VulkanError::Missing("frame sync slot"))
            }
        }
    }

    pub(crate) unsafe fn release(mut self, device: &ash::Device) {
        for s in self.slots.drain(..) {
            unsafe { s.destroy(device) };
        }
        debug!("vk: frame sync objects released");
    }
}
