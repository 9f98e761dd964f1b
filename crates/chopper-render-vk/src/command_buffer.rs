// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{VkResultExt, VulkanError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandBufferState {
    NotAllocated,
    Ready,
    Recording,
    InRenderPass,
    Ended,
    Submitted,
}

impl CommandBufferState {
    /// Reset is legal from any state; everything else follows record, end, submit.
    pub fn allows(self, next: Self) -> bool {
        use CommandBufferState::*;
        matches!(
            (self, next),
            (_, Ready | NotAllocated)
                | (Ready, Recording)
                | (Recording, InRenderPass)
                | (InRenderPass, Recording)
                | (Recording, Ended)
                | (Ended, Submitted)
        )
    }
}

pub fn usage_flags(
    single_use: bool,
    render_pass_continue: bool,
    simultaneous_use: bool,
) -> vk::CommandBufferUsageFlags {
    let mut flags = vk::CommandBufferUsageFlags::empty();
    if single_use {
        flags |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
    }
    if render_pass_continue {
        flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
    }
    if simultaneous_use {
        flags |= vk::CommandBufferUsageFlags::SIMULTANEOUS_USE;
    }
    flags
}

/// One primary command stream from the graphics pool.
#[derive(Debug)]
pub struct CommandBuffer {
    handle: vk::CommandBuffer,
    state: CommandBufferState,
}

impl CommandBuffer {
    pub(crate) unsafe fn allocate(
        device: &ash::Device,
        pool: vk::CommandPool,
        count: usize,
    ) -> Result<Vec<Self>, VulkanError> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        let handles = unsafe { device.allocate_command_buffers(&alloc_info) }
            .call("vkAllocateCommandBuffers")?;
        Ok(handles
            .into_iter()
            .map(|handle| Self {
                handle,
                state: CommandBufferState::Ready,
            })
            .collect())
    }

    pub(crate) unsafe fn free_all(device: &ash::Device, pool: vk::CommandPool, bufs: Vec<Self>) {
        let handles: Vec<_> = bufs
            .into_iter()
            .filter(|b| b.state != CommandBufferState::NotAllocated)
            .map(|b| b.handle)
            .collect();
        if !handles.is_empty() {
            unsafe { device.free_command_buffers(pool, &handles) };
        }
    }

    pub(crate) unsafe fn begin(
        &mut self,
        device: &ash::Device,
        single_use: bool,
        render_pass_continue: bool,
        simultaneous_use: bool,
    ) -> Result<(), VulkanError> {
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: usage_flags(single_use, render_pass_continue, simultaneous_use),
            ..Default::default()
        };
        unsafe { device.begin_command_buffer(self.handle, &bi) }.call("vkBeginCommandBuffer")?;
        self.set_state(CommandBufferState::Recording);
        Ok(())
    }

    pub(crate) unsafe fn end(&mut self, device: &ash::Device) -> Result<(), VulkanError> {
        unsafe { device.end_command_buffer(self.handle) }.call("vkEndCommandBuffer")?;
        self.set_state(CommandBufferState::Ended);
        Ok(())
    }

    pub(crate) unsafe fn reset(&mut self, device: &ash::Device) -> Result<(), VulkanError> {
        unsafe { device.reset_command_buffer(self.handle, vk::CommandBufferResetFlags::empty()) }
            .call("vkResetCommandBuffer")?;
        self.set_state(CommandBufferState::Ready);
        Ok(())
    }

    /// Allocates and begins a one-time-submit buffer.
    pub(crate) unsafe fn begin_single_use(
        device: &ash::Device,
        pool: vk::CommandPool,
    ) -> Result<Self, VulkanError> {
        let mut bufs = unsafe { Self::allocate(device, pool, 1) }?;
        let mut cmd = bufs.remove(0);
        if let Err(e) = unsafe { cmd.begin(device, true, false, false) } {
            unsafe { Self::free_all(device, pool, vec![cmd]) };
            return Err(e);
        }
        Ok(cmd)
    }

    /// Ends, submits, waits for the queue to drain, then frees the buffer.
    pub(crate) unsafe fn end_single_use(
        mut self,
        device: &ash::Device,
        pool: vk::CommandPool,
        queue: vk::Queue,
    ) -> Result<(), VulkanError> {
        let result = unsafe {
            self.end(device).and_then(|()| {
                let si = vk::SubmitInfo {
                    s_type: vk::StructureType::SUBMIT_INFO,
                    command_buffer_count: 1,
                    p_command_buffers: &self.handle,
                    ..Default::default()
                };
                device
                    .queue_submit(queue, std::slice::from_ref(&si), vk::Fence::null())
                    .call("vkQueueSubmit")?;
                self.set_state(CommandBufferState::Submitted);
                device.queue_wait_idle(queue).call("vkQueueWaitIdle")
            })
        };
        unsafe { Self::free_all(device, pool, vec![self]) };
        result
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: CommandBufferState) {
        debug_assert!(
            self.state.allows(state),
            "command buffer {:?} -> {:?}",
            self.state,
            state
        );
        self.state = state;
    }
}
