// SPDX-License-Identifier: CEPL-1.0
//! Owns every Vulkan object of the renderer and performs the GPU side of a frame.

use ash::vk::{self, Handle};
use ash::{Entry, Instance};
use chopper_render::{RenderSize, RendererConfig};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, warn};

use crate::command_buffer::{CommandBuffer, CommandBufferState};
use crate::device::{DeviceRequirements, LogicalDevice};
use crate::error::{VkResultExt, VulkanError};
use crate::frame::{Acquire, FrameContext, Present, Rebuild, TeardownStep, TEARDOWN_ORDER};
use crate::instance::{self, DebugMessenger, Surface};
use crate::render_pass::RenderPass;
use crate::swapchain::{self, ChainOptions, Swapchain};
use crate::sync::FrameSyncSet;

pub fn full_area(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Negative height puts the origin bottom-left with Y up.
pub fn flipped_viewport(size: RenderSize) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: size.height as f32,
        width: size.width as f32,
        height: -(size.height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

fn to_size(extent: vk::Extent2D) -> RenderSize {
    RenderSize::new(extent.width, extent.height)
}

/// Objects are held in `Option`s so that a half-built context, a failed chain
/// rebuild and an explicit shutdown all tear down through the same path.
pub struct VulkanContext {
    config: RendererConfig,
    recreating: bool,
    sync: Option<FrameSyncSet>,
    command_buffers: Vec<CommandBuffer>,
    render_pass: Option<RenderPass>,
    chain: Option<Swapchain>,
    device: Option<LogicalDevice>,
    surface: Option<Surface>,
    debug: Option<DebugMessenger>,
    instance: Option<Instance>,
    entry: Entry,
}

impl VulkanContext {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RendererConfig,
    ) -> Result<Self, VulkanError> {
        let display = display.display_handle()?.as_raw();
        let window = window.window_handle()?.as_raw();

        let mut ctx = Self {
            config: cfg.clone(),
            recreating: false,
            sync: None,
            command_buffers: Vec::new(),
            render_pass: None,
            chain: None,
            device: None,
            surface: None,
            debug: None,
            instance: None,
            entry: instance::load_entry()?,
        };
        // On error `ctx` drops and releases whatever was created.
        unsafe { ctx.init(display, window, size) }?;
        Ok(ctx)
    }

    unsafe fn init(
        &mut self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        size: RenderSize,
    ) -> Result<(), VulkanError> {
        let cfg = &self.config;

        let (instance, validation) =
            unsafe { instance::create_instance(&self.entry, display, &cfg.app_name) }?;
        let instance = self.instance.insert(instance);

        if validation {
            match unsafe { DebugMessenger::new(&self.entry, instance) } {
                Ok(m) => {
                    self.debug = Some(m);
                    debug!("vk: debug messenger created");
                }
                Err(e) => warn!("vk: debug messenger unavailable: {e}"),
            }
        }

        let surface =
            self.surface.insert(unsafe { Surface::new(&self.entry, instance, display, window) }?);
        debug!("vk: surface created");

        let req = DeviceRequirements::from_config(cfg);
        let device =
            self.device.insert(unsafe { LogicalDevice::select_and_create(instance, surface, &req) }?);

        let opts = ChainOptions {
            vsync: cfg.vsync,
            depth: cfg.depth_attachment,
        };
        let chain =
            self.chain.insert(unsafe { Swapchain::create(instance, device, surface, size, opts) }?);

        let render_pass = self.render_pass.insert(unsafe {
            RenderPass::create(
                &device.device,
                chain.format(),
                chain.depth_format(),
                full_area(chain.extent()),
                cfg.clear_color,
                cfg.clear_depth,
                cfg.clear_stencil,
            )
        }?);
        unsafe { chain.create_framebuffers(&device.device, render_pass.handle()) }?;

        self.command_buffers = unsafe {
            CommandBuffer::allocate(&device.device, device.command_pool, chain.image_count())
        }?;
        debug!("vk: {} command buffers allocated", self.command_buffers.len());

        self.sync = Some(unsafe { FrameSyncSet::create(&device.device) }?);

        info!(
            "vk: context ready: {} images at {}, {:?}",
            chain.image_count(),
            to_size(chain.extent()),
            chain.present_mode()
        );
        Ok(())
    }

    fn device(&self) -> Result<&LogicalDevice, VulkanError> {
        self.device.as_ref().ok_or(VulkanError::Missing("logical device"))
    }

    fn sync(&self) -> Result<&FrameSyncSet, VulkanError> {
        self.sync.as_ref().ok_or(VulkanError::Missing("frame sync"))
    }

    /// Size of the current chain, zero when there is none.
    pub fn extent(&self) -> RenderSize {
        self.chain
            .as_ref()
            .map(|c| to_size(c.extent()))
            .unwrap_or_default()
    }

    /// Records `record` into a throwaway command buffer, submits it on the graphics
    /// queue and blocks until the queue drains.
    pub fn immediate_submit<F>(&self, record: F) -> Result<(), VulkanError>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = self.device()?;
        unsafe {
            let cmd = CommandBuffer::begin_single_use(&device.device, device.command_pool)?;
            record(&device.device, cmd.handle());
            cmd.end_single_use(&device.device, device.command_pool, device.graphics_queue)
        }
    }

    /// New clear color for the main pass, applied from the next frame on.
    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.config.clear_color = rgba;
        if let Some(rp) = self.render_pass.as_mut() {
            rp.set_clear_color(rgba);
        }
    }

    /// Destroys the chain-sized objects and builds them again. The device must be idle.
    /// A surface with no area keeps the old chain untouched.
    unsafe fn rebuild_chain(&mut self, size: RenderSize) -> Result<Rebuild, VulkanError> {
        let (Some(instance), Some(surface), Some(device)) =
            (&self.instance, &self.surface, &self.device)
        else {
            return Err(VulkanError::Missing("logical device"));
        };
        let d = &device.device;
        let cfg = &self.config;

        let support = unsafe { device.swapchain_support(surface) }?;
        if swapchain::is_zero_extent(swapchain::choose_extent(&support.capabilities, size)) {
            debug!("vk: surface has zero area, chain kept");
            return Ok(Rebuild::ZeroArea);
        }

        unsafe {
            CommandBuffer::free_all(d, device.command_pool, std::mem::take(&mut self.command_buffers));
            if let Some(old) = self.chain.take() {
                old.destroy(d);
            }
        }

        let opts = ChainOptions {
            vsync: cfg.vsync,
            depth: cfg.depth_attachment,
        };
        let mut chain = unsafe { Swapchain::create(instance, device, surface, size, opts) }?;

        // A new surface format means the pass no longer matches its attachments.
        let stale = self.render_pass.as_ref().map_or(true, |rp| {
            rp.color_format() != chain.format() || rp.depth_format() != chain.depth_format()
        });
        if stale {
            if let Some(rp) = self.render_pass.take() {
                unsafe { rp.release(d) };
            }
            let created = unsafe {
                RenderPass::create(
                    d,
                    chain.format(),
                    chain.depth_format(),
                    full_area(chain.extent()),
                    cfg.clear_color,
                    cfg.clear_depth,
                    cfg.clear_stencil,
                )
            };
            match created {
                Ok(rp) => self.render_pass = Some(rp),
                Err(e) => {
                    unsafe { chain.destroy(d) };
                    return Err(e);
                }
            }
        }
        let Some(render_pass) = self.render_pass.as_mut() else {
            unsafe { chain.destroy(d) };
            return Err(VulkanError::Missing("render pass"));
        };
        render_pass.set_render_area(full_area(chain.extent()));

        if let Err(e) = unsafe { chain.create_framebuffers(d, render_pass.handle()) } {
            unsafe { chain.destroy(d) };
            return Err(e);
        }
        let chain = self.chain.insert(chain);

        self.command_buffers =
            unsafe { CommandBuffer::allocate(d, device.command_pool, chain.image_count()) }?;

        info!(
            "vk: chain rebuilt: {} images at {}",
            chain.image_count(),
            to_size(chain.extent())
        );
        Ok(Rebuild::Ready(to_size(chain.extent())))
    }
}

impl FrameContext for VulkanContext {
    fn is_recreating(&self) -> bool {
        self.recreating
    }

    fn wait_idle(&mut self) {
        if let Some(device) = &self.device {
            device.wait_idle();
        }
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<(), VulkanError> {
        let device = self.device()?;
        unsafe { self.sync()?.wait(&device.device, slot) }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<(), VulkanError> {
        let device = self.device()?;
        unsafe { self.sync()?.reset(&device.device, slot) }
    }

    fn rebuild_slot(&mut self, slot: usize) -> Result<(), VulkanError> {
        let (Some(device), Some(sync)) = (&self.device, &mut self.sync) else {
            return Err(VulkanError::Missing("frame sync"));
        };
        unsafe { sync.rebuild(&device.device, slot) }?;
        warn!("vk: frame slot {} rebuilt", slot);
        Ok(())
    }

    fn acquire(&mut self, slot: usize) -> Acquire {
        let (Some(chain), Some(sync)) = (&self.chain, &self.sync) else {
            error!("vk: acquire without a swapchain");
            return Acquire::Failed;
        };
        let Some(s) = sync.slot(slot) else {
            error!("vk: no frame sync slot {}", slot);
            return Acquire::Failed;
        };
        unsafe { chain.acquire_next_image(u64::MAX, s.image_available, vk::Fence::null()) }
    }

    fn begin_commands(&mut self, image: u32) -> Result<(), VulkanError> {
        let Some(device) = &self.device else {
            return Err(VulkanError::Missing("logical device"));
        };
        let cb = self
            .command_buffers
            .get_mut(image as usize)
            .ok_or(VulkanError::Missing("command buffer"))?;
        unsafe {
            cb.reset(&device.device)?;
            cb.begin(&device.device, false, false, false)
        }
    }

    fn set_viewport(&mut self, image: u32, extent: RenderSize) -> Result<(), VulkanError> {
        let device = self.device()?;
        let cb = self
            .command_buffers
            .get(image as usize)
            .ok_or(VulkanError::Missing("command buffer"))?;
        let viewport = flipped_viewport(extent);
        let scissor = full_area(vk::Extent2D {
            width: extent.width,
            height: extent.height,
        });
        unsafe {
            device.device.cmd_set_viewport(cb.handle(), 0, &[viewport]);
            device.device.cmd_set_scissor(cb.handle(), 0, &[scissor]);
        }
        Ok(())
    }

    fn begin_render_pass(&mut self, image: u32, extent: RenderSize) -> Result<(), VulkanError> {
        let device = self.device.as_ref().ok_or(VulkanError::Missing("logical device"))?;
        let framebuffer = self
            .chain
            .as_ref()
            .and_then(|c| c.framebuffer(image))
            .ok_or(VulkanError::Missing("framebuffer"))?;
        let rp = self.render_pass.as_mut().ok_or(VulkanError::Missing("render pass"))?;
        let cb = self
            .command_buffers
            .get_mut(image as usize)
            .ok_or(VulkanError::Missing("command buffer"))?;
        rp.set_render_area(full_area(vk::Extent2D {
            width: extent.width,
            height: extent.height,
        }));
        unsafe { rp.begin(&device.device, cb.handle(), framebuffer) };
        cb.set_state(CommandBufferState::InRenderPass);
        Ok(())
    }

    fn command_stream(&self, image: u32) -> u64 {
        self.command_buffers
            .get(image as usize)
            .map(|c| c.handle().as_raw())
            .unwrap_or(0)
    }

    fn end_render_pass(&mut self, image: u32) {
        let (Some(device), Some(rp), Some(cb)) = (
            &self.device,
            self.render_pass.as_mut(),
            self.command_buffers.get_mut(image as usize),
        ) else {
            return;
        };
        if cb.state() != CommandBufferState::InRenderPass {
            error!("vk: image {} is not inside a render pass", image);
            return;
        }
        unsafe { rp.end(&device.device, cb.handle()) };
        cb.set_state(CommandBufferState::Recording);
    }

    fn end_commands(&mut self, image: u32) -> Result<(), VulkanError> {
        let Some(device) = &self.device else {
            return Err(VulkanError::Missing("logical device"));
        };
        let cb = self
            .command_buffers
            .get_mut(image as usize)
            .ok_or(VulkanError::Missing("command buffer"))?;
        unsafe { cb.end(&device.device) }
    }

    fn submit(&mut self, slot: usize, image: u32) -> Result<(), VulkanError> {
        let (Some(device), Some(sync)) = (&self.device, &self.sync) else {
            return Err(VulkanError::Missing("frame sync"));
        };
        let s = sync.slot(slot).ok_or(VulkanError::Missing("frame sync slot"))?;
        let cb = self
            .command_buffers
            .get_mut(image as usize)
            .ok_or(VulkanError::Missing("command buffer"))?;

        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let handle = cb.handle();
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.image_available,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &handle,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.render_finished,
            ..Default::default()
        };
        unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, std::slice::from_ref(&submit), s.in_flight)
        }
        .call("vkQueueSubmit")?;
        cb.set_state(CommandBufferState::Submitted);
        Ok(())
    }

    fn present(&mut self, slot: usize, image: u32) -> Present {
        let (Some(device), Some(chain), Some(sync)) = (&self.device, &self.chain, &self.sync)
        else {
            return Present::Failed;
        };
        let Some(s) = sync.slot(slot) else {
            return Present::Failed;
        };
        unsafe { chain.present(device, s.render_finished, image) }
    }

    fn recreate_chain(&mut self, size: RenderSize) -> Result<Rebuild, VulkanError> {
        self.recreating = true;
        let result = unsafe { self.rebuild_chain(size) };
        self.recreating = result.is_err();
        result
    }

    fn image_count(&self) -> usize {
        self.chain.as_ref().map_or(0, |c| c.image_count())
    }

    fn teardown(&mut self, step: TeardownStep) {
        let d = self.device.as_ref().map(|d| &d.device);
        match step {
            TeardownStep::SyncObjects => {
                if let (Some(sync), Some(d)) = (self.sync.take(), d) {
                    unsafe { sync.release(d) };
                }
            }
            TeardownStep::RenderPass => {
                if let (Some(rp), Some(d)) = (self.render_pass.take(), d) {
                    unsafe { rp.release(d) };
                }
            }
            TeardownStep::Chain => {
                if let Some(device) = &self.device {
                    let bufs = std::mem::take(&mut self.command_buffers);
                    unsafe { CommandBuffer::free_all(&device.device, device.command_pool, bufs) };
                    if let Some(chain) = self.chain.take() {
                        unsafe { chain.destroy(&device.device) };
                    }
                }
            }
            TeardownStep::Device => {
                if let Some(device) = self.device.take() {
                    unsafe { device.destroy() };
                }
            }
            TeardownStep::Surface => {
                if let Some(surface) = self.surface.take() {
                    unsafe { surface.destroy() };
                    debug!("vk: surface destroyed");
                }
            }
            TeardownStep::DebugMessenger => {
                if let Some(m) = self.debug.take() {
                    unsafe { m.destroy() };
                    debug!("vk: debug messenger destroyed");
                }
            }
            TeardownStep::Instance => {
                if let Some(instance) = self.instance.take() {
                    unsafe { instance.destroy_instance(None) };
                    debug!("vk: instance destroyed");
                }
            }
        }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        self.wait_idle();
        for step in TEARDOWN_ORDER {
            self.teardown(step);
        }
    }
}
