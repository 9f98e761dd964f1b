// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use chopper_render::{RenderData, RenderSize, RendererBackend, RendererBackendType, RendererConfig};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;

use crate::context::VulkanContext;
use crate::error::VulkanError;
use crate::frame::FrameDriver;

pub struct VulkanBackend {
    driver: FrameDriver<VulkanContext>,
}

impl VulkanBackend {
    /// One-off GPU work (uploads, layout transitions) outside the frame loop.
    pub fn immediate_submit<F>(&self, record: F) -> Result<(), VulkanError>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        self.driver.context().immediate_submit(record)
    }

    pub fn context(&self) -> &VulkanContext {
        self.driver.context()
    }
}

impl RendererBackend for VulkanBackend {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RendererConfig,
    ) -> Result<Self> {
        let ctx = VulkanContext::new(window, display, size, cfg)
            .context("creating the Vulkan context")?;
        let extent = ctx.extent();
        info!("Vulkan backend ready ({})", extent);
        Ok(Self {
            driver: FrameDriver::new(ctx, extent, cfg.recreate_on_suboptimal),
        })
    }

    fn backend_type(&self) -> RendererBackendType {
        RendererBackendType::Vulkan
    }

    fn begin_frame(&mut self, data: &mut RenderData<'_>) -> bool {
        self.driver.begin_frame(data)
    }

    fn end_frame(&mut self, data: &mut RenderData<'_>) -> bool {
        self.driver.end_frame(data)
    }

    fn on_resize(&mut self, size: RenderSize) {
        self.driver.on_resize(size);
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.driver.context_mut().set_clear_color(rgba);
    }

    fn shutdown(&mut self) {
        self.driver.shutdown();
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.driver.shutdown();
    }
}
