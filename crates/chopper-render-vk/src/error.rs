// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use raw_window_handle::HandleError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VulkanError {
    #[error("could not load the Vulkan loader: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("{call} failed: {result}")]
    Call {
        call: &'static str,
        result: vk::Result,
    },

    #[error("window handle unavailable: {0}")]
    Handle(#[from] HandleError),

    #[error("unsupported instance extensions: {}", .0.join(", "))]
    MissingExtensions(Vec<String>),

    #[error("no physical device satisfies the renderer requirements")]
    NoSuitableDevice,

    #[error("surface reports no supported formats")]
    NoSurfaceFormat,

    #[error("no memory type in {type_bits:#b} has {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("{0} is not initialized")]
    Missing(&'static str),

    #[error("surface has zero area")]
    ZeroAreaSurface,
}

/// Tags a raw `VkResult` with the entry point that produced it.
pub trait VkResultExt<T> {
    fn call(self, call: &'static str) -> Result<T, VulkanError>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn call(self, call: &'static str) -> Result<T, VulkanError> {
        self.map_err(|result| VulkanError::Call { call, result })
    }
}
