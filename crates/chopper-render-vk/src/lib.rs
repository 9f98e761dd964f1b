// SPDX-License-Identifier: CEPL-1.0
//! Vulkan implementation of [`chopper_render::RendererBackend`].
#![deny(unsafe_op_in_unsafe_fn)]

mod backend;
pub mod command_buffer;
pub mod context;
pub mod device;
pub mod error;
pub mod frame;
pub mod image;
pub mod instance;
pub mod render_pass;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
mod mock;

pub use backend::VulkanBackend;
pub use context::VulkanContext;
pub use error::VulkanError;
pub use frame::{FrameContext, FrameDriver, FrameState, Rebuild};
pub use sync::MAX_FRAMES_IN_FLIGHT;
