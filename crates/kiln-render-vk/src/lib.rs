// SPDX-License-Identifier: CEPL-1.0
//! Vulkan rendering backend: device selection, swapchain, renderpass,
//! framebuffers, command buffers and the begin/end frame protocol.

mod backend;
pub mod command_buffer;
pub mod context;
pub mod device;
pub mod error;
pub mod framebuffer;
pub mod gpu;
pub mod instance;
pub mod renderpass;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
mod mock;

pub use backend::{is_gpu_hang, VulkanBackend};
pub use context::VkContext;
pub use error::{VkBackendError, VkBackendResult};
