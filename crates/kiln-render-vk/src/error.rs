// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VkBackendError {
    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("required validation layer is missing: {0}")]
    MissingValidationLayer(String),

    #[error("no Vulkan-capable devices were found")]
    NoVulkanDevices,

    #[error("no physical device meets the renderer requirements")]
    NoSuitableDevice,

    #[error("no supported depth format among the candidates")]
    NoDepthFormat,

    /// A fence wait ran past its budget; GPU state can no longer be trusted.
    #[error("GPU hang: {what} did not signal within {timeout_ns} ns")]
    GpuHang { what: &'static str, timeout_ns: u64 },

    #[error("platform: {0}")]
    Platform(String),

    #[error("swapchain: {0}")]
    Swapchain(String),
}

pub type VkBackendResult<T> = Result<T, VkBackendError>;
