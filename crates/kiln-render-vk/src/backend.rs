// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::vk;
use kiln_render::{BackendConfig, BackendType, FrameStatus, RenderSize, RendererBackend};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;

use crate::context::VkContext;
use crate::device::{DeviceRequirements, VulkanDevice};
use crate::error::VkBackendError;
use crate::instance::VulkanInstance;

struct Live {
    context: VkContext<VulkanDevice>,
    instance: VulkanInstance,
}

/// The Vulkan implementation of [`RendererBackend`].
pub struct VulkanBackend {
    live: Option<Live>,
}

impl VulkanBackend {
    fn live(&mut self) -> Result<&mut Live> {
        self.live
            .as_mut()
            .ok_or_else(|| anyhow!("vulkan backend used after shutdown"))
    }
}

/// True when the error is, or wraps, a GPU hang.
pub fn is_gpu_hang(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<VkBackendError>(),
        Some(VkBackendError::GpuHang { .. })
    )
}

impl RendererBackend for VulkanBackend {
    fn initialize(
        app_name: &str,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &BackendConfig,
    ) -> Result<Self> {
        info!("initializing vulkan backend for '{app_name}'...");
        let instance = VulkanInstance::create(app_name, window, display, config.validation)
            .context("vulkan instance")?;

        let requirements = DeviceRequirements {
            discrete_gpu: config.discrete_gpu_only,
            ..Default::default()
        };
        let device = match VulkanDevice::create(
            &instance.instance,
            &instance.surface_loader,
            instance.surface,
            &requirements,
        ) {
            Ok(device) => device,
            Err(e) => {
                instance.destroy();
                return Err(anyhow::Error::new(e).context("vulkan device"));
            }
        };

        let extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };
        let context = match VkContext::new(device, extent, config) {
            Ok(context) => context,
            Err(failed) => {
                failed.gpu.destroy();
                instance.destroy();
                return Err(anyhow::Error::new(failed.error).context("vulkan render context"));
            }
        };

        info!("vulkan backend initialized");
        Ok(Self {
            live: Some(Live { context, instance }),
        })
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Vulkan
    }

    fn shutdown(&mut self) {
        let Some(live) = self.live.take() else {
            return;
        };
        info!("shutting down vulkan backend...");
        let device = live.context.destroy();
        device.destroy();
        live.instance.destroy();
    }

    fn on_resized(&mut self, width: u16, height: u16) {
        if let Some(live) = self.live.as_mut() {
            live.context.on_resized(width, height);
        }
    }

    fn begin_frame(&mut self, delta_time: f32) -> Result<FrameStatus> {
        Ok(self.live()?.context.begin_frame(delta_time)?)
    }

    fn end_frame(&mut self, delta_time: f32) -> Result<()> {
        Ok(self.live()?.context.end_frame(delta_time)?)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        if let Some(live) = self.live.as_mut() {
            live.context.set_clear_color(rgba);
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
