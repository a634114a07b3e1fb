// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;

use crate::gpu::GpuDevice;

/// `[colour view, depth view]` bound to one swapchain image.
pub struct Framebuffer {
    pub handle: vk::Framebuffer,
    pub attachments: [vk::ImageView; 2],
    pub extent: vk::Extent2D,
}

impl Framebuffer {
    pub fn create<G: GpuDevice>(
        gpu: &G,
        render_pass: vk::RenderPass,
        color_view: vk::ImageView,
        depth_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VkResult<Self> {
        let attachments = [color_view, depth_view];
        let handle = gpu.create_framebuffer(render_pass, &attachments, extent)?;
        Ok(Self {
            handle,
            attachments,
            extent,
        })
    }

    /// Builds one framebuffer per colour view. On failure the ones already
    /// built are destroyed before returning.
    pub fn create_set<G: GpuDevice>(
        gpu: &G,
        render_pass: vk::RenderPass,
        color_views: &[vk::ImageView],
        depth_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VkResult<Vec<Self>> {
        let mut framebuffers = Vec::with_capacity(color_views.len());
        for &view in color_views {
            match Self::create(gpu, render_pass, view, depth_view, extent) {
                Ok(fb) => framebuffers.push(fb),
                Err(e) => {
                    Self::destroy_set(gpu, &mut framebuffers);
                    return Err(e);
                }
            }
        }
        Ok(framebuffers)
    }

    pub fn destroy_set<G: GpuDevice>(gpu: &G, framebuffers: &mut Vec<Self>) {
        for fb in framebuffers.drain(..) {
            gpu.destroy_framebuffer(fb.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGpu;
    use ash::vk::Handle;

    #[test]
    fn test_set_has_one_framebuffer_per_view() {
        let gpu = MockGpu::new();
        let views: Vec<vk::ImageView> = (1..=3).map(vk::ImageView::from_raw).collect();
        let depth = vk::ImageView::from_raw(99);
        let extent = vk::Extent2D { width: 640, height: 480 };

        let mut set =
            Framebuffer::create_set(&gpu, vk::RenderPass::null(), &views, depth, extent).unwrap();
        assert_eq!(set.len(), 3);
        for (fb, view) in set.iter().zip(&views) {
            assert_eq!(fb.attachments, [*view, depth]);
            assert_eq!(fb.extent, extent);
        }

        Framebuffer::destroy_set(&gpu, &mut set);
        assert!(set.is_empty());
        assert_eq!(gpu.live_count("framebuffer"), 0);
    }
}
