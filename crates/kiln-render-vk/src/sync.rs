// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use tracing::{debug, error};

use crate::error::{VkBackendError, VkBackendResult};
use crate::gpu::GpuDevice;

pub struct Fence {
    pub handle: vk::Fence,
    is_signaled: bool,
}

impl Fence {
    pub fn create<G: GpuDevice>(gpu: &G, signaled: bool) -> VkResult<Self> {
        Ok(Self {
            handle: gpu.create_fence(signaled)?,
            is_signaled: signaled,
        })
    }

    pub fn is_signaled(&self) -> bool {
        self.is_signaled
    }

    /// Blocks until the fence signals. A fence already known to be signaled
    /// returns without touching the device.
    pub fn wait<G: GpuDevice>(
        &mut self,
        gpu: &G,
        timeout_ns: u64,
        what: &'static str,
    ) -> VkBackendResult<()> {
        if self.is_signaled {
            return Ok(());
        }
        match gpu.wait_for_fence(self.handle, timeout_ns) {
            Ok(()) => {
                self.is_signaled = true;
                Ok(())
            }
            Err(vk::Result::TIMEOUT) => {
                error!("{what} fence timed out after {timeout_ns} ns");
                Err(VkBackendError::GpuHang { what, timeout_ns })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn reset<G: GpuDevice>(&mut self, gpu: &G) -> VkResult<()> {
        gpu.reset_fence(self.handle)?;
        self.is_signaled = false;
        Ok(())
    }

    pub fn destroy<G: GpuDevice>(self, gpu: &G) {
        gpu.destroy_fence(self.handle);
    }
}

/// Per-frame-slot semaphores and fences, plus the image -> slot table that
/// says which slot's fence last guarded each swapchain image.
#[derive(Default)]
pub struct FrameSync {
    pub image_available: Vec<vk::Semaphore>,
    pub queue_complete: Vec<vk::Semaphore>,
    pub in_flight: Vec<Fence>,
    /// Slot index, never a fence handle; entries are not owned.
    pub images_in_flight: Vec<Option<usize>>,
}

impl FrameSync {
    /// Fences start signaled so the first wait on each slot falls through.
    pub fn create<G: GpuDevice>(gpu: &G, frames: usize, image_count: usize) -> VkResult<Self> {
        let mut sync = Self {
            image_available: Vec::with_capacity(frames),
            queue_complete: Vec::with_capacity(frames),
            in_flight: Vec::with_capacity(frames),
            images_in_flight: vec![None; image_count],
        };
        if let Err(e) = sync.fill(gpu, frames) {
            sync.destroy(gpu);
            return Err(e);
        }
        debug!("created sync objects for {frames} frames in flight");
        Ok(sync)
    }

    fn fill<G: GpuDevice>(&mut self, gpu: &G, frames: usize) -> VkResult<()> {
        for _ in 0..frames {
            self.image_available.push(gpu.create_semaphore()?);
            self.queue_complete.push(gpu.create_semaphore()?);
            self.in_flight.push(Fence::create(gpu, true)?);
        }
        Ok(())
    }

    pub fn frames_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Forgets every image -> slot link and resizes the table.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight.resize(image_count, None);
    }

    pub fn destroy<G: GpuDevice>(&mut self, gpu: &G) {
        for s in self.image_available.drain(..) {
            gpu.destroy_semaphore(s);
        }
        for s in self.queue_complete.drain(..) {
            gpu.destroy_semaphore(s);
        }
        for f in self.in_flight.drain(..) {
            f.destroy(gpu);
        }
        self.images_in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockGpu};

    #[test]
    fn test_signaled_fence_skips_device_wait() {
        let gpu = MockGpu::new();
        let mut fence = Fence::create(&gpu, true).unwrap();
        fence.wait(&gpu, u64::MAX, "test").unwrap();
        assert_eq!(gpu.count_calls(|c| matches!(c, Call::WaitFence)), 0);
        fence.destroy(&gpu);
    }

    #[test]
    fn test_wait_after_submit_hits_device() {
        let gpu = MockGpu::new();
        let mut fence = Fence::create(&gpu, true).unwrap();
        fence.reset(&gpu).unwrap();
        assert!(!fence.is_signaled());
        gpu.signal_later(fence.handle);
        fence.wait(&gpu, u64::MAX, "test").unwrap();
        assert!(fence.is_signaled());
        assert_eq!(gpu.count_calls(|c| matches!(c, Call::WaitFence)), 1);
        fence.destroy(&gpu);
    }

    #[test]
    fn test_timeout_is_gpu_hang() {
        let gpu = MockGpu::new();
        let mut fence = Fence::create(&gpu, false).unwrap();
        gpu.signal_later(fence.handle);
        gpu.hang();
        let err = fence.wait(&gpu, 1_000, "frame in flight").unwrap_err();
        assert!(matches!(
            err,
            VkBackendError::GpuHang {
                what: "frame in flight",
                timeout_ns: 1_000
            }
        ));
        assert!(!fence.is_signaled());
    }

    #[test]
    fn test_frame_sync_sizes_and_teardown() {
        let gpu = MockGpu::new();
        let mut sync = FrameSync::create(&gpu, 2, 3).unwrap();
        assert_eq!(sync.frames_in_flight(), 2);
        assert_eq!(sync.image_available.len(), 2);
        assert_eq!(sync.queue_complete.len(), 2);
        assert_eq!(sync.images_in_flight, vec![None, None, None]);

        sync.images_in_flight[1] = Some(0);
        sync.reset_images(4);
        assert_eq!(sync.images_in_flight, vec![None; 4]);

        sync.destroy(&gpu);
        assert_eq!(gpu.live_count("semaphore"), 0);
        assert_eq!(gpu.live_count("fence"), 0);
    }
}
