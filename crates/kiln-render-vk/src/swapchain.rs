// SPDX-License-Identifier: CEPL-1.0
//! Presentable images, their views and the shared depth attachment.

use ash::vk;
use kiln_render::VsyncMode;
use tracing::{debug, info, warn};

use crate::device::{detect_depth_format, SwapchainSupportInfo};
use crate::error::{VkBackendError, VkBackendResult};
use crate::gpu::{GpuDevice, SwapchainDesc};

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: VsyncMode) -> vk::PresentModeKHR {
    let wanted = match vsync {
        VsyncMode::Fifo => return vk::PresentModeKHR::FIFO,
        VsyncMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        VsyncMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
    };
    if modes.contains(&wanted) {
        wanted
    } else {
        vk::PresentModeKHR::FIFO
    }
}

fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// `min_image_count + 1`, capped by `max_image_count` unless that is 0
/// (no upper limit).
fn image_count_from_caps(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// Everything needed to build a swapchain, derived from a fresh support query.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainParams {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub depth_format: vk::Format,
}

impl SwapchainParams {
    pub fn query<G: GpuDevice>(
        gpu: &G,
        want: vk::Extent2D,
        vsync: VsyncMode,
    ) -> VkBackendResult<Self> {
        let support = gpu.swapchain_support()?;
        Self::from_support(&support, want, vsync, |f| gpu.format_properties(f))
    }

    pub fn from_support(
        support: &SwapchainSupportInfo,
        want: vk::Extent2D,
        vsync: VsyncMode,
        format_properties: impl Fn(vk::Format) -> vk::FormatProperties,
    ) -> VkBackendResult<Self> {
        let surface_format = choose_surface_format(&support.formats)
            .ok_or_else(|| VkBackendError::Swapchain("surface reports no formats".into()))?;
        let depth_format = detect_depth_format(format_properties).ok_or(VkBackendError::NoDepthFormat)?;
        let caps = &support.capabilities;

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes, vsync),
            extent: extent_from_caps(caps, want),
            image_count: image_count_from_caps(caps),
            pre_transform: caps.current_transform,
            depth_format,
        })
    }

    pub fn has_zero_extent(&self) -> bool {
        self.extent.width == 0 || self.extent.height == 0
    }
}

pub struct DepthAttachment {
    pub format: vk::Format,
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl DepthAttachment {
    fn create<G: GpuDevice>(
        gpu: &G,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> VkBackendResult<Self> {
        let (image, memory) = gpu.create_depth_image(extent, format)?;
        let view = match gpu.create_image_view(image, format, vk::ImageAspectFlags::DEPTH) {
            Ok(view) => view,
            Err(e) => {
                gpu.destroy_image(image, memory);
                return Err(e.into());
            }
        };
        Ok(Self {
            format,
            image,
            memory,
            view,
        })
    }

    fn destroy<G: GpuDevice>(&self, gpu: &G) {
        gpu.destroy_image_view(self.view);
        gpu.destroy_image(self.image, self.memory);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Carries the image index. A suboptimal acquire still yields an image.
    Image(u32),
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented or not, the swapchain no longer matches the surface.
    NeedsRecreate,
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub max_frames_in_flight: usize,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub depth: DepthAttachment,
    /// Bumped on every successful rebuild.
    pub generation: u64,
    /// Set once a rebuild against this handle failed; the driver has retired
    /// it and it may only be destroyed.
    retired: bool,
}

impl Swapchain {
    pub fn create<G: GpuDevice>(gpu: &G, params: &SwapchainParams) -> VkBackendResult<Self> {
        if params.has_zero_extent() {
            return Err(VkBackendError::Swapchain(
                "cannot create a swapchain with a zero extent".into(),
            ));
        }
        Self::build(gpu, params, vk::SwapchainKHR::null(), 0)
    }

    fn build<G: GpuDevice>(
        gpu: &G,
        params: &SwapchainParams,
        old: vk::SwapchainKHR,
        generation: u64,
    ) -> VkBackendResult<Self> {
        let handle = gpu.create_swapchain(&SwapchainDesc {
            image_count: params.image_count,
            surface_format: params.surface_format,
            extent: params.extent,
            present_mode: params.present_mode,
            pre_transform: params.pre_transform,
            old_swapchain: old,
        })?;

        let mut views = Vec::new();
        let parts = gpu
            .swapchain_images(handle)
            .map_err(VkBackendError::from)
            .and_then(|images| {
                for &image in &images {
                    views.push(gpu.create_image_view(
                        image,
                        params.surface_format.format,
                        vk::ImageAspectFlags::COLOR,
                    )?);
                }
                let depth = DepthAttachment::create(gpu, params.extent, params.depth_format)?;
                Ok((images, depth))
            });

        let (images, depth) = match parts {
            Ok(parts) => parts,
            Err(e) => {
                for view in views {
                    gpu.destroy_image_view(view);
                }
                gpu.destroy_swapchain(handle);
                return Err(e);
            }
        };

        let image_count = images.len();
        let max_frames_in_flight = image_count.saturating_sub(1).max(1);
        info!(
            "swapchain {}x{} {:?} {:?}, {} images, {} frames in flight",
            params.extent.width,
            params.extent.height,
            params.surface_format.format,
            params.present_mode,
            image_count,
            max_frames_in_flight
        );

        Ok(Self {
            handle,
            surface_format: params.surface_format,
            present_mode: params.present_mode,
            extent: params.extent,
            max_frames_in_flight,
            images,
            views,
            depth,
            generation,
            retired: false,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Builds the replacement against the old handle, then releases the old
    /// views, depth attachment and swapchain. The caller must have drained
    /// the device and dropped every framebuffer built on the old views.
    ///
    /// A zero extent is refused before anything is touched. Any later failure
    /// leaves `self` holding a retired handle: its images can no longer be
    /// acquired, it is only safe to destroy, and the next rebuild starts
    /// from scratch instead of chaining from it.
    pub fn rebuild<G: GpuDevice>(&mut self, gpu: &G, params: &SwapchainParams) -> VkBackendResult<()> {
        if params.has_zero_extent() {
            return Err(VkBackendError::Swapchain(
                "refusing to rebuild with a zero extent".into(),
            ));
        }
        let old_handle = if self.retired {
            vk::SwapchainKHR::null()
        } else {
            self.handle
        };
        let next = match Self::build(gpu, params, old_handle, self.generation + 1) {
            Ok(next) => next,
            Err(e) => {
                warn!("swapchain rebuild failed, old swapchain retired: {e}");
                self.retired = true;
                return Err(e);
            }
        };
        let mut old = std::mem::replace(self, next);
        old.destroy(gpu);
        debug!("swapchain generation {}", self.generation);
        Ok(())
    }

    pub fn acquire_next_image<G: GpuDevice>(
        &self,
        gpu: &G,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VkBackendResult<AcquireOutcome> {
        match gpu.acquire_next_image(self.handle, timeout_ns, signal) {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    debug!("acquired image {index} from a suboptimal swapchain");
                }
                Ok(AcquireOutcome::Image(index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                warn!("swapchain out of date on acquire");
                Ok(AcquireOutcome::OutOfDate)
            }
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Err(VkBackendError::GpuHang {
                what: "swapchain image acquire",
                timeout_ns,
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn present<G: GpuDevice>(
        &self,
        gpu: &G,
        wait: vk::Semaphore,
        image_index: u32,
    ) -> VkBackendResult<PresentOutcome> {
        match gpu.queue_present(self.handle, image_index, wait) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => {
                debug!("present reported a suboptimal swapchain");
                Ok(PresentOutcome::NeedsRecreate)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                warn!("swapchain out of date on present");
                Ok(PresentOutcome::NeedsRecreate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Safe to call more than once.
    pub fn destroy<G: GpuDevice>(&mut self, gpu: &G) {
        if self.handle == vk::SwapchainKHR::null() {
            return;
        }
        for view in self.views.drain(..) {
            gpu.destroy_image_view(view);
        }
        self.images.clear();
        self.depth.destroy(gpu);
        gpu.destroy_swapchain(self.handle);
        self.handle = vk::SwapchainKHR::null();
    }
}
