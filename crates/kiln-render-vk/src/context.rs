// SPDX-License-Identifier: CEPL-1.0
//! Per-frame orchestration: begin/end frame, resize tracking and swapchain
//! recreation over an owned [`GpuDevice`].

use ash::vk;
use kiln_render::{BackendConfig, FrameStatus, VsyncMode};
use tracing::{debug, error, info, trace, warn};

use crate::command_buffer::{CommandBuffer, RecordingState};
use crate::error::{VkBackendError, VkBackendResult};
use crate::framebuffer::Framebuffer;
use crate::gpu::{FrameSubmit, GpuDevice};
use crate::renderpass::RenderPass;
use crate::swapchain::{AcquireOutcome, PresentOutcome, Swapchain, SwapchainParams};
use crate::sync::FrameSync;

pub const DEFAULT_EXTENT: vk::Extent2D = vk::Extent2D {
    width: 800,
    height: 600,
};

#[derive(Clone, Debug, Default)]
pub struct FrameContext {
    pub current_frame: usize,
    pub image_index: u32,
    pub framebuffer_size_generation: u64,
    pub framebuffer_size_last_generation: u64,
    /// Image whose command buffer each slot submitted last, until the slot's
    /// fence has been waited on.
    submitted_image: Vec<Option<usize>>,
    recording: bool,
}

pub struct VkContext<G: GpuDevice> {
    gpu: G,
    vsync: VsyncMode,
    frame_timeout_ns: u64,
    /// Size most recently asked for through `on_resized`.
    requested_size: vk::Extent2D,
    swapchain: Swapchain,
    render_pass: RenderPass,
    framebuffers: Vec<Framebuffer>,
    command_buffers: Vec<CommandBuffer>,
    sync: FrameSync,
    frame: FrameContext,
    swapchain_stale: bool,
    recreating: bool,
    /// Resize generation a failed recreation was attempted for.
    failed_generation: u64,
}

/// Context creation failed. The device comes back so the caller can still
/// release it before the instance.
pub struct ContextInitError<G> {
    pub gpu: G,
    pub error: VkBackendError,
}

impl<G> std::fmt::Debug for ContextInitError<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.error, f)
    }
}

impl<G: GpuDevice> VkContext<G> {
    pub fn new(
        gpu: G,
        size: vk::Extent2D,
        config: &BackendConfig,
    ) -> Result<Self, ContextInitError<G>> {
        let size = if size.width == 0 || size.height == 0 {
            info!(
                "no framebuffer size yet, starting at {}x{}",
                DEFAULT_EXTENT.width, DEFAULT_EXTENT.height
            );
            DEFAULT_EXTENT
        } else {
            size
        };

        let (swapchain, render_pass) = match Self::create_presentation(&gpu, size, config) {
            Ok(parts) => parts,
            Err(error) => return Err(ContextInitError { gpu, error }),
        };

        let mut ctx = Self {
            gpu,
            vsync: config.vsync_mode,
            frame_timeout_ns: config.frame_timeout_ns,
            requested_size: size,
            swapchain,
            render_pass,
            framebuffers: Vec::new(),
            command_buffers: Vec::new(),
            sync: FrameSync::default(),
            frame: FrameContext::default(),
            swapchain_stale: false,
            recreating: false,
            failed_generation: 0,
        };

        if let Err(error) = ctx.build_dependents() {
            ctx.release_all();
            return Err(ContextInitError {
                gpu: ctx.gpu,
                error,
            });
        }
        Ok(ctx)
    }

    fn create_presentation(
        gpu: &G,
        size: vk::Extent2D,
        config: &BackendConfig,
    ) -> VkBackendResult<(Swapchain, RenderPass)> {
        let params = SwapchainParams::query(gpu, size, config.vsync_mode)?;
        let mut swapchain = Swapchain::create(gpu, &params)?;

        match RenderPass::create(
            gpu,
            swapchain.surface_format.format,
            swapchain.depth.format,
            swapchain.extent,
            config.clear_color,
        ) {
            Ok(render_pass) => {
                debug!("renderpass created");
                Ok((swapchain, render_pass))
            }
            Err(e) => {
                swapchain.destroy(gpu);
                Err(e.into())
            }
        }
    }

    /// Framebuffers, command buffers and sync objects for the current
    /// swapchain. Sync objects survive when the frame count is unchanged.
    fn build_dependents(&mut self) -> VkBackendResult<()> {
        let image_count = self.swapchain.image_count();
        self.framebuffers = Framebuffer::create_set(
            &self.gpu,
            self.render_pass.handle,
            &self.swapchain.views,
            self.swapchain.depth.view,
            self.swapchain.extent,
        )?;
        debug!("{} framebuffers created", self.framebuffers.len());

        self.command_buffers = CommandBuffer::allocate_set(&self.gpu, image_count)?;
        debug!("{} graphics command buffers allocated", self.command_buffers.len());

        let frames = self.swapchain.max_frames_in_flight;
        if self.sync.frames_in_flight() == frames {
            self.sync.reset_images(image_count);
        } else {
            self.sync.destroy(&self.gpu);
            self.sync = FrameSync::create(&self.gpu, frames, image_count)?;
        }
        self.frame.submitted_image = vec![None; frames];
        self.frame.current_frame %= frames;
        Ok(())
    }

    fn release_dependents(&mut self) {
        Framebuffer::destroy_set(&self.gpu, &mut self.framebuffers);
        CommandBuffer::free_set(&self.gpu, &mut self.command_buffers);
    }

    fn release_all(&mut self) {
        self.sync.destroy(&self.gpu);
        self.release_dependents();
        self.render_pass.destroy(&self.gpu);
        self.swapchain.destroy(&self.gpu);
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn framebuffers(&self) -> &[Framebuffer] {
        &self.framebuffers
    }

    pub fn command_buffers(&self) -> &[CommandBuffer] {
        &self.command_buffers
    }

    pub fn frame(&self) -> &FrameContext {
        &self.frame
    }

    pub fn sync(&self) -> &FrameSync {
        &self.sync
    }

    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    pub fn is_recreating(&self) -> bool {
        self.recreating
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.render_pass.clear_color = rgba;
    }

    /// Records the new size; recreation happens on the next `begin_frame`.
    pub fn on_resized(&mut self, width: u16, height: u16) {
        let size = vk::Extent2D {
            width: width as u32,
            height: height as u32,
        };
        if size == self.requested_size {
            trace!("resize to {width}x{height} ignored, size unchanged");
            return;
        }
        self.requested_size = size;
        self.frame.framebuffer_size_generation += 1;
        info!(
            "framebuffer resized to {width}x{height}, generation {}",
            self.frame.framebuffer_size_generation
        );
    }

    pub fn begin_frame(&mut self, _delta_time: f32) -> VkBackendResult<FrameStatus> {
        assert!(!self.frame.recording, "begin_frame called while a frame is being recorded");

        if self.recreating {
            self.gpu.wait_idle()?;
            if self.frame.framebuffer_size_generation == self.failed_generation {
                debug!("recreation in progress, skipping frame");
                return Ok(FrameStatus::Skip);
            }
            // a newer size arrived since the failed attempt
            info!("retrying swapchain recreation");
            self.recreating = false;
        }

        let resized =
            self.frame.framebuffer_size_generation != self.frame.framebuffer_size_last_generation;
        if resized || self.swapchain_stale {
            self.gpu.wait_idle()?;
            if !self.recreate_swapchain()? {
                debug!("swapchain recreation deferred");
            }
            return Ok(FrameStatus::Skip);
        }

        let slot = self.frame.current_frame;
        self.sync.in_flight[slot].wait(&self.gpu, self.frame_timeout_ns, "frame in flight")?;
        self.retire_slot(slot);

        let image_index = match self.swapchain.acquire_next_image(
            &self.gpu,
            self.frame_timeout_ns,
            self.sync.image_available[slot],
        )? {
            AcquireOutcome::Image(index) => index,
            AcquireOutcome::OutOfDate => {
                self.swapchain_stale = true;
                return Ok(FrameStatus::Skip);
            }
        };
        let image = image_index as usize;
        debug_assert!(image < self.swapchain.image_count());

        // the previous user of this image may be another slot still in flight
        if let Some(owner) = self.sync.images_in_flight[image] {
            if owner != slot {
                self.sync.in_flight[owner].wait(&self.gpu, self.frame_timeout_ns, "image in flight")?;
                self.retire_slot(owner);
            }
        }

        let command_buffer = &mut self.command_buffers[image];
        command_buffer.reset();
        command_buffer.begin(&self.gpu, vk::CommandBufferUsageFlags::empty())?;
        self.render_pass.track(command_buffer);

        let extent = self.swapchain.extent;
        // negative height flips Y so +Y points down like the window
        let viewport = vk::Viewport {
            x: 0.0,
            y: extent.height as f32,
            width: extent.width as f32,
            height: -(extent.height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        self.gpu.cmd_set_viewport(command_buffer.handle, &viewport);
        self.gpu.cmd_set_scissor(command_buffer.handle, &scissor);

        self.render_pass.set_extent(extent);
        self.render_pass
            .begin(&self.gpu, command_buffer, self.framebuffers[image].handle);

        self.frame.image_index = image_index;
        self.frame.recording = true;
        Ok(FrameStatus::Ready)
    }

    pub fn end_frame(&mut self, _delta_time: f32) -> VkBackendResult<()> {
        assert!(self.frame.recording, "end_frame called without a ready begin_frame");
        self.frame.recording = false;

        let slot = self.frame.current_frame;
        let image_index = self.frame.image_index;
        let image = image_index as usize;

        let command_buffer = &mut self.command_buffers[image];
        self.render_pass.end(&self.gpu, command_buffer);
        command_buffer.end(&self.gpu)?;
        self.render_pass.track(command_buffer);

        if let Some(owner) = self.sync.images_in_flight[image] {
            self.sync.in_flight[owner].wait(&self.gpu, self.frame_timeout_ns, "image in flight")?;
        }
        self.sync.images_in_flight[image] = Some(slot);
        self.sync.in_flight[slot].reset(&self.gpu)?;

        self.gpu.queue_submit(&FrameSubmit {
            command_buffer: command_buffer.handle,
            wait_semaphore: self.sync.image_available[slot],
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: self.sync.queue_complete[slot],
            fence: self.sync.in_flight[slot].handle,
        })?;
        command_buffer.mark_submitted();
        self.render_pass.track(command_buffer);
        self.frame.submitted_image[slot] = Some(image);

        let outcome =
            self.swapchain
                .present(&self.gpu, self.sync.queue_complete[slot], image_index)?;

        self.frame.current_frame = (slot + 1) % self.sync.frames_in_flight();
        if outcome == PresentOutcome::NeedsRecreate {
            self.swapchain_stale = true;
        }
        Ok(())
    }

    /// Returns the command buffer a slot submitted to `Ready` once that
    /// slot's fence is known to be signaled.
    fn retire_slot(&mut self, slot: usize) {
        if let Some(image) = self.frame.submitted_image[slot].take() {
            let buffer = &mut self.command_buffers[image];
            if buffer.state() == RecordingState::Submitted {
                buffer.reset();
            }
        }
    }

    /// `Ok(false)` when recreation was refused (zero size, already running)
    /// and every existing resource is left as it was.
    pub fn recreate_swapchain(&mut self) -> VkBackendResult<bool> {
        let want = self.requested_size;
        if want.width == 0 || want.height == 0 {
            debug!("not recreating swapchain for a zero-sized framebuffer");
            return Ok(false);
        }
        if self.recreating {
            warn!("swapchain recreation already in progress");
            return Ok(false);
        }

        // stays set if the rebuild fails partway; frames skip until the next resize
        self.recreating = true;
        self.failed_generation = self.frame.framebuffer_size_generation;
        let rebuilt = self.rebuild(want)?;
        self.recreating = false;
        Ok(rebuilt)
    }

    fn rebuild(&mut self, want: vk::Extent2D) -> VkBackendResult<bool> {
        self.gpu.wait_idle()?;
        self.sync.reset_images(self.swapchain.image_count());

        let params = SwapchainParams::query(&self.gpu, want, self.vsync)?;
        if params.has_zero_extent() {
            debug!("surface reports a zero extent, recreation deferred");
            return Ok(false);
        }

        self.release_dependents();
        self.swapchain.rebuild(&self.gpu, &params)?;

        let color = self.swapchain.surface_format.format;
        let depth = self.swapchain.depth.format;
        let lost = self.render_pass.state() == RecordingState::NotAllocated;
        if lost || !self.render_pass.matches_formats(color, depth) {
            info!("surface formats changed, rebuilding renderpass");
            let clear_color = self.render_pass.clear_color;
            self.render_pass.destroy(&self.gpu);
            self.render_pass =
                RenderPass::create(&self.gpu, color, depth, self.swapchain.extent, clear_color)?;
        }
        self.render_pass.set_extent(self.swapchain.extent);

        self.build_dependents()?;

        self.frame.framebuffer_size_last_generation = self.frame.framebuffer_size_generation;
        self.swapchain_stale = false;
        info!(
            "swapchain recreated at {}x{}",
            self.swapchain.extent.width, self.swapchain.extent.height
        );
        Ok(true)
    }

    /// Drains the device and releases every object the context created,
    /// handing the device back to the caller.
    pub fn destroy(mut self) -> G {
        if let Err(e) = self.gpu.wait_idle() {
            error!("wait idle failed during shutdown: {e}");
        }
        self.release_all();
        info!("render context destroyed");
        self.gpu
    }
}
