// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{error, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Per-frame payload handed to the renderer by the game loop.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderPacket {
    pub delta_time: f32,
}

/// Outcome of `begin_frame`. `Skip` means the backend is recovering
/// (resize, minimise, stale swapchain) and the caller must not draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Ready,
    Skip,
}

impl FrameStatus {
    pub fn is_ready(self) -> bool {
        matches!(self, FrameStatus::Ready)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum VsyncMode {
    #[default]
    Fifo,
    Mailbox,
    Immediate,
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub clear_color: [f32; 4],
    pub vsync_mode: VsyncMode,
    pub validation: bool,
    pub discrete_gpu_only: bool,
    /// Fence wait budget in nanoseconds; `u64::MAX` waits indefinitely.
    pub frame_timeout_ns: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.2, 1.0],
            vsync_mode: VsyncMode::Fifo,
            validation: cfg!(debug_assertions),
            discrete_gpu_only: false,
            frame_timeout_ns: u64::MAX,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendType {
    Vulkan,
}

pub trait RendererBackend {
    fn initialize(
        app_name: &str,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &BackendConfig,
    ) -> Result<Self>
    where
        Self: Sized;

    fn backend_type(&self) -> BackendType;

    /// Releases every GPU object. Safe to call more than once.
    fn shutdown(&mut self);

    /// Records the new framebuffer size; no GPU work happens here.
    fn on_resized(&mut self, width: u16, height: u16);

    fn begin_frame(&mut self, delta_time: f32) -> Result<FrameStatus>;
    fn end_frame(&mut self, delta_time: f32) -> Result<()>;

    fn set_clear_color(&mut self, rgba: [f32; 4]);
}

/// Frontend that sequences a backend through one frame per `draw_frame`.
pub struct Renderer {
    backend: Box<dyn RendererBackend>,
    frame_number: u64,
}

impl Renderer {
    pub fn new(backend: Box<dyn RendererBackend>) -> Self {
        info!("renderer frontend up ({:?} backend)", backend.backend_type());
        Self {
            backend,
            frame_number: 0,
        }
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn backend_type(&self) -> BackendType {
        self.backend.backend_type()
    }

    pub fn on_resized(&mut self, width: u16, height: u16) {
        self.backend.on_resized(width, height);
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.backend.set_clear_color(rgba);
    }

    /// Returns whether a frame was actually produced.
    pub fn draw_frame(&mut self, packet: &RenderPacket) -> Result<bool> {
        match self.backend.begin_frame(packet.delta_time)? {
            FrameStatus::Skip => Ok(false),
            FrameStatus::Ready => {
                if let Err(e) = self.backend.end_frame(packet.delta_time) {
                    error!("end_frame failed: {e:#}");
                    return Err(e);
                }
                self.frame_number += 1;
                Ok(true)
            }
        }
    }

    pub fn shutdown(&mut self) {
        self.backend.shutdown();
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.backend.shutdown();
    }
}
