// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;

use crate::command_buffer::{CommandBuffer, RecordingState};
use crate::gpu::GpuDevice;

/// Single-subpass colour + depth renderpass shared by every framebuffer of a
/// swapchain generation.
///
/// The state walks the same machine as the command buffer driving the
/// current frame, so the two can be cross-checked at begin and end.
pub struct RenderPass {
    pub handle: vk::RenderPass,
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub area: vk::Rect2D,
    pub clear_color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
    state: RecordingState,
}

impl RenderPass {
    pub fn create<G: GpuDevice>(
        gpu: &G,
        color_format: vk::Format,
        depth_format: vk::Format,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) -> VkResult<Self> {
        let handle = gpu.create_render_pass(color_format, depth_format)?;
        Ok(Self {
            handle,
            color_format,
            depth_format,
            area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_color,
            depth: 1.0,
            stencil: 0,
            state: RecordingState::Ready,
        })
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn matches_formats(&self, color: vk::Format, depth: vk::Format) -> bool {
        self.color_format == color && self.depth_format == depth
    }

    /// Adopts the state of the command buffer recording this frame.
    pub fn track(&mut self, command_buffer: &CommandBuffer) {
        assert_ne!(
            self.state,
            RecordingState::NotAllocated,
            "tracking a destroyed renderpass"
        );
        self.state = command_buffer.state();
    }

    pub fn set_extent(&mut self, extent: vk::Extent2D) {
        self.area.extent = extent;
    }

    pub fn clear_values(&self) -> [vk::ClearValue; 2] {
        [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.depth,
                    stencil: self.stencil,
                },
            },
        ]
    }

    pub fn begin<G: GpuDevice>(
        &mut self,
        gpu: &G,
        command_buffer: &mut CommandBuffer,
        framebuffer: vk::Framebuffer,
    ) {
        assert_ne!(self.state, RecordingState::InRenderPass, "renderpass already begun");
        assert_ne!(self.state, RecordingState::NotAllocated, "renderpass begin after destroy");
        assert_eq!(
            command_buffer.state(),
            RecordingState::Recording,
            "renderpass begin requires a Recording command buffer"
        );

        let clears = self.clear_values();
        gpu.cmd_begin_render_pass(command_buffer.handle, self.handle, framebuffer, self.area, &clears);
        command_buffer.enter_render_pass();
        self.state = RecordingState::InRenderPass;
    }

    pub fn end<G: GpuDevice>(&mut self, gpu: &G, command_buffer: &mut CommandBuffer) {
        assert_eq!(self.state, RecordingState::InRenderPass, "renderpass end without begin");
        assert_eq!(
            command_buffer.state(),
            RecordingState::InRenderPass,
            "renderpass end on a command buffer outside the renderpass"
        );

        gpu.cmd_end_render_pass(command_buffer.handle);
        command_buffer.leave_render_pass();
        self.state = RecordingState::Recording;
    }

    pub fn destroy<G: GpuDevice>(&mut self, gpu: &G) {
        if self.state == RecordingState::NotAllocated {
            return;
        }
        gpu.destroy_render_pass(self.handle);
        self.handle = vk::RenderPass::null();
        self.state = RecordingState::NotAllocated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGpu;

    fn setup(gpu: &MockGpu) -> (RenderPass, CommandBuffer) {
        let rp = RenderPass::create(
            gpu,
            vk::Format::B8G8R8A8_UNORM,
            vk::Format::D32_SFLOAT,
            vk::Extent2D { width: 800, height: 600 },
            [0.0, 0.0, 0.2, 1.0],
        )
        .unwrap();
        let cb = CommandBuffer::allocate_set(gpu, 1).unwrap().pop().unwrap();
        (rp, cb)
    }

    #[test]
    fn test_clear_values_carry_colour_and_depth() {
        let gpu = MockGpu::new();
        let (mut rp, _) = setup(&gpu);
        rp.clear_color = [1.0, 0.5, 0.25, 1.0];
        let clears = rp.clear_values();
        unsafe {
            assert_eq!(clears[0].color.float32, [1.0, 0.5, 0.25, 1.0]);
            assert_eq!(clears[1].depth_stencil.depth, 1.0);
            assert_eq!(clears[1].depth_stencil.stencil, 0);
        }
    }

    #[test]
    fn test_begin_end_tracks_command_buffer() {
        let gpu = MockGpu::new();
        let (mut rp, mut cb) = setup(&gpu);
        cb.begin(&gpu, vk::CommandBufferUsageFlags::empty()).unwrap();
        rp.begin(&gpu, &mut cb, vk::Framebuffer::null());
        assert_eq!(rp.state(), RecordingState::InRenderPass);
        assert_eq!(cb.state(), RecordingState::InRenderPass);
        rp.end(&gpu, &mut cb);
        assert_eq!(rp.state(), RecordingState::Recording);
        assert_eq!(cb.state(), RecordingState::Recording);
    }

    #[test]
    fn test_state_follows_command_buffer_through_submit() {
        let gpu = MockGpu::new();
        let (mut rp, mut cb) = setup(&gpu);
        assert_eq!(rp.state(), RecordingState::Ready);

        cb.begin(&gpu, vk::CommandBufferUsageFlags::empty()).unwrap();
        rp.track(&cb);
        assert_eq!(rp.state(), RecordingState::Recording);

        rp.begin(&gpu, &mut cb, vk::Framebuffer::null());
        rp.end(&gpu, &mut cb);
        cb.end(&gpu).unwrap();
        rp.track(&cb);
        assert_eq!(rp.state(), RecordingState::RecordingEnded);

        cb.mark_submitted();
        rp.track(&cb);
        assert_eq!(rp.state(), RecordingState::Submitted);

        cb.reset();
        cb.begin(&gpu, vk::CommandBufferUsageFlags::empty()).unwrap();
        rp.track(&cb);
        rp.begin(&gpu, &mut cb, vk::Framebuffer::null());
        assert_eq!(rp.state(), RecordingState::InRenderPass);
    }

    #[test]
    #[should_panic(expected = "renderpass already begun")]
    fn test_begin_twice_panics() {
        let gpu = MockGpu::new();
        let (mut rp, mut cb) = setup(&gpu);
        cb.begin(&gpu, vk::CommandBufferUsageFlags::empty()).unwrap();
        rp.begin(&gpu, &mut cb, vk::Framebuffer::null());
        rp.begin(&gpu, &mut cb, vk::Framebuffer::null());
    }

    #[test]
    #[should_panic(expected = "renderpass end without begin")]
    fn test_end_without_begin_panics() {
        let gpu = MockGpu::new();
        let (mut rp, mut cb) = setup(&gpu);
        cb.begin(&gpu, vk::CommandBufferUsageFlags::empty()).unwrap();
        rp.end(&gpu, &mut cb);
    }

    #[test]
    #[should_panic(expected = "requires a Recording command buffer")]
    fn test_begin_on_idle_buffer_panics() {
        let gpu = MockGpu::new();
        let (mut rp, mut cb) = setup(&gpu);
        rp.begin(&gpu, &mut cb, vk::Framebuffer::null());
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let gpu = MockGpu::new();
        let (mut rp, _) = setup(&gpu);
        rp.destroy(&gpu);
        rp.destroy(&gpu);
        assert_eq!(gpu.live_count("render_pass"), 0);
        assert_eq!(rp.state(), RecordingState::NotAllocated);
    }
}
