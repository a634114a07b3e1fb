// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;

use crate::gpu::GpuDevice;

/// Host-side recording state shared by command buffers and the renderpass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingState {
    NotAllocated,
    Ready,
    Recording,
    InRenderPass,
    RecordingEnded,
    Submitted,
}

pub struct CommandBuffer {
    pub handle: vk::CommandBuffer,
    state: RecordingState,
    #[cfg(test)]
    pub(crate) history: Vec<RecordingState>,
}

impl CommandBuffer {
    /// One primary buffer per swapchain image, all starting in `Ready`.
    pub fn allocate_set<G: GpuDevice>(gpu: &G, count: usize) -> VkResult<Vec<CommandBuffer>> {
        let handles = gpu.allocate_command_buffers(count as u32)?;
        Ok(handles
            .into_iter()
            .map(|handle| {
                let mut buffer = CommandBuffer {
                    handle,
                    state: RecordingState::NotAllocated,
                    #[cfg(test)]
                    history: Vec::new(),
                };
                buffer.transition(&[RecordingState::NotAllocated], RecordingState::Ready);
                buffer
            })
            .collect())
    }

    pub fn free_set<G: GpuDevice>(gpu: &G, buffers: &mut Vec<CommandBuffer>) {
        let handles: Vec<vk::CommandBuffer> = buffers.iter().map(|b| b.handle).collect();
        gpu.free_command_buffers(&handles);
        buffers.clear();
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn begin<G: GpuDevice>(&mut self, gpu: &G, flags: vk::CommandBufferUsageFlags) -> VkResult<()> {
        assert_eq!(
            self.state,
            RecordingState::Ready,
            "command buffer must be Ready to begin recording"
        );
        gpu.begin_command_buffer(self.handle, flags)?;
        self.transition(&[RecordingState::Ready], RecordingState::Recording);
        Ok(())
    }

    pub fn end<G: GpuDevice>(&mut self, gpu: &G) -> VkResult<()> {
        assert_eq!(
            self.state,
            RecordingState::Recording,
            "command buffer must be Recording (outside a renderpass) to end"
        );
        gpu.end_command_buffer(self.handle)?;
        self.transition(&[RecordingState::Recording], RecordingState::RecordingEnded);
        Ok(())
    }

    pub(crate) fn enter_render_pass(&mut self) {
        self.transition(&[RecordingState::Recording], RecordingState::InRenderPass);
    }

    pub(crate) fn leave_render_pass(&mut self) {
        self.transition(&[RecordingState::InRenderPass], RecordingState::Recording);
    }

    pub fn mark_submitted(&mut self) {
        self.transition(&[RecordingState::RecordingEnded], RecordingState::Submitted);
    }

    /// Back to `Ready` from any allocated state.
    pub fn reset(&mut self) {
        if self.state == RecordingState::Ready {
            return;
        }
        self.transition(
            &[
                RecordingState::Recording,
                RecordingState::InRenderPass,
                RecordingState::RecordingEnded,
                RecordingState::Submitted,
            ],
            RecordingState::Ready,
        );
    }

    fn transition(&mut self, from: &[RecordingState], to: RecordingState) {
        assert!(
            from.contains(&self.state),
            "illegal command buffer transition {:?} -> {:?} (expected one of {:?})",
            self.state,
            to,
            from
        );
        self.state = to;
        #[cfg(test)]
        self.history.push(to);
    }
}
