// SPDX-License-Identifier: CEPL-1.0
//! Test doubles for [`GpuDevice`] and [`PhysicalDeviceSource`].
//!
//! `MockGpu` hands out fake handles, keeps a live set so leaks and double
//! frees fail loudly, and models fences the way a queue would: a submitted
//! fence is pending until someone waits on it (or the device idles).

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::ffi::{c_char, CString};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::device::{PhysicalDeviceSource, SwapchainSupportInfo};
use crate::gpu::{FrameSubmit, GpuDevice, SwapchainDesc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Call {
    WaitIdle,
    CreateSwapchain { retired: Option<vk::SwapchainKHR> },
    Acquire,
    Present { image: u32 },
    Submit { command_buffer: vk::CommandBuffer, fence: vk::Fence },
    WaitFence,
    ResetFence,
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    BeginRenderPass { framebuffer: vk::Framebuffer },
    EndRenderPass,
    CreateRenderPass,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    Pending,
}

pub fn mock_swapchain_support() -> SwapchainSupportInfo {
    SwapchainSupportInfo {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 16384,
                height: 16384,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

pub struct MockGpu {
    next_handle: Cell<u64>,
    live: RefCell<HashMap<u64, &'static str>>,
    support: RefCell<SwapchainSupportInfo>,
    depth_formats: Cell<bool>,
    swapchains: RefCell<HashMap<u64, u32>>,
    next_image: Cell<u32>,
    acquire_results: RefCell<VecDeque<VkResult<(u32, bool)>>>,
    swapchain_failures: RefCell<VecDeque<vk::Result>>,
    present_results: RefCell<VecDeque<VkResult<bool>>>,
    fences: RefCell<HashMap<u64, FenceState>>,
    hung: Cell<bool>,
    calls: RefCell<Vec<Call>>,
    framebuffer_extents: RefCell<HashMap<u64, vk::Extent2D>>,
    viewports: RefCell<Vec<vk::Viewport>>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self {
            next_handle: Cell::new(0x1000),
            live: RefCell::new(HashMap::new()),
            support: RefCell::new(mock_swapchain_support()),
            depth_formats: Cell::new(true),
            swapchains: RefCell::new(HashMap::new()),
            next_image: Cell::new(0),
            acquire_results: RefCell::new(VecDeque::new()),
            swapchain_failures: RefCell::new(VecDeque::new()),
            present_results: RefCell::new(VecDeque::new()),
            fences: RefCell::new(HashMap::new()),
            hung: Cell::new(false),
            calls: RefCell::new(Vec::new()),
            framebuffer_extents: RefCell::new(HashMap::new()),
            viewports: RefCell::new(Vec::new()),
        }
    }

    fn alloc<H: Handle>(&self, kind: &'static str) -> H {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        self.live.borrow_mut().insert(raw, kind);
        H::from_raw(raw)
    }

    fn release<H: Handle>(&self, handle: H, kind: &'static str) {
        let raw = handle.as_raw();
        match self.live.borrow_mut().remove(&raw) {
            Some(found) => assert_eq!(found, kind, "handle {raw:#x} released as the wrong kind"),
            None => panic!("double free or unknown {kind} {raw:#x}"),
        }
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn live_count(&self, kind: &str) -> usize {
        self.live.borrow().values().filter(|&&k| k == kind).count()
    }

    pub fn is_live<H: Handle>(&self, handle: H) -> bool {
        self.live.borrow().contains_key(&handle.as_raw())
    }

    pub fn assert_no_leaks(&self) {
        let live = self.live.borrow();
        assert!(live.is_empty(), "leaked objects: {:?}", live.values().collect::<Vec<_>>());
    }

    pub fn framebuffer_extent(&self, framebuffer: vk::Framebuffer) -> Option<vk::Extent2D> {
        self.framebuffer_extents
            .borrow()
            .get(&framebuffer.as_raw())
            .copied()
    }

    pub fn last_viewport(&self) -> Option<vk::Viewport> {
        self.viewports.borrow().last().copied()
    }

    pub fn set_current_extent(&self, extent: vk::Extent2D) {
        self.support.borrow_mut().capabilities.current_extent = extent;
    }

    pub fn set_min_image_count(&self, count: u32) {
        self.support.borrow_mut().capabilities.min_image_count = count;
    }

    pub fn disable_depth_formats(&self) {
        self.depth_formats.set(false);
    }

    /// Every pending fence stays pending and waits on it time out.
    pub fn hang(&self) {
        self.hung.set(true);
    }

    /// Marks a fence as submitted without going through `queue_submit`.
    pub fn signal_later(&self, fence: vk::Fence) {
        self.fences
            .borrow_mut()
            .insert(fence.as_raw(), FenceState::Pending);
    }

    pub fn fail_next_acquire(&self, result: vk::Result) {
        self.acquire_results.borrow_mut().push_back(Err(result));
    }

    /// Queues the result of a later acquire, e.g. `Ok((1, true))` for a
    /// suboptimal image. Round-robin resumes after the queued index.
    pub fn push_acquire_result(&self, result: VkResult<(u32, bool)>) {
        self.acquire_results.borrow_mut().push_back(result);
    }

    /// The next `create_swapchain` fails without creating anything.
    pub fn fail_next_swapchain(&self, result: vk::Result) {
        self.swapchain_failures.borrow_mut().push_back(result);
    }

    pub fn push_present_result(&self, result: VkResult<bool>) {
        self.present_results.borrow_mut().push_back(result);
    }

    fn fence_state(&self, fence: vk::Fence) -> FenceState {
        match self.fences.borrow().get(&fence.as_raw()) {
            Some(&state) => state,
            None => panic!("unknown fence {:#x}", fence.as_raw()),
        }
    }

    fn set_fence(&self, fence: vk::Fence, state: FenceState) {
        self.fences.borrow_mut().insert(fence.as_raw(), state);
    }
}

impl GpuDevice for MockGpu {
    fn wait_idle(&self) -> VkResult<()> {
        self.record(Call::WaitIdle);
        let mut fences = self.fences.borrow_mut();
        if self.hung.get() && fences.values().any(|&s| s == FenceState::Pending) {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        for state in fences.values_mut() {
            if *state == FenceState::Pending {
                *state = FenceState::Signaled;
            }
        }
        Ok(())
    }

    fn swapchain_support(&self) -> VkResult<SwapchainSupportInfo> {
        Ok(self.support.borrow().clone())
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        if self.depth_formats.get() && format == vk::Format::D32_SFLOAT {
            vk::FormatProperties {
                optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                ..Default::default()
            }
        } else {
            vk::FormatProperties::default()
        }
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        assert!(desc.extent.width > 0 && desc.extent.height > 0, "zero-sized swapchain");
        let retired = (desc.old_swapchain != vk::SwapchainKHR::null()).then_some(desc.old_swapchain);
        if let Some(old) = retired {
            assert!(self.is_live(old), "old_swapchain is not a live swapchain");
        }
        self.record(Call::CreateSwapchain { retired });
        if let Some(err) = self.swapchain_failures.borrow_mut().pop_front() {
            return Err(err);
        }

        let handle: vk::SwapchainKHR = self.alloc("swapchain");
        self.swapchains
            .borrow_mut()
            .insert(handle.as_raw(), desc.image_count);
        self.next_image.set(0);
        Ok(handle)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let count = self.swapchains.borrow()[&swapchain.as_raw()];
        // owned by the swapchain, so never entered in the live set
        Ok((0..count)
            .map(|i| vk::Image::from_raw((swapchain.as_raw() << 8) | i as u64))
            .collect())
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.swapchains.borrow_mut().remove(&swapchain.as_raw());
        self.release(swapchain, "swapchain");
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        _signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        self.record(Call::Acquire);
        let count = match self.swapchains.borrow().get(&swapchain.as_raw()) {
            Some(&count) => count,
            None => panic!("acquire on a destroyed swapchain"),
        };
        if let Some(result) = self.acquire_results.borrow_mut().pop_front() {
            if let Ok((index, _)) = result {
                assert!(index < count, "queued acquire index {index} out of range");
                self.next_image.set(index + 1);
            }
            return result;
        }
        let index = self.next_image.get() % count;
        self.next_image.set(index + 1);
        Ok((index, false))
    }

    fn queue_present(
        &self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        _wait: vk::Semaphore,
    ) -> VkResult<bool> {
        self.record(Call::Present { image: image_index });
        self.present_results
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(false))
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> VkResult<vk::ImageView> {
        Ok(self.alloc("image_view"))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.release(view, "image_view");
    }

    fn create_depth_image(
        &self,
        _extent: vk::Extent2D,
        _format: vk::Format,
    ) -> VkResult<(vk::Image, vk::DeviceMemory)> {
        Ok((self.alloc("image"), self.alloc("memory")))
    }

    fn destroy_image(&self, image: vk::Image, memory: vk::DeviceMemory) {
        self.release(image, "image");
        self.release(memory, "memory");
    }

    fn create_render_pass(
        &self,
        _color_format: vk::Format,
        _depth_format: vk::Format,
    ) -> VkResult<vk::RenderPass> {
        self.record(Call::CreateRenderPass);
        Ok(self.alloc("render_pass"))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.release(render_pass, "render_pass");
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        assert_eq!(attachments.len(), 2, "framebuffer needs colour and depth views");
        let fb: vk::Framebuffer = self.alloc("framebuffer");
        self.framebuffer_extents
            .borrow_mut()
            .insert(fb.as_raw(), extent);
        Ok(fb)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.release(framebuffer, "framebuffer");
    }

    fn allocate_command_buffers(&self, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        Ok((0..count).map(|_| self.alloc("command_buffer")).collect())
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        for &b in buffers {
            self.release(b, "command_buffer");
        }
    }

    fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        assert!(self.is_live(buffer), "begin on a freed command buffer");
        self.record(Call::BeginCommandBuffer(buffer));
        Ok(())
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
        self.record(Call::EndCommandBuffer(buffer));
        Ok(())
    }

    fn cmd_set_viewport(&self, _buffer: vk::CommandBuffer, viewport: &vk::Viewport) {
        self.viewports.borrow_mut().push(*viewport);
    }

    fn cmd_set_scissor(&self, _buffer: vk::CommandBuffer, _scissor: &vk::Rect2D) {}

    fn cmd_begin_render_pass(
        &self,
        _buffer: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        _area: vk::Rect2D,
        _clear_values: &[vk::ClearValue],
    ) {
        self.record(Call::BeginRenderPass { framebuffer });
    }

    fn cmd_end_render_pass(&self, _buffer: vk::CommandBuffer) {
        self.record(Call::EndRenderPass);
    }

    fn queue_submit(&self, submit: &FrameSubmit) -> VkResult<()> {
        assert_eq!(
            self.fence_state(submit.fence),
            FenceState::Unsignaled,
            "submitted with a fence that was not reset"
        );
        self.record(Call::Submit {
            command_buffer: submit.command_buffer,
            fence: submit.fence,
        });
        self.set_fence(submit.fence, FenceState::Pending);
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        Ok(self.alloc("semaphore"))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.release(semaphore, "semaphore");
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let fence: vk::Fence = self.alloc("fence");
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        self.set_fence(fence, state);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        assert_ne!(
            self.fence_state(fence),
            FenceState::Pending,
            "destroyed a fence the GPU still owns"
        );
        self.fences.borrow_mut().remove(&fence.as_raw());
        self.release(fence, "fence");
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        self.record(Call::WaitFence);
        match self.fence_state(fence) {
            FenceState::Signaled => Ok(()),
            FenceState::Pending if self.hung.get() => Err(vk::Result::TIMEOUT),
            FenceState::Pending => {
                self.set_fence(fence, FenceState::Signaled);
                Ok(())
            }
            FenceState::Unsignaled => {
                assert_ne!(timeout_ns, u64::MAX, "unbounded wait on a fence nothing will signal");
                Err(vk::Result::TIMEOUT)
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        assert_ne!(
            self.fence_state(fence),
            FenceState::Pending,
            "reset a fence the GPU still owns"
        );
        self.record(Call::ResetFence);
        self.set_fence(fence, FenceState::Unsignaled);
        Ok(())
    }
}

#[derive(Clone)]
pub struct MockPhysicalDevice {
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub families: Vec<vk::QueueFamilyProperties>,
    pub present_families: Vec<u32>,
    pub swapchain_support: SwapchainSupportInfo,
    pub extensions: Vec<CString>,
}

impl MockPhysicalDevice {
    /// A discrete GPU with one all-purpose queue family that can present.
    pub fn capable(name: &str) -> Self {
        let mut properties = vk::PhysicalDeviceProperties {
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };
        for (dst, src) in properties.device_name.iter_mut().zip(name.bytes()) {
            *dst = src as c_char;
        }

        Self {
            properties,
            features: vk::PhysicalDeviceFeatures {
                sampler_anisotropy: vk::TRUE,
                ..Default::default()
            },
            memory: vk::PhysicalDeviceMemoryProperties::default(),
            families: vec![vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS
                    | vk::QueueFlags::COMPUTE
                    | vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            }],
            present_families: vec![0],
            swapchain_support: mock_swapchain_support(),
            extensions: vec![ash::khr::swapchain::NAME.to_owned()],
        }
    }
}

#[derive(Default)]
pub struct MockInstance {
    pub devices: Vec<MockPhysicalDevice>,
}

impl MockInstance {
    pub fn handle_of(&self, index: usize) -> vk::PhysicalDevice {
        vk::PhysicalDevice::from_raw(index as u64 + 1)
    }

    fn device(&self, handle: vk::PhysicalDevice) -> &MockPhysicalDevice {
        &self.devices[handle.as_raw() as usize - 1]
    }
}

impl PhysicalDeviceSource for MockInstance {
    fn physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        Ok((0..self.devices.len()).map(|i| self.handle_of(i)).collect())
    }

    fn properties(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        self.device(device).properties
    }

    fn features(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
        self.device(device).features
    }

    fn memory_properties(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties {
        self.device(device).memory
    }

    fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        self.device(device).families.clone()
    }

    fn supports_present(&self, device: vk::PhysicalDevice, family: u32) -> VkResult<bool> {
        Ok(self.device(device).present_families.contains(&family))
    }

    fn swapchain_support(&self, device: vk::PhysicalDevice) -> VkResult<SwapchainSupportInfo> {
        Ok(self.device(device).swapchain_support.clone())
    }

    fn extension_names(&self, device: vk::PhysicalDevice) -> VkResult<Vec<CString>> {
        Ok(self.device(device).extensions.clone())
    }
}
