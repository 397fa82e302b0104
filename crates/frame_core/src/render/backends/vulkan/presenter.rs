//! Swap surface over a Vulkan swapchain
//!
//! Per frame slot: one fence (created signaled), one image-available
//! semaphore and one command buffer. Per swapchain image: one
//! render-finished semaphore, since presentation may still be waiting on it
//! after the slot's fence has signaled.

use super::commands::{CommandPool, VkCommandRecorder};
use super::context::GpuDevice;
use super::swapchain::Swapchain;
use super::sync::{FrameSync, Semaphore};
use crate::render::{
    AcquireOutcome, CommandRecorder, FrameSlot, PerFrame, PresentOutcome, RenderError, RenderResult, SwapSurface,
    TargetView,
};
use ash::extensions::khr::Surface;
use ash::vk;
use log::{debug, trace};
use std::sync::Arc;

/// [`SwapSurface`] implementation presenting to a window surface
pub struct VulkanPresenter {
    gpu: Arc<GpuDevice>,
    surface_loader: Surface,
    surface: vk::SurfaceKHR,
    present_mode: vk::PresentModeKHR,
    swapchain: Option<Swapchain>,
    extent: vk::Extent2D,
    render_finished: Vec<Semaphore>,
    frames: PerFrame<FrameSync>,
    command_buffers: PerFrame<vk::CommandBuffer>,
    _command_pool: CommandPool,
}

impl VulkanPresenter {
    /// Take ownership of `surface` and build the swapchain and per-slot objects
    pub fn new(
        gpu: &Arc<GpuDevice>,
        surface_loader: Surface,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
        present_mode: vk::PresentModeKHR,
        frames_in_flight: usize,
    ) -> RenderResult<Self> {
        let swapchain = Swapchain::new(
            gpu,
            &surface_loader,
            surface,
            window_extent,
            present_mode,
            vk::SwapchainKHR::null(),
        )?;
        let render_finished = (0..swapchain.image_count())
            .map(|_| Semaphore::new(gpu))
            .collect::<RenderResult<Vec<_>>>()?;

        let frames = PerFrame::new(frames_in_flight, |_| FrameSync::new(gpu))?;
        let command_pool = CommandPool::new(gpu, gpu.graphics_family)?;
        let mut allocated = command_pool.allocate_command_buffers(frames_in_flight as u32)?.into_iter();
        let command_buffers = PerFrame::new(frames_in_flight, |_| {
            allocated
                .next()
                .ok_or_else(|| RenderError::InitializationFailed("Too few command buffers".to_string()))
        })?;

        debug!("Created presenter with {} frames in flight", frames_in_flight);

        Ok(Self {
            gpu: Arc::clone(gpu),
            surface_loader,
            surface,
            present_mode,
            extent: swapchain.extent(),
            swapchain: Some(swapchain),
            render_finished,
            frames,
            command_buffers,
            _command_pool: command_pool,
        })
    }

    /// Color format of the swapchain images
    pub fn format(&self) -> vk::Format {
        self.swapchain
            .as_ref()
            .map_or(vk::Format::B8G8R8A8_UNORM, |swapchain| swapchain.format())
    }

    fn swapchain(&self) -> RenderResult<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| RenderError::InvalidOperation("swapchain not available".to_string()))
    }
}

impl SwapSurface for VulkanPresenter {
    fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn wait_for_slot(&mut self, slot: FrameSlot) -> RenderResult<()> {
        self.frames[slot].in_flight.wait(u64::MAX)
    }

    fn acquire_image(&mut self, slot: FrameSlot) -> RenderResult<AcquireOutcome> {
        let swapchain = self.swapchain()?.handle();
        let semaphore = self.frames[slot].image_available.handle();

        let result = unsafe {
            self.gpu
                .swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(RenderError::Api(e)),
        }
    }

    fn record(
        &mut self,
        slot: FrameSlot,
        image_index: u32,
        record: &mut dyn FnMut(&mut dyn CommandRecorder, &TargetView) -> RenderResult<()>,
    ) -> RenderResult<()> {
        let target = self
            .swapchain()?
            .target(image_index)
            .ok_or_else(|| RenderError::InvalidOperation(format!("no swapchain image {}", image_index)))?;
        let command_buffer = self.command_buffers[slot];
        let device = &self.gpu.device;

        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(RenderError::Api)?;
            let begin_info =
                vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(RenderError::Api)?;
        }

        let mut recorder = VkCommandRecorder::new(device, command_buffer);
        let recorded = record(&mut recorder, &target);
        let ended = unsafe { device.end_command_buffer(command_buffer).map_err(RenderError::Api) };
        recorded.and(ended)
    }

    fn submit_and_present(&mut self, slot: FrameSlot, image_index: u32) -> RenderResult<PresentOutcome> {
        let swapchain = self.swapchain()?.handle();
        let render_finished = self
            .render_finished
            .get(image_index as usize)
            .map(Semaphore::handle)
            .ok_or_else(|| RenderError::InvalidOperation(format!("no swapchain image {}", image_index)))?;
        let frame = &self.frames[slot];

        let wait_semaphores = [frame.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffers[slot]];
        let signal_semaphores = [render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        frame.in_flight.reset()?;
        unsafe {
            self.gpu
                .device
                .queue_submit(self.gpu.graphics_queue, &[submit_info], frame.in_flight.handle())
                .map_err(RenderError::Api)?;
        }

        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.gpu
                .swapchain_loader
                .queue_present(self.gpu.present_queue, &present_info)
        };
        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                trace!("Present reported a stale swapchain");
                Ok(PresentOutcome::Stale)
            }
            Err(e) => Err(RenderError::Api(e)),
        }
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        self.gpu.wait_idle()?;
        if extent.width == 0 || extent.height == 0 {
            self.extent = extent;
            return Ok(());
        }

        let old = self.swapchain.take();
        let old_handle = old.as_ref().map_or(vk::SwapchainKHR::null(), Swapchain::handle);
        let swapchain = Swapchain::new(
            &self.gpu,
            &self.surface_loader,
            self.surface,
            extent,
            self.present_mode,
            old_handle,
        )?;
        drop(old);

        if swapchain.image_count() != self.render_finished.len() {
            self.render_finished = (0..swapchain.image_count())
                .map(|_| Semaphore::new(&self.gpu))
                .collect::<RenderResult<Vec<_>>>()?;
        }
        self.extent = swapchain.extent();
        self.swapchain = Some(swapchain);
        Ok(())
    }

    fn wait_idle(&self) -> RenderResult<()> {
        self.gpu.wait_idle()
    }
}

impl Drop for VulkanPresenter {
    fn drop(&mut self) {
        let _ = self.gpu.wait_idle();
        self.swapchain = None;
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }
        debug!("Destroyed presenter");
    }
}
