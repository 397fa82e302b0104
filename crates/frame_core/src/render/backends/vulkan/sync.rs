//! Vulkan synchronization primitives for GPU/CPU coordination

use super::context::GpuDevice;
use crate::render::{RenderError, RenderResult};
use ash::vk;
use std::sync::Arc;

/// Semaphore wrapper with RAII cleanup
pub struct Semaphore {
    gpu: Arc<GpuDevice>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a binary semaphore
    pub fn new(gpu: &Arc<GpuDevice>) -> RenderResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe {
            gpu.device
                .create_semaphore(&create_info, None)
                .map_err(RenderError::Api)?
        };

        Ok(Self {
            gpu: Arc::clone(gpu),
            semaphore,
        })
    }

    /// Get semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.gpu.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    gpu: Arc<GpuDevice>,
    fence: vk::Fence,
}

impl Fence {
    /// Create a fence, optionally already signaled
    pub fn new(gpu: &Arc<GpuDevice>, signaled: bool) -> RenderResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { gpu.device.create_fence(&create_info, None).map_err(RenderError::Api)? };

        Ok(Self {
            gpu: Arc::clone(gpu),
            fence,
        })
    }

    /// Wait for fence to be signaled
    pub fn wait(&self, timeout: u64) -> RenderResult<()> {
        unsafe {
            self.gpu
                .device
                .wait_for_fences(&[self.fence], true, timeout)
                .map_err(RenderError::Api)
        }
    }

    /// Reset fence to unsignaled state
    pub fn reset(&self) -> RenderResult<()> {
        unsafe { self.gpu.device.reset_fences(&[self.fence]).map_err(RenderError::Api) }
    }

    /// Get fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.gpu.device.destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization objects of one frame slot
///
/// The render-finished semaphore lives per swapchain image instead, since the
/// presentation engine may still hold it after the slot's fence signals.
pub struct FrameSync {
    /// Signaled when the acquired swapchain image is ready
    pub image_available: Semaphore,
    /// Signaled when the slot's submission completes; created signaled
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create frame synchronization objects
    pub fn new(gpu: &Arc<GpuDevice>) -> RenderResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(gpu)?,
            in_flight: Fence::new(gpu, true)?,
        })
    }
}
