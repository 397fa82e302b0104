//! # Frame Renderer
//!
//! Entry point for applications. Owns the Vulkan instance, the logical
//! device and a [`FrameDriver`] running the Vulkan pass chain against a
//! window surface.
//!
//! Teardown runs passes first, then the presenter (swapchain and surface),
//! then the device, then the instance. Meshes and images uploaded through
//! this type hold the device alive and must be dropped before it.

use super::backends::vulkan::{GpuDevice, GpuMesh, PhysicalDeviceInfo, Texture, VulkanInstance, VulkanPresenter};
use super::chain::PassChain;
use super::driver::{FrameDriver, FrameOutcome, SwapSurface};
use super::passes::VulkanPassFactory;
use super::{RenderError, RenderResult};
use crate::config::RendererConfig;
use crate::scene::{ImageHandle, MeshBuffers, MeshData, NodeKey, SceneGraph, SceneSnapshot};
use ash::vk;
use log::{error, info};
use std::sync::Arc;

/// Vulkan frame renderer bound to one window surface
pub struct FrameRenderer {
    // Field order is drop order
    driver: FrameDriver<VulkanPresenter, VulkanPassFactory>,
    gpu: Arc<GpuDevice>,
    instance: VulkanInstance,
}

impl FrameRenderer {
    /// Initialize Vulkan and the presentation surface
    ///
    /// `required_extensions` are the window system's instance extensions.
    /// `create_surface` is called once with the new instance and returns the
    /// window surface, which the renderer then owns.
    pub fn new(
        config: &RendererConfig,
        required_extensions: &[String],
        create_surface: impl FnOnce(&VulkanInstance) -> RenderResult<vk::SurfaceKHR>,
        window_extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        config.validate()?;

        let instance = VulkanInstance::new(
            &config.application_name,
            required_extensions,
            config.validation_enabled(),
        )?;
        let surface = create_surface(&instance)?;

        let (gpu, presenter) = match Self::create_device_and_presenter(config, &instance, surface, window_extent) {
            Ok(created) => created,
            Err(e) => {
                // The presenter never took ownership of the surface
                unsafe { instance.surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        let factory = VulkanPassFactory::new(&gpu, config, presenter.format())?;
        let driver = FrameDriver::new(presenter, factory, config.clear_color);

        info!(
            "Frame renderer ready: {}x{}, {} frames in flight",
            window_extent.width, window_extent.height, config.frames_in_flight
        );

        Ok(Self { driver, gpu, instance })
    }

    fn create_device_and_presenter(
        config: &RendererConfig,
        instance: &VulkanInstance,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
    ) -> RenderResult<(Arc<GpuDevice>, VulkanPresenter)> {
        let physical = PhysicalDeviceInfo::select_suitable_device(instance, surface)?;
        let gpu = GpuDevice::new(instance, &physical)?;
        let presenter = VulkanPresenter::new(
            &gpu,
            instance.surface_loader.clone(),
            surface,
            window_extent,
            config.present_mode.to_vk(),
            config.frames_in_flight,
        )?;
        Ok((gpu, presenter))
    }

    /// Walk the graph below `root` and rebuild every pass for it
    pub fn load_scene(&mut self, graph: &SceneGraph, root: NodeKey) -> RenderResult<()> {
        self.driver.load_scene(graph, root)
    }

    /// Draw one frame of `graph`
    pub fn draw_frame(&mut self, graph: &SceneGraph) -> RenderResult<FrameOutcome> {
        self.driver.draw_frame(graph)
    }

    /// Schedule a resize to the new framebuffer size
    pub fn on_resize(&mut self, width: u32, height: u32) {
        self.driver.on_resize(width, height);
    }

    /// Wait for the GPU and release every pass; idempotent
    pub fn shutdown(&mut self) -> RenderResult<()> {
        self.driver.shutdown()
    }

    /// Upload vertex and index data for use as [`crate::scene::Mesh`] buffers
    pub fn upload_mesh(&self, data: &MeshData) -> RenderResult<Arc<dyn MeshBuffers>> {
        Ok(Arc::new(GpuMesh::upload(&self.gpu, data)?))
    }

    /// Upload a tightly packed RGBA8 image for use in materials
    pub fn upload_texture(&self, width: u32, height: u32, pixels: &[u8]) -> RenderResult<ImageHandle> {
        Ok(Arc::new(Texture::from_rgba8(&self.gpu, width, height, pixels)?))
    }

    /// Shared logical device
    pub fn gpu(&self) -> &Arc<GpuDevice> {
        &self.gpu
    }

    /// Vulkan instance
    pub fn instance(&self) -> &VulkanInstance {
        &self.instance
    }

    /// Passes built for the loaded scene
    pub fn chain(&self) -> &PassChain {
        self.driver.chain()
    }

    /// Snapshot of the loaded scene
    pub fn snapshot(&self) -> &SceneSnapshot {
        self.driver.snapshot()
    }

    /// Swapchain extent currently rendered to
    pub fn extent(&self) -> vk::Extent2D {
        self.driver.surface().extent()
    }
}

impl Drop for FrameRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.driver.shutdown() {
            error!("Frame renderer shutdown failed: {}", e);
        }
    }
}

impl std::fmt::Debug for FrameRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRenderer")
            .field("passes", &self.driver.chain().pass_names())
            .field("frame", &self.driver.frame_index())
            .finish()
    }
}

/// Map a window-system failure into a render error
pub fn surface_error(reason: impl std::fmt::Display) -> RenderError {
    RenderError::InitializationFailed(format!("Failed to create window surface: {}", reason))
}
