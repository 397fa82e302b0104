//! Swapchain creation and recreation
//!
//! The tone-mapping pass applies gamma itself, so a UNORM surface format is
//! preferred over an sRGB one.

use super::context::GpuDevice;
use crate::render::target::TargetView;
use crate::render::{RenderError, RenderResult};
use ash::extensions::khr::Surface;
use ash::vk;
use log::debug;
use std::sync::Arc;

/// Swapchain wrapper owning its image views
pub struct Swapchain {
    gpu: Arc<GpuDevice>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for `surface`, retiring `old_swapchain` if not null
    pub fn new(
        gpu: &Arc<GpuDevice>,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
        present_mode: vk::PresentModeKHR,
        old_swapchain: vk::SwapchainKHR,
    ) -> RenderResult<Self> {
        let physical_device = gpu.physical_device;
        let surface_caps = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(physical_device, surface)
                .map_err(RenderError::Api)?
        };
        let surface_formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
                .map_err(RenderError::Api)?
        };
        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(physical_device, surface)
                .map_err(RenderError::Api)?
        };

        let format = choose_surface_format(&surface_formats)
            .ok_or_else(|| RenderError::UnsupportedDevice("Surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&present_modes, present_mode);
        let extent = choose_extent(&surface_caps, window_extent);
        let image_count = choose_image_count(&surface_caps);

        let mut queue_families = vec![gpu.graphics_family];
        let sharing_mode = if gpu.present_family != gpu.graphics_family {
            queue_families.push(gpu.present_family);
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };

        let swapchain_create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_families)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let loader = &gpu.swapchain_loader;
        let swapchain = unsafe {
            loader
                .create_swapchain(&swapchain_create_info, None)
                .map_err(RenderError::Api)?
        };

        let mut created = Self {
            gpu: Arc::clone(gpu),
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format,
            extent,
        };

        created.images = unsafe { loader.get_swapchain_images(swapchain).map_err(RenderError::Api)? };
        for &image in &created.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { gpu.device.create_image_view(&create_info, None).map_err(RenderError::Api)? };
            created.image_views.push(view);
        }

        debug!(
            "Created swapchain: {} images, {:?}, {}x{}, {:?}",
            created.images.len(),
            format.format,
            extent.width,
            extent.height,
            present_mode
        );
        Ok(created)
    }

    /// Swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Image format
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    /// Number of swapchain images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Target view of image `index`
    pub fn target(&self, index: u32) -> Option<TargetView> {
        let index = index as usize;
        Some(TargetView {
            image: *self.images.get(index)?,
            view: *self.image_views.get(index)?,
            sampler: vk::Sampler::null(),
            format: self.format.format,
            extent: self.extent,
            aspect: vk::ImageAspectFlags::COLOR,
        })
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.gpu.device.destroy_image_view(view, None);
            }
            self.gpu.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
        debug!("Destroyed swapchain");
    }
}

/// Prefer B8G8R8A8_UNORM with sRGB-nonlinear color space, else the first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_UNORM && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// The preferred mode when offered, else FIFO (always supported)
pub fn choose_present_mode(available: &[vk::PresentModeKHR], preferred: vk::PresentModeKHR) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Surface-dictated extent, else the window extent clamped to the limits
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window_extent
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window_extent
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum when it exists
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}
