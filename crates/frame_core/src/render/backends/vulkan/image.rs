//! Render targets and sampled textures

use super::buffer::GpuBuffer;
use super::commands::VkCommandRecorder;
use super::context::GpuDevice;
use crate::render::recorder::{CommandRecorder, ImageTransition};
use crate::render::target::{SamplerKind, TargetSpec, TargetView};
use crate::render::{RenderError, RenderResult};
use crate::scene::SampledImage;
use ash::vk;
use log::debug;
use std::sync::Arc;

/// Image, memory and view owned together
struct ImageAllocation {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

impl ImageAllocation {
    fn new(
        gpu: &GpuDevice,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> RenderResult<Self> {
        let device = &gpu.device;
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe { device.create_image(&image_info, None).map_err(RenderError::Api)? };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = gpu
            .find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .and_then(|memory_type_index| {
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(requirements.size)
                    .memory_type_index(memory_type_index);
                unsafe { device.allocate_memory(&alloc_info, None).map_err(RenderError::Api) }
            });
        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view = unsafe { device.bind_image_memory(image, memory, 0) }
            .map_err(RenderError::Api)
            .and_then(|_| {
                let view_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format)
                    .subresource_range(subresource_range(aspect));
                unsafe { device.create_image_view(&view_info, None).map_err(RenderError::Api) }
            });
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                return Err(e);
            }
        };

        Ok(Self { image, memory, view })
    }

    fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Create a sampler of the given kind
pub fn create_sampler(gpu: &GpuDevice, kind: SamplerKind) -> RenderResult<vk::Sampler> {
    let info = match kind {
        SamplerKind::Linear => vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(1.0),
        // Outside the map counts as lit
        SamplerKind::DepthCompare => vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
            .compare_enable(true)
            .compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .max_lod(1.0),
    };

    unsafe { gpu.device.create_sampler(&info, None).map_err(RenderError::Api) }
}

/// Single-owner attachment image sized to a pass
pub struct RenderTarget {
    gpu: Arc<GpuDevice>,
    spec: TargetSpec,
    allocation: ImageAllocation,
    sampler: vk::Sampler,
}

impl RenderTarget {
    /// Allocate a target described by `spec`
    pub fn new(gpu: &Arc<GpuDevice>, spec: TargetSpec) -> RenderResult<Self> {
        let allocation = ImageAllocation::new(gpu, spec.extent, spec.format, spec.usage, spec.aspect)?;

        let sampler = match spec.sampler {
            Some(kind) => match create_sampler(gpu, kind) {
                Ok(sampler) => sampler,
                Err(e) => {
                    allocation.destroy(&gpu.device);
                    return Err(e);
                }
            },
            None => vk::Sampler::null(),
        };

        debug!(
            "Created render target {:?} {}x{}",
            spec.format, spec.extent.width, spec.extent.height
        );

        Ok(Self {
            gpu: Arc::clone(gpu),
            spec,
            allocation,
            sampler,
        })
    }

    /// Description this target was created from
    pub fn spec(&self) -> &TargetSpec {
        &self.spec
    }

    /// Non-owning view for recording and binding
    pub fn view(&self) -> TargetView {
        TargetView {
            image: self.allocation.image,
            view: self.allocation.view,
            sampler: self.sampler,
            format: self.spec.format,
            extent: self.spec.extent,
            aspect: self.spec.aspect,
        }
    }

    /// Put the image into `new_layout` now, outside any frame
    pub fn initialize_layout(&self, new_layout: vk::ImageLayout) -> RenderResult<()> {
        let transition = ImageTransition {
            image: self.allocation.image,
            aspect: self.spec.aspect,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            src_access: vk::AccessFlags::empty(),
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            dst_access: vk::AccessFlags::SHADER_READ,
        };
        self.gpu.one_shot(|device, command_buffer| {
            VkCommandRecorder::new(device, command_buffer).transition_image(&transition);
        })
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        unsafe {
            if self.sampler != vk::Sampler::null() {
                self.gpu.device.destroy_sampler(self.sampler, None);
            }
        }
        self.allocation.destroy(&self.gpu.device);
    }
}

/// Device-local RGBA8 texture uploaded from decoded pixels
pub struct Texture {
    gpu: Arc<GpuDevice>,
    allocation: ImageAllocation,
    sampler: vk::Sampler,
    extent: vk::Extent2D,
}

impl Texture {
    /// Upload tightly packed RGBA8 `pixels` of `width` x `height`
    pub fn from_rgba8(gpu: &Arc<GpuDevice>, width: u32, height: u32, pixels: &[u8]) -> RenderResult<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(RenderError::InvalidOperation(format!(
                "texture data is {} bytes, expected {} for {}x{} RGBA8",
                pixels.len(),
                expected,
                width,
                height
            )));
        }

        let extent = vk::Extent2D { width, height };
        let allocation = ImageAllocation::new(
            gpu,
            extent,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )?;

        let sampler = match create_sampler(gpu, SamplerKind::Linear) {
            Ok(sampler) => sampler,
            Err(e) => {
                allocation.destroy(&gpu.device);
                return Err(e);
            }
        };
        let texture = Self {
            gpu: Arc::clone(gpu),
            allocation,
            sampler,
            extent,
        };

        texture.upload(pixels)?;
        Ok(texture)
    }

    /// Create a solid color 1x1 texture
    pub fn solid_color(gpu: &Arc<GpuDevice>, color: [u8; 4]) -> RenderResult<Self> {
        Self::from_rgba8(gpu, 1, 1, &color)
    }

    /// 1x1 white image bound when a scene references no images
    pub fn fallback(gpu: &Arc<GpuDevice>) -> RenderResult<Self> {
        Self::solid_color(gpu, [255, 255, 255, 255])
    }

    /// Size in texels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn upload(&self, pixels: &[u8]) -> RenderResult<()> {
        let mut staging = GpuBuffer::host_visible::<u8>(
            &self.gpu,
            pixels.len() as u32,
            vk::BufferUsageFlags::TRANSFER_SRC,
            1,
        )?;
        staging.map()?;
        staging.write_to_buffer(pixels, 0)?;
        staging.unmap();

        let image = self.allocation.image;
        let extent = self.extent;
        let range = subresource_range(vk::ImageAspectFlags::COLOR);

        self.gpu.one_shot(|device, command_buffer| {
            let to_transfer = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(range)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .build();

            let region = vk::BufferImageCopy::builder()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .build();

            let to_shader = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(range)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .build();

            unsafe {
                device.cmd_pipeline_barrier(
                    command_buffer,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_transfer],
                );
                device.cmd_copy_buffer_to_image(
                    command_buffer,
                    staging.handle(),
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
                device.cmd_pipeline_barrier(
                    command_buffer,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_shader],
                );
            }
        })
    }
}

impl SampledImage for Texture {
    fn view(&self) -> vk::ImageView {
        self.allocation.view
    }

    fn sampler(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe { self.gpu.device.destroy_sampler(self.sampler, None) };
        self.allocation.destroy(&self.gpu.device);
    }
}
