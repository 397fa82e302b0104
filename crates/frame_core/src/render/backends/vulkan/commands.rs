//! Command pool and the Vulkan command recorder

use super::context::GpuDevice;
use crate::render::recorder::{AttachmentDesc, AttachmentLoad, CommandRecorder, ImageTransition, RenderingDesc};
use crate::render::{RenderError, RenderResult};
use ash::vk;
use std::sync::Arc;

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    gpu: Arc<GpuDevice>,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually
    pub fn new(gpu: &Arc<GpuDevice>, queue_family_index: u32) -> RenderResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe {
            gpu.device
                .create_command_pool(&pool_create_info, None)
                .map_err(RenderError::Api)?
        };

        Ok(Self {
            gpu: Arc::clone(gpu),
            command_pool,
        })
    }

    /// Allocate command buffers
    pub fn allocate_command_buffers(&self, count: u32) -> RenderResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe {
            self.gpu
                .device
                .allocate_command_buffers(&alloc_info)
                .map_err(RenderError::Api)
        }
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees its command buffers
            self.gpu.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// [`CommandRecorder`] writing into a command buffer in the recording state
pub struct VkCommandRecorder<'a> {
    device: &'a ash::Device,
    command_buffer: vk::CommandBuffer,
}

impl<'a> VkCommandRecorder<'a> {
    /// Wrap a command buffer that has already begun recording
    pub fn new(device: &'a ash::Device, command_buffer: vk::CommandBuffer) -> Self {
        Self { device, command_buffer }
    }
}

fn attachment_info(
    desc: &AttachmentDesc,
    layout: vk::ImageLayout,
) -> vk::RenderingAttachmentInfo {
    let (load_op, clear_value) = match desc.load {
        AttachmentLoad::Clear(clear) => (vk::AttachmentLoadOp::CLEAR, clear.to_vk()),
        AttachmentLoad::Load => (vk::AttachmentLoadOp::LOAD, vk::ClearValue::default()),
        AttachmentLoad::DontCare => (vk::AttachmentLoadOp::DONT_CARE, vk::ClearValue::default()),
    };
    let store_op = if desc.store {
        vk::AttachmentStoreOp::STORE
    } else {
        vk::AttachmentStoreOp::DONT_CARE
    };

    vk::RenderingAttachmentInfo::builder()
        .image_view(desc.view)
        .image_layout(layout)
        .load_op(load_op)
        .store_op(store_op)
        .clear_value(clear_value)
        .build()
}

impl CommandRecorder for VkCommandRecorder<'_> {
    fn begin_rendering(&mut self, desc: &RenderingDesc) {
        let color: Vec<vk::RenderingAttachmentInfo> = desc
            .color
            .iter()
            .map(|attachment| attachment_info(attachment, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
            .collect();
        let depth = desc
            .depth
            .map(|attachment| attachment_info(&attachment, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL));

        let mut rendering_info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: desc.extent,
            })
            .layer_count(1)
            .color_attachments(&color);
        if let Some(depth) = depth.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        unsafe {
            self.device.cmd_begin_rendering(self.command_buffer, &rendering_info);
        }
    }

    fn end_rendering(&mut self) {
        unsafe {
            self.device.cmd_end_rendering(self.command_buffer);
        }
    }

    fn transition_image(&mut self, transition: &ImageTransition) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(transition.old_layout)
            .new_layout(transition.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(transition.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: transition.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(transition.src_access)
            .dst_access_mask(transition.dst_access)
            .build();

        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                transition.src_stage,
                transition.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn set_viewport_scissor(&mut self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            self.device.cmd_set_viewport(self.command_buffer, 0, &[viewport]);
            self.device.cmd_set_scissor(self.command_buffer, 0, &[scissor]);
        }
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn bind_descriptor_set(
        &mut self,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set_index,
                &[set],
                dynamic_offsets,
            );
        }
    }

    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, bytes: &[u8]) {
        unsafe {
            self.device
                .cmd_push_constants(self.command_buffer, layout, stages, offset, bytes);
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.command_buffer, 0, &[buffer], &[0]);
        }
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.command_buffer, buffer, 0, vk::IndexType::UINT32);
        }
    }

    fn set_cull_mode(&mut self, cull_mode: vk::CullModeFlags) {
        unsafe {
            self.device.cmd_set_cull_mode(self.command_buffer, cull_mode);
        }
    }

    fn set_depth_bias(&mut self, constant_factor: f32, slope_factor: f32) {
        unsafe {
            self.device
                .cmd_set_depth_bias(self.command_buffer, constant_factor, 0.0, slope_factor);
        }
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32) {
        unsafe {
            self.device
                .cmd_draw_indexed(self.command_buffer, index_count, 1, first_index, 0, 0);
        }
    }

    fn draw(&mut self, vertex_count: u32) {
        unsafe {
            self.device.cmd_draw(self.command_buffer, vertex_count, 1, 0, 0);
        }
    }
}
