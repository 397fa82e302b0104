//! Command recording seam
//!
//! Passes record through [`CommandRecorder`] rather than calling `ash`
//! directly, so the same recording logic runs against a real command buffer
//! or against a recording log in tests.

use ash::vk;

/// Clear value of an attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// RGBA color
    Color([f32; 4]),
    /// Depth
    Depth(f32),
}

impl ClearValue {
    /// Vulkan clear value
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            ClearValue::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            ClearValue::Depth(depth) => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
            },
        }
    }
}

/// How an attachment's previous contents are treated
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttachmentLoad {
    /// Clear to a value
    Clear(ClearValue),
    /// Keep previous contents
    Load,
    /// Contents are undefined
    DontCare,
}

/// One attachment of a dynamic rendering scope
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachmentDesc {
    /// Attachment view
    pub view: vk::ImageView,
    /// Load behavior
    pub load: AttachmentLoad,
    /// Whether results are stored
    pub store: bool,
}

impl AttachmentDesc {
    /// Cleared and stored
    pub fn cleared(view: vk::ImageView, clear: ClearValue) -> Self {
        Self {
            view,
            load: AttachmentLoad::Clear(clear),
            store: true,
        }
    }

    /// Loaded and stored
    pub fn loaded(view: vk::ImageView) -> Self {
        Self {
            view,
            load: AttachmentLoad::Load,
            store: true,
        }
    }
}

/// A dynamic rendering scope
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderingDesc {
    /// Render area
    pub extent: vk::Extent2D,
    /// Color attachment in `COLOR_ATTACHMENT_OPTIMAL`
    pub color: Option<AttachmentDesc>,
    /// Depth attachment in `DEPTH_ATTACHMENT_OPTIMAL`
    pub depth: Option<AttachmentDesc>,
}

/// Image layout transition with its pipeline barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransition {
    /// Image
    pub image: vk::Image,
    /// Aspect
    pub aspect: vk::ImageAspectFlags,
    /// Current layout
    pub old_layout: vk::ImageLayout,
    /// New layout
    pub new_layout: vk::ImageLayout,
    /// Stages that must finish first
    pub src_stage: vk::PipelineStageFlags,
    /// Writes to make available
    pub src_access: vk::AccessFlags,
    /// Stages that wait
    pub dst_stage: vk::PipelineStageFlags,
    /// Accesses that wait
    pub dst_access: vk::AccessFlags,
}

impl ImageTransition {
    /// Discard contents and prepare for color writes
    pub fn color_attachment(image: vk::Image) -> Self {
        Self {
            image,
            aspect: vk::ImageAspectFlags::COLOR,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access: vk::AccessFlags::empty(),
            dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        }
    }

    /// Discard contents and prepare for depth writes
    pub fn depth_attachment(image: vk::Image) -> Self {
        Self {
            image,
            aspect: vk::ImageAspectFlags::DEPTH,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            src_stage: vk::PipelineStageFlags::LATE_FRAGMENT_TESTS | vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        }
    }

    /// Finished color attachment to fragment-shader input
    pub fn color_to_shader_read(image: vk::Image) -> Self {
        Self {
            image,
            aspect: vk::ImageAspectFlags::COLOR,
            old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            dst_access: vk::AccessFlags::SHADER_READ,
        }
    }

    /// Finished depth attachment to fragment-shader input
    pub fn depth_to_shader_read(image: vk::Image) -> Self {
        Self {
            image,
            aspect: vk::ImageAspectFlags::DEPTH,
            old_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_stage: vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            src_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            dst_access: vk::AccessFlags::SHADER_READ,
        }
    }

    /// Depth written by an earlier pass, tested by a later one
    pub fn depth_write_to_test(image: vk::Image) -> Self {
        Self {
            image,
            aspect: vk::ImageAspectFlags::DEPTH,
            old_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            new_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            src_stage: vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            src_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        }
    }

    /// Freshly acquired swapchain image to color attachment
    pub fn swap_to_attachment(image: vk::Image) -> Self {
        Self {
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            ..Self::color_attachment(image)
        }
    }

    /// Rendered swapchain image to presentation
    pub fn swap_to_present(image: vk::Image) -> Self {
        Self {
            image,
            aspect: vk::ImageAspectFlags::COLOR,
            old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            dst_access: vk::AccessFlags::empty(),
        }
    }
}

/// Everything a pass records into a frame's command buffer
pub trait CommandRecorder {
    /// Begin a dynamic rendering scope
    fn begin_rendering(&mut self, desc: &RenderingDesc);

    /// End the current rendering scope
    fn end_rendering(&mut self);

    /// Record a layout transition barrier
    fn transition_image(&mut self, transition: &ImageTransition);

    /// Set a full-extent viewport and scissor
    fn set_viewport_scissor(&mut self, extent: vk::Extent2D);

    /// Bind a graphics pipeline
    fn bind_pipeline(&mut self, pipeline: vk::Pipeline);

    /// Bind a descriptor set with its dynamic offsets
    fn bind_descriptor_set(
        &mut self,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    );

    /// Upload push constants
    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, bytes: &[u8]);

    /// Bind the vertex buffer at binding 0
    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer);

    /// Bind a `u32` index buffer
    fn bind_index_buffer(&mut self, buffer: vk::Buffer);

    /// Set the dynamic cull mode
    fn set_cull_mode(&mut self, cull_mode: vk::CullModeFlags);

    /// Set the dynamic depth bias
    fn set_depth_bias(&mut self, constant_factor: f32, slope_factor: f32);

    /// Indexed draw of one instance
    fn draw_indexed(&mut self, index_count: u32, first_index: u32);

    /// Non-indexed draw of one instance
    fn draw(&mut self, vertex_count: u32);
}
