//! Shader modules and dynamic-rendering graphics pipelines

use super::context::GpuDevice;
use crate::render::{RenderError, RenderResult};
use crate::scene::Vertex;
use ash::vk;
use log::debug;
use std::ffi::CStr;
use std::path::Path;
use std::sync::Arc;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode SPIR-V words from a shader file's bytes
pub fn parse_spirv(path: &Path, bytes: &[u8]) -> RenderResult<Vec<u32>> {
    let invalid = |reason: &str| RenderError::InvalidShader {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if bytes.len() < 4 || bytes.len() % 4 != 0 {
        return Err(invalid("length is not a positive multiple of 4"));
    }
    let words = ash::util::read_spv(&mut std::io::Cursor::new(bytes)).map_err(|e| invalid(&e.to_string()))?;
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(invalid("missing SPIR-V magic number"));
    }
    Ok(words)
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    gpu: Arc<GpuDevice>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a shader module from SPIR-V words
    pub fn from_words(gpu: &Arc<GpuDevice>, words: &[u32]) -> RenderResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);
        let module = unsafe {
            gpu.device
                .create_shader_module(&create_info, None)
                .map_err(RenderError::Api)?
        };

        Ok(Self {
            gpu: Arc::clone(gpu),
            module,
        })
    }

    /// Load a compiled shader file
    pub fn from_file(gpu: &Arc<GpuDevice>, path: &Path) -> RenderResult<Self> {
        if !path.is_file() {
            return Err(RenderError::ShaderNotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path).map_err(|e| RenderError::InvalidShader {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let words = parse_spirv(path, &bytes)?;
        debug!("Loaded shader {}", path.display());
        Self::from_words(gpu, &words)
    }

    /// Get the shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.gpu.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Pipeline layout wrapper with RAII cleanup
pub struct PipelineLayout {
    gpu: Arc<GpuDevice>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Create a layout from descriptor set layouts and push-constant ranges
    pub fn new(
        gpu: &Arc<GpuDevice>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RenderResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe {
            gpu.device
                .create_pipeline_layout(&create_info, None)
                .map_err(RenderError::Api)?
        };

        Ok(Self {
            gpu: Arc::clone(gpu),
            layout,
        })
    }

    /// Get the pipeline layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.gpu.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Graphics pipeline wrapper with RAII cleanup
pub struct GraphicsPipeline {
    gpu: Arc<GpuDevice>,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Get the pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.gpu.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

/// Builder for pipelines rendered with `vkCmdBeginRendering`
///
/// Viewport and scissor are always dynamic. Triangles are counter-clockwise
/// front-facing; the projection's Y flip keeps that winding on screen.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineBuilder {
    vertex_shader: vk::ShaderModule,
    fragment_shader: Option<vk::ShaderModule>,
    vertex_input: bool,
    color_formats: Vec<vk::Format>,
    depth_format: Option<vk::Format>,
    depth_test: bool,
    depth_write: bool,
    depth_compare: vk::CompareOp,
    cull_mode: vk::CullModeFlags,
    dynamic_cull_mode: bool,
    dynamic_depth_bias: bool,
    fragment_constants: Vec<(u32, u32)>,
}

impl GraphicsPipelineBuilder {
    /// Start a pipeline from its vertex shader
    pub fn new(vertex_shader: &ShaderModule) -> Self {
        Self {
            vertex_shader: vertex_shader.handle(),
            fragment_shader: None,
            vertex_input: true,
            color_formats: Vec::new(),
            depth_format: None,
            depth_test: false,
            depth_write: false,
            depth_compare: vk::CompareOp::LESS,
            cull_mode: vk::CullModeFlags::BACK,
            dynamic_cull_mode: false,
            dynamic_depth_bias: false,
            fragment_constants: Vec::new(),
        }
    }

    /// Fragment stage; depth-only pipelines omit it
    pub fn fragment_shader(mut self, shader: &ShaderModule) -> Self {
        self.fragment_shader = Some(shader.handle());
        self
    }

    /// Read [`Vertex`] data from binding 0; off for full-screen triangles
    pub fn vertex_input(mut self, enabled: bool) -> Self {
        self.vertex_input = enabled;
        self
    }

    /// Add a color attachment format
    pub fn color_format(mut self, format: vk::Format) -> Self {
        self.color_formats.push(format);
        self
    }

    /// Depth attachment with test/write/compare settings
    pub fn depth(mut self, format: vk::Format, test: bool, write: bool, compare: vk::CompareOp) -> Self {
        self.depth_format = Some(format);
        self.depth_test = test;
        self.depth_write = write;
        self.depth_compare = compare;
        self
    }

    /// Static cull mode
    pub fn cull_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    /// Cull mode set per draw with `set_cull_mode`
    pub fn dynamic_cull_mode(mut self) -> Self {
        self.dynamic_cull_mode = true;
        self
    }

    /// Depth bias enabled and set per pass with `set_depth_bias`
    pub fn dynamic_depth_bias(mut self) -> Self {
        self.dynamic_depth_bias = true;
        self
    }

    /// Set fragment specialization constant `id` to `value`
    pub fn fragment_constant(mut self, id: u32, value: u32) -> Self {
        self.fragment_constants.push((id, value));
        self
    }

    /// Dynamic states the pipeline declares
    pub fn dynamic_states(&self) -> Vec<vk::DynamicState> {
        let mut states = vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        if self.dynamic_cull_mode {
            states.push(vk::DynamicState::CULL_MODE);
        }
        if self.dynamic_depth_bias {
            states.push(vk::DynamicState::DEPTH_BIAS);
        }
        states
    }

    /// Create the pipeline
    pub fn build(&self, gpu: &Arc<GpuDevice>, layout: &PipelineLayout) -> RenderResult<GraphicsPipeline> {
        let entry = CStr::from_bytes_with_nul(b"main\0")
            .map_err(|e| RenderError::InitializationFailed(e.to_string()))?;

        let map_entries: Vec<vk::SpecializationMapEntry> = self
            .fragment_constants
            .iter()
            .enumerate()
            .map(|(i, &(constant_id, _))| vk::SpecializationMapEntry {
                constant_id,
                offset: (i * std::mem::size_of::<u32>()) as u32,
                size: std::mem::size_of::<u32>(),
            })
            .collect();
        let constant_values: Vec<u32> = self.fragment_constants.iter().map(|&(_, value)| value).collect();
        let specialization = vk::SpecializationInfo::builder()
            .map_entries(&map_entries)
            .data(bytemuck::cast_slice(&constant_values));

        let mut stages = vec![vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(self.vertex_shader)
            .name(entry)
            .build()];
        if let Some(fragment) = self.fragment_shader {
            stages.push(
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(fragment)
                    .name(entry)
                    .specialization_info(&specialization)
                    .build(),
            );
        }

        let bindings = [Vertex::binding_description()];
        let attributes = Vertex::attribute_descriptions();
        let vertex_input_info = if self.vertex_input {
            vk::PipelineVertexInputStateCreateInfo::builder()
                .vertex_binding_descriptions(&bindings)
                .vertex_attribute_descriptions(&attributes)
        } else {
            vk::PipelineVertexInputStateCreateInfo::builder()
        };

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(self.dynamic_depth_bias);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = self
            .color_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::builder()
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
                    .blend_enable(false)
                    .build()
            })
            .collect();
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = self.dynamic_states();
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let mut rendering_info = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&self.color_formats)
            .depth_attachment_format(self.depth_format.unwrap_or(vk::Format::UNDEFINED));

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .push_next(&mut rendering_info)
            .build();

        let pipelines = unsafe {
            gpu.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| RenderError::Api(e))?
        };
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| RenderError::InitializationFailed("No pipeline returned".to_string()))?;

        Ok(GraphicsPipeline {
            gpu: Arc::clone(gpu),
            pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spirv_header() -> Vec<u8> {
        [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect()
    }

    #[test]
    fn test_parse_spirv_accepts_header() {
        let words = parse_spirv(Path::new("ok.spv"), &spirv_header()).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
        assert_eq!(words.len(), 5);
    }

    #[test]
    fn test_parse_spirv_rejects_garbage() {
        let path = Path::new("bad.spv");
        assert!(matches!(
            parse_spirv(path, &[1, 2, 3]),
            Err(RenderError::InvalidShader { .. })
        ));
        assert!(matches!(
            parse_spirv(path, &[0u8; 8]),
            Err(RenderError::InvalidShader { .. })
        ));
    }
}
