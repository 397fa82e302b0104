//! Full-screen triangle pipeline shared by the post chain and tone mapping
//!
//! Samples one input image at set 0, binding 0, and takes one push-constant
//! block in the fragment stage. The vertex stage generates the triangle from
//! the vertex index, so no vertex buffer is bound.

use super::not_loaded;
use crate::render::backends::vulkan::{
    DescriptorKind, DescriptorPool, DescriptorPoolBuilder, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    DescriptorWriter, GraphicsPipeline, GraphicsPipelineBuilder, PipelineLayout, ShaderModule,
};
use crate::render::recorder::CommandRecorder;
use crate::render::target::TargetView;
use crate::render::toolkit::{push_range, PassToolkit};
use crate::render::RenderResult;
use ash::vk;

const INPUT_BINDING: u32 = 0;

/// Layout of the single input set
pub fn fullscreen_set_layout() -> DescriptorSetLayoutBuilder {
    DescriptorSetLayoutBuilder::new().add_binding(
        INPUT_BINDING,
        DescriptorKind::CombinedImageSampler,
        vk::ShaderStageFlags::FRAGMENT,
        1,
    )
}

/// Shader, layout, set and pipeline of one full-screen pass
///
/// The input set is rewritten on every relink, which only happens while the
/// device is idle.
pub struct FullscreenPipeline {
    pass: String,
    fragment: String,
    vertex_shader: Option<ShaderModule>,
    fragment_shader: Option<ShaderModule>,
    set_layout: Option<DescriptorSetLayout>,
    descriptor_pool: Option<DescriptorPool>,
    descriptor_set: Option<vk::DescriptorSet>,
    pipeline_layout: Option<PipelineLayout>,
    pipeline: Option<GraphicsPipeline>,
}

impl FullscreenPipeline {
    /// Pipeline for `pass` shading with the `fragment` shader
    pub fn new(pass: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            pass: pass.into(),
            fragment: fragment.into(),
            vertex_shader: None,
            fragment_shader: None,
            set_layout: None,
            descriptor_pool: None,
            descriptor_set: None,
            pipeline_layout: None,
            pipeline: None,
        }
    }

    pub fn load_shaders(&mut self, toolkit: &PassToolkit) -> RenderResult<()> {
        self.vertex_shader = Some(toolkit.load_shader("fullscreen", "vert")?);
        self.fragment_shader = Some(toolkit.load_shader(&self.fragment, "frag")?);
        Ok(())
    }

    pub fn create_descriptor_set_layout(&mut self, toolkit: &PassToolkit) -> RenderResult<()> {
        self.set_layout = Some(fullscreen_set_layout().build(toolkit.gpu())?);
        Ok(())
    }

    /// Allocate the input set; it is written by `bind_input`
    pub fn allocate_set(&mut self, toolkit: &PassToolkit) -> RenderResult<()> {
        let set_layout = self
            .set_layout
            .as_ref()
            .ok_or_else(|| not_loaded(&self.pass, "descriptor set layout"))?;
        let pool = DescriptorPoolBuilder::new()
            .for_layout(set_layout.info(), 1)
            .build(toolkit.gpu())?;
        let set = pool.allocate(set_layout, 1)?.into_iter().next();

        self.descriptor_set = set;
        self.descriptor_pool = Some(pool);
        Ok(())
    }

    /// Build the pipeline with push constants of type `P`
    pub fn create_pipeline<P>(&mut self, toolkit: &PassToolkit, color_format: vk::Format) -> RenderResult<()> {
        let vertex_shader = self
            .vertex_shader
            .as_ref()
            .ok_or_else(|| not_loaded(&self.pass, "vertex shader"))?;
        let fragment_shader = self
            .fragment_shader
            .as_ref()
            .ok_or_else(|| not_loaded(&self.pass, "fragment shader"))?;
        let set_layout = self
            .set_layout
            .as_ref()
            .ok_or_else(|| not_loaded(&self.pass, "descriptor set layout"))?;

        let layout = toolkit.pipeline_layout(
            Some(set_layout.handle()),
            &[push_range::<P>(vk::ShaderStageFlags::FRAGMENT)],
        )?;
        let pipeline = GraphicsPipelineBuilder::new(vertex_shader)
            .fragment_shader(fragment_shader)
            .vertex_input(false)
            .color_format(color_format)
            .cull_mode(vk::CullModeFlags::NONE)
            .build(toolkit.gpu(), &layout)?;

        self.pipeline_layout = Some(layout);
        self.pipeline = Some(pipeline);
        Ok(())
    }

    /// Point the input set at `input`
    pub fn bind_input(&mut self, toolkit: &PassToolkit, input: &TargetView) -> RenderResult<()> {
        let set_layout = self
            .set_layout
            .as_ref()
            .ok_or_else(|| not_loaded(&self.pass, "descriptor set layout"))?;
        let set = self
            .descriptor_set
            .ok_or_else(|| not_loaded(&self.pass, "descriptor set"))?;

        let mut writer = DescriptorWriter::new(set_layout.info());
        writer.write_images(INPUT_BINDING, &[input.sampled_info()])?;
        writer.overwrite(toolkit.gpu(), set);
        Ok(())
    }

    /// Draw the triangle over `extent` inside an open rendering scope
    pub fn draw<P: bytemuck::Pod>(
        &self,
        toolkit: &PassToolkit,
        recorder: &mut dyn CommandRecorder,
        extent: vk::Extent2D,
        push_constants: &P,
    ) -> RenderResult<()> {
        let pipeline = self.pipeline.as_ref().ok_or_else(|| not_loaded(&self.pass, "pipeline"))?;
        let layout = self
            .pipeline_layout
            .as_ref()
            .ok_or_else(|| not_loaded(&self.pass, "pipeline layout"))?;
        let set = self
            .descriptor_set
            .ok_or_else(|| not_loaded(&self.pass, "descriptor set"))?;

        toolkit.set_viewport(recorder, extent);
        recorder.bind_pipeline(pipeline.handle());
        recorder.bind_descriptor_set(layout.handle(), 0, set, &[]);
        recorder.push_constants(
            layout.handle(),
            vk::ShaderStageFlags::FRAGMENT,
            0,
            bytemuck::bytes_of(push_constants),
        );
        recorder.draw(3);
        Ok(())
    }

    pub fn cleanup(&mut self) {
        self.pipeline = None;
        self.pipeline_layout = None;
        self.descriptor_set = None;
        self.descriptor_pool = None;
        self.set_layout = None;
        self.fragment_shader = None;
        self.vertex_shader = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sampled_input() {
        let info = fullscreen_set_layout().info().unwrap();
        assert_eq!(info.bindings().len(), 1);
        assert_eq!(info.dynamic_count(), 0);
        assert_eq!(
            info.pool_sizes(1),
            vec![(DescriptorKind::CombinedImageSampler, 1)]
        );
    }
}
