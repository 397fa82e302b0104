//! Main scene pass
//!
//! Draws every surface with its material into the HDR color target. Set 0
//! holds:
//!
//! | binding | contents                               | kind                 |
//! |---------|----------------------------------------|----------------------|
//! | 0       | global record                          | uniform              |
//! | 1       | per-model records                      | uniform, dynamic     |
//! | 2       | per-surface records                    | uniform, dynamic     |
//! | 3       | light array                            | storage              |
//! | 4       | image table (`image_array_len` long)   | image array          |
//! | 5       | shadow map                             | image, compare       |
//!
//! One set per frame slot, each pointing at that slot's buffers. Without a
//! shadow pass, binding 5 holds a 1x1 placeholder depth image and the global
//! record disables shadowing.

use super::draw::record_surface_draws;
use super::shadow::light_space_matrix;
use super::{not_loaded, DEPTH_FORMAT};
use crate::config::ShadowConfig;
use crate::render::backends::vulkan::{
    DescriptorKind, DescriptorPool, DescriptorPoolBuilder, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    DescriptorWriter, GraphicsPipeline, GraphicsPipelineBuilder, PipelineLayout, RenderTarget, ShaderModule,
};
use crate::render::recorder::{AttachmentDesc, ClearValue, CommandRecorder, ImageTransition, RenderingDesc};
use crate::render::renderer::{FrameContext, PassLifecycle, Renderer};
use crate::render::target::{OutputSlot, PassOutputs, TargetSpec, TargetView};
use crate::render::toolkit::{FrameRegions, PassToolkit};
use crate::render::uniforms::{
    gather_global, gather_lights, gather_models, gather_surfaces, GlobalUniform, LightUniform, ModelUniform,
    RegionKind, SurfaceUniform,
};
use crate::render::{FrameSlot, PerFrame, RenderError, RenderResult};
use crate::scene::{ImageHandle, SampledImage, SceneSnapshot, ShadowCaster};
use ash::vk;
use log::debug;

const GLOBAL_BINDING: u32 = 0;
const MODEL_BINDING: u32 = 1;
const SURFACE_BINDING: u32 = 2;
const LIGHT_BINDING: u32 = 3;
const IMAGE_BINDING: u32 = 4;
const SHADOW_BINDING: u32 = 5;

/// Fragment specialization constant sizing the image array
const IMAGE_COUNT_CONSTANT: u32 = 0;

/// Fixed settings of the scene pass
#[derive(Debug, Clone)]
pub struct ScenePassSettings {
    /// HDR color format
    pub color_format: vk::Format,
    /// Color the target is cleared to
    pub clear_color: [f32; 4],
    /// Length of the image array binding
    pub image_array_len: u32,
    /// Shadow caster and its settings, when a shadow pass runs
    pub shadow: Option<(ShadowCaster, ShadowConfig)>,
}

/// Layout of set 0
pub fn scene_set_layout(image_array_len: u32) -> DescriptorSetLayoutBuilder {
    let vertex_fragment = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
    DescriptorSetLayoutBuilder::new()
        .add_binding(GLOBAL_BINDING, DescriptorKind::UniformBuffer, vertex_fragment, 1)
        .add_binding(MODEL_BINDING, DescriptorKind::UniformBufferDynamic, vk::ShaderStageFlags::VERTEX, 1)
        .add_binding(SURFACE_BINDING, DescriptorKind::UniformBufferDynamic, vk::ShaderStageFlags::FRAGMENT, 1)
        .add_binding(LIGHT_BINDING, DescriptorKind::StorageBuffer, vk::ShaderStageFlags::FRAGMENT, 1)
        .add_binding(
            IMAGE_BINDING,
            DescriptorKind::CombinedImageSampler,
            vk::ShaderStageFlags::FRAGMENT,
            image_array_len.max(1),
        )
        .add_binding(SHADOW_BINDING, DescriptorKind::CombinedImageSampler, vk::ShaderStageFlags::FRAGMENT, 1)
}

/// Image table entries in index order, or the fallback when the table is empty
pub fn image_array_infos(snapshot: &SceneSnapshot, fallback: &ImageHandle) -> Vec<vk::DescriptorImageInfo> {
    let info = |image: &ImageHandle| vk::DescriptorImageInfo {
        sampler: image.sampler(),
        image_view: image.view(),
        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    };

    let images = snapshot.images().images();
    if images.is_empty() {
        vec![info(fallback)]
    } else {
        images.iter().map(info).collect()
    }
}

/// Per-frame regions of the scene pass
struct SceneUniforms {
    global: FrameRegions,
    models: FrameRegions,
    surfaces: FrameRegions,
    lights: FrameRegions,
}

/// Lit geometry into the HDR color target
pub struct ScenePass {
    toolkit: PassToolkit,
    lifecycle: PassLifecycle,
    settings: ScenePassSettings,
    inputs: Vec<OutputSlot>,
    fallback_image: ImageHandle,
    snapshot: SceneSnapshot,
    vertex_shader: Option<ShaderModule>,
    fragment_shader: Option<ShaderModule>,
    set_layout: Option<DescriptorSetLayout>,
    uniforms: Option<SceneUniforms>,
    descriptor_pool: Option<DescriptorPool>,
    descriptor_sets: Option<PerFrame<vk::DescriptorSet>>,
    placeholder_shadow: Option<RenderTarget>,
    pipeline_layout: Option<PipelineLayout>,
    pipeline: Option<GraphicsPipeline>,
    color: Option<RenderTarget>,
    owned_depth: Option<RenderTarget>,
    shadow_input: Option<TargetView>,
    depth_input: Option<TargetView>,
}

impl ScenePass {
    /// Pass reading `inputs` from earlier passes
    pub fn new(
        toolkit: PassToolkit,
        settings: ScenePassSettings,
        inputs: Vec<OutputSlot>,
        fallback_image: ImageHandle,
    ) -> Self {
        Self {
            toolkit,
            lifecycle: PassLifecycle::new("scene"),
            settings,
            inputs,
            fallback_image,
            snapshot: SceneSnapshot::empty(),
            vertex_shader: None,
            fragment_shader: None,
            set_layout: None,
            uniforms: None,
            descriptor_pool: None,
            descriptor_sets: None,
            placeholder_shadow: None,
            pipeline_layout: None,
            pipeline: None,
            color: None,
            owned_depth: None,
            shadow_input: None,
            depth_input: None,
        }
    }

    fn reads(&self, slot: OutputSlot) -> bool {
        self.inputs.contains(&slot)
    }

    fn descriptor_set(&self, slot: FrameSlot) -> RenderResult<vk::DescriptorSet> {
        self.descriptor_sets
            .as_ref()
            .map(|sets| sets[slot])
            .ok_or_else(|| not_loaded("scene", "descriptor sets"))
    }

    fn depth_view(&self) -> Option<TargetView> {
        self.depth_input
            .or_else(|| self.owned_depth.as_ref().map(RenderTarget::view))
    }

    fn create_uniforms(&self, snapshot: &SceneSnapshot) -> RenderResult<SceneUniforms> {
        let toolkit = &self.toolkit;
        Ok(SceneUniforms {
            global: toolkit.frame_regions::<GlobalUniform>(RegionKind::Uniform, 1)?,
            models: toolkit.frame_regions::<ModelUniform>(RegionKind::Uniform, snapshot.model_region_len())?,
            surfaces: toolkit.frame_regions::<SurfaceUniform>(RegionKind::Uniform, snapshot.surface_region_len())?,
            lights: toolkit.frame_regions::<LightUniform>(RegionKind::StorageArray, snapshot.light_region_len())?,
        })
    }

    fn create_placeholder_shadow(&self) -> RenderResult<RenderTarget> {
        let spec = TargetSpec::depth(vk::Extent2D { width: 1, height: 1 }, DEPTH_FORMAT, true);
        let target = RenderTarget::new(self.toolkit.gpu(), spec)?;
        target.initialize_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;
        Ok(target)
    }
}

impl Renderer for ScenePass {
    fn name(&self) -> &str {
        "scene"
    }

    fn lifecycle(&self) -> &PassLifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut PassLifecycle {
        &mut self.lifecycle
    }

    fn load_shaders(&mut self) -> RenderResult<()> {
        self.vertex_shader = Some(self.toolkit.load_shader("scene", "vert")?);
        self.fragment_shader = Some(self.toolkit.load_shader("scene", "frag")?);
        Ok(())
    }

    fn create_descriptor_set_layout(&mut self) -> RenderResult<()> {
        let layout = scene_set_layout(self.settings.image_array_len).build(self.toolkit.gpu())?;
        self.set_layout = Some(layout);
        Ok(())
    }

    fn prepare_scene(&mut self, snapshot: &SceneSnapshot) -> RenderResult<()> {
        if snapshot.image_array_len() != self.settings.image_array_len {
            return Err(RenderError::InvalidOperation(format!(
                "scene pass sized for {} images, snapshot has {}",
                self.settings.image_array_len,
                snapshot.image_array_len()
            )));
        }
        let set_layout = self
            .set_layout
            .as_ref()
            .ok_or_else(|| not_loaded("scene", "descriptor set layout"))?;

        let uniforms = self.create_uniforms(snapshot)?;
        let placeholder_shadow = if self.reads(OutputSlot::ShadowMap) {
            None
        } else {
            Some(self.create_placeholder_shadow()?)
        };

        let frames = self.toolkit.frames_in_flight();
        let pool = DescriptorPoolBuilder::new()
            .for_layout(set_layout.info(), frames as u32)
            .build(self.toolkit.gpu())?;

        let images = image_array_infos(snapshot, &self.fallback_image);
        let sets = PerFrame::new(frames, |slot| {
            let mut writer = DescriptorWriter::new(set_layout.info());
            writer
                .write_buffer(GLOBAL_BINDING, uniforms.global.whole_info(slot))?
                .write_buffer(MODEL_BINDING, uniforms.models.element_info(slot))?
                .write_buffer(SURFACE_BINDING, uniforms.surfaces.element_info(slot))?
                .write_buffer(LIGHT_BINDING, uniforms.lights.whole_info(slot))?
                .write_images(IMAGE_BINDING, &images)?;
            if let Some(placeholder) = placeholder_shadow.as_ref() {
                writer.write_images(SHADOW_BINDING, &[placeholder.view().sampled_info()])?;
            }
            writer.build(&pool, set_layout)
        })?;

        debug!(
            "Scene pass prepared: {} instances, {} surfaces, {} lights, {} images",
            snapshot.instances().len(),
            snapshot.surface_count(),
            snapshot.light_count(),
            images.len()
        );

        self.snapshot = snapshot.clone();
        self.uniforms = Some(uniforms);
        self.placeholder_shadow = placeholder_shadow;
        self.descriptor_sets = Some(sets);
        self.descriptor_pool = Some(pool);
        Ok(())
    }

    fn create_pipeline(&mut self) -> RenderResult<()> {
        let vertex_shader = self
            .vertex_shader
            .as_ref()
            .ok_or_else(|| not_loaded("scene", "vertex shader"))?;
        let fragment_shader = self
            .fragment_shader
            .as_ref()
            .ok_or_else(|| not_loaded("scene", "fragment shader"))?;
        let set_layout = self
            .set_layout
            .as_ref()
            .ok_or_else(|| not_loaded("scene", "descriptor set layout"))?;

        let layout = self.toolkit.pipeline_layout(Some(set_layout.handle()), &[])?;

        // With a prepass, depth is final before shading
        let prepass = self.reads(OutputSlot::SceneDepth);
        let (depth_write, depth_compare) = if prepass {
            (false, vk::CompareOp::LESS_OR_EQUAL)
        } else {
            (true, vk::CompareOp::LESS)
        };

        let pipeline = GraphicsPipelineBuilder::new(vertex_shader)
            .fragment_shader(fragment_shader)
            .color_format(self.settings.color_format)
            .depth(DEPTH_FORMAT, true, depth_write, depth_compare)
            .dynamic_cull_mode()
            .fragment_constant(IMAGE_COUNT_CONSTANT, self.settings.image_array_len)
            .build(self.toolkit.gpu(), &layout)?;

        self.pipeline_layout = Some(layout);
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn create_images_resources(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        let gpu = self.toolkit.gpu();
        self.color = Some(RenderTarget::new(
            gpu,
            TargetSpec::color(extent, self.settings.color_format),
        )?);
        if !self.reads(OutputSlot::SceneDepth) {
            self.owned_depth = Some(RenderTarget::new(gpu, TargetSpec::depth(extent, DEPTH_FORMAT, false))?);
        }
        Ok(())
    }

    fn cleanup_images_resources(&mut self) {
        self.color = None;
        self.owned_depth = None;
        self.shadow_input = None;
        self.depth_input = None;
    }

    fn inputs(&self) -> &[OutputSlot] {
        &self.inputs
    }

    fn output(&self) -> Option<(OutputSlot, TargetView)> {
        self.color.as_ref().map(|target| (OutputSlot::SceneColor, target.view()))
    }

    fn bind_inputs(&mut self, outputs: &PassOutputs) -> RenderResult<()> {
        for &slot in &self.inputs {
            if outputs.get(slot).is_none() {
                return Err(RenderError::InvalidOperation(format!(
                    "scene pass expects {:?} from an earlier pass",
                    slot
                )));
            }
        }
        let shadow_input = outputs.get(OutputSlot::ShadowMap).copied();
        let depth_input = outputs.get(OutputSlot::SceneDepth).copied();
        self.shadow_input = shadow_input.filter(|_| self.inputs.contains(&OutputSlot::ShadowMap));
        self.depth_input = depth_input.filter(|_| self.inputs.contains(&OutputSlot::SceneDepth));

        if let Some(shadow) = self.shadow_input {
            let set_layout = self
                .set_layout
                .as_ref()
                .ok_or_else(|| not_loaded("scene", "descriptor set layout"))?;
            let sets = self
                .descriptor_sets
                .as_ref()
                .ok_or_else(|| not_loaded("scene", "descriptor sets"))?;

            let mut writer = DescriptorWriter::new(set_layout.info());
            writer.write_images(SHADOW_BINDING, &[shadow.sampled_info()])?;
            for &set in sets.iter() {
                writer.overwrite(self.toolkit.gpu(), set);
            }
        }
        Ok(())
    }

    fn update(&mut self, ctx: &FrameContext<'_>) -> RenderResult<()> {
        let uniforms = self.uniforms.as_mut().ok_or_else(|| not_loaded("scene", "uniform buffers"))?;

        let shadow = self.settings.shadow.as_ref().and_then(|(caster, config)| {
            light_space_matrix(ctx.graph, caster, config).map(|light_space| (caster, light_space))
        });
        let lights = gather_lights(ctx.graph, &self.snapshot);
        let global = gather_global(ctx.graph, &self.snapshot, ctx.aspect(), lights.len() as u32, shadow);

        uniforms.global.write(ctx.slot, 0, &global)?;
        for (model_slot, model) in gather_models(ctx.graph, &self.snapshot) {
            uniforms.models.write(ctx.slot, model_slot, &model)?;
        }
        uniforms.surfaces.write_all(ctx.slot, &gather_surfaces(&self.snapshot))?;
        uniforms.lights.write_all(ctx.slot, &lights)?;
        Ok(())
    }

    fn record_commands(
        &mut self,
        recorder: &mut dyn CommandRecorder,
        ctx: &FrameContext<'_>,
        swap_target: &TargetView,
    ) -> RenderResult<()> {
        if !self.lifecycle.can_record() {
            return Ok(());
        }
        let pipeline = self.pipeline.as_ref().ok_or_else(|| not_loaded("scene", "pipeline"))?;
        let layout = self
            .pipeline_layout
            .as_ref()
            .ok_or_else(|| not_loaded("scene", "pipeline layout"))?;
        let uniforms = self.uniforms.as_ref().ok_or_else(|| not_loaded("scene", "uniform buffers"))?;
        let extent = self
            .color
            .as_ref()
            .map(|target| target.spec().extent)
            .ok_or_else(|| not_loaded("scene", "color target"))?;
        if self.depth_view().is_none() {
            return Err(not_loaded("scene", "depth target"));
        }
        let set = self.descriptor_set(ctx.slot)?;

        self.begin_rendering(recorder, ctx, swap_target);
        self.toolkit.set_viewport(recorder, extent);
        recorder.bind_pipeline(pipeline.handle());
        if self.snapshot.camera().is_some() {
            record_surface_draws(
                recorder,
                ctx.graph,
                &self.snapshot,
                layout.handle(),
                set,
                uniforms.models.layout(),
                uniforms.surfaces.layout(),
            );
        }
        self.end_rendering(recorder);
        Ok(())
    }

    fn begin_rendering(&self, recorder: &mut dyn CommandRecorder, _ctx: &FrameContext<'_>, _swap_target: &TargetView) {
        let (Some(color), Some(depth)) = (self.color.as_ref().map(RenderTarget::view), self.depth_view()) else {
            return;
        };

        if let Some(shadow) = self.shadow_input {
            recorder.transition_image(&ImageTransition::depth_to_shader_read(shadow.image));
        }
        recorder.transition_image(&ImageTransition::color_attachment(color.image));
        let depth_attachment = if self.depth_input.is_some() {
            recorder.transition_image(&ImageTransition::depth_write_to_test(depth.image));
            AttachmentDesc::loaded(depth.view)
        } else {
            recorder.transition_image(&ImageTransition::depth_attachment(depth.image));
            AttachmentDesc::cleared(depth.view, ClearValue::Depth(1.0))
        };

        recorder.begin_rendering(&RenderingDesc {
            extent: color.extent,
            color: Some(AttachmentDesc::cleared(
                color.view,
                ClearValue::Color(self.settings.clear_color),
            )),
            depth: Some(depth_attachment),
        });
    }

    fn cleanup(&mut self) {
        self.cleanup_images_resources();
        self.pipeline = None;
        self.pipeline_layout = None;
        self.descriptor_sets = None;
        self.descriptor_pool = None;
        self.placeholder_shadow = None;
        self.uniforms = None;
        self.set_layout = None;
        self.fragment_shader = None;
        self.vertex_shader = None;
        self.snapshot = SceneSnapshot::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4;
    use crate::scene::{Material, MeshInstance, NodeRole, SceneGraph};
    use crate::testing::{built_mesh, mock_image};
    use std::sync::Arc;

    #[test]
    fn test_set_layout_declares_six_bindings() {
        let info = scene_set_layout(3).info().unwrap();
        assert_eq!(info.bindings().len(), 6);
        assert_eq!(info.dynamic_count(), 2);
        assert_eq!(info.binding(IMAGE_BINDING).unwrap().count, 3);
        assert_eq!(info.binding(LIGHT_BINDING).unwrap().kind, DescriptorKind::StorageBuffer);
        assert_eq!(
            info.binding(SHADOW_BINDING).unwrap().kind,
            DescriptorKind::CombinedImageSampler
        );
    }

    #[test]
    fn test_image_array_never_empty() {
        let info = scene_set_layout(0).info().unwrap();
        assert_eq!(info.binding(IMAGE_BINDING).unwrap().count, 1);

        let fallback = mock_image();
        let infos = image_array_infos(&SceneSnapshot::empty(), &fallback);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].image_view, fallback.view());
    }

    #[test]
    fn test_image_array_follows_table_order() {
        let first = mock_image();
        let second = mock_image();
        let mesh = built_mesh(vec![
            Material::default().with_albedo_image(Arc::clone(&first)),
            Material::default().with_albedo_image(Arc::clone(&second)),
        ]);

        let mut graph = SceneGraph::new();
        let root = graph.root();
        graph
            .add_child(root, "mesh", NodeRole::MeshInstance(MeshInstance::new(mesh)), Mat4::identity())
            .unwrap();
        let snapshot = SceneSnapshot::build(&graph, root).unwrap();

        let infos = image_array_infos(&snapshot, &mock_image());
        assert_eq!(infos.len(), 2);
        let first_index = snapshot.images().index_of(&first).unwrap() as usize;
        assert_eq!(infos[first_index].image_view, first.view());
        assert_eq!(infos[first_index].sampler, first.sampler());
        assert!(infos
            .iter()
            .all(|info| info.image_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
    }
}
