//! Shadow-map pass
//!
//! Renders scene depth from the shadow caster into a fixed-size D32 target
//! that the scene pass samples with a compare sampler. The target does not
//! follow the swapchain extent. Directional casters use an orthographic
//! projection around the origin; spot casters a perspective one covering
//! the full cone.

use super::draw::{record_depth_draws, DepthPushConstants};
use super::{not_loaded, DEPTH_FORMAT};
use crate::config::ShadowConfig;
use crate::foundation::math::{forward_of, look_at_rh, orthographic_vk, perspective_vk, translation_of, Mat4, Vec3};
use crate::render::backends::vulkan::{GraphicsPipeline, GraphicsPipelineBuilder, PipelineLayout, RenderTarget, ShaderModule};
use crate::render::recorder::{AttachmentDesc, ClearValue, CommandRecorder, ImageTransition, RenderingDesc};
use crate::render::renderer::{FrameContext, PassLifecycle, Renderer};
use crate::render::target::{OutputSlot, TargetSpec, TargetView};
use crate::render::toolkit::{push_range, PassToolkit};
use crate::render::RenderResult;
use crate::scene::{SceneGraph, SceneSnapshot, ShadowCaster};
use ash::vk;
use log::debug;

/// View-projection of the shadow caster, or `None` if its node is gone
///
/// The light view uses +Y as up, falling back to +Z when the light points
/// straight up or down.
pub fn light_space_matrix(graph: &SceneGraph, caster: &ShadowCaster, config: &ShadowConfig) -> Option<Mat4> {
    match caster {
        ShadowCaster::Directional(selected) => {
            let node = graph.get(selected.node)?;
            let direction = forward_of(&node.world_transform);
            let center = Vec3::zeros();
            let eye = center - direction * config.light_distance;
            let view = look_at_rh(&eye, &center, &Vec3::y());

            let half = config.ortho_half_extent;
            Some(orthographic_vk(-half, half, -half, half, config.near, config.far) * view)
        }
        ShadowCaster::Spot { node, light } => {
            let node = graph.get(*node)?;
            let position = translation_of(&node.world_transform);
            let direction = forward_of(&node.world_transform);
            let view = look_at_rh(&position, &(position + direction), &Vec3::y());

            let fov = (2.0 * light.outer_angle).clamp(0.01, std::f32::consts::PI - 0.01);
            Some(perspective_vk(fov, 1.0, config.near, config.far) * view)
        }
    }
}

/// Depth from the shadow caster
pub struct ShadowPass {
    toolkit: PassToolkit,
    lifecycle: PassLifecycle,
    config: ShadowConfig,
    caster: ShadowCaster,
    snapshot: SceneSnapshot,
    light_space: Option<Mat4>,
    vertex_shader: Option<ShaderModule>,
    pipeline_layout: Option<PipelineLayout>,
    pipeline: Option<GraphicsPipeline>,
    shadow_map: Option<RenderTarget>,
}

impl ShadowPass {
    /// Pass rendering `caster` at `config.resolution`
    pub fn new(toolkit: PassToolkit, config: ShadowConfig, caster: ShadowCaster) -> Self {
        Self {
            toolkit,
            lifecycle: PassLifecycle::new("shadow"),
            config,
            caster,
            snapshot: SceneSnapshot::empty(),
            light_space: None,
            vertex_shader: None,
            pipeline_layout: None,
            pipeline: None,
            shadow_map: None,
        }
    }

    fn map_extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.config.resolution,
            height: self.config.resolution,
        }
    }
}

impl Renderer for ShadowPass {
    fn name(&self) -> &str {
        "shadow"
    }

    fn lifecycle(&self) -> &PassLifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut PassLifecycle {
        &mut self.lifecycle
    }

    fn load_shaders(&mut self) -> RenderResult<()> {
        self.vertex_shader = Some(self.toolkit.load_shader("shadow", "vert")?);
        Ok(())
    }

    fn create_descriptor_set_layout(&mut self) -> RenderResult<()> {
        // Push constants only
        Ok(())
    }

    fn prepare_scene(&mut self, snapshot: &SceneSnapshot) -> RenderResult<()> {
        self.snapshot = snapshot.clone();
        Ok(())
    }

    fn create_pipeline(&mut self) -> RenderResult<()> {
        let vertex_shader = self
            .vertex_shader
            .as_ref()
            .ok_or_else(|| not_loaded("shadow", "vertex shader"))?;
        let layout = self
            .toolkit
            .pipeline_layout(None, &[push_range::<DepthPushConstants>(vk::ShaderStageFlags::VERTEX)])?;

        // Both faces cast; acne is handled by the depth bias
        let pipeline = GraphicsPipelineBuilder::new(vertex_shader)
            .depth(DEPTH_FORMAT, true, true, vk::CompareOp::LESS)
            .cull_mode(vk::CullModeFlags::NONE)
            .dynamic_depth_bias()
            .build(self.toolkit.gpu(), &layout)?;

        self.pipeline_layout = Some(layout);
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn create_images_resources(&mut self, _extent: vk::Extent2D) -> RenderResult<()> {
        let spec = TargetSpec::depth(self.map_extent(), DEPTH_FORMAT, true);
        self.shadow_map = Some(RenderTarget::new(self.toolkit.gpu(), spec)?);
        debug!("Shadow map {}x{}", self.config.resolution, self.config.resolution);
        Ok(())
    }

    fn cleanup_images_resources(&mut self) {
        self.shadow_map = None;
    }

    fn recreate_images_resources(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        if self.shadow_map.is_some() {
            return Ok(());
        }
        self.create_images_resources(extent)
    }

    fn output(&self) -> Option<(OutputSlot, TargetView)> {
        self.shadow_map
            .as_ref()
            .map(|target| (OutputSlot::ShadowMap, target.view()))
    }

    fn update(&mut self, ctx: &FrameContext<'_>) -> RenderResult<()> {
        self.light_space = light_space_matrix(ctx.graph, &self.caster, &self.config);
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
        let pipeline = self.pipeline.as_ref().ok_or_else(|| not_loaded("shadow", "pipeline"))?;
        let layout = self
            .pipeline_layout
            .as_ref()
            .ok_or_else(|| not_loaded("shadow", "pipeline layout"))?;
        if self.shadow_map.is_none() {
            return Err(not_loaded("shadow", "shadow map"));
        }

        // Cleared even without a caster so the scene pass always finds depth
        self.begin_rendering(recorder, ctx, swap_target);
        self.toolkit.set_viewport(recorder, self.map_extent());
        recorder.bind_pipeline(pipeline.handle());
        recorder.set_depth_bias(self.config.depth_bias_constant, self.config.depth_bias_slope);
        if let Some(light_space) = self.light_space {
            record_depth_draws(recorder, ctx.graph, &self.snapshot, layout.handle(), &light_space, false);
        }
        self.end_rendering(recorder);
        Ok(())
    }

    fn begin_rendering(&self, recorder: &mut dyn CommandRecorder, _ctx: &FrameContext<'_>, _swap_target: &TargetView) {
        let Some(shadow_map) = self.shadow_map.as_ref() else {
            return;
        };
        let view = shadow_map.view();
        recorder.transition_image(&ImageTransition::depth_attachment(view.image));
        recorder.begin_rendering(&RenderingDesc {
            extent: view.extent,
            color: None,
            depth: Some(AttachmentDesc::cleared(view.view, ClearValue::Depth(1.0))),
        });
    }

    fn cleanup(&mut self) {
        self.shadow_map = None;
        self.pipeline = None;
        self.pipeline_layout = None;
        self.vertex_shader = None;
        self.snapshot = SceneSnapshot::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use crate::scene::{DirectionalLight, NodeRole, Selected, SpotLight};
    use approx::assert_relative_eq;

    fn project(m: &Mat4, p: Vec3) -> Vec3 {
        let clip = m * Vec4::new(p.x, p.y, p.z, 1.0);
        Vec3::new(clip.x / clip.w, clip.y / clip.w, clip.z / clip.w)
    }

    #[test]
    fn test_directional_light_centers_origin() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let light = DirectionalLight::new(Vec3::new(1.0, 1.0, 1.0), 1.0);
        let sun = graph
            .add_child(root, "sun", NodeRole::DirectionalLight(light), Mat4::identity())
            .unwrap();
        let caster = ShadowCaster::Directional(Selected { node: sun, value: light });

        let config = ShadowConfig::default();
        let matrix = light_space_matrix(&graph, &caster, &config).unwrap();
        let origin = project(&matrix, Vec3::zeros());
        assert_relative_eq!(origin.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(origin.y, 0.0, epsilon = 1e-5);
        let expected = (config.light_distance - config.near) / (config.far - config.near);
        assert_relative_eq!(origin.z, expected, epsilon = 1e-4);
    }

    #[test]
    fn test_spot_light_looks_down_its_axis() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let light = SpotLight::new(Vec3::new(1.0, 1.0, 1.0), 1.0, 15.0, 30.0);
        let node = graph
            .add_child(
                root,
                "spot",
                NodeRole::SpotLight(light),
                Mat4::new_translation(&Vec3::new(0.0, 5.0, 0.0)),
            )
            .unwrap();
        let caster = ShadowCaster::Spot { node, light };

        let matrix = light_space_matrix(&graph, &caster, &ShadowConfig::default()).unwrap();
        let ahead = project(&matrix, Vec3::new(0.0, 5.0, -10.0));
        assert_relative_eq!(ahead.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(ahead.y, 0.0, epsilon = 1e-5);
        assert!(ahead.z > 0.0 && ahead.z < 1.0);

        // Just inside the cone edge stays on the map
        let edge = 10.0 * (light.outer_angle * 0.95).tan();
        let inside = project(&matrix, Vec3::new(edge, 5.0, -10.0));
        assert!(inside.x.abs() < 1.0);
    }

    #[test]
    fn test_removed_caster_has_no_matrix() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let light = DirectionalLight::new(Vec3::new(1.0, 1.0, 1.0), 1.0);
        let sun = graph
            .add_child(root, "sun", NodeRole::DirectionalLight(light), Mat4::identity())
            .unwrap();
        graph.remove(sun).unwrap();

        let caster = ShadowCaster::Directional(Selected { node: sun, value: light });
        assert!(light_space_matrix(&graph, &caster, &ShadowConfig::default()).is_none());
    }
}
