//! Camera depth ahead of shading
//!
//! Fills the scene depth target so the scene pass can test with
//! `LESS_OR_EQUAL` and skip writing depth. Both passes transform positions
//! with the matrices from [`camera_view_projection`] and the node's world
//! transform, evaluated as `view_projection * (model * position)` under
//! `invariant gl_Position`, so the depth they produce matches bit for bit.

use super::draw::{record_depth_draws, DepthPushConstants};
use super::{not_loaded, DEPTH_FORMAT};
use crate::foundation::math::Mat4;
use crate::render::backends::vulkan::{GraphicsPipeline, GraphicsPipelineBuilder, PipelineLayout, RenderTarget, ShaderModule};
use crate::render::recorder::{AttachmentDesc, ClearValue, CommandRecorder, ImageTransition, RenderingDesc};
use crate::render::renderer::{FrameContext, PassLifecycle, Renderer};
use crate::render::target::{OutputSlot, TargetSpec, TargetView};
use crate::render::toolkit::{push_range, PassToolkit};
use crate::render::uniforms::camera_view_projection;
use crate::render::RenderResult;
use crate::scene::SceneSnapshot;
use ash::vk;

/// Depth-only pass from the camera
pub struct DepthPrepass {
    toolkit: PassToolkit,
    lifecycle: PassLifecycle,
    snapshot: SceneSnapshot,
    view_projection: Option<Mat4>,
    vertex_shader: Option<ShaderModule>,
    pipeline_layout: Option<PipelineLayout>,
    pipeline: Option<GraphicsPipeline>,
    depth: Option<RenderTarget>,
}

impl DepthPrepass {
    /// Pass with nothing loaded
    pub fn new(toolkit: PassToolkit) -> Self {
        Self {
            toolkit,
            lifecycle: PassLifecycle::new("depth_prepass"),
            snapshot: SceneSnapshot::empty(),
            view_projection: None,
            vertex_shader: None,
            pipeline_layout: None,
            pipeline: None,
            depth: None,
        }
    }
}

impl Renderer for DepthPrepass {
    fn name(&self) -> &str {
        "depth_prepass"
    }

    fn lifecycle(&self) -> &PassLifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut PassLifecycle {
        &mut self.lifecycle
    }

    fn load_shaders(&mut self) -> RenderResult<()> {
        self.vertex_shader = Some(self.toolkit.load_shader("depth_prepass", "vert")?);
        Ok(())
    }

    fn create_descriptor_set_layout(&mut self) -> RenderResult<()> {
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
            .ok_or_else(|| not_loaded("depth_prepass", "vertex shader"))?;
        let layout = self
            .toolkit
            .pipeline_layout(None, &[push_range::<DepthPushConstants>(vk::ShaderStageFlags::VERTEX)])?;

        let pipeline = GraphicsPipelineBuilder::new(vertex_shader)
            .depth(DEPTH_FORMAT, true, true, vk::CompareOp::LESS)
            .dynamic_cull_mode()
            .build(self.toolkit.gpu(), &layout)?;

        self.pipeline_layout = Some(layout);
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn create_images_resources(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        let spec = TargetSpec::depth(extent, DEPTH_FORMAT, false);
        self.depth = Some(RenderTarget::new(self.toolkit.gpu(), spec)?);
        Ok(())
    }

    fn cleanup_images_resources(&mut self) {
        self.depth = None;
    }

    fn output(&self) -> Option<(OutputSlot, TargetView)> {
        self.depth.as_ref().map(|target| (OutputSlot::SceneDepth, target.view()))
    }

    fn update(&mut self, ctx: &FrameContext<'_>) -> RenderResult<()> {
        self.view_projection = camera_view_projection(ctx.graph, &self.snapshot, ctx.aspect());
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
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| not_loaded("depth_prepass", "pipeline"))?;
        let layout = self
            .pipeline_layout
            .as_ref()
            .ok_or_else(|| not_loaded("depth_prepass", "pipeline layout"))?;
        let extent = self
            .depth
            .as_ref()
            .map(|target| target.spec().extent)
            .ok_or_else(|| not_loaded("depth_prepass", "depth target"))?;

        self.begin_rendering(recorder, ctx, swap_target);
        self.toolkit.set_viewport(recorder, extent);
        recorder.bind_pipeline(pipeline.handle());
        if let Some(view_projection) = self.view_projection {
            record_depth_draws(recorder, ctx.graph, &self.snapshot, layout.handle(), &view_projection, true);
        }
        self.end_rendering(recorder);
        Ok(())
    }

    fn begin_rendering(&self, recorder: &mut dyn CommandRecorder, _ctx: &FrameContext<'_>, _swap_target: &TargetView) {
        let Some(depth) = self.depth.as_ref() else {
            return;
        };
        let view = depth.view();
        recorder.transition_image(&ImageTransition::depth_attachment(view.image));
        recorder.begin_rendering(&RenderingDesc {
            extent: view.extent,
            color: None,
            depth: Some(AttachmentDesc::cleared(view.view, ClearValue::Depth(1.0))),
        });
    }

    fn cleanup(&mut self) {
        self.depth = None;
        self.pipeline = None;
        self.pipeline_layout = None;
        self.vertex_shader = None;
        self.snapshot = SceneSnapshot::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Camera, NodeRole, SceneGraph};
    use approx::assert_relative_eq;

    const SCENE_VERTEX: &str = include_str!("../../../../../resources/shaders/scene.vert");
    const PREPASS_VERTEX: &str = include_str!("../../../../../resources/shaders/depth_prepass.vert");

    #[test]
    fn test_view_projection_needs_live_camera() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let camera = graph
            .add_child(root, "camera", NodeRole::Camera(Camera::default()), Mat4::identity())
            .unwrap();
        let snapshot = SceneSnapshot::build(&graph, root).unwrap();

        let expected = Camera::default().projection(2.0);
        let actual = camera_view_projection(&graph, &snapshot, 2.0).unwrap();
        assert_relative_eq!(actual, expected, epsilon = 1e-6);

        graph.remove(camera).unwrap();
        assert_eq!(camera_view_projection(&graph, &snapshot, 2.0), None);
        assert_eq!(camera_view_projection(&graph, &SceneSnapshot::empty(), 2.0), None);
    }

    #[test]
    fn test_geometry_shaders_share_invariant_position() {
        for source in [SCENE_VERTEX, PREPASS_VERTEX] {
            assert!(source.contains("invariant gl_Position;"));
            assert!(source.contains("vec4 world_position = "));
            assert!(source.contains(".view_projection * world_position;"));
        }
        assert!(!SCENE_VERTEX.contains("projection * global_data.view"));
    }
}
