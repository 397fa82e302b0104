//! # Render Passes
//!
//! [`PassPlan`] decides which passes a snapshot needs and in what order:
//!
//! ```text
//! [shadow] -> [depth_prepass] -> scene -> [post effects...] -> tonemap
//! ```
//!
//! Bracketed passes are optional. The shadow pass exists when the snapshot
//! has a shadow caster; the depth prepass when configured. A snapshot without
//! a camera or without drawables plans no passes at all, and the frame driver
//! then only clears the swapchain image.
//!
//! [`VulkanPassFactory`] turns a plan into boxed Vulkan passes.

mod draw;
mod fullscreen;
mod depth_prepass;
mod post;
mod scene;
mod shadow;
mod tonemap;

pub use depth_prepass::DepthPrepass;
pub use draw::{record_depth_draws, record_surface_draws, DepthPushConstants};
pub use post::{PostEffectPass, PostPushConstants};
pub use scene::{ScenePass, ScenePassSettings};
pub use shadow::{light_space_matrix, ShadowPass};
pub use tonemap::{ToneMapPass, ToneMapPushConstants};

use super::backends::vulkan::{GpuDevice, Texture};
use super::chain::PassFactory;
use super::renderer::Renderer;
use super::target::OutputSlot;
use super::toolkit::PassToolkit;
use super::{RenderError, RenderResult};
use crate::config::RendererConfig;
use crate::scene::{ImageHandle, SceneSnapshot};
use ash::vk;
use log::{debug, info};
use std::sync::Arc;

/// Format of every depth target
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Error for a pass used before the resource `what` was created
pub(crate) fn not_loaded(pass: &str, what: &str) -> RenderError {
    RenderError::InvalidOperation(format!("pass '{}' has no {} yet", pass, what))
}

/// One entry of the pass plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Depth from the shadow caster's point of view
    Shadow,
    /// Camera depth ahead of shading
    DepthPrepass,
    /// Lit geometry into the HDR color target
    Scene,
    /// Configured post effect, by index
    PostEffect(usize),
    /// HDR to the swapchain image
    ToneMap,
}

impl PassKind {
    /// Pass name used in logs
    pub fn name(&self, config: &RendererConfig) -> String {
        match self {
            PassKind::Shadow => "shadow".to_string(),
            PassKind::DepthPrepass => "depth_prepass".to_string(),
            PassKind::Scene => "scene".to_string(),
            PassKind::PostEffect(index) => config
                .post_effects
                .get(*index)
                .map_or_else(|| format!("post_{}", index), |effect| effect.name.clone()),
            PassKind::ToneMap => "tonemap".to_string(),
        }
    }

    /// Output slot the pass publishes
    pub fn output(&self) -> Option<OutputSlot> {
        match self {
            PassKind::Shadow => Some(OutputSlot::ShadowMap),
            PassKind::DepthPrepass => Some(OutputSlot::SceneDepth),
            PassKind::Scene | PassKind::PostEffect(_) => Some(OutputSlot::SceneColor),
            PassKind::ToneMap => None,
        }
    }
}

/// Ordered passes for one snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassPlan {
    kinds: Vec<PassKind>,
}

impl PassPlan {
    /// Plan the passes `snapshot` needs under `config`
    pub fn from_snapshot(snapshot: &SceneSnapshot, config: &RendererConfig) -> Self {
        if snapshot.camera().is_none() {
            debug!("No camera in scene, planning no passes");
            return Self::default();
        }
        if !snapshot.has_drawables() {
            debug!("No drawable meshes in scene, planning no passes");
            return Self::default();
        }

        let mut kinds = Vec::with_capacity(4 + config.post_effects.len());
        if snapshot.shadow_caster().is_some() {
            kinds.push(PassKind::Shadow);
        }
        if config.enable_depth_prepass {
            kinds.push(PassKind::DepthPrepass);
        }
        kinds.push(PassKind::Scene);
        kinds.extend((0..config.post_effects.len()).map(PassKind::PostEffect));
        kinds.push(PassKind::ToneMap);

        Self { kinds }
    }

    /// Passes in recording order
    pub fn kinds(&self) -> &[PassKind] {
        &self.kinds
    }

    /// Whether the plan has no passes
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Whether `kind` is planned
    pub fn contains(&self, kind: PassKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Outputs of earlier planned passes that `kind` reads
    pub fn inputs_of(&self, kind: &PassKind) -> Vec<OutputSlot> {
        match kind {
            PassKind::Shadow | PassKind::DepthPrepass => Vec::new(),
            PassKind::Scene => {
                let mut inputs = Vec::new();
                if self.contains(PassKind::Shadow) {
                    inputs.push(OutputSlot::ShadowMap);
                }
                if self.contains(PassKind::DepthPrepass) {
                    inputs.push(OutputSlot::SceneDepth);
                }
                inputs
            }
            PassKind::PostEffect(_) | PassKind::ToneMap => vec![OutputSlot::SceneColor],
        }
    }
}

/// Builds the Vulkan passes of a plan
pub struct VulkanPassFactory {
    toolkit: PassToolkit,
    config: RendererConfig,
    swap_format: vk::Format,
    fallback_image: ImageHandle,
}

impl VulkanPassFactory {
    /// Factory for passes rendering to a swapchain of `swap_format`
    pub fn new(gpu: &Arc<GpuDevice>, config: &RendererConfig, swap_format: vk::Format) -> RenderResult<Self> {
        let fallback_image: ImageHandle = Arc::new(Texture::fallback(gpu)?);
        Ok(Self {
            toolkit: PassToolkit::new(gpu, config.shaders.clone(), config.frames_in_flight),
            config: config.clone(),
            swap_format,
            fallback_image,
        })
    }

    fn create_pass(
        &self,
        plan: &PassPlan,
        kind: PassKind,
        snapshot: &SceneSnapshot,
    ) -> RenderResult<Box<dyn Renderer>> {
        let toolkit = self.toolkit.clone();
        let pass: Box<dyn Renderer> = match kind {
            PassKind::Shadow => {
                let caster = snapshot
                    .shadow_caster()
                    .ok_or_else(|| RenderError::InvalidOperation("shadow pass planned without a caster".to_string()))?;
                Box::new(ShadowPass::new(toolkit, self.config.shadow.clone(), caster))
            }
            PassKind::DepthPrepass => Box::new(DepthPrepass::new(toolkit)),
            PassKind::Scene => {
                let shadow = if plan.contains(PassKind::Shadow) {
                    snapshot
                        .shadow_caster()
                        .map(|caster| (caster, self.config.shadow.clone()))
                } else {
                    None
                };
                let settings = ScenePassSettings {
                    color_format: self.config.hdr_format.to_vk(),
                    clear_color: self.config.clear_color,
                    image_array_len: snapshot.image_array_len(),
                    shadow,
                };
                Box::new(ScenePass::new(
                    toolkit,
                    settings,
                    plan.inputs_of(&kind),
                    Arc::clone(&self.fallback_image),
                ))
            }
            PassKind::PostEffect(index) => {
                let effect = self
                    .config
                    .post_effects
                    .get(index)
                    .cloned()
                    .ok_or_else(|| RenderError::InvalidOperation(format!("no post effect {}", index)))?;
                Box::new(PostEffectPass::new(toolkit, effect, self.config.hdr_format.to_vk()))
            }
            PassKind::ToneMap => Box::new(ToneMapPass::new(toolkit, self.swap_format, self.config.tone_map.clone())),
        };
        Ok(pass)
    }
}

impl PassFactory for VulkanPassFactory {
    fn create_passes(&mut self, snapshot: &SceneSnapshot) -> RenderResult<Vec<Box<dyn Renderer>>> {
        let plan = PassPlan::from_snapshot(snapshot, &self.config);
        info!(
            "Planned passes: [{}]",
            plan.kinds()
                .iter()
                .map(|kind| kind.name(&self.config))
                .collect::<Vec<_>>()
                .join(", ")
        );

        plan.kinds()
            .iter()
            .map(|&kind| self.create_pass(&plan, kind, snapshot))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PostEffectConfig;
    use crate::foundation::math::{Mat4, Vec3};
    use crate::scene::{Camera, DirectionalLight, Material, MeshInstance, NodeRole, PointLight, SceneGraph};
    use crate::testing::built_mesh;

    fn scene(camera: bool, mesh: bool, sun: bool) -> SceneSnapshot {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        if camera {
            graph
                .add_child(root, "camera", NodeRole::Camera(Camera::default()), Mat4::identity())
                .unwrap();
        }
        if mesh {
            let instance = MeshInstance::new(built_mesh(vec![Material::default()]));
            graph
                .add_child(root, "cube", NodeRole::MeshInstance(instance), Mat4::identity())
                .unwrap();
        }
        if sun {
            let light = DirectionalLight::new(Vec3::new(1.0, 1.0, 1.0), 1.0);
            graph
                .add_child(root, "sun", NodeRole::DirectionalLight(light), Mat4::identity())
                .unwrap();
        }
        graph
            .add_child(
                root,
                "bulb",
                NodeRole::PointLight(PointLight::new(Vec3::new(1.0, 0.5, 0.5), 2.0)),
                Mat4::identity(),
            )
            .unwrap();
        SceneSnapshot::build(&graph, root).unwrap()
    }

    #[test]
    fn test_nothing_planned_without_camera_or_drawables() {
        let config = RendererConfig::default();
        assert!(PassPlan::from_snapshot(&scene(false, true, true), &config).is_empty());
        assert!(PassPlan::from_snapshot(&scene(true, false, true), &config).is_empty());
        assert!(PassPlan::from_snapshot(&SceneSnapshot::empty(), &config).is_empty());
    }

    #[test]
    fn test_directional_light_adds_shadow_pass() {
        let config = RendererConfig::default();
        let plan = PassPlan::from_snapshot(&scene(true, true, true), &config);
        assert_eq!(plan.kinds(), &[PassKind::Shadow, PassKind::Scene, PassKind::ToneMap]);
        assert_eq!(plan.inputs_of(&PassKind::Scene), vec![OutputSlot::ShadowMap]);
    }

    #[test]
    fn test_point_lights_alone_cast_no_shadow() {
        let plan = PassPlan::from_snapshot(&scene(true, true, false), &RendererConfig::default());
        assert_eq!(plan.kinds(), &[PassKind::Scene, PassKind::ToneMap]);
        assert!(plan.inputs_of(&PassKind::Scene).is_empty());
    }

    #[test]
    fn test_full_chain_order_and_inputs() {
        let config = RendererConfig::default()
            .with_depth_prepass(true)
            .with_post_effect(PostEffectConfig::named("vignette"));
        let plan = PassPlan::from_snapshot(&scene(true, true, true), &config);

        assert_eq!(
            plan.kinds(),
            &[
                PassKind::Shadow,
                PassKind::DepthPrepass,
                PassKind::Scene,
                PassKind::PostEffect(0),
                PassKind::ToneMap
            ]
        );
        let names: Vec<String> = plan.kinds().iter().map(|kind| kind.name(&config)).collect();
        assert_eq!(names, vec!["shadow", "depth_prepass", "scene", "vignette", "tonemap"]);
        assert_eq!(
            plan.inputs_of(&PassKind::Scene),
            vec![OutputSlot::ShadowMap, OutputSlot::SceneDepth]
        );
        assert_eq!(plan.inputs_of(&PassKind::PostEffect(0)), vec![OutputSlot::SceneColor]);
        assert_eq!(plan.inputs_of(&PassKind::ToneMap), vec![OutputSlot::SceneColor]);
    }

    #[test]
    fn test_outputs_by_kind() {
        assert_eq!(PassKind::Shadow.output(), Some(OutputSlot::ShadowMap));
        assert_eq!(PassKind::DepthPrepass.output(), Some(OutputSlot::SceneDepth));
        assert_eq!(PassKind::PostEffect(3).output(), Some(OutputSlot::SceneColor));
        assert_eq!(PassKind::ToneMap.output(), None);
    }
}
