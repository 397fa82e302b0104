//! Configured post effects
//!
//! Each effect reads the current scene color and republishes its own HDR
//! target as the new scene color, so effects chain in configuration order.

use super::fullscreen::FullscreenPipeline;
use super::not_loaded;
use crate::config::PostEffectConfig;
use crate::render::backends::vulkan::RenderTarget;
use crate::render::recorder::{AttachmentDesc, AttachmentLoad, CommandRecorder, ImageTransition, RenderingDesc};
use crate::render::renderer::{FrameContext, PassLifecycle, Renderer};
use crate::render::target::{OutputSlot, PassOutputs, TargetSpec, TargetView};
use crate::render::toolkit::PassToolkit;
use crate::render::{RenderError, RenderResult};
use crate::scene::SceneSnapshot;
use ash::vk;

/// Push constants of every post effect
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct PostPushConstants {
    /// One over the target size in pixels
    pub texel_size: [f32; 2],
    /// Frame index, for animated effects
    pub frame: f32,
    _padding: f32,
}

unsafe impl bytemuck::Pod for PostPushConstants {}
unsafe impl bytemuck::Zeroable for PostPushConstants {}

impl PostPushConstants {
    /// Constants for a target of `extent` at frame `frame`
    pub fn new(extent: vk::Extent2D, frame: u64) -> Self {
        Self {
            texel_size: [1.0 / extent.width.max(1) as f32, 1.0 / extent.height.max(1) as f32],
            frame: frame as f32,
            _padding: 0.0,
        }
    }
}

const INPUTS: [OutputSlot; 1] = [OutputSlot::SceneColor];

/// One full-screen effect over the scene color
pub struct PostEffectPass {
    toolkit: PassToolkit,
    lifecycle: PassLifecycle,
    name: String,
    color_format: vk::Format,
    fullscreen: FullscreenPipeline,
    target: Option<RenderTarget>,
    input: Option<TargetView>,
}

impl PostEffectPass {
    /// Pass for `effect` writing `color_format`
    pub fn new(toolkit: PassToolkit, effect: PostEffectConfig, color_format: vk::Format) -> Self {
        Self {
            toolkit,
            lifecycle: PassLifecycle::new(effect.name.clone()),
            fullscreen: FullscreenPipeline::new(effect.name.clone(), effect.fragment_shader),
            name: effect.name,
            color_format,
            target: None,
            input: None,
        }
    }
}

impl Renderer for PostEffectPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> &PassLifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut PassLifecycle {
        &mut self.lifecycle
    }

    fn load_shaders(&mut self) -> RenderResult<()> {
        self.fullscreen.load_shaders(&self.toolkit)
    }

    fn create_descriptor_set_layout(&mut self) -> RenderResult<()> {
        self.fullscreen.create_descriptor_set_layout(&self.toolkit)
    }

    fn prepare_scene(&mut self, _snapshot: &SceneSnapshot) -> RenderResult<()> {
        self.fullscreen.allocate_set(&self.toolkit)
    }

    fn create_pipeline(&mut self) -> RenderResult<()> {
        self.fullscreen
            .create_pipeline::<PostPushConstants>(&self.toolkit, self.color_format)
    }

    fn create_images_resources(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        let spec = TargetSpec::color(extent, self.color_format);
        self.target = Some(RenderTarget::new(self.toolkit.gpu(), spec)?);
        Ok(())
    }

    fn cleanup_images_resources(&mut self) {
        self.target = None;
        self.input = None;
    }

    fn inputs(&self) -> &[OutputSlot] {
        &INPUTS
    }

    fn output(&self) -> Option<(OutputSlot, TargetView)> {
        self.target.as_ref().map(|target| (OutputSlot::SceneColor, target.view()))
    }

    fn bind_inputs(&mut self, outputs: &PassOutputs) -> RenderResult<()> {
        let input = outputs.get(OutputSlot::SceneColor).copied().ok_or_else(|| {
            RenderError::InvalidOperation(format!("post effect '{}' has no scene color to read", self.name))
        })?;
        self.fullscreen.bind_input(&self.toolkit, &input)?;
        self.input = Some(input);
        Ok(())
    }

    fn update(&mut self, _ctx: &FrameContext<'_>) -> RenderResult<()> {
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
        let extent = self
            .target
            .as_ref()
            .map(|target| target.spec().extent)
            .ok_or_else(|| not_loaded(&self.name, "color target"))?;
        if self.input.is_none() {
            return Err(not_loaded(&self.name, "input"));
        }

        self.begin_rendering(recorder, ctx, swap_target);
        self.fullscreen
            .draw(&self.toolkit, recorder, extent, &PostPushConstants::new(extent, ctx.frame.0))?;
        self.end_rendering(recorder);
        Ok(())
    }

    fn begin_rendering(&self, recorder: &mut dyn CommandRecorder, _ctx: &FrameContext<'_>, _swap_target: &TargetView) {
        let (Some(input), Some(target)) = (self.input, self.target.as_ref()) else {
            return;
        };
        let view = target.view();

        recorder.transition_image(&ImageTransition::color_to_shader_read(input.image));
        recorder.transition_image(&ImageTransition::color_attachment(view.image));
        recorder.begin_rendering(&RenderingDesc {
            extent: view.extent,
            color: Some(AttachmentDesc {
                view: view.view,
                load: AttachmentLoad::DontCare,
                store: true,
            }),
            depth: None,
        });
    }

    fn cleanup(&mut self) {
        self.cleanup_images_resources();
        self.fullscreen.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_constants_texel_size() {
        let constants = PostPushConstants::new(vk::Extent2D { width: 800, height: 400 }, 12);
        assert_eq!(constants.texel_size, [1.0 / 800.0, 1.0 / 400.0]);
        assert_eq!(constants.frame, 12.0);
        assert_eq!(std::mem::size_of::<PostPushConstants>(), 16);
    }

    #[test]
    fn test_zero_extent_does_not_divide_by_zero() {
        let constants = PostPushConstants::new(vk::Extent2D { width: 0, height: 0 }, 0);
        assert!(constants.texel_size.iter().all(|v| v.is_finite()));
    }
}
