//! Tone mapping into the swapchain image
//!
//! Exposure and gamma are applied in the shader; the swapchain uses a UNORM
//! format so gamma is not applied twice. The swapchain image is already in
//! `COLOR_ATTACHMENT_OPTIMAL` when this pass records.

use super::fullscreen::FullscreenPipeline;
use crate::config::ToneMapConfig;
use crate::render::recorder::{AttachmentDesc, AttachmentLoad, CommandRecorder, ImageTransition, RenderingDesc};
use crate::render::renderer::{FrameContext, PassLifecycle, Renderer};
use crate::render::target::{OutputSlot, PassOutputs, TargetView};
use crate::render::toolkit::PassToolkit;
use crate::render::{RenderError, RenderResult};
use crate::scene::SceneSnapshot;
use ash::vk;

/// Push constants of the tone-mapping shader
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct ToneMapPushConstants {
    /// Linear exposure multiplier
    pub exposure: f32,
    /// Output gamma
    pub gamma: f32,
    _padding: [f32; 2],
}

unsafe impl bytemuck::Pod for ToneMapPushConstants {}
unsafe impl bytemuck::Zeroable for ToneMapPushConstants {}

impl From<&ToneMapConfig> for ToneMapPushConstants {
    fn from(config: &ToneMapConfig) -> Self {
        Self {
            exposure: config.exposure.max(0.0),
            gamma: if config.gamma > 0.0 { config.gamma } else { 2.2 },
            _padding: [0.0; 2],
        }
    }
}

const INPUTS: [OutputSlot; 1] = [OutputSlot::SceneColor];

/// HDR scene color to the presentable image
pub struct ToneMapPass {
    toolkit: PassToolkit,
    lifecycle: PassLifecycle,
    swap_format: vk::Format,
    constants: ToneMapPushConstants,
    fullscreen: FullscreenPipeline,
    input: Option<TargetView>,
}

impl ToneMapPass {
    /// Pass writing images of `swap_format`
    pub fn new(toolkit: PassToolkit, swap_format: vk::Format, config: ToneMapConfig) -> Self {
        Self {
            toolkit,
            lifecycle: PassLifecycle::new("tonemap"),
            swap_format,
            constants: ToneMapPushConstants::from(&config),
            fullscreen: FullscreenPipeline::new("tonemap", "tonemap"),
            input: None,
        }
    }
}

impl Renderer for ToneMapPass {
    fn name(&self) -> &str {
        "tonemap"
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
            .create_pipeline::<ToneMapPushConstants>(&self.toolkit, self.swap_format)
    }

    fn create_images_resources(&mut self, _extent: vk::Extent2D) -> RenderResult<()> {
        // Renders straight into the swapchain image
        Ok(())
    }

    fn cleanup_images_resources(&mut self) {
        self.input = None;
    }

    fn inputs(&self) -> &[OutputSlot] {
        &INPUTS
    }

    fn bind_inputs(&mut self, outputs: &PassOutputs) -> RenderResult<()> {
        let input = outputs
            .get(OutputSlot::SceneColor)
            .copied()
            .ok_or_else(|| RenderError::InvalidOperation("tonemap has no scene color to read".to_string()))?;
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
        if self.input.is_none() {
            return Err(super::not_loaded("tonemap", "input"));
        }

        self.begin_rendering(recorder, ctx, swap_target);
        self.fullscreen.draw(&self.toolkit, recorder, swap_target.extent, &self.constants)?;
        self.end_rendering(recorder);
        Ok(())
    }

    fn begin_rendering(&self, recorder: &mut dyn CommandRecorder, _ctx: &FrameContext<'_>, swap_target: &TargetView) {
        if let Some(input) = self.input {
            recorder.transition_image(&ImageTransition::color_to_shader_read(input.image));
        }
        recorder.begin_rendering(&RenderingDesc {
            extent: swap_target.extent,
            color: Some(AttachmentDesc {
                view: swap_target.view,
                load: AttachmentLoad::DontCare,
                store: true,
            }),
            depth: None,
        });
    }

    fn cleanup(&mut self) {
        self.input = None;
        self.fullscreen.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_from_config() {
        let config = ToneMapConfig {
            exposure: 1.5,
            gamma: 2.4,
        };
        let constants = ToneMapPushConstants::from(&config);
        assert_eq!(constants.exposure, 1.5);
        assert_eq!(constants.gamma, 2.4);
        assert_eq!(std::mem::size_of::<ToneMapPushConstants>(), 16);
    }

    #[test]
    fn test_invalid_gamma_falls_back() {
        let config = ToneMapConfig {
            exposure: -1.0,
            gamma: 0.0,
        };
        let constants = ToneMapPushConstants::from(&config);
        assert_eq!(constants.exposure, 0.0);
        assert_eq!(constants.gamma, 2.2);
    }
}
