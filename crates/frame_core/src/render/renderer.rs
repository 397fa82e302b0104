//! # Renderer Contract
//!
//! Every render pass implements [`Renderer`]. The chain drives the calls in
//! a fixed order:
//!
//! 1. `load_shaders`, `create_descriptor_set_layout`, `prepare_scene`,
//!    `create_pipeline`, `create_images_resources` (pass becomes
//!    `ResourcesLoaded`)
//! 2. `bind_inputs` with the outputs of earlier passes (pass becomes `Active`)
//! 3. per frame: `update`, then `record_commands`
//! 4. on resize: `recreate_images_resources`, then `bind_inputs` again
//! 5. `cleanup` (pass becomes `Destroyed`)
//!
//! Shared mechanics (shader lookup, pipeline layouts, viewport setup,
//! per-frame uniform buffers) live in [`crate::render::PassToolkit`], which
//! Vulkan passes hold by composition.

use super::frame::{FrameIndex, FrameSlot};
use super::recorder::CommandRecorder;
use super::target::{OutputSlot, PassOutputs, TargetView};
use super::{RenderError, RenderResult};
use crate::scene::{SceneGraph, SceneSnapshot};
use ash::vk;
use log::trace;

/// Lifecycle state of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    /// Constructed; nothing loaded
    Uninitialized,
    /// Shaders, layouts, pipeline and images exist; inputs not bound yet
    ResourcesLoaded,
    /// Ready to record
    Active,
    /// Extent-dependent images are stale
    ImagesInvalidated,
    /// Released; terminal
    Destroyed,
}

/// Lifecycle state machine of one pass
#[derive(Debug, Clone)]
pub struct PassLifecycle {
    pass: String,
    state: PassState,
}

impl PassLifecycle {
    /// New lifecycle in `Uninitialized`
    pub fn new(pass: impl Into<String>) -> Self {
        Self {
            pass: pass.into(),
            state: PassState::Uninitialized,
        }
    }

    /// Current state
    pub fn state(&self) -> PassState {
        self.state
    }

    /// Whether recording is allowed
    pub fn can_record(&self) -> bool {
        self.state == PassState::Active
    }

    /// Whether `from -> to` is a legal transition
    pub fn is_allowed(from: PassState, to: PassState) -> bool {
        use PassState::*;
        matches!(
            (from, to),
            (Uninitialized, ResourcesLoaded)
                | (ResourcesLoaded, Active)
                | (ResourcesLoaded, ImagesInvalidated)
                | (Active, ImagesInvalidated)
                | (ImagesInvalidated, ResourcesLoaded)
                | (Uninitialized | ResourcesLoaded | Active | ImagesInvalidated, Destroyed)
        )
    }

    /// Move to `to`, rejecting illegal transitions
    pub fn transition(&mut self, to: PassState) -> RenderResult<()> {
        if !Self::is_allowed(self.state, to) {
            return Err(RenderError::InvalidLifecycleTransition {
                pass: self.pass.clone(),
                from: self.state,
                to,
            });
        }
        trace!("Pass '{}': {:?} -> {:?}", self.pass, self.state, to);
        self.state = to;
        Ok(())
    }
}

/// Per-frame data handed to every pass
pub struct FrameContext<'a> {
    /// Monotonic frame index
    pub frame: FrameIndex,
    /// Frame slot whose resources may be written
    pub slot: FrameSlot,
    /// Current swapchain extent
    pub extent: vk::Extent2D,
    /// Live scene graph, read for world transforms
    pub graph: &'a SceneGraph,
}

impl FrameContext<'_> {
    /// Width over height of the swapchain extent
    pub fn aspect(&self) -> f32 {
        if self.extent.height == 0 {
            return 1.0;
        }
        self.extent.width as f32 / self.extent.height as f32
    }
}

/// A render pass
pub trait Renderer {
    /// Pass name for logs
    fn name(&self) -> &str;

    /// Lifecycle state machine
    fn lifecycle(&self) -> &PassLifecycle;

    /// Mutable lifecycle state machine
    fn lifecycle_mut(&mut self) -> &mut PassLifecycle;

    /// Current lifecycle state
    fn state(&self) -> PassState {
        self.lifecycle().state()
    }

    /// Load the pass's shader modules
    fn load_shaders(&mut self) -> RenderResult<()>;

    /// Declare the pass's descriptor set layout
    fn create_descriptor_set_layout(&mut self) -> RenderResult<()>;

    /// Size per-frame buffers and descriptor pools from the snapshot
    fn prepare_scene(&mut self, snapshot: &SceneSnapshot) -> RenderResult<()>;

    /// Build the graphics pipeline
    fn create_pipeline(&mut self) -> RenderResult<()>;

    /// Create render targets for the swapchain extent
    fn create_images_resources(&mut self, extent: vk::Extent2D) -> RenderResult<()>;

    /// Destroy render targets
    fn cleanup_images_resources(&mut self);

    /// Rebuild render targets for a new extent
    fn recreate_images_resources(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        self.cleanup_images_resources();
        self.create_images_resources(extent)
    }

    /// Outputs of earlier passes this pass reads
    fn inputs(&self) -> &[OutputSlot] {
        &[]
    }

    /// Output this pass publishes, once its images exist
    fn output(&self) -> Option<(OutputSlot, TargetView)> {
        None
    }

    /// Bind earlier outputs into descriptor sets
    fn bind_inputs(&mut self, _outputs: &PassOutputs) -> RenderResult<()> {
        Ok(())
    }

    /// Write this frame slot's uniform data
    fn update(&mut self, ctx: &FrameContext<'_>) -> RenderResult<()>;

    /// Record the pass; a no-op unless `Active`
    fn record_commands(
        &mut self,
        recorder: &mut dyn CommandRecorder,
        ctx: &FrameContext<'_>,
        swap_target: &TargetView,
    ) -> RenderResult<()>;

    /// Transition attachments and begin the rendering scope
    fn begin_rendering(&self, recorder: &mut dyn CommandRecorder, ctx: &FrameContext<'_>, swap_target: &TargetView);

    /// End the rendering scope
    fn end_rendering(&self, recorder: &mut dyn CommandRecorder) {
        recorder.end_rendering();
    }

    /// Release every GPU resource the pass owns
    fn cleanup(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_lifecycle_path() {
        let mut lifecycle = PassLifecycle::new("scene");
        assert!(!lifecycle.can_record());
        lifecycle.transition(PassState::ResourcesLoaded).unwrap();
        lifecycle.transition(PassState::Active).unwrap();
        assert!(lifecycle.can_record());
        lifecycle.transition(PassState::ImagesInvalidated).unwrap();
        assert!(!lifecycle.can_record());
        lifecycle.transition(PassState::ResourcesLoaded).unwrap();
        lifecycle.transition(PassState::Active).unwrap();
        lifecycle.transition(PassState::Destroyed).unwrap();
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut lifecycle = PassLifecycle::new("shadow");
        assert!(lifecycle.transition(PassState::Active).is_err());
        lifecycle.transition(PassState::Destroyed).unwrap();
        let err = lifecycle.transition(PassState::ResourcesLoaded).unwrap_err();
        assert!(matches!(
            err,
            RenderError::InvalidLifecycleTransition {
                from: PassState::Destroyed,
                ..
            }
        ));
    }
}
