//! Ordered pass chain
//!
//! Passes run in creation order within one command buffer. Linking walks the
//! chain once, handing each pass the outputs published by the passes before
//! it, so a consumer can only ever bind a producer that records earlier.

use super::recorder::CommandRecorder;
use super::renderer::{FrameContext, PassState, Renderer};
use super::target::{PassOutputs, TargetView};
use super::RenderResult;
use crate::scene::SceneSnapshot;
use ash::vk;
use log::{debug, info};

/// Builds the pass list for a scene snapshot
pub trait PassFactory {
    /// Passes in recording order
    fn create_passes(&mut self, snapshot: &SceneSnapshot) -> RenderResult<Vec<Box<dyn Renderer>>>;
}

/// Passes of the current scene, in recording order
#[derive(Default)]
pub struct PassChain {
    passes: Vec<Box<dyn Renderer>>,
    outputs: PassOutputs,
}

impl PassChain {
    /// Wrap passes in recording order
    pub fn new(passes: Vec<Box<dyn Renderer>>) -> Self {
        Self {
            passes,
            outputs: PassOutputs::default(),
        }
    }

    /// Number of passes
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Whether the chain has no passes
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Pass names in order
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// Outputs currently published
    pub fn outputs(&self) -> &PassOutputs {
        &self.outputs
    }

    /// Whether at least one pass can record
    pub fn has_active(&self) -> bool {
        self.passes.iter().any(|pass| pass.lifecycle().can_record())
    }

    /// Load every pass for `snapshot` at `extent`, then link
    pub fn load(&mut self, snapshot: &SceneSnapshot, extent: vk::Extent2D) -> RenderResult<()> {
        for pass in &mut self.passes {
            debug!("Loading pass '{}'", pass.name());
            pass.load_shaders()?;
            pass.create_descriptor_set_layout()?;
            pass.prepare_scene(snapshot)?;
            pass.create_pipeline()?;
            pass.create_images_resources(extent)?;
            pass.lifecycle_mut().transition(PassState::ResourcesLoaded)?;
        }

        self.link()?;
        info!("Pass chain ready: {}", self.pass_names().join(" -> "));
        Ok(())
    }

    /// Bind inputs in order and activate every loaded pass
    pub fn link(&mut self) -> RenderResult<()> {
        self.outputs.clear();

        for pass in &mut self.passes {
            if pass.state() != PassState::ResourcesLoaded {
                continue;
            }
            pass.bind_inputs(&self.outputs)?;
            if let Some((slot, view)) = pass.output() {
                self.outputs.publish(slot, view);
            }
            pass.lifecycle_mut().transition(PassState::Active)?;
        }

        Ok(())
    }

    /// Write per-frame data for every active pass
    pub fn update(&mut self, ctx: &FrameContext<'_>) -> RenderResult<()> {
        for pass in self.passes.iter_mut().filter(|pass| pass.lifecycle().can_record()) {
            pass.update(ctx)?;
        }
        Ok(())
    }

    /// Record every active pass in order
    pub fn record(
        &mut self,
        recorder: &mut dyn CommandRecorder,
        ctx: &FrameContext<'_>,
        swap_target: &TargetView,
    ) -> RenderResult<()> {
        for pass in self.passes.iter_mut().filter(|pass| pass.lifecycle().can_record()) {
            pass.record_commands(recorder, ctx, swap_target)?;
        }
        Ok(())
    }

    /// Rebuild extent-dependent images of every loaded pass and relink
    pub fn recreate(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        for pass in &mut self.passes {
            if !matches!(pass.state(), PassState::Active | PassState::ResourcesLoaded) {
                continue;
            }
            pass.lifecycle_mut().transition(PassState::ImagesInvalidated)?;
            pass.recreate_images_resources(extent)?;
            pass.lifecycle_mut().transition(PassState::ResourcesLoaded)?;
        }

        self.link()
    }

    /// Release every pass in reverse creation order
    pub fn cleanup(&mut self) {
        self.outputs.clear();
        while let Some(mut pass) = self.passes.pop() {
            debug!("Cleaning up pass '{}'", pass.name());
            pass.cleanup();
            if pass.state() != PassState::Destroyed {
                // Destroyed is reachable from every other state
                let _ = pass.lifecycle_mut().transition(PassState::Destroyed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::target::OutputSlot;
    use crate::render::FrameIndex;
    use crate::render::FrameSlot;
    use crate::scene::SceneGraph;
    use crate::testing::{swap_view, CommandLog, MockPass, PassEvents, RecordedCommand};

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_link_passes_earlier_outputs_only() {
        let events = PassEvents::default();
        let producer = MockPass::new("shadow", &events).producing(OutputSlot::ShadowMap, 1);
        let consumer = MockPass::new("scene", &events)
            .consuming(OutputSlot::ShadowMap)
            .producing(OutputSlot::SceneColor, 2);
        let mut chain = PassChain::new(vec![Box::new(producer), Box::new(consumer)]);

        chain.load(&SceneSnapshot::empty(), extent(640, 480)).unwrap();

        assert!(chain.has_active());
        assert_eq!(events.bound_inputs("shadow"), Vec::<OutputSlot>::new());
        assert_eq!(events.bound_inputs("scene"), vec![OutputSlot::ShadowMap]);
        assert!(chain.outputs().get(OutputSlot::SceneColor).is_some());
    }

    #[test]
    fn test_recreate_resizes_every_pass_and_relinks() {
        let events = PassEvents::default();
        let first = MockPass::new("a", &events).producing(OutputSlot::SceneColor, 1);
        let second = MockPass::new("b", &events).consuming(OutputSlot::SceneColor);
        let mut chain = PassChain::new(vec![Box::new(first), Box::new(second)]);
        chain.load(&SceneSnapshot::empty(), extent(640, 480)).unwrap();

        chain.recreate(extent(1024, 768)).unwrap();
        chain.recreate(extent(1024, 768)).unwrap();

        assert_eq!(events.image_extent("a"), Some(extent(1024, 768)));
        assert_eq!(events.image_extent("b"), Some(extent(1024, 768)));
        assert_eq!(events.count("b", "bind_inputs"), 3);
        assert!(chain.has_active());
    }

    #[test]
    fn test_record_skips_inactive_passes() {
        let events = PassEvents::default();
        let mut chain = PassChain::new(vec![Box::new(MockPass::new("idle", &events))]);
        let graph = SceneGraph::new();
        let ctx = FrameContext {
            frame: FrameIndex(0),
            slot: FrameSlot(0),
            extent: extent(1, 1),
            graph: &graph,
        };
        let mut log = CommandLog::default();

        chain.record(&mut log, &ctx, &swap_view()).unwrap();

        assert!(!chain.has_active());
        assert!(log.commands.is_empty());
        assert_eq!(events.count("idle", "record"), 0);
    }

    #[test]
    fn test_cleanup_runs_in_reverse_order() {
        let events = PassEvents::default();
        let mut chain = PassChain::new(vec![
            Box::new(MockPass::new("first", &events)),
            Box::new(MockPass::new("second", &events)),
        ]);
        chain.load(&SceneSnapshot::empty(), extent(8, 8)).unwrap();
        chain.cleanup();

        assert_eq!(events.cleanup_order(), vec!["second".to_string(), "first".to_string()]);
        assert!(chain.is_empty());
    }

    #[test]
    fn test_recorded_draws_come_from_active_passes() {
        let events = PassEvents::default();
        let mut chain = PassChain::new(vec![Box::new(MockPass::new("draws", &events).drawing())]);
        chain.load(&SceneSnapshot::empty(), extent(8, 8)).unwrap();
        let graph = SceneGraph::new();
        let ctx = FrameContext {
            frame: FrameIndex(0),
            slot: FrameSlot(0),
            extent: extent(8, 8),
            graph: &graph,
        };
        let mut log = CommandLog::default();

        chain.record(&mut log, &ctx, &swap_view()).unwrap();

        assert_eq!(log.draw_count(), 1);
        assert!(matches!(log.commands[0], RecordedCommand::BeginRendering { .. }));
    }
}
