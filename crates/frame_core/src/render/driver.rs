//! # Frame Driver
//!
//! The draw loop. Each frame runs strictly in this order:
//!
//! 1. apply a pending resize
//! 2. wait for the frame slot's fence
//! 3. acquire a swapchain image (out of date: recreate and skip)
//! 4. update every active pass
//! 5. record every pass into the slot's single command buffer
//! 6. submit and present (stale: recreate after presenting)
//! 7. advance the frame index
//!
//! Swapchain staleness is handled here and never returned as an error. A
//! frame that hits it is skipped before submission, so no partially recorded
//! command buffer ever reaches the queue.

use super::chain::{PassChain, PassFactory};
use super::frame::{FrameIndex, FrameSlot};
use super::recorder::{AttachmentDesc, ClearValue, CommandRecorder, ImageTransition, RenderingDesc};
use super::renderer::FrameContext;
use super::target::TargetView;
use super::RenderResult;
use crate::scene::{NodeKey, SceneGraph, SceneSnapshot};
use ash::vk;
use log::{debug, info, trace, warn};

/// Result of acquiring a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image acquired
    Acquired {
        /// Swapchain image index
        image_index: u32,
        /// Swapchain still works but no longer matches the surface
        suboptimal: bool,
    },
    /// Swapchain must be recreated before use
    OutOfDate,
}

/// Result of presenting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented normally
    Presented,
    /// Presented (or dropped) but the swapchain is out of date or suboptimal
    Stale,
}

/// Result of one `draw_frame` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was submitted and presented
    Presented,
    /// Nothing was submitted this call
    Skipped,
}

/// Presentation surface with frame-in-flight synchronization
///
/// Implementations own one fence, one image-available semaphore and one
/// command buffer per frame slot, plus one render-finished semaphore per
/// swapchain image. The slot's fence is reset only immediately before its
/// submission.
pub trait SwapSurface {
    /// Number of frame slots
    fn frames_in_flight(&self) -> usize;

    /// Current swapchain extent
    fn extent(&self) -> vk::Extent2D;

    /// Block until the slot's previous submission has completed
    fn wait_for_slot(&mut self, slot: FrameSlot) -> RenderResult<()>;

    /// Acquire the next swapchain image for the slot
    fn acquire_image(&mut self, slot: FrameSlot) -> RenderResult<AcquireOutcome>;

    /// Reset and record the slot's command buffer targeting `image_index`
    fn record(
        &mut self,
        slot: FrameSlot,
        image_index: u32,
        record: &mut dyn FnMut(&mut dyn CommandRecorder, &TargetView) -> RenderResult<()>,
    ) -> RenderResult<()>;

    /// Submit the slot's command buffer and present `image_index`
    fn submit_and_present(&mut self, slot: FrameSlot, image_index: u32) -> RenderResult<PresentOutcome>;

    /// Rebuild the swapchain for `extent`
    fn recreate(&mut self, extent: vk::Extent2D) -> RenderResult<()>;

    /// Block until the device is idle
    fn wait_idle(&self) -> RenderResult<()>;
}

/// Orchestrates scene loading and the per-frame loop
pub struct FrameDriver<S: SwapSurface, F: PassFactory> {
    surface: S,
    factory: F,
    chain: PassChain,
    snapshot: SceneSnapshot,
    frame: FrameIndex,
    pending_extent: Option<vk::Extent2D>,
    clear_color: [f32; 4],
    shut_down: bool,
}

impl<S: SwapSurface, F: PassFactory> FrameDriver<S, F> {
    /// Create a driver with no scene loaded
    pub fn new(surface: S, factory: F, clear_color: [f32; 4]) -> Self {
        Self {
            surface,
            factory,
            chain: PassChain::default(),
            snapshot: SceneSnapshot::empty(),
            frame: FrameIndex::default(),
            pending_extent: None,
            clear_color,
            shut_down: false,
        }
    }

    /// Presentation surface
    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Mutable presentation surface
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Current pass chain
    pub fn chain(&self) -> &PassChain {
        &self.chain
    }

    /// Snapshot of the loaded scene
    pub fn snapshot(&self) -> &SceneSnapshot {
        &self.snapshot
    }

    /// Index of the next frame to draw
    pub fn frame_index(&self) -> FrameIndex {
        self.frame
    }

    /// Walk the scene below `root` and rebuild every pass for it
    ///
    /// Graph edits made after this call are not picked up until it is
    /// called again.
    pub fn load_scene(&mut self, graph: &SceneGraph, root: NodeKey) -> RenderResult<()> {
        let snapshot = SceneSnapshot::build(graph, root)?;

        self.surface.wait_idle()?;
        self.chain.cleanup();

        let passes = self.factory.create_passes(&snapshot)?;
        let mut chain = PassChain::new(passes);
        chain.load(&snapshot, self.surface.extent())?;

        self.chain = chain;
        self.snapshot = snapshot;
        info!("Scene loaded with {} passes", self.chain.len());
        Ok(())
    }

    /// Schedule a resize; applied at the start of the next frame
    pub fn on_resize(&mut self, width: u32, height: u32) {
        debug!("Resize requested: {}x{}", width, height);
        self.pending_extent = Some(vk::Extent2D { width, height });
    }

    /// Draw one frame
    pub fn draw_frame(&mut self, graph: &SceneGraph) -> RenderResult<FrameOutcome> {
        if self.shut_down {
            return Ok(FrameOutcome::Skipped);
        }

        if let Some(extent) = self.pending_extent {
            if is_zero_area(extent) {
                trace!("Window has zero area, skipping frame");
                return Ok(FrameOutcome::Skipped);
            }
            self.pending_extent = None;
            self.recreate(extent)?;
        }

        let extent = self.surface.extent();
        if is_zero_area(extent) {
            return Ok(FrameOutcome::Skipped);
        }

        let slot = self.frame.slot(self.surface.frames_in_flight());
        self.surface.wait_for_slot(slot)?;

        let (image_index, suboptimal) = match self.surface.acquire_image(slot)? {
            AcquireOutcome::Acquired { image_index, suboptimal } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                warn!("Swapchain out of date on acquire, recreating");
                self.recreate(extent)?;
                return Ok(FrameOutcome::Skipped);
            }
        };

        let ctx = FrameContext {
            frame: self.frame,
            slot,
            extent,
            graph,
        };
        self.chain.update(&ctx)?;

        let chain = &mut self.chain;
        let clear_color = self.clear_color;
        self.surface.record(slot, image_index, &mut |recorder, swap_target| {
            recorder.transition_image(&ImageTransition::swap_to_attachment(swap_target.image));
            if chain.has_active() {
                chain.record(recorder, &ctx, swap_target)?;
            } else {
                record_clear(recorder, swap_target, clear_color);
            }
            recorder.transition_image(&ImageTransition::swap_to_present(swap_target.image));
            Ok(())
        })?;

        let presented = self.surface.submit_and_present(slot, image_index)?;
        self.frame = self.frame.next();

        if presented == PresentOutcome::Stale || suboptimal {
            warn!("Swapchain stale after present, recreating");
            self.recreate(extent)?;
        }

        Ok(FrameOutcome::Presented)
    }

    /// Wait for the GPU and release every pass
    pub fn shutdown(&mut self) -> RenderResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.surface.wait_idle()?;
        self.chain.cleanup();
        self.snapshot = SceneSnapshot::empty();
        self.shut_down = true;
        info!("Frame driver shut down after {} frames", self.frame.0);
        Ok(())
    }

    /// Consume the driver, returning the surface for teardown
    pub fn into_surface(mut self) -> RenderResult<S> {
        self.shutdown()?;
        let Self { surface, .. } = self;
        Ok(surface)
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        self.surface.wait_idle()?;
        self.surface.recreate(extent)?;
        let actual = self.surface.extent();
        if is_zero_area(actual) {
            return Ok(());
        }
        self.chain.recreate(actual)?;
        debug!("Recreated frame resources at {}x{}", actual.width, actual.height);
        Ok(())
    }
}

fn is_zero_area(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

fn record_clear(recorder: &mut dyn CommandRecorder, swap_target: &TargetView, clear_color: [f32; 4]) {
    recorder.begin_rendering(&RenderingDesc {
        extent: swap_target.extent,
        color: Some(AttachmentDesc::cleared(swap_target.view, ClearValue::Color(clear_color))),
        depth: None,
    });
    recorder.end_rendering();
}
