//! Test doubles for GPU-free tests
//!
//! A recording [`CommandRecorder`], a swap surface that checks fence
//! discipline, mock passes driven by the real pass plan, and placeholder
//! image/mesh handles.

use crate::config::RendererConfig;
use crate::render::passes::{PassKind, PassPlan};
use crate::render::{
    AcquireOutcome, CommandRecorder, FrameContext, FrameSlot, ImageTransition, OutputSlot, PassFactory,
    PassLifecycle, PassOutputs, PresentOutcome, RenderResult, Renderer, RenderingDesc, SwapSurface,
    TargetView,
};
use crate::scene::{Material, Mesh, MeshBuffers, SampledImage, SceneSnapshot, Surface};
use ash::vk;
use ash::vk::Handle;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0x1000);

fn next_handle() -> u64 {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

/// Image handle that only carries fake Vulkan handles
pub struct MockImage {
    raw: u64,
}

impl SampledImage for MockImage {
    fn view(&self) -> vk::ImageView {
        vk::ImageView::from_raw(self.raw)
    }

    fn sampler(&self) -> vk::Sampler {
        vk::Sampler::from_raw(self.raw)
    }
}

/// A fresh, distinct image handle
pub fn mock_image() -> crate::scene::ImageHandle {
    Arc::new(MockImage { raw: next_handle() })
}

/// Mesh buffers with fake handles
pub struct MockMeshBuffers {
    raw: u64,
    index_count: u32,
}

impl MeshBuffers for MockMeshBuffers {
    fn vertex_buffer(&self) -> vk::Buffer {
        vk::Buffer::from_raw(self.raw)
    }

    fn index_buffer(&self) -> vk::Buffer {
        vk::Buffer::from_raw(self.raw + 1)
    }

    fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Built mesh with one three-index surface per material
pub fn built_mesh(materials: Vec<Material>) -> Arc<Mesh> {
    let surfaces: Vec<Surface> = materials
        .into_iter()
        .enumerate()
        .map(|(i, material)| Surface {
            first_index: i as u32 * 3,
            index_count: 3,
            material,
        })
        .collect();
    let buffers = MockMeshBuffers {
        raw: next_handle(),
        index_count: surfaces.len() as u32 * 3,
    };
    Arc::new(Mesh::new(surfaces).with_buffers(Arc::new(buffers)))
}

/// View of a fake swapchain image
pub fn swap_view() -> TargetView {
    swap_view_with_extent(vk::Extent2D { width: 800, height: 600 }, 0)
}

fn swap_view_with_extent(extent: vk::Extent2D, image_index: u32) -> TargetView {
    TargetView {
        image: vk::Image::from_raw(0x10 + image_index as u64),
        view: vk::ImageView::from_raw(0x20 + image_index as u64),
        sampler: vk::Sampler::null(),
        format: vk::Format::B8G8R8A8_UNORM,
        extent,
        aspect: vk::ImageAspectFlags::COLOR,
    }
}

/// One recorded command
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginRendering { extent: vk::Extent2D, has_color: bool, has_depth: bool },
    EndRendering,
    Transition(ImageTransition),
    ViewportScissor(vk::Extent2D),
    BindPipeline(vk::Pipeline),
    BindDescriptorSet { set: vk::DescriptorSet, dynamic_offsets: Vec<u32> },
    PushConstants { size: usize },
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer),
    SetCullMode(vk::CullModeFlags),
    SetDepthBias { constant: f32, slope: f32 },
    DrawIndexed { index_count: u32, first_index: u32 },
    Draw { vertex_count: u32 },
}

/// Recorder that keeps every command in order
#[derive(Debug, Default)]
pub struct CommandLog {
    pub commands: Vec<RecordedCommand>,
}

impl CommandLog {
    /// Number of draw commands of any kind
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }))
            .count()
    }

    /// Indexed draws in order
    pub fn indexed_draws(&self) -> Vec<(u32, u32)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::DrawIndexed { index_count, first_index } => Some((*index_count, *first_index)),
                _ => None,
            })
            .collect()
    }
}

impl CommandRecorder for CommandLog {
    fn begin_rendering(&mut self, desc: &RenderingDesc) {
        self.commands.push(RecordedCommand::BeginRendering {
            extent: desc.extent,
            has_color: desc.color.is_some(),
            has_depth: desc.depth.is_some(),
        });
    }

    fn end_rendering(&mut self) {
        self.commands.push(RecordedCommand::EndRendering);
    }

    fn transition_image(&mut self, transition: &ImageTransition) {
        self.commands.push(RecordedCommand::Transition(*transition));
    }

    fn set_viewport_scissor(&mut self, extent: vk::Extent2D) {
        self.commands.push(RecordedCommand::ViewportScissor(extent));
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.commands.push(RecordedCommand::BindPipeline(pipeline));
    }

    fn bind_descriptor_set(
        &mut self,
        _layout: vk::PipelineLayout,
        _set_index: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        self.commands.push(RecordedCommand::BindDescriptorSet {
            set,
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }

    fn push_constants(&mut self, _layout: vk::PipelineLayout, _stages: vk::ShaderStageFlags, _offset: u32, bytes: &[u8]) {
        self.commands.push(RecordedCommand::PushConstants { size: bytes.len() });
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        self.commands.push(RecordedCommand::BindVertexBuffer(buffer));
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        self.commands.push(RecordedCommand::BindIndexBuffer(buffer));
    }

    fn set_cull_mode(&mut self, cull_mode: vk::CullModeFlags) {
        self.commands.push(RecordedCommand::SetCullMode(cull_mode));
    }

    fn set_depth_bias(&mut self, constant_factor: f32, slope_factor: f32) {
        self.commands.push(RecordedCommand::SetDepthBias {
            constant: constant_factor,
            slope: slope_factor,
        });
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32) {
        self.commands.push(RecordedCommand::DrawIndexed { index_count, first_index });
    }

    fn draw(&mut self, vertex_count: u32) {
        self.commands.push(RecordedCommand::Draw { vertex_count });
    }
}

#[derive(Default)]
struct PassEventsInner {
    log: Vec<(String, &'static str)>,
    names: Vec<String>,
    bound: HashMap<String, Vec<OutputSlot>>,
    extents: HashMap<String, vk::Extent2D>,
    cleanup: Vec<String>,
}

/// Shared journal of what mock passes were asked to do
#[derive(Clone, Default)]
pub struct PassEvents {
    inner: Rc<RefCell<PassEventsInner>>,
}

impl PassEvents {
    fn push(&self, pass: &str, event: &'static str) {
        self.inner.borrow_mut().log.push((pass.to_string(), event));
    }

    /// How often `pass` saw `event`
    pub fn count(&self, pass: &str, event: &str) -> usize {
        self.inner
            .borrow()
            .log
            .iter()
            .filter(|(p, e)| p == pass && *e == event)
            .count()
    }

    /// Inputs found at the last `bind_inputs` of `pass`
    pub fn bound_inputs(&self, pass: &str) -> Vec<OutputSlot> {
        self.inner.borrow().bound.get(pass).cloned().unwrap_or_default()
    }

    /// Extent of the last image creation of `pass`
    pub fn image_extent(&self, pass: &str) -> Option<vk::Extent2D> {
        self.inner.borrow().extents.get(pass).copied()
    }

    /// Names of every pass created, in creation order
    pub fn pass_names(&self) -> Vec<String> {
        self.inner.borrow().names.clone()
    }

    /// Names in the order their `cleanup` ran
    pub fn cleanup_order(&self) -> Vec<String> {
        self.inner.borrow().cleanup.clone()
    }
}

/// Pass that records into [`PassEvents`] instead of touching a GPU
pub struct MockPass {
    name: String,
    lifecycle: PassLifecycle,
    events: PassEvents,
    inputs: Vec<OutputSlot>,
    output: Option<(OutputSlot, u64)>,
    extent: Option<vk::Extent2D>,
    draws: bool,
}

impl MockPass {
    pub fn new(name: &str, events: &PassEvents) -> Self {
        events.inner.borrow_mut().names.push(name.to_string());
        Self {
            name: name.to_string(),
            lifecycle: PassLifecycle::new(name),
            events: events.clone(),
            inputs: Vec::new(),
            output: None,
            extent: None,
            draws: false,
        }
    }

    pub fn producing(mut self, slot: OutputSlot, raw: u64) -> Self {
        self.output = Some((slot, raw));
        self
    }

    pub fn consuming(mut self, slot: OutputSlot) -> Self {
        self.inputs.push(slot);
        self
    }

    pub fn drawing(mut self) -> Self {
        self.draws = true;
        self
    }
}

impl Renderer for MockPass {
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
        self.events.push(&self.name, "load_shaders");
        Ok(())
    }

    fn create_descriptor_set_layout(&mut self) -> RenderResult<()> {
        self.events.push(&self.name, "create_descriptor_set_layout");
        Ok(())
    }

    fn prepare_scene(&mut self, _snapshot: &SceneSnapshot) -> RenderResult<()> {
        self.events.push(&self.name, "prepare_scene");
        Ok(())
    }

    fn create_pipeline(&mut self) -> RenderResult<()> {
        self.events.push(&self.name, "create_pipeline");
        Ok(())
    }

    fn create_images_resources(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        self.events.push(&self.name, "create_images_resources");
        self.events.inner.borrow_mut().extents.insert(self.name.clone(), extent);
        self.extent = Some(extent);
        Ok(())
    }

    fn cleanup_images_resources(&mut self) {
        self.events.push(&self.name, "cleanup_images_resources");
        self.extent = None;
    }

    fn inputs(&self) -> &[OutputSlot] {
        &self.inputs
    }

    fn output(&self) -> Option<(OutputSlot, TargetView)> {
        let (slot, raw) = self.output?;
        let extent = self.extent?;
        Some((
            slot,
            TargetView {
                image: vk::Image::from_raw(raw),
                view: vk::ImageView::from_raw(raw),
                sampler: vk::Sampler::from_raw(raw),
                format: vk::Format::R16G16B16A16_SFLOAT,
                extent,
                aspect: vk::ImageAspectFlags::COLOR,
            },
        ))
    }

    fn bind_inputs(&mut self, outputs: &PassOutputs) -> RenderResult<()> {
        self.events.push(&self.name, "bind_inputs");
        let found: Vec<OutputSlot> = self.inputs.iter().copied().filter(|slot| outputs.get(*slot).is_some()).collect();
        self.events.inner.borrow_mut().bound.insert(self.name.clone(), found);
        Ok(())
    }

    fn update(&mut self, _ctx: &FrameContext<'_>) -> RenderResult<()> {
        self.events.push(&self.name, "update");
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
        self.events.push(&self.name, "record");
        if self.draws {
            self.begin_rendering(recorder, ctx, swap_target);
            recorder.draw(3);
            self.end_rendering(recorder);
        }
        Ok(())
    }

    fn begin_rendering(&self, recorder: &mut dyn CommandRecorder, ctx: &FrameContext<'_>, swap_target: &TargetView) {
        recorder.begin_rendering(&RenderingDesc {
            extent: ctx.extent,
            color: Some(crate::render::AttachmentDesc::loaded(swap_target.view)),
            depth: None,
        });
    }

    fn cleanup(&mut self) {
        self.events.push(&self.name, "cleanup");
        self.events.inner.borrow_mut().cleanup.push(self.name.clone());
    }
}

/// Factory that builds mock passes from the real pass plan
pub struct MockFactory {
    events: PassEvents,
    config: RendererConfig,
}

impl MockFactory {
    pub fn new(events: &PassEvents) -> Self {
        Self::with_config(events, RendererConfig::default())
    }

    pub fn with_config(events: &PassEvents, config: RendererConfig) -> Self {
        Self {
            events: events.clone(),
            config,
        }
    }
}

impl PassFactory for MockFactory {
    fn create_passes(&mut self, snapshot: &SceneSnapshot) -> RenderResult<Vec<Box<dyn Renderer>>> {
        let plan = PassPlan::from_snapshot(snapshot, &self.config);
        Ok(plan
            .kinds()
            .iter()
            .enumerate()
            .map(|(i, kind)| {
                let mut pass = MockPass::new(&kind.name(&self.config), &self.events);
                for slot in plan.inputs_of(kind) {
                    pass = pass.consuming(slot);
                }
                if let Some(slot) = kind.output() {
                    pass = pass.producing(slot, 0x100 + i as u64);
                }
                if matches!(kind, PassKind::Scene | PassKind::ToneMap) {
                    pass = pass.drawing();
                }
                Box::new(pass) as Box<dyn Renderer>
            })
            .collect())
    }
}

/// What the mock surface was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    Wait(usize),
    Acquire(usize),
    Record(usize),
    Submit(usize),
    Recreate,
    WaitIdle,
}

/// Swap surface that tracks fence state per slot
///
/// A slot becomes busy on submit and idle on `wait_for_slot` or `wait_idle`.
/// Recording into a busy slot is logged as a violation.
pub struct MockSurface {
    frames_in_flight: usize,
    extent: vk::Extent2D,
    window_extent: Option<vk::Extent2D>,
    image_count: u32,
    next_image: u32,
    busy: RefCell<Vec<bool>>,
    events: RefCell<Vec<SurfaceEvent>>,
    violations: Vec<String>,
    out_of_date_next: bool,
    stale_next: bool,
    submitted: usize,
    presented: usize,
    recreations: usize,
    draw_calls: Cell<usize>,
}

impl MockSurface {
    pub fn new(frames_in_flight: usize, extent: vk::Extent2D) -> Self {
        Self {
            frames_in_flight,
            extent,
            window_extent: None,
            image_count: 3,
            next_image: 0,
            busy: RefCell::new(vec![false; frames_in_flight]),
            events: RefCell::new(Vec::new()),
            violations: Vec::new(),
            out_of_date_next: false,
            stale_next: false,
            submitted: 0,
            presented: 0,
            recreations: 0,
            draw_calls: Cell::new(0),
        }
    }

    /// Next acquire reports out-of-date; the window now has `extent`
    pub fn resize_on_next_acquire(&mut self, extent: vk::Extent2D) {
        self.window_extent = Some(extent);
        self.out_of_date_next = true;
    }

    /// Next present reports a stale swapchain
    pub fn stale_on_next_present(&mut self) {
        self.stale_next = true;
    }

    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.events.borrow().clone()
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    pub fn presented(&self) -> usize {
        self.presented
    }

    pub fn recreations(&self) -> usize {
        self.recreations
    }

    pub fn draw_calls(&self) -> usize {
        self.draw_calls.get()
    }
}

impl SwapSurface for MockSurface {
    fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn wait_for_slot(&mut self, slot: FrameSlot) -> RenderResult<()> {
        self.busy.borrow_mut()[slot.0] = false;
        self.events.borrow_mut().push(SurfaceEvent::Wait(slot.0));
        Ok(())
    }

    fn acquire_image(&mut self, slot: FrameSlot) -> RenderResult<AcquireOutcome> {
        if self.out_of_date_next {
            self.out_of_date_next = false;
            return Ok(AcquireOutcome::OutOfDate);
        }
        self.events.borrow_mut().push(SurfaceEvent::Acquire(slot.0));
        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal: false,
        })
    }

    fn record(
        &mut self,
        slot: FrameSlot,
        image_index: u32,
        record: &mut dyn FnMut(&mut dyn CommandRecorder, &TargetView) -> RenderResult<()>,
    ) -> RenderResult<()> {
        if self.busy.borrow()[slot.0] {
            self.violations.push(format!("slot {} recorded while its fence was unsignaled", slot.0));
        }
        self.events.borrow_mut().push(SurfaceEvent::Record(slot.0));

        let mut log = CommandLog::default();
        record(&mut log, &swap_view_with_extent(self.extent, image_index))?;
        self.draw_calls.set(self.draw_calls.get() + log.draw_count());
        Ok(())
    }

    fn submit_and_present(&mut self, slot: FrameSlot, _image_index: u32) -> RenderResult<PresentOutcome> {
        self.busy.borrow_mut()[slot.0] = true;
        self.events.borrow_mut().push(SurfaceEvent::Submit(slot.0));
        self.submitted += 1;
        self.presented += 1;
        if self.stale_next {
            self.stale_next = false;
            return Ok(PresentOutcome::Stale);
        }
        Ok(PresentOutcome::Presented)
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        self.extent = self.window_extent.take().unwrap_or(extent);
        self.recreations += 1;
        self.events.borrow_mut().push(SurfaceEvent::Recreate);
        Ok(())
    }

    fn wait_idle(&self) -> RenderResult<()> {
        self.busy.borrow_mut().iter_mut().for_each(|busy| *busy = false);
        self.events.borrow_mut().push(SurfaceEvent::WaitIdle);
        Ok(())
    }
}
