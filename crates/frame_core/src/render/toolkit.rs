//! Shared mechanics of the Vulkan passes
//!
//! Passes hold a [`PassToolkit`] by composition instead of inheriting
//! behavior: shader lookup, pipeline layouts, viewport setup and per-frame
//! uniform regions all go through it.

use super::backends::vulkan::{GpuBuffer, GpuDevice, PipelineLayout, ShaderModule};
use super::frame::{FrameSlot, PerFrame};
use super::recorder::CommandRecorder;
use super::uniforms::{RegionKind, RegionLayout};
use super::{RenderError, RenderResult};
use crate::config::ShaderConfig;
use ash::vk;
use log::trace;
use std::sync::Arc;

/// Per-frame-slot buffers each holding the same region layout
///
/// The buffers stay mapped for their whole lifetime; slot `s` is only
/// written after the slot's fence has signaled.
pub struct FrameRegions {
    layout: RegionLayout,
    buffers: PerFrame<GpuBuffer>,
}

impl FrameRegions {
    /// Region layout shared by every slot
    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    /// Buffer of `slot`
    pub fn buffer(&self, slot: FrameSlot) -> &GpuBuffer {
        &self.buffers[slot]
    }

    /// Write record `index` of `slot`
    pub fn write<T: bytemuck::Pod>(&mut self, slot: FrameSlot, index: u32, value: &T) -> RenderResult<()> {
        self.buffers[slot].write_to_index(value, index)
    }

    /// Write `values` as records `0..values.len()` of `slot`
    pub fn write_all<T: bytemuck::Pod>(&mut self, slot: FrameSlot, values: &[T]) -> RenderResult<()> {
        for (index, value) in values.iter().enumerate() {
            self.write(slot, index as u32, value)?;
        }
        Ok(())
    }

    /// Descriptor info for one record, to be bound with a dynamic offset
    pub fn element_info(&self, slot: FrameSlot) -> vk::DescriptorBufferInfo {
        self.buffers[slot].descriptor_info_for_index(0)
    }

    /// Descriptor info covering the whole region
    pub fn whole_info(&self, slot: FrameSlot) -> vk::DescriptorBufferInfo {
        self.buffers[slot].descriptor_info(self.layout.size, 0)
    }

    /// Dynamic offset of record `index`
    pub fn dynamic_offset(&self, index: u32) -> u32 {
        self.layout.dynamic_offset(index)
    }
}

/// Shader lookup, pipeline layouts and per-frame regions for one pass
#[derive(Clone)]
pub struct PassToolkit {
    gpu: Arc<GpuDevice>,
    shaders: ShaderConfig,
    frames_in_flight: usize,
}

impl PassToolkit {
    /// Toolkit for passes recording `frames_in_flight` slots
    pub fn new(gpu: &Arc<GpuDevice>, shaders: ShaderConfig, frames_in_flight: usize) -> Self {
        Self {
            gpu: Arc::clone(gpu),
            shaders,
            frames_in_flight,
        }
    }

    /// Device the pass creates resources on
    pub fn gpu(&self) -> &Arc<GpuDevice> {
        &self.gpu
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Load `<name>.<stage>` from the configured shader directory
    pub fn load_shader(&self, name: &str, stage: &str) -> RenderResult<ShaderModule> {
        let path = self.shaders.shader_path(name, stage);
        trace!("Loading shader {}", path.display());
        ShaderModule::from_file(&self.gpu, &path)
    }

    /// Pipeline layout for one descriptor set layout (or none) and push constants
    pub fn pipeline_layout(
        &self,
        set_layout: Option<vk::DescriptorSetLayout>,
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RenderResult<PipelineLayout> {
        let set_layouts: Vec<vk::DescriptorSetLayout> = set_layout.into_iter().collect();
        PipelineLayout::new(&self.gpu, &set_layouts, push_constant_ranges)
    }

    /// Mapped host-visible regions of `count` `T` records, one per frame slot
    ///
    /// Uniform regions live in uniform buffers with records at the device's
    /// dynamic offset alignment. Storage arrays live in storage buffers packed
    /// at the std430 array stride.
    pub fn frame_regions<T>(&self, kind: RegionKind, count: u32) -> RenderResult<FrameRegions> {
        let (usage, device_alignment) = match kind {
            RegionKind::Uniform => (vk::BufferUsageFlags::UNIFORM_BUFFER, self.gpu.min_uniform_alignment()),
            RegionKind::StorageArray => (vk::BufferUsageFlags::STORAGE_BUFFER, self.gpu.min_storage_alignment()),
        };
        let layout = RegionLayout::for_kind::<T>(kind, count, device_alignment);

        let buffers = PerFrame::new(self.frames_in_flight, |_| {
            let mut buffer = GpuBuffer::host_visible::<T>(&self.gpu, layout.count, usage, layout.alignment)?;
            buffer.map()?;
            Ok::<_, RenderError>(buffer)
        })?;

        Ok(FrameRegions { layout, buffers })
    }

    /// Cover `extent` with the viewport and scissor
    pub fn set_viewport(&self, recorder: &mut dyn CommandRecorder, extent: vk::Extent2D) {
        trace!("Viewport {}x{}", extent.width, extent.height);
        recorder.set_viewport_scissor(extent);
    }
}

/// Push-constant range for `T` at offset 0
pub fn push_range<T>(stages: vk::ShaderStageFlags) -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: stages,
        offset: 0,
        size: std::mem::size_of::<T>() as u32,
    }
}
