//! Descriptor set layouts, pools and validated writes
//!
//! A layout is declared once through [`DescriptorSetLayoutBuilder`]; the
//! resulting [`DescriptorLayoutInfo`] is plain data that also sizes pools and
//! validates every [`DescriptorWriter`] call, so a write against a slot the
//! layout never declared fails where it is made rather than inside the driver.

use super::context::GpuDevice;
use crate::render::{RenderError, RenderResult};
use ash::vk;
use log::debug;
use std::sync::Arc;

/// Kind of resource bound at a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// Uniform buffer
    UniformBuffer,
    /// Uniform buffer bound with a dynamic offset
    UniformBufferDynamic,
    /// Storage buffer
    StorageBuffer,
    /// Combined image sampler
    CombinedImageSampler,
}

impl DescriptorKind {
    /// Vulkan descriptor type
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorKind::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }

    /// Whether the kind binds buffers
    pub fn is_buffer(self) -> bool {
        !matches!(self, DescriptorKind::CombinedImageSampler)
    }

    /// Whether binding consumes a dynamic offset
    pub fn is_dynamic(self) -> bool {
        matches!(self, DescriptorKind::UniformBufferDynamic)
    }
}

/// One declared binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingDecl {
    /// Binding slot
    pub slot: u32,
    /// Resource kind
    pub kind: DescriptorKind,
    /// Shader stages that see the binding
    pub visibility: vk::ShaderStageFlags,
    /// Array element count
    pub count: u32,
}

/// Pure description of a descriptor set layout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorLayoutInfo {
    bindings: Vec<BindingDecl>,
}

impl DescriptorLayoutInfo {
    /// Declared bindings in declaration order
    pub fn bindings(&self) -> &[BindingDecl] {
        &self.bindings
    }

    /// Binding at `slot`
    pub fn binding(&self, slot: u32) -> Option<&BindingDecl> {
        self.bindings.iter().find(|binding| binding.slot == slot)
    }

    /// Number of dynamic offsets a bind of this layout takes
    pub fn dynamic_count(&self) -> usize {
        self.bindings.iter().filter(|binding| binding.kind.is_dynamic()).count()
    }

    /// Descriptor counts per kind for `sets` sets of this layout
    pub fn pool_sizes(&self, sets: u32) -> Vec<(DescriptorKind, u32)> {
        let mut sizes: Vec<(DescriptorKind, u32)> = Vec::new();
        for binding in &self.bindings {
            let count = binding.count * sets;
            match sizes.iter_mut().find(|(kind, _)| *kind == binding.kind) {
                Some(entry) => entry.1 += count,
                None => sizes.push((binding.kind, count)),
            }
        }
        sizes
    }
}

/// Descriptor set layout builder for creating reusable layouts
#[derive(Debug, Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<BindingDecl>,
    duplicate: Option<u32>,
}

impl DescriptorSetLayoutBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a binding; a repeated slot makes `info` and `build` fail
    pub fn add_binding(
        mut self,
        slot: u32,
        kind: DescriptorKind,
        visibility: vk::ShaderStageFlags,
        count: u32,
    ) -> Self {
        if self.bindings.iter().any(|binding| binding.slot == slot) {
            self.duplicate.get_or_insert(slot);
        }
        self.bindings.push(BindingDecl {
            slot,
            kind,
            visibility,
            count,
        });
        self
    }

    /// Declared layout
    pub fn info(&self) -> RenderResult<DescriptorLayoutInfo> {
        if let Some(slot) = self.duplicate {
            return Err(RenderError::DuplicateBinding(slot));
        }
        Ok(DescriptorLayoutInfo {
            bindings: self.bindings.clone(),
        })
    }

    /// Build the descriptor set layout
    pub fn build(self, gpu: &Arc<GpuDevice>) -> RenderResult<DescriptorSetLayout> {
        let info = self.info()?;
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = info
            .bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.slot)
                    .descriptor_type(binding.kind.to_vk())
                    .descriptor_count(binding.count)
                    .stage_flags(binding.visibility)
                    .build()
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);
        let layout = unsafe {
            gpu.device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(RenderError::Api)?
        };
        debug!("Created descriptor set layout with {} bindings", vk_bindings.len());

        Ok(DescriptorSetLayout {
            gpu: Arc::clone(gpu),
            layout,
            info,
        })
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    gpu: Arc<GpuDevice>,
    layout: vk::DescriptorSetLayout,
    info: DescriptorLayoutInfo,
}

impl DescriptorSetLayout {
    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Declared bindings
    pub fn info(&self) -> &DescriptorLayoutInfo {
        &self.info
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.gpu.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Builder sizing a descriptor pool
#[derive(Debug, Default)]
pub struct DescriptorPoolBuilder {
    sizes: Vec<(DescriptorKind, u32)>,
    max_sets: u32,
}

impl DescriptorPoolBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `count` descriptors of `kind`
    pub fn add_pool_size(mut self, kind: DescriptorKind, count: u32) -> Self {
        match self.sizes.iter_mut().find(|(k, _)| *k == kind) {
            Some(entry) => entry.1 += count,
            None => self.sizes.push((kind, count)),
        }
        self
    }

    /// Maximum number of sets allocated from the pool
    pub fn set_max_sets(mut self, max_sets: u32) -> Self {
        self.max_sets = max_sets;
        self
    }

    /// Reserve room for `sets` sets of `info`
    pub fn for_layout(mut self, info: &DescriptorLayoutInfo, sets: u32) -> Self {
        for (kind, count) in info.pool_sizes(sets) {
            self = self.add_pool_size(kind, count);
        }
        self.max_sets += sets;
        self
    }

    /// Descriptor counts per kind
    pub fn sizes(&self) -> &[(DescriptorKind, u32)] {
        &self.sizes
    }

    /// Maximum set count
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Create the pool
    pub fn build(self, gpu: &Arc<GpuDevice>) -> RenderResult<DescriptorPool> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = self
            .sizes
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(kind, count)| {
                vk::DescriptorPoolSize::builder()
                    .ty(kind.to_vk())
                    .descriptor_count(*count)
                    .build()
            })
            .collect();

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(self.max_sets.max(1))
            .pool_sizes(&pool_sizes);

        let pool = unsafe {
            gpu.device
                .create_descriptor_pool(&pool_info, None)
                .map_err(RenderError::Api)?
        };

        Ok(DescriptorPool {
            gpu: Arc::clone(gpu),
            pool,
        })
    }
}

/// Descriptor pool for allocating descriptor sets
pub struct DescriptorPool {
    gpu: Arc<GpuDevice>,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Allocate `count` sets of `layout`
    pub fn allocate(&self, layout: &DescriptorSetLayout, count: u32) -> RenderResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout.handle(); count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        unsafe { self.gpu.device.allocate_descriptor_sets(&alloc_info) }.map_err(|e| match e {
            vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => RenderError::PoolExhausted,
            other => RenderError::Api(other),
        })
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.gpu.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Writes validated against a layout
pub struct DescriptorWriter<'a> {
    info: &'a DescriptorLayoutInfo,
    buffers: Vec<(BindingDecl, vk::DescriptorBufferInfo)>,
    images: Vec<(BindingDecl, Vec<vk::DescriptorImageInfo>)>,
}

impl<'a> DescriptorWriter<'a> {
    /// Start writing a set of `info`
    pub fn new(info: &'a DescriptorLayoutInfo) -> Self {
        Self {
            info,
            buffers: Vec::new(),
            images: Vec::new(),
        }
    }

    fn declared(&self, slot: u32) -> RenderResult<BindingDecl> {
        self.info.binding(slot).copied().ok_or(RenderError::UndeclaredBinding(slot))
    }

    /// Write a buffer to a single-element buffer slot
    pub fn write_buffer(&mut self, slot: u32, buffer_info: vk::DescriptorBufferInfo) -> RenderResult<&mut Self> {
        let binding = self.declared(slot)?;
        if !binding.kind.is_buffer() {
            return Err(RenderError::BindingKindMismatch {
                binding: slot,
                expected: format!("{:?}", binding.kind),
                actual: "buffer".to_string(),
            });
        }
        if binding.count != 1 {
            return Err(RenderError::BindingCountMismatch {
                binding: slot,
                expected: binding.count,
                actual: 1,
            });
        }
        self.buffers.push((binding, buffer_info));
        Ok(self)
    }

    /// Write every element of an image slot
    pub fn write_images(&mut self, slot: u32, image_infos: &[vk::DescriptorImageInfo]) -> RenderResult<&mut Self> {
        let binding = self.declared(slot)?;
        if binding.kind.is_buffer() {
            return Err(RenderError::BindingKindMismatch {
                binding: slot,
                expected: format!("{:?}", binding.kind),
                actual: "image".to_string(),
            });
        }
        if binding.count as usize != image_infos.len() {
            return Err(RenderError::BindingCountMismatch {
                binding: slot,
                expected: binding.count,
                actual: image_infos.len() as u32,
            });
        }
        self.images.push((binding, image_infos.to_vec()));
        Ok(self)
    }

    /// Number of slots written so far
    pub fn write_count(&self) -> usize {
        self.buffers.len() + self.images.len()
    }

    /// Allocate a set from `pool` and write it
    pub fn build(&self, pool: &DescriptorPool, layout: &DescriptorSetLayout) -> RenderResult<vk::DescriptorSet> {
        let set = pool
            .allocate(layout, 1)?
            .into_iter()
            .next()
            .ok_or(RenderError::PoolExhausted)?;
        self.overwrite(&pool.gpu, set);
        Ok(set)
    }

    /// Rewrite an existing set
    pub fn overwrite(&self, gpu: &GpuDevice, set: vk::DescriptorSet) {
        let mut writes = Vec::with_capacity(self.write_count());
        for (binding, info) in &self.buffers {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding.slot)
                    .dst_array_element(0)
                    .descriptor_type(binding.kind.to_vk())
                    .buffer_info(std::slice::from_ref(info))
                    .build(),
            );
        }
        for (binding, infos) in &self.images {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding.slot)
                    .dst_array_element(0)
                    .descriptor_type(binding.kind.to_vk())
                    .image_info(infos)
                    .build(),
            );
        }

        unsafe {
            gpu.device.update_descriptor_sets(&writes, &[]);
        }
    }
}
