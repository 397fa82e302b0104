//! Buffer management for vertex data and uniforms
//!
//! A [`GpuBuffer`] holds `element_count` elements of `element_size` bytes at
//! a fixed stride rounded up to the requested offset alignment, so element
//! `i` always starts at `i * stride` and is valid as a dynamic offset.

use super::context::GpuDevice;
use crate::render::uniforms::aligned_stride;
use crate::render::{RenderError, RenderResult};
use ash::vk;
use std::sync::Arc;

/// Buffer wrapper with memory management
pub struct GpuBuffer {
    gpu: Arc<GpuDevice>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    element_size: u64,
    element_count: u32,
    stride: u64,
    size: u64,
    allocation_size: u64,
    mapped: Option<*mut u8>,
}

impl GpuBuffer {
    /// Create a buffer of `element_count` aligned elements
    ///
    /// `min_offset_alignment` of 1 packs elements tightly.
    pub fn new(
        gpu: &Arc<GpuDevice>,
        element_size: u64,
        element_count: u32,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
        min_offset_alignment: u64,
    ) -> RenderResult<Self> {
        let stride = aligned_stride(element_size, min_offset_alignment);
        let size = stride * element_count.max(1) as u64;
        let device = &gpu.device;

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None).map_err(RenderError::Api)? };

        let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = match gpu.find_memory_type(mem_requirements.memory_type_bits, memory_flags) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(RenderError::Api(e));
            }
        };

        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(RenderError::Api(e));
        }

        Ok(Self {
            gpu: Arc::clone(gpu),
            buffer,
            memory,
            element_size,
            element_count,
            stride,
            size,
            allocation_size: mem_requirements.size,
            mapped: None,
        })
    }

    /// Host-visible, coherent buffer holding `count` aligned `T`s
    pub fn host_visible<T>(
        gpu: &Arc<GpuDevice>,
        count: u32,
        usage: vk::BufferUsageFlags,
        min_offset_alignment: u64,
    ) -> RenderResult<Self> {
        Self::new(
            gpu,
            std::mem::size_of::<T>() as u64,
            count,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            min_offset_alignment,
        )
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Total size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Byte distance between consecutive elements
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Unpadded element size
    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    /// Number of elements
    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    /// Whether the buffer is currently mapped
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Map the whole buffer
    pub fn map(&mut self) -> RenderResult<()> {
        if self.mapped.is_some() {
            return Err(RenderError::AlreadyMapped);
        }
        let ptr = unsafe {
            self.gpu
                .device
                .map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .map_err(RenderError::Api)?
        };
        self.mapped = Some(ptr.cast::<u8>());
        Ok(())
    }

    /// Unmap; does nothing when not mapped
    pub fn unmap(&mut self) {
        if self.mapped.take().is_some() {
            unsafe { self.gpu.device.unmap_memory(self.memory) };
        }
    }

    /// Copy `bytes` into the mapped buffer at `offset`
    pub fn write_to_buffer(&mut self, bytes: &[u8], offset: u64) -> RenderResult<()> {
        let ptr = self.mapped.ok_or(RenderError::NotMapped)?;
        check_write(bytes.len() as u64, offset, self.size)?;

        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(offset as usize), bytes.len());
        }
        Ok(())
    }

    /// Write one element at `index * stride`
    pub fn write_to_index<T: bytemuck::Pod>(&mut self, value: &T, index: u32) -> RenderResult<()> {
        let bytes = bytemuck::bytes_of(value);
        if index >= self.element_count || bytes.len() as u64 > self.stride {
            return Err(RenderError::WriteOutOfBounds {
                size: bytes.len() as u64,
                offset: index as u64 * self.stride,
                capacity: self.size,
            });
        }
        self.write_to_buffer(bytes, index as u64 * self.stride)
    }

    /// Make host writes in the range visible to the device
    pub fn flush(&self, size: u64, offset: u64) -> RenderResult<()> {
        let range = self.mapped_range(size, offset);
        unsafe {
            self.gpu
                .device
                .flush_mapped_memory_ranges(&[range])
                .map_err(RenderError::Api)
        }
    }

    /// Make device writes in the range visible to the host
    pub fn invalidate(&self, size: u64, offset: u64) -> RenderResult<()> {
        let range = self.mapped_range(size, offset);
        unsafe {
            self.gpu
                .device
                .invalidate_mapped_memory_ranges(&[range])
                .map_err(RenderError::Api)
        }
    }

    fn mapped_range(&self, size: u64, offset: u64) -> vk::MappedMemoryRange {
        let (offset, size) = atom_range(offset, size, self.gpu.non_coherent_atom_size(), self.allocation_size);
        vk::MappedMemoryRange::builder()
            .memory(self.memory)
            .offset(offset)
            .size(size)
            .build()
    }

    /// Descriptor info for a byte range
    pub fn descriptor_info(&self, size: u64, offset: u64) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset,
            range: size,
        }
    }

    /// Descriptor info covering exactly one element
    ///
    /// Bound with a dynamic offset, this views any element of the buffer.
    pub fn descriptor_info_for_index(&self, index: u32) -> vk::DescriptorBufferInfo {
        self.descriptor_info(self.element_size, index as u64 * self.stride)
    }

    /// Copy `size` bytes into `dst` through a one-shot command buffer
    pub fn copy_to(&self, dst: &GpuBuffer, size: u64) -> RenderResult<()> {
        if size > self.size || size > dst.size {
            return Err(RenderError::WriteOutOfBounds {
                size,
                offset: 0,
                capacity: self.size.min(dst.size),
            });
        }
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        self.gpu.one_shot(|device, command_buffer| unsafe {
            device.cmd_copy_buffer(command_buffer, self.buffer, dst.buffer, &[region]);
        })
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.unmap();
        unsafe {
            self.gpu.device.destroy_buffer(self.buffer, None);
            self.gpu.device.free_memory(self.memory, None);
        }
    }
}

/// Reject a write of `size` bytes at `offset` that overruns `capacity`
pub fn check_write(size: u64, offset: u64, capacity: u64) -> RenderResult<()> {
    match offset.checked_add(size) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(RenderError::WriteOutOfBounds { size, offset, capacity }),
    }
}

/// Widen a range to `atom` boundaries, falling back to the whole allocation
/// when the widened end would pass it
fn atom_range(offset: u64, size: u64, atom: u64, allocation_size: u64) -> (u64, u64) {
    let atom = atom.max(1);
    let start = offset / atom * atom;
    if size == vk::WHOLE_SIZE {
        return (start, vk::WHOLE_SIZE);
    }
    let end = (offset + size).div_ceil(atom) * atom;
    if end >= allocation_size {
        (start, vk::WHOLE_SIZE)
    } else {
        (start, end - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_write_bounds() {
        assert!(check_write(16, 0, 16).is_ok());
        assert!(check_write(8, 8, 16).is_ok());
        assert!(matches!(
            check_write(8, 9, 16),
            Err(RenderError::WriteOutOfBounds { size: 8, offset: 9, capacity: 16 })
        ));
        assert!(check_write(1, u64::MAX, 16).is_err());
    }

    #[test]
    fn test_atom_range_widens_to_atoms() {
        assert_eq!(atom_range(70, 10, 64, 1024), (64, 64));
        assert_eq!(atom_range(0, 64, 64, 1024), (0, 64));
        assert_eq!(atom_range(960, 60, 64, 1024), (960, vk::WHOLE_SIZE));
        assert_eq!(atom_range(5, vk::WHOLE_SIZE, 64, 1024), (0, vk::WHOLE_SIZE));
    }
}
