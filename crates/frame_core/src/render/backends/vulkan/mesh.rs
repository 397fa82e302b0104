//! Device-local mesh buffers

use super::buffer::GpuBuffer;
use super::context::GpuDevice;
use crate::render::{RenderError, RenderResult};
use crate::scene::{MeshBuffers, MeshData, Vertex};
use ash::vk;
use std::sync::Arc;

/// Vertex and index buffers uploaded through a staging copy
pub struct GpuMesh {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
}

impl GpuMesh {
    /// Upload `data` into device-local memory
    pub fn upload(gpu: &Arc<GpuDevice>, data: &MeshData) -> RenderResult<Self> {
        if data.vertices.is_empty() || data.indices.is_empty() {
            return Err(RenderError::InvalidOperation("cannot upload an empty mesh".to_string()));
        }

        let vertex_buffer = upload_slice(
            gpu,
            bytemuck::cast_slice::<Vertex, u8>(&data.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = upload_slice(
            gpu,
            bytemuck::cast_slice::<u32, u8>(&data.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: data.indices.len() as u32,
        })
    }
}

fn upload_slice(gpu: &Arc<GpuDevice>, bytes: &[u8], usage: vk::BufferUsageFlags) -> RenderResult<GpuBuffer> {
    let size = bytes.len() as u64;

    let mut staging = GpuBuffer::new(
        gpu,
        size,
        1,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        1,
    )?;
    staging.map()?;
    staging.write_to_buffer(bytes, 0)?;
    staging.unmap();

    let device_local = GpuBuffer::new(
        gpu,
        size,
        1,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        1,
    )?;
    staging.copy_to(&device_local, size)?;
    Ok(device_local)
}

impl MeshBuffers for GpuMesh {
    fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.handle()
    }

    fn index_count(&self) -> u32 {
        self.index_count
    }
}
