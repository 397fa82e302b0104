//! Mesh geometry and surfaces

use super::material::Material;
use ash::vk;
use std::fmt;
use std::sync::Arc;

/// Interleaved vertex layout shared by every geometry pass
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate
    pub uv: [f32; 2],
}

unsafe impl bytemuck::Pod for Vertex {}
unsafe impl bytemuck::Zeroable for Vertex {}

impl Vertex {
    /// Create a vertex
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, normal, uv }
    }

    /// Vertex buffer binding at binding 0
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    /// Attributes at locations 0 (position), 1 (normal), 2 (uv)
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(0)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(12)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(2)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(24)
                .build(),
        ]
    }
}

/// CPU-side geometry ready for upload
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    /// Vertices
    pub vertices: Vec<Vertex>,
    /// Triangle list indices
    pub indices: Vec<u32>,
}

/// Built GPU geometry: one shared vertex buffer and one shared index buffer
pub trait MeshBuffers {
    /// Vertex buffer handle
    fn vertex_buffer(&self) -> vk::Buffer;

    /// Index buffer handle (`u32` indices)
    fn index_buffer(&self) -> vk::Buffer;

    /// Total number of indices in the index buffer
    fn index_count(&self) -> u32;
}

/// A contiguous index range of a mesh drawn with one material
#[derive(Debug, Clone)]
pub struct Surface {
    /// First index within the mesh's index buffer
    pub first_index: u32,
    /// Number of indices
    pub index_count: u32,
    /// Material
    pub material: Material,
}

/// Mesh: surfaces over shared vertex/index buffers
#[derive(Clone, Default)]
pub struct Mesh {
    /// Surfaces, drawn in order
    pub surfaces: Vec<Surface>,
    /// GPU buffers; `None` until the host has built them
    pub buffers: Option<Arc<dyn MeshBuffers>>,
}

impl Mesh {
    /// Create a mesh that has no GPU buffers yet
    pub fn new(surfaces: Vec<Surface>) -> Self {
        Self {
            surfaces,
            buffers: None,
        }
    }

    /// Attach built GPU buffers
    pub fn with_buffers(mut self, buffers: Arc<dyn MeshBuffers>) -> Self {
        self.buffers = Some(buffers);
        self
    }

    /// Whether GPU buffers have been built
    pub fn is_built(&self) -> bool {
        self.buffers.is_some()
    }
}

impl fmt::Debug for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mesh")
            .field("surfaces", &self.surfaces)
            .field("built", &self.is_built())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_matches_attributes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[1].offset as usize, std::mem::size_of::<[f32; 3]>());
        assert_eq!(attributes[2].offset as usize, 2 * std::mem::size_of::<[f32; 3]>());
        assert_eq!(Vertex::binding_description().stride, 32);
    }

    #[test]
    fn test_mesh_without_buffers_is_not_built() {
        assert!(!Mesh::new(Vec::new()).is_built());
    }
}
