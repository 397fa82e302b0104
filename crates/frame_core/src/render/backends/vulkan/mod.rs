//! Vulkan backend
//!
//! RAII wrappers for every Vulkan object the renderer owns. Each wrapper
//! holds an `Arc<GpuDevice>`, so the logical device outlives everything
//! created from it.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptors;
pub mod image;
pub mod mesh;
pub mod presenter;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use buffer::GpuBuffer;
pub use commands::{CommandPool, VkCommandRecorder};
pub use context::{GpuDevice, PhysicalDeviceInfo, VulkanInstance};
pub use descriptors::{
    BindingDecl, DescriptorKind, DescriptorLayoutInfo, DescriptorPool, DescriptorPoolBuilder, DescriptorSetLayout,
    DescriptorSetLayoutBuilder, DescriptorWriter,
};
pub use image::{RenderTarget, Texture};
pub use mesh::GpuMesh;
pub use presenter::VulkanPresenter;
pub use shader::{GraphicsPipeline, GraphicsPipelineBuilder, PipelineLayout, ShaderModule};
pub use swapchain::Swapchain;
pub use sync::{Fence, FrameSync, Semaphore};
