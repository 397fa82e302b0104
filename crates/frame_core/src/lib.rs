//! # Frame Core
//!
//! GPU frame rendering over Vulkan 1.3: scene snapshot marshaling, a
//! multi-pass pipeline (shadow map, optional depth pre-pass, forward-lit
//! scene, post effects, tone mapping) and a frames-in-flight draw loop.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use frame_core::config::RendererConfig;
//! use frame_core::render::{FrameRenderer, RenderResult};
//! use frame_core::scene::SceneGraph;
//! use ash::vk;
//!
//! fn run(
//!     extensions: &[String],
//!     create_surface: impl FnOnce(&frame_core::render::backends::vulkan::VulkanInstance) -> RenderResult<vk::SurfaceKHR>,
//! ) -> RenderResult<()> {
//!     let config = RendererConfig::new("viewer");
//!     let extent = vk::Extent2D { width: 1280, height: 720 };
//!     let mut renderer = FrameRenderer::new(&config, extensions, create_surface, extent)?;
//!
//!     let graph = SceneGraph::new();
//!     renderer.load_scene(&graph, graph.root())?;
//!     renderer.draw_frame(&graph)?;
//!     renderer.shutdown()
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod foundation;
pub mod render;
pub mod scene;

#[cfg(test)]
mod testing;
