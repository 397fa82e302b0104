//! # Rendering System
//!
//! Multi-pass frame rendering over Vulkan.
//!
//! ## Architecture
//!
//! - **Renderer contract**: every pass implements [`Renderer`] and moves
//!   through the [`PassState`] lifecycle
//! - **Pass chain**: [`PassChain`] runs passes in order and links each pass's
//!   published output to the passes that read it
//! - **Frame driver**: [`FrameDriver`] owns the frames-in-flight loop and
//!   recovers from swapchain staleness
//! - **Vulkan backend**: RAII wrappers for buffers, images, descriptors,
//!   pipelines and the swapchain
//! - **Facade**: [`FrameRenderer`] wires all of the above to a window surface
//!
//! Passes never talk to the command buffer directly; they record through
//! [`CommandRecorder`], which keeps recording logic testable without a GPU.

pub mod backends;
pub mod chain;
pub mod driver;
pub mod error;
pub mod frame;
pub mod frame_renderer;
pub mod passes;
pub mod recorder;
pub mod renderer;
pub mod target;
pub mod toolkit;
pub mod uniforms;

pub use chain::{PassChain, PassFactory};
pub use driver::{AcquireOutcome, FrameDriver, FrameOutcome, PresentOutcome, SwapSurface};
pub use error::{RenderError, RenderResult};
pub use frame::{FrameIndex, FrameSlot, PerFrame};
pub use frame_renderer::FrameRenderer;
pub use recorder::{AttachmentDesc, AttachmentLoad, ClearValue, CommandRecorder, ImageTransition, RenderingDesc};
pub use renderer::{FrameContext, PassLifecycle, PassState, Renderer};
pub use target::{OutputSlot, PassOutputs, SamplerKind, TargetSpec, TargetView};
pub use toolkit::{FrameRegions, PassToolkit};
