//! Crate-wide error type
//!
//! Setup failures and contract violations surface as `Err` and are not
//! retried. Swapchain staleness never reaches this type; the frame driver
//! recovers from it locally.

use crate::config::ConfigError;
use ash::vk;
use std::path::PathBuf;

/// Rendering errors
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Instance, device or surface creation failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// The selected GPU lacks a required feature
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// A compiled shader file does not exist
    #[error("Shader not found: {0}")]
    ShaderNotFound(PathBuf),

    /// A shader file exists but is not valid SPIR-V
    #[error("Invalid shader {path}: {reason}")]
    InvalidShader {
        /// Offending file
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },

    /// `map()` called on a mapped buffer
    #[error("Buffer is already mapped")]
    AlreadyMapped,

    /// Host write to a buffer that is not mapped
    #[error("Buffer is not mapped")]
    NotMapped,

    /// Write exceeds buffer capacity
    #[error("Write of {size} bytes at offset {offset} exceeds buffer size {capacity}")]
    WriteOutOfBounds {
        /// Bytes written
        size: u64,
        /// Start offset
        offset: u64,
        /// Buffer size
        capacity: u64,
    },

    /// Descriptor write to a binding the layout does not declare
    #[error("Binding {0} is not declared in the descriptor set layout")]
    UndeclaredBinding(u32),

    /// Descriptor write of the wrong kind
    #[error("Binding {binding} expects {expected}, got {actual}")]
    BindingKindMismatch {
        /// Slot
        binding: u32,
        /// Declared kind
        expected: String,
        /// Written kind
        actual: String,
    },

    /// Descriptor write with the wrong element count
    #[error("Binding {binding} expects {expected} descriptors, got {actual}")]
    BindingCountMismatch {
        /// Slot
        binding: u32,
        /// Declared count
        expected: u32,
        /// Written count
        actual: u32,
    },

    /// Layout declares the same slot twice
    #[error("Binding {0} declared twice")]
    DuplicateBinding(u32),

    /// Descriptor pool ran out of sets or descriptors
    #[error("Descriptor pool exhausted")]
    PoolExhausted,

    /// Scene node key no longer refers to a live node
    #[error("Unknown scene node")]
    UnknownNode,

    /// Pass lifecycle misuse
    #[error("Pass '{pass}' cannot go from {from:?} to {to:?}")]
    InvalidLifecycleTransition {
        /// Pass name
        pass: String,
        /// Current state
        from: crate::render::PassState,
        /// Requested state
        to: crate::render::PassState,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration failed to load or validate
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
