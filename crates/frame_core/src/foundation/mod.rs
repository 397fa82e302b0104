//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the crate:
//! - Math types and Vulkan clip-space projections
//! - Logging utilities

pub mod logging;
pub mod math;
