//! Surface materials and sampled image handles

use crate::foundation::math::Vec4;
use ash::vk;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A GPU image that can be bound as a combined image sampler
///
/// Implemented by decoded textures uploaded by the host. Image identity is
/// the identity of the shared handle, not the pixel contents.
pub trait SampledImage {
    /// Image view in `SHADER_READ_ONLY_OPTIMAL` layout
    fn view(&self) -> vk::ImageView;

    /// Sampler to combine with the view
    fn sampler(&self) -> vk::Sampler;
}

/// Shared handle to a sampled image
pub type ImageHandle = Arc<dyn SampledImage>;

/// Identity key of an image handle
///
/// Two handles compare equal only if they share the same allocation.
pub fn image_identity(image: &ImageHandle) -> usize {
    Arc::as_ptr(image) as *const () as usize
}

/// Face culling mode of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CullMode {
    /// Draw both faces
    None,
    /// Cull front faces
    Front,
    /// Cull back faces
    #[default]
    Back,
}

impl CullMode {
    /// Vulkan cull flags
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Surface material
#[derive(Clone)]
pub struct Material {
    /// Base color, multiplied with the albedo image when present
    pub albedo_color: Vec4,
    /// Optional albedo texture
    pub albedo_image: Option<ImageHandle>,
    /// Optional specular texture
    pub specular_image: Option<ImageHandle>,
    /// Face culling
    pub cull_mode: CullMode,
}

impl Material {
    /// Untextured material of the given color
    pub fn new(albedo_color: Vec4) -> Self {
        Self {
            albedo_color,
            albedo_image: None,
            specular_image: None,
            cull_mode: CullMode::Back,
        }
    }

    /// Set the albedo texture
    pub fn with_albedo_image(mut self, image: ImageHandle) -> Self {
        self.albedo_image = Some(image);
        self
    }

    /// Set the specular texture
    pub fn with_specular_image(mut self, image: ImageHandle) -> Self {
        self.specular_image = Some(image);
        self
    }

    /// Set the cull mode
    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::new(Vec4::new(1.0, 1.0, 1.0, 1.0))
    }
}

impl fmt::Debug for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Material")
            .field("albedo_color", &self.albedo_color)
            .field("albedo_image", &self.albedo_image.as_ref().map(image_identity))
            .field("specular_image", &self.specular_image.as_ref().map(image_identity))
            .field("cull_mode", &self.cull_mode)
            .finish()
    }
}
