//! Perspective camera

use crate::foundation::math::{perspective_vk, Mat4};

/// Perspective camera parameters
///
/// The camera looks down the local -Z axis of its node's world transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Near clipping plane
    pub near: f32,
    /// Far clipping plane
    pub far: f32,
}

impl Camera {
    /// Create a perspective camera from a vertical FOV in degrees
    pub fn perspective(fov_y_degrees: f32, near: f32, far: f32) -> Self {
        Self {
            fov_y: fov_y_degrees.to_radians(),
            near,
            far,
        }
    }

    /// Projection matrix for the given aspect ratio
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let aspect = if aspect.is_finite() && aspect > 0.0 { aspect } else { 1.0 };
        perspective_vk(self.fov_y, aspect, self.near, self.far)
    }

    /// View matrix for a camera placed at `world`
    pub fn view(world: &Mat4) -> Mat4 {
        world.try_inverse().unwrap_or_else(Mat4::identity)
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::perspective(45.0, 0.1, 100.0)
    }
}
