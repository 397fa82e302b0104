//! Math utilities and types
//!
//! All projections here target Vulkan clip space: right-handed view space
//! looking down -Z with +Y up, depth mapped to `0..1`, and clip-space Y
//! pointing down.

pub use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Perspective projection for Vulkan clip space
///
/// `fov_y` is the full vertical field of view in radians.
pub fn perspective_vk(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let focal = 1.0 / (fov_y * 0.5).tan();

    let mut result = Mat4::zeros();
    result[(0, 0)] = focal / aspect;
    result[(1, 1)] = -focal;
    result[(2, 2)] = far / (near - far);
    result[(2, 3)] = (near * far) / (near - far);
    result[(3, 2)] = -1.0;
    result
}

/// Orthographic projection for Vulkan clip space
pub fn orthographic_vk(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let mut result = Mat4::identity();
    result[(0, 0)] = 2.0 / (right - left);
    result[(0, 3)] = -(right + left) / (right - left);
    result[(1, 1)] = -2.0 / (top - bottom);
    result[(1, 3)] = (top + bottom) / (top - bottom);
    result[(2, 2)] = 1.0 / (near - far);
    result[(2, 3)] = near / (near - far);
    result
}

/// Right-handed look-at view matrix
///
/// If `up` is parallel to the viewing direction, +Z is used as up instead
/// (or +Y when the view runs along Z).
pub fn look_at_rh(eye: &Vec3, target: &Vec3, up: &Vec3) -> Mat4 {
    let forward = target - eye;
    if forward.norm_squared() <= f32::EPSILON {
        return Mat4::new_translation(&-eye);
    }

    let forward = forward.normalize();
    let up = if forward.cross(up).norm_squared() <= 1e-6 {
        if forward.cross(&Vec3::z()).norm_squared() <= 1e-6 {
            Vec3::y()
        } else {
            Vec3::z()
        }
    } else {
        *up
    };

    Mat4::look_at_rh(&Point3::from(*eye), &Point3::from(*target), &up)
}

/// Inverse-transpose of the upper 3x3 of `world`, padded to 4x4
///
/// Falls back to the plain upper 3x3 when the matrix is singular.
pub fn normal_matrix(world: &Mat4) -> Mat4 {
    let linear: Mat3 = world.fixed_view::<3, 3>(0, 0).into_owned();
    linear
        .try_inverse()
        .map(|inverse| inverse.transpose())
        .unwrap_or(linear)
        .to_homogeneous()
}

/// Translation column of an affine transform
pub fn translation_of(world: &Mat4) -> Vec3 {
    Vec3::new(world[(0, 3)], world[(1, 3)], world[(2, 3)])
}

/// Local -Z axis of an affine transform in world space, normalized
///
/// Cameras and lights face down their local -Z.
pub fn forward_of(world: &Mat4) -> Vec3 {
    let forward = world.transform_vector(&-Vec3::z());
    if forward.norm_squared() <= f32::EPSILON {
        -Vec3::z()
    } else {
        forward.normalize()
    }
}
