//! Light roles
//!
//! Directional and spot lights shine along the local -Z axis of their node.

use crate::foundation::math::Vec3;

/// Distance attenuation constants: `1 / (constant + linear*d + quadratic*d^2)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attenuation {
    /// Constant term
    pub constant: f32,
    /// Linear term
    pub linear: f32,
    /// Quadratic term
    pub quadratic: f32,
}

impl Default for Attenuation {
    fn default() -> Self {
        Self {
            constant: 1.0,
            linear: 0.09,
            quadratic: 0.032,
        }
    }
}

/// Infinitely distant light
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Light color
    pub color: Vec3,
    /// Color multiplier
    pub intensity: f32,
    /// Specular color
    pub specular: Vec3,
}

impl DirectionalLight {
    /// White light of the given intensity
    pub fn new(color: Vec3, intensity: f32) -> Self {
        Self {
            color,
            intensity,
            specular: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

/// Omnidirectional light
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    /// Light color
    pub color: Vec3,
    /// Color multiplier
    pub intensity: f32,
    /// Specular color
    pub specular: Vec3,
    /// Distance falloff
    pub attenuation: Attenuation,
}

impl PointLight {
    /// Point light with default attenuation
    pub fn new(color: Vec3, intensity: f32) -> Self {
        Self {
            color,
            intensity,
            specular: Vec3::new(1.0, 1.0, 1.0),
            attenuation: Attenuation::default(),
        }
    }
}

/// Cone light
///
/// Angles are half-angles in radians measured from the light direction.
/// Fragments inside `inner_angle` get full intensity, falling off to zero at
/// `outer_angle`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotLight {
    /// Light color
    pub color: Vec3,
    /// Color multiplier
    pub intensity: f32,
    /// Specular color
    pub specular: Vec3,
    /// Distance falloff
    pub attenuation: Attenuation,
    /// Full-intensity half-angle
    pub inner_angle: f32,
    /// Cutoff half-angle
    pub outer_angle: f32,
}

impl SpotLight {
    /// Spot light with cone half-angles in degrees
    pub fn new(color: Vec3, intensity: f32, inner_degrees: f32, outer_degrees: f32) -> Self {
        let outer = outer_degrees.max(inner_degrees).to_radians();
        Self {
            color,
            intensity,
            specular: Vec3::new(1.0, 1.0, 1.0),
            attenuation: Attenuation::default(),
            inner_angle: inner_degrees.to_radians(),
            outer_angle: outer,
        }
    }

    /// Cosine of the inner cone angle
    pub fn cos_inner(&self) -> f32 {
        self.inner_angle.cos()
    }

    /// Cosine of the outer cone angle
    pub fn cos_outer(&self) -> f32 {
        self.outer_angle.cos()
    }
}

/// Ambient environment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Environment {
    /// Ambient color
    pub ambient_color: Vec3,
    /// Ambient multiplier
    pub ambient_intensity: f32,
}

impl Environment {
    /// Premultiplied ambient term
    pub fn ambient(&self) -> Vec3 {
        self.ambient_color * self.ambient_intensity
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            ambient_color: Vec3::new(1.0, 1.0, 1.0),
            ambient_intensity: 0.05,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_spot_cone_cosines_are_ordered() {
        let spot = SpotLight::new(Vec3::new(1.0, 1.0, 1.0), 1.0, 20.0, 30.0);
        assert!(spot.cos_inner() > spot.cos_outer());
        assert_relative_eq!(spot.cos_outer(), 30f32.to_radians().cos());
    }

    #[test]
    fn test_spot_outer_never_smaller_than_inner() {
        let spot = SpotLight::new(Vec3::new(1.0, 1.0, 1.0), 1.0, 40.0, 10.0);
        assert_relative_eq!(spot.outer_angle, spot.inner_angle);
    }
}
