//! # Renderer Configuration
//!
//! Everything the frame core reads from configuration: frames in flight,
//! shader location, shadow-map parameters, the optional depth pre-pass,
//! the post-processing chain and tone-mapping constants.

use super::{Config, ConfigError};
use ash::vk;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest supported number of frames in flight
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// # Shader Configuration
///
/// Shaders are pre-compiled SPIR-V files found by pass name and stage:
/// `<directory>/<name>.<stage><suffix>`, e.g. `target/shaders/scene.frag.spv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Directory holding the compiled shaders
    pub directory: String,
    /// Fixed filename suffix appended after the stage name
    pub suffix: String,
}

impl ShaderConfig {
    /// Create a shader configuration for an explicit directory
    pub fn new(directory: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            suffix: ".spv".to_string(),
        }
    }

    /// Create shader config with automatic directory resolution
    ///
    /// Tries the usual build output locations so binaries work when run from
    /// the workspace root or from a member directory.
    pub fn with_path_resolution() -> Self {
        let shader_dirs = ["target/shaders", "../target/shaders", "../../target/shaders", "shaders"];

        let directory = shader_dirs
            .iter()
            .find(|dir| Path::new(dir).is_dir())
            .copied()
            .unwrap_or("target/shaders");

        Self::new(directory)
    }

    /// Full path of a shader for `name` and `stage` ("vert", "frag")
    pub fn shader_path(&self, name: &str, stage: &str) -> PathBuf {
        Path::new(&self.directory).join(format!("{}.{}{}", name, stage, self.suffix))
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::new("target/shaders")
    }
}

/// Color format of the intermediate HDR targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HdrFormat {
    /// 16-bit float per channel
    Rgba16Float,
    /// 32-bit float per channel
    Rgba32Float,
}

impl HdrFormat {
    /// Vulkan format for this choice
    pub fn to_vk(self) -> vk::Format {
        match self {
            HdrFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
            HdrFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        }
    }
}

/// Preferred swapchain present mode; FIFO is the fallback when unsupported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresentModePreference {
    /// Vsync, always available
    Fifo,
    /// Low-latency triple buffering
    Mailbox,
    /// No vsync
    Immediate,
}

impl PresentModePreference {
    /// Vulkan present mode for this choice
    pub fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
            PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

/// Shadow-map pass parameters
///
/// The depth range is kept tight around the expected scene bounds; widening
/// `far` costs depth precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Square shadow-map resolution in texels
    pub resolution: u32,
    /// Light-space near plane
    pub near: f32,
    /// Light-space far plane
    pub far: f32,
    /// Half width/height of the orthographic volume for directional lights
    pub ortho_half_extent: f32,
    /// Distance from the scene center at which a directional light is placed
    pub light_distance: f32,
    /// Constant depth bias factor
    pub depth_bias_constant: f32,
    /// Slope-scaled depth bias factor
    pub depth_bias_slope: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            resolution: 2048,
            near: 1.0,
            far: 50.0,
            ortho_half_extent: 20.0,
            light_distance: 25.0,
            depth_bias_constant: 1.25,
            depth_bias_slope: 1.75,
        }
    }
}

/// Tone-mapping constants applied by the final pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneMapConfig {
    /// Exposure multiplier applied before the curve
    pub exposure: f32,
    /// Output gamma
    pub gamma: f32,
}

impl Default for ToneMapConfig {
    fn default() -> Self {
        Self {
            exposure: 1.0,
            gamma: 2.2,
        }
    }
}

/// One full-screen post-processing stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostEffectConfig {
    /// Stage name, used in logs
    pub name: String,
    /// Fragment shader name (resolved through [`ShaderConfig`])
    pub fragment_shader: String,
}

impl PostEffectConfig {
    /// Create a post effect whose shader shares its name
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            fragment_shader: name.clone(),
            name,
        }
    }
}

/// # Renderer Configuration
///
/// Top-level configuration for [`crate::render::FrameRenderer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Number of frame slots recorded ahead of the GPU
    pub frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Clear color of the HDR scene target and of an empty frame
    pub clear_color: [f32; 4],
    /// Shader lookup
    pub shaders: ShaderConfig,
    /// Intermediate color format
    pub hdr_format: HdrFormat,
    /// Swapchain present mode preference
    pub present_mode: PresentModePreference,
    /// Shadow-map parameters
    pub shadow: ShadowConfig,
    /// Run the depth-only pre-pass before the main pass
    pub enable_depth_prepass: bool,
    /// Post-processing chain, applied in order
    pub post_effects: Vec<PostEffectConfig>,
    /// Tone-mapping constants
    pub tone_map: ToneMapConfig,
}

impl RendererConfig {
    /// Create a configuration with defaults and the given application name
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Set frames in flight
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set shader configuration
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Enable or disable the depth pre-pass
    pub fn with_depth_prepass(mut self, enabled: bool) -> Self {
        self.enable_depth_prepass = enabled;
        self
    }

    /// Append a post-processing stage
    pub fn with_post_effect(mut self, effect: PostEffectConfig) -> Self {
        self.post_effects.push(effect);
        self
    }

    /// Enable or disable Vulkan validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Effective validation setting
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("application name cannot be empty".to_string()));
        }

        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(ConfigError::Invalid(format!(
                "frames in flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }

        if self.shaders.directory.is_empty() {
            return Err(ConfigError::Invalid("shader directory cannot be empty".to_string()));
        }

        let shadow = &self.shadow;
        if shadow.resolution == 0 || shadow.resolution > 8192 {
            return Err(ConfigError::Invalid(format!(
                "shadow resolution must be in 1..=8192, got {}",
                shadow.resolution
            )));
        }
        if !(shadow.near > 0.0 && shadow.far > shadow.near) {
            return Err(ConfigError::Invalid(format!(
                "shadow depth range must satisfy 0 < near < far, got {}..{}",
                shadow.near, shadow.far
            )));
        }
        if shadow.ortho_half_extent <= 0.0 {
            return Err(ConfigError::Invalid("shadow orthographic extent must be positive".to_string()));
        }

        if self.tone_map.exposure <= 0.0 || self.tone_map.gamma <= 0.0 {
            return Err(ConfigError::Invalid("exposure and gamma must be positive".to_string()));
        }

        for (i, effect) in self.post_effects.iter().enumerate() {
            if effect.name.is_empty() || effect.fragment_shader.is_empty() {
                return Err(ConfigError::Invalid(format!("post effect #{} needs a name and a shader", i)));
            }
            if self.post_effects[..i].iter().any(|other| other.name == effect.name) {
                return Err(ConfigError::Invalid(format!("duplicate post effect '{}'", effect.name)));
            }
        }

        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "Frame Core Application".to_string(),
            frames_in_flight: 2,
            enable_validation: None,
            clear_color: [0.005, 0.005, 0.005, 1.0],
            shaders: ShaderConfig::default(),
            hdr_format: HdrFormat::Rgba16Float,
            present_mode: PresentModePreference::Fifo,
            shadow: ShadowConfig::default(),
            enable_depth_prepass: false,
            post_effects: Vec::new(),
            tone_map: ToneMapConfig::default(),
        }
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RendererConfig::default().validate().is_ok());
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        assert!(RendererConfig::default().with_frames_in_flight(0).validate().is_err());
        assert!(RendererConfig::default().with_frames_in_flight(3).validate().is_ok());
        assert!(RendererConfig::default().with_frames_in_flight(4).validate().is_err());
    }

    #[test]
    fn test_shadow_range_rejected_when_inverted() {
        let mut config = RendererConfig::default();
        config.shadow.near = 10.0;
        config.shadow.far = 5.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_duplicate_post_effects_rejected() {
        let config = RendererConfig::default()
            .with_post_effect(PostEffectConfig::named("vignette"))
            .with_post_effect(PostEffectConfig::named("vignette"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shader_path_convention() {
        let shaders = ShaderConfig::new("out/shaders");
        assert_eq!(
            shaders.shader_path("scene", "frag"),
            Path::new("out/shaders").join("scene.frag.spv")
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let text = r#"
            application_name = "demo"
            frames_in_flight = 3
            enable_depth_prepass = true

            [tone_map]
            exposure = 1.5
        "#;
        let config = RendererConfig::from_str_with_format(text, "renderer.toml").unwrap();
        assert_eq!(config.application_name, "demo");
        assert_eq!(config.frames_in_flight, 3);
        assert!(config.enable_depth_prepass);
        assert_eq!(config.tone_map.exposure, 1.5);
        assert_eq!(config.tone_map.gamma, 2.2);
        assert_eq!(config.shadow, ShadowConfig::default());
    }

    #[test]
    fn test_ron_round_trip_of_post_chain() {
        let config = RendererConfig::new("ron demo").with_post_effect(PostEffectConfig::named("bloom"));
        let text = ron::ser::to_string_pretty(&config, Default::default()).unwrap();
        let parsed = RendererConfig::from_str_with_format(&text, "renderer.ron").unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let result = RendererConfig::from_str_with_format("", "renderer.json");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }
}
