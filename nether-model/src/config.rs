//! Loader configuration
//!
//! Settings are plain serde structs so a tool can keep them in a TOML file.
//! Every field has a default, so an empty file (or no file) is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ModelError;

/// Default engine limit on vertices per surface (16-bit index range).
pub const DEFAULT_MAX_VERTICES: usize = 1 << 16;
/// Default engine limit on indices per surface.
pub const DEFAULT_MAX_INDICES: usize = 1 << 20;

/// Top-level loader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LoaderConfig {
    /// Material and texture behavior
    #[serde(default)]
    pub material: MaterialParams,
    /// Engine geometry limits
    #[serde(default)]
    pub limits: GeometryLimits,
}

/// Material parameters applied to every surface and texture of a load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialParams {
    /// Upload textures in sRGB formats (default: false)
    #[serde(default)]
    pub use_srgb_textures: bool,
    /// Anisotropic filtering on legacy diffuse textures (default: false)
    #[serde(default)]
    pub enable_diffuse_aniso: bool,
    /// LOD clamp on legacy emissive (light map) textures (default: true)
    #[serde(default = "default_true")]
    pub enable_emissive_lod_clamp: bool,
    /// Force every surface into the blended pass (default: false)
    #[serde(default)]
    pub transparent: bool,
    /// Render with polygon offset (default: false)
    #[serde(default)]
    pub polygon_offset: bool,
}

/// Per-surface geometry maxima.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryLimits {
    /// Maximum vertices per surface (default: 65536)
    #[serde(default = "default_max_vertices")]
    pub max_vertices: usize,
    /// Maximum indices per surface (default: 1048576)
    #[serde(default = "default_max_indices")]
    pub max_indices: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_vertices() -> usize {
    DEFAULT_MAX_VERTICES
}

fn default_max_indices() -> usize {
    DEFAULT_MAX_INDICES
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            use_srgb_textures: false,
            enable_diffuse_aniso: false,
            enable_emissive_lod_clamp: true,
            transparent: false,
            polygon_offset: false,
        }
    }
}

impl Default for GeometryLimits {
    fn default() -> Self {
        Self {
            max_vertices: DEFAULT_MAX_VERTICES,
            max_indices: DEFAULT_MAX_INDICES,
        }
    }
}

impl LoaderConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ModelError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded loader config");
        Ok(config)
    }
}
