//! Orchestrator Settings
//!
//! Consumed once by [`Orchestrator::init`](crate::Orchestrator::init) and by
//! the wgpu backend when it creates the device and surface.
//!
//! ```rust,ignore
//! use weave::OrchestratorSettings;
//!
//! let settings = OrchestratorSettings {
//!     vsync: false,
//!     clear_color: [0.1, 0.1, 0.1, 1.0],
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    LowPower,
    #[default]
    HighPerformance,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(p: PowerPreference) -> Self {
        match p {
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DepthFormat {
    #[default]
    Depth24Plus,
    Depth32Float,
    Depth24PlusStencil8,
}

impl From<DepthFormat> for wgpu::TextureFormat {
    fn from(f: DepthFormat) -> Self {
        match f {
            DepthFormat::Depth24Plus => wgpu::TextureFormat::Depth24Plus,
            DepthFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            DepthFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        }
    }
}

/// Format of write-only storage textures and binding texture pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageFormat {
    #[default]
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
}

impl StorageFormat {
    #[must_use]
    pub fn wgsl_name(self) -> &'static str {
        match self {
            Self::Rgba8Unorm => "rgba8unorm",
            Self::Rgba16Float => "rgba16float",
            Self::Rgba32Float => "rgba32float",
        }
    }
}

impl From<StorageFormat> for wgpu::TextureFormat {
    fn from(f: StorageFormat) -> Self {
        match f {
            StorageFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            StorageFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            StorageFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        }
    }
}

/// Global configuration for the orchestrator and its GPU backend.
///
/// | Field               | Description                              | Default            |
/// |---------------------|------------------------------------------|--------------------|
/// | `power_preference`  | GPU adapter selection strategy           | `HighPerformance`  |
/// | `vsync`             | Vertical sync enabled                    | `true`             |
/// | `depth_format`      | Depth attachment format                  | `Depth24Plus`      |
/// | `storage_format`    | Storage / binding texture format         | `Rgba8Unorm`       |
/// | `clear_color`       | Default clear color of render passes     | Black (0,0,0,1)    |
/// | `default_size`      | Surface size used before the first resize| 800 x 600          |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub power_preference: PowerPreference,
    pub vsync: bool,
    pub depth_format: DepthFormat,
    pub storage_format: StorageFormat,
    pub clear_color: [f64; 4],
    pub default_size: (u32, u32),
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            power_preference: PowerPreference::HighPerformance,
            vsync: true,
            depth_format: DepthFormat::Depth24Plus,
            storage_format: StorageFormat::Rgba8Unorm,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            default_size: (800, 600),
        }
    }
}

impl OrchestratorSettings {
    #[must_use]
    pub fn wgpu_clear_color(&self) -> wgpu::Color {
        let [r, g, b, a] = self.clear_color;
        wgpu::Color { r, g, b, a }
    }
}
