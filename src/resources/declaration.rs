//! 资源声明
//!
//! 每个资源都是 [`ResourceDeclaration`] 的一个变体，stage / internal 都是显式字段。
//! 声明本身只描述"要什么"，GPU 对象在 `Orchestrator::init` 时才创建。

use crate::resources::sampler::SamplerDescriptor;
use crate::resources::data_version::DataVersion;

/// Shader stage a resource can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Compute,
    Vertex,
    Fragment,
}

impl ShaderStage {
    #[must_use]
    pub fn visibility(self) -> wgpu::ShaderStages {
        match self {
            Self::Compute => wgpu::ShaderStages::COMPUTE,
            Self::Vertex => wgpu::ShaderStages::VERTEX,
            Self::Fragment => wgpu::ShaderStages::FRAGMENT,
        }
    }

    /// Bind group index used by this stage's declarations.
    ///
    /// Vertex and fragment share one pipeline layout, so the fragment stage
    /// gets its own group.
    #[must_use]
    pub fn group_index(self) -> u32 {
        match self {
            Self::Compute | Self::Vertex => 0,
            Self::Fragment => 1,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
        }
    }
}

/// The collections names are unique within.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Uniforms,
    Storages,
    Samplers,
    Textures,
    Layers,
}

impl Collection {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Uniforms => "uniforms",
            Self::Storages => "storages",
            Self::Samplers => "samplers",
            Self::Textures => "textures",
            Self::Layers => "layers",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Texture2D,
    Texture2DArray,
    /// Re-imported every frame from the latest pushed external frame.
    External,
    /// Write-only storage texture.
    Storage2D,
    /// Written as a storage texture by compute, sampled by fragment.
    BindingPair,
}

/// Requests a copy of the rendered color output into a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyFromFrame {
    /// Pass after which the copy happens. `None` means the last render pass
    /// drawn in the frame, which is also used while the named pass is
    /// disabled, destroyed or has no render stage.
    pub after_pass: Option<usize>,
}

/// Initial texel data of a texture, always RGBA8.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TextureData {
    #[default]
    Empty,
    Image {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
    Layers {
        width: u32,
        height: u32,
        layers: Vec<Vec<u8>>,
    },
}

impl TextureData {
    /// `(width, height, layer count)` when the data defines an extent.
    #[must_use]
    pub fn extent(&self) -> Option<(u32, u32, u32)> {
        match self {
            Self::Empty => None,
            Self::Image { width, height, .. } => Some((*width, *height, 1)),
            Self::Layers { width, height, layers } => Some((*width, *height, layers.len().max(1) as u32)),
        }
    }
}

// ============================================================================
// Declarations
// ============================================================================

/// A value in the synthesized `Params` struct.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformDecl {
    pub name: String,
    pub value: Vec<f32>,
    /// WGSL type of the member, `f32` unless given.
    pub type_name: String,
    pub internal: bool,
}

impl UniformDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, value: f32) -> Self {
        Self::typed(name, "f32", vec![value])
    }

    #[must_use]
    pub fn typed(name: impl Into<String>, type_name: impl Into<String>, value: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            value,
            type_name: type_name.into(),
            internal: false,
        }
    }
}

/// A read/write storage buffer.
#[derive(Debug, Clone)]
pub struct StorageDecl {
    pub name: String,
    /// Struct name, builtin or `array<T, N>`.
    pub type_name: String,
    pub read_back: bool,
    /// Backed by caller data instead of the resolved type size.
    pub mapped: bool,
    pub data: Vec<f32>,
    pub stage: Option<ShaderStage>,
    pub internal: bool,
    pub(crate) version: DataVersion,
}

impl StorageDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            read_back: false,
            mapped: false,
            data: Vec::new(),
            stage: None,
            internal: false,
            version: DataVersion::default(),
        }
    }

    /// Storage filled from caller data, re-uploaded whenever it is replaced.
    #[must_use]
    pub fn mapped(name: impl Into<String>, type_name: impl Into<String>, data: Vec<f32>) -> Self {
        Self {
            mapped: true,
            data,
            ..Self::new(name, type_name)
        }
    }

    #[must_use]
    pub fn read_back(mut self, read_back: bool) -> Self {
        self.read_back = read_back;
        self
    }

    #[must_use]
    pub fn stage(mut self, stage: ShaderStage) -> Self {
        self.stage = Some(stage);
        self
    }

    #[must_use]
    pub fn version(&self) -> DataVersion {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDecl {
    pub name: String,
    pub descriptor: SamplerDescriptor,
    pub stage: Option<ShaderStage>,
    pub internal: bool,
}

impl SamplerDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, descriptor: SamplerDescriptor) -> Self {
        Self {
            name: name.into(),
            descriptor,
            stage: None,
            internal: false,
        }
    }

    #[must_use]
    pub fn stage(mut self, stage: ShaderStage) -> Self {
        self.stage = Some(stage);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDecl {
    pub name: String,
    pub kind: TextureKind,
    pub stage: Option<ShaderStage>,
    pub copy_from_frame: Option<CopyFromFrame>,
    pub data: TextureData,
    pub internal: bool,
}

impl TextureDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: TextureKind) -> Self {
        Self {
            name: name.into(),
            kind,
            stage: None,
            copy_from_frame: None,
            data: TextureData::Empty,
            internal: false,
        }
    }

    #[must_use]
    pub fn image(name: impl Into<String>, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            data: TextureData::Image { width, height, pixels },
            ..Self::new(name, TextureKind::Texture2D)
        }
    }

    #[must_use]
    pub fn array(name: impl Into<String>, width: u32, height: u32, layers: Vec<Vec<u8>>) -> Self {
        Self {
            data: TextureData::Layers { width, height, layers },
            ..Self::new(name, TextureKind::Texture2DArray)
        }
    }

    /// A 2D texture receiving the rendered frame after `after_pass`
    /// (the last render pass when `None`).
    #[must_use]
    pub fn frame_copy(name: impl Into<String>, after_pass: Option<usize>) -> Self {
        Self {
            copy_from_frame: Some(CopyFromFrame { after_pass }),
            ..Self::new(name, TextureKind::Texture2D)
        }
    }

    #[must_use]
    pub fn stage(mut self, stage: ShaderStage) -> Self {
        self.stage = Some(stage);
        self
    }
}

/// A screen-sized `array<vec4<f32>>` storage holding `count` layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDecl {
    pub name: String,
    pub count: u32,
    pub stage: Option<ShaderStage>,
    pub internal: bool,
}

impl LayerDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            count,
            stage: None,
            internal: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ResourceDeclaration {
    Uniform(UniformDecl),
    Storage(StorageDecl),
    Sampler(SamplerDecl),
    Texture(TextureDecl),
    Layer(LayerDecl),
}

impl ResourceDeclaration {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Uniform(d) => &d.name,
            Self::Storage(d) => &d.name,
            Self::Sampler(d) => &d.name,
            Self::Texture(d) => &d.name,
            Self::Layer(d) => &d.name,
        }
    }

    #[must_use]
    pub fn collection(&self) -> Collection {
        match self {
            Self::Uniform(_) => Collection::Uniforms,
            Self::Storage(_) => Collection::Storages,
            Self::Sampler(_) => Collection::Samplers,
            Self::Texture(_) => Collection::Textures,
            Self::Layer(_) => Collection::Layers,
        }
    }

    /// Uniforms are never stage restricted.
    #[must_use]
    pub fn stage(&self) -> Option<ShaderStage> {
        match self {
            Self::Uniform(_) => None,
            Self::Storage(d) => d.stage,
            Self::Sampler(d) => d.stage,
            Self::Texture(d) => d.stage,
            Self::Layer(d) => d.stage,
        }
    }

    #[must_use]
    pub fn internal(&self) -> bool {
        match self {
            Self::Uniform(d) => d.internal,
            Self::Storage(d) => d.internal,
            Self::Sampler(d) => d.internal,
            Self::Texture(d) => d.internal,
            Self::Layer(d) => d.internal,
        }
    }

    pub(crate) fn set_internal(&mut self, internal: bool) {
        match self {
            Self::Uniform(d) => d.internal = internal,
            Self::Storage(d) => d.internal = internal,
            Self::Sampler(d) => d.internal = internal,
            Self::Texture(d) => d.internal = internal,
            Self::Layer(d) => d.internal = internal,
        }
    }
}

impl From<UniformDecl> for ResourceDeclaration {
    fn from(d: UniformDecl) -> Self {
        Self::Uniform(d)
    }
}

impl From<StorageDecl> for ResourceDeclaration {
    fn from(d: StorageDecl) -> Self {
        Self::Storage(d)
    }
}

impl From<SamplerDecl> for ResourceDeclaration {
    fn from(d: SamplerDecl) -> Self {
        Self::Sampler(d)
    }
}

impl From<TextureDecl> for ResourceDeclaration {
    fn from(d: TextureDecl) -> Self {
        Self::Texture(d)
    }
}

impl From<LayerDecl> for ResourceDeclaration {
    fn from(d: LayerDecl) -> Self {
        Self::Layer(d)
    }
}
