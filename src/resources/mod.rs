//! 资源声明模块
//!
//! 描述管线需要的资源，不依赖于 GPU 实现：
//! - ResourceDeclaration: uniform / storage / sampler / texture / layer
//! - ResourceRegistry: 按集合保存声明，负责重名检查
//! - uniforms: Params 结构体的编码与解码
//! - Mesh / Vertex: 顶点数据

pub mod data_version;
pub mod declaration;
pub mod mesh;
pub mod registry;
pub mod sampler;
pub mod uniforms;

pub use data_version::{DataGuard, DataVersion};
pub use declaration::{
    Collection, CopyFromFrame, LayerDecl, ResourceDeclaration, SamplerDecl, ShaderStage, StorageDecl,
    TextureData, TextureDecl, TextureKind, UniformDecl,
};
pub use mesh::{Mesh, Vertex, flatten_meshes};
pub use registry::{ResourceHandle, ResourceRegistry};
pub use sampler::{AddressMode, CompareFunction, FilterMode, SamplerDescriptor};
pub use uniforms::{decode_uniforms, encode_uniforms, value_count};
