#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod backend;
pub mod binding;
pub mod errors;
pub mod layout;
pub mod orchestrator;
pub mod pass;
pub mod resources;
pub mod settings;
pub mod shader;

pub use backend::{GpuBackend, GpuCommand, RecordingBackend, WgpuBackend};
pub use binding::{BindingSlot, RegistryScopes, StageBindings, allocate_bindings};
pub use errors::{Result, WeaveError};
pub use layout::{LayoutSet, StructLayout, compute_layouts};
pub use orchestrator::{FrameState, Orchestrator, OrchestratorState};
pub use pass::{LoadMode, Pass, RenderOptions};
pub use resources::{
    CopyFromFrame, LayerDecl, Mesh, ResourceDeclaration, ResourceHandle, ResourceRegistry, SamplerDecl,
    SamplerDescriptor, ShaderStage, StorageDecl, TextureData, TextureDecl, TextureKind, UniformDecl, Vertex,
    decode_uniforms, encode_uniforms,
};
pub use settings::OrchestratorSettings;
pub use shader::{CompiledPass, ShaderAssembler};
