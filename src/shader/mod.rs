//! Shader assembly
//!
//! - [`ShaderAssembler`]: injects params, bindings and helpers into pass sources
//! - [`chunks`]: embedded helper WGSL templates

pub mod assembler;
pub mod chunks;

pub use assembler::{CompiledPass, CompiledStage, ShaderAssembler};
pub use chunks::{EVENT_PAYLOAD, EVENT_STRUCT, FRAGMENT_STRUCT};
