//! Binding allocation
//!
//! - [`allocate_bindings`]: dense slot indices per `(stage, internal)` partition
//! - [`StageBindings`]: slots plus bind group layout entries and WGSL declarations

pub mod allocator;
pub mod builder;

pub use allocator::{BindingKind, BindingSlot, RegistryScopes, ResourceRef, Scope, allocate_bindings};
pub use builder::{BindingBuilder, PARAMS_BINDING, PARAMS_STRUCT, StageBindings};
