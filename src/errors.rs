//! Error Types
//!
//! This module defines the error types used throughout the crate.
//!
//! # Overview
//!
//! The main error type [`WeaveError`] covers every failure mode:
//! - GPU backend availability (adapter / device / surface)
//! - Declaration mistakes (duplicate names, bad struct references)
//! - Struct layout resolution
//! - Runtime misuse of the orchestrator
//!
//! Declaration and layout errors indicate a programming mistake and abort
//! initialization. Backend availability errors are recoverable, see
//! [`WeaveError::is_backend_unavailable`].
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, WeaveError>`.

use thiserror::Error;

/// The main error type for the crate.
#[derive(Error, Debug)]
pub enum WeaveError {
    // ========================================================================
    // GPU Backend Errors
    // ========================================================================
    /// No compatible GPU adapter could be found.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// The adapter refused to create a device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(String),

    /// Window or surface plumbing failed.
    #[error("Surface error: {0}")]
    Surface(String),

    // ========================================================================
    // Declaration Errors
    // ========================================================================
    /// A resource name was declared twice in the same collection.
    #[error("Resource '{name}' is already declared in {collection}")]
    DuplicateName {
        /// Collection the name collided in
        collection: &'static str,
        /// The duplicated name
        name: String,
    },

    /// A storage resource references a struct that no compiled shader declares.
    #[error("Storage '{resource}' references struct '{struct_name}' which is not declared in any shader")]
    UndeclaredStruct {
        /// Name of the storage resource
        resource: String,
        /// The missing struct name
        struct_name: String,
    },

    /// Uniforms cannot be arrays.
    #[error("Uniform '{name}' cannot use array type '{type_name}'")]
    UnsupportedArrayUniform {
        /// Uniform name
        name: String,
        /// Declared type
        type_name: String,
    },

    /// A binding texture pair needs at least one pass with a compute stage.
    #[error("Binding texture '{0}' requires at least one pass with a compute shader")]
    ComputeShaderRequired(String),

    /// A resource name did not resolve to a declared resource.
    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    /// A value list did not match the size of the declared type.
    #[error("Resource '{name}' expects {expected} values, got {actual}")]
    ValueCountMismatch {
        /// Resource name
        name: String,
        /// Number of scalar values the type holds
        expected: usize,
        /// Number of values supplied
        actual: usize,
    },

    // ========================================================================
    // Layout Errors
    // ========================================================================
    /// `array<T, 0>` is never valid.
    #[error("Explicit array length required in '{0}'")]
    ZeroLengthArray(String),

    /// A type token did not resolve to a builtin or a declared struct.
    #[error("Unknown type '{type_token}' in struct '{struct_name}'")]
    UnknownType {
        /// Struct being resolved
        struct_name: String,
        /// The unresolved token
        type_token: String,
    },

    /// A struct used another struct that is only declared later in the text.
    #[error("Struct '{struct_name}' references '{referenced}' before it is declared")]
    ForwardStructReference {
        /// Struct being resolved
        struct_name: String,
        /// Struct declared too late
        referenced: String,
    },

    /// The struct text could not be split into fields.
    #[error("Malformed struct '{struct_name}': {reason}")]
    MalformedStruct {
        /// Struct name
        struct_name: String,
        /// What went wrong
        reason: String,
    },

    // ========================================================================
    // Shader Errors
    // ========================================================================
    /// A helper chunk failed to load or render.
    #[error("Shader template error: {0}")]
    ShaderTemplate(#[from] minijinja::Error),

    // ========================================================================
    // Runtime Errors
    // ========================================================================
    /// An operation was called in the wrong lifecycle state.
    #[error("Invalid orchestrator state: expected {expected}, found {actual}")]
    InvalidState {
        /// Required state
        expected: &'static str,
        /// Current state
        actual: &'static str,
    },

    /// A pass index was out of range.
    #[error("Pass index out of bounds: {0}")]
    PassIndexOutOfBounds(usize),

    /// Bind group resources did not match the layout they were built against.
    #[error("Bind group mismatch: {0}")]
    BindGroupMismatch(String),

    /// Mapping a read-back buffer failed.
    #[error("Buffer read-back failed: {0}")]
    Readback(String),
}

impl WeaveError {
    /// Returns `true` for failures the host can recover from by falling back,
    /// as opposed to programming mistakes.
    #[must_use]
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(
            self,
            Self::AdapterRequestFailed(_) | Self::DeviceCreateFailed(_) | Self::Surface(_)
        )
    }
}

// ============================================================================
// Convenient conversion implementations
// ============================================================================

impl From<wgpu::RequestDeviceError> for WeaveError {
    fn from(err: wgpu::RequestDeviceError) -> Self {
        WeaveError::DeviceCreateFailed(err.to_string())
    }
}

impl From<wgpu::CreateSurfaceError> for WeaveError {
    fn from(err: wgpu::CreateSurfaceError) -> Self {
        WeaveError::Surface(err.to_string())
    }
}

/// Alias for `Result<T, WeaveError>`.
pub type Result<T> = std::result::Result<T, WeaveError>;
