//! Struct layout calculator
//!
//! Parses `struct` declarations out of WGSL text and resolves the byte
//! layout the GPU expects for them:
//! - [`WgslType`]: type tokens and the builtin size/align table
//! - [`compute_layouts`]: per-struct field offsets, padding and total size
//! - [`compute_layouts_for`]: the same, limited to structs reachable from given types

pub mod parser;
pub mod struct_layout;
pub mod wgsl_type;

pub use struct_layout::{HOST_ALIGNMENT, LayoutSet, StructField, StructLayout, compute_layouts, compute_layouts_for};
pub use wgsl_type::{Constants, ScalarKind, TypeLayout, WgslType, parse_int_literal, round_up};
