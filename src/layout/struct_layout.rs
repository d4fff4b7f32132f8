//! Struct layout resolution.
//!
//! [`compute_layouts`] is a pure function of the shader text: it strips
//! comments, walks every `struct` block in declaration order and resolves
//! offsets, padding and total size with the host-shareable layout rules.
//!
//! Structs must be declared before use. A reference to a struct that only
//! appears later in the text is reported as
//! [`WeaveError::ForwardStructReference`] instead of being guessed.
//!
//! [`compute_layouts_for`] resolves only the structs reachable from a set of
//! root types, so stage-local structs that never touch a buffer (vertex
//! outputs, private helpers) cannot fail initialization.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::{Result, WeaveError};
use crate::layout::parser::{RawStruct, find_constants, find_structs, split_fields, strip_comments};
use crate::layout::wgsl_type::{Constants, TypeLayout, WgslType, round_up};

/// Host-exposed alignment unit: every `total_bytes` is a multiple of it.
pub const HOST_ALIGNMENT: u32 = 16;

/// A resolved struct member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    pub type_token: String,
    pub ty: WgslType,
    /// Byte offset from the start of the struct.
    pub offset: u32,
    pub byte_size: u32,
    pub align: u32,
}

/// Resolved layout of one named struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub name: String,
    pub fields: Vec<StructField>,
    pub max_align: u32,
    /// Padding in 4-byte words, keyed by the field *after which* it is inserted.
    pub padding_by_field: FxHashMap<String, u32>,
    /// Words appended after the last field to reach `total_bytes`.
    pub trailing_padding: u32,
    /// Natural WGSL size (`roundUp(max_align, end)`), used when this struct is
    /// nested in another struct or an array.
    pub size: u32,
    /// Size of a host buffer holding this struct, multiple of 16.
    pub total_bytes: u32,
}

impl StructLayout {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Padding words inserted after `field_name` (0 when none).
    #[must_use]
    pub fn padding_after(&self, field_name: &str) -> u32 {
        self.padding_by_field.get(field_name).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn type_layout(&self) -> TypeLayout {
        TypeLayout { size: self.size, align: self.max_align }
    }
}

/// All struct layouts resolved from one body of shader text.
#[derive(Debug, Clone, Default)]
pub struct LayoutSet {
    layouts: FxHashMap<String, StructLayout>,
    order: Vec<String>,
    constants: Constants,
}

impl LayoutSet {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StructLayout> {
        self.layouts.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.layouts.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Layouts in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &StructLayout> {
        self.order.iter().filter_map(|name| self.layouts.get(name))
    }

    /// Integer constants found in the source text.
    #[must_use]
    pub fn constants(&self) -> &Constants {
        &self.constants
    }

    /// Parses a type token, resolving named array lengths.
    pub fn parse_type(&self, type_token: &str) -> Result<WgslType> {
        WgslType::parse_with(type_token, &self.constants)
    }

    /// Resolves any type token against the structs in this set.
    ///
    /// Returns `Ok(None)` when the token names a struct that is not declared.
    pub fn resolve(&self, type_token: &str) -> Result<Option<TypeLayout>> {
        let ty = self.parse_type(type_token)?;
        Ok(ty.layout_with(&|name| self.get(name).map(StructLayout::type_layout)))
    }

    fn insert(&mut self, layout: StructLayout) {
        self.order.push(layout.name.clone());
        self.layouts.insert(layout.name.clone(), layout);
    }
}

/// Computes the layout of every struct declared in `source`.
///
/// Duplicate declarations of the same name (the same helper struct injected
/// into several stages) keep the first definition.
pub fn compute_layouts(source: &str) -> Result<LayoutSet> {
    resolve_structs(source, None)
}

/// Computes the layouts of the structs reachable from `roots` (type tokens
/// such as `Params` or `array<Particle, 64>`). Other structs in `source` are
/// never resolved and cannot fail.
pub fn compute_layouts_for(source: &str, roots: &[&str]) -> Result<LayoutSet> {
    resolve_structs(source, Some(roots))
}

fn resolve_structs(source: &str, roots: Option<&[&str]>) -> Result<LayoutSet> {
    let source = strip_comments(source);
    let raw_structs = find_structs(&source)?;
    let constants = find_constants(&source);
    let declared: FxHashSet<&str> = raw_structs.iter().map(|s| s.name.as_str()).collect();
    let reachable = match roots {
        Some(roots) => Some(reachable_structs(&raw_structs, roots, &constants)?),
        None => None,
    };

    let mut set = LayoutSet {
        constants,
        ..LayoutSet::default()
    };
    for raw in &raw_structs {
        if reachable.as_ref().is_some_and(|r| !r.contains(raw.name.as_str())) {
            continue;
        }
        if set.contains(&raw.name) {
            log::trace!("Skipping repeated declaration of struct '{}'", raw.name);
            continue;
        }
        let layout = resolve_struct(&raw.name, &raw.body, &set, &declared)?;
        set.insert(layout);
    }
    Ok(set)
}

/// Names of the structs `roots` depend on, directly or through members.
fn reachable_structs<'a>(
    raw_structs: &'a [RawStruct],
    roots: &[&str],
    constants: &Constants,
) -> Result<FxHashSet<&'a str>> {
    let mut first: FxHashMap<&str, &RawStruct> = FxHashMap::default();
    for raw in raw_structs {
        first.entry(raw.name.as_str()).or_insert(raw);
    }

    let mut stack = Vec::new();
    for root in roots {
        if let Some(dep) = WgslType::parse_with(root, constants)?.struct_dependency() {
            stack.push(dep.to_string());
        }
    }

    let mut reachable = FxHashSet::default();
    while let Some(name) = stack.pop() {
        let Some((&key, raw)) = first.get_key_value(name.as_str()) else {
            continue;
        };
        if !reachable.insert(key) {
            continue;
        }
        for field in split_fields(&raw.name, &raw.body)? {
            if let Some(dep) = WgslType::parse_with(&field.type_token, constants)?.struct_dependency() {
                stack.push(dep.to_string());
            }
        }
    }
    Ok(reachable)
}

fn resolve_struct(
    name: &str,
    body: &str,
    resolved: &LayoutSet,
    declared: &FxHashSet<&str>,
) -> Result<StructLayout> {
    let raw_fields = split_fields(name, body)?;
    if raw_fields.is_empty() {
        return Err(WeaveError::MalformedStruct {
            struct_name: name.to_string(),
            reason: "struct has no members".to_string(),
        });
    }

    // Resolve every member type first.
    let mut members = Vec::with_capacity(raw_fields.len());
    for (index, raw) in raw_fields.iter().enumerate() {
        let ty = resolved.parse_type(&raw.type_token)?;
        if ty.is_runtime_sized() && index + 1 != raw_fields.len() {
            return Err(WeaveError::MalformedStruct {
                struct_name: name.to_string(),
                reason: format!("runtime-sized array '{}' must be the last member", raw.name),
            });
        }

        let natural = ty
            .layout_with(&|dep| resolved.get(dep).map(StructLayout::type_layout))
            .ok_or_else(|| unresolved(name, &ty, &raw.type_token, declared))?;

        let align = raw.align.unwrap_or(natural.align).max(natural.align);
        let byte_size = raw.size.unwrap_or(natural.size).max(natural.size);
        members.push((raw, ty, byte_size, align));
    }

    let max_align = members.iter().map(|m| m.3).max().unwrap_or(4);

    // Walk members accumulating the byte counter.
    let mut fields: Vec<StructField> = Vec::with_capacity(members.len());
    let mut padding_by_field = FxHashMap::default();
    let mut cursor = 0u32;
    for (raw, ty, byte_size, align) in members {
        let offset = round_up(cursor, align);
        let padding = offset - cursor;
        if padding > 0
            && let Some(previous) = fields.last()
        {
            padding_by_field.insert(previous.name.clone(), padding / 4);
        }

        fields.push(StructField {
            name: raw.name.clone(),
            type_token: raw.type_token.clone(),
            ty,
            offset,
            byte_size,
            align,
        });
        cursor = offset + byte_size;
    }

    let size = round_up(cursor, max_align);
    let total_bytes = round_up(size, HOST_ALIGNMENT.max(max_align));

    Ok(StructLayout {
        name: name.to_string(),
        fields,
        max_align,
        padding_by_field,
        trailing_padding: (total_bytes - cursor) / 4,
        size,
        total_bytes,
    })
}

fn unresolved(struct_name: &str, ty: &WgslType, token: &str, declared: &FxHashSet<&str>) -> WeaveError {
    match ty.struct_dependency() {
        Some(dep) if declared.contains(dep) => WeaveError::ForwardStructReference {
            struct_name: struct_name.to_string(),
            referenced: dep.to_string(),
        },
        _ => WeaveError::UnknownType {
            struct_name: struct_name.to_string(),
            type_token: token.to_string(),
        },
    }
}
