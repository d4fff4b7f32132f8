//! WGSL type tokens and their host-shareable size / alignment.
//!
//! | Type            | Size          | Align          |
//! |-----------------|---------------|----------------|
//! | `f32/i32/u32`   | 4             | 4              |
//! | `bool`          | 4             | 4              |
//! | `vec2<T>`       | 8             | 8              |
//! | `vec3<T>`       | 12            | 16             |
//! | `vec4<T>`       | 16            | 16             |
//! | `matCxR<f32>`   | C * align(vecR) | align(vecR)  |
//! | `array<E, N>`   | N * stride(E) | align(E)       |
//!
//! `stride(E)` is `size(E)` rounded up to `align(E)`. Array lengths may be
//! integer literals or names of module-scope `const` declarations.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::errors::{Result, WeaveError};

/// Module-scope integer constants usable as array lengths.
pub type Constants = FxHashMap<String, u32>;

/// Parses an integer literal: `4`, `4u`, `4i`, `0x10u`.
#[must_use]
pub fn parse_int_literal(text: &str) -> Option<u32> {
    let digits = text.trim().trim_end_matches(['u', 'i']);
    match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => digits.parse().ok(),
    }
}

/// Rounds `value` up to the next multiple of `align`.
#[inline]
#[must_use]
pub const fn round_up(value: u32, align: u32) -> u32 {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    F32,
    I32,
    U32,
    /// Not host-shareable, but laid out like a 32-bit word in inter-stage structs.
    Bool,
}

impl ScalarKind {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "f32" => Some(Self::F32),
            "i32" => Some(Self::I32),
            "u32" => Some(Self::U32),
            "bool" => Some(Self::Bool),
            _ => None,
        }
    }

    /// Suffix used by the shorthand aliases (`vec3f`, `vec2u`).
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "f" => Some(Self::F32),
            "i" => Some(Self::I32),
            "u" => Some(Self::U32),
            _ => None,
        }
    }

    #[must_use]
    pub fn wgsl_name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::Bool => "bool",
        }
    }
}

/// Size and alignment of a resolved type, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeLayout {
    pub size: u32,
    pub align: u32,
}

impl TypeLayout {
    /// Distance between consecutive array elements of this type.
    #[inline]
    #[must_use]
    pub fn stride(&self) -> u32 {
        round_up(self.size, self.align)
    }
}

/// A parsed WGSL type token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WgslType {
    Scalar(ScalarKind),
    Vector { scalar: ScalarKind, len: u32 },
    Matrix { columns: u32, rows: u32 },
    Atomic(ScalarKind),
    /// `count == None` is a runtime-sized array.
    Array { element: Box<WgslType>, count: Option<u32> },
    Struct(String),
}

impl WgslType {
    /// Parses a type token such as `vec3<f32>`, `vec4f`, `mat4x4f` or
    /// `array<Particle, 64>`. Unknown identifiers become [`WgslType::Struct`].
    pub fn parse(token: &str) -> Result<Self> {
        Self::parse_with(token, &Constants::default())
    }

    /// Like [`WgslType::parse`], resolving named array lengths through `constants`.
    pub fn parse_with(token: &str, constants: &Constants) -> Result<Self> {
        let token = token.trim();

        if let Some(scalar) = ScalarKind::parse(token) {
            return Ok(Self::Scalar(scalar));
        }

        if let Some((head, args)) = split_generic(token) {
            return match head {
                "vec2" | "vec3" | "vec4" => {
                    let scalar = ScalarKind::parse(args.trim())
                        .ok_or_else(|| malformed(token, "vector of non 32-bit scalar"))?;
                    Ok(Self::Vector { scalar, len: vector_len(head) })
                }
                "atomic" => match ScalarKind::parse(args.trim()) {
                    Some(scalar @ (ScalarKind::I32 | ScalarKind::U32)) => Ok(Self::Atomic(scalar)),
                    _ => Err(malformed(token, "atomic of unsupported scalar")),
                },
                "array" => Self::parse_array(token, args, constants),
                _ if head.starts_with("mat") => {
                    if args.trim() != "f32" {
                        return Err(malformed(token, "only f32 matrices are host-shareable"));
                    }
                    let (columns, rows) = matrix_dims(head).ok_or_else(|| malformed(token, "bad matrix shape"))?;
                    Ok(Self::Matrix { columns, rows })
                }
                _ => Err(malformed(token, "unsupported generic type")),
            };
        }

        // Shorthand aliases: vec3f, vec2u, mat4x4f ...
        if let Some(rest) = token.strip_prefix("vec")
            && rest.len() == 2
        {
            let (len, suffix) = rest.split_at(1);
            if let (Ok(len @ 2..=4), Some(scalar)) = (len.parse::<u32>(), ScalarKind::from_suffix(suffix)) {
                return Ok(Self::Vector { scalar, len });
            }
        }
        if let Some(shape) = token.strip_suffix('f')
            && let Some((columns, rows)) = matrix_dims(shape)
        {
            return Ok(Self::Matrix { columns, rows });
        }

        if !token.is_empty() && token.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Ok(Self::Struct(token.to_string()));
        }

        Err(malformed(token, "not a type"))
    }

    fn parse_array(token: &str, args: &str, constants: &Constants) -> Result<Self> {
        let (element, count) = match split_top_level_comma(args) {
            Some((element, count)) => (element, Some(count.trim())),
            None => (args, None),
        };
        let element = Box::new(Self::parse_with(element, constants)?);
        let count = match count {
            None | Some("") => None,
            Some(count) => {
                let count = parse_int_literal(count)
                    .or_else(|| constants.get(count).copied())
                    .ok_or_else(|| malformed(token, "array length must be a literal or a known constant"))?;
                if count == 0 {
                    return Err(WeaveError::ZeroLengthArray(token.to_string()));
                }
                Some(count)
            }
        };
        Ok(Self::Array { element, count })
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array { .. })
    }

    #[must_use]
    pub fn is_runtime_sized(&self) -> bool {
        matches!(self, Self::Array { count: None, .. })
    }

    /// Name of the struct this type depends on, looking through arrays.
    #[must_use]
    pub fn struct_dependency(&self) -> Option<&str> {
        match self {
            Self::Struct(name) => Some(name),
            Self::Array { element, .. } => element.struct_dependency(),
            _ => None,
        }
    }

    /// Size and alignment of builtin types. Struct types are resolved through
    /// `lookup`, which returns `None` for undeclared structs.
    pub fn layout_with<F>(&self, lookup: &F) -> Option<TypeLayout>
    where
        F: Fn(&str) -> Option<TypeLayout>,
    {
        let layout = match self {
            Self::Scalar(_) | Self::Atomic(_) => TypeLayout { size: 4, align: 4 },
            Self::Vector { len, .. } => vector_layout(*len),
            Self::Matrix { columns, rows } => {
                let column = vector_layout(*rows);
                TypeLayout { size: columns * column.align, align: column.align }
            }
            Self::Array { element, count } => {
                let element = element.layout_with(lookup)?;
                TypeLayout {
                    size: element.stride() * count.unwrap_or(1),
                    align: element.align,
                }
            }
            Self::Struct(name) => lookup(name)?,
        };
        Some(layout)
    }
}

impl fmt::Display for WgslType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => f.write_str(s.wgsl_name()),
            Self::Vector { scalar, len } => write!(f, "vec{len}<{}>", scalar.wgsl_name()),
            Self::Matrix { columns, rows } => write!(f, "mat{columns}x{rows}<f32>"),
            Self::Atomic(s) => write!(f, "atomic<{}>", s.wgsl_name()),
            Self::Array { element, count: Some(n) } => write!(f, "array<{element}, {n}>"),
            Self::Array { element, count: None } => write!(f, "array<{element}>"),
            Self::Struct(name) => f.write_str(name),
        }
    }
}

fn vector_layout(len: u32) -> TypeLayout {
    match len {
        2 => TypeLayout { size: 8, align: 8 },
        3 => TypeLayout { size: 12, align: 16 },
        _ => TypeLayout { size: 16, align: 16 },
    }
}

fn vector_len(head: &str) -> u32 {
    match head {
        "vec2" => 2,
        "vec3" => 3,
        _ => 4,
    }
}

/// `mat4x3` -> `(4, 3)`
fn matrix_dims(head: &str) -> Option<(u32, u32)> {
    let dims = head.strip_prefix("mat")?;
    let (c, r) = dims.split_once('x')?;
    let columns = c.parse::<u32>().ok()?;
    let rows = r.parse::<u32>().ok()?;
    ((2..=4).contains(&columns) && (2..=4).contains(&rows)).then_some((columns, rows))
}

/// `array<vec4<f32>, 4>` -> `("array", "vec4<f32>, 4")`
fn split_generic(token: &str) -> Option<(&str, &str)> {
    let open = token.find('<')?;
    let inner = token.strip_suffix('>')?;
    Some((token[..open].trim(), &inner[open + 1..]))
}

/// Splits on the last comma that is not nested inside `<...>`.
fn split_top_level_comma(args: &str) -> Option<(&str, &str)> {
    let mut depth = 0i32;
    let mut split = None;
    for (i, c) in args.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth -= 1,
            ',' if depth == 0 => split = Some(i),
            _ => {}
        }
    }
    split.map(|i| (&args[..i], &args[i + 1..]))
}

fn malformed(token: &str, reason: &str) -> WeaveError {
    WeaveError::MalformedStruct {
        struct_name: token.to_string(),
        reason: reason.to_string(),
    }
}
