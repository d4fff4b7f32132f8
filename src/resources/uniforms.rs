//! Uniform value packing
//!
//! Converts flat `f32` value lists into the byte image of a resolved struct
//! and back. Padding comes from [`StructLayout::padding_by_field`] and
//! [`StructLayout::trailing_padding`], never from hardcoded offsets.
//!
//! Per member the value list holds:
//! - scalars: 1 value, integers converted by value
//! - `vecN`: N values
//! - `matCxR`: C * R values, column-major
//! - structs: the flattened values of every member, recursively

use crate::errors::{Result, WeaveError};
use crate::layout::{LayoutSet, ScalarKind, StructLayout, WgslType};

/// Number of `f32` values a member of type `ty` consumes.
///
/// `None` for arrays, atomics and undeclared structs.
#[must_use]
pub fn value_count(ty: &WgslType, layouts: &LayoutSet) -> Option<usize> {
    match ty {
        WgslType::Scalar(_) => Some(1),
        WgslType::Vector { len, .. } => Some(*len as usize),
        WgslType::Matrix { columns, rows } => Some((columns * rows) as usize),
        WgslType::Struct(name) => {
            let layout = layouts.get(name)?;
            layout.fields.iter().map(|f| value_count(&f.ty, layouts)).sum()
        }
        WgslType::Array { .. } | WgslType::Atomic(_) => None,
    }
}

/// Encodes one value list per struct member into the struct's host bytes.
///
/// The output is exactly `layout.total_bytes` long.
pub fn encode_uniforms(layout: &StructLayout, values: &[&[f32]], layouts: &LayoutSet) -> Result<Vec<u8>> {
    if values.len() != layout.fields.len() {
        return Err(WeaveError::ValueCountMismatch {
            name: layout.name.clone(),
            expected: layout.fields.len(),
            actual: values.len(),
        });
    }

    let mut words = Vec::with_capacity((layout.total_bytes / 4) as usize);
    for (field, value) in layout.fields.iter().zip(values) {
        let expected = value_count(&field.ty, layouts).ok_or_else(|| WeaveError::UnsupportedArrayUniform {
            name: field.name.clone(),
            type_name: field.type_token.clone(),
        })?;
        if value.len() != expected {
            return Err(WeaveError::ValueCountMismatch {
                name: field.name.clone(),
                expected,
                actual: value.len(),
            });
        }

        let start = words.len();
        write_member(&mut words, &field.ty, value, layouts)?;
        pad_to(&mut words, start, field.byte_size);
        zeros(&mut words, layout.padding_after(&field.name));
    }
    zeros(&mut words, layout.trailing_padding);

    debug_assert_eq!(words.len() * 4, layout.total_bytes as usize);
    Ok(bytemuck::cast_slice(&words).to_vec())
}

/// Decodes host bytes produced by [`encode_uniforms`] back into one value
/// list per member.
pub fn decode_uniforms(bytes: &[u8], layout: &StructLayout, layouts: &LayoutSet) -> Result<Vec<Vec<f32>>> {
    if bytes.len() < layout.total_bytes as usize {
        return Err(WeaveError::ValueCountMismatch {
            name: layout.name.clone(),
            expected: layout.total_bytes as usize,
            actual: bytes.len(),
        });
    }

    let words = read_words(&bytes[..layout.total_bytes as usize]);
    let mut cursor = 0usize;
    let mut out = Vec::with_capacity(layout.fields.len());
    for field in &layout.fields {
        let start = cursor;
        let mut value = Vec::new();
        read_member(&words, &mut cursor, &field.ty, &mut value, layouts)?;
        cursor = start + (field.byte_size / 4) as usize;
        cursor += layout.padding_after(&field.name) as usize;
        out.push(value);
    }
    Ok(out)
}

fn write_member(words: &mut Vec<u32>, ty: &WgslType, values: &[f32], layouts: &LayoutSet) -> Result<()> {
    match ty {
        WgslType::Scalar(kind) => words.push(encode_scalar(*kind, values[0])),
        WgslType::Vector { scalar, .. } => words.extend(values.iter().map(|v| encode_scalar(*scalar, *v))),
        WgslType::Matrix { columns, rows } => {
            let column_words = column_stride_words(*rows);
            for column in values.chunks(*rows as usize).take(*columns as usize) {
                words.extend(column.iter().map(|v| v.to_bits()));
                zeros(words, column_words - rows);
            }
        }
        WgslType::Struct(name) => {
            let layout = layouts
                .get(name)
                .ok_or_else(|| WeaveError::UnknownResource(name.clone()))?;
            let start = words.len();
            let mut offset = 0usize;
            for field in &layout.fields {
                let count = value_count(&field.ty, layouts).unwrap_or(0);
                let field_start = words.len();
                write_member(words, &field.ty, &values[offset..offset + count], layouts)?;
                pad_to(words, field_start, field.byte_size);
                zeros(words, layout.padding_after(&field.name));
                offset += count;
            }
            // 嵌套结构体按自然大小对齐，而不是 16 字节
            pad_to(words, start, layout.size);
        }
        WgslType::Array { .. } | WgslType::Atomic(_) => {
            return Err(WeaveError::UnsupportedArrayUniform {
                name: String::new(),
                type_name: ty.to_string(),
            });
        }
    }
    Ok(())
}

fn read_member(
    words: &[u32],
    cursor: &mut usize,
    ty: &WgslType,
    out: &mut Vec<f32>,
    layouts: &LayoutSet,
) -> Result<()> {
    match ty {
        WgslType::Scalar(kind) => {
            out.push(decode_scalar(*kind, words[*cursor]));
            *cursor += 1;
        }
        WgslType::Vector { scalar, len } => {
            let len = *len as usize;
            out.extend(words[*cursor..*cursor + len].iter().map(|w| decode_scalar(*scalar, *w)));
            *cursor += len;
        }
        WgslType::Matrix { columns, rows } => {
            let column_words = column_stride_words(*rows) as usize;
            for _ in 0..*columns {
                out.extend(words[*cursor..*cursor + *rows as usize].iter().map(|w| f32::from_bits(*w)));
                *cursor += column_words;
            }
        }
        WgslType::Struct(name) => {
            let layout = layouts
                .get(name)
                .ok_or_else(|| WeaveError::UnknownResource(name.clone()))?;
            let start = *cursor;
            for field in &layout.fields {
                let field_start = *cursor;
                read_member(words, cursor, &field.ty, out, layouts)?;
                *cursor = field_start + (field.byte_size / 4) as usize;
                *cursor += layout.padding_after(&field.name) as usize;
            }
            *cursor = start + (layout.size / 4) as usize;
        }
        WgslType::Array { .. } | WgslType::Atomic(_) => {
            return Err(WeaveError::UnsupportedArrayUniform {
                name: String::new(),
                type_name: ty.to_string(),
            });
        }
    }
    Ok(())
}

/// Words between consecutive matrix columns of `rows` components.
fn column_stride_words(rows: u32) -> u32 {
    if rows == 2 { 2 } else { 4 }
}

fn encode_scalar(kind: ScalarKind, value: f32) -> u32 {
    match kind {
        ScalarKind::F32 => value.to_bits(),
        ScalarKind::I32 => (value as i32).cast_unsigned(),
        ScalarKind::U32 => value as u32,
        ScalarKind::Bool => u32::from(value != 0.0),
    }
}

fn decode_scalar(kind: ScalarKind, word: u32) -> f32 {
    match kind {
        ScalarKind::F32 => f32::from_bits(word),
        ScalarKind::I32 => word.cast_signed() as f32,
        ScalarKind::U32 | ScalarKind::Bool => word as f32,
    }
}

fn zeros(words: &mut Vec<u32>, count: u32) {
    words.resize(words.len() + count as usize, 0);
}

/// Pads the words written since `start` up to `byte_size`.
fn pad_to(words: &mut Vec<u32>, start: usize, byte_size: u32) {
    let target = start + (byte_size / 4) as usize;
    if words.len() < target {
        words.resize(target, 0);
    }
}

pub(crate) fn read_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
