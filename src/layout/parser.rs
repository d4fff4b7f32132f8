//! Minimal WGSL scanner for `struct` declarations.
//!
//! Only what the layout calculator needs: comments are removed, `struct`
//! blocks are located and their members split into `(name, type)` pairs.
//! Member attributes are dropped except `@align(n)` and `@size(n)`.
//! Integer `const` declarations are collected so array lengths can name them.

use crate::errors::{Result, WeaveError};
use crate::layout::wgsl_type::{Constants, parse_int_literal};

/// A struct block as written in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStruct {
    pub name: String,
    pub body: String,
}

/// A single struct member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField {
    pub name: String,
    pub type_token: String,
    pub align: Option<u32>,
    pub size: Option<u32>,
}

/// Removes `// line` and (nested) `/* block */` comments.
#[must_use]
pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut block_depth = 0usize;

    while let Some(c) = chars.next() {
        if block_depth > 0 {
            match (c, chars.peek()) {
                ('/', Some('*')) => {
                    chars.next();
                    block_depth += 1;
                }
                ('*', Some('/')) => {
                    chars.next();
                    block_depth -= 1;
                    if block_depth == 0 {
                        out.push(' ');
                    }
                }
                ('\n', _) => out.push('\n'),
                _ => {}
            }
            continue;
        }

        match (c, chars.peek()) {
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                block_depth = 1;
            }
            _ => out.push(c),
        }
    }
    out
}

/// Finds every `struct Name { ... }` block in comment-free source, in order.
pub fn find_structs(source: &str) -> Result<Vec<RawStruct>> {
    let bytes = source.as_bytes();
    let mut structs = Vec::new();
    let mut cursor = 0;

    while let Some(found) = source[cursor..].find("struct") {
        let start = cursor + found;
        let end = start + "struct".len();
        cursor = end;

        let boundary_before = start == 0 || !is_ident_byte(bytes[start - 1]);
        let boundary_after = end < bytes.len() && bytes[end].is_ascii_whitespace();
        if !boundary_before || !boundary_after {
            continue;
        }

        let rest = &source[end..];
        let Some(open) = rest.find('{') else {
            break;
        };
        let name = rest[..open].trim().to_string();
        if name.is_empty() || !name.bytes().all(is_ident_byte) {
            return Err(WeaveError::MalformedStruct {
                struct_name: name,
                reason: "expected an identifier before '{'".to_string(),
            });
        }

        let body_start = end + open + 1;
        let mut depth = 1usize;
        let mut close = None;
        for (i, c) in source[body_start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(body_start + i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(close) = close else {
            return Err(WeaveError::MalformedStruct {
                struct_name: name,
                reason: "missing closing '}'".to_string(),
            });
        };

        structs.push(RawStruct {
            name,
            body: source[body_start..close].to_string(),
        });
        cursor = close + 1;
    }

    Ok(structs)
}

/// Collects `const NAME [: type] = value;` declarations whose value is an
/// integer literal or an earlier constant. The first definition of a name wins.
#[must_use]
pub fn find_constants(source: &str) -> Constants {
    let mut constants = Constants::default();
    for (name, value) in const_declarations(source) {
        if constants.contains_key(name) {
            continue;
        }
        if let Some(value) = parse_int_literal(value).or_else(|| constants.get(value).copied()) {
            constants.insert(name.to_string(), value);
        }
    }
    constants
}

/// Names of every `const` declared in `source`, whatever their value.
pub fn const_names(source: &str) -> impl Iterator<Item = &str> {
    const_declarations(source).map(|(name, _)| name)
}

/// `(name, value expression)` of each `const` statement, in order.
fn const_declarations(source: &str) -> impl Iterator<Item = (&str, &str)> {
    let bytes = source.as_bytes();
    source.match_indices("const").filter_map(move |(start, keyword)| {
        let end = start + keyword.len();
        let boundary_before = start == 0 || !is_ident_byte(bytes[start - 1]);
        let boundary_after = end < bytes.len() && bytes[end].is_ascii_whitespace();
        if !boundary_before || !boundary_after {
            return None;
        }
        let statement = source[end..].split(';').next()?;
        let (head, value) = statement.split_once('=')?;
        let name = head.split(':').next()?.trim();
        (!name.is_empty() && name.bytes().all(is_ident_byte)).then_some((name, value.trim()))
    })
}

/// Splits a struct body into members. Both `,` and `;` act as separators.
pub fn split_fields(struct_name: &str, body: &str) -> Result<Vec<RawField>> {
    let mut fields = Vec::new();
    for member in split_members(body) {
        let member = member.trim();
        if member.is_empty() {
            continue;
        }
        fields.push(parse_member(struct_name, member)?);
    }
    Ok(fields)
}

fn split_members(body: &str) -> Vec<&str> {
    let mut members = Vec::new();
    let mut angle = 0i32;
    let mut paren = 0i32;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '<' => angle += 1,
            '>' => angle -= 1,
            '(' => paren += 1,
            ')' => paren -= 1,
            ',' | ';' if angle == 0 && paren == 0 => {
                members.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    members.push(&body[start..]);
    members
}

fn parse_member(struct_name: &str, member: &str) -> Result<RawField> {
    let malformed = |reason: String| WeaveError::MalformedStruct {
        struct_name: struct_name.to_string(),
        reason,
    };

    let mut rest = member;
    let mut align = None;
    let mut size = None;

    while let Some(attr) = rest.strip_prefix('@') {
        let ident_len = attr.bytes().take_while(|b| is_ident_byte(*b)).count();
        let ident = &attr[..ident_len];
        let mut after = attr[ident_len..].trim_start();
        let mut argument = None;
        if let Some(args) = after.strip_prefix('(') {
            let close = args
                .find(')')
                .ok_or_else(|| malformed(format!("unterminated attribute @{ident}")))?;
            argument = Some(args[..close].trim());
            after = args[close + 1..].trim_start();
        }
        match (ident, argument) {
            ("align", Some(value)) => align = Some(parse_int_literal(value).ok_or_else(|| malformed(format!("@align({value}) must be a literal")))?),
            ("size", Some(value)) => size = Some(parse_int_literal(value).ok_or_else(|| malformed(format!("@size({value}) must be a literal")))?),
            _ => {}
        }
        rest = after;
    }

    let (name, type_token) = rest
        .split_once(':')
        .ok_or_else(|| malformed(format!("member '{rest}' has no type")))?;
    let name = name.trim();
    let type_token = type_token.trim();
    if name.is_empty() || type_token.is_empty() {
        return Err(malformed(format!("member '{rest}' is incomplete")));
    }

    Ok(RawField {
        name: name.to_string(),
        type_token: type_token.to_string(),
        align,
        size,
    })
}

#[inline]
fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
