//! Helper Chunk Templates
//!
//! Small WGSL pieces injected into compiled stages. They live as `.wgsl`
//! files next to this module, are embedded with `rust-embed` and rendered
//! through a shared minijinja environment:
//!
//! | Chunk                 | Injected into                         |
//! |-----------------------|---------------------------------------|
//! | `params`              | every stage, when uniforms exist      |
//! | `fragment`            | vertex and fragment stages            |
//! | `default_vertex_body` | vertex stages                         |
//! | `default_vertex_main` | render passes without a vertex shader |
//! | `event`               | stages binding an event storage       |

use std::borrow::Cow;
use std::sync::OnceLock;

use minijinja::{Environment, context, syntax::SyntaxConfig};
use rust_embed::RustEmbed;
use serde::Serialize;

use crate::errors::Result;

/// Number of payload floats carried by an event.
pub const EVENT_PAYLOAD: usize = 4;

pub const EVENT_STRUCT: &str = "Event";
pub const FRAGMENT_STRUCT: &str = "Fragment";
pub const DEFAULT_VERTEX_BODY_FN: &str = "defaultVertexBody";

static CHUNK_ENV: OnceLock<Environment<'static>> = OnceLock::new();

#[derive(RustEmbed)]
#[folder = "src/shader/chunks"]
struct ChunkAssets;

/// One member of the synthesized `Params` struct.
#[derive(Debug, Clone, Serialize)]
pub struct ParamField<'a> {
    pub name: &'a str,
    pub ty: &'a str,
}

fn environment() -> Result<&'static Environment<'static>> {
    if let Some(env) = CHUNK_ENV.get() {
        return Ok(env);
    }

    let mut env = Environment::new();
    let syntax = SyntaxConfig::builder()
        .block_delimiters("{$", "$}")
        .variable_delimiters("{{", "}}")
        .line_statement_prefix("$$")
        .build()?;
    env.set_syntax(syntax);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
    env.set_loader(chunk_loader);

    Ok(CHUNK_ENV.get_or_init(|| env))
}

fn chunk_loader(name: &str) -> std::result::Result<Option<String>, minijinja::Error> {
    let filename = if name.ends_with(".wgsl") {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("{name}.wgsl"))
    };

    if let Some(file) = ChunkAssets::get(&filename)
        && let Ok(source) = std::str::from_utf8(file.data.as_ref())
    {
        return Ok(Some(source.to_string()));
    }

    Ok(None)
}

fn render(name: &str, ctx: minijinja::Value) -> Result<String> {
    let template = environment()?.get_template(name)?;
    let mut out = template.render(ctx)?;
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

pub fn params_struct(fields: &[ParamField<'_>]) -> Result<String> {
    render("params", context! { fields => fields })
}

pub fn fragment_struct() -> Result<String> {
    render("fragment", context! {})
}

pub fn event_struct() -> Result<String> {
    render("event", context! { payload => EVENT_PAYLOAD })
}

pub fn default_vertex_body() -> Result<String> {
    render("default_vertex_body", context! {})
}

pub fn default_vertex_main() -> Result<String> {
    render("default_vertex_main", context! {})
}
