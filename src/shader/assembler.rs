//! Shader Assembler
//!
//! Builds the final WGSL of every stage of a pass by prepending generated
//! declarations to the caller's source. Injection order is fixed:
//!
//! 1. the `Params` struct (omitted when no uniform exists)
//! 2. binding declarations of the stage, in slot order
//! 3. helper declarations: struct definitions the stage uses but does not
//!    declare itself, the `Fragment` interchange struct and
//!    `defaultVertexBody` for render stages
//! 4. the caller's raw source
//!
//! Struct definitions are collected from every pass and from the helper
//! chunks, so a storage of struct `Particle` declared in a compute shader
//! can also be bound to a fragment shader that never mentions `Particle`.
//! Integer constants used as array lengths in injected declarations travel
//! along the same way.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::binding::{BindingKind, PARAMS_STRUCT, RegistryScopes, StageBindings};
use crate::errors::{Result, WeaveError};
use crate::layout::parser::{RawStruct, const_names, find_constants, find_structs, split_fields, strip_comments};
use crate::layout::{Constants, WgslType};
use crate::pass::Pass;
use crate::resources::{ResourceRegistry, ShaderStage};
use crate::settings::StorageFormat;
use crate::shader::chunks::{self, DEFAULT_VERTEX_BODY_FN, FRAGMENT_STRUCT, ParamField};

/// One compiled stage.
#[derive(Debug, Clone)]
pub struct CompiledStage {
    pub stage: ShaderStage,
    pub bindings: StageBindings,
    /// Final WGSL handed to the backend.
    pub text: String,
    /// The same declarations ordered so that every struct precedes its uses;
    /// fed to the layout calculator.
    pub layout_source: String,
}

#[derive(Debug, Clone, Default)]
pub struct CompiledPass {
    pub vertex: Option<CompiledStage>,
    pub fragment: Option<CompiledStage>,
    pub compute: Option<CompiledStage>,
}

impl CompiledPass {
    #[must_use]
    pub fn vertex_text(&self) -> Option<&str> {
        self.vertex.as_ref().map(|s| s.text.as_str())
    }

    #[must_use]
    pub fn fragment_text(&self) -> Option<&str> {
        self.fragment.as_ref().map(|s| s.text.as_str())
    }

    #[must_use]
    pub fn compute_text(&self) -> Option<&str> {
        self.compute.as_ref().map(|s| s.text.as_str())
    }

    /// Stages in compute, vertex, fragment order.
    pub fn stages(&self) -> impl Iterator<Item = &CompiledStage> {
        [&self.compute, &self.vertex, &self.fragment].into_iter().flatten()
    }

    #[must_use]
    pub fn stage(&self, stage: ShaderStage) -> Option<&CompiledStage> {
        match stage {
            ShaderStage::Compute => self.compute.as_ref(),
            ShaderStage::Vertex => self.vertex.as_ref(),
            ShaderStage::Fragment => self.fragment.as_ref(),
        }
    }
}

pub struct ShaderAssembler<'a> {
    registry: &'a ResourceRegistry,
    storage_format: StorageFormat,
    params_decl: Option<String>,
    /// Every known struct definition, first declaration wins.
    library: FxHashMap<String, RawStruct>,
    /// Integer constants of every pass, first declaration wins.
    constants: Constants,
}

impl<'a> ShaderAssembler<'a> {
    /// Prepares the shared pieces: the `Params` struct and the struct library
    /// gathered from every pass.
    pub fn new(registry: &'a ResourceRegistry, passes: &[Pass], storage_format: StorageFormat) -> Result<Self> {
        let params_decl = Self::params_declaration(registry)?;

        let mut library = FxHashMap::default();
        let mut constants = Constants::default();
        let helper_text = chunks::fragment_struct()? + &chunks::event_struct()?;
        let sources = passes
            .iter()
            .flat_map(|p| [p.compute.as_deref(), p.vertex.as_deref(), p.fragment.as_deref()])
            .flatten()
            .map(strip_comments)
            .chain(std::iter::once(helper_text));
        for source in sources {
            for raw in find_structs(&source)? {
                library.entry(raw.name.clone()).or_insert(raw);
            }
            for (name, value) in find_constants(&source) {
                constants.entry(name).or_insert(value);
            }
        }

        Ok(Self {
            registry,
            storage_format,
            params_decl,
            library,
            constants,
        })
    }

    fn params_declaration(registry: &ResourceRegistry) -> Result<Option<String>> {
        if registry.uniforms().is_empty() {
            return Ok(None);
        }
        for uniform in registry.uniforms() {
            if WgslType::parse(&uniform.type_name)?.is_array() {
                return Err(WeaveError::UnsupportedArrayUniform {
                    name: uniform.name.clone(),
                    type_name: uniform.type_name.clone(),
                });
            }
        }
        let fields: Vec<ParamField<'_>> = registry
            .uniforms()
            .iter()
            .map(|u| ParamField { name: &u.name, ty: &u.type_name })
            .collect();
        chunks::params_struct(&fields).map(Some)
    }

    /// Synthesized `Params` declaration, if any uniform exists.
    #[must_use]
    pub fn params_decl(&self) -> Option<&str> {
        self.params_decl.as_deref()
    }

    pub fn compile(&self, pass: &Pass) -> Result<CompiledPass> {
        let scopes = RegistryScopes::new(self.registry, Some(pass.local()));
        let mut compiled = CompiledPass::default();

        if let Some(source) = &pass.compute {
            compiled.compute = Some(self.compile_stage(ShaderStage::Compute, pass.internal, scopes, source)?);
        }

        if pass.has_render() {
            let vertex_source = match &pass.vertex {
                Some(source) => source.clone(),
                None => chunks::default_vertex_main()?,
            };
            compiled.vertex = Some(self.compile_stage(ShaderStage::Vertex, pass.internal, scopes, &vertex_source)?);
            if let Some(source) = &pass.fragment {
                compiled.fragment = Some(self.compile_stage(ShaderStage::Fragment, pass.internal, scopes, source)?);
            }
        }

        log::debug!(
            "Compiled pass '{}' (compute: {}, vertex: {}, fragment: {})",
            pass.label,
            compiled.compute.is_some(),
            compiled.vertex.is_some(),
            compiled.fragment.is_some()
        );
        Ok(compiled)
    }

    fn compile_stage(
        &self,
        stage: ShaderStage,
        internal: bool,
        scopes: RegistryScopes<'_>,
        source: &str,
    ) -> Result<CompiledStage> {
        let bindings = StageBindings::build(stage, internal, scopes, self.storage_format);
        let stripped = strip_comments(source);
        let declared: FxHashSet<String> = find_structs(&stripped)?.into_iter().map(|s| s.name).collect();

        // --- helpers ---
        let mut roots = self.required_structs(&bindings, scopes);
        if stage != ShaderStage::Compute {
            roots.push(FRAGMENT_STRUCT.to_string());
        }
        let mut helpers = String::new();
        for name in self.struct_closure(&roots, &declared)? {
            if let Some(raw) = self.library.get(&name) {
                helpers.push_str(&format!("struct {} {{{}}}\n", raw.name, raw.body));
            }
        }
        if stage == ShaderStage::Vertex && !stripped.contains(&format!("fn {DEFAULT_VERTEX_BODY_FN}")) {
            helpers.push_str(&chunks::default_vertex_body()?);
        }

        let params = self.params_decl.as_deref().unwrap_or_default();
        let missing = self.missing_constants(&stripped, &[params, &bindings.wgsl, &helpers]);
        if !missing.is_empty() {
            helpers = missing + &helpers;
        }

        let mut text = String::with_capacity(params.len() + bindings.wgsl.len() + helpers.len() + source.len() + 128);
        if !params.is_empty() {
            text.push_str("// --- Params ---\n");
            text.push_str(params);
            text.push('\n');
        }
        text.push_str(&format!("// --- Bindings (Group {}) ---\n", bindings.group));
        text.push_str(&bindings.wgsl);
        text.push('\n');
        if !helpers.is_empty() {
            text.push_str("// --- Helpers ---\n");
            text.push_str(&helpers);
            text.push('\n');
        }
        text.push_str(source);

        let layout_source = format!("{helpers}\n{stripped}\n{params}");

        Ok(CompiledStage {
            stage,
            bindings,
            text,
            layout_source,
        })
    }

    /// `const` declarations for library constants that `injected` text names
    /// but the stage source does not declare.
    fn missing_constants(&self, stripped: &str, injected: &[&str]) -> String {
        let declared: FxHashSet<&str> = const_names(stripped).collect();
        let mut seen = FxHashSet::default();
        let mut out = String::new();
        for ident in injected
            .iter()
            .flat_map(|text| text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_')))
        {
            if declared.contains(ident) || !seen.insert(ident) {
                continue;
            }
            if let Some(value) = self.constants.get(ident) {
                out.push_str(&format!("const {ident} = {value};\n"));
            }
        }
        out
    }

    /// Struct names referenced by the uniform and storage types of a stage.
    fn required_structs(&self, bindings: &StageBindings, scopes: RegistryScopes<'_>) -> Vec<String> {
        let mut roots = Vec::new();
        for slot in &bindings.slots {
            let Some(registry) = scopes.get(slot.resource.scope) else {
                continue;
            };
            match slot.resource.kind {
                BindingKind::Params => {
                    roots.extend(
                        registry
                            .uniforms()
                            .iter()
                            .filter_map(|u| struct_dependency(&u.type_name, &self.constants)),
                    );
                }
                BindingKind::Storage => {
                    let decl = &registry.storages()[slot.resource.index];
                    roots.extend(struct_dependency(&decl.type_name, &self.constants));
                }
                _ => {}
            }
        }
        roots.retain(|name| name != PARAMS_STRUCT);
        roots
    }

    /// Library structs reachable from `roots` that the stage does not
    /// declare, dependencies first.
    fn struct_closure(&self, roots: &[String], declared: &FxHashSet<String>) -> Result<Vec<String>> {
        let mut ordered = Vec::new();
        let mut visited = FxHashSet::default();
        for root in roots {
            self.visit(root, declared, &mut visited, &mut ordered)?;
        }
        Ok(ordered)
    }

    fn visit(
        &self,
        name: &str,
        declared: &FxHashSet<String>,
        visited: &mut FxHashSet<String>,
        ordered: &mut Vec<String>,
    ) -> Result<()> {
        if declared.contains(name) || !visited.insert(name.to_string()) {
            return Ok(());
        }
        let Some(raw) = self.library.get(name) else {
            return Ok(());
        };
        for field in split_fields(&raw.name, &raw.body)? {
            if let Some(dep) = struct_dependency(&field.type_token, &self.constants) {
                self.visit(&dep, declared, visited, ordered)?;
            }
        }
        ordered.push(name.to_string());
        Ok(())
    }
}

fn struct_dependency(type_token: &str, constants: &Constants) -> Option<String> {
    WgslType::parse_with(type_token, constants)
        .ok()
        .and_then(|ty| ty.struct_dependency().map(str::to_string))
}

