//! Binding Allocator
//!
//! For one `(stage, internal)` partition, walks the registries in a fixed
//! global order and hands out dense binding indices:
//!
//! 1. the `Params` uniform block (whenever any uniform exists)
//! 2. storages
//! 3. layers
//! 4. samplers
//! 5. storage textures
//! 6. 2D textures
//! 7. 2D texture arrays
//! 8. external textures
//! 9. compute/fragment binding texture pairs
//!
//! Within each collection global declarations come before pass-local ones,
//! both in declaration order. A resource is included when its stage is unset
//! or equal to the requested stage, and its internal flag matches.

use crate::resources::{ResourceRegistry, ShaderStage, TextureDecl, TextureKind};

/// Which registry a resource lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    /// The pass-local registry of the pass being allocated.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Params,
    Storage,
    Layer,
    Sampler,
    StorageTexture,
    Texture2D,
    Texture2DArray,
    ExternalTexture,
    BindingPair,
}

/// Points at a declaration: `index` is its position inside the collection
/// of its registry. Always 0 for [`BindingKind::Params`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub scope: Scope,
    pub kind: BindingKind,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingSlot {
    pub stage: ShaderStage,
    pub internal: bool,
    pub binding_index: u32,
    pub resource: ResourceRef,
}

/// Global registry plus the optional pass-local one.
#[derive(Debug, Clone, Copy)]
pub struct RegistryScopes<'a> {
    pub global: &'a ResourceRegistry,
    pub local: Option<&'a ResourceRegistry>,
}

impl<'a> RegistryScopes<'a> {
    #[must_use]
    pub fn new(global: &'a ResourceRegistry, local: Option<&'a ResourceRegistry>) -> Self {
        Self { global, local }
    }

    #[must_use]
    pub fn get(&self, scope: Scope) -> Option<&'a ResourceRegistry> {
        match scope {
            Scope::Global => Some(self.global),
            Scope::Local => self.local,
        }
    }

    fn each(&self) -> impl Iterator<Item = (Scope, &'a ResourceRegistry)> {
        std::iter::once((Scope::Global, self.global)).chain(self.local.map(|l| (Scope::Local, l)))
    }
}

/// Allocates the binding slots of one `(stage, internal)` partition.
///
/// Pure function of the registries: repeated calls return the same slots.
#[must_use]
pub fn allocate_bindings(stage: ShaderStage, internal: bool, scopes: RegistryScopes<'_>) -> Vec<BindingSlot> {
    let mut refs: Vec<ResourceRef> = Vec::new();
    let visible = |s: Option<ShaderStage>, i: bool| (s.is_none() || s == Some(stage)) && i == internal;

    if !scopes.global.uniforms().is_empty() {
        refs.push(ResourceRef { scope: Scope::Global, kind: BindingKind::Params, index: 0 });
    }

    for (scope, registry) in scopes.each() {
        for (index, d) in registry.storages().iter().enumerate() {
            if visible(d.stage, d.internal) {
                refs.push(ResourceRef { scope, kind: BindingKind::Storage, index });
            }
        }
    }

    for (scope, registry) in scopes.each() {
        for (index, d) in registry.layers().iter().enumerate() {
            if visible(d.stage, d.internal) {
                refs.push(ResourceRef { scope, kind: BindingKind::Layer, index });
            }
        }
    }

    for (scope, registry) in scopes.each() {
        for (index, d) in registry.samplers().iter().enumerate() {
            if visible(d.stage, d.internal) {
                refs.push(ResourceRef { scope, kind: BindingKind::Sampler, index });
            }
        }
    }

    let texture_passes: [(BindingKind, fn(&TextureDecl, ShaderStage) -> bool); 5] = [
        (BindingKind::StorageTexture, |t, stage| {
            // 未指定 stage 的只写存储纹理只绑定到 compute
            t.kind == TextureKind::Storage2D && t.stage.unwrap_or(ShaderStage::Compute) == stage
        }),
        (BindingKind::Texture2D, |t, stage| {
            t.kind == TextureKind::Texture2D && t.stage.is_none_or(|s| s == stage)
        }),
        (BindingKind::Texture2DArray, |t, stage| {
            t.kind == TextureKind::Texture2DArray && t.stage.is_none_or(|s| s == stage)
        }),
        (BindingKind::ExternalTexture, |t, stage| {
            t.kind == TextureKind::External && t.stage.is_none_or(|s| s == stage)
        }),
        (BindingKind::BindingPair, |t, stage| {
            t.kind == TextureKind::BindingPair && matches!(stage, ShaderStage::Compute | ShaderStage::Fragment)
        }),
    ];

    for (kind, accepts) in texture_passes {
        for (scope, registry) in scopes.each() {
            for (index, d) in registry.textures().iter().enumerate() {
                if d.internal == internal && accepts(d, stage) {
                    refs.push(ResourceRef { scope, kind, index });
                }
            }
        }
    }

    refs.into_iter()
        .enumerate()
        .map(|(i, resource)| BindingSlot {
            stage,
            internal,
            binding_index: i as u32,
            resource,
        })
        .collect()
}
