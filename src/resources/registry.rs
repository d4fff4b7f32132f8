//! Resource Registry
//!
//! Ordered collections of declared resources. Declaration order inside each
//! collection is preserved and later drives binding order.
//!
//! The registry carries an *internal* declaration context: everything
//! registered while it is set is tagged `internal = true`. Pass-local
//! registries (see [`ResourceRegistry::pass_local`]) are always internal.

use crate::errors::{Result, WeaveError};
use crate::resources::declaration::{
    Collection, LayerDecl, ResourceDeclaration, SamplerDecl, StorageDecl, TextureDecl, UniformDecl,
};

/// Opaque handle returned by a declaration, usable wherever a name is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    collection: Collection,
    index: usize,
    name: String,
}

impl ResourceHandle {
    #[must_use]
    pub fn collection(&self) -> Collection {
        self.collection
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AsRef<str> for ResourceHandle {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    uniforms: Vec<UniformDecl>,
    storages: Vec<StorageDecl>,
    samplers: Vec<SamplerDecl>,
    textures: Vec<TextureDecl>,
    layers: Vec<LayerDecl>,

    internal_context: bool,
    always_internal: bool,
}

impl ResourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry owned by one pass. Everything declared on it is internal.
    #[must_use]
    pub fn pass_local() -> Self {
        Self {
            internal_context: true,
            always_internal: true,
            ..Self::default()
        }
    }

    /// Switches the declaration context for subsequent registrations.
    pub fn set_internal(&mut self, internal: bool) {
        self.internal_context = internal || self.always_internal;
    }

    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.internal_context
    }

    /// Registers a declaration, tagging it with the current context.
    ///
    /// Fails with [`WeaveError::DuplicateName`] when the name already exists
    /// in the same collection. The same name in a different collection is fine.
    pub fn register(&mut self, declaration: impl Into<ResourceDeclaration>) -> Result<ResourceHandle> {
        let mut declaration = declaration.into();
        let collection = declaration.collection();
        let name = declaration.name().to_string();

        if self.contains(collection, &name) {
            return Err(WeaveError::DuplicateName {
                collection: collection.name(),
                name,
            });
        }

        declaration.set_internal(self.internal_context);
        let index = match declaration {
            ResourceDeclaration::Uniform(d) => push(&mut self.uniforms, d),
            ResourceDeclaration::Storage(d) => push(&mut self.storages, d),
            ResourceDeclaration::Sampler(d) => push(&mut self.samplers, d),
            ResourceDeclaration::Texture(d) => push(&mut self.textures, d),
            ResourceDeclaration::Layer(d) => push(&mut self.layers, d),
        };

        log::trace!("Registered {} '{}' (internal: {})", collection.name(), name, self.internal_context);
        Ok(ResourceHandle { collection, index, name })
    }

    #[must_use]
    pub fn contains(&self, collection: Collection, name: &str) -> bool {
        self.position(collection, name).is_some()
    }

    /// Index of `name` inside `collection`.
    #[must_use]
    pub fn position(&self, collection: Collection, name: &str) -> Option<usize> {
        match collection {
            Collection::Uniforms => self.uniforms.iter().position(|d| d.name == name),
            Collection::Storages => self.storages.iter().position(|d| d.name == name),
            Collection::Samplers => self.samplers.iter().position(|d| d.name == name),
            Collection::Textures => self.textures.iter().position(|d| d.name == name),
            Collection::Layers => self.layers.iter().position(|d| d.name == name),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.uniforms.is_empty()
            && self.storages.is_empty()
            && self.samplers.is_empty()
            && self.textures.is_empty()
            && self.layers.is_empty()
    }

    #[must_use]
    pub fn uniforms(&self) -> &[UniformDecl] {
        &self.uniforms
    }

    #[must_use]
    pub fn storages(&self) -> &[StorageDecl] {
        &self.storages
    }

    #[must_use]
    pub fn samplers(&self) -> &[SamplerDecl] {
        &self.samplers
    }

    #[must_use]
    pub fn textures(&self) -> &[TextureDecl] {
        &self.textures
    }

    #[must_use]
    pub fn layers(&self) -> &[LayerDecl] {
        &self.layers
    }

    pub fn uniform_mut(&mut self, name: &str) -> Option<&mut UniformDecl> {
        self.uniforms.iter_mut().find(|d| d.name == name)
    }

    pub fn storage_mut(&mut self, name: &str) -> Option<&mut StorageDecl> {
        self.storages.iter_mut().find(|d| d.name == name)
    }

    pub fn texture_mut(&mut self, name: &str) -> Option<&mut TextureDecl> {
        self.textures.iter_mut().find(|d| d.name == name)
    }
}

fn push<T>(collection: &mut Vec<T>, item: T) -> usize {
    collection.push(item);
    collection.len() - 1
}
