//! Pass definition
//!
//! A [`Pass`] is one unit of compute and/or render work executed once per
//! frame in declaration order. It is built by the caller before
//! initialization, compiled once during `Orchestrator::init`, and its GPU
//! objects are rebuilt whenever resources or the surface size change.

use crate::errors::Result;
use crate::resources::{Mesh, ResourceDeclaration, ResourceHandle, ResourceRegistry};

/// Color / depth attachment load behaviour of a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadMode {
    /// Clear to the given color, or to the configured clear color when `None`.
    Clear(Option<[f64; 4]>),
    /// Keep what earlier passes drew.
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub color_load: LoadMode,
    /// `true` clears depth to 1.0 at the start of the pass.
    pub clear_depth: bool,
    pub depth_write: bool,
    pub depth_compare: wgpu::CompareFunction,
    pub topology: wgpu::PrimitiveTopology,
    pub cull_mode: Option<wgpu::Face>,
    pub blend: Option<wgpu::BlendState>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            color_load: LoadMode::Clear(None),
            clear_depth: true,
            depth_write: true,
            depth_compare: wgpu::CompareFunction::LessEqual,
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
        }
    }
}

impl RenderOptions {
    /// Draws on top of the previous passes' color and depth.
    #[must_use]
    pub fn accumulate() -> Self {
        Self {
            color_load: LoadMode::Load,
            clear_depth: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pass {
    pub label: String,
    pub vertex: Option<String>,
    pub fragment: Option<String>,
    pub compute: Option<String>,
    pub workgroups: [u32; 3],
    /// Post-processing pass: binds only internal resources.
    pub internal: bool,
    pub meshes: Vec<Mesh>,
    pub enabled: bool,
    pub render: RenderOptions,
    local: ResourceRegistry,
}

impl Pass {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            vertex: None,
            fragment: None,
            compute: None,
            workgroups: [1, 1, 1],
            internal: false,
            meshes: Vec::new(),
            enabled: true,
            render: RenderOptions::default(),
            local: ResourceRegistry::pass_local(),
        }
    }

    /// Compute-only pass.
    #[must_use]
    pub fn compute(label: impl Into<String>, source: impl Into<String>, workgroups: [u32; 3]) -> Self {
        Self::new(label).with_compute(source, workgroups)
    }

    /// Render pass with a fragment shader. The vertex stage defaults to a
    /// pass-through of the mesh vertices.
    #[must_use]
    pub fn render(label: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self::new(label).with_fragment(fragment)
    }

    #[must_use]
    pub fn with_compute(mut self, source: impl Into<String>, workgroups: [u32; 3]) -> Self {
        self.compute = Some(source.into());
        self.workgroups = workgroups;
        self
    }

    #[must_use]
    pub fn with_vertex(mut self, source: impl Into<String>) -> Self {
        self.vertex = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_fragment(mut self, source: impl Into<String>) -> Self {
        self.fragment = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_mesh(mut self, mesh: Mesh) -> Self {
        self.meshes.push(mesh);
        self
    }

    #[must_use]
    pub fn with_render_options(mut self, options: RenderOptions) -> Self {
        self.render = options;
        self
    }

    #[must_use]
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Declares a resource owned by this pass.
    ///
    /// Pass-local resources are internal, so declaring one turns the pass
    /// into an internal pass.
    pub fn declare(&mut self, declaration: impl Into<ResourceDeclaration>) -> Result<ResourceHandle> {
        self.internal = true;
        self.local.register(declaration)
    }

    #[must_use]
    pub fn local(&self) -> &ResourceRegistry {
        &self.local
    }

    pub(crate) fn local_mut(&mut self) -> &mut ResourceRegistry {
        &mut self.local
    }

    #[must_use]
    pub fn has_compute(&self) -> bool {
        self.compute.is_some()
    }

    #[must_use]
    pub fn has_render(&self) -> bool {
        self.vertex.is_some() || self.fragment.is_some()
    }
}
