//! Backend objects owned by the orchestrator.
//!
//! [`ScopeObjects`] mirrors one registry (the global one or a pass-local
//! one) index for index. [`PassObjects`] holds what a compiled pass needs
//! to be dispatched or drawn.

use rustc_hash::FxHashSet;

use crate::backend::{
    BindGroupKey, BindGroupLayoutKey, BindResource, BufferDesc, BufferKey, GpuBackend, PipelineKey, SamplerKey,
    TextureDesc, TextureKey,
};
use crate::binding::{BindingKind, RegistryScopes, Scope, StageBindings};
use crate::errors::{Result, WeaveError};
use crate::layout::{LayoutSet, round_up};
use crate::orchestrator::readback::ReadbackSlot;
use crate::resources::{DataVersion, ResourceRegistry, StorageDecl, TextureData, TextureDecl, TextureKind};
use crate::settings::StorageFormat;

/// Bytes of one `vec4<f32>` layer texel.
const LAYER_TEXEL_BYTES: u64 = 16;

pub struct StorageObject {
    pub buffer: BufferKey,
    pub size: u64,
    pub uploaded_version: DataVersion,
    pub readback: Option<ReadbackSlot>,
}

pub struct TextureObject {
    pub key: TextureKey,
    pub desc: TextureDesc,
}

/// Objects created for every declaration of one registry.
#[derive(Default)]
pub struct ScopeObjects {
    pub storages: Vec<StorageObject>,
    pub layers: Vec<BufferKey>,
    pub samplers: Vec<SamplerKey>,
    pub textures: Vec<TextureObject>,
}

/// Everything needed to size textures that depend on the surface.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceInfo {
    pub width: u32,
    pub height: u32,
    pub color_format: wgpu::TextureFormat,
    pub storage_format: StorageFormat,
}

impl ScopeObjects {
    pub fn create(
        backend: &mut impl GpuBackend,
        registry: &ResourceRegistry,
        layouts: &LayoutSet,
        surface: SurfaceInfo,
    ) -> Result<Self> {
        let mut objects = Self::default();

        for decl in registry.storages() {
            objects.storages.push(create_storage(backend, decl, layouts)?);
        }

        for decl in registry.layers() {
            let texels = u64::from(decl.count) * u64::from(surface.width) * u64::from(surface.height);
            let buffer = backend.create_buffer(&BufferDesc {
                label: decl.name.clone(),
                size: (texels * LAYER_TEXEL_BYTES).max(LAYER_TEXEL_BYTES),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            });
            objects.layers.push(buffer);
        }

        for decl in registry.samplers() {
            objects.samplers.push(backend.create_sampler(&decl.name, &decl.descriptor));
        }

        for decl in registry.textures() {
            let desc = texture_desc(decl, surface);
            let key = backend.create_texture(&desc);
            upload_texture_data(backend, key, &decl.data);
            objects.textures.push(TextureObject { key, desc });
        }

        Ok(objects)
    }

    pub fn release(&mut self, backend: &mut impl GpuBackend) {
        for storage in self.storages.drain(..) {
            backend.destroy_buffer(storage.buffer);
            if let Some(mut slot) = storage.readback {
                slot.release(backend);
            }
        }
        for buffer in self.layers.drain(..) {
            backend.destroy_buffer(buffer);
        }
        for sampler in self.samplers.drain(..) {
            backend.destroy_sampler(sampler);
        }
        for texture in self.textures.drain(..) {
            backend.destroy_texture(texture.key);
        }
    }

    /// Recreates frame copy targets at the new surface size. Returns the
    /// keys of the replaced textures.
    pub fn recreate_copy_targets(
        &mut self,
        backend: &mut impl GpuBackend,
        registry: &ResourceRegistry,
        surface: SurfaceInfo,
    ) -> Vec<TextureKey> {
        let mut replaced = Vec::new();
        for (decl, object) in registry.textures().iter().zip(&mut self.textures) {
            if decl.copy_from_frame.is_none() {
                continue;
            }
            let desc = texture_desc(decl, surface);
            replaced.push(object.key);
            backend.destroy_texture(object.key);
            object.key = backend.create_texture(&desc);
            object.desc = desc;
        }
        replaced
    }
}

fn create_storage(backend: &mut impl GpuBackend, decl: &StorageDecl, layouts: &LayoutSet) -> Result<StorageObject> {
    let size = if decl.mapped {
        (decl.data.len() as u64 * 4).max(4)
    } else {
        let layout = layouts.resolve(&decl.type_name)?.ok_or_else(|| WeaveError::UndeclaredStruct {
            resource: decl.name.clone(),
            struct_name: decl.type_name.clone(),
        })?;
        u64::from(round_up(layout.size, 16))
    };

    let buffer = backend.create_buffer(&BufferDesc {
        label: decl.name.clone(),
        size,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
    });
    if decl.mapped {
        backend.write_buffer(buffer, 0, bytemuck::cast_slice(&decl.data));
    }

    let readback = decl.read_back.then(|| ReadbackSlot::new(backend, &decl.name, size));
    log::debug!("Created storage '{}' ({} bytes, read-back: {})", decl.name, size, decl.read_back);

    Ok(StorageObject {
        buffer,
        size,
        uploaded_version: decl.version(),
        readback,
    })
}

pub fn texture_desc(decl: &TextureDecl, surface: SurfaceInfo) -> TextureDesc {
    let sampled = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
    let (width, height, layers) = decl.data.extent().unwrap_or((surface.width, surface.height, 1));

    let (format, usage, view_dimension) = match decl.kind {
        TextureKind::Texture2D if decl.copy_from_frame.is_some() => {
            return TextureDesc {
                label: decl.name.clone(),
                width: surface.width,
                height: surface.height,
                layers: 1,
                format: surface.color_format,
                usage: sampled,
                view_dimension: wgpu::TextureViewDimension::D2,
            };
        }
        TextureKind::Texture2D | TextureKind::External => {
            (wgpu::TextureFormat::Rgba8Unorm, sampled, wgpu::TextureViewDimension::D2)
        }
        TextureKind::Texture2DArray => (wgpu::TextureFormat::Rgba8Unorm, sampled, wgpu::TextureViewDimension::D2Array),
        TextureKind::Storage2D | TextureKind::BindingPair => (
            surface.storage_format.into(),
            wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            wgpu::TextureViewDimension::D2,
        ),
    };

    TextureDesc {
        label: decl.name.clone(),
        width,
        height,
        layers,
        format,
        usage,
        view_dimension,
    }
}

pub fn upload_texture_data(backend: &mut impl GpuBackend, key: TextureKey, data: &TextureData) {
    match data {
        TextureData::Empty => {}
        TextureData::Image { width, height, pixels } => backend.write_texture(key, 0, *width, *height, pixels),
        TextureData::Layers { width, height, layers } => {
            for (layer, pixels) in layers.iter().enumerate() {
                backend.write_texture(key, layer as u32, *width, *height, pixels);
            }
        }
    }
}

// ============================================================================
// Stage / pass objects
// ============================================================================

pub struct StageObjects {
    pub layout: BindGroupLayoutKey,
    pub bind_group: BindGroupKey,
    pub resources: Vec<BindResource>,
    pub label: String,
}

impl StageObjects {
    pub fn create(
        backend: &mut impl GpuBackend,
        label: String,
        bindings: &StageBindings,
        resources: Vec<BindResource>,
    ) -> Result<Self> {
        let layout = backend.create_bind_group_layout(&label, &bindings.layout_entries);
        let bind_group = backend.create_bind_group(&label, layout, &resources)?;
        Ok(Self {
            layout,
            bind_group,
            resources,
            label,
        })
    }

    /// Empty group filling the fragment slot of a vertex-only pipeline.
    pub fn empty(backend: &mut impl GpuBackend, label: String) -> Result<Self> {
        let layout = backend.create_bind_group_layout(&label, &[]);
        let bind_group = backend.create_bind_group(&label, layout, &[])?;
        Ok(Self {
            layout,
            bind_group,
            resources: Vec::new(),
            label,
        })
    }

    #[must_use]
    pub fn uses_any(&self, textures: &FxHashSet<TextureKey>) -> bool {
        self.resources
            .iter()
            .any(|r| matches!(r, BindResource::Texture(key) if textures.contains(key)))
    }

    /// Swaps in new resources and recreates the bind group.
    pub fn rebind(&mut self, backend: &mut impl GpuBackend, resources: Vec<BindResource>) -> Result<()> {
        let bind_group = backend.create_bind_group(&self.label, self.layout, &resources)?;
        backend.destroy_bind_group(self.bind_group);
        self.bind_group = bind_group;
        self.resources = resources;
        log::debug!("Rebuilt bind group '{}'", self.label);
        Ok(())
    }

    pub fn release(&self, backend: &mut impl GpuBackend) {
        backend.destroy_bind_group(self.bind_group);
        backend.destroy_bind_group_layout(self.layout);
    }
}

pub struct ComputeObjects {
    pub stage: StageObjects,
    pub pipeline: PipelineKey,
}

pub struct RenderObjects {
    pub vertex: StageObjects,
    pub fragment: StageObjects,
    pub pipeline: PipelineKey,
    pub vertex_buffer: BufferKey,
    pub vertex_count: u32,
}

#[derive(Default)]
pub struct PassObjects {
    pub local: ScopeObjects,
    pub compute: Option<ComputeObjects>,
    pub render: Option<RenderObjects>,
}

impl PassObjects {
    pub fn release(&mut self, backend: &mut impl GpuBackend) {
        if let Some(compute) = self.compute.take() {
            backend.destroy_pipeline(compute.pipeline);
            compute.stage.release(backend);
        }
        if let Some(render) = self.render.take() {
            backend.destroy_pipeline(render.pipeline);
            backend.destroy_buffer(render.vertex_buffer);
            render.vertex.release(backend);
            render.fragment.release(backend);
        }
        self.local.release(backend);
    }
}

/// Resolves the slots of a stage to backend objects, in binding order.
pub fn bind_resources(
    bindings: &StageBindings,
    scopes: RegistryScopes<'_>,
    params: Option<BufferKey>,
    global: &ScopeObjects,
    local: &ScopeObjects,
) -> Result<Vec<BindResource>> {
    bindings
        .slots
        .iter()
        .map(|slot| {
            let resource = slot.resource;
            let objects = match resource.scope {
                Scope::Global => global,
                Scope::Local => local,
            };
            let missing = || {
                let name = scopes
                    .get(resource.scope)
                    .map(|r| resource_name(r, resource.kind, resource.index))
                    .unwrap_or_default();
                WeaveError::UnknownResource(name)
            };
            let bound = match resource.kind {
                BindingKind::Params => params.map(BindResource::Buffer),
                BindingKind::Storage => objects.storages.get(resource.index).map(|s| BindResource::Buffer(s.buffer)),
                BindingKind::Layer => objects.layers.get(resource.index).map(|b| BindResource::Buffer(*b)),
                BindingKind::Sampler => objects.samplers.get(resource.index).map(|s| BindResource::Sampler(*s)),
                BindingKind::StorageTexture
                | BindingKind::Texture2D
                | BindingKind::Texture2DArray
                | BindingKind::ExternalTexture
                | BindingKind::BindingPair => objects.textures.get(resource.index).map(|t| BindResource::Texture(t.key)),
            };
            bound.ok_or_else(missing)
        })
        .collect()
}

fn resource_name(registry: &ResourceRegistry, kind: BindingKind, index: usize) -> String {
    let name = match kind {
        BindingKind::Params => Some("params"),
        BindingKind::Storage => registry.storages().get(index).map(|d| d.name.as_str()),
        BindingKind::Layer => registry.layers().get(index).map(|d| d.name.as_str()),
        BindingKind::Sampler => registry.samplers().get(index).map(|d| d.name.as_str()),
        _ => registry.textures().get(index).map(|d| d.name.as_str()),
    };
    name.unwrap_or_default().to_string()
}
