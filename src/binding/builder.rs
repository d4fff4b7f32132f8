//! 绑定构建器
//!
//! 把分配好的 [`BindingSlot`] 转换为 BindGroupLayout 条目和注入着色器的 WGSL 声明

use wgpu::ShaderStages;

use crate::binding::allocator::{BindingKind, BindingSlot, RegistryScopes, allocate_bindings};
use crate::resources::ShaderStage;
use crate::settings::StorageFormat;

/// Name of the synthesized uniform struct and of its binding.
pub const PARAMS_STRUCT: &str = "Params";
pub const PARAMS_BINDING: &str = "params";

/// Format of uploaded and frame-copied textures as far as sampling goes;
/// every color format they use samples as filterable float.
const SAMPLED_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Everything one stage needs from the binding allocator.
#[derive(Debug, Clone)]
pub struct StageBindings {
    pub stage: ShaderStage,
    pub group: u32,
    pub slots: Vec<BindingSlot>,
    pub layout_entries: Vec<wgpu::BindGroupLayoutEntry>,
    /// `@group(g) @binding(i) var ...;` lines, in slot order.
    pub wgsl: String,
}

impl StageBindings {
    /// Allocates and describes the bindings of `stage` for the given partition.
    #[must_use]
    pub fn build(
        stage: ShaderStage,
        internal: bool,
        scopes: RegistryScopes<'_>,
        storage_format: StorageFormat,
    ) -> Self {
        let slots = allocate_bindings(stage, internal, scopes);
        let mut builder = BindingBuilder::new(stage.visibility(), storage_format);

        for slot in &slots {
            let resource = slot.resource;
            let Some(registry) = scopes.get(resource.scope) else {
                continue;
            };
            match resource.kind {
                BindingKind::Params => builder.add_uniform_buffer(PARAMS_BINDING, PARAMS_STRUCT),
                BindingKind::Storage => {
                    let decl = &registry.storages()[resource.index];
                    builder.add_storage_buffer(&decl.name, &decl.type_name, stage == ShaderStage::Vertex);
                }
                BindingKind::Layer => {
                    let decl = &registry.layers()[resource.index];
                    builder.add_storage_buffer(&decl.name, "array<vec4<f32>>", stage == ShaderStage::Vertex);
                }
                BindingKind::Sampler => {
                    let decl = &registry.samplers()[resource.index];
                    builder.add_sampler(&decl.name, decl.descriptor.binding_type());
                }
                BindingKind::StorageTexture => {
                    let decl = &registry.textures()[resource.index];
                    builder.add_storage_texture(&decl.name);
                }
                BindingKind::Texture2D | BindingKind::ExternalTexture => {
                    let decl = &registry.textures()[resource.index];
                    builder.add_texture(&decl.name, wgpu::TextureViewDimension::D2, SAMPLED_FORMAT);
                }
                BindingKind::Texture2DArray => {
                    let decl = &registry.textures()[resource.index];
                    builder.add_texture(&decl.name, wgpu::TextureViewDimension::D2Array, SAMPLED_FORMAT);
                }
                BindingKind::BindingPair => {
                    let decl = &registry.textures()[resource.index];
                    if stage == ShaderStage::Compute {
                        builder.add_storage_texture(&decl.name);
                    } else {
                        // 采样端与存储端同一格式
                        builder.add_texture(&decl.name, wgpu::TextureViewDimension::D2, storage_format.into());
                    }
                }
            }
        }

        let group = stage.group_index();
        Self {
            stage,
            group,
            slots,
            wgsl: builder.generate_wgsl(group),
            layout_entries: builder.layout_entries,
        }
    }
}

/// Accumulates layout entries with matching WGSL variable declarations.
pub struct BindingBuilder {
    pub layout_entries: Vec<wgpu::BindGroupLayoutEntry>,
    pub names: Vec<String>,
    pub wgsl_types: Vec<String>,
    visibility: ShaderStages,
    storage_format: StorageFormat,
    next_binding_index: u32,
}

impl BindingBuilder {
    #[must_use]
    pub fn new(visibility: ShaderStages, storage_format: StorageFormat) -> Self {
        Self {
            layout_entries: Vec::new(),
            names: Vec::new(),
            wgsl_types: Vec::new(),
            visibility,
            storage_format,
            next_binding_index: 0,
        }
    }

    fn push(&mut self, name: &str, ty: wgpu::BindingType, wgsl_type: String) {
        self.layout_entries.push(wgpu::BindGroupLayoutEntry {
            binding: self.next_binding_index,
            visibility: self.visibility,
            ty,
            count: None,
        });
        self.names.push(name.to_string());
        self.wgsl_types.push(wgsl_type);
        self.next_binding_index += 1;
    }

    pub fn add_uniform_buffer(&mut self, name: &str, struct_name: &str) {
        self.push(
            name,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            struct_name.to_string(),
        );
    }

    pub fn add_storage_buffer(&mut self, name: &str, type_name: &str, read_only: bool) {
        self.push(
            name,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            type_name.to_string(),
        );
    }

    pub fn add_sampler(&mut self, name: &str, sampler_type: wgpu::SamplerBindingType) {
        let wgsl = match sampler_type {
            wgpu::SamplerBindingType::Comparison => "sampler_comparison",
            _ => "sampler",
        };
        self.push(name, wgpu::BindingType::Sampler(sampler_type), wgsl.to_string());
    }

    /// Sampled texture whose sample type follows `format`. Without optional
    /// device features, 32-bit float formats are not filterable.
    pub fn add_texture(&mut self, name: &str, view_dimension: wgpu::TextureViewDimension, format: wgpu::TextureFormat) {
        let wgsl = match view_dimension {
            wgpu::TextureViewDimension::D2Array => "texture_2d_array<f32>",
            _ => "texture_2d<f32>",
        };
        let sample_type = format
            .sample_type(None, None)
            .unwrap_or(wgpu::TextureSampleType::Float { filterable: true });
        self.push(
            name,
            wgpu::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled: false,
            },
            wgsl.to_string(),
        );
    }

    pub fn add_storage_texture(&mut self, name: &str) {
        let format = self.storage_format;
        self.push(
            name,
            wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: format.into(),
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            format!("texture_storage_2d<{}, write>", format.wgsl_name()),
        );
    }

    #[must_use]
    pub fn generate_wgsl(&self, group_index: u32) -> String {
        let mut code = String::new();
        for (i, entry) in self.layout_entries.iter().enumerate() {
            let name = &self.names[i];
            let ty = &self.wgsl_types[i];
            let decl = match entry.ty {
                wgpu::BindingType::Buffer { ty: wgpu::BufferBindingType::Uniform, .. } => {
                    format!("@group({group_index}) @binding({}) var<uniform> {name}: {ty};", entry.binding)
                }
                wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only },
                    ..
                } => {
                    let access = if read_only { "read" } else { "read_write" };
                    format!("@group({group_index}) @binding({}) var<storage, {access}> {name}: {ty};", entry.binding)
                }
                _ => format!("@group({group_index}) @binding({}) var {name}: {ty};", entry.binding),
            };
            code.push_str(&decl);
            code.push('\n');
        }
        code
    }
}
