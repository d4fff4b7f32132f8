//! Binding Allocation Tests
//!
//! Tests for:
//! - Dense, stable binding indices per (stage, internal) partition
//! - Fixed collection order (Params, storages, layers, samplers, textures...)
//! - Stage and internal filtering, pass-local registries
//! - Duplicate name detection
//! - Generated WGSL declarations and bind group layout entries
//! - Sample types derived from the texture format

use weave::binding::{BindingKind, RegistryScopes, Scope, StageBindings, allocate_bindings};
use weave::errors::WeaveError;
use weave::resources::{
    LayerDecl, ResourceRegistry, SamplerDecl, SamplerDescriptor, ShaderStage, StorageDecl, TextureDecl,
    TextureKind, UniformDecl,
};
use weave::settings::StorageFormat;

/// A registry touching every collection, declared deliberately out of
/// binding order.
fn mixed_registry() -> ResourceRegistry {
    let mut registry = ResourceRegistry::new();
    registry
        .register(TextureDecl::new("pair", TextureKind::BindingPair))
        .unwrap();
    registry.register(TextureDecl::new("img", TextureKind::Texture2D)).unwrap();
    registry.register(SamplerDecl::new("linear", SamplerDescriptor::default())).unwrap();
    registry
        .register(StorageDecl::new("particles", "array<vec4<f32>, 16>").stage(ShaderStage::Compute))
        .unwrap();
    registry.register(StorageDecl::new("grid", "array<f32, 64>")).unwrap();
    registry.register(UniformDecl::new("speed", 1.0)).unwrap();
    registry.register(TextureDecl::new("out", TextureKind::Storage2D)).unwrap();
    registry.register(LayerDecl::new("history", 2)).unwrap();
    registry
}

fn kinds(stage: ShaderStage, registry: &ResourceRegistry) -> Vec<BindingKind> {
    allocate_bindings(stage, false, RegistryScopes::new(registry, None))
        .iter()
        .map(|slot| slot.resource.kind)
        .collect()
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn compute_stage_follows_collection_order() {
    let registry = mixed_registry();
    assert_eq!(
        kinds(ShaderStage::Compute, &registry),
        vec![
            BindingKind::Params,
            BindingKind::Storage,
            BindingKind::Storage,
            BindingKind::Layer,
            BindingKind::Sampler,
            BindingKind::StorageTexture,
            BindingKind::Texture2D,
            BindingKind::BindingPair,
        ]
    );
}

#[test]
fn stage_filter_drops_restricted_resources() {
    let registry = mixed_registry();

    // particles is compute-only; storage textures default to compute;
    // binding pairs never reach the vertex stage
    assert_eq!(
        kinds(ShaderStage::Vertex, &registry),
        vec![
            BindingKind::Params,
            BindingKind::Storage,
            BindingKind::Layer,
            BindingKind::Sampler,
            BindingKind::Texture2D,
        ]
    );
    assert_eq!(
        kinds(ShaderStage::Fragment, &registry),
        vec![
            BindingKind::Params,
            BindingKind::Storage,
            BindingKind::Layer,
            BindingKind::Sampler,
            BindingKind::Texture2D,
            BindingKind::BindingPair,
        ]
    );
}

#[test]
fn indices_are_dense_and_stable() {
    let registry = mixed_registry();
    for stage in [ShaderStage::Compute, ShaderStage::Vertex, ShaderStage::Fragment] {
        let first = allocate_bindings(stage, false, RegistryScopes::new(&registry, None));
        let second = allocate_bindings(stage, false, RegistryScopes::new(&registry, None));
        assert_eq!(first, second);

        let indices: Vec<u32> = first.iter().map(|s| s.binding_index).collect();
        let expected: Vec<u32> = (0..first.len() as u32).collect();
        assert_eq!(indices, expected, "{stage:?}");
    }
}

#[test]
fn params_is_omitted_without_uniforms() {
    let mut registry = ResourceRegistry::new();
    registry.register(StorageDecl::new("grid", "array<f32, 4>")).unwrap();

    let slots = allocate_bindings(ShaderStage::Compute, false, RegistryScopes::new(&registry, None));
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].resource.kind, BindingKind::Storage);
    assert_eq!(slots[0].binding_index, 0);
}

#[test]
fn declaration_order_is_kept_within_a_collection() {
    let mut registry = ResourceRegistry::new();
    for name in ["c", "a", "b"] {
        registry.register(StorageDecl::new(name, "f32")).unwrap();
    }
    let slots = allocate_bindings(ShaderStage::Compute, false, RegistryScopes::new(&registry, None));
    let names: Vec<&str> = slots
        .iter()
        .map(|s| registry.storages()[s.resource.index].name.as_str())
        .collect();
    assert_eq!(names, vec!["c", "a", "b"]);
}

// ============================================================================
// Internal Partition
// ============================================================================

#[test]
fn internal_flag_splits_partitions() {
    let mut registry = ResourceRegistry::new();
    registry.register(UniformDecl::new("time", 0.0)).unwrap();
    registry.register(StorageDecl::new("scene", "f32")).unwrap();
    registry.set_internal(true);
    registry.register(StorageDecl::new("post", "f32")).unwrap();
    registry.set_internal(false);

    let scopes = RegistryScopes::new(&registry, None);
    let public = allocate_bindings(ShaderStage::Fragment, false, scopes);
    let internal = allocate_bindings(ShaderStage::Fragment, true, scopes);

    // Params is bound in both partitions
    assert_eq!(public.len(), 2);
    assert_eq!(internal.len(), 2);
    assert_eq!(public[1].resource.index, 0);
    assert_eq!(internal[1].resource.index, 1);
    assert!(internal.iter().all(|s| s.internal));
}

#[test]
fn pass_local_registries_start_from_the_same_index() {
    let global = ResourceRegistry::new();
    let mut first = ResourceRegistry::pass_local();
    let mut second = ResourceRegistry::pass_local();
    for local in [&mut first, &mut second] {
        local
            .register(SamplerDecl::new("feedbackSampler", SamplerDescriptor::nearest_clamped()).stage(ShaderStage::Fragment))
            .unwrap();
    }

    for local in [&first, &second] {
        let slots = allocate_bindings(ShaderStage::Fragment, true, RegistryScopes::new(&global, Some(local)));
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].binding_index, 0);
        assert_eq!(slots[0].resource.scope, Scope::Local);
        assert_eq!(slots[0].resource.kind, BindingKind::Sampler);
    }
}

#[test]
fn global_declarations_precede_local_ones() {
    let mut global = ResourceRegistry::new();
    global.set_internal(true);
    global.register(StorageDecl::new("shared", "f32")).unwrap();

    let mut local = ResourceRegistry::pass_local();
    local.register(StorageDecl::new("own", "f32")).unwrap();

    let slots = allocate_bindings(ShaderStage::Compute, true, RegistryScopes::new(&global, Some(&local)));
    let scopes: Vec<Scope> = slots.iter().map(|s| s.resource.scope).collect();
    assert_eq!(scopes, vec![Scope::Global, Scope::Local]);
}

// ============================================================================
// Registry
// ============================================================================

#[test]
fn duplicate_name_in_collection_is_rejected() {
    let mut registry = ResourceRegistry::new();
    registry.register(UniformDecl::new("speed", 1.0)).unwrap();

    let err = registry.register(UniformDecl::new("speed", 2.0)).unwrap_err();
    match err {
        WeaveError::DuplicateName { collection, name } => {
            assert_eq!(collection, "uniforms");
            assert_eq!(name, "speed");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(registry.uniforms().len(), 1);
}

#[test]
fn same_name_in_different_collections_is_allowed() {
    let mut registry = ResourceRegistry::new();
    registry.register(UniformDecl::new("feedback", 1.0)).unwrap();
    registry.register(StorageDecl::new("feedback", "f32")).unwrap();
    registry.register(TextureDecl::new("feedback", TextureKind::Texture2D)).unwrap();
    assert_eq!(registry.textures().len(), 1);
}

#[test]
fn pass_local_registry_stays_internal() {
    let mut local = ResourceRegistry::pass_local();
    local.set_internal(false);
    local.register(StorageDecl::new("own", "f32")).unwrap();
    assert!(local.storages()[0].internal);
}

// ============================================================================
// WGSL Declarations
// ============================================================================

#[test]
fn fragment_declarations_use_group_one() {
    let registry = mixed_registry();
    let bindings = StageBindings::build(
        ShaderStage::Fragment,
        false,
        RegistryScopes::new(&registry, None),
        StorageFormat::Rgba8Unorm,
    );

    assert_eq!(bindings.group, 1);
    let lines: Vec<&str> = bindings.wgsl.lines().collect();
    assert_eq!(lines[0], "@group(1) @binding(0) var<uniform> params: Params;");
    assert_eq!(lines[1], "@group(1) @binding(1) var<storage, read_write> grid: array<f32, 64>;");
    assert_eq!(lines[2], "@group(1) @binding(2) var<storage, read_write> history: array<vec4<f32>>;");
    assert_eq!(lines[3], "@group(1) @binding(3) var linear: sampler;");
    assert_eq!(lines[4], "@group(1) @binding(4) var img: texture_2d<f32>;");
    assert_eq!(lines[5], "@group(1) @binding(5) var pair: texture_2d<f32>;");
    assert_eq!(bindings.layout_entries.len(), lines.len());
}

#[test]
fn vertex_storage_is_read_only() {
    let mut registry = ResourceRegistry::new();
    registry.register(StorageDecl::new("points", "array<vec4<f32>, 8>")).unwrap();

    let bindings = StageBindings::build(
        ShaderStage::Vertex,
        false,
        RegistryScopes::new(&registry, None),
        StorageFormat::Rgba8Unorm,
    );
    assert_eq!(bindings.group, 0);
    assert_eq!(
        bindings.wgsl.trim(),
        "@group(0) @binding(0) var<storage, read> points: array<vec4<f32>, 8>;"
    );
    assert!(matches!(
        bindings.layout_entries[0].ty,
        wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            ..
        }
    ));
}

#[test]
fn binding_pair_is_written_in_compute() {
    let mut registry = ResourceRegistry::new();
    registry.register(TextureDecl::new("field", TextureKind::BindingPair)).unwrap();

    let compute = StageBindings::build(
        ShaderStage::Compute,
        false,
        RegistryScopes::new(&registry, None),
        StorageFormat::Rgba16Float,
    );
    assert_eq!(
        compute.wgsl.trim(),
        "@group(0) @binding(0) var field: texture_storage_2d<rgba16float, write>;"
    );
    assert!(matches!(
        compute.layout_entries[0].ty,
        wgpu::BindingType::StorageTexture {
            format: wgpu::TextureFormat::Rgba16Float,
            ..
        }
    ));
    assert_eq!(compute.layout_entries[0].visibility, wgpu::ShaderStages::COMPUTE);
}

#[test]
fn sampled_binding_pair_follows_storage_format() {
    let mut registry = ResourceRegistry::new();
    registry.register(TextureDecl::new("field", TextureKind::BindingPair)).unwrap();
    registry.register(TextureDecl::new("img", TextureKind::Texture2D)).unwrap();
    let fragment = |format| {
        StageBindings::build(
            ShaderStage::Fragment,
            false,
            RegistryScopes::new(&registry, None),
            format,
        )
    };

    let full = fragment(StorageFormat::Rgba32Float);
    let sampled = |bindings: &StageBindings, index: usize| match bindings.layout_entries[index].ty {
        wgpu::BindingType::Texture { sample_type, .. } => sample_type,
        other => panic!("not a sampled texture: {other:?}"),
    };
    // img 在前, field 在后
    assert_eq!(sampled(&full, 0), wgpu::TextureSampleType::Float { filterable: true });
    assert_eq!(sampled(&full, 1), wgpu::TextureSampleType::Float { filterable: false });

    let half = fragment(StorageFormat::Rgba16Float);
    assert_eq!(sampled(&half, 1), wgpu::TextureSampleType::Float { filterable: true });
}

#[test]
fn storage_texture_with_explicit_stage_moves_out_of_compute() {
    let mut registry = ResourceRegistry::new();
    registry
        .register(TextureDecl::new("canvas", TextureKind::Storage2D).stage(ShaderStage::Fragment))
        .unwrap();

    assert!(kinds(ShaderStage::Compute, &registry).is_empty());
    assert_eq!(kinds(ShaderStage::Fragment, &registry), vec![BindingKind::StorageTexture]);
}
