//! Frame Orchestrator
//!
//! Owns the resource registry, the passes and every backend object created
//! for them, and drives one frame per [`Orchestrator::update`] call.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──init──▶ Initializing ──▶ Ready ⇄ Updating
//!                               │                 │
//!                               └─error─▶ Uninitialized
//!                                                 └──destroy──▶ Destroyed
//! ```
//!
//! # Frame order
//!
//! 1. collect read-backs started by the previous frame, fire event listeners
//! 2. refresh frame state and encode `Params`
//! 3. re-upload replaced mapped storages and pushed external frames
//! 4. rebuild bind groups whose textures were replaced
//! 5. compute dispatches of every enabled pass, in pass order
//! 6. draws of every enabled render pass, each followed by its frame copies
//! 7. read-back copies into a free staging buffer of each ring, then the
//!    asynchronous maps after submission

pub mod frame_state;
pub mod gpu_objects;
pub mod readback;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::backend::{
    BufferDesc, BufferKey, ComputePipelineDesc, GpuBackend, GpuCommand, RenderPipelineDesc, TextureKey, WgpuBackend,
};
use crate::binding::{PARAMS_STRUCT, RegistryScopes};
use crate::errors::{Result, WeaveError};
use crate::layout::{LayoutSet, StructLayout, WgslType, compute_layouts_for};
use crate::pass::{LoadMode, Pass};
use crate::resources::{
    Collection, DataGuard, LayerDecl, Mesh, ResourceDeclaration, ResourceHandle, ResourceRegistry, SamplerDecl,
    StorageDecl, TextureDecl, TextureKind, UniformDecl, Vertex, encode_uniforms, flatten_meshes, value_count,
};
use crate::settings::OrchestratorSettings;
use crate::shader::{CompiledPass, CompiledStage, EVENT_STRUCT, ShaderAssembler, chunks};

pub use frame_state::{BUILTIN_UNIFORMS, FrameState, Timer};
use gpu_objects::{
    ComputeObjects, PassObjects, RenderObjects, ScopeObjects, StageObjects, SurfaceInfo, bind_resources,
};
use readback::fired_event;

/// Callback receiving the payload of a fired event.
pub type EventListener = Box<dyn FnMut(&[f32])>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrchestratorState {
    Uninitialized,
    Initializing,
    Ready,
    Updating,
    Destroyed,
}

impl OrchestratorState {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Initializing => "Initializing",
            Self::Ready => "Ready",
            Self::Updating => "Updating",
            Self::Destroyed => "Destroyed",
        }
    }
}

struct ExternalFrame {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

/// Registry a texture name resolved in: `None` is global, `Some(i)` pass `i`.
type TextureScope = Option<usize>;

/// Backend objects of an initialized orchestrator.
struct GpuState {
    layouts: LayoutSet,
    compiled: Vec<CompiledPass>,
    params: Option<BufferKey>,
    global: ScopeObjects,
    /// `None` once a pass was destroyed.
    passes: Vec<Option<PassObjects>>,
    /// Textures replaced since the bind groups were last rebuilt.
    replaced: FxHashSet<TextureKey>,
}

pub struct Orchestrator<B: GpuBackend> {
    settings: OrchestratorSettings,
    state: OrchestratorState,
    registry: ResourceRegistry,
    passes: Vec<Pass>,
    listeners: FxHashMap<String, EventListener>,
    frame: FrameState,
    timer: Timer,
    external_frames: FxHashMap<(TextureScope, String), ExternalFrame>,
    backend: Option<B>,
    gpu: Option<GpuState>,
}

impl<B: GpuBackend> Orchestrator<B> {
    /// Creates an orchestrator with the built-in frame uniforms registered.
    pub fn new(settings: OrchestratorSettings) -> Result<Self> {
        let (width, height) = settings.default_size;
        let frame = FrameState::new(width, height);

        let mut registry = ResourceRegistry::new();
        for decl in frame.declarations() {
            registry.register(decl)?;
        }

        Ok(Self {
            settings,
            state: OrchestratorState::Uninitialized,
            registry,
            passes: Vec::new(),
            listeners: FxHashMap::default(),
            frame,
            timer: Timer::new(),
            external_frames: FxHashMap::default(),
            backend: None,
            gpu: None,
        })
    }

    fn expect_state(&self, expected: OrchestratorState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(WeaveError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }

    // ========================================================================
    // Declarations (before init)
    // ========================================================================

    /// Registers any resource in the global registry.
    pub fn declare(&mut self, declaration: impl Into<ResourceDeclaration>) -> Result<ResourceHandle> {
        self.expect_state(OrchestratorState::Uninitialized)?;
        self.registry.register(declaration)
    }

    pub fn add_uniform(&mut self, name: impl Into<String>, value: f32) -> Result<ResourceHandle> {
        self.declare(UniformDecl::new(name, value))
    }

    pub fn add_uniform_typed(
        &mut self,
        name: impl Into<String>,
        type_name: impl Into<String>,
        values: Vec<f32>,
    ) -> Result<ResourceHandle> {
        self.declare(UniformDecl::typed(name, type_name, values))
    }

    pub fn add_storage(&mut self, storage: StorageDecl) -> Result<ResourceHandle> {
        self.declare(storage)
    }

    pub fn add_sampler(&mut self, sampler: SamplerDecl) -> Result<ResourceHandle> {
        self.declare(sampler)
    }

    pub fn add_texture(&mut self, texture: TextureDecl) -> Result<ResourceHandle> {
        self.declare(texture)
    }

    pub fn add_layers(&mut self, name: impl Into<String>, count: u32) -> Result<ResourceHandle> {
        self.declare(LayerDecl::new(name, count))
    }

    /// Declares a read-back `Event` storage; `callback` receives its payload
    /// every frame the shader set the `updated` flag.
    pub fn add_event_listener(
        &mut self,
        name: impl Into<String>,
        callback: impl FnMut(&[f32]) + 'static,
    ) -> Result<ResourceHandle> {
        let name = name.into();
        let handle = self.declare(StorageDecl::new(name.clone(), EVENT_STRUCT).read_back(true))?;
        self.listeners.insert(name, Box::new(callback));
        Ok(handle)
    }

    /// Tags subsequent declarations as internal (post-processing) resources.
    pub fn set_internal_context(&mut self, internal: bool) {
        self.registry.set_internal(internal);
    }

    /// Appends a pass and returns its index.
    pub fn add_pass(&mut self, pass: Pass) -> Result<usize> {
        self.expect_state(OrchestratorState::Uninitialized)?;
        self.passes.push(pass);
        Ok(self.passes.len() - 1)
    }

    // ========================================================================
    // Values (any time, applied on the next frame)
    // ========================================================================

    pub fn set_uniform(&mut self, name: impl AsRef<str>, values: Vec<f32>) -> Result<()> {
        let name = name.as_ref();
        let empty = LayoutSet::default();
        let layouts = self.gpu.as_ref().map_or(&empty, |gpu| &gpu.layouts);
        let uniform = self
            .registry
            .uniform_mut(name)
            .ok_or_else(|| WeaveError::UnknownResource(format!("uniform '{name}'")))?;

        let expected = WgslType::parse(&uniform.type_name)
            .ok()
            .and_then(|ty| value_count(&ty, layouts));
        if let Some(expected) = expected
            && expected != values.len()
        {
            return Err(WeaveError::ValueCountMismatch {
                name: name.to_string(),
                expected,
                actual: values.len(),
            });
        }
        uniform.value = values;
        Ok(())
    }

    /// Replaces the data of a mapped storage.
    pub fn set_storage_data(&mut self, name: impl AsRef<str>, data: Vec<f32>) -> Result<()> {
        let mut guard = self.storage_data_mut(name)?;
        *guard = data;
        Ok(())
    }

    /// Mutable access to a mapped storage's data; re-uploaded next frame.
    ///
    /// Global storages are searched first, then pass-local ones in pass order.
    pub fn storage_data_mut(&mut self, name: impl AsRef<str>) -> Result<DataGuard<'_>> {
        let name = name.as_ref();
        let storage = match self.registry.storage_mut(name) {
            Some(storage) => Some(storage),
            None => self.passes.iter_mut().find_map(|p| p.local_mut().storage_mut(name)),
        };
        match storage {
            Some(storage) if storage.mapped => Ok(DataGuard::new(&mut storage.data, &mut storage.version)),
            _ => Err(WeaveError::UnknownResource(format!("mapped storage '{name}'"))),
        }
    }

    /// Queues the current frame of an external texture (video, camera).
    pub fn push_external_frame(
        &mut self,
        name: impl AsRef<str>,
        width: u32,
        height: u32,
        rgba: Vec<u8>,
    ) -> Result<()> {
        let name = name.as_ref();
        let is_external = |registry: &ResourceRegistry| {
            registry
                .textures()
                .iter()
                .any(|t| t.name == name && t.kind == TextureKind::External)
        };
        let scope = if is_external(&self.registry) {
            None
        } else {
            let index = self
                .passes
                .iter()
                .position(|p| is_external(p.local()))
                .ok_or_else(|| WeaveError::UnknownResource(format!("external texture '{name}'")))?;
            Some(index)
        };
        let expected = (width as usize) * (height as usize) * 4;
        if rgba.len() != expected {
            return Err(WeaveError::ValueCountMismatch {
                name: name.to_string(),
                expected,
                actual: rgba.len(),
            });
        }
        self.external_frames
            .insert((scope, name.to_string()), ExternalFrame { width, height, rgba });
        Ok(())
    }

    pub fn frame_state_mut(&mut self) -> &mut FrameState {
        &mut self.frame
    }

    pub fn set_pass_enabled(&mut self, index: usize, enabled: bool) -> Result<()> {
        let pass = self.passes.get_mut(index).ok_or(WeaveError::PassIndexOutOfBounds(index))?;
        pass.enabled = enabled;
        Ok(())
    }

    // ========================================================================
    // Initialization
    // ========================================================================

    /// Compiles every pass and creates all backend objects.
    ///
    /// Declaration and layout errors abort initialization and leave the
    /// orchestrator `Uninitialized`.
    pub fn init(&mut self, mut backend: B) -> Result<()> {
        self.expect_state(OrchestratorState::Uninitialized)?;
        self.state = OrchestratorState::Initializing;

        let (width, height) = backend.surface_size();
        self.frame.resize(width, height);

        match self.build(&mut backend) {
            Ok(gpu) => {
                log::info!(
                    "Orchestrator ready: {} passes, {} struct layouts, surface {}x{}",
                    self.passes.len(),
                    gpu.layouts.len(),
                    width,
                    height
                );
                self.gpu = Some(gpu);
                self.backend = Some(backend);
                self.state = OrchestratorState::Ready;
                Ok(())
            }
            Err(e) => {
                log::error!("Orchestrator initialization failed: {e}");
                self.state = OrchestratorState::Uninitialized;
                Err(e)
            }
        }
    }

    fn surface_info(&self, backend: &B) -> SurfaceInfo {
        let (width, height) = backend.surface_size();
        SurfaceInfo {
            width,
            height,
            color_format: backend.color_format(),
            storage_format: self.settings.storage_format,
        }
    }

    fn build(&self, backend: &mut B) -> Result<GpuState> {
        self.validate_declarations()?;

        // 1. 编译所有 pass
        let assembler = ShaderAssembler::new(&self.registry, &self.passes, self.settings.storage_format)?;
        let compiled = self
            .passes
            .iter()
            .map(|pass| assembler.compile(pass))
            .collect::<Result<Vec<_>>>()?;

        // 2. 对全部着色器文本计算布局, 只解析缓冲区用到的 struct
        let mut text = String::new();
        for stage in compiled.iter().flat_map(CompiledPass::stages) {
            text.push_str(&stage.layout_source);
            text.push('\n');
        }
        if let Some(params) = assembler.params_decl() {
            text.push_str(params);
        }
        let mut roots: Vec<&str> = Vec::new();
        if !self.registry.uniforms().is_empty() {
            roots.push(PARAMS_STRUCT);
        }
        if !self.listeners.is_empty() {
            text.push_str(&chunks::event_struct()?);
            roots.push(EVENT_STRUCT);
        }
        roots.extend(self.all_storages().map(|s| s.type_name.as_str()));
        let layouts = compute_layouts_for(&text, &roots)?;
        self.check_struct_references(&layouts)?;

        // 3. 资源
        let surface = self.surface_info(backend);
        let params = match layouts.get(PARAMS_STRUCT) {
            Some(layout) if !self.registry.uniforms().is_empty() => Some(backend.create_buffer(&BufferDesc {
                label: PARAMS_STRUCT.to_string(),
                size: u64::from(layout.total_bytes),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })),
            _ => None,
        };
        let global = ScopeObjects::create(backend, &self.registry, &layouts, surface)?;

        // 4. pipeline 与 bind group
        let mut passes = Vec::with_capacity(self.passes.len());
        for (pass, compiled) in self.passes.iter().zip(&compiled) {
            let objects = build_pass(backend, pass, compiled, &self.registry, &global, params, &layouts, surface)?;
            passes.push(Some(objects));
        }

        Ok(GpuState {
            layouts,
            compiled,
            params,
            global,
            passes,
            replaced: FxHashSet::default(),
        })
    }

    fn validate_declarations(&self) -> Result<()> {
        let has_compute = self.passes.iter().any(Pass::has_compute);
        let all_textures = self
            .registry
            .textures()
            .iter()
            .chain(self.passes.iter().flat_map(|p| p.local().textures()));
        for texture in all_textures {
            if texture.kind == TextureKind::BindingPair && !has_compute {
                return Err(WeaveError::ComputeShaderRequired(texture.name.clone()));
            }
        }

        for pass in &self.passes {
            let local = pass.local();
            let names = [
                (Collection::Uniforms, local.uniforms().iter().map(|d| d.name.as_str()).collect::<Vec<_>>()),
                (Collection::Storages, local.storages().iter().map(|d| d.name.as_str()).collect()),
                (Collection::Samplers, local.samplers().iter().map(|d| d.name.as_str()).collect()),
                (Collection::Textures, local.textures().iter().map(|d| d.name.as_str()).collect()),
                (Collection::Layers, local.layers().iter().map(|d| d.name.as_str()).collect()),
            ];
            for (collection, names) in names {
                if let Some(name) = names.into_iter().find(|n| self.registry.contains(collection, n)) {
                    return Err(WeaveError::DuplicateName {
                        collection: collection.name(),
                        name: name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn all_storages(&self) -> impl Iterator<Item = &StorageDecl> {
        self.registry
            .storages()
            .iter()
            .chain(self.passes.iter().flat_map(|p| p.local().storages()))
    }

    /// Every struct a storage names must be declared in some compiled shader.
    fn check_struct_references(&self, layouts: &LayoutSet) -> Result<()> {
        for storage in self.all_storages() {
            let ty = layouts.parse_type(&storage.type_name)?;
            if let Some(struct_name) = ty.struct_dependency()
                && !layouts.contains(struct_name)
            {
                return Err(WeaveError::UndeclaredStruct {
                    resource: storage.name.clone(),
                    struct_name: struct_name.to_string(),
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Frame
    // ========================================================================

    /// Runs one frame. Failures inside the frame are logged and the frame is
    /// skipped; only lifecycle misuse is returned as an error.
    pub fn update(&mut self) -> Result<()> {
        self.expect_state(OrchestratorState::Ready)?;
        self.state = OrchestratorState::Updating;
        if let Err(e) = self.run_frame() {
            log::error!("Frame skipped: {e}");
        }
        self.frame.end_frame();
        self.state = OrchestratorState::Ready;
        Ok(())
    }

    fn run_frame(&mut self) -> Result<()> {
        let Self {
            settings,
            registry,
            passes,
            listeners,
            frame,
            timer,
            external_frames,
            backend,
            gpu,
            ..
        } = self;
        let (Some(backend), Some(gpu)) = (backend.as_mut(), gpu.as_mut()) else {
            return Err(WeaveError::InvalidState {
                expected: OrchestratorState::Ready.name(),
                actual: OrchestratorState::Uninitialized.name(),
            });
        };

        // 1. 上一帧的回读
        backend.poll(false);
        collect_scope(backend, registry, &mut gpu.global, Some(listeners));
        for (pass, objects) in passes.iter().zip(&mut gpu.passes) {
            if let Some(objects) = objects {
                collect_scope(backend, pass.local(), &mut objects.local, None);
            }
        }

        // 2. 帧状态与 Params
        timer.tick();
        frame.advance(timer);
        for ((name, _), value) in BUILTIN_UNIFORMS.iter().zip(frame.values()) {
            if let Some(uniform) = registry.uniform_mut(name) {
                uniform.value = value;
            }
        }
        if let (Some(buffer), Some(layout)) = (gpu.params, gpu.layouts.get(PARAMS_STRUCT)) {
            let values: Vec<&[f32]> = registry.uniforms().iter().map(|u| u.value.as_slice()).collect();
            let bytes = encode_uniforms(layout, &values, &gpu.layouts)?;
            backend.write_buffer(buffer, 0, &bytes);
        }

        // 3. mapped storage 与外部纹理
        upload_mapped(backend, registry, &mut gpu.global);
        for (pass, objects) in passes.iter().zip(&mut gpu.passes) {
            if let Some(objects) = objects {
                upload_mapped(backend, pass.local(), &mut objects.local);
            }
        }
        for ((scope, name), pushed) in external_frames.drain() {
            let (owner, objects) = match scope {
                None => (&*registry, &mut gpu.global),
                Some(i) => match (passes.get(i), gpu.passes.get_mut(i).and_then(Option::as_mut)) {
                    (Some(pass), Some(objects)) => (pass.local(), &mut objects.local),
                    _ => continue,
                },
            };
            let Some(object) = owner
                .position(Collection::Textures, &name)
                .and_then(|index| objects.textures.get_mut(index))
            else {
                continue;
            };
            if object.desc.width != pushed.width || object.desc.height != pushed.height {
                object.desc.width = pushed.width;
                object.desc.height = pushed.height;
                gpu.replaced.insert(object.key);
                backend.destroy_texture(object.key);
                object.key = backend.create_texture(&object.desc);
            }
            backend.write_texture(object.key, 0, pushed.width, pushed.height, &pushed.rgba);
        }

        // 4. bind group
        if !gpu.replaced.is_empty() {
            rebuild_bind_groups(backend, gpu, registry, passes)?;
        }

        // 5. 命令
        let commands = encode_frame(gpu, registry, passes, settings);
        log::trace!("Submitting {} commands", commands.len());

        match backend.submit(&commands) {
            Ok(true) => start_readbacks(backend, gpu),
            Ok(false) => log::warn!("Frame skipped: surface unavailable"),
            Err(e) => log::error!("Frame submission failed: {e}"),
        }
        Ok(())
    }

    /// Reconfigures the surface and recreates the depth attachment and every
    /// frame copy target. Other resources keep their size.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.frame.resize(width, height);
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        backend.resize(width, height);
        let surface = SurfaceInfo {
            width,
            height,
            color_format: backend.color_format(),
            storage_format: self.settings.storage_format,
        };

        if let Some(gpu) = self.gpu.as_mut() {
            let replaced = gpu.global.recreate_copy_targets(backend, &self.registry, surface);
            gpu.replaced.extend(replaced);
            for (pass, objects) in self.passes.iter().zip(&mut gpu.passes) {
                if let Some(objects) = objects {
                    let replaced = objects.local.recreate_copy_targets(backend, pass.local(), surface);
                    gpu.replaced.extend(replaced);
                }
            }
        }
        log::info!("Resized to {width}x{height}");
    }

    /// Latest read-back values of a storage declared with `read_back`,
    /// waiting for an in-flight map to finish.
    pub fn read(&mut self, name: impl AsRef<str>) -> Result<Vec<f32>> {
        let name = name.as_ref();
        let (Some(backend), Some(gpu)) = (self.backend.as_mut(), self.gpu.as_mut()) else {
            return Err(WeaveError::InvalidState {
                expected: OrchestratorState::Ready.name(),
                actual: self.state.name(),
            });
        };

        let global = self
            .registry
            .position(Collection::Storages, name)
            .and_then(|i| gpu.global.storages.get_mut(i));
        let storage = match global {
            Some(storage) => Some(storage),
            None => self
                .passes
                .iter()
                .zip(gpu.passes.iter_mut())
                .find_map(|(pass, objects)| {
                    let index = pass.local().position(Collection::Storages, name)?;
                    objects.as_mut()?.local.storages.get_mut(index)
                }),
        };
        let slot = storage
            .and_then(|s| s.readback.as_mut())
            .ok_or_else(|| WeaveError::UnknownResource(format!("read-back storage '{name}'")))?;

        if slot.is_pending() {
            backend.poll(true);
            for values in slot.collect(backend) {
                if let Some(listener) = self.listeners.get_mut(name)
                    && let Some(payload) = fired_event(&values)
                {
                    listener(payload);
                }
            }
        }

        slot.latest()
            .map(<[f32]>::to_vec)
            .ok_or_else(|| WeaveError::Readback(format!("no read-back of '{name}' has completed")))
    }

    // ========================================================================
    // Destruction
    // ========================================================================

    /// Releases one pass's pipelines, bind groups, vertex buffer and local
    /// resources. The pass is skipped from then on.
    pub fn destroy_pass(&mut self, index: usize) -> Result<()> {
        if index >= self.passes.len() {
            return Err(WeaveError::PassIndexOutOfBounds(index));
        }
        let (Some(backend), Some(gpu)) = (self.backend.as_mut(), self.gpu.as_mut()) else {
            return Ok(());
        };
        if let Some(mut objects) = gpu.passes[index].take() {
            objects.release(backend);
            log::debug!("Destroyed pass '{}'", self.passes[index].label);
        }
        Ok(())
    }

    /// Releases every backend object.
    pub fn destroy(&mut self) {
        if let (Some(backend), Some(mut gpu)) = (self.backend.as_mut(), self.gpu.take()) {
            for objects in gpu.passes.iter_mut().flatten() {
                objects.release(backend);
            }
            gpu.global.release(backend);
            if let Some(params) = gpu.params {
                backend.destroy_buffer(params);
            }
        }
        self.state = OrchestratorState::Destroyed;
        log::info!("Orchestrator destroyed");
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    #[must_use]
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    #[must_use]
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    #[must_use]
    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    /// Passes with a vertex or fragment stage, with their indices.
    pub fn render_passes(&self) -> impl Iterator<Item = (usize, &Pass)> {
        self.passes.iter().enumerate().filter(|(_, p)| p.has_render())
    }

    /// Compiled shader text of a pass, available after init.
    #[must_use]
    pub fn compiled_shaders(&self, index: usize) -> Option<&CompiledPass> {
        self.gpu.as_ref()?.compiled.get(index)
    }

    #[must_use]
    pub fn struct_layouts(&self) -> Option<&LayoutSet> {
        self.gpu.as_ref().map(|gpu| &gpu.layouts)
    }

    #[must_use]
    pub fn params_layout(&self) -> Option<&StructLayout> {
        self.struct_layouts()?.get(PARAMS_STRUCT)
    }

    #[must_use]
    pub fn params_buffer(&self) -> Option<BufferKey> {
        self.gpu.as_ref()?.params
    }

    /// Backend buffer of a global storage.
    #[must_use]
    pub fn storage_buffer(&self, name: &str) -> Option<BufferKey> {
        let index = self.registry.position(Collection::Storages, name)?;
        Some(self.gpu.as_ref()?.global.storages.get(index)?.buffer)
    }

    /// Backend texture of a global texture resource.
    #[must_use]
    pub fn texture(&self, name: &str) -> Option<TextureKey> {
        let index = self.registry.position(Collection::Textures, name)?;
        Some(self.gpu.as_ref()?.global.textures.get(index)?.key)
    }

    /// Backend buffer of a storage local to pass `index`.
    #[must_use]
    pub fn local_storage_buffer(&self, index: usize, name: &str) -> Option<BufferKey> {
        let position = self.passes.get(index)?.local().position(Collection::Storages, name)?;
        let objects = self.gpu.as_ref()?.passes.get(index)?.as_ref()?;
        Some(objects.local.storages.get(position)?.buffer)
    }

    /// Backend texture of a texture local to pass `index`.
    #[must_use]
    pub fn local_texture(&self, index: usize, name: &str) -> Option<TextureKey> {
        let position = self.passes.get(index)?.local().position(Collection::Textures, name)?;
        let objects = self.gpu.as_ref()?.passes.get(index)?.as_ref()?;
        Some(objects.local.textures.get(position)?.key)
    }

    #[must_use]
    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> Option<&mut B> {
        self.backend.as_mut()
    }
}

impl Orchestrator<WgpuBackend> {
    /// Creates a wgpu backend for `window` and initializes on it.
    ///
    /// Returns `Ok(false)` when no adapter, device or surface is available so
    /// the host can fall back; declaration errors are still returned as `Err`.
    pub fn init_surface<W>(&mut self, window: W, width: u32, height: u32) -> Result<bool>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        match pollster::block_on(WgpuBackend::new(window, &self.settings, width, height)) {
            Ok(backend) => self.init(backend).map(|()| true),
            Err(e) if e.is_backend_unavailable() => {
                log::warn!("GPU backend unavailable: {e}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// Frame helpers
// ============================================================================

fn build_pass(
    backend: &mut impl GpuBackend,
    pass: &Pass,
    compiled: &CompiledPass,
    registry: &ResourceRegistry,
    global: &ScopeObjects,
    params: Option<BufferKey>,
    layouts: &LayoutSet,
    surface: SurfaceInfo,
) -> Result<PassObjects> {
    let local = ScopeObjects::create(backend, pass.local(), layouts, surface)?;
    let scopes = RegistryScopes::new(registry, Some(pass.local()));
    let mut objects = PassObjects {
        local,
        compute: None,
        render: None,
    };

    if let Some(stage) = &compiled.compute {
        let resources = bind_resources(&stage.bindings, scopes, params, global, &objects.local)?;
        let stage_objects = StageObjects::create(backend, format!("{} (compute)", pass.label), &stage.bindings, resources)?;
        let pipeline = backend.create_compute_pipeline(&ComputePipelineDesc {
            label: &pass.label,
            source: &stage.text,
            layout: stage_objects.layout,
        })?;
        objects.compute = Some(ComputeObjects {
            stage: stage_objects,
            pipeline,
        });
    }

    if let Some(vertex) = &compiled.vertex {
        let resources = bind_resources(&vertex.bindings, scopes, params, global, &objects.local)?;
        let vertex_objects = StageObjects::create(backend, format!("{} (vertex)", pass.label), &vertex.bindings, resources)?;

        let fragment_label = format!("{} (fragment)", pass.label);
        let fragment_objects = match &compiled.fragment {
            Some(fragment) => {
                let resources = bind_resources(&fragment.bindings, scopes, params, global, &objects.local)?;
                StageObjects::create(backend, fragment_label, &fragment.bindings, resources)?
            }
            None => StageObjects::empty(backend, fragment_label)?,
        };

        let pipeline = backend.create_render_pipeline(&RenderPipelineDesc {
            label: &pass.label,
            vertex_source: &vertex.text,
            fragment_source: compiled.fragment_text(),
            layouts: [vertex_objects.layout, fragment_objects.layout],
            options: &pass.render,
        })?;

        let vertices = if pass.meshes.is_empty() {
            flatten_meshes(&[Mesh::fullscreen_quad()])
        } else {
            flatten_meshes(&pass.meshes)
        };
        let vertex_buffer = backend.create_buffer(&BufferDesc {
            label: format!("{} (vertices)", pass.label),
            size: (vertices.len() as u64 * Vertex::STRIDE).max(Vertex::STRIDE),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        });
        backend.write_buffer(vertex_buffer, 0, bytemuck::cast_slice(&vertices));

        objects.render = Some(RenderObjects {
            vertex: vertex_objects,
            fragment: fragment_objects,
            pipeline,
            vertex_buffer,
            vertex_count: vertices.len() as u32,
        });
    }

    log::debug!("Built pass '{}'", pass.label);
    Ok(objects)
}

fn collect_scope(
    backend: &mut impl GpuBackend,
    registry: &ResourceRegistry,
    objects: &mut ScopeObjects,
    mut listeners: Option<&mut FxHashMap<String, EventListener>>,
) {
    for (decl, storage) in registry.storages().iter().zip(&mut objects.storages) {
        let Some(slot) = storage.readback.as_mut() else {
            continue;
        };
        for values in slot.collect(backend) {
            if let Some(listener) = listeners.as_deref_mut().and_then(|l| l.get_mut(&decl.name))
                && let Some(payload) = fired_event(&values)
            {
                listener(payload);
            }
        }
    }
}

fn upload_mapped(backend: &mut impl GpuBackend, registry: &ResourceRegistry, objects: &mut ScopeObjects) {
    for (decl, storage) in registry.storages().iter().zip(&mut objects.storages) {
        if !decl.mapped || decl.version() == storage.uploaded_version {
            continue;
        }
        let mut bytes: &[u8] = bytemuck::cast_slice(&decl.data);
        if bytes.len() as u64 > storage.size {
            log::warn!(
                "Mapped storage '{}' grew to {} bytes, uploading the first {}",
                decl.name,
                bytes.len(),
                storage.size
            );
            bytes = &bytes[..storage.size as usize];
        }
        backend.write_buffer(storage.buffer, 0, bytes);
        storage.uploaded_version = decl.version();
    }
}

/// Rebuilds the bind groups referencing replaced textures. On failure the
/// replaced set is kept so the next frame retries the stages still stale.
fn rebuild_bind_groups(
    backend: &mut impl GpuBackend,
    gpu: &mut GpuState,
    registry: &ResourceRegistry,
    passes: &[Pass],
) -> Result<()> {
    let replaced = std::mem::take(&mut gpu.replaced);
    let outcome = rebind_stages(backend, gpu, registry, passes, &replaced);
    if outcome.is_err() {
        gpu.replaced.extend(replaced);
    }
    outcome
}

fn rebind_stages(
    backend: &mut impl GpuBackend,
    gpu: &mut GpuState,
    registry: &ResourceRegistry,
    passes: &[Pass],
    replaced: &FxHashSet<TextureKey>,
) -> Result<()> {
    for ((pass, compiled), objects) in passes.iter().zip(&gpu.compiled).zip(&mut gpu.passes) {
        let Some(objects) = objects else {
            continue;
        };
        let scopes = RegistryScopes::new(registry, Some(pass.local()));
        let mut pending: Vec<(&CompiledStage, &mut StageObjects)> = Vec::new();
        if let (Some(stage), Some(compute)) = (compiled.compute.as_ref(), objects.compute.as_mut()) {
            pending.push((stage, &mut compute.stage));
        }
        if let Some(render) = objects.render.as_mut() {
            if let Some(stage) = compiled.vertex.as_ref() {
                pending.push((stage, &mut render.vertex));
            }
            if let Some(stage) = compiled.fragment.as_ref() {
                pending.push((stage, &mut render.fragment));
            }
        }

        for (stage, stage_objects) in pending {
            if !stage_objects.uses_any(replaced) {
                continue;
            }
            let resources = bind_resources(&stage.bindings, scopes, gpu.params, &gpu.global, &objects.local)?;
            stage_objects.rebind(backend, resources)?;
        }
    }
    Ok(())
}

fn encode_frame(
    gpu: &GpuState,
    registry: &ResourceRegistry,
    passes: &[Pass],
    settings: &OrchestratorSettings,
) -> Vec<GpuCommand> {
    let mut commands = Vec::new();
    let live = |index: usize| gpu.passes.get(index).and_then(Option::as_ref);

    for (index, pass) in passes.iter().enumerate() {
        if !pass.enabled {
            continue;
        }
        if let Some(compute) = live(index).and_then(|o| o.compute.as_ref()) {
            commands.push(GpuCommand::Dispatch {
                pass: index,
                pipeline: compute.pipeline,
                bind_group: compute.stage.bind_group,
                workgroups: pass.workgroups,
            });
        }
    }

    let drawn = |index: usize| {
        passes.get(index).is_some_and(|p| p.enabled) && live(index).is_some_and(|o| o.render.is_some())
    };
    let last_render = (0..passes.len()).rev().find(|i| drawn(*i));
    // 指定的 pass 本帧不绘制时, 退回到最后一个绘制的 pass
    let copy_after = |after_pass: Option<usize>| after_pass.filter(|i| drawn(*i)).or(last_render);

    let mut copy_targets = Vec::new();
    for (decl, object) in registry.textures().iter().zip(&gpu.global.textures) {
        if let Some(copy) = decl.copy_from_frame {
            copy_targets.push((copy.after_pass, object.key));
        }
    }
    for (pass, objects) in passes.iter().zip(&gpu.passes) {
        if let Some(objects) = objects {
            for (decl, object) in pass.local().textures().iter().zip(&objects.local.textures) {
                if let Some(copy) = decl.copy_from_frame {
                    copy_targets.push((copy.after_pass, object.key));
                }
            }
        }
    }

    for (index, pass) in passes.iter().enumerate() {
        if !pass.enabled {
            continue;
        }
        let Some(render) = live(index).and_then(|o| o.render.as_ref()) else {
            continue;
        };
        let clear_color = match pass.render.color_load {
            LoadMode::Clear(Some([r, g, b, a])) => Some(wgpu::Color { r, g, b, a }),
            LoadMode::Clear(None) => Some(settings.wgpu_clear_color()),
            LoadMode::Load => None,
        };
        commands.push(GpuCommand::Draw {
            pass: index,
            pipeline: render.pipeline,
            bind_groups: [render.vertex.bind_group, render.fragment.bind_group],
            vertex_buffer: render.vertex_buffer,
            vertex_count: render.vertex_count,
            clear_color,
            clear_depth: pass.render.clear_depth,
        });
        for (after_pass, texture) in &copy_targets {
            if copy_after(*after_pass) == Some(index) {
                commands.push(GpuCommand::CopyFrameToTexture { texture: *texture });
            }
        }
    }

    let scopes = std::iter::once(&gpu.global).chain(gpu.passes.iter().flatten().map(|o| &o.local));
    for scope in scopes {
        for storage in &scope.storages {
            let Some(slot) = &storage.readback else {
                continue;
            };
            match slot.next_staging() {
                Some(destination) => commands.push(GpuCommand::CopyBuffer {
                    source: storage.buffer,
                    destination,
                    size: slot.size,
                }),
                None => log::debug!("Every read-back buffer is in flight, skipping a copy"),
            }
        }
    }

    commands
}

fn start_readbacks(backend: &mut impl GpuBackend, gpu: &mut GpuState) {
    let scopes = std::iter::once(&mut gpu.global).chain(gpu.passes.iter_mut().flatten().map(|o| &mut o.local));
    for scope in scopes {
        for slot in scope.storages.iter_mut().filter_map(|s| s.readback.as_mut()) {
            slot.start(backend);
        }
    }
}
