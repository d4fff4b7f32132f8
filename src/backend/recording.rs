//! Recording Backend
//!
//! A headless [`GpuBackend`] that executes nothing on a GPU. It keeps the
//! byte contents of every buffer, applies buffer writes and buffer-to-buffer
//! copies, resolves map requests on the next poll (or later, see
//! [`RecordingBackend::defer_maps`]), and records every frame
//! submitted to it. Bind groups are checked against their layout the way a
//! real device validates them.

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::backend::{
    BindGroupKey, BindGroupLayoutKey, BindResource, BufferDesc, BufferKey, ComputePipelineDesc, GpuBackend,
    GpuCommand, MapReceiver, PipelineKey, RenderPipelineDesc, SamplerKey, TextureDesc, TextureKey,
};
use crate::errors::{Result, WeaveError};
use crate::resources::SamplerDescriptor;

#[derive(Debug, Clone)]
pub struct RecordedBuffer {
    pub desc: BufferDesc,
    pub data: Vec<u8>,
    pub mapped: bool,
}

#[derive(Debug, Clone)]
pub struct RecordedTexture {
    pub desc: TextureDesc,
    /// Number of `write_texture` calls per layer.
    pub uploads: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct RecordedBindGroup {
    pub label: String,
    pub layout: BindGroupLayoutKey,
    pub resources: Vec<BindResource>,
}

#[derive(Debug, Clone)]
pub enum RecordedPipeline {
    Compute {
        label: String,
        source: String,
    },
    Render {
        label: String,
        vertex_source: String,
        fragment_source: Option<String>,
    },
}

impl RecordedPipeline {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Compute { label, .. } | Self::Render { label, .. } => label,
        }
    }
}

struct PendingMap {
    buffer: BufferKey,
    sender: flume::Sender<Result<()>>,
    /// Non-blocking polls left before the map resolves.
    polls_left: u32,
}

pub struct RecordingBackend {
    size: (u32, u32),
    format: wgpu::TextureFormat,
    resize_count: u32,

    buffers: SlotMap<BufferKey, RecordedBuffer>,
    textures: SlotMap<TextureKey, RecordedTexture>,
    samplers: SlotMap<SamplerKey, SamplerDescriptor>,
    layouts: SlotMap<BindGroupLayoutKey, Vec<wgpu::BindGroupLayoutEntry>>,
    bind_groups: SlotMap<BindGroupKey, RecordedBindGroup>,
    pipelines: SlotMap<PipelineKey, RecordedPipeline>,

    pending_maps: Vec<PendingMap>,
    submissions: Vec<Vec<GpuCommand>>,
    /// Frames for which `submit` reports a lost surface.
    lose_next_frames: u32,
    /// Bind group creations that fail before the device accepts them again.
    failing_bind_groups: u32,
    map_latency: u32,
    bind_group_builds: FxHashMap<String, u32>,
}

impl RecordingBackend {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width.max(1), height.max(1)),
            format: wgpu::TextureFormat::Bgra8Unorm,
            resize_count: 0,
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            layouts: SlotMap::with_key(),
            bind_groups: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            pending_maps: Vec::new(),
            submissions: Vec::new(),
            lose_next_frames: 0,
            failing_bind_groups: 0,
            map_latency: 0,
            bind_group_builds: FxHashMap::default(),
        }
    }

    /// Makes the next `frames` submissions report a lost surface.
    pub fn lose_surface(&mut self, frames: u32) {
        self.lose_next_frames = frames;
    }

    /// Makes map requests resolve only after `polls` further non-blocking
    /// polls. A blocking poll always resolves everything.
    pub fn defer_maps(&mut self, polls: u32) {
        self.map_latency = polls;
    }

    /// Makes the next `count` bind group creations fail.
    pub fn fail_bind_groups(&mut self, count: u32) {
        self.failing_bind_groups = count;
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    #[must_use]
    pub fn submissions(&self) -> &[Vec<GpuCommand>] {
        &self.submissions
    }

    #[must_use]
    pub fn last_submission(&self) -> Option<&[GpuCommand]> {
        self.submissions.last().map(Vec::as_slice)
    }

    #[must_use]
    pub fn buffer(&self, key: BufferKey) -> Option<&RecordedBuffer> {
        self.buffers.get(key)
    }

    #[must_use]
    pub fn buffer_data(&self, key: BufferKey) -> Option<&[u8]> {
        self.buffers.get(key).map(|b| b.data.as_slice())
    }

    #[must_use]
    pub fn texture(&self, key: TextureKey) -> Option<&RecordedTexture> {
        self.textures.get(key)
    }

    #[must_use]
    pub fn bind_group(&self, key: BindGroupKey) -> Option<&RecordedBindGroup> {
        self.bind_groups.get(key)
    }

    #[must_use]
    pub fn bind_group_layout(&self, key: BindGroupLayoutKey) -> Option<&[wgpu::BindGroupLayoutEntry]> {
        self.layouts.get(key).map(Vec::as_slice)
    }

    #[must_use]
    pub fn pipeline(&self, key: PipelineKey) -> Option<&RecordedPipeline> {
        self.pipelines.get(key)
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &RecordedPipeline> {
        self.pipelines.values()
    }

    /// How many times a bind group with `label` was created.
    #[must_use]
    pub fn bind_group_builds(&self, label: &str) -> u32 {
        self.bind_group_builds.get(label).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn resize_count(&self) -> u32 {
        self.resize_count
    }

    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn live_bind_groups(&self) -> usize {
        self.bind_groups.len()
    }

    #[must_use]
    pub fn live_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    #[must_use]
    pub fn pending_maps(&self) -> usize {
        self.pending_maps.len()
    }

    fn validate_bind_group(
        &self,
        label: &str,
        entries: &[wgpu::BindGroupLayoutEntry],
        resources: &[BindResource],
    ) -> Result<()> {
        if entries.len() != resources.len() {
            return Err(WeaveError::BindGroupMismatch(format!(
                "bind group '{label}' has {} resources, layout expects {}",
                resources.len(),
                entries.len()
            )));
        }
        for (entry, resource) in entries.iter().zip(resources) {
            let live = match resource {
                BindResource::Buffer(key) => self.buffers.contains_key(*key),
                BindResource::Texture(key) => self.textures.contains_key(*key),
                BindResource::Sampler(key) => self.samplers.contains_key(*key),
            };
            let matches = matches!(
                (entry.ty, resource),
                (wgpu::BindingType::Buffer { .. }, BindResource::Buffer(_))
                    | (
                        wgpu::BindingType::Texture { .. } | wgpu::BindingType::StorageTexture { .. },
                        BindResource::Texture(_)
                    )
                    | (wgpu::BindingType::Sampler(_), BindResource::Sampler(_))
            );
            if !live || !matches {
                return Err(WeaveError::BindGroupMismatch(format!(
                    "bind group '{label}' binding {} does not match its layout entry",
                    entry.binding
                )));
            }
        }
        Ok(())
    }
}

impl GpuBackend for RecordingBackend {
    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn color_format(&self) -> wgpu::TextureFormat {
        self.format
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.size = (width, height);
        self.resize_count += 1;
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> BufferKey {
        self.buffers.insert(RecordedBuffer {
            desc: desc.clone(),
            data: vec![0; desc.size as usize],
            mapped: false,
        })
    }

    fn write_buffer(&mut self, buffer: BufferKey, offset: u64, data: &[u8]) {
        let Some(buffer) = self.buffers.get_mut(buffer) else {
            return;
        };
        let start = offset as usize;
        let end = (start + data.len()).min(buffer.data.len());
        if start < end {
            buffer.data[start..end].copy_from_slice(&data[..end - start]);
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferKey) {
        self.buffers.remove(buffer);
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureKey {
        self.textures.insert(RecordedTexture {
            desc: desc.clone(),
            uploads: vec![0; desc.layers.max(1) as usize],
        })
    }

    fn write_texture(&mut self, texture: TextureKey, layer: u32, _width: u32, _height: u32, _rgba: &[u8]) {
        if let Some(count) = self
            .textures
            .get_mut(texture)
            .and_then(|t| t.uploads.get_mut(layer as usize))
        {
            *count += 1;
        }
    }

    fn destroy_texture(&mut self, texture: TextureKey) {
        self.textures.remove(texture);
    }

    fn create_sampler(&mut self, _label: &str, desc: &SamplerDescriptor) -> SamplerKey {
        self.samplers.insert(*desc)
    }

    fn destroy_sampler(&mut self, sampler: SamplerKey) {
        self.samplers.remove(sampler);
    }

    fn create_bind_group_layout(&mut self, _label: &str, entries: &[wgpu::BindGroupLayoutEntry]) -> BindGroupLayoutKey {
        self.layouts.insert(entries.to_vec())
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutKey) {
        self.layouts.remove(layout);
    }

    fn create_bind_group(
        &mut self,
        label: &str,
        layout: BindGroupLayoutKey,
        resources: &[BindResource],
    ) -> Result<BindGroupKey> {
        let entries = self
            .layouts
            .get(layout)
            .ok_or_else(|| WeaveError::UnknownResource(format!("bind group layout of '{label}'")))?;
        self.validate_bind_group(label, entries, resources)?;
        if self.failing_bind_groups > 0 {
            self.failing_bind_groups -= 1;
            return Err(WeaveError::BindGroupMismatch(format!("bind group '{label}' was rejected")));
        }

        *self.bind_group_builds.entry(label.to_string()).or_default() += 1;
        Ok(self.bind_groups.insert(RecordedBindGroup {
            label: label.to_string(),
            layout,
            resources: resources.to_vec(),
        }))
    }

    fn destroy_bind_group(&mut self, group: BindGroupKey) {
        self.bind_groups.remove(group);
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc<'_>) -> Result<PipelineKey> {
        if !self.layouts.contains_key(desc.layout) {
            return Err(WeaveError::UnknownResource(format!("layout of '{}'", desc.label)));
        }
        Ok(self.pipelines.insert(RecordedPipeline::Compute {
            label: desc.label.to_string(),
            source: desc.source.to_string(),
        }))
    }

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDesc<'_>) -> Result<PipelineKey> {
        if desc.layouts.iter().any(|l| !self.layouts.contains_key(*l)) {
            return Err(WeaveError::UnknownResource(format!("layouts of '{}'", desc.label)));
        }
        Ok(self.pipelines.insert(RecordedPipeline::Render {
            label: desc.label.to_string(),
            vertex_source: desc.vertex_source.to_string(),
            fragment_source: desc.fragment_source.map(str::to_string),
        }))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineKey) {
        self.pipelines.remove(pipeline);
    }

    fn submit(&mut self, commands: &[GpuCommand]) -> Result<bool> {
        let needs_frame = commands
            .iter()
            .any(|c| matches!(c, GpuCommand::Draw { .. } | GpuCommand::CopyFrameToTexture { .. }));
        if needs_frame && self.lose_next_frames > 0 {
            self.lose_next_frames -= 1;
            return Ok(false);
        }

        for command in commands {
            for group in command.bind_groups() {
                if !self.bind_groups.contains_key(group) {
                    return Err(WeaveError::UnknownResource("bind group".to_string()));
                }
            }
            if let GpuCommand::CopyBuffer {
                source,
                destination,
                size,
            } = command
            {
                let bytes = self
                    .buffers
                    .get(*source)
                    .map(|b| b.data[..(*size as usize).min(b.data.len())].to_vec())
                    .ok_or_else(|| WeaveError::UnknownResource("copy source buffer".to_string()))?;
                let target = self
                    .buffers
                    .get_mut(*destination)
                    .ok_or_else(|| WeaveError::UnknownResource("copy destination buffer".to_string()))?;
                if target.mapped {
                    return Err(WeaveError::Readback("copy into a mapped buffer".to_string()));
                }
                let len = bytes.len().min(target.data.len());
                target.data[..len].copy_from_slice(&bytes[..len]);
            }
        }

        self.submissions.push(commands.to_vec());
        Ok(true)
    }

    fn map_read(&mut self, buffer: BufferKey, _size: u64) -> MapReceiver {
        let (sender, receiver) = flume::bounded(1);
        self.pending_maps.push(PendingMap {
            buffer,
            sender,
            polls_left: self.map_latency,
        });
        receiver
    }

    fn poll(&mut self, wait: bool) {
        let mut still_pending = Vec::new();
        for mut pending in self.pending_maps.drain(..) {
            if !wait && pending.polls_left > 0 {
                pending.polls_left -= 1;
                still_pending.push(pending);
                continue;
            }
            let result = match self.buffers.get_mut(pending.buffer) {
                Some(buffer) => {
                    buffer.mapped = true;
                    Ok(())
                }
                None => Err(WeaveError::Readback("buffer was released".to_string())),
            };
            let _ = pending.sender.send(result);
        }
        self.pending_maps = still_pending;
    }

    fn read_mapped(&mut self, buffer: BufferKey, size: u64) -> Result<Vec<u8>> {
        let buffer = self
            .buffers
            .get_mut(buffer)
            .ok_or_else(|| WeaveError::Readback("buffer was released".to_string()))?;
        if !buffer.mapped {
            return Err(WeaveError::Readback("buffer is not mapped".to_string()));
        }
        buffer.mapped = false;
        Ok(buffer.data[..(size as usize).min(buffer.data.len())].to_vec())
    }
}
