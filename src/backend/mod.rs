//! GPU backend seam
//!
//! The orchestrator never touches wgpu objects directly. It creates
//! resources through [`GpuBackend`], addresses them with typed slotmap keys
//! and submits each frame as one ordered list of [`GpuCommand`]s.
//!
//! - [`WgpuBackend`]: device, queue and surface of a real adapter
//! - [`RecordingBackend`]: headless and deterministic, records every call

use crate::errors::Result;
use crate::pass::RenderOptions;
use crate::resources::SamplerDescriptor;

pub mod recording;
pub mod wgpu_backend;

pub use recording::RecordingBackend;
pub use wgpu_backend::WgpuBackend;

slotmap::new_key_type! {
    pub struct BufferKey;
    pub struct TextureKey;
    pub struct SamplerKey;
    pub struct BindGroupLayoutKey;
    pub struct BindGroupKey;
    pub struct PipelineKey;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
    pub view_dimension: wgpu::TextureViewDimension,
}

/// One entry of a bind group; its position is its binding index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindResource {
    Buffer(BufferKey),
    Texture(TextureKey),
    Sampler(SamplerKey),
}

#[derive(Debug, Clone, Copy)]
pub struct ComputePipelineDesc<'a> {
    pub label: &'a str,
    pub source: &'a str,
    pub layout: BindGroupLayoutKey,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderPipelineDesc<'a> {
    pub label: &'a str,
    pub vertex_source: &'a str,
    pub fragment_source: Option<&'a str>,
    /// `[vertex group, fragment group]`
    pub layouts: [BindGroupLayoutKey; 2],
    pub options: &'a RenderOptions,
}

/// Frame work, executed in list order.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    Dispatch {
        pass: usize,
        pipeline: PipelineKey,
        bind_group: BindGroupKey,
        workgroups: [u32; 3],
    },
    Draw {
        pass: usize,
        pipeline: PipelineKey,
        bind_groups: [BindGroupKey; 2],
        vertex_buffer: BufferKey,
        vertex_count: u32,
        /// `None` keeps the current color attachment contents.
        clear_color: Option<wgpu::Color>,
        clear_depth: bool,
    },
    /// Copies the frame's color output into a texture of the same format.
    CopyFrameToTexture { texture: TextureKey },
    CopyBuffer {
        source: BufferKey,
        destination: BufferKey,
        size: u64,
    },
}

impl GpuCommand {
    /// Pass index of dispatch and draw commands.
    #[must_use]
    pub fn pass(&self) -> Option<usize> {
        match self {
            Self::Dispatch { pass, .. } | Self::Draw { pass, .. } => Some(*pass),
            _ => None,
        }
    }

    #[must_use]
    pub fn bind_groups(&self) -> Vec<BindGroupKey> {
        match self {
            Self::Dispatch { bind_group, .. } => vec![*bind_group],
            Self::Draw { bind_groups, .. } => bind_groups.to_vec(),
            _ => Vec::new(),
        }
    }
}

/// Completion signal of [`GpuBackend::map_read`].
pub type MapReceiver = flume::Receiver<Result<()>>;

pub trait GpuBackend {
    /// Current color target size.
    fn surface_size(&self) -> (u32, u32);
    /// Format of the color target, also used by frame copy textures.
    fn color_format(&self) -> wgpu::TextureFormat;
    /// Reconfigures the color target and recreates the depth attachment.
    fn resize(&mut self, width: u32, height: u32);

    fn create_buffer(&mut self, desc: &BufferDesc) -> BufferKey;
    fn write_buffer(&mut self, buffer: BufferKey, offset: u64, data: &[u8]);
    fn destroy_buffer(&mut self, buffer: BufferKey);

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureKey;
    /// Uploads tightly packed RGBA8 texels into one array layer.
    fn write_texture(&mut self, texture: TextureKey, layer: u32, width: u32, height: u32, rgba: &[u8]);
    fn destroy_texture(&mut self, texture: TextureKey);

    fn create_sampler(&mut self, label: &str, desc: &SamplerDescriptor) -> SamplerKey;
    fn destroy_sampler(&mut self, sampler: SamplerKey);

    fn create_bind_group_layout(&mut self, label: &str, entries: &[wgpu::BindGroupLayoutEntry]) -> BindGroupLayoutKey;
    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutKey);
    fn create_bind_group(
        &mut self,
        label: &str,
        layout: BindGroupLayoutKey,
        resources: &[BindResource],
    ) -> Result<BindGroupKey>;
    fn destroy_bind_group(&mut self, group: BindGroupKey);

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc<'_>) -> Result<PipelineKey>;
    fn create_render_pipeline(&mut self, desc: &RenderPipelineDesc<'_>) -> Result<PipelineKey>;
    fn destroy_pipeline(&mut self, pipeline: PipelineKey);

    /// Encodes and submits one frame. Returns `Ok(false)` when the frame was
    /// skipped, e.g. because the surface was lost.
    fn submit(&mut self, commands: &[GpuCommand]) -> Result<bool>;

    /// Starts mapping the first `size` bytes of `buffer` for reading. Never blocks.
    fn map_read(&mut self, buffer: BufferKey, size: u64) -> MapReceiver;
    /// Drives pending maps; blocks until the queue is idle when `wait` is set.
    fn poll(&mut self, wait: bool);
    /// Copies out a mapped range and unmaps the buffer.
    fn read_mapped(&mut self, buffer: BufferKey, size: u64) -> Result<Vec<u8>>;
}
