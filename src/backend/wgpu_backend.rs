//! wgpu Backend
//!
//! [`WgpuBackend`] holds the core GPU handles (device, queue, surface and
//! config), the depth attachment, and every object the orchestrator created,
//! keyed by typed slotmap keys.
//!
//! Without a window it renders into an offscreen color texture of the same
//! format a surface would use, which keeps compute-only and test setups
//! working on machines without a display.

use std::borrow::Cow;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use slotmap::SlotMap;

use crate::backend::{
    BindGroupKey, BindGroupLayoutKey, BindResource, BufferDesc, BufferKey, ComputePipelineDesc, GpuBackend,
    GpuCommand, MapReceiver, PipelineKey, RenderPipelineDesc, SamplerKey, TextureDesc, TextureKey,
};
use crate::errors::{Result, WeaveError};
use crate::resources::{SamplerDescriptor, Vertex};
use crate::settings::OrchestratorSettings;

const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

enum GpuPipeline {
    Compute(wgpu::ComputePipeline),
    Render(wgpu::RenderPipeline),
}

/// Where frames are drawn.
enum ColorTarget {
    Surface(wgpu::Surface<'static>),
    Offscreen(GpuTexture),
}

pub struct WgpuBackend {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    target: ColorTarget,

    depth_format: wgpu::TextureFormat,
    depth_view: wgpu::TextureView,

    buffers: SlotMap<BufferKey, wgpu::Buffer>,
    textures: SlotMap<TextureKey, GpuTexture>,
    samplers: SlotMap<SamplerKey, wgpu::Sampler>,
    layouts: SlotMap<BindGroupLayoutKey, wgpu::BindGroupLayout>,
    bind_groups: SlotMap<BindGroupKey, wgpu::BindGroup>,
    pipelines: SlotMap<PipelineKey, GpuPipeline>,
}

impl WgpuBackend {
    /// Creates a backend presenting to `window`.
    pub async fn new<W>(window: W, settings: &OrchestratorSettings, width: u32, height: u32) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let instance = wgpu::Instance::default();
        let surface = instance.create_surface(window)?;
        let adapter = Self::request_adapter(&instance, settings, Some(&surface)).await?;
        let (device, queue) = Self::request_device(&adapter).await?;

        let mut config = surface
            .get_default_config(&adapter, width.max(1), height.max(1))
            .ok_or_else(|| WeaveError::Surface("Surface not supported by adapter".to_string()))?;
        config.usage = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC;
        config.present_mode = if settings.vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };
        surface.configure(&device, &config);

        log::info!(
            "wgpu backend ready: {} ({:?}), surface {}x{} {:?}",
            adapter.get_info().name,
            adapter.get_info().backend,
            config.width,
            config.height,
            config.format
        );

        Ok(Self::assemble(device, queue, config, ColorTarget::Surface(surface), settings))
    }

    /// Creates a backend rendering into an offscreen texture of `settings.default_size`.
    pub async fn headless(settings: &OrchestratorSettings) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = Self::request_adapter(&instance, settings, None).await?;
        let (device, queue) = Self::request_device(&adapter).await?;

        let (width, height) = settings.default_size;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            format: OFFSCREEN_FORMAT,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::AutoNoVsync,
            desired_maximum_frame_latency: 2,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
        };
        let offscreen = Self::create_offscreen(&device, &config);

        log::info!("wgpu headless backend ready: {}", adapter.get_info().name);
        Ok(Self::assemble(device, queue, config, ColorTarget::Offscreen(offscreen), settings))
    }

    async fn request_adapter(
        instance: &wgpu::Instance,
        settings: &OrchestratorSettings,
        surface: Option<&wgpu::Surface<'_>>,
    ) -> Result<wgpu::Adapter> {
        instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: settings.power_preference.into(),
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| WeaveError::AdapterRequestFailed(e.to_string()))
    }

    async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Weave Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;
        Ok((device, queue))
    }

    fn assemble(
        device: wgpu::Device,
        queue: wgpu::Queue,
        config: wgpu::SurfaceConfiguration,
        target: ColorTarget,
        settings: &OrchestratorSettings,
    ) -> Self {
        let depth_format = settings.depth_format.into();
        let depth_view = Self::create_depth_texture(&device, &config, depth_format);
        Self {
            device,
            queue,
            config,
            target,
            depth_format,
            depth_view,
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            layouts: SlotMap::with_key(),
            bind_groups: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
        }
    }

    fn create_depth_texture(
        device: &wgpu::Device,
        config: &wgpu::SurfaceConfiguration,
        format: wgpu::TextureFormat,
    ) -> wgpu::TextureView {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Texture"),
            size: wgpu::Extent3d {
                width: config.width,
                height: config.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    fn create_offscreen(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration) -> GpuTexture {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Color"),
            size: wgpu::Extent3d {
                width: config.width,
                height: config.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: config.format,
            usage: config.usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture { texture, view }
    }

    fn shader_module(&self, label: &str, source: &str) -> wgpu::ShaderModule {
        self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(source.to_string())),
        })
    }
}

impl GpuBackend for WgpuBackend {
    fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn color_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        match &mut self.target {
            ColorTarget::Surface(surface) => surface.configure(&self.device, &self.config),
            ColorTarget::Offscreen(texture) => *texture = Self::create_offscreen(&self.device, &self.config),
        }
        self.depth_view = Self::create_depth_texture(&self.device, &self.config, self.depth_format);
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> BufferKey {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size: desc.size,
            usage: desc.usage,
            mapped_at_creation: false,
        });
        self.buffers.insert(buffer)
    }

    fn write_buffer(&mut self, buffer: BufferKey, offset: u64, data: &[u8]) {
        if let Some(buffer) = self.buffers.get(buffer) {
            self.queue.write_buffer(buffer, offset, data);
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferKey) {
        if let Some(buffer) = self.buffers.remove(buffer) {
            buffer.destroy();
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureKey {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth_or_array_layers: desc.layers.max(1),
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage: desc.usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&desc.label),
            dimension: Some(desc.view_dimension),
            ..Default::default()
        });
        self.textures.insert(GpuTexture { texture, view })
    }

    fn write_texture(&mut self, texture: TextureKey, layer: u32, width: u32, height: u32, rgba: &[u8]) {
        let Some(texture) = self.textures.get(texture) else {
            return;
        };
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn destroy_texture(&mut self, texture: TextureKey) {
        if let Some(texture) = self.textures.remove(texture) {
            texture.texture.destroy();
        }
    }

    fn create_sampler(&mut self, label: &str, desc: &SamplerDescriptor) -> SamplerKey {
        let sampler = self.device.create_sampler(&desc.to_wgpu(Some(label)));
        self.samplers.insert(sampler)
    }

    fn destroy_sampler(&mut self, sampler: SamplerKey) {
        self.samplers.remove(sampler);
    }

    fn create_bind_group_layout(&mut self, label: &str, entries: &[wgpu::BindGroupLayoutEntry]) -> BindGroupLayoutKey {
        let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries,
        });
        self.layouts.insert(layout)
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
        let layout = self
            .layouts
            .get(layout)
            .ok_or_else(|| WeaveError::UnknownResource(format!("bind group layout of '{label}'")))?;

        let mut entries = Vec::with_capacity(resources.len());
        for (binding, resource) in resources.iter().enumerate() {
            let resource = match resource {
                BindResource::Buffer(key) => self
                    .buffers
                    .get(*key)
                    .map(|b| b.as_entire_binding()),
                BindResource::Texture(key) => self
                    .textures
                    .get(*key)
                    .map(|t| wgpu::BindingResource::TextureView(&t.view)),
                BindResource::Sampler(key) => self.samplers.get(*key).map(wgpu::BindingResource::Sampler),
            }
            .ok_or_else(|| WeaveError::UnknownResource(format!("binding {binding} of '{label}'")))?;
            entries.push(wgpu::BindGroupEntry {
                binding: binding as u32,
                resource,
            });
        }

        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &entries,
        });
        Ok(self.bind_groups.insert(group))
    }

    fn destroy_bind_group(&mut self, group: BindGroupKey) {
        self.bind_groups.remove(group);
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc<'_>) -> Result<PipelineKey> {
        let layout = self
            .layouts
            .get(desc.layout)
            .ok_or_else(|| WeaveError::UnknownResource(format!("layout of '{}'", desc.label)))?;

        let module = self.shader_module(desc.label, desc.source);
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(desc.label),
            bind_group_layouts: &[Some(layout)],
            immediate_size: 0,
        });
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(desc.label),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        log::debug!("Created compute pipeline '{}'", desc.label);
        Ok(self.pipelines.insert(GpuPipeline::Compute(pipeline)))
    }

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDesc<'_>) -> Result<PipelineKey> {
        let [vertex_layout, fragment_layout] = desc.layouts;
        let (Some(vertex_layout), Some(fragment_layout)) =
            (self.layouts.get(vertex_layout), self.layouts.get(fragment_layout))
        else {
            return Err(WeaveError::UnknownResource(format!("layouts of '{}'", desc.label)));
        };

        let options = desc.options;
        let vertex_module = self.shader_module(desc.label, desc.vertex_source);
        let fragment_module = desc.fragment_source.map(|source| self.shader_module(desc.label, source));
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(desc.label),
            bind_group_layouts: &[Some(vertex_layout), Some(fragment_layout)],
            immediate_size: 0,
        });
        let targets = [Some(wgpu::ColorTargetState {
            format: self.config.format,
            blend: options.blend,
            write_mask: wgpu::ColorWrites::ALL,
        })];

        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(desc.label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some("main"),
                buffers: &[Vertex::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: fragment_module.as_ref().map(|module| wgpu::FragmentState {
                module,
                entry_point: Some("main"),
                targets: &targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: options.topology,
                cull_mode: options.cull_mode,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: self.depth_format,
                depth_write_enabled: Some(options.depth_write),
                depth_compare: Some(options.depth_compare),
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });
        log::debug!("Created render pipeline '{}'", desc.label);
        Ok(self.pipelines.insert(GpuPipeline::Render(pipeline)))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineKey) {
        self.pipelines.remove(pipeline);
    }

    fn submit(&mut self, commands: &[GpuCommand]) -> Result<bool> {
        let needs_frame = commands
            .iter()
            .any(|c| matches!(c, GpuCommand::Draw { .. } | GpuCommand::CopyFrameToTexture { .. }));

        let surface_texture = match (&self.target, needs_frame) {
            (ColorTarget::Surface(surface), true) => match surface.get_current_texture() {
                wgpu::CurrentSurfaceTexture::Success(output) | wgpu::CurrentSurfaceTexture::Suboptimal(output) => {
                    Some(output)
                }
                wgpu::CurrentSurfaceTexture::Timeout | wgpu::CurrentSurfaceTexture::Occluded => {
                    log::debug!("Surface texture unavailable, skipping frame");
                    return Ok(false);
                }
                wgpu::CurrentSurfaceTexture::Outdated | wgpu::CurrentSurfaceTexture::Lost => {
                    log::warn!("Surface lost, reconfiguring and skipping frame");
                    surface.configure(&self.device, &self.config);
                    return Ok(false);
                }
                wgpu::CurrentSurfaceTexture::Validation => {
                    return Err(WeaveError::Surface("surface texture acquisition failed validation".to_string()));
                }
            },
            _ => None,
        };

        let (frame_texture, frame_view) = match (&surface_texture, &self.target) {
            (Some(output), _) => (
                Some(&output.texture),
                Some(output.texture.create_view(&wgpu::TextureViewDescriptor::default())),
            ),
            (None, ColorTarget::Offscreen(target)) => (Some(&target.texture), Some(target.view.clone())),
            (None, ColorTarget::Surface(_)) => (None, None),
        };

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Weave Frame Encoder"),
        });

        for command in commands {
            match command {
                GpuCommand::Dispatch {
                    pipeline,
                    bind_group,
                    workgroups,
                    ..
                } => {
                    let (Some(GpuPipeline::Compute(pipeline)), Some(bind_group)) =
                        (self.pipelines.get(*pipeline), self.bind_groups.get(*bind_group))
                    else {
                        log::warn!("Skipping dispatch with released objects");
                        continue;
                    };
                    let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("Weave Compute Pass"),
                        timestamp_writes: None,
                    });
                    cpass.set_pipeline(pipeline);
                    cpass.set_bind_group(0, bind_group, &[]);
                    cpass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
                }
                GpuCommand::Draw {
                    pipeline,
                    bind_groups,
                    vertex_buffer,
                    vertex_count,
                    clear_color,
                    clear_depth,
                    ..
                } => {
                    let (Some(GpuPipeline::Render(pipeline)), Some(vertex_group), Some(fragment_group), Some(vertices), Some(view)) = (
                        self.pipelines.get(*pipeline),
                        self.bind_groups.get(bind_groups[0]),
                        self.bind_groups.get(bind_groups[1]),
                        self.buffers.get(*vertex_buffer),
                        frame_view.as_ref(),
                    ) else {
                        log::warn!("Skipping draw with released objects");
                        continue;
                    };
                    let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("Weave Render Pass"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: clear_color.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                                store: wgpu::StoreOp::Store,
                            },
                            depth_slice: None,
                        })],
                        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                            view: &self.depth_view,
                            depth_ops: Some(wgpu::Operations {
                                load: if *clear_depth { wgpu::LoadOp::Clear(1.0) } else { wgpu::LoadOp::Load },
                                store: wgpu::StoreOp::Store,
                            }),
                            stencil_ops: None,
                        }),
                        ..Default::default()
                    });
                    rpass.set_pipeline(pipeline);
                    rpass.set_bind_group(0, vertex_group, &[]);
                    rpass.set_bind_group(1, fragment_group, &[]);
                    rpass.set_vertex_buffer(0, vertices.slice(..));
                    rpass.draw(0..*vertex_count, 0..1);
                }
                GpuCommand::CopyFrameToTexture { texture } => {
                    let (Some(source), Some(target)) = (frame_texture, self.textures.get(*texture)) else {
                        continue;
                    };
                    let size = target.texture.size();
                    encoder.copy_texture_to_texture(
                        source.as_image_copy(),
                        target.texture.as_image_copy(),
                        wgpu::Extent3d {
                            width: size.width.min(self.config.width),
                            height: size.height.min(self.config.height),
                            depth_or_array_layers: 1,
                        },
                    );
                }
                GpuCommand::CopyBuffer {
                    source,
                    destination,
                    size,
                } => {
                    let (Some(source), Some(destination)) = (self.buffers.get(*source), self.buffers.get(*destination))
                    else {
                        continue;
                    };
                    encoder.copy_buffer_to_buffer(source, 0, destination, 0, *size);
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(output) = surface_texture {
            output.present();
        }
        Ok(true)
    }

    fn map_read(&mut self, buffer: BufferKey, size: u64) -> MapReceiver {
        let (tx, rx) = flume::bounded(1);
        match self.buffers.get(buffer) {
            Some(buffer) => buffer.slice(0..size).map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result.map_err(|e| WeaveError::Readback(e.to_string())));
            }),
            None => {
                let _ = tx.send(Err(WeaveError::Readback("buffer was released".to_string())));
            }
        }
        rx
    }

    fn poll(&mut self, wait: bool) {
        let poll_type = if wait {
            wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            }
        } else {
            wgpu::PollType::Poll
        };
        if let Err(e) = self.device.poll(poll_type) {
            log::error!("Device poll failed: {e}");
        }
    }

    fn read_mapped(&mut self, buffer: BufferKey, size: u64) -> Result<Vec<u8>> {
        let buffer = self
            .buffers
            .get(buffer)
            .ok_or_else(|| WeaveError::Readback("buffer was released".to_string()))?;
        let bytes = {
            let mapped = buffer.slice(0..size).get_mapped_range();
            mapped.to_vec()
        };
        buffer.unmap();
        Ok(bytes)
    }
}
