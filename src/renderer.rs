//! wgpu Renderer module
//!
//! GPU implementation of the backend protocol: off-screen scene targets,
//! viewport-limited clears and the lens distortion warp pipeline. The
//! application owns the surface and hands the renderer one presentation
//! view per frame.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use log::{debug, info, warn};
use wgpu::util::DeviceExt;
use wgpu::{
    BindGroup, BindGroupLayout, Device, Queue, RenderPipeline, TextureFormat, TextureView,
};

use crate::backend::{RenderBackend, RenderTarget};
use crate::post_process::WarpUniforms;
use crate::viewport::Viewport;

// Camera uniforms
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CameraUniforms {
    projection: [[f32; 4]; 4],
}

#[derive(Clone, Copy)]
enum QuadPass {
    Clear(wgpu::Color),
    Warp,
}

struct Frame {
    encoder: wgpu::CommandEncoder,
    present_view: TextureView,
}

pub struct Renderer {
    device: Device,
    queue: Queue,
    format: TextureFormat,
    window_size: (u32, u32),

    // The view keeps its texture alive until recorded commands are done with it.
    targets: HashMap<u32, TextureView>,
    next_target_id: u32,
    current_target: Option<RenderTarget>,
    viewport: Viewport,
    frame: Option<Frame>,

    camera_bind_group_layout: BindGroupLayout,
    camera_bind_group: BindGroup,

    offscreen_sampler: wgpu::Sampler,
    distortion_pipeline: RenderPipeline,
    distortion_bind_group_layout: BindGroupLayout,

    clear_pipeline: RenderPipeline,
    clear_bind_group_layout: BindGroupLayout,
}

/// Requests a device able to render to `compatible_surface` (or any adapter
/// when rendering off-screen only).
pub async fn request_device(
    instance: &wgpu::Instance,
    compatible_surface: Option<&wgpu::Surface<'_>>,
) -> anyhow::Result<(Device, Queue)> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface,
            force_fallback_adapter: false,
        })
        .await
        .ok_or_else(|| anyhow::anyhow!("no GPU adapter available"))?;

    info!("Using adapter: {:?}", adapter.get_info().name);
    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor::default(), None)
        .await?;
    Ok((device, queue))
}

fn uniform_layout_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn full_screen_pipeline(
    device: &Device,
    label: &str,
    shader: &wgpu::ShaderModule,
    layout: &BindGroupLayout,
    format: TextureFormat,
) -> RenderPipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Clamps `viewport` to an attachment of `size`; `None` when nothing is left.
fn clamp_viewport(viewport: Viewport, size: (u32, u32)) -> Option<(f32, f32, f32, f32)> {
    let x0 = viewport.x.max(0) as i64;
    let y0 = viewport.y.max(0) as i64;
    let x1 = (viewport.x as i64 + viewport.w as i64).min(size.0 as i64);
    let y1 = (viewport.y as i64 + viewport.h as i64).min(size.1 as i64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as f32, y0 as f32, (x1 - x0) as f32, (y1 - y0) as f32))
}

impl Renderer {
    pub fn new(
        device: Device,
        queue: Queue,
        format: TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        let camera_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Camera Bind Group Layout"),
                entries: &[uniform_layout_entry(
                    0,
                    wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                )],
            });
        let camera_bind_group =
            Self::camera_bind_group_for(&device, &camera_bind_group_layout, &Mat4::IDENTITY);

        let offscreen_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let distortion_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Distortion Bind Group Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                    uniform_layout_entry(
                        2,
                        wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ),
                ],
            });

        let distortion_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Distortion Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/distortion.wgsl").into()),
        });
        let distortion_pipeline = full_screen_pipeline(
            &device,
            "Distortion Pipeline",
            &distortion_shader,
            &distortion_bind_group_layout,
            format,
        );

        let clear_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Clear Bind Group Layout"),
                entries: &[uniform_layout_entry(0, wgpu::ShaderStages::FRAGMENT)],
            });
        let clear_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Clear Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/clear.wgsl").into()),
        });
        let clear_pipeline = full_screen_pipeline(
            &device,
            "Clear Pipeline",
            &clear_shader,
            &clear_bind_group_layout,
            format,
        );

        info!("Renderer ready: {:?} {}x{}", format, width, height);

        Self {
            device,
            queue,
            format,
            window_size: (width.max(1), height.max(1)),
            targets: HashMap::new(),
            next_target_id: 1,
            current_target: None,
            viewport: Viewport::new(0, 0, width as i32, height as i32),
            frame: None,
            camera_bind_group_layout,
            camera_bind_group,
            offscreen_sampler,
            distortion_pipeline,
            distortion_bind_group_layout,
            clear_pipeline,
            clear_bind_group_layout,
        }
    }

    fn camera_bind_group_for(
        device: &Device,
        layout: &BindGroupLayout,
        projection: &Mat4,
    ) -> BindGroup {
        let uniforms = CameraUniforms {
            projection: projection.to_cols_array_2d(),
        };
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Camera Bind Group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Size of the presentation target.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.window_size = (width.max(1), height.max(1));
    }

    pub fn window_size(&self) -> (u32, u32) {
        self.window_size
    }

    /// Layout of the projection uniform bound by `begin_scene_pass` at group 0.
    pub fn camera_bind_group_layout(&self) -> &BindGroupLayout {
        &self.camera_bind_group_layout
    }

    /// Starts recording a frame that ends on `present_view`.
    pub fn start_frame(&mut self, present_view: TextureView) {
        if self.frame.is_some() {
            warn!("start_frame called with a frame in flight; dropping it");
        }
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });
        self.frame = Some(Frame {
            encoder,
            present_view,
        });
        self.current_target = None;
    }

    /// Submits the recorded frame. The caller presents the surface texture afterwards.
    pub fn submit_frame(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.queue.submit(std::iter::once(frame.encoder.finish()));
        }
    }

    /// Opens a render pass on the current target limited to the current
    /// viewport, with the current projection bound at group 0.
    pub fn begin_scene_pass(&mut self) -> Option<wgpu::RenderPass<'_>> {
        let Frame {
            encoder,
            present_view,
        } = self.frame.as_mut()?;
        let (view, size) = Self::attachment(
            &self.targets,
            present_view,
            self.window_size,
            self.current_target,
        )?;
        let rect = clamp_viewport(self.viewport, size)?;

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Scene Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_viewport(rect.0, rect.1, rect.2, rect.3, 0.0, 1.0);
        render_pass.set_bind_group(0, &self.camera_bind_group, &[]);
        Some(render_pass)
    }

    fn attachment<'a>(
        targets: &'a HashMap<u32, TextureView>,
        present_view: &'a TextureView,
        window_size: (u32, u32),
        target: Option<RenderTarget>,
    ) -> Option<(&'a TextureView, (u32, u32))> {
        match target {
            None => Some((present_view, window_size)),
            Some(t) => match targets.get(&t.id) {
                Some(view) => Some((view, (t.width, t.height))),
                None => {
                    warn!("Render target {} is not live", t.id);
                    None
                }
            },
        }
    }

    /// Draws a quad over the clamped viewport, or clears the whole
    /// attachment when a clear covers it.
    fn quad_pass(&mut self, pass: QuadPass, bind_group: &BindGroup) {
        let (label, pipeline) = match pass {
            QuadPass::Clear(_) => ("Clear Pass", &self.clear_pipeline),
            QuadPass::Warp => ("Distortion Pass", &self.distortion_pipeline),
        };
        let Some(Frame {
            encoder,
            present_view,
        }) = self.frame.as_mut()
        else {
            debug!("{} outside a frame ignored", label);
            return;
        };
        let Some((view, size)) = Self::attachment(
            &self.targets,
            present_view,
            self.window_size,
            self.current_target,
        ) else {
            return;
        };
        let Some(rect) = clamp_viewport(self.viewport, size) else {
            return;
        };
        let covers_attachment = rect == (0.0, 0.0, size.0 as f32, size.1 as f32);
        let load = match pass {
            QuadPass::Clear(color) if covers_attachment => wgpu::LoadOp::Clear(color),
            _ => wgpu::LoadOp::Load,
        };

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        if matches!(pass, QuadPass::Clear(_)) && covers_attachment {
            return;
        }
        render_pass.set_viewport(rect.0, rect.1, rect.2, rect.3, 0.0, 1.0);
        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(0, bind_group, &[]);
        render_pass.draw(0..6, 0..1);
    }
}

impl RenderBackend for Renderer {
    fn create_render_target(&mut self, width: u32, height: u32) -> anyhow::Result<RenderTarget> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            anyhow::bail!(
                "render target {}x{} outside device limit {}",
                width,
                height,
                max
            );
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            texture.destroy();
            anyhow::bail!(
                "failed to allocate {}x{} render target: {}",
                width,
                height,
                err
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let target = RenderTarget {
            id: self.next_target_id,
            width,
            height,
        };
        self.next_target_id += 1;
        self.targets.insert(target.id, view);
        debug!(
            "Allocated render target {} ({}x{})",
            target.id, width, height
        );
        Ok(target)
    }

    fn release_render_target(&mut self, target: RenderTarget) {
        // Commands already recorded in the open frame may still sample or
        // draw into the texture; wgpu frees it once they have run.
        self.targets.remove(&target.id);
        if self.current_target.map(|t| t.id) == Some(target.id) {
            self.current_target = None;
        }
    }

    fn set_render_target(&mut self, target: Option<RenderTarget>) {
        self.current_target = target;
    }

    fn set_real_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn set_projection(&mut self, projection: &Mat4) {
        self.camera_bind_group = Self::camera_bind_group_for(
            &self.device,
            &self.camera_bind_group_layout,
            projection,
        );
    }

    fn clear(&mut self, color: [f32; 4]) {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Clear Color Buffer"),
                contents: bytemuck::bytes_of(&color),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Clear Bind Group"),
            layout: &self.clear_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        let wgpu_color = wgpu::Color {
            r: color[0] as f64,
            g: color[1] as f64,
            b: color[2] as f64,
            a: color[3] as f64,
        };
        self.quad_pass(QuadPass::Clear(wgpu_color), &bind_group);
    }

    fn draw_full_screen_quad(&mut self, source: RenderTarget, uniforms: &WarpUniforms) {
        let Some(source_view) = self.targets.get(&source.id) else {
            warn!("Warp source {} is not live", source.id);
            return;
        };
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Distortion Buffer"),
                contents: bytemuck::bytes_of(uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Distortion Bind Group"),
            layout: &self.distortion_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.offscreen_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffer.as_entire_binding(),
                },
            ],
        });
        self.quad_pass(QuadPass::Warp, &bind_group);
    }
}
