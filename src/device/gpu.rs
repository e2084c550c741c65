//! wgpu Device
//!
//! [`RenderDevice`] backed by a real `wgpu::Device`. Resource construction
//! maps one-to-one onto wgpu objects; frame recording keeps a single command
//! encoder open between `begin_frame` and `end_frame` and submits it once.
//!
//! Passes are stored with their lifetime erased (`forget_lifetime`) so pass
//! closures can reach the active pass through [`WgpuDevice::render_pass`] or
//! [`WgpuDevice::compute_pass`] and record their own draws or dispatches.

use glam::Vec4;
use smallvec::SmallVec;
use wgpu::util::DeviceExt;

use super::{ImageUpload, RenderDevice, StageCode};
use crate::errors::{Error, Result};
use crate::graph::{ClearFlags, RenderState, Viewport};
use crate::managers::geometry::{GeometryDescriptor, Indices};
use crate::managers::image::ImageLayout;
use crate::shader::ShaderStage;

const DUMMY_PROGRAM_WGSL: &str = r"
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 1.0, 1.0);
}
";

// ─── Resources ────────────────────────────────────────────────────────────────

pub struct WgpuImage {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub format: wgpu::TextureFormat,
    pub width: u32,
    pub height: u32,
}

pub struct WgpuGeometry {
    pub vertex_buffer: Option<wgpu::Buffer>,
    pub index_buffer: Option<(wgpu::Buffer, wgpu::IndexFormat)>,
    pub vertex_count: u32,
    pub index_count: u32,
    pub topology: wgpu::PrimitiveTopology,
}

pub struct WgpuProgram {
    pub label: String,
    pub modules: SmallVec<[(ShaderStage, wgpu::ShaderModule); 2]>,
}

impl WgpuProgram {
    #[must_use]
    pub fn module(&self, stage: ShaderStage) -> Option<&wgpu::ShaderModule> {
        self.modules
            .iter()
            .find_map(|(s, m)| (*s == stage).then_some(m))
    }
}

pub struct WgpuRenderTarget {
    pub width: u32,
    pub height: u32,
    pub color: SmallVec<[wgpu::TextureView; 4]>,
    pub depth: Option<wgpu::TextureView>,
}

// ─── Device ───────────────────────────────────────────────────────────────────

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    /// View used when a pass has no target (`None`).
    output: Option<wgpu::TextureView>,

    encoder: Option<wgpu::CommandEncoder>,
    render_pass: Option<wgpu::RenderPass<'static>>,
    compute_pass: Option<wgpu::ComputePass<'static>>,
}

impl WgpuDevice {
    #[must_use]
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            output: None,
            encoder: None,
            render_pass: None,
            compute_pass: None,
        }
    }

    /// Requests an adapter and device without a surface.
    pub async fn headless() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::AdapterRequestFailed(e.to_string()))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Resident Device"),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        log::info!("Using adapter: {}", adapter.get_info().name);
        Ok(Self::new(device, queue))
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[inline]
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Sets the view that untargeted passes render into (e.g. a surface).
    pub fn set_output(&mut self, view: Option<wgpu::TextureView>) {
        self.output = view;
    }

    /// The render pass currently open, if any.
    pub fn render_pass(&mut self) -> Option<&mut wgpu::RenderPass<'static>> {
        self.render_pass.as_mut()
    }

    /// The compute pass currently open, if any.
    pub fn compute_pass(&mut self) -> Option<&mut wgpu::ComputePass<'static>> {
        self.compute_pass.as_mut()
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                })
        })
    }

    fn open_render_pass(
        &mut self,
        target: Option<&WgpuRenderTarget>,
        load_color: wgpu::LoadOp<wgpu::Color>,
        load_depth: wgpu::LoadOp<f32>,
        label: &str,
    ) -> Option<wgpu::RenderPass<'static>> {
        let colors: SmallVec<[wgpu::TextureView; 4]> = match target {
            Some(t) => t.color.clone(),
            None => self.output.iter().cloned().collect(),
        };
        let depth = target.and_then(|t| t.depth.clone());
        if colors.is_empty() && depth.is_none() {
            log::warn!("Pass '{label}' has nothing to render into");
            return None;
        }

        let color_attachments: SmallVec<[Option<wgpu::RenderPassColorAttachment<'_>>; 4]> =
            colors
                .iter()
                .map(|view| {
                    Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: load_color,
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })
                })
                .collect();

        let depth_stencil_attachment =
            depth
                .as_ref()
                .map(|view| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: load_depth,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                });

        let pass = self
            .encoder()
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                ..Default::default()
            })
            .forget_lifetime();
        Some(pass)
    }
}

fn wgpu_stage_label(label: &str, stage: ShaderStage) -> String {
    format!("{label} [{stage:?}]")
}

impl RenderDevice for WgpuDevice {
    type Image = WgpuImage;
    type Geometry = WgpuGeometry;
    type Program = WgpuProgram;
    type RenderTarget = WgpuRenderTarget;

    fn create_image(&mut self, upload: &ImageUpload<'_>, label: &str) -> Result<WgpuImage> {
        let size = wgpu::Extent3d {
            width: upload.width,
            height: upload.height,
            depth_or_array_layers: upload.layers,
        };
        let mut usage = upload.usage;
        if upload.pixels.is_some() {
            usage |= wgpu::TextureUsages::COPY_DST;
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: upload.mip_levels.max(1),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: upload.format,
            usage,
            view_formats: &[],
        });

        if let Some(pixels) = upload.pixels {
            let texel = upload
                .format
                .block_copy_size(None)
                .ok_or_else(|| Error::Construction {
                    kind: "image",
                    label: label.to_owned(),
                    reason: format!("{:?} cannot be uploaded from memory", upload.format),
                })?;
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                pixels,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(upload.width * texel),
                    rows_per_image: Some(upload.height),
                },
                size,
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(match upload.layout {
                ImageLayout::D2 => wgpu::TextureViewDimension::D2,
                ImageLayout::Cube => wgpu::TextureViewDimension::Cube,
            }),
            ..Default::default()
        });

        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(label),
            address_mode_u: upload.wrap,
            address_mode_v: upload.wrap,
            address_mode_w: upload.wrap,
            mag_filter: upload.filter,
            min_filter: upload.filter,
            ..Default::default()
        });

        Ok(WgpuImage {
            texture,
            view,
            sampler,
            format: upload.format,
            width: upload.width,
            height: upload.height,
        })
    }

    fn destroy_image(&mut self, image: WgpuImage) {
        image.texture.destroy();
    }

    fn create_geometry(
        &mut self,
        descriptor: &GeometryDescriptor,
        label: &str,
    ) -> Result<WgpuGeometry> {
        let vertex_buffer = (!descriptor.vertices.is_empty()).then(|| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: &descriptor.vertices,
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                })
        });

        let index_buffer = descriptor.indices.as_ref().map(|indices| {
            let (contents, format): (&[u8], _) = match indices {
                Indices::U16(data) => (bytemuck::cast_slice(data), wgpu::IndexFormat::Uint16),
                Indices::U32(data) => (bytemuck::cast_slice(data), wgpu::IndexFormat::Uint32),
            };
            let buffer = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents,
                    usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
                });
            (buffer, format)
        });

        Ok(WgpuGeometry {
            vertex_buffer,
            index_buffer,
            vertex_count: descriptor.vertex_count(),
            index_count: descriptor.index_count(),
            topology: descriptor.topology,
        })
    }

    fn destroy_geometry(&mut self, geometry: WgpuGeometry) {
        if let Some(buffer) = geometry.vertex_buffer {
            buffer.destroy();
        }
        if let Some((buffer, _)) = geometry.index_buffer {
            buffer.destroy();
        }
    }

    fn compile_program(&mut self, stages: &[StageCode<'_>], label: &str) -> Result<WgpuProgram> {
        let mut modules = SmallVec::new();
        for stage in stages {
            let module = self
                .device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&wgpu_stage_label(label, stage.stage)),
                    source: wgpu::ShaderSource::Wgsl(stage.code.into()),
                });

            let info = pollster::block_on(module.get_compilation_info());
            let errors: Vec<String> = info
                .messages
                .iter()
                .filter(|m| m.message_type == wgpu::CompilationMessageType::Error)
                .map(|m| m.message.clone())
                .collect();
            if !errors.is_empty() {
                return Err(Error::ShaderCompile {
                    label: wgpu_stage_label(label, stage.stage),
                    reason: errors.join("\n"),
                });
            }
            modules.push((stage.stage, module));
        }

        Ok(WgpuProgram {
            label: label.to_owned(),
            modules,
        })
    }

    fn create_dummy_program(&mut self) -> Result<WgpuProgram> {
        self.compile_program(
            &[
                StageCode {
                    stage: ShaderStage::Vertex,
                    code: DUMMY_PROGRAM_WGSL,
                },
                StageCode {
                    stage: ShaderStage::Fragment,
                    code: DUMMY_PROGRAM_WGSL,
                },
            ],
            "Dummy Program",
        )
    }

    fn destroy_program(&mut self, _program: WgpuProgram) {}

    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        attachments: &[&WgpuImage],
        _label: &str,
    ) -> Result<WgpuRenderTarget> {
        let mut color = SmallVec::new();
        let mut depth = None;
        for image in attachments {
            let view = image
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default());
            if image.format.is_depth_stencil_format() {
                depth = Some(view);
            } else {
                color.push(view);
            }
        }
        Ok(WgpuRenderTarget {
            width,
            height,
            color,
            depth,
        })
    }

    fn destroy_render_target(&mut self, _target: WgpuRenderTarget) {}

    fn begin_frame(&mut self) {
        self.encoder();
    }

    fn clear(&mut self, target: Option<&WgpuRenderTarget>, color: Vec4, flags: ClearFlags) {
        let load_color = if flags.contains(ClearFlags::COLOR) {
            wgpu::LoadOp::Clear(wgpu::Color {
                r: f64::from(color.x),
                g: f64::from(color.y),
                b: f64::from(color.z),
                a: f64::from(color.w),
            })
        } else {
            wgpu::LoadOp::Load
        };
        let load_depth = if flags.contains(ClearFlags::DEPTH) {
            wgpu::LoadOp::Clear(1.0)
        } else {
            wgpu::LoadOp::Load
        };
        // Opening and dropping a pass performs the load-op clear.
        drop(self.open_render_pass(target, load_color, load_depth, "Clear"));
    }

    fn begin_render_pass(
        &mut self,
        target: Option<&WgpuRenderTarget>,
        viewport: &Viewport,
        _state: &RenderState,
        label: &str,
    ) {
        self.render_pass =
            self.open_render_pass(target, wgpu::LoadOp::Load, wgpu::LoadOp::Load, label);
        if let Some(pass) = self.render_pass.as_mut()
            && viewport.width > 0.0
            && viewport.height > 0.0
        {
            pass.set_viewport(
                viewport.x,
                viewport.y,
                viewport.width,
                viewport.height,
                viewport.min_depth,
                viewport.max_depth,
            );
        }
    }

    fn bind_program(&mut self, program: &WgpuProgram) {
        log::trace!("Binding program '{}'", program.label);
    }

    fn end_render_pass(&mut self) {
        self.render_pass = None;
    }

    fn begin_compute_pass(&mut self, label: &str) {
        let pass = self
            .encoder()
            .begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            })
            .forget_lifetime();
        self.compute_pass = Some(pass);
    }

    fn end_compute_pass(&mut self) {
        self.compute_pass = None;
    }

    fn end_frame(&mut self) {
        self.render_pass = None;
        self.compute_pass = None;
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
    }
}
