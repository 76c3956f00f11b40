// wgpu_context.rs — 基于 wgpu 的图形上下文 (窗口表面 + 深度缓冲 + 球体管线)

use crate::error::{DrawError, ShaderError, ShaderStage, ViewerError};
use crate::graphics::{
    BufferHandle, BufferKind, DrawCall, GraphicsContext, ProgramHandle, TextureHandle,
    TextureSampling, WrapMode,
};
use crate::texture::PreparedFrame;
use image::RgbaImage;
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::window::Window;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const FRAME_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
const TEX_COORD_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x2];

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CameraUniform {
    projection: [[f32; 4]; 4],
    view: [[f32; 4]; 4],
}

struct GpuProgram {
    pipeline: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
}

struct GpuTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    size: (u32, u32),
    level_count: u32,
}

struct DepthTarget {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

pub struct WgpuContext {
    surface: wgpu::Surface,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    pub size: PhysicalSize<u32>,
    depth: DepthTarget,

    camera_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,

    programs: HashMap<u32, GpuProgram>,
    buffers: HashMap<u32, wgpu::Buffer>,
    textures: HashMap<u32, GpuTexture>,
    next_id: u32,

    // 表面依赖窗口存活
    _window: Arc<Window>,
}

impl WgpuContext {
    pub async fn new(window: Arc<Window>, vsync: bool) -> Result<Self, ViewerError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = unsafe { instance.create_surface(window.as_ref()) }
            .map_err(|e| ViewerError::ContextUnavailable(e.to_string()))?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| ViewerError::ContextUnavailable("no compatible GPU adapter".into()))?;

        let info = adapter.get_info();
        log::info!("using adapter {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    features: wgpu::Features::empty(),
                    limits: if cfg!(target_arch = "wasm32") {
                        wgpu::Limits::downlevel_webgl2_defaults()
                    } else {
                        wgpu::Limits::default().using_resolution(adapter.limits())
                    },
                    label: None,
                },
                None,
            )
            .await
            .map_err(|e| ViewerError::ContextUnavailable(e.to_string()))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| ViewerError::ContextUnavailable("surface reports no formats".into()))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: if vsync {
                wgpu::PresentMode::Fifo
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&device, &config);
        let depth = create_depth_target(&device, &config);

        let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
            label: Some("camera_bind_group_layout"),
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
            label: Some("texture_bind_group_layout"),
        });

        Ok(Self {
            surface,
            device,
            queue,
            config,
            size,
            depth,
            camera_layout,
            texture_layout,
            programs: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            next_id: 1,
            _window: window,
        })
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        self.size = new_size;
        if new_size.width > 0 && new_size.height > 0 {
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
            self.depth = create_depth_target(&self.device, &self.config);
        }
    }

    /// Re-applies the surface configuration after a lost/outdated surface.
    pub fn reconfigure(&mut self) {
        self.resize(self.size);
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn compile_stage(&self, stage: ShaderStage, source: &str) -> Result<wgpu::ShaderModule, ShaderError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(stage_label(stage)),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(e) => Err(ShaderError {
                stage,
                log: e.to_string(),
            }),
            None => Ok(module),
        }
    }

    fn create_pipeline(
        &self,
        vertex: &wgpu::ShaderModule,
        fragment: &wgpu::ShaderModule,
    ) -> wgpu::RenderPipeline {
        let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Sphere Pipeline Layout"),
            bind_group_layouts: &[&self.camera_layout, &self.texture_layout],
            push_constant_ranges: &[],
        });

        self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(stage_label(ShaderStage::Link)),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: vertex,
                entry_point: "vs_main",
                buffers: &[
                    wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &POSITION_ATTRIBUTES,
                    },
                    wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &TEX_COORD_ATTRIBUTES,
                    },
                ],
            },
            fragment: Some(wgpu::FragmentState {
                module: fragment,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None, // 从球心看内表面，不做剔除
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
        })
    }

    fn write_levels(&self, texture: &wgpu::Texture, frame: &PreparedFrame) {
        for (level, img) in frame.levels().enumerate() {
            write_level(&self.queue, texture, level as u32, img);
        }
    }
}

impl GraphicsContext for WgpuContext {
    fn compile_program(
        &mut self,
        vertex_src: &str,
        fragment_src: &str,
    ) -> Result<ProgramHandle, ShaderError> {
        let vertex = self.compile_stage(ShaderStage::Vertex, vertex_src)?;
        let fragment = self.compile_stage(ShaderStage::Fragment, fragment_src)?;

        // 管线创建相当于链接：入口点 / 接口不匹配在这里报错
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self.create_pipeline(&vertex, &fragment);
        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(ShaderError {
                stage: ShaderStage::Link,
                log: e.to_string(),
            });
        }

        let camera_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::cast_slice(&[CameraUniform {
                projection: glam::Mat4::IDENTITY.to_cols_array_2d(),
                view: glam::Mat4::IDENTITY.to_cols_array_2d(),
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
            label: Some("camera_bind_group"),
        });

        let id = self.next_id();
        self.programs.insert(
            id,
            GpuProgram {
                pipeline,
                camera_buffer,
                camera_bind_group,
            },
        );
        log::debug!("sphere program linked");
        Ok(ProgramHandle(id))
    }

    fn create_buffer(&mut self, kind: BufferKind, label: &str, contents: &[u8]) -> BufferHandle {
        let usage = match kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
        };
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage: usage | wgpu::BufferUsages::COPY_DST,
        });
        let id = self.next_id();
        self.buffers.insert(id, buffer);
        BufferHandle(id)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        if let Some(b) = self.buffers.remove(&buffer.0) {
            b.destroy();
        }
    }

    fn create_texture(&mut self, frame: &PreparedFrame) -> TextureHandle {
        let (width, height) = frame.dimensions();
        let level_count = frame.level_count();

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FRAME_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            label: Some("frame_texture"),
            view_formats: &[],
        });
        self.write_levels(&texture, frame);

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = self.device.create_sampler(&sampler_descriptor(frame.sampling()));
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
            label: Some("frame_bind_group"),
        });

        let id = self.next_id();
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                bind_group,
                size: (width, height),
                level_count,
            },
        );
        TextureHandle(id)
    }

    fn write_texture(&mut self, texture: TextureHandle, frame: &PreparedFrame) {
        let Some(gpu) = self.textures.get(&texture.0) else {
            log::warn!("write to unknown texture {:?}", texture);
            return;
        };
        if gpu.size != frame.dimensions() || gpu.level_count != frame.level_count() {
            log::warn!(
                "frame {:?} ({} levels) does not fit texture {:?} ({} levels), skipped",
                frame.dimensions(),
                frame.level_count(),
                gpu.size,
                gpu.level_count
            );
            return;
        }
        self.write_levels(&gpu.texture, frame);
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if let Some(t) = self.textures.remove(&texture.0) {
            t.texture.destroy();
        }
    }

    fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.size.width, self.size.height)
    }

    fn draw_indexed(&mut self, call: &DrawCall) -> Result<(), DrawError> {
        let program = self
            .programs
            .get(&call.program.0)
            .ok_or(DrawError::UnknownHandle("program"))?;
        let positions = self
            .buffers
            .get(&call.positions.0)
            .ok_or(DrawError::UnknownHandle("position buffer"))?;
        let tex_coords = self
            .buffers
            .get(&call.tex_coords.0)
            .ok_or(DrawError::UnknownHandle("texcoord buffer"))?;
        let indices = self
            .buffers
            .get(&call.indices.0)
            .ok_or(DrawError::UnknownHandle("index buffer"))?;
        let texture = self
            .textures
            .get(&call.texture.0)
            .ok_or(DrawError::UnknownHandle("texture"))?;

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let uniform = CameraUniform {
            projection: call.projection.to_cols_array_2d(),
            view: call.view.to_cols_array_2d(),
        };
        self.queue
            .write_buffer(&program.camera_buffer, 0, bytemuck::cast_slice(&[uniform]));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        {
            let [r, g, b, a] = call.clear_color;
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Sphere Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: true,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: true,
                    }),
                    stencil_ops: None,
                }),
            });

            render_pass.set_pipeline(&program.pipeline);
            render_pass.set_bind_group(0, &program.camera_bind_group, &[]);
            render_pass.set_bind_group(1, &texture.bind_group, &[]);
            render_pass.set_vertex_buffer(0, positions.slice(..));
            render_pass.set_vertex_buffer(1, tex_coords.slice(..));
            render_pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
            render_pass.draw_indexed(0..call.index_count, 0, 0..1);
        } // pass 结束即解除纹理绑定

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

fn create_depth_target(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration) -> DepthTarget {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        size: wgpu::Extent3d {
            width: config.width,
            height: config.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        label: Some("depth_texture"),
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    DepthTarget {
        _texture: texture,
        view,
    }
}

fn write_level(queue: &wgpu::Queue, texture: &wgpu::Texture, mip_level: u32, img: &RgbaImage) {
    let (width, height) = img.dimensions();
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        img.as_raw(),
        wgpu::ImageDataLayout {
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

fn stage_label(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => "sphere_vertex",
        ShaderStage::Fragment => "sphere_fragment",
        ShaderStage::Link => "sphere_pipeline",
    }
}

fn sampler_descriptor(sampling: TextureSampling) -> wgpu::SamplerDescriptor<'static> {
    // 经度方向允许环绕，纬度方向始终夹取
    let (address_mode_u, address_mode_v) = match sampling.wrap {
        WrapMode::Repeat => (wgpu::AddressMode::Repeat, wgpu::AddressMode::ClampToEdge),
        WrapMode::ClampToEdge => (wgpu::AddressMode::ClampToEdge, wgpu::AddressMode::ClampToEdge),
    };
    wgpu::SamplerDescriptor {
        label: Some("frame_sampler"),
        address_mode_u,
        address_mode_v,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: if sampling.mipmaps {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_wraps_longitude_only() {
        let desc = sampler_descriptor(TextureSampling::for_dimensions(1024, 512));
        assert_eq!(desc.address_mode_u, wgpu::AddressMode::Repeat);
        assert_eq!(desc.address_mode_v, wgpu::AddressMode::ClampToEdge);
        assert_eq!(desc.mipmap_filter, wgpu::FilterMode::Linear);
    }

    #[test]
    fn clamped_sampling_uses_one_level() {
        let desc = sampler_descriptor(TextureSampling::for_dimensions(1920, 960));
        assert_eq!(desc.address_mode_u, wgpu::AddressMode::ClampToEdge);
        assert_eq!(desc.min_filter, wgpu::FilterMode::Linear);
        assert_eq!(desc.mipmap_filter, wgpu::FilterMode::Nearest);
    }

    #[test]
    fn every_stage_has_its_own_label() {
        assert_eq!(stage_label(ShaderStage::Vertex), "sphere_vertex");
        assert_eq!(stage_label(ShaderStage::Fragment), "sphere_fragment");
        assert_eq!(stage_label(ShaderStage::Link), "sphere_pipeline");
    }

    #[test]
    fn camera_uniform_is_two_matrices() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 128);
    }
}
