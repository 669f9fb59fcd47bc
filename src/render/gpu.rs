use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytemuck::{bytes_of, Pod, Zeroable};
use glam::{Mat3, Vec3};
use log::{error, info, warn};
use wgpu::util::DeviceExt;
use winit::window::{Window, WindowId};

use super::common::{CameraParams, LightParams};
use super::shared::{
    COMPOSITE_SHADER, DEFAULT_CUBE_INDICES, DEFAULT_CUBE_VERTICES, MAX_LIGHTS, SCENE_SHADER,
};
use crate::glitch::GlitchParameters;
use crate::graph::{DrawItem, Shading};
use crate::heightmap::Heightmap;
use crate::mesh::{MeshData, MeshLibrary};
use crate::render_loop::{Frame, LayerView, RenderBackend};
use crate::settings::LightKind;

const LAYER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const INITIAL_OBJECT_CAPACITY: usize = 64;

/// Two-pass wgpu renderer: main and shadow layers into offscreen targets,
/// then the glitch composite onto the window surface.
pub struct Renderer {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    targets: LayerTargets,
    scene_pipeline: wgpu::RenderPipeline,
    main_globals: GlobalBinding,
    shadow_globals: GlobalBinding,
    objects: ObjectBuffer,
    object_layout: wgpu::BindGroupLayout,
    composite_pipeline: wgpu::RenderPipeline,
    composite_layout: wgpu::BindGroupLayout,
    composite_bind_group: wgpu::BindGroup,
    glitch_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    displacement: DisplacementTexture,
    meshes: HashMap<String, MeshBuffers>,
    missing_meshes: HashSet<String>,
    default_mesh: MeshBuffers,
}

impl Renderer {
    /// Initializes the GPU renderer for `window` and uploads every mesh in `meshes`.
    pub async fn new(window: Arc<Window>, meshes: &MeshLibrary) -> Result<Self> {
        let size = window.inner_size();
        let (width, height) = (size.width.max(1), size.height.max(1));

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: preferred_backends(),
            ..Default::default()
        });
        let surface = instance.create_surface(Arc::clone(&window))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to acquire GPU adapter")?;
        info!("using adapter {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("stage-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: required_limits(&adapter),
                },
                None,
            )
            .await
            .context("failed to create GPU device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|format| format.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| anyhow!("surface reports no supported formats"))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode: wgpu::PresentMode::AutoVsync,
            desired_maximum_frame_latency: 2,
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        let targets = LayerTargets::create(&device, width, height);

        let scene_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("scene-shader"),
            source: wgpu::ShaderSource::Wgsl(SCENE_SHADER.into()),
        });
        let composite_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("composite-shader"),
            source: wgpu::ShaderSource::Wgsl(COMPOSITE_SHADER.into()),
        });

        let global_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("global-bind-layout"),
            entries: &[uniform_entry(
                0,
                wgpu::ShaderStages::VERTEX_FRAGMENT,
                false,
                std::mem::size_of::<GlobalUniform>(),
            )],
        });
        let object_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("object-bind-layout"),
            entries: &[uniform_entry(
                0,
                wgpu::ShaderStages::VERTEX_FRAGMENT,
                true,
                std::mem::size_of::<ObjectConstants>(),
            )],
        });

        let scene_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("scene-pipeline-layout"),
            bind_group_layouts: &[&global_layout, &object_layout],
            push_constant_ranges: &[],
        });

        let scene_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("scene-pipeline"),
            layout: Some(&scene_layout),
            vertex: wgpu::VertexState {
                module: &scene_shader,
                entry_point: "vs_main",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: (6 * std::mem::size_of::<f32>()) as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[
                        wgpu::VertexAttribute {
                            format: wgpu::VertexFormat::Float32x3,
                            offset: 0,
                            shader_location: 0,
                        },
                        wgpu::VertexAttribute {
                            format: wgpu::VertexFormat::Float32x3,
                            offset: (3 * std::mem::size_of::<f32>()) as u64,
                            shader_location: 1,
                        },
                    ],
                }],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DepthBuffer::FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: Default::default(),
                bias: Default::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &scene_shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: LAYER_FORMAT,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
        });

        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("composite-bind-layout"),
            entries: &[
                uniform_entry(
                    0,
                    wgpu::ShaderStages::FRAGMENT,
                    false,
                    std::mem::size_of::<GlitchUniform>(),
                ),
                texture_entry(1),
                texture_entry(2),
                texture_entry(3),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
            ],
        });
        let composite_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("composite-pipeline-layout"),
                bind_group_layouts: &[&composite_layout],
                push_constant_ranges: &[],
            });
        let composite_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("composite-pipeline"),
            layout: Some(&composite_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &composite_shader,
                entry_point: "vs_main",
                buffers: &[],
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &composite_shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
        });

        let main_globals = GlobalBinding::create(&device, &global_layout, "main");
        let shadow_globals = GlobalBinding::create(&device, &global_layout, "shadow");
        let object_stride = object_stride(
            std::mem::size_of::<ObjectConstants>() as u64,
            device.limits().min_uniform_buffer_offset_alignment as u64,
        );
        let objects = ObjectBuffer::create(
            &device,
            &object_layout,
            object_stride,
            INITIAL_OBJECT_CAPACITY,
        );

        let glitch_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("glitch-uniform"),
            size: std::mem::size_of::<GlitchUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("composite-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let displacement = DisplacementTexture::create(&device, 1);
        let composite_bind_group = composite_bind_group(
            &device,
            &composite_layout,
            &glitch_buffer,
            &targets,
            &displacement,
            &sampler,
        );

        let default_mesh = MeshBuffers::from_mesh(
            &device,
            &MeshData {
                vertices: DEFAULT_CUBE_VERTICES.to_vec(),
                indices: DEFAULT_CUBE_INDICES.to_vec(),
            },
            "default-cube",
        );
        let meshes = meshes
            .iter()
            .filter(|(_, mesh)| !mesh.indices.is_empty())
            .map(|(name, mesh)| (name.to_string(), MeshBuffers::from_mesh(&device, mesh, name)))
            .collect();

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            targets,
            scene_pipeline,
            main_globals,
            shadow_globals,
            objects,
            object_layout,
            composite_pipeline,
            composite_layout,
            composite_bind_group,
            glitch_buffer,
            sampler,
            displacement,
            meshes,
            missing_meshes: HashSet::new(),
            default_mesh,
        })
    }

    pub fn window_id(&self) -> WindowId {
        self.window.id()
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    fn reconfigure(&mut self) {
        let size = self.window.inner_size();
        RenderBackend::resize(self, size.width, size.height);
    }

    fn rebuild_composite_bind_group(&mut self) {
        self.composite_bind_group = composite_bind_group(
            &self.device,
            &self.composite_layout,
            &self.glitch_buffer,
            &self.targets,
            &self.displacement,
            &self.sampler,
        );
    }

    fn upload_displacement(&mut self, heightmap: &Heightmap) {
        if self.displacement.generation == Some(heightmap.generation()) {
            return;
        }
        let size = heightmap.size().max(1);
        if self.displacement.size != size {
            self.displacement = DisplacementTexture::create(&self.device, size);
            self.rebuild_composite_bind_group();
        }
        let zero = [0.0f32];
        let data: &[f32] = if heightmap.data().is_empty() {
            &zero
        } else {
            heightmap.data()
        };
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.displacement.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(data),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * size as u32),
                rows_per_image: Some(size as u32),
            },
            wgpu::Extent3d {
                width: size as u32,
                height: size as u32,
                depth_or_array_layers: 1,
            },
        );
        self.displacement.generation = Some(heightmap.generation());
    }

    /// Writes every object of both layers into the dynamic-offset buffer,
    /// growing it when needed. Returns the item count of the main layer.
    fn upload_objects(&mut self, main: &[DrawItem], shadow: &[DrawItem]) -> usize {
        let total = main.len() + shadow.len();
        if total > self.objects.capacity {
            let capacity = total.next_power_of_two();
            self.objects = ObjectBuffer::create(
                &self.device,
                &self.object_layout,
                self.objects.stride,
                capacity,
            );
        }
        let stride = self.objects.stride as usize;
        let mut bytes = vec![0u8; total * stride];
        for (index, item) in main.iter().chain(shadow).enumerate() {
            let constants = object_constants(item);
            let start = index * stride;
            bytes[start..start + std::mem::size_of::<ObjectConstants>()]
                .copy_from_slice(bytes_of(&constants));
        }
        if !bytes.is_empty() {
            self.queue.write_buffer(&self.objects.buffer, 0, &bytes);
        }
        main.len()
    }

    fn note_missing_mesh(&mut self, name: &str) {
        if !self.meshes.contains_key(name) && self.missing_meshes.insert(name.to_string()) {
            error!("no GPU buffers for mesh {name}; drawing a cube instead");
        }
    }

    fn draw_layer(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        layer: Layer,
        items: &[DrawItem],
        first_object: usize,
    ) {
        for item in items {
            self.note_missing_mesh(&item.mesh);
        }
        let (view, globals) = match layer {
            Layer::Main => (&self.targets.main.view, &self.main_globals.bind_group),
            Layer::Shadow => (&self.targets.shadow.view, &self.shadow_globals.bind_group),
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(layer.label()),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.targets.depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(&self.scene_pipeline);
        pass.set_bind_group(0, globals, &[]);
        for (index, item) in items.iter().enumerate() {
            let mesh = self.meshes.get(&item.mesh).unwrap_or(&self.default_mesh);
            let offset = ((first_object + index) as u64 * self.objects.stride) as u32;
            pass.set_vertex_buffer(0, mesh.vertex.slice(..));
            pass.set_index_buffer(mesh.index.slice(..), wgpu::IndexFormat::Uint32);
            pass.set_bind_group(1, &self.objects.bind_group, &[offset]);
            pass.draw_indexed(0..mesh.index_count, 0, 0..1);
        }
    }
}

impl RenderBackend for Renderer {
    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        self.targets = LayerTargets::create(&self.device, width, height);
        self.rebuild_composite_bind_group();
    }

    fn render(&mut self, frame: &Frame<'_>) -> Result<()> {
        self.queue.write_buffer(
            &self.main_globals.buffer,
            0,
            bytes_of(&global_uniform(&frame.camera, &frame.main)),
        );
        self.queue.write_buffer(
            &self.shadow_globals.buffer,
            0,
            bytes_of(&global_uniform(&frame.camera, &frame.shadow)),
        );
        self.queue
            .write_buffer(&self.glitch_buffer, 0, bytes_of(&glitch_uniform(&frame.glitch)));
        self.upload_displacement(frame.displacement);
        let shadow_first = self.upload_objects(&frame.main.items, &frame.shadow.items);

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.reconfigure();
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!("surface timeout; retrying next frame");
                return Ok(());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(anyhow!("GPU is out of memory")),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("stage-encoder"),
            });

        self.draw_layer(&mut encoder, Layer::Main, &frame.main.items, 0);
        self.draw_layer(&mut encoder, Layer::Shadow, &frame.shadow.items, shadow_first);

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("composite-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.composite_pipeline);
            pass.set_bind_group(0, &self.composite_bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Layer {
    Main,
    Shadow,
}

impl Layer {
    fn label(self) -> &'static str {
        match self {
            Layer::Main => "main-pass",
            Layer::Shadow => "shadow-pass",
        }
    }
}

fn preferred_backends() -> wgpu::Backends {
    if cfg!(target_arch = "wasm32") {
        wgpu::Backends::GL
    } else {
        wgpu::Backends::PRIMARY
    }
}

fn required_limits(adapter: &wgpu::Adapter) -> wgpu::Limits {
    if cfg!(target_arch = "wasm32") {
        wgpu::Limits::downlevel_webgl2_defaults().using_resolution(adapter.limits())
    } else {
        wgpu::Limits::default()
    }
}

fn uniform_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    dynamic: bool,
    size: usize,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: wgpu::BufferSize::new(size as u64),
        },
        count: None,
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn composite_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    glitch: &wgpu::Buffer,
    targets: &LayerTargets,
    displacement: &DisplacementTexture,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("composite-bind-group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: glitch.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(&targets.main.view),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(&targets.shadow.view),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::TextureView(&displacement.view),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

/// Smallest multiple of `alignment` that holds `size` bytes.
fn object_stride(size: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    size.div_ceil(alignment) * alignment
}

fn light_uniform(light: &LightParams) -> LightUniform {
    let kind = match light.kind {
        LightKind::Directional => 0.0,
        LightKind::Point | LightKind::Spot => 1.0,
    };
    LightUniform {
        position: light.position.extend(kind).into(),
        color: light.color.extend(light.intensity).into(),
    }
}

fn global_uniform(camera: &CameraParams, layer: &LayerView) -> GlobalUniform {
    let mut lights = [LightUniform::zeroed(); MAX_LIGHTS];
    let count = layer.lights.len().min(MAX_LIGHTS);
    for (slot, light) in lights.iter_mut().zip(&layer.lights) {
        *slot = light_uniform(light);
    }
    GlobalUniform {
        view_proj: camera.view_proj.to_cols_array_2d(),
        camera_position: camera.position.extend(1.0).into(),
        params: [count as f32, 0.0, 0.0, 0.0],
        lights,
    }
}

fn shading_mode(shading: Shading) -> f32 {
    match shading {
        Shading::Standard | Shading::ShadowCaster => 0.0,
        Shading::Flame => 1.0,
        Shading::ShadowReceiver => 2.0,
    }
}

fn object_constants(item: &DrawItem) -> ObjectConstants {
    let linear = Mat3::from_mat4(item.model);
    let normal = if linear.determinant().abs() > f32::EPSILON {
        linear.inverse().transpose()
    } else {
        Mat3::IDENTITY
    };
    ObjectConstants {
        model: item.model.to_cols_array_2d(),
        normal: mat3_to_3x4(normal),
        color: item.color.into(),
        emissive: item.emissive.extend(shading_mode(item.shading)).into(),
    }
}

fn glitch_uniform(params: &GlitchParameters) -> GlitchUniform {
    GlitchUniform {
        a: [params.amount, params.angle, params.seed, params.seed_x],
        b: [
            params.seed_y,
            params.distortion_x,
            params.distortion_y,
            params.col_s,
        ],
        flags: [if params.enabled { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0],
    }
}

fn mat3_to_3x4(matrix: Mat3) -> [[f32; 4]; 3] {
    let cols = matrix.to_cols_array();
    [
        [cols[0], cols[1], cols[2], 0.0],
        [cols[3], cols[4], cols[5], 0.0],
        [cols[6], cols[7], cols[8], 0.0],
    ]
}

struct GlobalBinding {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl GlobalBinding {
    fn create(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, label: &str) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{label}-global-uniform")),
            size: std::mem::size_of::<GlobalUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{label}-global-bind-group")),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        Self { buffer, bind_group }
    }
}

struct ObjectBuffer {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    stride: u64,
    capacity: usize,
}

impl ObjectBuffer {
    fn create(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        stride: u64,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.max(1);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("object-uniforms"),
            size: stride * capacity as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("object-bind-group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<ObjectConstants>() as u64),
                }),
            }],
        });
        Self {
            buffer,
            bind_group,
            stride,
            capacity,
        }
    }
}

struct MeshBuffers {
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    index_count: u32,
}

impl MeshBuffers {
    fn from_mesh(device: &wgpu::Device, mesh: &MeshData, label: &str) -> Self {
        let vertex = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}-vertices")),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}-indices")),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex,
            index,
            index_count: mesh.indices.len() as u32,
        }
    }
}

struct ColorTarget {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl ColorTarget {
    fn create(device: &wgpu::Device, width: u32, height: u32, label: &str) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: LAYER_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
        }
    }
}

/// Offscreen targets of both layers, sized to the surface.
struct LayerTargets {
    main: ColorTarget,
    shadow: ColorTarget,
    depth: DepthBuffer,
}

impl LayerTargets {
    fn create(device: &wgpu::Device, width: u32, height: u32) -> Self {
        Self {
            main: ColorTarget::create(device, width, height, "main-target"),
            shadow: ColorTarget::create(device, width, height, "shadow-target"),
            depth: DepthBuffer::create(device, width, height),
        }
    }
}

struct DepthBuffer {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl DepthBuffer {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

    fn create(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth-texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
        }
    }
}

struct DisplacementTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: usize,
    generation: Option<u64>,
}

impl DisplacementTexture {
    fn create(device: &wgpu::Device, size: usize) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("displacement-texture"),
            size: wgpu::Extent3d {
                width: size as u32,
                height: size as u32,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            size,
            generation: None,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LightUniform {
    position: [f32; 4],
    color: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GlobalUniform {
    view_proj: [[f32; 4]; 4],
    camera_position: [f32; 4],
    params: [f32; 4],
    lights: [LightUniform; MAX_LIGHTS],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ObjectConstants {
    model: [[f32; 4]; 4],
    normal: [[f32; 4]; 3],
    color: [f32; 4],
    emissive: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GlitchUniform {
    a: [f32; 4],
    b: [f32; 4],
    flags: [f32; 4],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeId;
    use glam::{Mat4, Vec4};

    fn light(kind: LightKind) -> LightParams {
        LightParams {
            kind,
            position: Vec3::new(1.0, 2.0, 3.0),
            color: Vec3::ONE,
            intensity: 2.5,
        }
    }

    fn item(shading: Shading) -> DrawItem {
        DrawItem {
            node: NodeId(0),
            mesh: "cube.obj".into(),
            model: Mat4::from_scale(Vec3::new(2.0, 2.0, 2.0)),
            color: Vec4::new(1.0, 0.5, 0.25, 0.8),
            emissive: Vec3::new(0.3, 0.2, 0.1),
            shading,
        }
    }

    #[test]
    fn uniform_sizes_match_shader_layout() {
        assert_eq!(std::mem::size_of::<GlobalUniform>(), 224);
        assert_eq!(std::mem::size_of::<ObjectConstants>(), 144);
        assert_eq!(std::mem::size_of::<GlitchUniform>(), 48);
    }

    #[test]
    fn object_stride_rounds_up_to_offset_alignment() {
        assert_eq!(object_stride(144, 256), 256);
        assert_eq!(object_stride(256, 256), 256);
        assert_eq!(object_stride(300, 256), 512);
        assert_eq!(object_stride(144, 0), 144);
    }

    #[test]
    fn global_uniform_caps_light_count() {
        let camera = CameraParams {
            view_proj: Mat4::IDENTITY,
            position: Vec3::ZERO,
        };
        let layer = LayerView {
            items: Vec::new(),
            lights: vec![light(LightKind::Spot); MAX_LIGHTS + 2],
        };
        let uniform = global_uniform(&camera, &layer);
        assert_eq!(uniform.params[0], MAX_LIGHTS as f32);
        assert_eq!(uniform.lights[0].position, [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(uniform.lights[0].color[3], 2.5);
    }

    #[test]
    fn directional_lights_are_flagged_in_w() {
        let uniform = light_uniform(&light(LightKind::Directional));
        assert_eq!(uniform.position[3], 0.0);
    }

    #[test]
    fn object_constants_carry_shading_mode() {
        assert_eq!(object_constants(&item(Shading::Standard)).emissive[3], 0.0);
        assert_eq!(object_constants(&item(Shading::Flame)).emissive[3], 1.0);
        let receiver = object_constants(&item(Shading::ShadowReceiver));
        assert_eq!(receiver.emissive[3], 2.0);
        assert_eq!(receiver.color, [1.0, 0.5, 0.25, 0.8]);
        assert!((receiver.normal[0][0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn degenerate_model_gets_identity_normals() {
        let mut flat = item(Shading::Standard);
        flat.model = Mat4::from_scale(Vec3::ZERO);
        assert_eq!(object_constants(&flat).normal[1], [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn glitch_uniform_packs_enabled_flag() {
        let params = GlitchParameters {
            enabled: true,
            amount: 0.01,
            angle: 0.5,
            seed: 0.2,
            seed_x: 0.3,
            seed_y: -0.4,
            distortion_x: 0.6,
            distortion_y: 0.7,
            col_s: 0.05,
        };
        let uniform = glitch_uniform(&params);
        assert_eq!(uniform.flags[0], 1.0);
        assert_eq!(uniform.b, [-0.4, 0.6, 0.7, 0.05]);
    }
}
