//! wgpu implementation of the compute backend.

use super::{ComputeBackend, DispatchGrid, GpuContext, KernelProgram};
use crate::error::BackendError;
use image::{DynamicImage, RgbaImage};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{mpsc, Mutex};
use tracing::debug;

/// Format of every texture the engine creates.
const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const BYTES_PER_PIXEL: u32 = 4;

/// Compute backend running kernels on the shared [`GpuContext`].
pub struct WgpuBackend {
    context: &'static GpuContext,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    // Shader modules keyed by WGSL source, so an edited module under an old
    // label is compiled afresh.
    modules: Mutex<HashMap<String, wgpu::ShaderModule>>,
}

impl WgpuBackend {
    /// Backend on the process-wide device.
    pub fn new() -> Result<Self, BackendError> {
        Ok(Self::with_context(GpuContext::shared()?))
    }

    pub fn with_context(context: &'static GpuContext) -> Self {
        let device = context.device();

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Filter Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: TEXTURE_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Filter Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        Self {
            context,
            bind_group_layout,
            pipeline_layout,
            modules: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &'static GpuContext {
        self.context
    }

    fn check_extent(&self, width: u32, height: u32) -> Result<(), BackendError> {
        check_extent(width, height, self.context.device().limits().max_texture_dimension_2d)
    }

    /// Run `f` with validation and out-of-memory errors captured, so they come
    /// back here instead of reaching the device's uncaptured-error handler.
    fn scoped<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, wgpu::Error> {
        let device = self.context.device();
        let out_of_memory = device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let validation = device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(device);
        let validation_error = pollster::block_on(validation.pop());
        let memory_error = pollster::block_on(out_of_memory.pop());
        match memory_error.or(validation_error) {
            Some(e) => Err(e),
            None => Ok(value),
        }
    }

    fn create_texture(&self, label: &str, width: u32, height: u32, usage: wgpu::TextureUsages) -> Result<wgpu::Texture, BackendError> {
        self.scoped(|device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TEXTURE_FORMAT,
                usage,
                view_formats: &[],
            })
        })
        .map_err(device_error)
    }

    fn shader_module(&self, program: &KernelProgram) -> Result<wgpu::ShaderModule, BackendError> {
        let mut modules = self.modules.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(module) = modules.get(program.source()) {
            return Ok(module.clone());
        }

        debug!("Creating shader module {}", program.module_label());
        let module = self
            .scoped(|device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(program.module_label()),
                    source: wgpu::ShaderSource::Wgsl(Cow::Owned(program.source().to_string())),
                })
            })
            .map_err(|e| BackendError::Compilation(format!("{}: {}", program.module_label(), e)))?;
        modules.insert(program.source().to_string(), module.clone());
        Ok(module)
    }
}

fn device_error(error: wgpu::Error) -> BackendError {
    match error {
        wgpu::Error::OutOfMemory { .. } => BackendError::ResourceExhausted(error.to_string()),
        other => BackendError::Rejected(other.to_string()),
    }
}

/// Textures must be non-empty and within the device's 2D size limit.
fn check_extent(width: u32, height: u32, limit: u32) -> Result<(), BackendError> {
    if width == 0 || height == 0 {
        return Err(BackendError::InvalidDimensions { width, height });
    }
    if width > limit || height > limit {
        return Err(BackendError::TextureTooLarge { width, height, limit });
    }
    Ok(())
}

/// A destination must match its source in size and format.
fn check_same_shape(
    source: (wgpu::Extent3d, wgpu::TextureFormat),
    destination: (wgpu::Extent3d, wgpu::TextureFormat),
) -> Result<(), BackendError> {
    if source == destination {
        return Ok(());
    }
    let ((src_size, src_format), (dst_size, dst_format)) = (source, destination);
    Err(BackendError::TextureMismatch(format!(
        "source {}x{} {:?}, destination {}x{} {:?}",
        src_size.width, src_size.height, src_format, dst_size.width, dst_size.height, dst_format
    )))
}

fn check_grid(grid: DispatchGrid, max_groups: u32) -> Result<(), BackendError> {
    if grid.x > max_groups || grid.y > max_groups || grid.z > max_groups {
        return Err(BackendError::ResourceExhausted(format!(
            "dispatch grid {}x{}x{} exceeds {} work-groups per dimension",
            grid.x, grid.y, grid.z, max_groups
        )));
    }
    Ok(())
}

impl ComputeBackend for WgpuBackend {
    type Texture = wgpu::Texture;
    type Pipeline = wgpu::ComputePipeline;

    fn compile_pipeline(&self, program: &KernelProgram) -> Result<wgpu::ComputePipeline, BackendError> {
        let module = self.shader_module(program)?;
        self.scoped(|device| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(program.kernel_id()),
                layout: Some(&self.pipeline_layout),
                module: &module,
                entry_point: Some(program.kernel_id()),
                compilation_options: Default::default(),
                cache: None,
            })
        })
        .map_err(|e| BackendError::Compilation(e.to_string()))
    }

    fn allocate_like(&self, source: &wgpu::Texture) -> Result<wgpu::Texture, BackendError> {
        if source.format() != TEXTURE_FORMAT {
            return Err(BackendError::TextureMismatch(format!(
                "unsupported source format {:?}",
                source.format()
            )));
        }
        self.check_extent(source.width(), source.height())?;
        self.create_texture(
            "Filter Output Texture",
            source.width(),
            source.height(),
            wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC,
        )
    }

    fn texture_extent(&self, texture: &wgpu::Texture) -> (u32, u32) {
        (texture.width(), texture.height())
    }

    fn dispatch(
        &self,
        pipeline: &wgpu::ComputePipeline,
        source: &wgpu::Texture,
        destination: &wgpu::Texture,
        grid: DispatchGrid,
    ) -> Result<(), BackendError> {
        check_same_shape((source.size(), source.format()), (destination.size(), destination.format()))?;
        check_grid(grid, self.context.device().limits().max_compute_workgroups_per_dimension)?;

        let command_buffer = self
            .scoped(|device| {
                let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());
                let destination_view = destination.create_view(&wgpu::TextureViewDescriptor::default());
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Filter Bind Group"),
                    layout: &self.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&source_view) },
                        wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&destination_view) },
                    ],
                });

                let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Filter Encoder") });
                {
                    let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("Filter Pass"),
                        timestamp_writes: None,
                    });
                    compute_pass.set_pipeline(pipeline);
                    compute_pass.set_bind_group(0, &bind_group, &[]);
                    compute_pass.dispatch_workgroups(grid.x, grid.y, grid.z);
                }
                encoder.finish()
            })
            .map_err(device_error)?;

        // Nothing reaches the queue unless encoding succeeded.
        self.context.queue().submit(std::iter::once(command_buffer));
        Ok(())
    }

    fn decode_to_texture(&self, image: &DynamicImage) -> Result<wgpu::Texture, BackendError> {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        self.check_extent(width, height)?;

        let texture = self.create_texture(
            "Filter Source Texture",
            width,
            height,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC,
        )?;
        self.scoped(|_| {
            self.context.queue().write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                rgba.as_raw(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(width * BYTES_PER_PIXEL),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            )
        })
        .map_err(device_error)?;
        Ok(texture)
    }

    fn encode_from_texture(&self, texture: &wgpu::Texture) -> Result<RgbaImage, BackendError> {
        let (width, height) = (texture.width(), texture.height());
        if texture.format() != TEXTURE_FORMAT {
            return Err(BackendError::Readback(format!("unsupported format {:?}", texture.format())));
        }

        let unpadded_bytes_per_row = width * BYTES_PER_PIXEL;
        let padded_bytes_per_row = align_copy_bytes_per_row(unpadded_bytes_per_row);

        let (readback_buffer, command_buffer) = self
            .scoped(|device| {
                let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Readback Buffer"),
                    size: padded_bytes_per_row as wgpu::BufferAddress * height as wgpu::BufferAddress,
                    usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                    mapped_at_creation: false,
                });

                let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback Encoder") });
                encoder.copy_texture_to_buffer(
                    wgpu::TexelCopyTextureInfo {
                        texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    wgpu::TexelCopyBufferInfo {
                        buffer: &buffer,
                        layout: wgpu::TexelCopyBufferLayout {
                            offset: 0,
                            bytes_per_row: Some(padded_bytes_per_row),
                            rows_per_image: Some(height),
                        },
                    },
                    wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
                );
                (buffer, encoder.finish())
            })
            .map_err(|e| BackendError::Readback(e.to_string()))?;
        // Same queue as the dispatch, so the copy observes the kernel's writes.
        self.context.queue().submit(std::iter::once(command_buffer));

        let device = self.context.device();

        let buffer_slice = readback_buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device
            .poll(wgpu::PollType::Wait { submission_index: None, timeout: None })
            .map_err(|e| BackendError::Readback(e.to_string()))?;
        receiver
            .recv()
            .map_err(|e| BackendError::Readback(e.to_string()))?
            .map_err(|e| BackendError::Readback(e.to_string()))?;

        let mapped = buffer_slice.get_mapped_range();
        let pixels = strip_row_padding(&mapped, unpadded_bytes_per_row as usize, padded_bytes_per_row as usize, height as usize);
        drop(mapped);
        readback_buffer.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| BackendError::Readback(format!("pixel buffer does not fit {}x{}", width, height)))
    }
}

/// Round a row length up to wgpu's copy alignment.
fn align_copy_bytes_per_row(unpadded: u32) -> u32 {
    unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Copy `rows` rows of `unpadded` bytes out of a buffer whose rows are `padded` bytes apart.
fn strip_row_padding(data: &[u8], unpadded: usize, padded: usize, rows: usize) -> Vec<u8> {
    if unpadded == padded {
        return data[..unpadded * rows].to_vec();
    }
    let mut out = Vec::with_capacity(unpadded * rows);
    for row in data.chunks(padded).take(rows) {
        out.extend_from_slice(&row[..unpadded]);
    }
    out
}
