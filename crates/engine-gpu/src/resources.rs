//! Buffers, layouts and the bind group shared by every pipeline on a device.

use futures::executor::block_on;
use pow_core::{JobContext, HASH_LEN, HEADER_PREFIX_WORDS};

use engine_cpu::NonceRange;

use crate::GpuError;

/// Size of the uniform parameter block.
pub const PARAMS_SIZE: u64 = 128;
/// Size of the result slot.
pub const RESULT_SIZE: u64 = 4;
/// Result slot value meaning no lane qualified.
pub const NO_WINNER: u32 = u32::MAX;

/// Parameter block as the shader reads it.
///
/// Integers are stored little-endian, so the header words arrive in the shader with
/// their big-endian values. The target is copied byte for byte.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DispatchParams {
    pub header_words: [u32; HEADER_PREFIX_WORDS],
    pub nonce_start: u32,
    pub nonce_end: u32,
    pub target: [u8; HASH_LEN],
    _pad: [u32; 3],
}

impl DispatchParams {
    pub fn new(ctx: &JobContext, range: NonceRange) -> Self {
        let mut header_words = ctx.prefix().to_words();
        for word in &mut header_words {
            *word = word.to_le();
        }
        Self {
            header_words,
            nonce_start: range.start.to_le(),
            nonce_end: range.end.to_le(),
            target: *ctx.target().as_bytes(),
            _pad: [0; 3],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Run one creation step inside validation and out-of-memory error scopes.
///
/// On error the created object is dropped before returning.
pub(crate) fn scoped<T>(
    device: &wgpu::Device,
    what: &'static str,
    create: impl FnOnce() -> T,
) -> Result<T, GpuError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    let validation = block_on(device.pop_error_scope());
    let out_of_memory = block_on(device.pop_error_scope());
    match validation.or(out_of_memory) {
        None => Ok(value),
        Some(source) => Err(GpuError::Creation { what, source }),
    }
}

// Fields drop in reverse creation order.
pub(crate) struct ResourcePool {
    pub(crate) bind_group: wgpu::BindGroup,
    pub(crate) readback_buffer: wgpu::Buffer,
    pub(crate) result_buffer: wgpu::Buffer,
    pub(crate) params_buffer: wgpu::Buffer,
    pub(crate) pipeline_layout: wgpu::PipelineLayout,
    _bind_group_layout: wgpu::BindGroupLayout,
}

impl ResourcePool {
    /// Create the pool. A failing step releases whatever the earlier steps created.
    pub(crate) fn create(device: &wgpu::Device) -> Result<Self, GpuError> {
        let bind_group_layout = scoped(device, "bind group layout", || {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Search Bind Group Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: wgpu::BufferSize::new(PARAMS_SIZE),
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: wgpu::BufferSize::new(RESULT_SIZE),
                        },
                        count: None,
                    },
                ],
            })
        })?;

        let pipeline_layout = scoped(device, "pipeline layout", || {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Search Pipeline Layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            })
        })?;

        let params_buffer = scoped(device, "parameter buffer", || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Params Buffer"),
                size: PARAMS_SIZE,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;

        let result_buffer = scoped(device, "result buffer", || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Result Buffer"),
                size: RESULT_SIZE,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;

        let readback_buffer = scoped(device, "readback buffer", || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Readback Buffer"),
                size: RESULT_SIZE,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;

        let bind_group = scoped(device, "bind group", || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Search Bind Group"),
                layout: &bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: params_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: result_buffer.as_entire_binding(),
                    },
                ],
            })
        })?;

        log::debug!(target: "gpu_engine", "resource pool created");
        Ok(Self {
            bind_group,
            readback_buffer,
            result_buffer,
            params_buffer,
            pipeline_layout,
            _bind_group_layout: bind_group_layout,
        })
    }
}

/// Lazily created pool with a count of successful creations.
///
/// A failed creation leaves the slot empty, so the next call starts over.
pub(crate) struct PoolSlot<T> {
    pool: Option<T>,
    created: u64,
}

impl<T> PoolSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            pool: None,
            created: 0,
        }
    }

    pub(crate) fn ensure<E>(&mut self, create: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        let pool = match self.pool.take() {
            Some(pool) => pool,
            None => {
                let pool = create()?;
                self.created += 1;
                pool
            }
        };
        Ok(self.pool.insert(pool))
    }

    pub(crate) fn created(&self) -> u64 {
        self.created
    }
}
