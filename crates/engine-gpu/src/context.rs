//! Device context: lazy adapter discovery, memoized probe outcome and orderly teardown.

use std::borrow::Cow;
use std::time::Duration;

use futures::executor::block_on;

use crate::pipeline::{PipelineCache, WgpuCompiler};
use crate::resources::{PoolSlot, ResourcePool};
use crate::GpuError;

/// Bundled double-SHA256 compute shader.
pub const SHA256D_SHADER: &str = include_str!("sha256d.wgsl");

/// How long a single dispatch may run before the device is considered hung.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Invocations per lane-width unit.
pub const LANE_SIZE: u32 = 32;
/// Upper bound on the lane-width multiplier.
pub const MAX_LANE_WIDTH: u32 = 64;

#[derive(Clone, Debug)]
pub struct GpuConfig {
    /// Backends searched for a compute-capable adapter. Empty disables the GPU path.
    pub backends: wgpu::Backends,
    pub shader_source: Cow<'static, str>,
    pub dispatch_timeout: Duration,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::PRIMARY,
            shader_source: Cow::Borrowed(SHA256D_SHADER),
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }
}

impl GpuConfig {
    /// Honor `WGPU_BACKEND` when set.
    pub fn from_env() -> Self {
        Self {
            backends: wgpu::Backends::from_env().unwrap_or(wgpu::Backends::PRIMARY),
            ..Self::default()
        }
    }

    /// A configuration that never finds a device.
    pub fn disabled() -> Self {
        Self {
            backends: wgpu::Backends::empty(),
            ..Self::default()
        }
    }
}

/// Device capabilities that shape a dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Largest usable workgroup along x.
    pub max_workgroup_size: u32,
    /// Largest workgroup count along x in one dispatch.
    pub max_dispatch_groups: u32,
}

impl DeviceLimits {
    pub fn from_wgpu(limits: &wgpu::Limits) -> Self {
        Self {
            max_workgroup_size: limits
                .max_compute_workgroup_size_x
                .min(limits.max_compute_invocations_per_workgroup),
            max_dispatch_groups: limits.max_compute_workgroups_per_dimension,
        }
    }

    /// `max(1, min(max_workgroup_size / 32, 64))`
    pub fn max_lane_width(&self) -> u32 {
        (self.max_workgroup_size / LANE_SIZE).min(MAX_LANE_WIDTH).max(1)
    }

    pub fn clamp_lane_width(&self, requested: u32) -> u32 {
        requested.clamp(1, self.max_lane_width())
    }

    /// Workgroup size compiled into the pipeline for `lane_width`.
    pub fn local_invocation_count(&self, lane_width: u32) -> u32 {
        LANE_SIZE
            .saturating_mul(lane_width)
            .min(self.max_workgroup_size)
            .max(1)
    }

    /// Nonces covered by one dispatch at the given workgroup size.
    pub fn nonces_per_dispatch(&self, local_invocation_count: u32) -> u64 {
        u64::from(local_invocation_count) * u64::from(self.max_dispatch_groups.max(1))
    }

    /// Workgroups needed to cover `nonces`, clamped to the device maximum.
    pub fn group_count(&self, nonces: u64, local_invocation_count: u32) -> u32 {
        let local = u64::from(local_invocation_count.max(1));
        let groups = nonces.div_ceil(local).max(1);
        groups.min(u64::from(self.max_dispatch_groups.max(1))) as u32
    }
}

/// Result of probing for a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready(DeviceLimits),
    Unavailable,
}

// Fields drop top to bottom: everything created from the device goes before it, and the
// instance goes last.
pub(crate) struct LiveDevice {
    pub(crate) pipelines: PipelineCache<wgpu::ComputePipeline>,
    pub(crate) pool: PoolSlot<ResourcePool>,
    pub(crate) queue: wgpu::Queue,
    pub(crate) device: wgpu::Device,
    pub(crate) limits: DeviceLimits,
    adapter_info: wgpu::AdapterInfo,
    _adapter: wgpu::Adapter,
    _instance: wgpu::Instance,
}

enum DeviceState {
    Untried,
    Unavailable,
    Ready(Box<LiveDevice>),
}

/// Everything one dispatch needs, borrowed from a ready context.
pub(crate) struct Prepared<'a> {
    pub(crate) device: &'a wgpu::Device,
    pub(crate) queue: &'a wgpu::Queue,
    pub(crate) pool: &'a ResourcePool,
    pub(crate) pipeline: &'a wgpu::ComputePipeline,
    pub(crate) limits: DeviceLimits,
    pub(crate) local_invocation_count: u32,
    pub(crate) timeout: Duration,
}

/// Owns the GPU device for the lifetime of the engine.
///
/// The first [`probe`](Self::probe) decides whether a device exists; the outcome is
/// memoized and later probes return it without touching the driver. An unavailable
/// context stays unavailable. A ready context can be torn down, after which the next
/// probe starts over.
pub struct DeviceContext {
    config: GpuConfig,
    state: DeviceState,
}

impl DeviceContext {
    pub fn new(config: GpuConfig) -> Self {
        Self {
            config,
            state: DeviceState::Untried,
        }
    }

    pub fn config(&self) -> &GpuConfig {
        &self.config
    }

    pub fn probe(&mut self) -> ProbeOutcome {
        if let DeviceState::Untried = self.state {
            self.state = match open_device(&self.config) {
                Ok(live) => {
                    log::info!(
                        target: "gpu_engine",
                        "GPU ready: {} ({:?}), max workgroup {}, max groups {}",
                        live.adapter_info.name,
                        live.adapter_info.backend,
                        live.limits.max_workgroup_size,
                        live.limits.max_dispatch_groups
                    );
                    DeviceState::Ready(Box::new(live))
                }
                Err(err) => {
                    log::warn!(target: "gpu_engine", "GPU unavailable: {err}");
                    DeviceState::Unavailable
                }
            };
        }
        match &self.state {
            DeviceState::Ready(live) => ProbeOutcome::Ready(live.limits),
            _ => ProbeOutcome::Unavailable,
        }
    }

    /// Whether a probe has already run (successfully or not).
    pub fn is_probed(&self) -> bool {
        !matches!(self.state, DeviceState::Untried)
    }

    /// Limits of the open device, without probing.
    pub fn limits(&self) -> Option<DeviceLimits> {
        match &self.state {
            DeviceState::Ready(live) => Some(live.limits),
            _ => None,
        }
    }

    pub fn adapter_info(&self) -> Option<&wgpu::AdapterInfo> {
        match &self.state {
            DeviceState::Ready(live) => Some(&live.adapter_info),
            _ => None,
        }
    }

    /// Pipeline compilations performed since the device was opened.
    pub fn compile_count(&self) -> u64 {
        match &self.state {
            DeviceState::Ready(live) => live.pipelines.compile_count(),
            _ => 0,
        }
    }

    /// Resource pools created since the device was opened.
    pub fn pool_count(&self) -> u64 {
        match &self.state {
            DeviceState::Ready(live) => live.pool.created(),
            _ => 0,
        }
    }

    /// Wait for the device to go idle and release everything in reverse creation order.
    ///
    /// A no-op unless the context is ready. Afterwards the context is untried again.
    pub fn teardown(&mut self) {
        match std::mem::replace(&mut self.state, DeviceState::Untried) {
            DeviceState::Ready(live) => live.shutdown(self.config.dispatch_timeout),
            other => self.state = other,
        }
    }

    /// Make sure the resource pool and the pipeline for `lane_width` exist.
    ///
    /// `lane_width` must already be clamped to the device range.
    pub(crate) fn prepare(&mut self, lane_width: u32) -> Result<Prepared<'_>, GpuError> {
        let timeout = self.config.dispatch_timeout;
        let shader = &self.config.shader_source;
        let DeviceState::Ready(live) = &mut self.state else {
            return Err(GpuError::NotReady);
        };
        let live = &mut **live;
        let limits = live.limits;

        let device = &live.device;
        let pool = live.pool.ensure(|| ResourcePool::create(device))?;
        let compiler = WgpuCompiler::new(&live.device, &pool.pipeline_layout, shader);
        let pipeline = live.pipelines.get_or_create(lane_width, &limits, &compiler)?;

        Ok(Prepared {
            device: &live.device,
            queue: &live.queue,
            pool,
            pipeline,
            limits,
            local_invocation_count: limits.local_invocation_count(lane_width),
            timeout,
        })
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl LiveDevice {
    fn shutdown(self: Box<Self>, timeout: Duration) {
        if let Err(err) = self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: Some(timeout),
        }) {
            log::warn!(target: "gpu_engine", "device did not go idle before teardown: {err}");
        }

        let LiveDevice {
            pipelines,
            pool,
            queue,
            device,
            adapter_info,
            _adapter,
            _instance,
            ..
        } = *self;
        drop(pipelines);
        drop(pool);
        drop(queue);
        drop(device);
        drop(_adapter);
        drop(_instance);
        log::info!(target: "gpu_engine", "GPU context for {} torn down", adapter_info.name);
    }
}

/// Discover the first compute-capable adapter and open a logical device on it.
///
/// Anything created before a failing step is dropped on the way out.
fn open_device(config: &GpuConfig) -> Result<LiveDevice, GpuError> {
    if config.backends.is_empty() {
        return Err(GpuError::NoBackends);
    }

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: config.backends,
        ..Default::default()
    });

    let adapters = instance.enumerate_adapters(config.backends);
    log::debug!(target: "gpu_engine", "{} adapter(s) enumerated", adapters.len());
    let adapter = adapters
        .into_iter()
        .find(|adapter| {
            adapter
                .get_downlevel_capabilities()
                .flags
                .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        })
        .ok_or(GpuError::NoComputeAdapter)?;

    let adapter_info = adapter.get_info();
    log::debug!(target: "gpu_engine", "Selected adapter: {adapter_info:?}");

    let required_limits = adapter.limits();
    let (device, queue) = block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("Nonce Search Device"),
        required_features: wgpu::Features::empty(),
        required_limits: required_limits.clone(),
        memory_hints: Default::default(),
        ..Default::default()
    }))?;

    Ok(LiveDevice {
        pipelines: PipelineCache::new(),
        pool: PoolSlot::new(),
        queue,
        device,
        limits: DeviceLimits::from_wgpu(&required_limits),
        adapter_info,
        _adapter: adapter,
        _instance: instance,
    })
}
