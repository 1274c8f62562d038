//! Compiled compute pipelines, one per lane width.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::context::DeviceLimits;
use crate::resources::scoped;
use crate::GpuError;

/// Shader entry point.
pub const ENTRY_POINT: &str = "main";
/// Pipeline-overridable constant holding the workgroup size (`@id(0)` in the shader).
pub const LOCAL_INVOCATION_COUNT_ID: &str = "0";

/// Turns a workgroup size into a pipeline.
pub trait PipelineCompiler {
    type Pipeline;

    fn compile(&self, local_invocation_count: u32) -> Result<Self::Pipeline, GpuError>;
}

/// Memoizes pipelines by lane width.
///
/// A failed compile is not cached, so the next request for that width tries again.
#[derive(Debug)]
pub struct PipelineCache<P> {
    pipelines: HashMap<u32, P>,
    compiles: u64,
}

impl<P> Default for PipelineCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PipelineCache<P> {
    pub fn new() -> Self {
        Self {
            pipelines: HashMap::new(),
            compiles: 0,
        }
    }

    /// Return the pipeline for `lane_width`, compiling it on first use.
    pub fn get_or_create<C>(
        &mut self,
        lane_width: u32,
        limits: &DeviceLimits,
        compiler: &C,
    ) -> Result<&P, GpuError>
    where
        C: PipelineCompiler<Pipeline = P>,
    {
        debug_assert!((1..=limits.max_lane_width()).contains(&lane_width));
        match self.pipelines.entry(lane_width) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                let local = limits.local_invocation_count(lane_width);
                let pipeline = compiler.compile(local)?;
                self.compiles += 1;
                log::debug!(
                    target: "gpu_engine",
                    "compiled pipeline for lane width {lane_width} ({local} invocations)"
                );
                Ok(slot.insert(pipeline))
            }
        }
    }

    pub fn contains(&self, lane_width: u32) -> bool {
        self.pipelines.contains_key(&lane_width)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Successful compilations so far.
    pub fn compile_count(&self) -> u64 {
        self.compiles
    }

    pub fn clear(&mut self) {
        self.pipelines.clear();
    }
}

/// Compiles the search shader against the pool's pipeline layout.
pub(crate) struct WgpuCompiler<'a> {
    device: &'a wgpu::Device,
    layout: &'a wgpu::PipelineLayout,
    shader: &'a str,
}

impl<'a> WgpuCompiler<'a> {
    pub(crate) fn new(
        device: &'a wgpu::Device,
        layout: &'a wgpu::PipelineLayout,
        shader: &'a str,
    ) -> Self {
        Self {
            device,
            layout,
            shader,
        }
    }
}

impl PipelineCompiler for WgpuCompiler<'_> {
    type Pipeline = wgpu::ComputePipeline;

    fn compile(&self, local_invocation_count: u32) -> Result<wgpu::ComputePipeline, GpuError> {
        if self.shader.trim().is_empty() {
            return Err(GpuError::EmptyShader);
        }

        let module = scoped(self.device, "shader module", || {
            self.device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("sha256d shader"),
                    source: wgpu::ShaderSource::Wgsl(self.shader.into()),
                })
        })?;

        let constants = [(LOCAL_INVOCATION_COUNT_ID, f64::from(local_invocation_count))];
        scoped(self.device, "compute pipeline", || {
            self.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some("sha256d pipeline"),
                    layout: Some(self.layout),
                    module: &module,
                    entry_point: Some(ENTRY_POINT),
                    compilation_options: wgpu::PipelineCompilationOptions {
                        constants: &constants,
                        zero_initialize_workgroup_memory: false,
                    },
                    cache: None,
                })
        })
    }
}
