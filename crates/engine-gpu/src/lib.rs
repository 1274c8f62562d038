#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! wgpu batch scanner for the double-SHA256 nonce search.
//!
//! One lane per nonce; every lane completes the header, double-hashes it and compares
//! against the target. Qualifying lanes race on a single result slot with an atomic
//! minimum, so a dispatch reports the lowest qualifying nonce it covered. Ranges larger
//! than one dispatch are walked in ascending sub-ranges, which keeps the GPU answer
//! identical to the scalar scan.
//!
//! Any device failure (no adapter, creation error, hung dispatch) is logged and reported
//! as [`ScanResult::Unavailable`]; hosts then fall back to the CPU.

mod context;
mod error;
mod pipeline;
mod resources;

pub use context::{
    DeviceContext, DeviceLimits, GpuConfig, ProbeOutcome, DEFAULT_DISPATCH_TIMEOUT,
    LANE_SIZE, MAX_LANE_WIDTH, SHA256D_SHADER,
};
pub use error::GpuError;
pub use pipeline::{PipelineCache, PipelineCompiler, ENTRY_POINT, LOCAL_INVOCATION_COUNT_ID};
pub use resources::{DispatchParams, NO_WINNER, PARAMS_SIZE, RESULT_SIZE};

use engine_cpu::{NonceEngine, NonceRange};
use futures::executor::block_on;
use pow_core::{JobContext, PowError, ScanResult};

use context::Prepared;

/// GPU nonce engine. Owns one [`DeviceContext`].
pub struct GpuEngine {
    context: DeviceContext,
}

impl Default for GpuEngine {
    fn default() -> Self {
        Self::new(GpuConfig::default())
    }
}

impl GpuEngine {
    /// Create the engine. No device work happens until the first probe or scan.
    pub fn new(config: GpuConfig) -> Self {
        Self {
            context: DeviceContext::new(config),
        }
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    /// Probe (once) for a compute-capable device.
    pub fn is_available(&mut self) -> bool {
        matches!(self.context.probe(), ProbeOutcome::Ready(_))
    }

    /// Device workgroup limit, or 0 without a device.
    pub fn max_workgroup_size(&mut self) -> u32 {
        match self.context.probe() {
            ProbeOutcome::Ready(limits) => limits.max_workgroup_size,
            ProbeOutcome::Unavailable => 0,
        }
    }

    /// Warm the resource pool and the pipeline for `lane_width` without dispatching.
    pub fn pipeline_ready(&mut self, lane_width: u32) -> bool {
        let ProbeOutcome::Ready(limits) = self.context.probe() else {
            return false;
        };
        match self.context.prepare(limits.clamp_lane_width(lane_width)) {
            Ok(_) => true,
            Err(err) => {
                log::warn!(
                    target: "gpu_engine",
                    "pipeline for lane width {lane_width} unavailable: {err}"
                );
                false
            }
        }
    }

    /// Release the device. The next call probes again.
    pub fn teardown(&mut self) {
        self.context.teardown();
    }

    /// Pipeline compilations since the device was opened.
    pub fn compile_count(&self) -> u64 {
        self.context.compile_count()
    }

    /// Resource pools created since the device was opened.
    pub fn pool_count(&self) -> u64 {
        self.context.pool_count()
    }

    /// Scan `[nonce_start, nonce_end]` on the GPU.
    ///
    /// Malformed inputs are an error whether or not a device exists. `Unavailable` means
    /// nothing was concluded about the range.
    pub fn batch_scan(
        &mut self,
        header_prefix: &[u8],
        nonce_start: u32,
        nonce_end: u32,
        target: &[u8],
        lane_width: u32,
    ) -> Result<ScanResult, PowError> {
        let ctx = JobContext::from_slices(header_prefix, target)?;
        Ok(self.scan(&ctx, NonceRange::new(nonce_start, nonce_end), lane_width))
    }

    /// Scan a prepared job; `lane_width` is clamped to what the device supports.
    pub fn scan(&mut self, ctx: &JobContext, range: NonceRange, lane_width: u32) -> ScanResult {
        let ProbeOutcome::Ready(limits) = self.context.probe() else {
            return ScanResult::Unavailable;
        };
        let lane_width = limits.clamp_lane_width(lane_width);

        let prepared = match self.context.prepare(lane_width) {
            Ok(prepared) => prepared,
            Err(err) => {
                log::warn!(target: "gpu_engine", "GPU setup failed: {err}");
                return ScanResult::Unavailable;
            }
        };

        if range.is_empty() {
            return ScanResult::Exhausted;
        }

        match search(&prepared, ctx, range) {
            Ok(result) => result,
            Err(err) => {
                log::warn!(
                    target: "gpu_engine",
                    "GPU scan {}..={} failed: {err}",
                    range.start,
                    range.end
                );
                ScanResult::Unavailable
            }
        }
    }
}

impl NonceEngine for GpuEngine {
    fn name(&self) -> &'static str {
        "gpu-wgpu"
    }

    fn search_range(&mut self, ctx: &JobContext, range: NonceRange) -> ScanResult {
        self.scan(ctx, range, MAX_LANE_WIDTH)
    }
}

/// Walk `range` in ascending dispatch-sized sub-ranges until one reports a winner.
fn search(p: &Prepared<'_>, ctx: &JobContext, range: NonceRange) -> Result<ScanResult, GpuError> {
    let local = p.local_invocation_count;
    let per_dispatch = p.limits.nonces_per_dispatch(local).min(u64::from(u32::MAX)) as u32;

    for sub in range.chunks(per_dispatch) {
        let groups = p.limits.group_count(sub.len(), local);
        log::trace!(
            target: "gpu_engine",
            "dispatch {}..={} as {groups} x {local}",
            sub.start,
            sub.end
        );

        match dispatch(p, &DispatchParams::new(ctx, sub), groups)? {
            Some(nonce) => {
                // The device answer is only trusted after a host-side check.
                if nonce < sub.start || nonce > sub.end || !ctx.is_valid_nonce(nonce) {
                    return Err(GpuError::BadWinner { nonce });
                }
                log::debug!(target: "gpu_engine", "GPU found nonce {nonce}");
                return Ok(ScanResult::Found(nonce));
            }
            // The all-ones nonce collides with the empty slot marker.
            None if sub.end == u32::MAX && ctx.is_valid_nonce(u32::MAX) => {
                return Ok(ScanResult::Found(u32::MAX));
            }
            None => {}
        }
    }
    Ok(ScanResult::Exhausted)
}

/// Submit one dispatch and read back the result slot.
fn dispatch(
    p: &Prepared<'_>,
    params: &DispatchParams,
    groups: u32,
) -> Result<Option<u32>, GpuError> {
    let pool = p.pool;

    p.device.push_error_scope(wgpu::ErrorFilter::Validation);
    p.queue.write_buffer(&pool.params_buffer, 0, params.as_bytes());
    p.queue
        .write_buffer(&pool.result_buffer, 0, &NO_WINNER.to_le_bytes());

    let mut encoder = p
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Search Encoder"),
        });
    {
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Search Pass"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(p.pipeline);
        cpass.set_bind_group(0, &pool.bind_group, &[]);
        cpass.dispatch_workgroups(groups, 1, 1);
    }
    encoder.copy_buffer_to_buffer(&pool.result_buffer, 0, &pool.readback_buffer, 0, RESULT_SIZE);
    let submission = p.queue.submit(Some(encoder.finish()));
    if let Some(err) = block_on(p.device.pop_error_scope()) {
        return Err(GpuError::Submit(err));
    }

    let slice = pool.readback_buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    let waited = p.device.poll(wgpu::PollType::Wait {
        submission_index: Some(submission),
        timeout: Some(p.timeout),
    });
    if let Err(err) = waited {
        pool.readback_buffer.unmap();
        return Err(GpuError::Wait(err));
    }

    let mapped = rx.try_recv().or_else(|_| {
        // The map callback may land on the next poll.
        let _ = p.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: Some(p.timeout),
        });
        rx.try_recv()
    });
    match mapped {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            pool.readback_buffer.unmap();
            return Err(GpuError::Readback(err));
        }
        Err(_) => {
            pool.readback_buffer.unmap();
            return Err(GpuError::ReadbackPending);
        }
    }

    let winner = {
        let data = slice.get_mapped_range();
        u32::from_le_bytes([data[0], data[1], data[2], data[3]])
    };
    pool.readback_buffer.unmap();

    Ok((winner != NO_WINNER).then_some(winner))
}

#[cfg(test)]
mod tests;
