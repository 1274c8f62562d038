//! Device-side failures. These never reach hosts directly; the batch scanner logs them
//! and reports `ScanResult::Unavailable`.

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("no GPU backends enabled")]
    NoBackends,
    #[error("no compute-capable adapter found")]
    NoComputeAdapter,
    #[error("failed to open logical device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("device context is not ready")]
    NotReady,
    #[error("shader source is empty")]
    EmptyShader,
    #[error("failed to create {what}: {source}")]
    Creation {
        what: &'static str,
        #[source]
        source: wgpu::Error,
    },
    #[error("dispatch rejected by the device: {0}")]
    Submit(#[source] wgpu::Error),
    #[error("dispatch did not complete: {0}")]
    Wait(#[from] wgpu::PollError),
    #[error("result readback failed: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),
    #[error("result readback never completed")]
    ReadbackPending,
    #[error("device reported nonce {nonce} which does not meet the target")]
    BadWinner { nonce: u32 },
}
