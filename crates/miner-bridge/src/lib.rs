#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Host-facing call surface.
//!
//! Scan outcomes travel as a signed 64-bit code: a found nonce is returned as-is
//! (`0..=u32::MAX`), [`EXHAUSTED`], [`UNAVAILABLE`] and [`INVALID_ARGUMENT`] are
//! negative. The projection happens only here; the engines work with [`ScanResult`].
//!
//! [`NonceSearch`] owns one GPU device context. The free functions share a process-wide
//! instance behind a mutex, so concurrent hosts are serialized onto a single in-flight
//! GPU scan.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use engine_gpu::{GpuConfig, GpuEngine};
use pow_core::{Hash, PowError, ScanResult};

/// The range was fully searched and nothing qualified.
pub const EXHAUSTED: i64 = -1;
/// The GPU path could not run.
pub const UNAVAILABLE: i64 = -2;
/// Header prefix or target had the wrong length.
pub const INVALID_ARGUMENT: i64 = -3;

/// Project a scan outcome onto the boundary integer encoding.
pub fn encode(result: Result<ScanResult, PowError>) -> i64 {
    match result {
        Ok(ScanResult::Found(nonce)) => i64::from(nonce),
        Ok(ScanResult::Exhausted) => EXHAUSTED,
        Ok(ScanResult::Unavailable) => UNAVAILABLE,
        Err(err) => {
            log::debug!(target: "miner_bridge", "rejected scan request: {err}");
            INVALID_ARGUMENT
        }
    }
}

/// Inverse of [`encode`] for hosts that want the tagged form back.
pub fn decode(code: i64) -> Option<ScanResult> {
    match code {
        EXHAUSTED => Some(ScanResult::Exhausted),
        UNAVAILABLE => Some(ScanResult::Unavailable),
        _ => u32::try_from(code).ok().map(ScanResult::Found),
    }
}

/// The six boundary operations over one owned GPU engine.
pub struct NonceSearch {
    gpu: GpuEngine,
}

impl Default for NonceSearch {
    fn default() -> Self {
        Self::new(GpuConfig::from_env())
    }
}

impl NonceSearch {
    pub fn new(config: GpuConfig) -> Self {
        Self {
            gpu: GpuEngine::new(config),
        }
    }

    pub fn hash_header(&self, header: &[u8]) -> Result<Hash, PowError> {
        pow_core::hash_header(header)
    }

    pub fn scalar_scan(
        &self,
        header_prefix: &[u8],
        nonce_start: u32,
        nonce_end: u32,
        target: &[u8],
    ) -> i64 {
        encode(engine_cpu::scalar_scan(header_prefix, nonce_start, nonce_end, target))
    }

    pub fn gpu_is_available(&mut self) -> bool {
        self.gpu.is_available()
    }

    pub fn gpu_max_workgroup_size(&mut self) -> u32 {
        self.gpu.max_workgroup_size()
    }

    pub fn gpu_pipeline_ready(&mut self, lane_width: u32) -> bool {
        self.gpu.pipeline_ready(lane_width)
    }

    pub fn gpu_scan(
        &mut self,
        header_prefix: &[u8],
        nonce_start: u32,
        nonce_end: u32,
        target: &[u8],
        lane_width: u32,
    ) -> i64 {
        encode(
            self.gpu
                .batch_scan(header_prefix, nonce_start, nonce_end, target, lane_width),
        )
    }

    /// Release the GPU device; the next GPU call probes again.
    pub fn gpu_teardown(&mut self) {
        self.gpu.teardown();
    }
}

static DEFAULT: OnceLock<Mutex<NonceSearch>> = OnceLock::new();

fn default_instance() -> MutexGuard<'static, NonceSearch> {
    DEFAULT
        .get_or_init(|| Mutex::new(NonceSearch::default()))
        .lock()
        // A panicking scan leaves no half-written state behind the lock.
        .unwrap_or_else(PoisonError::into_inner)
}

pub fn version() -> &'static str {
    pow_core::VERSION
}

pub fn self_test() -> bool {
    pow_core::self_test()
}

pub fn hash_header(header: &[u8]) -> Result<Hash, PowError> {
    pow_core::hash_header(header)
}

/// Scalar scans hold no device state and skip the shared lock.
pub fn scalar_scan(header_prefix: &[u8], nonce_start: u32, nonce_end: u32, target: &[u8]) -> i64 {
    encode(engine_cpu::scalar_scan(header_prefix, nonce_start, nonce_end, target))
}

pub fn gpu_is_available() -> bool {
    default_instance().gpu_is_available()
}

pub fn gpu_max_workgroup_size() -> u32 {
    default_instance().gpu_max_workgroup_size()
}

pub fn gpu_pipeline_ready(lane_width: u32) -> bool {
    default_instance().gpu_pipeline_ready(lane_width)
}

pub fn gpu_scan(
    header_prefix: &[u8],
    nonce_start: u32,
    nonce_end: u32,
    target: &[u8],
    lane_width: u32,
) -> i64 {
    default_instance().gpu_scan(header_prefix, nonce_start, nonce_end, target, lane_width)
}

pub fn gpu_teardown() {
    default_instance().gpu_teardown();
}
