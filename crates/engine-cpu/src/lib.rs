#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Scalar nonce scanner and the engine trait shared by the CPU and GPU backends.
//!
//! The scalar engine performs a straightforward, strictly sequential scan across an
//! inclusive nonce range: complete the header, double-hash it, compare against the
//! target, stop at the first match. It never spawns threads and cannot be cancelled
//! mid-range; hosts wanting concurrency split the range with [`NonceRange::chunks`] and
//! run independent scans.

use pow_core::{JobContext, PowError, ScanResult};

/// Chunk size hosts use when partitioning the nonce space (2 Mi nonces).
pub const DEFAULT_CHUNK_SIZE: u32 = 2 * 1024 * 1024;

/// An inclusive nonce range. `start > end` is the empty range; there is no wraparound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NonceRange {
    pub start: u32,
    pub end: u32, // inclusive
}

impl NonceRange {
    pub const FULL: NonceRange = NonceRange {
        start: 0,
        end: u32::MAX,
    };

    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Number of nonces in the range (up to 2^32, hence `u64`).
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            u64::from(self.end - self.start) + 1
        }
    }

    /// Split into consecutive, disjoint inclusive chunks of at most `size` nonces.
    pub fn chunks(&self, size: u32) -> Chunks {
        Chunks {
            next: (!self.is_empty()).then_some(self.start),
            end: self.end,
            size: size.max(1),
        }
    }
}

/// Iterator returned by [`NonceRange::chunks`].
#[derive(Clone, Debug)]
pub struct Chunks {
    next: Option<u32>,
    end: u32,
    size: u32,
}

impl Iterator for Chunks {
    type Item = NonceRange;

    fn next(&mut self) -> Option<NonceRange> {
        let start = self.next?;
        let end = start.saturating_add(self.size - 1).min(self.end);
        self.next = if end == self.end { None } else { Some(end + 1) };
        Some(NonceRange { start, end })
    }
}

/// Abstract nonce-search engine.
///
/// Hosts depend only on this trait; the scalar engine and the GPU batch engine
/// implement it. Engines take `&mut self` because GPU engines own single-writer device
/// state.
pub trait NonceEngine {
    /// Human-readable engine name (for logs).
    fn name(&self) -> &'static str;

    /// Validate host inputs and precompute the per-job context.
    fn prepare_context(&self, header_prefix: &[u8], target: &[u8]) -> Result<JobContext, PowError> {
        JobContext::from_slices(header_prefix, target)
    }

    /// Search an inclusive range.
    ///
    /// Implementations must:
    /// - Return `Found` with the first qualifying nonce in ascending order.
    /// - Return `Exhausted` only when every nonce in the range was checked.
    /// - Return `Unavailable` only if the backend could not run at all.
    fn search_range(&mut self, ctx: &JobContext, range: NonceRange) -> ScanResult;
}

/// Sequential single-threaded scanner.
#[derive(Default, Debug, Clone, Copy)]
pub struct ScalarEngine;

impl ScalarEngine {
    pub fn new() -> Self {
        Self
    }

    /// Scan without requiring `&mut`; the scalar engine holds no state.
    pub fn scan(&self, ctx: &JobContext, range: NonceRange) -> ScanResult {
        first_match(range, |nonce| ctx.is_valid_nonce(nonce))
    }
}

impl NonceEngine for ScalarEngine {
    fn name(&self) -> &'static str {
        "cpu-scalar"
    }

    fn search_range(&mut self, ctx: &JobContext, range: NonceRange) -> ScanResult {
        self.scan(ctx, range)
    }
}

/// Walk `range` in ascending order and return the first nonce accepted by `is_valid`.
fn first_match(range: NonceRange, mut is_valid: impl FnMut(u32) -> bool) -> ScanResult {
    // Ensure start <= end (inclusive range). If not, nothing to scan.
    if range.is_empty() {
        return ScanResult::Exhausted;
    }

    let mut nonce = range.start;
    loop {
        if is_valid(nonce) {
            return ScanResult::Found(nonce);
        }
        if nonce == range.end {
            // End of inclusive range reached; also guards the u32::MAX boundary.
            break ScanResult::Exhausted;
        }
        nonce += 1;
    }
}

/// Scan `[nonce_start, nonce_end]` over `header_prefix || le32(nonce)`.
///
/// Malformed prefix or target lengths are reported as [`PowError`] and never folded into
/// a scan outcome. The result is `Found` or `Exhausted`, never `Unavailable`.
pub fn scalar_scan(
    header_prefix: &[u8],
    nonce_start: u32,
    nonce_end: u32,
    target: &[u8],
) -> Result<ScanResult, PowError> {
    let ctx = JobContext::from_slices(header_prefix, target)?;
    let range = NonceRange::new(nonce_start, nonce_end);
    log::trace!(
        target: "engine_cpu",
        "scalar scan {}..={} ({} nonces)",
        range.start,
        range.end,
        range.len()
    );
    Ok(ScalarEngine::new().scan(&ctx, range))
}
