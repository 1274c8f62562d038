use std::borrow::Cow;
use std::cell::Cell;
use std::time::Duration;

use engine_cpu::{scalar_scan, NonceEngine, NonceRange};
use pow_core::{JobContext, PowError, ScanResult};
use rand::{Rng, SeedableRng};

use super::*;
use crate::resources::PoolSlot;

const GENESIS_PREFIX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d";
// Over nonces 0..=1000 of the genesis prefix only nonce 926 meets this.
const UNIQUE_TARGET: &str = "000f88d07be8bacdfb5178ad5311bc7903420874874698ebc61605862080a24d";
// Hash of prefix 00 01 .. 4b completed with nonce 0xFFFFFFFF.
const TOP_NONCE_HASH: &str = "cfce3081fe62764358ef44e55c1a6222774014716b271ba67e860e770ea3d746";
// Smallest hash of the same prefix over the last 1000 nonces, reached only by 4294967104.
const TOP_RANGE_TARGET: &str = "0000ddd9505b3d9f5dfde938fdd35fc647bb49e41676278739c397b9f428eaab";

fn genesis_prefix() -> Vec<u8> {
    hex::decode(GENESIS_PREFIX).unwrap()
}

fn counting_prefix() -> Vec<u8> {
    (0u8..76).collect()
}

fn target(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap()
}

/// A live engine, or `None` (test skipped) on machines without a compute adapter.
fn gpu() -> Option<GpuEngine> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut engine = GpuEngine::new(GpuConfig::from_env());
    if engine.is_available() {
        Some(engine)
    } else {
        eprintln!("skipping: no compute-capable GPU adapter");
        None
    }
}

const DESKTOP: DeviceLimits = DeviceLimits {
    max_workgroup_size: 1024,
    max_dispatch_groups: 65_535,
};

#[test]
fn lane_width_bounds() {
    assert_eq!(DESKTOP.max_lane_width(), 32);
    assert_eq!(DESKTOP.clamp_lane_width(0), 1);
    assert_eq!(DESKTOP.clamp_lane_width(8), 8);
    assert_eq!(DESKTOP.clamp_lane_width(1_000), 32);

    let small = DeviceLimits {
        max_workgroup_size: 16,
        max_dispatch_groups: 65_535,
    };
    assert_eq!(small.max_lane_width(), 1);
    assert_eq!(small.local_invocation_count(1), 16);

    let huge = DeviceLimits {
        max_workgroup_size: 8_192,
        max_dispatch_groups: 65_535,
    };
    assert_eq!(huge.max_lane_width(), MAX_LANE_WIDTH);
    assert_eq!(huge.local_invocation_count(MAX_LANE_WIDTH), 2_048);
}

#[test]
fn dispatch_geometry() {
    assert_eq!(DESKTOP.local_invocation_count(1), 32);
    assert_eq!(DESKTOP.local_invocation_count(32), 1_024);
    assert_eq!(DESKTOP.group_count(1, 256), 1);
    assert_eq!(DESKTOP.group_count(256, 256), 1);
    assert_eq!(DESKTOP.group_count(257, 256), 2);
    assert_eq!(DESKTOP.group_count(1u64 << 32, 1_024), 65_535);
    assert_eq!(DESKTOP.nonces_per_dispatch(1_024), 65_535 * 1_024);

    // Sub-ranges of one dispatch each cover the whole domain without gaps.
    let per_dispatch = DESKTOP.nonces_per_dispatch(1_024) as u32;
    let covered: u64 = NonceRange::FULL.chunks(per_dispatch).map(|c| c.len()).sum();
    assert_eq!(covered, 1u64 << 32);
}

struct FakeCompiler {
    calls: Cell<u32>,
    fail_first: Cell<bool>,
}

impl FakeCompiler {
    fn new(fail_first: bool) -> Self {
        Self {
            calls: Cell::new(0),
            fail_first: Cell::new(fail_first),
        }
    }
}

impl PipelineCompiler for FakeCompiler {
    type Pipeline = u32;

    fn compile(&self, local_invocation_count: u32) -> Result<u32, GpuError> {
        self.calls.set(self.calls.get() + 1);
        if self.fail_first.replace(false) {
            return Err(GpuError::EmptyShader);
        }
        Ok(local_invocation_count)
    }
}

#[test]
fn pipeline_cache_compiles_each_width_once() {
    let compiler = FakeCompiler::new(false);
    let mut cache = PipelineCache::new();

    assert_eq!(cache.get_or_create(4, &DESKTOP, &compiler).unwrap(), &128);
    assert_eq!(cache.get_or_create(4, &DESKTOP, &compiler).unwrap(), &128);
    assert_eq!(compiler.calls.get(), 1);

    assert_eq!(cache.get_or_create(32, &DESKTOP, &compiler).unwrap(), &1_024);
    assert_eq!(compiler.calls.get(), 2);
    assert_eq!(cache.compile_count(), 2);
    assert!(cache.contains(4) && cache.contains(32));
    assert_eq!(cache.len(), 2);

    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn pipeline_cache_retries_failed_compiles() {
    let compiler = FakeCompiler::new(true);
    let mut cache: PipelineCache<u32> = PipelineCache::new();

    assert!(cache.get_or_create(2, &DESKTOP, &compiler).is_err());
    assert!(!cache.contains(2));
    assert_eq!(cache.compile_count(), 0);

    assert_eq!(cache.get_or_create(2, &DESKTOP, &compiler).unwrap(), &64);
    assert_eq!(compiler.calls.get(), 2);
    assert_eq!(cache.compile_count(), 1);
}

#[test]
fn pool_slot_retries_after_failed_creation() {
    let mut slot: PoolSlot<u32> = PoolSlot::new();
    let attempts = Cell::new(0);

    let failed = slot.ensure(|| {
        attempts.set(attempts.get() + 1);
        Err(GpuError::NotReady)
    });
    assert!(failed.is_err());
    assert_eq!(slot.created(), 0);

    let create = || {
        attempts.set(attempts.get() + 1);
        Ok::<_, GpuError>(7)
    };
    assert_eq!(slot.ensure(create).unwrap(), &7);
    assert_eq!(slot.ensure(create).unwrap(), &7);
    assert_eq!(attempts.get(), 2);
    assert_eq!(slot.created(), 1);
}

#[test]
fn bundled_shader_validates() {
    use wgpu::naga::valid::{Capabilities, ValidationFlags, Validator};

    let module = wgpu::naga::front::wgsl::parse_str(SHA256D_SHADER).unwrap();
    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .unwrap();
    assert!(module
        .entry_points
        .iter()
        .any(|entry| entry.name == ENTRY_POINT));
}

#[test]
fn disabled_backends_stay_unavailable() {
    let mut engine = GpuEngine::new(GpuConfig::disabled());
    assert!(!engine.context().is_probed());

    for _ in 0..3 {
        assert!(!engine.is_available());
        assert_eq!(engine.max_workgroup_size(), 0);
        assert!(!engine.pipeline_ready(1));
    }
    assert!(engine.context().is_probed());

    let result = engine.batch_scan(&genesis_prefix(), 0, 1000, &[0xff; 32], 1);
    assert_eq!(result, Ok(ScanResult::Unavailable));

    // Nothing to release; the outcome sticks.
    engine.teardown();
    assert!(engine.context().is_probed());
    assert!(!engine.is_available());
    assert_eq!(engine.compile_count(), 0);
    assert_eq!(engine.pool_count(), 0);
}

#[test]
fn malformed_inputs_are_errors_without_a_device() {
    let mut engine = GpuEngine::new(GpuConfig::disabled());
    assert_eq!(
        engine.batch_scan(&[0u8; 75], 0, 10, &[0xff; 32], 1),
        Err(PowError::InvalidLength {
            what: "header prefix",
            expected: 76,
            actual: 75
        })
    );
    assert!(engine.batch_scan(&genesis_prefix(), 0, 10, &[0xff; 31], 1).is_err());
    // Rejected before any probe.
    assert!(!engine.context().is_probed());
}

#[test]
fn engine_trait_reports_unavailable_without_device() {
    let mut engine = GpuEngine::new(GpuConfig::disabled());
    let ctx = engine.prepare_context(&genesis_prefix(), &[0xff; 32]).unwrap();
    assert_eq!(engine.name(), "gpu-wgpu");
    assert_eq!(
        engine.search_range(&ctx, NonceRange::new(0, 10)),
        ScanResult::Unavailable
    );
}

#[test]
fn finds_unique_nonce_at_every_lane_width() {
    let Some(mut engine) = gpu() else { return };
    let max = DeviceLimits {
        max_workgroup_size: engine.max_workgroup_size(),
        max_dispatch_groups: 1,
    }
    .max_lane_width();

    for lane_width in [1, 2, 8, max, max + 10] {
        let result = engine.batch_scan(
            &genesis_prefix(),
            0,
            1000,
            &target(UNIQUE_TARGET),
            lane_width,
        );
        assert_eq!(result, Ok(ScanResult::Found(926)), "lane width {lane_width}");
    }
}

#[test]
fn reports_lowest_qualifying_nonce() {
    let Some(mut engine) = gpu() else { return };
    let mut t = [0xffu8; 32];
    t[0] = 0;
    assert_eq!(
        engine.batch_scan(&genesis_prefix(), 0, 1000, &t, 4),
        Ok(ScanResult::Found(310))
    );
    assert_eq!(
        engine.batch_scan(&genesis_prefix(), 311, 1000, &t, 4),
        Ok(ScanResult::Found(356))
    );
    assert_eq!(
        engine.batch_scan(&genesis_prefix(), 930, 1000, &t, 4),
        Ok(ScanResult::Exhausted)
    );
}

#[test]
fn extreme_targets() {
    let Some(mut engine) = gpu() else { return };
    for start in [0u32, 17, 40_000] {
        assert_eq!(
            engine.batch_scan(&genesis_prefix(), start, start + 5_000, &[0xff; 32], 8),
            Ok(ScanResult::Found(start))
        );
    }
    assert_eq!(
        engine.batch_scan(&genesis_prefix(), 0, 5_000, &[0u8; 32], 8),
        Ok(ScanResult::Exhausted)
    );
}

#[test]
fn empty_range_is_exhausted() {
    let Some(mut engine) = gpu() else { return };
    assert_eq!(
        engine.batch_scan(&genesis_prefix(), 10, 9, &[0xff; 32], 1),
        Ok(ScanResult::Exhausted)
    );
}

#[test]
fn top_of_nonce_domain() {
    let Some(mut engine) = gpu() else { return };
    let prefix = counting_prefix();

    // The winner equals the empty-slot marker.
    assert_eq!(
        engine.batch_scan(&prefix, u32::MAX - 1, u32::MAX, &target(TOP_NONCE_HASH), 1),
        Ok(ScanResult::Found(u32::MAX))
    );
    assert_eq!(
        engine.batch_scan(&prefix, u32::MAX - 999, u32::MAX, &target(TOP_RANGE_TARGET), 4),
        Ok(ScanResult::Found(4_294_967_104))
    );
    assert_eq!(
        engine.batch_scan(&prefix, u32::MAX - 999, u32::MAX, &[0u8; 32], 4),
        Ok(ScanResult::Exhausted)
    );
}

#[test]
fn agrees_with_scalar_scan() {
    let Some(mut engine) = gpu() else { return };
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(12345);
    for _ in 0..8 {
        let mut prefix = [0u8; 76];
        rng.fill(&mut prefix[..]);
        let mut t = [0xffu8; 32];
        t[0] = 0;
        t[1] = rng.gen_range(0..0x40);
        let start: u32 = rng.gen_range(0..1_000_000);
        let end = start + 20_000;

        let expected = scalar_scan(&prefix, start, end, &t).unwrap();
        let actual = engine.batch_scan(&prefix, start, end, &t, 16).unwrap();
        assert_eq!(actual, expected, "start {start}");
    }
}

#[test]
fn engine_trait_matches_batch_scan() {
    let Some(mut engine) = gpu() else { return };
    let ctx = JobContext::from_slices(&genesis_prefix(), &target(UNIQUE_TARGET)).unwrap();
    assert_eq!(
        engine.search_range(&ctx, NonceRange::new(0, 1000)),
        ScanResult::Found(926)
    );
}

#[test]
fn repeated_scans_reuse_the_pipeline() {
    let Some(mut engine) = gpu() else { return };
    assert!(engine.pipeline_ready(4));
    assert_eq!(engine.compile_count(), 1);
    assert_eq!(engine.pool_count(), 1);
    for _ in 0..3 {
        engine
            .batch_scan(&genesis_prefix(), 0, 1000, &[0u8; 32], 4)
            .unwrap();
    }
    assert_eq!(engine.compile_count(), 1);
    assert_eq!(engine.pool_count(), 1);

    engine
        .batch_scan(&genesis_prefix(), 0, 1000, &[0u8; 32], 1)
        .unwrap();
    assert_eq!(engine.compile_count(), 2);
    assert_eq!(engine.pool_count(), 1);
}

#[test]
fn teardown_then_scan_reprobes() {
    let Some(mut engine) = gpu() else { return };
    assert!(engine.pipeline_ready(2));
    assert_eq!(engine.pool_count(), 1);

    engine.teardown();
    assert!(!engine.context().is_probed());
    assert_eq!(engine.compile_count(), 0);
    assert_eq!(engine.pool_count(), 0);
    // Twice is harmless.
    engine.teardown();

    assert_eq!(
        engine.batch_scan(&genesis_prefix(), 0, 1000, &target(UNIQUE_TARGET), 2),
        Ok(ScanResult::Found(926))
    );
    assert!(engine.context().is_probed());
    assert_eq!(engine.pool_count(), 1);
}

#[test]
fn teardown_with_configured_timeout() {
    if gpu().is_none() {
        return;
    }
    let mut engine = GpuEngine::new(GpuConfig {
        dispatch_timeout: Duration::from_millis(250),
        ..GpuConfig::from_env()
    });
    assert_eq!(
        engine.batch_scan(&genesis_prefix(), 0, 1000, &target(UNIQUE_TARGET), 4),
        Ok(ScanResult::Found(926))
    );
    engine.teardown();
    assert_eq!(engine.pool_count(), 0);
    assert!(engine.is_available());
}

#[test]
fn broken_shader_reports_unavailable_and_retries() {
    if gpu().is_none() {
        return;
    }
    for source in ["", "this is not wgsl"] {
        let mut engine = GpuEngine::new(GpuConfig {
            shader_source: Cow::Borrowed(source),
            ..GpuConfig::from_env()
        });
        assert!(engine.is_available());
        assert!(!engine.pipeline_ready(1));
        assert!(!engine.pipeline_ready(1));
        assert_eq!(
            engine.batch_scan(&genesis_prefix(), 0, 10, &[0xff; 32], 1),
            Ok(ScanResult::Unavailable)
        );
        assert_eq!(engine.compile_count(), 0);
    }
}
