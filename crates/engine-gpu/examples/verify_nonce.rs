use engine_cpu::{NonceEngine, NonceRange, ScalarEngine};
use engine_gpu::{GpuConfig, GpuEngine};
use pow_core::{HeaderPrefix, JobContext, ScanResult, Target};

fn main() {
    // Initialize logging
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    log::info!("Starting verify_nonce example");

    // Fixed header and an easy target (first byte zero): roughly one nonce in 256 qualifies.
    let prefix = HeaderPrefix::new([1u8; 76]);
    let mut target = [0xffu8; 32];
    target[0] = 0;
    let ctx = JobContext::new(prefix, Target::new(target));
    let range = NonceRange::new(0, 1_000_000);

    let mut cpu_engine = ScalarEngine::new();
    let cpu_result = cpu_engine.search_range(&ctx, range);
    log::info!("CPU result: {:?}", cpu_result);

    log::info!("Initializing GPU engine...");
    let mut gpu_engine = GpuEngine::new(GpuConfig::from_env());
    if !gpu_engine.is_available() {
        log::error!("No compute-capable GPU adapter found");
        return;
    }

    let start = std::time::Instant::now();
    let gpu_result = gpu_engine.search_range(&ctx, range);
    log::info!("GPU search took {:?}", start.elapsed());

    match gpu_result {
        ScanResult::Found(nonce) if gpu_result == cpu_result => {
            log::info!(
                "SUCCESS: GPU and CPU agree on nonce {} (hash {})",
                nonce,
                hex::encode(ctx.hash_for_nonce(nonce))
            );
        }
        ScanResult::Exhausted if gpu_result == cpu_result => {
            log::info!("SUCCESS: both engines exhausted the range");
        }
        ScanResult::Unavailable => log::error!("FAILURE: GPU became unavailable"),
        other => log::error!("FAILURE: GPU returned {:?}, CPU returned {:?}", other, cpu_result),
    }

    gpu_engine.teardown();
}
