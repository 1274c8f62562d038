use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use engine_cpu::{NonceRange, ScalarEngine, DEFAULT_CHUNK_SIZE};
use engine_gpu::{GpuConfig, GpuEngine};
use pow_core::{
    target_from_difficulty, HeaderPrefix, JobContext, ScanResult, Target, HASH_LEN,
    HEADER_LEN, HEADER_PREFIX_LEN,
};
use rand::RngCore;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the hash core and, when a GPU is present, the GPU path against known vectors
    SelfTest,
    /// Double-SHA256 an 80-byte block header
    Hash {
        /// Header as 160 hex characters
        #[arg(long)]
        header: String,
    },
    /// Search a nonce range for a hash at or below the target
    Scan {
        /// Header prefix (76 bytes) as hex
        #[arg(long, env = "MINER_PREFIX")]
        prefix: String,

        /// Target (32 bytes, big-endian) as hex
        #[arg(
            long,
            env = "MINER_TARGET",
            conflicts_with = "difficulty",
            required_unless_present = "difficulty"
        )]
        target: Option<String>,

        /// Pool share difficulty, converted to a target
        #[arg(long, env = "MINER_DIFFICULTY")]
        difficulty: Option<f64>,

        /// First nonce (inclusive)
        #[arg(long, default_value_t = 0)]
        start: u32,

        /// Last nonce (inclusive)
        #[arg(long, default_value_t = u32::MAX)]
        end: u32,

        /// Search engine to use
        #[arg(long, env = "MINER_ENGINE", value_enum, default_value_t = EngineCli::Cpu)]
        engine: EngineCli,

        /// GPU lanes per workgroup in units of 32 invocations (clamped to the device)
        #[arg(long, env = "MINER_LANE_WIDTH", default_value_t = 8)]
        lane_width: u32,

        /// Scan on the CPU when the GPU is unavailable
        #[arg(long, env = "MINER_CPU_FALLBACK")]
        cpu_fallback: bool,
    },
    /// Report GPU availability, limits and pipeline readiness
    Probe {
        /// Lane widths to warm; defaults to powers of two up to the device bound
        #[arg(long = "lane-width", value_delimiter = ',')]
        lane_widths: Vec<u32>,
    },
    /// Run a quick throughput benchmark of the specified engine
    Benchmark {
        /// Search engine to benchmark
        #[arg(long, env = "MINER_ENGINE", value_enum, default_value_t = EngineCli::Cpu)]
        engine: EngineCli,

        /// Number of CPU worker threads (defaults to all logical CPUs)
        #[arg(long = "workers", env = "MINER_WORKERS")]
        workers: Option<usize>,

        /// Benchmark duration in seconds
        #[arg(short, long, default_value_t = 10)]
        duration: u64,

        /// GPU lane width
        #[arg(long, env = "MINER_LANE_WIDTH", default_value_t = 8)]
        lane_width: u32,
    },
}

/// Double-SHA256 nonce search
#[derive(Parser, Debug)]
#[command(
    author,
    version = option_env!("MINER_VERSION").unwrap_or(env!("CARGO_PKG_VERSION")),
    about,
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, env = "MINER_VERBOSE", global = true)]
    verbose: bool,

    /// Per-dispatch GPU timeout in milliseconds
    #[arg(long, env = "MINER_GPU_TIMEOUT_MS", default_value_t = 5_000, global = true)]
    gpu_timeout_ms: u64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum EngineCli {
    /// Sequential scalar scanner
    Cpu,
    /// wgpu batch scanner
    Gpu,
}

impl Args {
    fn gpu_config(&self) -> GpuConfig {
        GpuConfig {
            dispatch_timeout: Duration::from_millis(self.gpu_timeout_ms),
            ..GpuConfig::from_env()
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over the verbosity-derived default.
    let default_filter = if args.verbose {
        "debug,gpu_engine=debug,engine_cpu=trace"
    } else {
        "info,gpu_engine=warn,engine_cpu=info,wgpu_core=warn,wgpu_hal=warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match &args.command {
        Command::SelfTest => run_self_test(),
        Command::Hash { header } => {
            let header = parse_hex("header", header, HEADER_LEN)?;
            let hash = pow_core::hash_header(&header)?;
            println!("{}", hex::encode(hash));
            Ok(())
        }
        Command::Scan {
            prefix,
            target,
            difficulty,
            start,
            end,
            engine,
            lane_width,
            cpu_fallback,
        } => {
            let prefix =
                HeaderPrefix::from_slice(&parse_hex("prefix", prefix, HEADER_PREFIX_LEN)?)?;
            let target = match (target, difficulty) {
                (Some(hex_target), _) => {
                    Target::from_slice(&parse_hex("target", hex_target, HASH_LEN)?)?
                }
                (None, Some(difficulty)) => target_from_difficulty(*difficulty),
                (None, None) => bail!("either --target or --difficulty is required"),
            };
            let ctx = JobContext::new(prefix, target);
            let range = NonceRange::new(*start, *end);
            run_scan(&args, &ctx, range, *engine, *lane_width, *cpu_fallback)
        }
        Command::Probe { lane_widths } => run_probe(&args, lane_widths),
        Command::Benchmark {
            engine,
            workers,
            duration,
            lane_width,
        } => run_benchmark(&args, *engine, *workers, *duration, *lane_width),
    }
}

/// Decode `value` as hex and require exactly `len` bytes.
fn parse_hex(what: &str, value: &str, len: usize) -> Result<Vec<u8>> {
    let value = value.trim();
    let value = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(value).with_context(|| format!("{what} is not valid hex"))?;
    if bytes.len() != len {
        bail!("{what} must be {len} bytes, got {}", bytes.len());
    }
    Ok(bytes)
}

fn run_self_test() -> Result<()> {
    const GENESIS_HEADER: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";
    const GENESIS_HASH: &str = "6fe28c0ab6f1b372c1a6a246ae63f74f931e8365e15a089c68d6190000000000";
    // Over nonces 0..=1000 of the genesis prefix only nonce 926 meets this.
    const UNIQUE_TARGET: &str = "000f88d07be8bacdfb5178ad5311bc7903420874874698ebc61605862080a24d";

    println!("nonce-miner {}", miner_bridge::version());

    if !miner_bridge::self_test() {
        bail!("hash core failed the sha256(\"abc\") vector");
    }
    println!("hash core: ok");

    let header = parse_hex("header", GENESIS_HEADER, HEADER_LEN)?;
    let hash = miner_bridge::hash_header(&header)?;
    if hex::encode(hash) != GENESIS_HASH {
        bail!("genesis header hashed to {}", hex::encode(hash));
    }
    println!("header hash: ok");

    let target = parse_hex("target", UNIQUE_TARGET, HASH_LEN)?;
    let prefix = &header[..HEADER_PREFIX_LEN];
    let code = miner_bridge::scalar_scan(prefix, 0, 1000, &target);
    if code != 926 {
        bail!("scalar scan returned {code}, expected 926");
    }
    println!("scalar scan: ok");

    if !miner_bridge::gpu_is_available() {
        println!("gpu scan: skipped (no device)");
        return Ok(());
    }
    let code = miner_bridge::gpu_scan(prefix, 0, 1000, &target, 8);
    miner_bridge::gpu_teardown();
    if code != 926 {
        bail!("gpu scan returned {code}, expected 926");
    }
    println!("gpu scan: ok");
    Ok(())
}

fn run_scan(
    args: &Args,
    ctx: &JobContext,
    range: NonceRange,
    engine: EngineCli,
    lane_width: u32,
    cpu_fallback: bool,
) -> Result<()> {
    log::info!(
        "Scanning {}..={} ({} nonces) on {:?}",
        range.start,
        range.end,
        range.len(),
        engine
    );
    let started = Instant::now();

    let mut result = match engine {
        EngineCli::Cpu => ScalarEngine::new().scan(ctx, range),
        EngineCli::Gpu => {
            let mut gpu = GpuEngine::new(args.gpu_config());
            gpu.scan(ctx, range, lane_width)
        }
    };
    if result == ScanResult::Unavailable && cpu_fallback {
        log::warn!("GPU unavailable, falling back to the CPU");
        result = ScalarEngine::new().scan(ctx, range);
    }
    log::info!("Scan finished in {:.2?}", started.elapsed());

    match result {
        ScanResult::Found(nonce) => {
            println!("found {nonce} {}", hex::encode(ctx.hash_for_nonce(nonce)));
            Ok(())
        }
        ScanResult::Exhausted => {
            println!("exhausted");
            Ok(())
        }
        ScanResult::Unavailable => Err(anyhow!(
            "GPU unavailable; rerun with --engine cpu or --cpu-fallback"
        )),
    }
}

fn run_probe(args: &Args, lane_widths: &[u32]) -> Result<()> {
    let mut gpu = GpuEngine::new(args.gpu_config());
    if !gpu.is_available() {
        println!("gpu: unavailable");
        return Ok(());
    }
    if let Some(info) = gpu.context().adapter_info() {
        println!("gpu: {} ({:?}, {:?})", info.name, info.backend, info.device_type);
    }
    let limits = gpu
        .context()
        .limits()
        .ok_or_else(|| anyhow!("device limits missing after a successful probe"))?;
    println!("max workgroup size: {}", limits.max_workgroup_size);
    println!("max dispatch groups: {}", limits.max_dispatch_groups);
    println!("max lane width: {}", limits.max_lane_width());

    let widths: Vec<u32> = if lane_widths.is_empty() {
        (0..)
            .map(|shift| 1u32 << shift)
            .take_while(|&w| w <= limits.max_lane_width())
            .collect()
    } else {
        lane_widths.to_vec()
    };
    for width in widths {
        let clamped = limits.clamp_lane_width(width);
        let ready = gpu.pipeline_ready(width);
        println!(
            "lane width {width} (-> {clamped}, {} invocations): {}",
            limits.local_invocation_count(clamped),
            if ready { "ready" } else { "failed" }
        );
    }
    println!("pipelines compiled: {}", gpu.compile_count());
    gpu.teardown();
    Ok(())
}

fn format_rate(rate: f64) -> String {
    if rate >= 1_000_000.0 {
        format!("{:.2}M H/s", rate / 1_000_000.0)
    } else if rate >= 1_000.0 {
        format!("{:.2}K H/s", rate / 1_000.0)
    } else {
        format!("{:.0} H/s", rate)
    }
}

fn random_job() -> JobContext {
    let mut prefix = [0u8; HEADER_PREFIX_LEN];
    rand::thread_rng().fill_bytes(&mut prefix);
    // Zero target - no solutions expected, every nonce is hashed
    JobContext::new(HeaderPrefix::new(prefix), Target::ZERO)
}

fn run_benchmark(
    args: &Args,
    engine: EngineCli,
    workers: Option<usize>,
    duration_secs: u64,
    lane_width: u32,
) -> Result<()> {
    let duration = Duration::from_secs(duration_secs);
    println!("Nonce Miner Benchmark");
    println!("=====================");
    println!("Engine: {:?}", engine);
    println!("Duration: {} seconds", duration_secs);

    let started = Instant::now();
    let total_hashes = match engine {
        EngineCli::Cpu => {
            let workers = workers.unwrap_or_else(num_cpus::get).max(1);
            println!("Workers: {workers}");
            benchmark_cpu(workers, duration)
        }
        EngineCli::Gpu => benchmark_gpu(args.gpu_config(), lane_width, duration)?,
    };
    let elapsed = started.elapsed().as_secs_f64();

    println!();
    println!("Total time: {:.2} seconds", elapsed);
    println!("Total hashes: {}", total_hashes);
    println!("Average hash rate: {}", format_rate(total_hashes as f64 / elapsed));
    Ok(())
}

/// Each worker walks its own chunks of the nonce space until time runs out.
fn benchmark_cpu(workers: usize, duration: Duration) -> u64 {
    const BENCH_CHUNK: u32 = 16 * 1024;
    let ctx = Arc::new(random_job());
    let stop = Arc::new(AtomicBool::new(false));
    let hashes = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let ctx = Arc::clone(&ctx);
            let stop = Arc::clone(&stop);
            let hashes = Arc::clone(&hashes);
            thread::spawn(move || {
                let engine = ScalarEngine::new();
                let chunks = NonceRange::FULL.chunks(BENCH_CHUNK).skip(worker).step_by(workers);
                for chunk in chunks {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    engine.scan(&ctx, chunk);
                    hashes.fetch_add(chunk.len(), Ordering::Relaxed);
                }
            })
        })
        .collect();

    let started = Instant::now();
    while started.elapsed() < duration {
        thread::sleep(Duration::from_secs(1).min(duration));
        println!(
            "{:.1}s - {}",
            started.elapsed().as_secs_f64(),
            format_rate(hashes.load(Ordering::Relaxed) as f64 / started.elapsed().as_secs_f64())
        );
    }
    stop.store(true, Ordering::Relaxed);
    for handle in handles {
        let _ = handle.join();
    }
    hashes.load(Ordering::Relaxed)
}

fn benchmark_gpu(config: GpuConfig, lane_width: u32, duration: Duration) -> Result<u64> {
    let mut gpu = GpuEngine::new(config);
    if !gpu.is_available() {
        bail!("GPU engine selected but no compute-capable GPU was found");
    }
    if !gpu.pipeline_ready(lane_width) {
        bail!("GPU pipeline for lane width {lane_width} could not be created");
    }

    let ctx = random_job();
    let started = Instant::now();
    let mut hashes = 0u64;
    for chunk in NonceRange::FULL.chunks(DEFAULT_CHUNK_SIZE * 8) {
        if started.elapsed() >= duration {
            break;
        }
        match gpu.scan(&ctx, chunk, lane_width) {
            ScanResult::Unavailable => bail!("GPU became unavailable during the benchmark"),
            _ => hashes += chunk.len(),
        }
    }
    gpu.teardown();
    Ok(hashes)
}
