use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::Level;

use pwnfilter_core::{build_filter, read_container, BuildConfig};
use pwnfilter_fetch::range::{RangeConfig, RANGE_API, RANGE_COUNT};
use pwnfilter_fetch::{download_archive, fetch_ranges_to_file, FetchSummary, HttpRangeSource};

#[derive(Parser)]
#[command(name = "pwnfilter", version, about = "Sharded Bloom filters for breached password digests")]
struct Cli {
    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(ValueEnum, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Every five-digit prefix of the range API
    Ranges,
    /// One archive file from --url
    Archive,
}

#[derive(Subcommand)]
enum Cmd {
    /// Download the digest corpus
    Fetch {
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = FetchMode::Ranges)]
        mode: FetchMode,
        /// Range API base URL, or the archive URL in archive mode
        #[arg(long)]
        url: Option<String>,
        /// Fail and delete the download if its SHA-256 differs
        #[arg(long, value_name = "HEX")]
        expect_sha256: Option<String>,
        #[arg(long, default_value_t = 64)]
        workers: usize,
        /// Attempts per range after the first failure
        #[arg(long, default_value_t = 3)]
        retries: u32,
        /// Fetch only the first N ranges
        #[arg(long, default_value_t = RANGE_COUNT)]
        ranges: u32,
        #[arg(long)]
        json: bool,
    },

    /// Build a sharded filter container from a corpus
    Gen {
        input: PathBuf,
        output: PathBuf,
        /// Aggregate false-positive rate [default: 1e-8]
        #[arg(short = 'e', long = "error")]
        error_rate: Option<f64>,
        /// Number of shards [default: 128]
        #[arg(short, long)]
        shards: Option<usize>,
        /// Stop after N entries, -1 for no limit [default: -1]
        #[arg(short, long, allow_negative_numbers = true)]
        max: Option<i64>,
        /// Entry estimate to size for when no maximum is set
        #[arg(long)]
        capacity: Option<u64>,
        /// Digest width in bytes [default: 40]
        #[arg(long)]
        key_len: Option<usize>,
        /// Per-shard queue bound
        #[arg(long)]
        queue_depth: Option<usize>,
        /// JSON build config; flags given here override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print the build report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show shard statistics of a container
    Info {
        container: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

struct GenOverrides {
    error_rate: Option<f64>,
    shards: Option<usize>,
    max: Option<i64>,
    capacity: Option<u64>,
    key_len: Option<usize>,
    queue_depth: Option<usize>,
}

fn build_config(path: Option<&Path>, o: GenOverrides) -> Result<BuildConfig> {
    let mut cfg = match path {
        Some(p) => BuildConfig::load(p).with_context(|| format!("config {}", p.display()))?,
        None => BuildConfig::default(),
    };
    if let Some(e) = o.error_rate { cfg.error_rate = e; }
    if let Some(s) = o.shards { cfg.shards = s; }
    if let Some(m) = o.max {
        cfg.max_entries = u64::try_from(m).ok();
    }
    if let Some(c) = o.capacity { cfg.capacity = Some(c); }
    if let Some(k) = o.key_len { cfg.key_len = k; }
    if let Some(q) = o.queue_depth { cfg.queue_depth = q; }
    Ok(cfg)
}

fn check_digest(hex_digest: &str) -> Result<()> {
    let raw = hex::decode(hex_digest).map_err(|e| anyhow!("--expect-sha256: {e}"))?;
    if raw.len() != 32 {
        bail!("--expect-sha256 must be 64 hex digits, got {}", hex_digest.len());
    }
    Ok(())
}

fn print_fetch(summary: &FetchSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!("wrote   : {} ({} bytes)", summary.path.display(), summary.bytes);
        if summary.ranges > 0 {
            println!("ranges  : {}", summary.ranges);
            println!("lines   : {}", summary.lines);
        }
        println!("sha256  : {}", summary.sha256);
    }
    Ok(())
}

fn info(container: &Path, as_json: bool) -> Result<()> {
    let set = read_container(container).with_context(|| format!("reading {}", container.display()))?;
    if as_json {
        let shards: Vec<_> = set
            .shards()
            .iter()
            .enumerate()
            .map(|(i, s)| {
                json!({
                    "shard": i,
                    "bits": s.bits(),
                    "hashes": s.hashes(),
                    "bits_set": s.bits_set(),
                    "fill_ratio": s.fill_ratio(),
                    "approximate_len": s.approximate_len(),
                })
            })
            .collect();
        let doc = json!({ "path": container, "shards": set.len(), "stats": shards });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("container: {}", container.display());
    println!("shards   : {}", set.len());
    let mut total = 0u64;
    let mut bytes = 0u64;
    for (i, s) in set.shards().iter().enumerate() {
        let approx = s.approximate_len();
        total += approx;
        bytes += s.serialized_len();
        println!(
            "  [{i:>4}] m={} k={} fill={:.4} ~{} entries",
            s.bits(),
            s.hashes(),
            s.fill_ratio(),
            approx
        );
    }
    println!("entries  : ~{total}");
    println!("size     : {bytes} bytes uncompressed");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.quiet { Level::WARN } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.cmd {
        Cmd::Fetch { output, mode, url, expect_sha256, workers, retries, ranges, json } => {
            if let Some(d) = &expect_sha256 {
                check_digest(d)?;
            }
            let summary = match mode {
                FetchMode::Ranges => {
                    let source = HttpRangeSource::new(url.unwrap_or_else(|| RANGE_API.to_string()))?
                        .with_retries(retries);
                    let cfg = RangeConfig { workers, ranges };
                    fetch_ranges_to_file(&source, &output, &cfg, expect_sha256.as_deref())?
                }
                FetchMode::Archive => {
                    let url = url.ok_or_else(|| anyhow!("archive mode needs --url"))?;
                    download_archive(&url, &output, expect_sha256.as_deref())?
                }
            };
            print_fetch(&summary, json)?;
        }
        Cmd::Gen { input, output, error_rate, shards, max, capacity, key_len, queue_depth, config, json } => {
            let overrides = GenOverrides { error_rate, shards, max, capacity, key_len, queue_depth };
            let cfg = build_config(config.as_deref(), overrides)?;
            let report = build_filter(&input, &output, &cfg)
                .with_context(|| format!("building {} from {}", output.display(), input.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("gen: wrote {} ({} bytes)", report.output.display(), report.container_bytes);
                println!("shards   : {} x {} bits, k={}", report.plan.shards, report.plan.shard_bits, report.plan.shard_hashes);
                println!("filters  : {} bytes for {} entries", report.plan.total_bytes(), report.plan.total_capacity());
                println!("inserted : {} of {} lines ({} skipped)", report.stats.inserted(), report.stats.lines, report.stats.skipped);
                if report.stats.cutover {
                    println!("stopped at the configured maximum");
                }
            }
        }
        Cmd::Info { container, json } => info(&container, json)?,
    }
    Ok(())
}
