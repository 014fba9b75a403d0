use crate::config::BuildConfig;
use crate::container::write_container;
use crate::errors::{PwnError, Result, Stage};
use crate::ingest::{ingest, CorpusLines, IngestStats, PipelineConfig, Progress};
use crate::planner::{plan, ShardPlan};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::info;

/// Outcome of a successful build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub plan: ShardPlan,
    pub stats: IngestStats,
    pub output: PathBuf,
    pub container_bytes: u64,
}

/// Plans, fills and writes a sharded filter for the corpus at `input`.
/// Nothing is written to `output` unless every stage succeeds.
pub fn build_filter(input: &Path, output: &Path, cfg: &BuildConfig) -> Result<BuildReport> {
    cfg.validate()?;
    let corpus = File::open(input).map_err(|e| PwnError::stage(Stage::Read, format!("{}: {e}", input.display())))?;
    let corpus_bytes = corpus.metadata().ok().map(|m| m.len());

    let plan = plan(&cfg.plan_input(corpus_bytes))?;
    info!(
        shards = plan.shards,
        estimate = plan.estimate,
        shard_capacity = plan.shard_capacity,
        shard_error_rate = plan.shard_error_rate,
        shard_bits = plan.shard_bits,
        shard_hashes = plan.shard_hashes,
        total_capacity = plan.total_capacity(),
        total_bytes = plan.total_bytes(),
        "filter configuration"
    );

    let pipeline = PipelineConfig {
        key_len: cfg.key_len,
        max_entries: cfg.max_entries,
        queue_depth: cfg.queue_depth,
    };
    let progress = Progress::new(Some(plan.estimate));
    let lines = CorpusLines::new(BufReader::with_capacity(1 << 20, corpus));
    let (set, stats) = ingest(lines, plan.build_shards(), &pipeline, &progress)?;

    let output = write_container(output, &set)?;
    let container_bytes = fs::metadata(&output)?.len();
    Ok(BuildReport { plan, stats, output, container_bytes })
}
