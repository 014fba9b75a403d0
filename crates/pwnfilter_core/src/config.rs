use crate::consts::{
    AVG_RECORD_WIDTH, DEFAULT_ERROR_RATE, DEFAULT_QUEUE_DEPTH, DEFAULT_SHARDS, KEY_LEN,
};
use crate::errors::{PwnError, Result};
use crate::planner::PlanInput;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Settings for one filter build. Loadable from JSON; missing fields take defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Aggregate false-positive target across all shards.
    pub error_rate: f64,
    pub shards: usize,
    /// Stop after this many accepted keys. `None` reads the whole corpus.
    pub max_entries: Option<u64>,
    /// Explicit entry estimate used when no maximum is set.
    pub capacity: Option<u64>,
    pub key_len: usize,
    pub avg_record_width: u64,
    /// Bound of each shard's queue.
    pub queue_depth: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            error_rate: DEFAULT_ERROR_RATE,
            shards: DEFAULT_SHARDS,
            max_entries: None,
            capacity: None,
            key_len: KEY_LEN,
            avg_record_width: AVG_RECORD_WIDTH,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl BuildConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let f = File::open(path)?;
        let cfg: BuildConfig = serde_json::from_reader(BufReader::new(f))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_len == 0 {
            return Err(PwnError::config("key length must be positive"));
        }
        if self.queue_depth == 0 {
            return Err(PwnError::config("queue depth must be positive"));
        }
        if self.max_entries == Some(0) {
            return Err(PwnError::config("maximum entry count must be positive"));
        }
        Ok(())
    }

    pub fn plan_input(&self, corpus_bytes: Option<u64>) -> PlanInput {
        PlanInput {
            error_rate: self.error_rate,
            shards: self.shards,
            max_entries: self.max_entries,
            capacity: self.capacity,
            corpus_bytes,
            avg_record_width: Some(self.avg_record_width),
        }
    }
}
