//! Shard sizing: turns an aggregate error budget and an insertion estimate into
//! per-shard filter parameters.

use crate::consts::{AVG_RECORD_WIDTH, FILTER_HDR_SIZE, HEADROOM, TAR_MAX_SIZE};
use crate::errors::{PwnError, Result};
use crate::filter::{estimate_parameters, Bloom};
use serde::{Deserialize, Serialize};

/// Where the insertion estimate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateSource {
    MaxEntries,
    Capacity,
    CorpusSize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardPlan {
    pub shards: usize,
    /// Estimated total insertions before headroom.
    pub estimate: u64,
    pub source: EstimateSource,
    /// Keys each shard is sized for.
    pub shard_capacity: u64,
    pub shard_error_rate: f64,
    pub shard_bits: u64,
    pub shard_hashes: u64,
}

impl ShardPlan {
    pub fn total_capacity(&self) -> u64 {
        self.shard_capacity.saturating_mul(self.shards as u64)
    }

    /// Total filter payload in bytes, header excluded.
    pub fn total_bytes(&self) -> u64 {
        (self.shard_bits.div_ceil(64) * 8).saturating_mul(self.shards as u64)
    }

    pub fn build_shards(&self) -> Vec<Bloom> {
        (0..self.shards).map(|_| Bloom::new(self.shard_bits, self.shard_hashes)).collect()
    }
}

/// Inputs to [`plan`]. The first available of `max_entries`, `capacity` and
/// `corpus_bytes / avg_record_width` is used as the estimate.
#[derive(Debug, Clone, Default)]
pub struct PlanInput {
    pub error_rate: f64,
    pub shards: usize,
    pub max_entries: Option<u64>,
    pub capacity: Option<u64>,
    pub corpus_bytes: Option<u64>,
    pub avg_record_width: Option<u64>,
}

pub fn estimate(input: &PlanInput) -> Result<(u64, EstimateSource)> {
    if let Some(n) = input.max_entries {
        return Ok((n, EstimateSource::MaxEntries));
    }
    if let Some(n) = input.capacity {
        return Ok((n, EstimateSource::Capacity));
    }
    match input.corpus_bytes {
        Some(bytes) => {
            let width = input.avg_record_width.unwrap_or(AVG_RECORD_WIDTH);
            if width == 0 {
                return Err(PwnError::config("average record width must be positive"));
            }
            Ok((bytes / width, EstimateSource::CorpusSize))
        }
        None => Err(PwnError::config(
            "no maximum, capacity or corpus size available to estimate the entry count",
        )),
    }
}

pub fn plan(input: &PlanInput) -> Result<ShardPlan> {
    let p = input.error_rate;
    if !(p > 0.0 && p < 1.0) {
        return Err(PwnError::config(format!("error rate {p} must be in (0, 1)")));
    }
    if input.shards == 0 {
        return Err(PwnError::config("shard count must be at least 1"));
    }
    let (n, source) = estimate(input)?;
    if n == 0 {
        return Err(PwnError::config("estimated entry count is zero"));
    }

    let shard_capacity = shard_capacity(n, input.shards)
        .ok_or_else(|| PwnError::config(format!("estimate {n} overflows once headroom is added")))?;
    let shard_error_rate = p * input.shards as f64;
    if shard_error_rate >= 1.0 {
        return Err(PwnError::config(format!(
            "error rate {p} times {} shards leaves no per-shard budget",
            input.shards
        )));
    }
    let (shard_bits, shard_hashes) = estimate_parameters(shard_capacity, shard_error_rate);
    let shard_bytes = FILTER_HDR_SIZE as u64 + shard_bits.div_ceil(64) * 8;
    if shard_bytes > TAR_MAX_SIZE {
        return Err(PwnError::config(format!(
            "each shard would need {shard_bytes} bytes, above the {TAR_MAX_SIZE}-byte record limit; use more shards"
        )));
    }

    Ok(ShardPlan {
        shards: input.shards,
        estimate: n,
        source,
        shard_capacity,
        shard_error_rate,
        shard_bits,
        shard_hashes,
    })
}

/// `ceil((n + HEADROOM·n) / shards)`, headroom truncated to whole entries.
/// `None` when the padded estimate does not fit in a u64.
pub fn shard_capacity(n: u64, shards: usize) -> Option<u64> {
    let padded = n.checked_add((n as f64 * HEADROOM) as u64)?;
    Some(padded.div_ceil(shards.max(1) as u64).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(shards: usize) -> PlanInput {
        PlanInput { error_rate: 1e-6, shards, ..Default::default() }
    }

    #[test]
    fn explicit_max_wins_over_everything() {
        let p = plan(&PlanInput {
            max_entries: Some(1000),
            capacity: Some(5),
            corpus_bytes: Some(1 << 30),
            ..input(4)
        })
        .unwrap();
        assert_eq!(p.estimate, 1000);
        assert_eq!(p.source, EstimateSource::MaxEntries);
        assert_eq!(p.shard_capacity, 300);
        assert!((p.shard_error_rate - 4e-6).abs() < 1e-18);
    }

    #[test]
    fn corpus_size_fallback_uses_record_width() {
        let p = plan(&PlanInput { corpus_bytes: Some(44_000), ..input(8) }).unwrap();
        assert_eq!(p.estimate, 1000);
        assert_eq!(p.source, EstimateSource::CorpusSize);
        assert_eq!(p.shard_capacity, 150);
    }

    #[test]
    fn summed_capacity_stays_within_headroom() {
        for (n, shards) in [(1_000u64, 3usize), (999_983, 128), (17, 16), (1, 1)] {
            let p = plan(&PlanInput { max_entries: Some(n), ..input(shards) }).unwrap();
            let total = p.total_capacity();
            let padded = n + n / 5;
            assert!(total >= padded, "n={n} shards={shards}");
            assert!(total < padded + shards as u64, "n={n} shards={shards}");
        }
    }

    #[test]
    fn parameters_follow_shard_budget() {
        let p = plan(&PlanInput { max_entries: Some(10_000), ..input(10) }).unwrap();
        assert_eq!((p.shard_bits, p.shard_hashes), estimate_parameters(1200, 1e-5));
        let shards = p.build_shards();
        assert_eq!(shards.len(), 10);
        assert!(shards.iter().all(|s| s.bits() == p.shard_bits && s.hashes() == p.shard_hashes));
    }

    #[test]
    fn fails_fast_without_estimate() {
        assert!(matches!(plan(&input(4)), Err(PwnError::Config(_))));
    }

    #[test]
    fn rejects_bad_configuration() {
        let ok = PlanInput { max_entries: Some(10), ..input(4) };
        assert!(plan(&PlanInput { shards: 0, ..ok.clone() }).is_err());
        assert!(plan(&PlanInput { error_rate: 0.0, ..ok.clone() }).is_err());
        assert!(plan(&PlanInput { error_rate: 1.5, ..ok.clone() }).is_err());
        assert!(plan(&PlanInput { error_rate: 0.3, ..ok.clone() }).is_err());
        assert!(plan(&PlanInput { max_entries: Some(0), ..ok.clone() }).is_err());
        assert!(plan(&PlanInput { corpus_bytes: Some(10), max_entries: None, ..ok.clone() }).is_err());
    }

    #[test]
    fn huge_estimates_are_config_errors() {
        let err = plan(&PlanInput { capacity: Some(u64::MAX), ..input(4) }).unwrap_err();
        assert!(matches!(err, PwnError::Config(_)));
        let err = plan(&PlanInput { max_entries: Some(u64::MAX / 10 * 9), ..input(1) }).unwrap_err();
        assert!(matches!(err, PwnError::Config(_)));
        // fits in a u64 but not in a single record
        let err = plan(&PlanInput { capacity: Some(1 << 40), ..input(4) }).unwrap_err();
        assert!(matches!(err, PwnError::Config(_)));
        assert!(plan(&PlanInput { capacity: Some(1 << 40), ..input(4096) }).is_ok());
        assert_eq!(shard_capacity(u64::MAX, 4), None);
        assert_eq!(shard_capacity(1000, 3), Some(400));
    }
}
