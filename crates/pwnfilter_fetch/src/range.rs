use crate::{publish, staging_file, FetchSummary, HashingWriter};
use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use pwnfilter_core::utils::trim_eol;
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Number of five-hex-digit prefixes served by the range API.
pub const RANGE_COUNT: u32 = 1 << 20;
pub const RANGE_API: &str = "https://api.pwnedpasswords.com/range/";

/// Upper-case five-digit prefix for range `idx`.
pub fn range_prefix(idx: u32) -> String {
    format!("{idx:05X}")
}

/// Anything that can return the raw body for one prefix.
pub trait RangeSource: Sync {
    fn fetch(&self, prefix: &str) -> Result<Vec<u8>>;
}

pub struct HttpRangeSource {
    client: reqwest::blocking::Client,
    base: String,
    retries: u32,
}

impl HttpRangeSource {
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(64)
            .user_agent(concat!("pwnfilter/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, base: base.into(), retries: 3 })
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    fn fetch_once(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send()?.error_for_status()?;
        Ok(resp.bytes()?.to_vec())
    }
}

impl RangeSource for HttpRangeSource {
    fn fetch(&self, prefix: &str) -> Result<Vec<u8>> {
        let url = format!("{}{prefix}", self.base);
        let mut attempt = 0;
        loop {
            match self.fetch_once(&url) {
                Ok(body) => return Ok(body),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(prefix, attempt, error = %e, "range request failed, retrying");
                    thread::sleep(Duration::from_millis(250 << attempt));
                }
                Err(e) => return Err(e.context(format!("GET {url}"))),
            }
        }
    }
}

/// Writes each non-empty suffix line of `body` as `prefix` + line + `\n`.
/// Returns the number of lines written.
pub fn expand_range<W: Write>(prefix: &str, body: &[u8], out: &mut W) -> std::io::Result<u64> {
    let mut lines = 0;
    for line in body.split(|b| *b == b'\n') {
        let line = trim_eol(line);
        if line.is_empty() {
            continue;
        }
        out.write_all(prefix.as_bytes())?;
        out.write_all(line)?;
        out.write_all(b"\n")?;
        lines += 1;
    }
    Ok(lines)
}

#[derive(Debug, Clone)]
pub struct RangeConfig {
    pub workers: usize,
    /// Fetch only the first `ranges` prefixes.
    pub ranges: u32,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self { workers: 64, ranges: RANGE_COUNT }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RangeStats {
    pub ranges: u32,
    pub lines: u64,
}

/// Fetches ranges `0..cfg.ranges` with `cfg.workers` threads and writes them
/// to `out` in index order. At most `4 * workers` ranges are in flight or
/// buffered at any time. The first failed range aborts the run.
pub fn fetch_ranges<S, W>(source: &S, out: &mut W, cfg: &RangeConfig) -> Result<RangeStats>
where
    S: RangeSource,
    W: Write,
{
    if cfg.ranges == 0 || cfg.ranges > RANGE_COUNT {
        bail!("range count must be in 1..={RANGE_COUNT}, got {}", cfg.ranges);
    }
    let workers = cfg.workers.max(1);
    let window = workers * 4;
    let ranges = cfg.ranges;

    let (job_tx, job_rx) = bounded::<u32>(window);
    let (done_tx, done_rx) = bounded::<(u32, Result<Vec<u8>>)>(window);
    let (credit_tx, credit_rx) = bounded::<()>(window);
    for _ in 0..window {
        credit_tx.send(()).context("credit channel closed")?;
    }

    thread::scope(|s| {
        s.spawn(move || {
            for idx in 0..ranges {
                if credit_rx.recv().is_err() || job_tx.send(idx).is_err() {
                    break;
                }
            }
        });

        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            s.spawn(move || {
                for idx in job_rx.iter() {
                    let body = source.fetch(&range_prefix(idx));
                    if done_tx.send((idx, body)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(done_tx);

        // Dropping the receiver and credits on return stops the producer and
        // lets workers exit after their current request.
        write_in_order(done_rx, credit_tx, out, ranges)
    })
}

fn write_in_order<W: Write>(
    done_rx: Receiver<(u32, Result<Vec<u8>>)>,
    credit_tx: Sender<()>,
    out: &mut W,
    ranges: u32,
) -> Result<RangeStats> {
    let step = (ranges / 100).max(1);
    let mut pending = BTreeMap::new();
    let mut next = 0u32;
    let mut lines = 0u64;

    for (idx, body) in done_rx.iter() {
        let body = body.with_context(|| format!("range {} failed", range_prefix(idx)))?;
        pending.insert(idx, body);
        while let Some(body) = pending.remove(&next) {
            lines += expand_range(&range_prefix(next), &body, out)?;
            next += 1;
            let _ = credit_tx.send(());
            if next % step == 0 {
                info!(done = next, total = ranges, lines, "ranges written");
            }
        }
        debug!(buffered = pending.len(), "reorder buffer");
    }

    if next != ranges {
        bail!("download stopped after {next} of {ranges} ranges");
    }
    Ok(RangeStats { ranges: next, lines })
}

/// Runs [`fetch_ranges`] into a staged file and publishes it at `path` once
/// the optional SHA-256 matches.
pub fn fetch_ranges_to_file<S: RangeSource>(
    source: &S,
    path: &Path,
    cfg: &RangeConfig,
    expected_sha256: Option<&str>,
) -> Result<FetchSummary> {
    let tmp = staging_file(path)?;
    let mut writer = HashingWriter::new(BufWriter::with_capacity(1 << 20, tmp.as_file()));
    let stats = fetch_ranges(source, &mut writer, cfg)?;
    let bytes = writer.bytes();
    let (buf, sha256) = writer.finish()?;
    drop(buf);

    publish(tmp, path, &sha256, expected_sha256)?;
    info!(path = %path.display(), bytes, lines = stats.lines, sha256 = %sha256, "range download complete");
    Ok(FetchSummary { path: path.to_path_buf(), bytes, lines: stats.lines, ranges: stats.ranges, sha256 })
}
