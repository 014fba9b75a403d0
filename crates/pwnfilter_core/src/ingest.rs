//! Corpus ingestion: one reader thread routes keys round-robin into bounded
//! per-shard queues, one worker per shard drains its queue into its own filter.
//!
//! ```text
//!   corpus ──► reader (validate, route, count) ──► queue 0 ──► worker 0 ──► Bloom 0
//!                                              ├─► queue 1 ──► worker 1 ──► Bloom 1
//!                                              └─► queue N ──► worker N ──► Bloom N
//! ```
//!
//! End of corpus and the max-entries cutover both close the queues; workers exit
//! once their queue is drained, so every accepted key is inserted. A read error
//! fires the cancel token instead and the partially filled shards are discarded.

use crate::errors::{PwnError, Result, Stage};
use crate::filter::{Bloom, ShardSet};
use crate::router::ShardRouter;
use crate::utils::trim_eol;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use tracing::{debug, info, warn};

/// Progress log interval when the total is unknown.
const LOG_EVERY: u64 = 1_000_000;

/// Splits a reader into byte lines without the line terminator.
pub struct CorpusLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> CorpusLines<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, buf: Vec::with_capacity(64) }
    }
}

impl<R: BufRead> Iterator for CorpusLines<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => Some(Ok(trim_eol(&self.buf).to_vec())),
            Err(e) => Some(Err(e)),
        }
    }
}

/// Broadcast stop signal. Cancelling drops the only sender, which makes every
/// listener's `recv` return immediately.
pub struct CancelToken {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self { tx: Mutex::new(Some(tx)), rx }
    }

    pub fn listener(&self) -> Receiver<()> {
        self.rx.clone()
    }

    pub fn cancel(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters shared by the reader and all shard workers.
#[derive(Debug)]
pub struct Progress {
    accepted: AtomicU64,
    inserted: AtomicU64,
    total: Option<u64>,
    step: u64,
}

impl Progress {
    pub fn new(total: Option<u64>) -> Self {
        let step = total.map(|t| (t / 100).max(1)).unwrap_or(LOG_EVERY);
        Self { accepted: AtomicU64::new(0), inserted: AtomicU64::new(0), total, step }
    }

    pub fn accepted(&self) -> u64 { self.accepted.load(Ordering::Relaxed) }
    pub fn inserted(&self) -> u64 { self.inserted.load(Ordering::Relaxed) }

    fn record_accept(&self) {
        let n = self.accepted.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.step != 0 {
            return;
        }
        match self.total {
            Some(total) => info!(
                accepted = n,
                inserted = self.inserted(),
                percent = n.saturating_mul(100) / total.max(1),
                "ingest progress"
            ),
            None => info!(accepted = n, inserted = self.inserted(), "ingest progress"),
        }
    }

    fn record_insert(&self) {
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub key_len: usize,
    pub max_entries: Option<u64>,
    pub queue_depth: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub lines: u64,
    pub accepted: u64,
    pub skipped: u64,
    /// Keys inserted per shard; sums to `accepted`.
    pub per_shard: Vec<u64>,
    /// The maximum entry count stopped the read early.
    pub cutover: bool,
}

impl IngestStats {
    pub fn inserted(&self) -> u64 {
        self.per_shard.iter().sum()
    }
}

/// Fills `shards` from `lines`, which carry no line terminator (see
/// [`CorpusLines`]). Blocks until every worker has drained its queue.
pub fn ingest<I, L>(
    lines: I,
    shards: Vec<Bloom>,
    cfg: &PipelineConfig,
    progress: &Progress,
) -> Result<(ShardSet, IngestStats)>
where
    I: IntoIterator<Item = io::Result<L>>,
    L: AsRef<[u8]>,
{
    if shards.is_empty() {
        return Err(PwnError::config("at least one shard is required"));
    }
    if cfg.key_len == 0 || cfg.queue_depth == 0 {
        return Err(PwnError::config("key length and queue depth must be positive"));
    }
    let cancel = CancelToken::new();
    let count = shards.len();

    thread::scope(|s| {
        let mut senders = Vec::with_capacity(count);
        let mut workers = Vec::with_capacity(count);
        for (idx, mut bloom) in shards.into_iter().enumerate() {
            let (tx, rx) = bounded::<Vec<u8>>(cfg.queue_depth);
            let done = cancel.listener();
            senders.push(tx);
            workers.push(s.spawn(move || {
                let inserted = fill_shard(&mut bloom, &rx, &done, progress);
                debug!(shard = idx, inserted, "shard worker finished");
                (bloom, inserted)
            }));
        }

        let read = feed(lines, &senders, cfg, progress);
        if read.is_err() {
            cancel.cancel();
        }
        drop(senders);

        let mut filled = Vec::with_capacity(count);
        let mut per_shard = Vec::with_capacity(count);
        let mut panicked = None;
        for (idx, worker) in workers.into_iter().enumerate() {
            match worker.join() {
                Ok((bloom, inserted)) => {
                    filled.push(bloom);
                    per_shard.push(inserted);
                }
                Err(_) => {
                    panicked.get_or_insert(idx);
                }
            }
        }

        if let Some(idx) = panicked {
            return Err(PwnError::stage(Stage::Insert, format!("shard {idx} worker panicked")));
        }
        let summary = read?;
        let stats = IngestStats {
            lines: summary.lines,
            accepted: summary.accepted,
            skipped: summary.skipped,
            per_shard,
            cutover: summary.cutover,
        };
        info!(
            lines = stats.lines,
            accepted = stats.accepted,
            skipped = stats.skipped,
            cutover = stats.cutover,
            "ingest complete"
        );
        Ok((ShardSet::new(filled), stats))
    })
}

#[derive(Default)]
struct ReadSummary {
    lines: u64,
    accepted: u64,
    skipped: u64,
    cutover: bool,
}

fn feed<I, L>(
    lines: I,
    senders: &[Sender<Vec<u8>>],
    cfg: &PipelineConfig,
    progress: &Progress,
) -> Result<ReadSummary>
where
    I: IntoIterator<Item = io::Result<L>>,
    L: AsRef<[u8]>,
{
    let mut router = ShardRouter::new(senders.len());
    let mut summary = ReadSummary::default();

    for line in lines {
        let line = line.map_err(|e| PwnError::stage(Stage::Read, e))?;
        let line = line.as_ref();
        summary.lines += 1;

        if line.len() < cfg.key_len {
            warn!(line = summary.lines, "skipping corrupted entry: {}", String::from_utf8_lossy(line));
            summary.skipped += 1;
            continue;
        }

        let shard = router.route();
        senders[shard]
            .send(line[..cfg.key_len].to_vec())
            .map_err(|_| PwnError::stage(Stage::Route, format!("shard {shard} queue closed")))?;
        summary.accepted += 1;
        progress.record_accept();

        if cfg.max_entries.is_some_and(|max| summary.accepted >= max) {
            info!(accepted = summary.accepted, "maximum entry count reached, stopping read");
            summary.cutover = true;
            break;
        }
    }
    Ok(summary)
}

fn fill_shard(bloom: &mut Bloom, rx: &Receiver<Vec<u8>>, done: &Receiver<()>, progress: &Progress) -> u64 {
    let mut inserted = 0u64;
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(key) => {
                    bloom.add(&key);
                    inserted += 1;
                    progress.record_insert();
                }
                // queue closed and empty
                Err(_) => break,
            },
            recv(done) -> _ => break,
        }
    }
    inserted
}
