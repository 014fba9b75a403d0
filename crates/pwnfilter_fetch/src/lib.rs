//! Corpus download: either every prefix of the range API, or one archive file.
//! Both paths hash what they write and only publish the file once the digest
//! checks out.

use anyhow::{Context, Result};
use pwnfilter_core::utils::fsync_dir;
use pwnfilter_core::PwnError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

pub mod archive;
pub mod range;

pub use archive::{copy_verified, download_archive};
pub use range::{fetch_ranges, fetch_ranges_to_file, range_prefix, HttpRangeSource, RangeConfig, RangeSource};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchSummary {
    pub path: PathBuf,
    pub bytes: u64,
    /// Corpus lines written; zero for archive downloads.
    pub lines: u64,
    pub ranges: u32,
    pub sha256: String,
}

/// Writer that hashes and counts everything passing through it.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, hasher: Sha256::new(), bytes: 0 }
    }

    pub fn bytes(&self) -> u64 { self.bytes }

    /// Flushes the sink and returns it with the hex digest.
    pub fn finish(mut self) -> io::Result<(W, String)> {
        self.inner.flush()?;
        Ok((self.inner, hex::encode(self.hasher.finalize())))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Temp file beside `path`, so the final rename stays on one filesystem.
pub(crate) fn staging_file(path: &Path) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    tempfile::Builder::new()
        .prefix(".pwnfilter_dl_")
        .tempfile_in(dir)
        .with_context(|| format!("failed to create staging file in {}", dir.display()))
}

/// Checks the digest, then syncs and renames the staged file to `path`.
/// A mismatch drops the staged file.
pub(crate) fn publish(tmp: NamedTempFile, path: &Path, actual: &str, expected: Option<&str>) -> Result<()> {
    if let Some(expected) = expected {
        if !expected.eq_ignore_ascii_case(actual) {
            return Err(PwnError::Integrity { expected: expected.to_lowercase(), actual: actual.to_string() }.into());
        }
        info!(sha256 = actual, "checksum verified");
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).with_context(|| format!("failed to publish {}", path.display()))?;
    let _ = fsync_dir(path);
    Ok(())
}
