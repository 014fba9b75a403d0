use crate::{publish, staging_file, FetchSummary, HashingWriter};
use anyhow::{Context, Result};
use std::io::{self, BufWriter, Read};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Streams `url` to `path`, hashing on the way. The file only appears at
/// `path` if the transfer completes and the digest matches.
pub fn download_archive(url: &str, path: &Path, expected_sha256: Option<&str>) -> Result<FetchSummary> {
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .user_agent(concat!("pwnfilter/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;
    let resp = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("GET {url}"))?;
    info!(url, length = ?resp.content_length(), "archive download started");
    copy_verified(resp, path, expected_sha256)
}

/// Copies `src` into a staged file and publishes it at `path`.
pub fn copy_verified<R: Read>(mut src: R, path: &Path, expected_sha256: Option<&str>) -> Result<FetchSummary> {
    let tmp = staging_file(path)?;
    let mut writer = HashingWriter::new(BufWriter::with_capacity(1 << 20, tmp.as_file()));
    io::copy(&mut src, &mut writer).context("archive transfer failed")?;
    let bytes = writer.bytes();
    let (buf, sha256) = writer.finish()?;
    drop(buf);

    publish(tmp, path, &sha256, expected_sha256)?;
    info!(path = %path.display(), bytes, sha256 = %sha256, "archive download complete");
    Ok(FetchSummary { path: path.to_path_buf(), bytes, lines: 0, ranges: 0, sha256 })
}
