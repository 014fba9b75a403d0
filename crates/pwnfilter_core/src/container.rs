//! Container file: gzip-compressed ustar archive.
//!
//! Records, in order:
//!   "index"        = shard count S as ASCII decimal
//!   "0" .. "S-1"   = Bloom::write_to bytes of each shard
//!
//! Each record is a 512-byte ustar header (name, mode 0666, octal size, mtime,
//! checksum, typeflag '0', magic "ustar\0" "00") followed by the payload padded
//! to a 512-byte boundary. Two zero blocks end the archive.
//!
//! The writer streams into a temp file beside the target and renames it into
//! place only after the gzip trailer is written and synced.

use crate::consts::{INDEX_RECORD, TAR_BLOCK, TAR_MAGIC, TAR_MODE, TAR_VERSION};
use crate::errors::{PwnError, Result, Stage};
use crate::filter::{Bloom, ShardSet};
use crate::utils::{blocks_for, fsync_dir};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const NAME_LEN: usize = 100;
const OFF_MODE: usize = 100;
const OFF_UID: usize = 108;
const OFF_GID: usize = 116;
const OFF_SIZE: usize = 124;
const OFF_MTIME: usize = 136;
const OFF_CHKSUM: usize = 148;
const OFF_TYPEFLAG: usize = 156;
const OFF_MAGIC: usize = 257;
const OFF_VERSION: usize = 263;
const TYPE_REGULAR: u8 = b'0';

/// Writes length-framed ustar records into any sink.
pub struct RecordWriter<W: Write> {
    inner: W,
    mtime: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        let mtime = time::OffsetDateTime::now_utc().unix_timestamp().max(0) as u64;
        Self { inner, mtime }
    }

    pub fn with_mtime(inner: W, mtime: u64) -> Self {
        Self { inner, mtime }
    }

    pub fn append(&mut self, name: &str, payload: &[u8]) -> io::Result<()> {
        self.append_with(name, payload.len() as u64, |w| w.write_all(payload))
    }

    /// Writes a header for `size` bytes, lets `body` stream exactly that many,
    /// then pads to the block boundary.
    pub fn append_with<F>(&mut self, name: &str, size: u64, body: F) -> io::Result<()>
    where
        F: FnOnce(&mut W) -> io::Result<()>,
    {
        let hdr = header(name, size, self.mtime)?;
        self.inner.write_all(&hdr)?;
        body(&mut self.inner)?;
        let pad = (blocks_for(size) * TAR_BLOCK as u64 - size) as usize;
        self.inner.write_all(&[0u8; TAR_BLOCK][..pad])
    }

    /// Writes the end-of-archive marker and returns the sink.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.write_all(&[0u8; TAR_BLOCK * 2])?;
        Ok(self.inner)
    }
}

fn header(name: &str, size: u64, mtime: u64) -> io::Result<[u8; TAR_BLOCK]> {
    if name.is_empty() || name.len() >= NAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("bad record name {name:?}")));
    }
    let mut h = [0u8; TAR_BLOCK];
    h[..name.len()].copy_from_slice(name.as_bytes());
    put_octal(&mut h[OFF_MODE..OFF_MODE + 8], TAR_MODE as u64)?;
    put_octal(&mut h[OFF_UID..OFF_UID + 8], 0)?;
    put_octal(&mut h[OFF_GID..OFF_GID + 8], 0)?;
    put_octal(&mut h[OFF_SIZE..OFF_SIZE + 12], size)?;
    put_octal(&mut h[OFF_MTIME..OFF_MTIME + 12], mtime)?;
    h[OFF_TYPEFLAG] = TYPE_REGULAR;
    h[OFF_MAGIC..OFF_MAGIC + 6].copy_from_slice(TAR_MAGIC);
    h[OFF_VERSION..OFF_VERSION + 2].copy_from_slice(TAR_VERSION);

    h[OFF_CHKSUM..OFF_CHKSUM + 8].fill(b' ');
    let sum = checksum(&h);
    put_octal(&mut h[OFF_CHKSUM..OFF_CHKSUM + 7], sum)?;
    h[OFF_CHKSUM + 7] = b' ';
    Ok(h)
}

/// Zero-padded octal digits followed by a NUL terminator.
fn put_octal(field: &mut [u8], value: u64) -> io::Result<()> {
    let digits = field.len() - 1;
    let s = format!("{value:0digits$o}");
    if s.len() > digits {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("{value} overflows tar field")));
    }
    field[..digits].copy_from_slice(s.as_bytes());
    field[digits] = 0;
    Ok(())
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    field
        .iter()
        .copied()
        .skip_while(|b| *b == b' ')
        .take_while(|b| *b != 0 && *b != b' ')
        .try_fold(0u64, |acc, b| match b {
            b'0'..=b'7' => acc.checked_mul(8)?.checked_add((b - b'0') as u64),
            _ => None,
        })
}

/// Unsigned byte sum with the checksum field counted as spaces.
fn checksum(h: &[u8; TAR_BLOCK]) -> u64 {
    h.iter()
        .enumerate()
        .map(|(i, b)| if (OFF_CHKSUM..OFF_CHKSUM + 8).contains(&i) { b' ' as u64 } else { *b as u64 })
        .sum()
}

/// Writes the shard set to `path`. On failure nothing is left at `path`.
pub fn write_container(path: impl AsRef<Path>, set: &ShardSet) -> Result<PathBuf> {
    let path_final = path.as_ref().to_path_buf();
    let dir = match path_final.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new().prefix(".pwnfilter_").tempfile_in(dir)?;

    {
        let gz = GzEncoder::new(BufWriter::new(tmp.as_file_mut()), Compression::best());
        let mut records = RecordWriter::new(gz);
        write_records(&mut records, set).map_err(|e| PwnError::stage(Stage::Serialize, e))?;
        let gz = records.finish().map_err(|e| PwnError::stage(Stage::Serialize, e))?;
        let mut buf = gz.finish().map_err(|e| PwnError::stage(Stage::Serialize, e))?;
        buf.flush().map_err(|e| PwnError::stage(Stage::Serialize, e))?;
    }
    tmp.as_file().sync_all()?;

    let _persisted = tmp.persist(&path_final)?;
    let _ = fsync_dir(&path_final);
    info!(path = %path_final.display(), shards = set.len(), "container written");
    Ok(path_final)
}

/// Index record followed by one record per shard.
pub fn write_records<W: Write>(records: &mut RecordWriter<W>, set: &ShardSet) -> io::Result<()> {
    records.append(INDEX_RECORD, set.len().to_string().as_bytes())?;
    for (i, shard) in set.shards().iter().enumerate() {
        records.append_with(&i.to_string(), shard.serialized_len(), |w| {
            shard.write_to(w).map(|_| ()).map_err(into_io)
        })?;
        debug!(shard = i, bytes = shard.serialized_len(), "shard record written");
    }
    Ok(())
}

fn into_io(e: PwnError) -> io::Error {
    match e {
        PwnError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

/// One archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub mode: u32,
    pub data: Vec<u8>,
}

/// Reads ustar records from an uncompressed stream.
pub struct RecordReader<R: Read> {
    inner: R,
    done: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    pub fn next_record(&mut self) -> Result<Option<Record>> {
        if self.done {
            return Ok(None);
        }
        let mut h = [0u8; TAR_BLOCK];
        self.inner.read_exact(&mut h)?;
        if h.iter().all(|b| *b == 0) {
            self.done = true;
            return Ok(None);
        }

        let stored = parse_octal(&h[OFF_CHKSUM..OFF_CHKSUM + 8])
            .ok_or_else(|| PwnError::Corrupt("unreadable header checksum".into()))?;
        if stored != checksum(&h) {
            return Err(PwnError::Corrupt("header checksum mismatch".into()));
        }
        let name_end = h[..NAME_LEN].iter().position(|b| *b == 0).unwrap_or(NAME_LEN);
        let name = String::from_utf8(h[..name_end].to_vec())
            .map_err(|_| PwnError::Corrupt("record name is not UTF-8".into()))?;
        let mode = parse_octal(&h[OFF_MODE..OFF_MODE + 8]).unwrap_or(0) as u32;
        let size = parse_octal(&h[OFF_SIZE..OFF_SIZE + 12])
            .ok_or_else(|| PwnError::Corrupt(format!("record {name}: unreadable size")))?;

        let mut data = Vec::new();
        (&mut self.inner).take(size).read_to_end(&mut data)?;
        if (data.len() as u64) < size {
            return Err(PwnError::Corrupt(format!(
                "record {name}: header declares {size} bytes, stream ends after {}",
                data.len()
            )));
        }
        let pad = blocks_for(size) * TAR_BLOCK as u64 - size;
        io::copy(&mut (&mut self.inner).take(pad), &mut io::sink())?;
        Ok(Some(Record { name, mode, data }))
    }
}

/// Reads a container written by [`write_container`].
pub fn read_container(path: impl AsRef<Path>) -> Result<ShardSet> {
    let f = File::open(path)?;
    decode_container(BufReader::new(GzDecoder::new(BufReader::new(f))))
}

/// Decodes an uncompressed record stream: `index` first, then exactly S shards
/// in any order.
pub fn decode_container<R: Read>(stream: R) -> Result<ShardSet> {
    let mut records = RecordReader::new(stream);
    let index = records
        .next_record()?
        .ok_or_else(|| PwnError::Corrupt("empty container".into()))?;
    if index.name != INDEX_RECORD {
        return Err(PwnError::Corrupt(format!("first record is {:?}, expected index", index.name)));
    }
    let count: usize = std::str::from_utf8(&index.data)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| PwnError::Corrupt("index record is not a decimal shard count".into()))?;

    // The index is only a claim; shards are collected as they arrive.
    let mut found: BTreeMap<usize, Bloom> = BTreeMap::new();
    while let Some(rec) = records.next_record()? {
        let idx: usize = rec
            .name
            .parse()
            .map_err(|_| PwnError::Corrupt(format!("unexpected record {:?}", rec.name)))?;
        if idx >= count {
            return Err(PwnError::Corrupt(format!("shard {idx} out of range 0..{count}")));
        }
        if found.contains_key(&idx) {
            return Err(PwnError::Corrupt(format!("duplicate shard {idx}")));
        }
        found.insert(idx, Bloom::from_bytes(&rec.data)?);
    }

    if found.len() != count {
        let gap = (0..count).find(|i| !found.contains_key(i)).unwrap_or(found.len());
        return Err(PwnError::Corrupt(format!("missing shard {gap} of {count}")));
    }
    Ok(ShardSet::new(found.into_values().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn sample_set(count: usize) -> ShardSet {
        let shards = (0..count)
            .map(|i| {
                let mut b = Bloom::with_estimates(100, 0.01);
                b.add(format!("shard-{i}").as_bytes());
                b
            })
            .collect();
        ShardSet::new(shards)
    }

    #[test]
    fn header_fields_and_checksum() {
        let h = header("index", 1, 0).unwrap();
        assert_eq!(&h[..5], b"index");
        assert_eq!(&h[OFF_MODE..OFF_MODE + 8], b"0000666\0");
        assert_eq!(&h[OFF_SIZE..OFF_SIZE + 12], b"00000000001\0");
        assert_eq!(h[OFF_TYPEFLAG], b'0');
        assert_eq!(&h[OFF_MAGIC..OFF_MAGIC + 6], b"ustar\0");
        assert_eq!(&h[OFF_VERSION..OFF_VERSION + 2], b"00");
        assert_eq!(parse_octal(&h[OFF_CHKSUM..OFF_CHKSUM + 8]), Some(checksum(&h)));
        assert_eq!(h[OFF_CHKSUM + 6], 0);
        assert_eq!(h[OFF_CHKSUM + 7], b' ');
    }

    #[test]
    fn records_are_block_aligned() {
        let mut w = RecordWriter::with_mtime(Vec::new(), 0);
        w.append("index", b"3").unwrap();
        w.append("0", &[7u8; 600]).unwrap();
        let bytes = w.finish().unwrap();
        // header + 1 block, header + 2 blocks, 2 end blocks
        assert_eq!(bytes.len(), TAR_BLOCK * 7);
        assert_eq!(bytes[TAR_BLOCK], b'3');
    }

    #[test]
    fn record_reader_roundtrip() {
        let mut w = RecordWriter::with_mtime(Vec::new(), 1_700_000_000);
        w.append("index", b"12").unwrap();
        w.append("a", b"").unwrap();
        let bytes = w.finish().unwrap();

        let mut r = RecordReader::new(Cursor::new(bytes));
        let first = r.next_record().unwrap().unwrap();
        assert_eq!((first.name.as_str(), first.mode, first.data.as_slice()), ("index", 0o666, &b"12"[..]));
        let second = r.next_record().unwrap().unwrap();
        assert_eq!(second.name, "a");
        assert!(second.data.is_empty());
        assert!(r.next_record().unwrap().is_none());
    }

    #[test]
    fn detects_header_corruption() {
        let mut w = RecordWriter::with_mtime(Vec::new(), 0);
        w.append("index", b"1").unwrap();
        let mut bytes = w.finish().unwrap();
        bytes[0] = b'X';
        let err = RecordReader::new(Cursor::new(bytes)).next_record().unwrap_err();
        assert!(matches!(err, PwnError::Corrupt(_)));
    }

    #[test]
    fn container_roundtrip_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filter.tar.gz");
        let set = sample_set(5);
        write_container(&path, &set).unwrap();

        let back = read_container(&path).unwrap();
        assert_eq!(back, set);
        for i in 0..5 {
            assert!(back.contains(format!("shard-{i}").as_bytes()));
        }
        // only the published file remains
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn index_is_decimal_shard_count() {
        let mut w = RecordWriter::new(Vec::new());
        write_records(&mut w, &sample_set(12)).unwrap();
        let bytes = w.finish().unwrap();
        let mut r = RecordReader::new(Cursor::new(bytes));
        let index = r.next_record().unwrap().unwrap();
        assert_eq!(index.data, b"12");
        let names: Vec<String> =
            std::iter::from_fn(|| r.next_record().unwrap()).map(|rec| rec.name).collect();
        let want: Vec<String> = (0..12).map(|i| i.to_string()).collect();
        assert_eq!(names, want);
    }

    #[test]
    fn decode_rejects_missing_and_duplicate_shards() {
        let shard = Bloom::new(64, 1).to_bytes();

        let mut w = RecordWriter::with_mtime(Vec::new(), 0);
        w.append("index", b"2").unwrap();
        w.append("0", &shard).unwrap();
        let missing = w.finish().unwrap();
        assert!(matches!(decode_container(Cursor::new(missing)), Err(PwnError::Corrupt(_))));

        let mut w = RecordWriter::with_mtime(Vec::new(), 0);
        w.append("index", b"2").unwrap();
        w.append("1", &shard).unwrap();
        w.append("1", &shard).unwrap();
        let dup = w.finish().unwrap();
        assert!(matches!(decode_container(Cursor::new(dup)), Err(PwnError::Corrupt(_))));

        let mut w = RecordWriter::with_mtime(Vec::new(), 0);
        w.append("index", b"2").unwrap();
        w.append("1", &shard).unwrap();
        w.append("0", &shard).unwrap();
        let shuffled = w.finish().unwrap();
        assert_eq!(decode_container(Cursor::new(shuffled)).unwrap().len(), 2);
    }

    #[test]
    fn failed_write_leaves_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("filter.tar.gz");
        assert!(write_container(&path, &sample_set(2)).is_err());
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn oversized_declarations_are_corrupt() {
        // index claims far more shards than the stream holds
        let mut w = RecordWriter::with_mtime(Vec::new(), 0);
        w.append("index", b"999999999999999999").unwrap();
        w.append("0", &Bloom::new(64, 1).to_bytes()).unwrap();
        let bytes = w.finish().unwrap();
        assert!(matches!(decode_container(Cursor::new(bytes)), Err(PwnError::Corrupt(_))));

        // record header declares ~8 GB with nothing behind it
        let mut bytes = header("0", 8_000_000_000, 0).unwrap().to_vec();
        bytes.extend_from_slice(&[0u8; 100]);
        let err = RecordReader::new(Cursor::new(bytes)).next_record().unwrap_err();
        assert!(matches!(err, PwnError::Corrupt(_)));

        // shard payload whose filter header claims u64::MAX bits
        let mut shard = Vec::new();
        for v in [u64::MAX, 1, u64::MAX] {
            shard.extend_from_slice(&v.to_be_bytes());
        }
        let mut w = RecordWriter::with_mtime(Vec::new(), 0);
        w.append("index", b"1").unwrap();
        w.append("0", &shard).unwrap();
        let bytes = w.finish().unwrap();
        assert!(matches!(decode_container(Cursor::new(bytes)), Err(PwnError::Corrupt(_))));
    }
}
