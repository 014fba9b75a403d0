// crates/pwnfilter_core/src/consts.rs

/// Width of a SHA-1 digest in hex characters.
pub const KEY_LEN: usize = 40;

/// Average corpus record width in bytes: digest, ':', count and newline.
pub const AVG_RECORD_WIDTH: u64 = 44;

pub const DEFAULT_ERROR_RATE: f64 = 0.000_000_01; // ~1 in 100M
pub const DEFAULT_SHARDS: usize = 128;
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Extra capacity planned on top of the estimate.
pub const HEADROOM: f64 = 0.20;

/// Name of the first container record.
pub const INDEX_RECORD: &str = "index";

pub const TAR_BLOCK: usize = 512;
pub const TAR_MODE: u32 = 0o666;
pub const TAR_MAGIC: &[u8; 6] = b"ustar\0";
pub const TAR_VERSION: &[u8; 2] = b"00";
/// Largest payload an 11-digit octal size field can describe.
pub const TAR_MAX_SIZE: u64 = (1 << 33) - 1;

/// Filter header: m, k and the bit length, each a big-endian u64.
pub const FILTER_HDR_SIZE: usize = 24;
