use byteorder::{BigEndian as BE, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use std::path::Path;

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> { w.write_u64::<BE>(v) }
pub fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> { r.read_u64::<BE>() }

/// Strips a trailing `\n` and then a trailing `\r`.
pub fn trim_eol(mut line: &[u8]) -> &[u8] {
    if let Some(rest) = line.strip_suffix(b"\n") { line = rest; }
    if let Some(rest) = line.strip_suffix(b"\r") { line = rest; }
    line
}

/// Number of 512-byte blocks needed to hold `len` bytes.
pub fn blocks_for(len: u64) -> u64 { len.div_ceil(crate::consts::TAR_BLOCK as u64) }

#[cfg(unix)]
pub fn fsync_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let f = std::fs::OpenOptions::new().read(true).custom_flags(libc::O_DIRECTORY).open(dir)?;
    f.sync_all()
}
#[cfg(not(unix))]
pub fn fsync_dir(_path: &Path) -> io::Result<()> { Ok(()) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_unix_and_dos_endings() {
        assert_eq!(trim_eol(b"abc\n"), b"abc");
        assert_eq!(trim_eol(b"abc\r\n"), b"abc");
        assert_eq!(trim_eol(b"abc"), b"abc");
        assert_eq!(trim_eol(b""), b"");
    }

    #[test]
    fn block_rounding() {
        assert_eq!(blocks_for(0), 0);
        assert_eq!(blocks_for(1), 1);
        assert_eq!(blocks_for(512), 1);
        assert_eq!(blocks_for(513), 2);
    }
}
