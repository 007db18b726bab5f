//! Import and export of gztool-layout decompression indexes.
//!
//! The on-disk layout is the gztool format: an eight-byte zero pad followed
//! by the `gzipindx` magic, two big-endian point counts, then one entry per
//! access point (`out`, `in`, `bits`, window length, window bytes). Windows
//! are written sparse (zero length); a reader that needs them can rebuild
//! the index with gztool itself.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const MAGIC: &[u8; 8] = b"gzipindx";

/// One seekable position: a compressed/uncompressed offset pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPoint {
    pub uncompressed_offset: u64,
    pub compressed_offset: u64,
    /// Bit offset into the byte at `compressed_offset` where the block starts.
    pub bits: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GzipIndex {
    pub points: Vec<AccessPoint>,
}

impl GzipIndex {
    pub fn push_point(&mut self, compressed_offset: u64, uncompressed_offset: u64) {
        self.points.push(AccessPoint {
            uncompressed_offset,
            compressed_offset,
            bits: 0,
        });
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).context("truncated gzip index")?;
    Ok(u64::from_be_bytes(buf))
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).context("truncated gzip index")?;
    Ok(u32::from_be_bytes(buf))
}

/// Read an index file. Fails on unreadable, foreign, or truncated input;
/// callers treat any failure as "no usable index".
pub fn import(path: &Path) -> Result<GzipIndex> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open gzip index: {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut header = [0u8; 16];
    reader
        .read_exact(&mut header)
        .context("truncated gzip index header")?;
    if header[..8] != [0u8; 8] || &header[8..16] != MAGIC {
        bail!("not a gztool index: bad magic");
    }

    let have = read_u64(&mut reader)?;
    let _size = read_u64(&mut reader)?;

    let mut points = Vec::with_capacity(have.min(1 << 20) as usize);
    for _ in 0..have {
        let uncompressed_offset = read_u64(&mut reader)?;
        let compressed_offset = read_u64(&mut reader)?;
        let bits = read_u32(&mut reader)?;
        let window_size = read_u32(&mut reader)?;
        let skipped = std::io::copy(
            &mut reader.by_ref().take(window_size as u64),
            &mut std::io::sink(),
        )
        .context("Failed to skip index window data")?;
        if skipped != window_size as u64 {
            bail!("truncated gzip index window");
        }
        points.push(AccessPoint {
            uncompressed_offset,
            compressed_offset,
            bits,
        });
    }

    debug!(path = %path.display(), points = points.len(), "imported gzip index");
    Ok(GzipIndex { points })
}

/// Write an index file, atomically via a temp file in the same directory.
pub fn export(index: &GzipIndex, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create index directory: {}", parent.display()))?;
        }
    }

    let mut tmp_os = path.to_path_buf().into_os_string();
    tmp_os.push(".tmp");
    let tmp_path = PathBuf::from(tmp_os);

    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create index file: {}", tmp_path.display()))?;
    let mut writer = BufWriter::new(file);

    writer.write_all(&[0u8; 8]).context("Failed to write index header")?;
    writer.write_all(MAGIC).context("Failed to write index header")?;
    let count = index.points.len() as u64;
    writer.write_all(&count.to_be_bytes())?;
    writer.write_all(&count.to_be_bytes())?;
    for point in &index.points {
        writer.write_all(&point.uncompressed_offset.to_be_bytes())?;
        writer.write_all(&point.compressed_offset.to_be_bytes())?;
        writer.write_all(&point.bits.to_be_bytes())?;
        writer.write_all(&0u32.to_be_bytes())?; // sparse window
    }
    writer.flush().context("Failed to flush index file")?;

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to rename index file to: {}", path.display()))?;

    debug!(path = %path.display(), points = index.points.len(), "exported gzip index");
    Ok(())
}
