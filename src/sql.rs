use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Positional cursor over a single SQL `VALUES` tuple.
///
/// Accessors return `None` on malformed input and leave the cursor where it
/// was; callers skip the record and move on to the next tuple.
pub struct TupleParser<'a> {
    tuple: &'a str,
    pos: usize,
}

impl<'a> TupleParser<'a> {
    pub fn new(tuple: &'a str) -> Self {
        Self { tuple, pos: 0 }
    }

    fn skip_comma(&mut self) {
        if self.tuple.as_bytes().get(self.pos) == Some(&b',') {
            self.pos += 1;
        }
    }

    /// Parse the next base-10 integer.
    pub fn next_int<T: FromStr>(&mut self) -> Option<T> {
        self.skip_comma();
        let bytes = self.tuple.as_bytes();
        let start = self.pos;
        let mut end = start;
        if bytes.get(end) == Some(&b'-') {
            end += 1;
        }
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end == start || (end == start + 1 && bytes[start] == b'-') {
            return None;
        }
        let value = self.tuple[start..end].parse().ok()?;
        self.pos = end;
        Some(value)
    }

    /// Parse the next quoted string literal, decoding `\\` and `\'` escapes
    /// (any other `\x` decodes to `x`) and normalizing `_` to space, the way
    /// MediaWiki stores titles.
    pub fn next_string(&mut self) -> Option<String> {
        self.skip_comma();
        if self.tuple.as_bytes().get(self.pos) != Some(&b'\'') {
            return None; // malformed, no opening quote
        }
        let body = &self.tuple[self.pos + 1..];

        let mut out = String::with_capacity(body.len().min(64));
        let mut chars = body.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\'' => {
                    self.pos += 1 + i + 1; // opening quote, body, closing quote
                    return Some(out);
                }
                '\\' => {
                    let (_, escaped) = chars.next()?; // dangling escape is an error
                    out.push(if escaped == '_' { ' ' } else { escaped });
                }
                '_' => out.push(' '),
                _ => out.push(c),
            }
        }
        None // malformed, no closing quote
    }

    /// Parse the next integer and interpret any non-zero value as true.
    pub fn next_bool(&mut self) -> Option<bool> {
        self.next_int::<u32>().map(|value| value != 0)
    }
}

/// Cut an `INSERT INTO ... VALUES (...),(...);` line into tuple views.
///
/// The `),(` delimiter is unambiguous in these dumps: integers are unquoted
/// and strings escape `'` and `\`, so the sequence never occurs inside a
/// field.
pub fn extract_tuples(line: &str) -> Vec<&str> {
    let Some(open) = line.find('(') else {
        return Vec::new();
    };
    let body = &line[open + 1..];
    let body = body.strip_suffix(");").unwrap_or(body);
    body.split("),(").collect()
}

/// Estimate the number of records in a compressed dump from the tuple count
/// of its first `INSERT` line.
///
/// Wikipedia dumps are emitted in ~1 MiB uncompressed lines, so the line
/// count is roughly the uncompressed size in MiB. The uncompressed size is
/// read from the gzip ISIZE trailer, which is modulo 2^32; for dumps past
/// 4 GiB the estimate comes out low and the containers grow.
pub fn estimated_item_count(path: &Path, first_line_items: usize) -> Result<u64> {
    let file_size = fs::metadata(path)
        .with_context(|| format!("Failed to stat dump file: {}", path.display()))?
        .len();
    anyhow::ensure!(file_size >= 4, "file too short for a gzip trailer");

    let mut file =
        File::open(path).with_context(|| format!("Failed to open dump file: {}", path.display()))?;
    file.seek(SeekFrom::End(-4))
        .context("Failed to seek to gzip trailer")?;
    let mut trailer = [0u8; 4];
    file.read_exact(&mut trailer)
        .context("Failed to read gzip ISIZE trailer")?;
    let original_size = u32::from_le_bytes(trailer) as f64;

    let compression_ratio = original_size / file_size as f64;
    const MIB: f64 = (1024 * 1024) as f64;
    let estimate =
        ((file_size as f64 / MIB) * first_line_items as f64 * compression_ratio) as u64;

    debug!(
        estimate,
        file_size, original_size, first_line_items, "estimated dump item count"
    );
    Ok(estimate)
}
