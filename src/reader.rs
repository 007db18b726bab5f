use crate::config::{self, DecompressionBackend, LoaderOptions};
use crate::models::WikiFile;
use crate::parallel::ParallelLineReader;
use crate::progress::{ProgressWatch, ReadProgress};
use anyhow::{ensure, Context, Result};
use crossbeam::channel::{bounded, Receiver};
use flate2::read::MultiGzDecoder;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info};

/// Counts bytes consumed from the underlying stream, for byte progress.
pub(crate) struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R> CountingReader<R> {
    pub(crate) fn new(inner: R, count: Arc<AtomicU64>) -> Self {
        Self { inner, count }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Open a dump file, verify the gzip magic, and rewind. Also returns the
/// compressed size for progress reporting.
pub(crate) fn open_gzip(file: &WikiFile) -> Result<(File, u64)> {
    let path = &file.data_path;
    let total_bytes = fs::metadata(path)
        .with_context(|| format!("Could not stat file: {}", path.display()))?
        .len();
    let mut input =
        File::open(path).with_context(|| format!("Could not open file: {}", path.display()))?;

    let mut magic = [0u8; 2];
    input
        .read_exact(&mut magic)
        .with_context(|| format!("Could not read gzip header: {}", path.display()))?;
    ensure!(
        magic == [0x1f, 0x8b],
        "not a gzip stream: {}",
        path.display()
    );
    input
        .seek(SeekFrom::Start(0))
        .context("Failed to rewind after gzip header check")?;

    Ok((input, total_bytes))
}

/// Sequential backend: one decoder thread pushes lines into a bounded
/// channel. The producer blocks when the channel is full; `get_line`
/// blocks when it is empty, until end of stream.
pub struct SequentialLineReader {
    lines: Option<Receiver<String>>,
    handle: Option<JoinHandle<()>>,
    watch: ProgressWatch,
}

impl SequentialLineReader {
    pub fn open(file: &WikiFile) -> Result<Self> {
        let (input, total_bytes) = open_gzip(file)?;
        let watch = ProgressWatch::new(total_bytes);
        let counter = watch.counter();
        let (tx, rx) = bounded(config::SEQUENTIAL_QUEUE_CAPACITY);
        let path = file.data_path.clone();

        let handle = std::thread::spawn(move || {
            let decoder = MultiGzDecoder::new(CountingReader::new(input, counter));
            let mut stream = BufReader::with_capacity(config::READ_BUFFER_SIZE, decoder);
            let mut buf = String::new();
            loop {
                buf.clear();
                match stream.read_line(&mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        if buf.ends_with('\n') {
                            buf.pop();
                        }
                        // The consumer hung up; nothing left to do.
                        if tx.send(std::mem::take(&mut buf)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, path = %path.display(), "decompression failed");
                        break;
                    }
                }
            }
        });

        info!(path = %file.data_path.display(), "initialized sequential gzip reader");
        Ok(Self {
            lines: Some(rx),
            handle: Some(handle),
            watch,
        })
    }

    pub fn get_line(&mut self, line: &mut String) -> bool {
        match self.lines.as_ref().and_then(|rx| rx.recv().ok()) {
            Some(next) => {
                *line = next;
                true
            }
            None => false,
        }
    }

    pub fn get_progress(&self) -> ReadProgress {
        self.watch.snapshot()
    }

    pub fn watch(&self) -> ProgressWatch {
        self.watch.clone()
    }
}

impl Drop for SequentialLineReader {
    fn drop(&mut self) {
        // Dropping the receiver unblocks a producer stuck on a full queue.
        self.lines.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Line reader over either backend, selected at runtime.
pub enum LineReader {
    Sequential(SequentialLineReader),
    Parallel(ParallelLineReader),
}

impl LineReader {
    pub fn open(file: &WikiFile, options: &LoaderOptions) -> Result<Self> {
        match options.backend {
            DecompressionBackend::Sequential => {
                Ok(LineReader::Sequential(SequentialLineReader::open(file)?))
            }
            DecompressionBackend::Parallel => {
                Ok(LineReader::Parallel(ParallelLineReader::open(file, options)?))
            }
        }
    }

    /// Fetch the next decompressed line. Returns false at end of stream.
    pub fn get_line(&mut self, line: &mut String) -> bool {
        match self {
            LineReader::Sequential(reader) => reader.get_line(line),
            LineReader::Parallel(reader) => reader.get_line(line),
        }
    }

    pub fn get_progress(&self) -> ReadProgress {
        match self {
            LineReader::Sequential(reader) => reader.get_progress(),
            LineReader::Parallel(reader) => reader.get_progress(),
        }
    }

    pub fn watch(&self) -> ProgressWatch {
        match self {
            LineReader::Sequential(reader) => reader.watch(),
            LineReader::Parallel(reader) => reader.watch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DumpKind;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::path::Path;
    use tempfile::NamedTempFile;

    fn gz_fixture(content: &str) -> NamedTempFile {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(content.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&compressed).unwrap();
        tmp.flush().unwrap();
        tmp
    }

    fn wiki_file(path: &Path) -> WikiFile {
        WikiFile {
            lang_code: "en".to_string(),
            date: "20240601".to_string(),
            kind: DumpKind::Page,
            data_path: path.to_path_buf(),
            index_path: None,
        }
    }

    fn drain(reader: &mut SequentialLineReader) -> Vec<String> {
        let mut lines = Vec::new();
        let mut line = String::new();
        while reader.get_line(&mut line) {
            lines.push(line.clone());
        }
        lines
    }

    #[test]
    fn reads_lines_in_order() {
        let tmp = gz_fixture("first\nsecond\nthird\n");
        let mut reader = SequentialLineReader::open(&wiki_file(tmp.path())).unwrap();
        assert_eq!(drain(&mut reader), vec!["first", "second", "third"]);
    }

    #[test]
    fn final_line_without_newline_is_delivered() {
        let tmp = gz_fixture("alpha\nbeta");
        let mut reader = SequentialLineReader::open(&wiki_file(tmp.path())).unwrap();
        assert_eq!(drain(&mut reader), vec!["alpha", "beta"]);
    }

    #[test]
    fn empty_stream_yields_no_lines() {
        let tmp = gz_fixture("");
        let mut reader = SequentialLineReader::open(&wiki_file(tmp.path())).unwrap();
        assert!(drain(&mut reader).is_empty());
    }

    #[test]
    fn progress_total_is_compressed_size() {
        let tmp = gz_fixture("some line content\n");
        let compressed_size = std::fs::metadata(tmp.path()).unwrap().len();
        let mut reader = SequentialLineReader::open(&wiki_file(tmp.path())).unwrap();
        assert_eq!(reader.get_progress().total_bytes, compressed_size);

        drain(&mut reader);
        drop(reader);
        // after a full read every compressed byte has been consumed
    }

    #[test]
    fn progress_reaches_total_after_full_read() {
        let content = "line one\nline two\nline three\n".repeat(200);
        let tmp = gz_fixture(&content);
        let mut reader = SequentialLineReader::open(&wiki_file(tmp.path())).unwrap();
        let total = reader.get_progress().total_bytes;
        drain(&mut reader);
        assert_eq!(reader.get_progress().current_bytes, total);
    }

    #[test]
    fn open_fails_for_missing_file() {
        assert!(SequentialLineReader::open(&wiki_file(Path::new("/nonexistent.sql.gz"))).is_err());
    }

    #[test]
    fn open_fails_for_non_gzip_input() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"INSERT INTO `page` VALUES (1,0,'A',0);")
            .unwrap();
        tmp.flush().unwrap();
        assert!(SequentialLineReader::open(&wiki_file(tmp.path())).is_err());
    }

    #[test]
    fn early_drop_does_not_deadlock() {
        // More lines than the queue holds, so the producer is blocked
        // mid-send when the reader is dropped.
        let content = "x\n".repeat(10_000);
        let tmp = gz_fixture(&content);
        let mut reader = SequentialLineReader::open(&wiki_file(tmp.path())).unwrap();
        let mut line = String::new();
        assert!(reader.get_line(&mut line));
        drop(reader);
    }

    #[test]
    fn line_reader_enum_dispatches_to_backend() {
        let tmp = gz_fixture("only line\n");
        let options = LoaderOptions::default();
        let mut reader = LineReader::open(&wiki_file(tmp.path()), &options).unwrap();
        let mut line = String::new();
        assert!(reader.get_line(&mut line));
        assert_eq!(line, "only line");
        assert!(!reader.get_line(&mut line));
    }
}
