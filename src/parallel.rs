use crate::config::{self, LoaderOptions};
use crate::gzindex::{self, GzipIndex};
use crate::models::WikiFile;
use crate::progress::{ProgressWatch, ReadProgress};
use crate::reader::{open_gzip, CountingReader};
use anyhow::Result;
use crossbeam::queue::ArrayQueue;
use flate2::read::MultiGzDecoder;
use memchr::memchr_iter;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Parallel backend: a dedicated thread decompresses the dump in stripes,
/// splits them on newlines with memchr, and feeds a lock-free bounded
/// queue. The producer yields when the queue is full; `get_line` spins
/// with yields when it is empty until the done flag is set.
///
/// If a gztool-layout index exists next to the dump it is imported before
/// reading, and the index accumulated during a complete read is exported
/// afterwards; both are best-effort.
pub struct ParallelLineReader {
    input: Option<File>,
    data_path: PathBuf,
    index_path: PathBuf,
    chunk_size: usize,
    stripe_size: usize,
    queue: Arc<ArrayQueue<String>>,
    done: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    started: bool,
    watch: ProgressWatch,
}

impl ParallelLineReader {
    pub fn open(file: &WikiFile, options: &LoaderOptions) -> Result<Self> {
        Self::open_with_sizes(file, options.chunk_size, config::STRIPE_SIZE)
    }

    fn open_with_sizes(file: &WikiFile, chunk_size: usize, stripe_size: usize) -> Result<Self> {
        let (input, total_bytes) = open_gzip(file)?;
        info!(path = %file.data_path.display(), "initialized parallel gzip reader");
        Ok(Self {
            input: Some(input),
            data_path: file.data_path.clone(),
            index_path: file.resolved_index_path(),
            chunk_size: chunk_size.max(1),
            stripe_size: stripe_size.max(1),
            queue: Arc::new(ArrayQueue::new(config::PARALLEL_QUEUE_CAPACITY)),
            done: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
            started: false,
            watch: ProgressWatch::new(total_bytes),
        })
    }

    /// Fetch the next decompressed line. The reader thread is started
    /// lazily on the first call.
    pub fn get_line(&mut self, line: &mut String) -> bool {
        if !self.started {
            self.start_reader_thread();
        }
        loop {
            if let Some(next) = self.queue.pop() {
                *line = next;
                return true;
            }
            if self.done.load(Ordering::Acquire) {
                // Drain whatever raced in between the last pop and the flag.
                return match self.queue.pop() {
                    Some(next) => {
                        *line = next;
                        true
                    }
                    None => false,
                };
            }
            thread::yield_now();
        }
    }

    pub fn get_progress(&self) -> ReadProgress {
        self.watch.snapshot()
    }

    pub fn watch(&self) -> ProgressWatch {
        self.watch.clone()
    }

    fn start_reader_thread(&mut self) {
        self.started = true;
        let Some(input) = self.input.take() else {
            self.done.store(true, Ordering::Release);
            return;
        };
        let worker = ReaderThread {
            input,
            data_path: self.data_path.clone(),
            index_path: self.index_path.clone(),
            chunk_size: self.chunk_size,
            stripe_size: self.stripe_size,
            queue: Arc::clone(&self.queue),
            done: Arc::clone(&self.done),
            stop: Arc::clone(&self.stop),
            counter: self.watch.counter(),
        };
        self.handle = Some(thread::spawn(move || worker.run()));
    }
}

impl Drop for ParallelLineReader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct ReaderThread {
    input: File,
    data_path: PathBuf,
    index_path: PathBuf,
    chunk_size: usize,
    stripe_size: usize,
    queue: Arc<ArrayQueue<String>>,
    done: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    counter: Arc<AtomicU64>,
}

impl ReaderThread {
    fn run(self) {
        if self.index_path.exists() {
            match gzindex::import(&self.index_path) {
                Ok(existing) => {
                    info!(path = %self.index_path.display(), points = existing.len(), "imported gzip index");
                }
                Err(e) => {
                    warn!(error = %e, path = %self.index_path.display(), "failed to import gzip index");
                }
            }
        }

        let completed = self.read_lines();

        self.done.store(true, Ordering::Release);

        if let Some(index) = completed {
            if let Err(e) = gzindex::export(&index, &self.index_path) {
                warn!(error = %e, path = %self.index_path.display(), "failed to export gzip index");
            } else {
                info!(path = %self.index_path.display(), points = index.len(), "exported gzip index");
            }
        }
    }

    /// Decompress and enqueue every line. Returns the accumulated index on
    /// a complete read, None if the read was cut short.
    fn read_lines(&self) -> Option<GzipIndex> {
        let mut decoder =
            MultiGzDecoder::new(CountingReader::new(&self.input, Arc::clone(&self.counter)));
        let mut stripe = vec![0u8; self.stripe_size];
        // Partial trailing line carried across stripes. Byte-based so a
        // stripe may split a multi-byte character.
        let mut line_buffer: Vec<u8> = Vec::with_capacity(config::READ_BUFFER_SIZE);
        let mut index = GzipIndex::default();
        let mut uncompressed_total = 0u64;

        loop {
            if self.stop.load(Ordering::Acquire) {
                return None;
            }
            let filled = match self.fill_stripe(&mut decoder, &mut stripe) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, path = %self.data_path.display(), "decompression failed");
                    return None;
                }
            };

            if !self.emit_lines(&stripe[..filled], &mut line_buffer) {
                return None;
            }

            uncompressed_total += filled as u64;
            index.push_point(self.counter.load(Ordering::Relaxed), uncompressed_total);
        }

        if !line_buffer.is_empty() {
            let line = into_string(std::mem::take(&mut line_buffer));
            if !self.push_line(line) {
                return None;
            }
        }
        Some(index)
    }

    fn fill_stripe(&self, decoder: &mut impl Read, stripe: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < stripe.len() {
            let end = (filled + self.chunk_size).min(stripe.len());
            match decoder.read(&mut stripe[filled..end])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    fn emit_lines(&self, stripe: &[u8], line_buffer: &mut Vec<u8>) -> bool {
        let mut start = 0;
        for newline in memchr_iter(b'\n', stripe) {
            let fragment = &stripe[start..newline];
            let line = if line_buffer.is_empty() {
                into_string(fragment.to_vec())
            } else {
                line_buffer.extend_from_slice(fragment);
                into_string(std::mem::take(line_buffer))
            };
            if !self.push_line(line) {
                return false;
            }
            start = newline + 1;
        }
        line_buffer.extend_from_slice(&stripe[start..]);
        true
    }

    /// Enqueue one line, yielding while the queue is full.
    fn push_line(&self, mut line: String) -> bool {
        loop {
            match self.queue.push(line) {
                Ok(()) => return true,
                Err(rejected) => {
                    if self.stop.load(Ordering::Acquire) {
                        return false;
                    }
                    line = rejected;
                    thread::yield_now();
                }
            }
        }
    }
}

fn into_string(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}
