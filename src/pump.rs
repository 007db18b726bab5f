use crate::config;
use crate::pool::ThreadPool;
use crate::reader::LineReader;
use std::collections::VecDeque;

/// Receiver of parsed batches from the pump.
///
/// `on_first_batch` is invoked exactly once, with a borrow of the first
/// batch before it is delivered; it is the hook where loaders pre-size
/// their containers from the item-count estimate. Every batch, the first
/// included, then flows through `on_batch` in input order.
pub trait BatchSink<B> {
    fn on_first_batch(&mut self, _batch: &B) {}
    fn on_batch(&mut self, batch: B);
}

/// Drive a reader to completion, parsing every `INSERT INTO` line on the
/// calling thread.
pub fn pump_insert_lines<B, S>(reader: &mut LineReader, parse_line: fn(&str) -> B, sink: &mut S)
where
    S: BatchSink<B>,
{
    let mut line = String::new();
    let mut first_pending = true;
    while reader.get_line(&mut line) {
        if !line.starts_with("INSERT INTO") {
            continue;
        }
        let batch = parse_line(&line);
        if first_pending {
            sink.on_first_batch(&batch);
            first_pending = false;
        }
        sink.on_batch(batch);
    }
}

/// Like [`pump_insert_lines`], but parse work is fanned out over a worker
/// pool. At most `2 × workers` parses are outstanding; results are drained
/// in submission order, so batches reach the sink in input order.
pub fn pump_insert_lines_parallel<B, S>(
    reader: &mut LineReader,
    parse_line: fn(&str) -> B,
    workers: usize,
    sink: &mut S,
) where
    B: Send + 'static,
    S: BatchSink<B>,
{
    let pool = ThreadPool::new(workers);
    let max_outstanding = workers.max(1) * config::MAX_OUTSTANDING_FACTOR;
    let mut pending = VecDeque::new();
    let mut first_pending = true;
    let mut line = String::new();

    let deliver = |batch: B, first_pending: &mut bool, sink: &mut S| {
        if *first_pending {
            sink.on_first_batch(&batch);
            *first_pending = false;
        }
        sink.on_batch(batch);
    };

    while reader.get_line(&mut line) {
        if !line.starts_with("INSERT INTO") {
            continue;
        }
        let owned = std::mem::take(&mut line);
        pending.push_back(pool.submit(move || parse_line(&owned)));

        // Backpressure: block on the oldest result once the window is full.
        while pending.len() > max_outstanding {
            if let Some(batch) = pending.pop_front().and_then(|handle| handle.wait()) {
                deliver(batch, &mut first_pending, &mut *sink);
            }
        }
    }

    while let Some(handle) = pending.pop_front() {
        if let Some(batch) = handle.wait() {
            deliver(batch, &mut first_pending, sink);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderOptions;
    use crate::models::{DumpKind, WikiFile};
    use crate::sql;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn gz_reader(content: &str) -> (LineReader, NamedTempFile) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(content.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&compressed).unwrap();
        tmp.flush().unwrap();

        let file = WikiFile {
            lang_code: "en".to_string(),
            date: "20240601".to_string(),
            kind: DumpKind::Page,
            data_path: tmp.path().to_path_buf(),
            index_path: None,
        };
        let reader = LineReader::open(&file, &LoaderOptions::default()).unwrap();
        (reader, tmp)
    }

    fn count_tuples(line: &str) -> usize {
        sql::extract_tuples(line).len()
    }

    #[derive(Default)]
    struct RecordingSink {
        first: Option<usize>,
        first_calls: usize,
        batches: Vec<usize>,
    }

    impl BatchSink<usize> for RecordingSink {
        fn on_first_batch(&mut self, batch: &usize) {
            self.first = Some(*batch);
            self.first_calls += 1;
        }

        fn on_batch(&mut self, batch: usize) {
            self.batches.push(batch);
        }
    }

    const DUMP: &str = "\
-- MySQL dump prelude\n\
DROP TABLE IF EXISTS `page`;\n\
INSERT INTO `page` VALUES (1,0,'A',0),(2,0,'B',0);\n\
/*!40101 SET character_set_client = utf8mb4 */;\n\
INSERT INTO `page` VALUES (3,0,'C',0),(4,0,'D',0),(5,0,'E',0);\n\
INSERT INTO `page` VALUES (6,0,'F',0);\n";

    #[test]
    fn only_insert_lines_are_parsed() {
        let (mut reader, _tmp) = gz_reader(DUMP);
        let mut sink = RecordingSink::default();
        pump_insert_lines(&mut reader, count_tuples, &mut sink);
        assert_eq!(sink.batches, vec![2, 3, 1]);
    }

    #[test]
    fn first_batch_hook_fires_exactly_once_with_first_batch() {
        let (mut reader, _tmp) = gz_reader(DUMP);
        let mut sink = RecordingSink::default();
        pump_insert_lines(&mut reader, count_tuples, &mut sink);
        assert_eq!(sink.first, Some(2));
        assert_eq!(sink.first_calls, 1);
    }

    #[test]
    fn no_insert_lines_means_no_batches() {
        let (mut reader, _tmp) = gz_reader("-- prelude only\nDROP TABLE `page`;\n");
        let mut sink = RecordingSink::default();
        pump_insert_lines(&mut reader, count_tuples, &mut sink);
        assert!(sink.batches.is_empty());
        assert_eq!(sink.first_calls, 0);
    }

    #[test]
    fn parallel_pump_preserves_input_order() {
        let lines: String = (0..40)
            .map(|i| {
                let tuples: Vec<String> =
                    (0..=i % 7).map(|j| format!("({},0,'T{}',0)", j, j)).collect();
                format!("INSERT INTO `page` VALUES {};\n", tuples.join(","))
            })
            .collect();
        let expected: Vec<usize> = (0..40).map(|i| i % 7 + 1).collect();

        let (mut reader, _tmp) = gz_reader(&lines);
        let mut sink = RecordingSink::default();
        pump_insert_lines_parallel(&mut reader, count_tuples, 4, &mut sink);
        assert_eq!(sink.batches, expected);
        assert_eq!(sink.first, Some(1));
        assert_eq!(sink.first_calls, 1);
    }

    #[test]
    fn parallel_pump_with_single_worker() {
        let (mut reader, _tmp) = gz_reader(DUMP);
        let mut sink = RecordingSink::default();
        pump_insert_lines_parallel(&mut reader, count_tuples, 1, &mut sink);
        assert_eq!(sink.batches, vec![2, 3, 1]);
    }
}
