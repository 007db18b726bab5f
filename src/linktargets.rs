use crate::config::{DecompressionBackend, Hashmap, LoaderOptions};
use crate::models::WikiFile;
use crate::pages::PageLoader;
use crate::progress::{ProgressThrottle, ProgressWatch, ReadProgress};
use crate::pump::{self, BatchSink};
use crate::reader::LineReader;
use crate::sql::{self, TupleParser};
use anyhow::Result;
use std::time::Duration;
use tracing::{debug, info};

/// Loads the `linktarget` table, resolving each target title to a page
/// index so that `pagelinks` rows can be joined by linktarget id alone.
///
/// Targets whose title is unknown (deleted pages, cross-wiki leftovers)
/// are counted and dropped.
#[derive(Default)]
pub struct LinkTargetLoader {
    map: Option<Hashmap<u64, u32>>,
    parsed: u64,
    mapped: u64,
    title_misses: u64,
}

impl LinkTargetLoader {
    pub fn new() -> Self {
        Self {
            map: Some(Hashmap::default()),
            ..Self::default()
        }
    }

    /// Parse one `INSERT INTO \`linktarget\`` line into `(lt_id, title)` pairs.
    pub fn parse_line(line: &str) -> Vec<(u64, String)> {
        let tuples = sql::extract_tuples(line);
        let mut targets = Vec::with_capacity(tuples.len());

        for tuple in tuples {
            let mut parser = TupleParser::new(tuple);
            let Some(lt_id) = parser.next_int::<u64>() else {
                continue;
            };
            let Some(namespace) = parser.next_int::<u32>() else {
                continue;
            };
            if namespace != 0 {
                continue;
            }
            let Some(title) = parser.next_string() else {
                continue;
            };
            targets.push((lt_id, title));
        }

        targets
    }

    fn insert_batch(&mut self, batch: Vec<(u64, String)>, pages: &PageLoader) {
        let Some(map) = self.map.as_mut() else {
            return;
        };
        self.parsed += batch.len() as u64;
        for (lt_id, title) in batch {
            match pages.index_by_title(&title) {
                Some(index) => {
                    map.insert(lt_id, index);
                    self.mapped += 1;
                }
                None => self.title_misses += 1,
            }
        }
    }

    /// Stream the `linktarget` dump, resolving titles through `pages`.
    pub fn load_linktarget_table<F>(
        &mut self,
        file: &WikiFile,
        pages: &PageLoader,
        options: &LoaderOptions,
        progress: F,
        refresh_rate: Duration,
    ) -> Result<()>
    where
        F: FnMut(usize, f64, ReadProgress),
    {
        let mut reader = LineReader::open(file, options)?;
        if self.map.is_none() {
            self.map = Some(Hashmap::default());
        }
        // The page count bounds how many targets can resolve.
        if let Some(map) = self.map.as_mut() {
            map.reserve(pages.page_count());
        }

        let watch = reader.watch();
        let mut sink = LinkTargetSink {
            loader: self,
            pages,
            watch: watch.clone(),
            throttle: ProgressThrottle::new(refresh_rate),
            progress,
        };
        match options.backend {
            DecompressionBackend::Sequential => {
                pump::pump_insert_lines(&mut reader, Self::parse_line, &mut sink);
            }
            DecompressionBackend::Parallel => {
                pump::pump_insert_lines_parallel(
                    &mut reader,
                    Self::parse_line,
                    options.effective_workers(),
                    &mut sink,
                );
            }
        }
        let LinkTargetSink {
            loader,
            mut throttle,
            mut progress,
            ..
        } = sink;
        throttle.tick(
            loader.linktarget_count(),
            watch.snapshot(),
            &mut progress,
            true,
        );

        info!(
            parsed = loader.parsed,
            mapped = loader.mapped,
            title_misses = loader.title_misses,
            "linktarget table loaded"
        );
        Ok(())
    }

    pub fn index_by_linktarget_id(&self, lt_id: u64) -> Option<u32> {
        self.map.as_ref()?.get(&lt_id).copied()
    }

    pub fn linktarget_count(&self) -> usize {
        self.map.as_ref().map_or(0, Hashmap::len)
    }

    pub fn has_map(&self) -> bool {
        self.map.is_some()
    }

    pub fn drop_map(&mut self) {
        if self.map.take().is_some() {
            debug!("dropping linktarget map to free memory");
        }
    }
}

struct LinkTargetSink<'a, F> {
    loader: &'a mut LinkTargetLoader,
    pages: &'a PageLoader,
    watch: ProgressWatch,
    throttle: ProgressThrottle,
    progress: F,
}

impl<F> BatchSink<Vec<(u64, String)>> for LinkTargetSink<'_, F>
where
    F: FnMut(usize, f64, ReadProgress),
{
    fn on_batch(&mut self, batch: Vec<(u64, String)>) {
        self.loader.insert_batch(batch, self.pages);
        self.throttle.tick(
            self.loader.linktarget_count(),
            self.watch.snapshot(),
            &mut self.progress,
            false,
        );
    }
}
