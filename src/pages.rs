use crate::config::{DecompressionBackend, Hashmap, LoaderOptions};
use crate::models::{Page, WikiFile};
use crate::progress::{ProgressThrottle, ProgressWatch, ReadProgress};
use crate::pump::{self, BatchSink};
use crate::reader::LineReader;
use crate::sql::{self, TupleParser};
use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Loads the `page` table: the dense article vector plus the id→index and
/// title→index lookup maps.
///
/// The pages vector is append-only during the load and frozen afterwards;
/// a page's position in it is the graph's node identifier. The lookup maps
/// are torn down individually once later stages no longer need them.
#[derive(Default)]
pub struct PageLoader {
    pages: Vec<Page>,
    id_lookup: Option<Hashmap<u32, u32>>,
    title_lookup: Option<Hashmap<String, u32>>,
}

impl PageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one `INSERT INTO \`page\`` line into `(page_id, Page)` records.
    ///
    /// Field order per <https://www.mediawiki.org/wiki/Manual:Page_table>.
    /// Non-article namespaces and malformed tuples are dropped.
    pub fn parse_line(line: &str) -> Vec<(u32, Page)> {
        let tuples = sql::extract_tuples(line);
        let mut pages = Vec::with_capacity(tuples.len());

        for tuple in tuples {
            let mut parser = TupleParser::new(tuple);
            let Some(page_id) = parser.next_int::<u32>() else {
                continue;
            };
            let Some(namespace) = parser.next_int::<i32>() else {
                continue;
            };
            if namespace != 0 {
                continue;
            }
            let Some(title) = parser.next_string() else {
                continue;
            };
            let Some(is_redirect) = parser.next_bool() else {
                continue;
            };
            pages.push((page_id, Page { title, is_redirect }));
        }

        pages
    }

    fn insert_batch(&mut self, batch: Vec<(u32, Page)>) {
        let (Some(id_lookup), Some(title_lookup)) =
            (self.id_lookup.as_mut(), self.title_lookup.as_mut())
        else {
            return;
        };
        for (page_id, page) in batch {
            let index = self.pages.len() as u32;
            id_lookup.insert(page_id, index);
            // First seen wins: when a redirect and its target share a
            // title, the earlier row keeps the binding.
            title_lookup.entry(page.title.clone()).or_insert(index);
            self.pages.push(page);
        }
    }

    fn reserve(&mut self, additional: usize) {
        self.pages.reserve(additional);
        if let Some(map) = self.id_lookup.as_mut() {
            map.reserve(additional);
        }
        if let Some(map) = self.title_lookup.as_mut() {
            map.reserve(additional);
        }
    }

    /// Stream the `page` dump into the loader.
    pub fn load_page_table<F>(
        &mut self,
        file: &WikiFile,
        options: &LoaderOptions,
        progress: F,
        refresh_rate: Duration,
    ) -> Result<()>
    where
        F: FnMut(usize, f64, ReadProgress),
    {
        let mut reader = LineReader::open(file, options)?;
        if self.id_lookup.is_none() {
            self.id_lookup = Some(Hashmap::default());
        }
        if self.title_lookup.is_none() {
            self.title_lookup = Some(Hashmap::default());
        }

        let watch = reader.watch();
        let mut sink = PageSink {
            loader: self,
            data_path: &file.data_path,
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
        let PageSink {
            loader,
            mut throttle,
            mut progress,
            ..
        } = sink;
        throttle.tick(loader.pages.len(), watch.snapshot(), &mut progress, true);

        // The pages vector lives for the rest of the process; give back the
        // reserve slack.
        loader.pages.shrink_to_fit();
        info!(pages = loader.pages.len(), "page table loaded");
        Ok(())
    }

    pub fn page(&self, index: u32) -> Option<&Page> {
        self.pages.get(index as usize)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn index_by_id(&self, page_id: u32) -> Option<u32> {
        self.id_lookup.as_ref()?.get(&page_id).copied()
    }

    pub fn index_by_title(&self, title: &str) -> Option<u32> {
        self.title_lookup.as_ref()?.get(title).copied()
    }

    pub fn has_id_lookup(&self) -> bool {
        self.id_lookup.is_some()
    }

    pub fn has_title_lookup(&self) -> bool {
        self.title_lookup.is_some()
    }

    /// Move out the pages vector for graph construction.
    pub fn take_pages(&mut self) -> Vec<Page> {
        std::mem::take(&mut self.pages)
    }

    pub fn drop_id_lookup(&mut self) {
        if self.id_lookup.take().is_some() {
            debug!("dropping page id lookup to free memory");
        }
    }

    pub fn drop_title_lookup(&mut self) {
        if self.title_lookup.take().is_some() {
            debug!("dropping page title lookup to free memory");
        }
    }
}

struct PageSink<'a, F> {
    loader: &'a mut PageLoader,
    data_path: &'a Path,
    watch: ProgressWatch,
    throttle: ProgressThrottle,
    progress: F,
}

impl<F> BatchSink<Vec<(u32, Page)>> for PageSink<'_, F>
where
    F: FnMut(usize, f64, ReadProgress),
{
    fn on_first_batch(&mut self, batch: &Vec<(u32, Page)>) {
        let estimate = match sql::estimated_item_count(self.data_path, batch.len()) {
            Ok(count) => usize::try_from(count).unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "page count estimate failed; containers will grow on demand");
                0
            }
        };
        self.loader.reserve(estimate);
    }

    fn on_batch(&mut self, batch: Vec<(u32, Page)>) {
        self.loader.insert_batch(batch);
        self.throttle.tick(
            self.loader.pages.len(),
            self.watch.snapshot(),
            &mut self.progress,
            false,
        );
    }
}
