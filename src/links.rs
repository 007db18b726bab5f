use crate::config::{DecompressionBackend, LoaderOptions};
use crate::linktargets::LinkTargetLoader;
use crate::models::{Link, WikiFile};
use crate::pages::PageLoader;
use crate::progress::{ProgressThrottle, ProgressWatch, ReadProgress};
use crate::pump::{self, BatchSink};
use crate::reader::LineReader;
use crate::sql::{self, TupleParser};
use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Loads the `pagelinks` table into an edge list of page indices,
/// resolving the source through the page-id lookup and the target through
/// the linktarget map. Rows that fail either lookup are counted per side
/// and dropped.
#[derive(Default)]
pub struct LinkLoader {
    links: Vec<Link>,
    parsed: u64,
    inserted: u64,
    from_id_misses: u64,
    target_id_misses: u64,
}

impl LinkLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one `INSERT INTO \`pagelinks\`` line into
    /// `(page_from_id, linktarget_id)` pairs.
    ///
    /// Field order per <https://www.mediawiki.org/wiki/Manual:Pagelinks_table>.
    pub fn parse_line(line: &str) -> Vec<(u32, u64)> {
        let tuples = sql::extract_tuples(line);
        let mut links = Vec::with_capacity(tuples.len());

        for tuple in tuples {
            let mut parser = TupleParser::new(tuple);
            let Some(page_from_id) = parser.next_int::<u32>() else {
                continue;
            };
            let Some(namespace) = parser.next_int::<u32>() else {
                continue;
            };
            if namespace != 0 {
                continue;
            }
            let Some(link_target_id) = parser.next_int::<u64>() else {
                continue;
            };
            links.push((page_from_id, link_target_id));
        }

        links
    }

    fn insert_batch(
        &mut self,
        batch: Vec<(u32, u64)>,
        pages: &PageLoader,
        linktargets: &LinkTargetLoader,
    ) {
        self.parsed += batch.len() as u64;
        for (page_from_id, link_target_id) in batch {
            let from = pages.index_by_id(page_from_id);
            let to = linktargets.index_by_linktarget_id(link_target_id);
            match (from, to) {
                (Some(from), Some(to)) => {
                    self.links.push(Link { from, to });
                    self.inserted += 1;
                }
                (from, to) => {
                    if from.is_none() {
                        self.from_id_misses += 1;
                    }
                    if to.is_none() {
                        self.target_id_misses += 1;
                    }
                }
            }
        }
    }

    /// Stream the `pagelinks` dump, resolving both endpoints to indices.
    pub fn load_pagelinks_table<F>(
        &mut self,
        file: &WikiFile,
        pages: &PageLoader,
        linktargets: &LinkTargetLoader,
        options: &LoaderOptions,
        progress: F,
        refresh_rate: Duration,
    ) -> Result<()>
    where
        F: FnMut(usize, f64, ReadProgress),
    {
        let mut reader = LineReader::open(file, options)?;
        let watch = reader.watch();
        let mut sink = LinkSink {
            loader: self,
            pages,
            linktargets,
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
        let LinkSink {
            loader,
            mut throttle,
            mut progress,
            ..
        } = sink;
        throttle.tick(loader.links.len(), watch.snapshot(), &mut progress, true);

        info!(
            parsed = loader.parsed,
            inserted = loader.inserted,
            from_id_misses = loader.from_id_misses,
            target_id_misses = loader.target_id_misses,
            "pagelinks table loaded"
        );
        Ok(())
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Move out the edge list for graph construction.
    pub fn take_links(&mut self) -> Vec<Link> {
        std::mem::take(&mut self.links)
    }
}

struct LinkSink<'a, F> {
    loader: &'a mut LinkLoader,
    pages: &'a PageLoader,
    linktargets: &'a LinkTargetLoader,
    data_path: &'a Path,
    watch: ProgressWatch,
    throttle: ProgressThrottle,
    progress: F,
}

impl<F> BatchSink<Vec<(u32, u64)>> for LinkSink<'_, F>
where
    F: FnMut(usize, f64, ReadProgress),
{
    fn on_first_batch(&mut self, batch: &Vec<(u32, u64)>) {
        let estimate = match sql::estimated_item_count(self.data_path, batch.len()) {
            Ok(count) => usize::try_from(count).unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "link count estimate failed; edge list will grow on demand");
                0
            }
        };
        self.loader.links.reserve(estimate);
    }

    fn on_batch(&mut self, batch: Vec<(u32, u64)>) {
        self.loader.insert_batch(batch, self.pages, self.linktargets);
        self.throttle.tick(
            self.loader.links.len(),
            self.watch.snapshot(),
            &mut self.progress,
            false,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_REFRESH_RATE;
    use crate::models::DumpKind;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn gz_dump(content: &str) -> NamedTempFile {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(content.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&compressed).unwrap();
        tmp.flush().unwrap();
        tmp
    }

    fn dump_file(tmp: &NamedTempFile, kind: DumpKind) -> WikiFile {
        WikiFile {
            lang_code: "en".to_string(),
            date: "20240601".to_string(),
            kind,
            data_path: tmp.path().to_path_buf(),
            index_path: None,
        }
    }

    /// Three pages A/B/C with wiki ids 1/2/3 and linktargets 100/200/300.
    fn loaders() -> (PageLoader, LinkTargetLoader) {
        let page_tmp =
            gz_dump("INSERT INTO `page` VALUES (1,0,'A',0),(2,0,'B',0),(3,0,'C',0);\n");
        let mut pages = PageLoader::new();
        pages
            .load_page_table(
                &dump_file(&page_tmp, DumpKind::Page),
                &LoaderOptions::default(),
                |_, _, _| {},
                DEFAULT_REFRESH_RATE,
            )
            .unwrap();

        let lt_tmp =
            gz_dump("INSERT INTO `linktarget` VALUES (100,0,'A'),(200,0,'B'),(300,0,'C');\n");
        let mut linktargets = LinkTargetLoader::new();
        linktargets
            .load_linktarget_table(
                &dump_file(&lt_tmp, DumpKind::LinkTarget),
                &pages,
                &LoaderOptions::default(),
                |_, _, _| {},
                DEFAULT_REFRESH_RATE,
            )
            .unwrap();

        (pages, linktargets)
    }

    #[test]
    fn parse_line_reads_from_namespace_target() {
        let parsed = LinkLoader::parse_line(
            "INSERT INTO `pagelinks` VALUES (1,0,200),(1,1,300),(2,0,300);",
        );
        assert_eq!(parsed, vec![(1, 200), (2, 300)]);
    }

    #[test]
    fn parse_line_skips_malformed_tuples() {
        let parsed =
            LinkLoader::parse_line("INSERT INTO `pagelinks` VALUES (1,0,200),(x,0,300),(2,0,);");
        assert_eq!(parsed, vec![(1, 200)]);
    }

    #[test]
    fn both_endpoints_must_resolve() {
        let (pages, linktargets) = loaders();
        let mut loader = LinkLoader::new();
        loader.insert_batch(
            vec![(1, 200), (1, 999), (42, 300), (42, 999)],
            &pages,
            &linktargets,
        );

        assert_eq!(loader.links, vec![Link { from: 0, to: 1 }]);
        assert_eq!(loader.inserted, 1);
        assert_eq!(loader.from_id_misses, 2);
        assert_eq!(loader.target_id_misses, 2);
    }

    #[test]
    fn load_pagelinks_table_end_to_end() {
        let (pages, linktargets) = loaders();
        let tmp = gz_dump(
            "-- prelude\n\
             INSERT INTO `pagelinks` VALUES (1,0,200),(1,0,300),(2,0,300),(3,1,100);\n",
        );
        let mut loader = LinkLoader::new();
        loader
            .load_pagelinks_table(
                &dump_file(&tmp, DumpKind::PageLinks),
                &pages,
                &linktargets,
                &LoaderOptions::default(),
                |_, _, _| {},
                DEFAULT_REFRESH_RATE,
            )
            .unwrap();

        assert_eq!(
            loader.take_links(),
            vec![
                Link { from: 0, to: 1 },
                Link { from: 0, to: 2 },
                Link { from: 1, to: 2 },
            ]
        );
    }

    #[test]
    fn edge_indices_stay_in_page_range() {
        let (pages, linktargets) = loaders();
        let tmp = gz_dump("INSERT INTO `pagelinks` VALUES (1,0,100),(2,0,200),(3,0,300);\n");
        let mut loader = LinkLoader::new();
        loader
            .load_pagelinks_table(
                &dump_file(&tmp, DumpKind::PageLinks),
                &pages,
                &linktargets,
                &LoaderOptions::default(),
                |_, _, _| {},
                DEFAULT_REFRESH_RATE,
            )
            .unwrap();

        let n = pages.page_count() as u32;
        assert!(loader
            .links
            .iter()
            .all(|link| link.from < n && link.to < n));
    }

    #[test]
    fn self_loops_are_kept() {
        let (pages, linktargets) = loaders();
        let mut loader = LinkLoader::new();
        loader.insert_batch(vec![(1, 100)], &pages, &linktargets);
        assert_eq!(loader.links, vec![Link { from: 0, to: 0 }]);
    }

    #[test]
    fn take_links_leaves_the_loader_empty() {
        let (pages, linktargets) = loaders();
        let mut loader = LinkLoader::new();
        loader.insert_batch(vec![(1, 200)], &pages, &linktargets);

        let links = loader.take_links();
        assert_eq!(links.len(), 1);
        assert_eq!(loader.link_count(), 0);
    }
}
