use crate::config::LoaderOptions;
use crate::graph::PageGraph;
use crate::linktargets::LinkTargetLoader;
use crate::links::LinkLoader;
use crate::models::WikiDump;
use crate::pages::PageLoader;
use crate::progress::{LoadEvent, LoadStage};
use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Sequences the three table loads and graph construction, releasing each
/// intermediate structure at the moment nothing downstream needs it:
///
/// 1. pages, 2. linktargets, 3. pagelinks, then drop the page-id lookup
/// and the linktarget map, move pages and edges into the graph, and let
/// the edge list die with construction. Only the title lookup survives,
/// for translating user queries to node indices.
#[derive(Default)]
pub struct LoaderManager {
    pages: PageLoader,
    linktargets: LinkTargetLoader,
    links: LinkLoader,
    stage_durations: Vec<(LoadStage, Duration)>,
}

impl LoaderManager {
    pub fn new() -> Self {
        Self {
            pages: PageLoader::new(),
            linktargets: LinkTargetLoader::new(),
            links: LinkLoader::new(),
            stage_durations: Vec::new(),
        }
    }

    /// The page loader, kept alive after `run` for title lookups.
    pub fn page_loader(&self) -> &PageLoader {
        &self.pages
    }

    pub fn stage_durations(&self) -> &[(LoadStage, Duration)] {
        &self.stage_durations
    }

    /// Load all three dumps and build the graph, emitting progress events
    /// along the way. The graph is returned by value; the manager retains
    /// only the title lookup.
    pub fn run<F>(
        &mut self,
        dump: &WikiDump,
        options: &LoaderOptions,
        refresh_rate: Duration,
        mut events: F,
    ) -> Result<PageGraph>
    where
        F: FnMut(LoadEvent),
    {
        debug!(
            lang = %dump.lang_code,
            date = %dump.date,
            backend = ?options.backend,
            "loading wiki dump"
        );

        events(LoadEvent::StageStarted(LoadStage::Pages));
        let started = Instant::now();
        self.pages.load_page_table(
            &dump.page,
            options,
            |count, per_second, read| {
                events(LoadEvent::Records {
                    stage: LoadStage::Pages,
                    count,
                    per_second,
                    read,
                })
            },
            refresh_rate,
        )?;
        self.finish_stage(LoadStage::Pages, started, &mut events);

        events(LoadEvent::StageStarted(LoadStage::LinkTargets));
        let started = Instant::now();
        self.linktargets.load_linktarget_table(
            &dump.linktarget,
            &self.pages,
            options,
            |count, per_second, read| {
                events(LoadEvent::Records {
                    stage: LoadStage::LinkTargets,
                    count,
                    per_second,
                    read,
                })
            },
            refresh_rate,
        )?;
        self.finish_stage(LoadStage::LinkTargets, started, &mut events);
        // The title lookup stays alive: interactive queries resolve
        // article names through it for the rest of the session.

        events(LoadEvent::StageStarted(LoadStage::Links));
        let started = Instant::now();
        self.links.load_pagelinks_table(
            &dump.pagelinks,
            &self.pages,
            &self.linktargets,
            options,
            |count, per_second, read| {
                events(LoadEvent::Records {
                    stage: LoadStage::Links,
                    count,
                    per_second,
                    read,
                })
            },
            refresh_rate,
        )?;
        self.finish_stage(LoadStage::Links, started, &mut events);

        // Both resolution maps are now dead weight.
        self.pages.drop_id_lookup();
        self.linktargets.drop_map();

        events(LoadEvent::StageStarted(LoadStage::Graph));
        let started = Instant::now();
        let pages = self.pages.take_pages();
        let links = self.links.take_links();
        let graph = PageGraph::build(
            pages,
            links,
            |build| events(LoadEvent::GraphBuild(build)),
            refresh_rate,
        );
        self.finish_stage(LoadStage::Graph, started, &mut events);

        info!(
            pages = graph.page_count(),
            links = graph.link_count(),
            "wiki graph ready"
        );
        Ok(graph)
    }

    fn finish_stage(
        &mut self,
        stage: LoadStage,
        started: Instant,
        events: &mut impl FnMut(LoadEvent),
    ) {
        let duration = started.elapsed();
        self.stage_durations.push((stage, duration));
        events(LoadEvent::StageFinished { stage, duration });
    }
}
