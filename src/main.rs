use anyhow::{bail, Result};
use ariadne::config::{
    DecompressionBackend, LoaderOptions, DEFAULT_CHUNK_SIZE, DEFAULT_REFRESH_RATE,
};
use ariadne::graph::PageGraph;
use ariadne::loader::LoaderManager;
use ariadne::models::WikiDump;
use ariadne::progress::LoadEvent;
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "ariadne",
    about = "Find every shortest path between two Wikipedia articles"
)]
struct Cli {
    /// Wiki language code (the dump filename prefix)
    #[arg(short, long, default_value = "en")]
    lang: String,

    /// Dump date (YYYYMMDD)
    #[arg(short, long)]
    date: String,

    /// Directory containing the *.sql.gz dump files
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Decompression backend
    #[arg(long, value_enum, default_value_t = DecompressionBackend::Sequential)]
    backend: DecompressionBackend,

    /// Parse worker threads in parallel mode (0 = all cores)
    #[arg(long, default_value_t = 0)]
    workers: usize,

    /// Decompression chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Progress refresh interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_REFRESH_RATE.as_millis() as u64)]
    refresh_ms: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Start article title (reads queries from stdin when omitted)
    start: Option<String>,

    /// Target article title
    target: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let dump = WikiDump::locate(&args.data_dir, &args.lang, &args.date);
    let options = LoaderOptions {
        backend: args.backend,
        workers: args.workers,
        chunk_size: args.chunk_size,
    };
    let refresh_rate = Duration::from_millis(args.refresh_ms);

    let (graph, manager) = load(dump, options, refresh_rate)?;

    println!("# ----- Load timings ----- #");
    for (stage, duration) in manager.stage_durations() {
        println!("{stage}: {duration:.2?}");
    }
    println!(
        "{} articles, {} links",
        graph.page_count(),
        graph.link_count()
    );

    match (&args.start, &args.target) {
        (Some(start), Some(target)) => {
            run_query(&graph, &manager, start, target, refresh_rate);
        }
        (None, None) => query_loop(&graph, &manager, refresh_rate)?,
        _ => bail!("provide both start and target titles, or neither for interactive queries"),
    }

    Ok(())
}

/// Run the loader pipeline on its own thread and render progress events
/// on this one until the event channel closes.
fn load(
    dump: WikiDump,
    options: LoaderOptions,
    refresh_rate: Duration,
) -> Result<(PageGraph, LoaderManager)> {
    let (tx, rx) = crossbeam::channel::unbounded();

    let loader = thread::spawn(move || -> Result<(PageGraph, LoaderManager)> {
        let mut manager = LoaderManager::new();
        let graph = manager.run(&dump, &options, refresh_rate, |event| {
            let _ = tx.send(event);
        })?;
        Ok((graph, manager))
    });

    let multi = MultiProgress::new();
    let mut current: Option<ProgressBar> = None;
    for event in rx {
        match event {
            LoadEvent::StageStarted(stage) => {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_message(format!("{stage}: starting"));
                bar.tick();
                current = Some(bar);
            }
            LoadEvent::Records {
                stage,
                count,
                per_second,
                read,
            } => {
                if let Some(bar) = &current {
                    bar.set_message(format!(
                        "{stage}: {count} records ({per_second:.0}/s) [{}/{} compressed bytes]",
                        read.current_bytes, read.total_bytes
                    ));
                    bar.tick();
                }
            }
            LoadEvent::GraphBuild(build) => {
                if let Some(bar) = &current {
                    bar.set_message(format!(
                        "graph: {}/{} edges ({}/s)",
                        build.processed_edges, build.total_edges, build.edges_per_second
                    ));
                    bar.tick();
                }
            }
            LoadEvent::StageFinished { stage, duration } => {
                if let Some(bar) = current.take() {
                    bar.finish_with_message(format!("{stage}: done in {duration:.2?}"));
                }
            }
        }
    }

    match loader.join() {
        Ok(result) => result,
        Err(_) => bail!("loader thread panicked"),
    }
}

fn run_query(
    graph: &PageGraph,
    manager: &LoaderManager,
    start: &str,
    target: &str,
    refresh_rate: Duration,
) {
    // User input follows URL convention; titles are stored with spaces.
    let start_title = start.replace('_', " ");
    let target_title = target.replace('_', " ");

    let pages = manager.page_loader();
    let Some(start_index) = pages.index_by_title(&start_title) else {
        println!("No article titled \"{start_title}\"");
        return;
    };
    let Some(target_index) = pages.index_by_title(&target_title) else {
        println!("No article titled \"{target_title}\"");
        return;
    };

    let spinner = ProgressBar::new_spinner();
    let began = Instant::now();
    let paths = graph.all_shortest_paths(
        start_index,
        target_index,
        |bfs| {
            spinner.set_message(format!(
                "layer {}: {}/{} nodes, {} explored in total",
                bfs.current_layer, bfs.layer_explored, bfs.layer_size, bfs.total_explored
            ));
            spinner.tick();
        },
        refresh_rate,
    );
    spinner.finish_and_clear();
    let elapsed = began.elapsed();

    if paths.is_empty() {
        println!("No path from \"{start_title}\" to \"{target_title}\" ({elapsed:.2?})");
        return;
    }

    println!(
        "{} shortest path(s), {} step(s) each ({elapsed:.2?}):",
        paths.len(),
        paths[0].len() - 1
    );
    for path in &paths {
        let titles: Vec<&str> = path
            .iter()
            .map(|&index| graph.page(index).map_or("?", |p| p.title.as_str()))
            .collect();
        println!("  {}", titles.join(" -> "));
    }
}

fn query_loop(graph: &PageGraph, manager: &LoaderManager, refresh_rate: Duration) -> Result<()> {
    println!("Enter queries as: start title -> target title (blank line exits)");
    let stdin = io::stdin();
    let mut input = String::new();
    loop {
        print!("? ");
        io::stdout().flush()?;
        input.clear();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let line = input.trim();
        if line.is_empty() {
            break;
        }
        let Some((start, target)) = line.split_once("->") else {
            println!("expected: start title -> target title");
            continue;
        };
        run_query(graph, manager, start.trim(), target.trim(), refresh_rate);
    }
    Ok(())
}
