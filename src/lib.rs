//! Ariadne: all shortest paths through the Wikipedia article link graph
//!
//! This crate loads the three Wikipedia SQL dump tables that describe the
//! article-to-article link graph (`page`, `linktarget`, `pagelinks`),
//! resolves them into a compact in-memory directed graph of main-namespace
//! articles, and answers "enumerate every shortest directed path from
//! article A to article B".
//!
//! # Pipeline
//!
//! 1. **Decompression** -- A line reader streams gzip-compressed SQL off
//!    disk behind a bounded queue, with a sequential and a parallel backend
//!    sharing one contract
//! 2. **Parsing** -- `INSERT INTO` lines are cut into tuples and decoded
//!    positionally; malformed records are dropped, never fatal
//! 3. **Loading** -- Three staged loaders build the page vector and the
//!    resolution maps (id→index, title→index, linktarget-id→index), each
//!    map torn down the moment no later stage needs it
//! 4. **Graph** -- The edge list is packed into a CSR adjacency store;
//!    queries run a layered BFS that records all shortest-path parents,
//!    then enumerate paths by walking the parent DAG
//!
//! # Key Modules
//!
//! - [`sql`] -- SQL tuple parser and the dump item-count estimator
//! - [`reader`] / [`parallel`] -- sequential and parallel line readers
//! - [`gzindex`] -- gztool-layout decompression index import/export
//! - [`pump`] -- `INSERT INTO` filter and parse dispatch with the
//!   first-batch capacity hook
//! - [`pages`] / [`linktargets`] / [`links`] -- the three table loaders
//! - [`loader`] -- stage sequencing and memory hand-off
//! - [`graph`] -- CSR store, layered BFS, path enumeration
//! - [`pool`] -- worker pool for parallel parsing
//! - [`models`] / [`config`] / [`progress`] -- shared types and knobs
//!
//! # Memory Discipline
//!
//! Peak memory is bounded by moving, never copying, the large containers:
//! the pages vector and the edge list are owned by exactly one component
//! at a time, and at most one of the edge list and the CSR store is fully
//! populated at any moment. Only the title lookup survives loading, for
//! translating user-typed article names to node indices.

pub mod config;
pub mod graph;
pub mod gzindex;
pub mod linktargets;
pub mod links;
pub mod loader;
pub mod models;
pub mod pages;
pub mod parallel;
pub mod pool;
pub mod progress;
pub mod pump;
pub mod reader;
pub mod sql;
