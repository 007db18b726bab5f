use crate::models::{Link, Page};
use crate::progress::{BfsProgress, GraphBuildProgress};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Check wall-clock time only every 64Ki processed edges during CSR fill.
const BUILD_PROGRESS_MASK: u64 = 0xFFFF;

/// The article link graph in compressed sparse row form.
///
/// `neighbors[offsets[i]..offsets[i + 1]]` holds the out-edges of node
/// `i`. The structure is immutable once built and safe to share across
/// query threads. Parallel edges from the dump are preserved.
pub struct PageGraph {
    pages: Vec<Page>,
    offsets: Vec<u64>,
    neighbors: Vec<u32>,
}

struct BfsTree {
    parents: Vec<Vec<u32>>,
    dist_to_end: u32,
}

impl PageGraph {
    /// Build the CSR adjacency from pages and an edge list, consuming
    /// both. The edge list is freed when this returns.
    pub fn build<F>(
        pages: Vec<Page>,
        links: Vec<Link>,
        mut progress: F,
        refresh_rate: Duration,
    ) -> Self
    where
        F: FnMut(GraphBuildProgress),
    {
        let node_count = pages.len();
        let total_edges = links.len() as u64;

        let mut degrees = vec![0u64; node_count];
        for link in &links {
            degrees[link.from as usize] += 1;
        }

        // offsets[0..=N]: exclusive prefix sum of out-degrees.
        let mut offsets = vec![0u64; node_count + 1];
        for i in 0..node_count {
            offsets[i + 1] = offsets[i] + degrees[i];
        }

        let mut neighbors = vec![0u32; links.len()];
        let mut cursor: Vec<u64> = offsets[..node_count].to_vec();

        let start = Instant::now();
        let mut last_update = start;
        let mut processed = 0u64;
        for link in &links {
            let slot = cursor[link.from as usize];
            neighbors[slot as usize] = link.to;
            cursor[link.from as usize] += 1;
            processed += 1;

            if processed & BUILD_PROGRESS_MASK == 0 {
                let now = Instant::now();
                if now.duration_since(last_update) >= refresh_rate {
                    progress(GraphBuildProgress {
                        processed_edges: processed,
                        total_edges,
                        edges_per_second: edge_rate(processed, start, now),
                    });
                    last_update = now;
                }
            }
        }

        progress(GraphBuildProgress {
            processed_edges: processed,
            total_edges,
            edges_per_second: edge_rate(processed, start, Instant::now()),
        });
        debug!(
            pages = node_count,
            links = total_edges,
            "page graph constructed"
        );

        Self {
            pages,
            offsets,
            neighbors,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn link_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn page(&self, index: u32) -> Option<&Page> {
        self.pages.get(index as usize)
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Out-edges of one node.
    pub fn neighbors(&self, node: u32) -> &[u32] {
        let start = self.offsets[node as usize] as usize;
        let end = self.offsets[node as usize + 1] as usize;
        &self.neighbors[start..end]
    }

    /// Enumerate every shortest directed path from `start` to `end`.
    ///
    /// Returns all paths of length `dist(start, end)` as node-index
    /// vectors, or an empty vector when no path exists or an endpoint is
    /// out of range. A query for `start == end` is the trivial path.
    /// Parallel edges in the dump multiply the enumerated paths; the
    /// number of paths can be exponential in the distance.
    pub fn all_shortest_paths<F>(
        &self,
        start: u32,
        end: u32,
        mut progress: F,
        refresh_rate: Duration,
    ) -> Vec<Vec<u32>>
    where
        F: FnMut(BfsProgress),
    {
        let node_count = self.pages.len();
        if start as usize >= node_count || end as usize >= node_count {
            error!(
                start,
                end,
                pages = node_count,
                "shortest-path endpoint out of range"
            );
            return Vec::new();
        }
        if start == end {
            return vec![vec![start]];
        }

        let tree = self.bfs_with_parents(start, end, &mut progress, refresh_rate);
        if tree.dist_to_end == u32::MAX {
            debug!(start, end, "no path found");
            return Vec::new();
        }
        debug!(
            start,
            end,
            dist = tree.dist_to_end,
            "backtracking all shortest paths"
        );
        self.collect_paths(start, end, &tree.parents)
    }

    /// Layered BFS recording every parent on the shortest-path layer.
    ///
    /// The layer boundary check makes termination exact: once the queue
    /// advances past the layer containing `end`, every shortest path to
    /// `end` has had its parents recorded.
    fn bfs_with_parents(
        &self,
        start: u32,
        end: u32,
        progress: &mut impl FnMut(BfsProgress),
        refresh_rate: Duration,
    ) -> BfsTree {
        let node_count = self.pages.len();
        let mut dist = vec![u32::MAX; node_count];
        let mut parents: Vec<Vec<u32>> = vec![Vec::new(); node_count];
        let mut queue = VecDeque::new();

        dist[start as usize] = 0;
        queue.push_back(start);

        let mut current_layer = 0u32;
        let mut layer_size = 1u32;
        let mut layer_explored = 0u32;
        let mut total_explored = 0u32;
        let mut last_update = Instant::now();

        while let Some(node) = queue.pop_front() {
            let node_dist = dist[node as usize];
            if node_dist > current_layer {
                // Entering a new layer; the previous one is complete.
                if dist[end as usize] != u32::MAX {
                    break;
                }
                current_layer = node_dist;
                layer_size = queue.len() as u32 + 1;
                total_explored += layer_explored;
                layer_explored = 0;

                progress(BfsProgress {
                    current_layer,
                    layer_size,
                    layer_explored,
                    total_explored,
                });
                debug!(
                    layer = current_layer,
                    size = layer_size,
                    explored = total_explored,
                    "search entered new layer"
                );
                last_update = Instant::now();
            }

            for &next in self.neighbors(node) {
                if dist[next as usize] == u32::MAX {
                    dist[next as usize] = node_dist + 1;
                    parents[next as usize].push(node);
                    queue.push_back(next);
                } else if dist[next as usize] == node_dist + 1 {
                    parents[next as usize].push(node);
                }
            }
            layer_explored += 1;

            let now = Instant::now();
            if now.duration_since(last_update) >= refresh_rate {
                progress(BfsProgress {
                    current_layer,
                    layer_size,
                    layer_explored,
                    total_explored: total_explored + layer_explored,
                });
                last_update = now;
            }
        }

        progress(BfsProgress {
            current_layer,
            layer_size,
            layer_explored,
            total_explored: total_explored + layer_explored,
        });

        BfsTree {
            parents,
            dist_to_end: dist[end as usize],
        }
    }

    /// Walk the parent DAG from `end` back to `start` with an explicit
    /// stack of partial paths, emitting each completed path reversed.
    fn collect_paths(&self, start: u32, end: u32, parents: &[Vec<u32>]) -> Vec<Vec<u32>> {
        let mut paths = Vec::new();
        let mut stack: Vec<Vec<u32>> = vec![vec![end]];

        while let Some(mut path) = stack.pop() {
            let last = path[path.len() - 1];
            if last == start {
                path.reverse();
                paths.push(path);
                continue;
            }
            for &parent in &parents[last as usize] {
                let mut extended = path.clone();
                extended.push(parent);
                stack.push(extended);
            }
        }

        paths
    }
}

fn edge_rate(processed: u64, start: Instant, now: Instant) -> u64 {
    let seconds = now.duration_since(start).as_secs_f64();
    if seconds > 0.0 {
        (processed as f64 / seconds) as u64
    } else {
        0
    }
}
