//! HNSW search: bounded best-first layer search and multi-layer k-NN.
//!
//! The layer search keeps two heaps: a min-heap of candidates still to
//! expand and a max-heap of the best `ef` results so far. Expansion stops
//! when the nearest unexpanded candidate is farther than the worst
//! retained result. Deleted nodes are still traversed (their edges keep
//! the graph navigable) but are excluded from results.

use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use crate::hnsw::graph::HnswGraph;
use crate::hnsw::visited::VisitedSet;
use crate::labels::LabelTable;
use crate::storage::store::VectorStore;

/// What distances are measured against during a layer search.
#[derive(Clone, Copy)]
pub(crate) enum Query<'a> {
    /// A node already in the store (used during construction).
    Stored(u32),
    /// A transient caller vector, already normalized for cosine.
    Vector(&'a [f32]),
}

/// A layer search's view of the index: the query plus the store that
/// resolves distances and prefetches.
#[derive(Clone, Copy)]
pub(crate) struct QueryContext<'a> {
    pub store: &'a VectorStore,
    pub query: Query<'a>,
}

impl QueryContext<'_> {
    #[inline]
    fn distance(&self, node: u32) -> f32 {
        match self.query {
            Query::Stored(q) => self.store.distance(q, node),
            Query::Vector(v) => self.store.distance_to_query(node, v),
        }
    }

    #[inline]
    fn prefetch(&self, node: u32) {
        self.store.prefetch(node);
    }
}

/// Min-heap entry: `BinaryHeap` is a max-heap, so distances are negated.
#[derive(Debug, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance.cmp(&other.neg_distance)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Max-heap entry for the current best set.
#[derive(Debug, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.cmp(&other.distance)
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Searches one layer, returning up to `ef` nearest nodes in ascending
/// distance order.
///
/// `exclude_deleted` filters results (never navigation) against the
/// deleted set.
pub(crate) fn search_layer(
    graph: &HnswGraph,
    ctx: QueryContext<'_>,
    entry_points: &[u32],
    ef: usize,
    level: usize,
    visited: &mut VisitedSet,
    exclude_deleted: Option<&LabelTable>,
) -> Vec<(f32, u32)> {
    visited.clear();
    let keep = |id: u32| match exclude_deleted {
        Some(labels) => !labels.is_deleted(id),
        None => true,
    };

    // Capacity hints only; an oversized ef must not drive allocation
    // beyond what the graph can actually yield.
    let hint = ef.min(graph.count().max(1));
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(hint * 2);
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(hint + 1);
    // Cached worst retained distance; avoids a heap peek per neighbor.
    let mut worst = f32::MAX;

    for &ep in entry_points {
        if !visited.insert(ep) {
            continue;
        }
        let dist = ctx.distance(ep);
        candidates.push(Candidate {
            neg_distance: OrderedFloat(-dist),
            id: ep,
        });
        if keep(ep) {
            results.push(ResultEntry {
                distance: OrderedFloat(dist),
                id: ep,
            });
            if results.len() >= ef {
                worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
            }
        }
    }

    while let Some(candidate) = candidates.pop() {
        let c_dist = -candidate.neg_distance.0;
        if results.len() >= ef && c_dist > worst {
            break;
        }

        let links = graph.links(candidate.id, level);
        for i in 0..links.len() {
            let neighbor = links.get(i);
            if i + 1 < links.len() {
                ctx.prefetch(links.get(i + 1));
            }
            if !visited.insert(neighbor) {
                continue;
            }

            let dist = ctx.distance(neighbor);
            if results.len() < ef || dist < worst {
                candidates.push(Candidate {
                    neg_distance: OrderedFloat(-dist),
                    id: neighbor,
                });
                if keep(neighbor) {
                    results.push(ResultEntry {
                        distance: OrderedFloat(dist),
                        id: neighbor,
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                    worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.distance.0, r.id))
        .collect()
}

/// Greedy descent from `start` through `(from_level ..= to_level)`,
/// returning the entry point for the layer below `to_level`.
pub(crate) fn greedy_descend(
    graph: &HnswGraph,
    ctx: QueryContext<'_>,
    mut current: u32,
    from_level: usize,
    to_level: usize,
    visited: &mut VisitedSet,
) -> u32 {
    let mut level = from_level;
    loop {
        if level < to_level || level == 0 {
            break;
        }
        let found = search_layer(graph, ctx, &[current], 1, level, visited, None);
        if let Some(&(_, nearest)) = found.first() {
            current = nearest;
        }
        if level == to_level {
            break;
        }
        level -= 1;
    }
    current
}

/// Multi-layer k-NN: descend to layer 1 greedily, then beam-search layer 0
/// with width `ef`, returning up to `k` live nodes in ascending order.
pub(crate) fn knn_search(
    graph: &HnswGraph,
    store: &VectorStore,
    labels: &LabelTable,
    query: &[f32],
    k: usize,
    ef: usize,
) -> Vec<(f32, u32)> {
    let Some(entry) = graph.entry_point() else {
        return Vec::new();
    };
    let max_level = graph.max_level();
    let ctx = QueryContext {
        store,
        query: Query::Vector(query),
    };

    let mut visited = graph.visited.acquire(graph.capacity());
    let ep = if max_level > 0 {
        greedy_descend(graph, ctx, entry, max_level, 1, &mut visited)
    } else {
        entry
    };

    let mut results = search_layer(graph, ctx, &[ep], ef, 0, &mut visited, Some(labels));
    graph.visited.release(visited);

    results.truncate(k);
    results
}
