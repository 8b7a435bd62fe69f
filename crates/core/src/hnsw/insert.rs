//! HNSW insertion.
//!
//! A new node's vector must already be written to its claimed slot; this
//! module wires the node into the graph: greedy descent to its level,
//! per-layer beam search for candidates, diversity pruning down to `M`
//! neighbors, bidirectional linking, and re-pruning of any neighbor list
//! the backlink overfills.
//!
//! Locking: the node's own lists are written and published under its link
//! lock *before* any neighbor's lock is taken, and backlinks take exactly
//! one neighbor lock at a time, so no thread ever holds two link locks.
//! The global lock is held across the whole insert only when the node
//! enters above the current top level (it will move the entry point).

use crate::hnsw::graph::HnswGraph;
use crate::hnsw::search::{greedy_descend, search_layer, Query, QueryContext};
use crate::storage::store::VectorStore;

/// Diversity-pruning neighbor selection.
///
/// Candidates are visited in ascending distance from the base point; a
/// candidate is kept only if it is strictly closer to the base than to
/// every neighbor already kept. Ties on distance break toward the lower
/// internal index. Stops at `m` accepted or candidates exhausted; the
/// result is not padded.
pub(crate) fn select_neighbors(
    store: &VectorStore,
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });

    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
    for &(dist_to_base, candidate) in &sorted {
        if selected.len() >= m {
            break;
        }
        let diverse = selected
            .iter()
            .all(|&(_, kept)| dist_to_base < store.distance(candidate, kept));
        if diverse {
            selected.push((dist_to_base, candidate));
        }
    }
    selected
}

/// Adds `new_node` to `neighbor`'s list at `layer`, re-pruning the list
/// when the backlink overfills it.
fn link_back(
    graph: &HnswGraph,
    store: &VectorStore,
    new_node: u32,
    neighbor: u32,
    dist_between: f32,
    layer: usize,
) {
    let cap = graph.cap_at(layer);
    let _guard = graph.lock_node(neighbor);
    let links = graph.links(neighbor, layer);
    if links.len() < cap {
        graph.push_link(neighbor, layer, new_node);
        return;
    }
    // Overfull: rerun the pruning heuristic over existing + new, keyed by
    // distance to this neighbor.
    let mut candidates: Vec<(f32, u32)> = links
        .iter()
        .map(|other| (store.distance(neighbor, other), other))
        .collect();
    candidates.push((dist_between, new_node));
    let pruned = select_neighbors(store, &candidates, cap);
    let ids: Vec<u32> = pruned.iter().map(|&(_, id)| id).collect();
    graph.set_links(neighbor, layer, &ids);
}

/// Wires the already-stored vector at `slot` into the graph at `level`.
pub(crate) fn insert_node(graph: &HnswGraph, store: &VectorStore, slot: u32, level: usize) {
    graph.set_node_level(slot, level);
    if level > 0 {
        graph.ensure_upper(slot, level);
    }

    // Entering above the current top moves the entry point; hold the
    // global lock across the whole insert in that case.
    let needs_global = graph.entry_point().is_none() || level > graph.max_level();
    let _global_guard = needs_global.then(|| graph.global.lock());

    let Some(entry) = graph.entry_point() else {
        // First node: empty lists were zeroed at allocation.
        graph.set_entry(slot, level);
        return;
    };
    let top = graph.max_level();

    let ctx = QueryContext {
        store,
        query: Query::Stored(slot),
    };
    let mut visited = graph.visited.acquire(graph.capacity());

    // Phase 1: greedy descent through layers above the node's level.
    let mut ep = entry;
    if top > level {
        ep = greedy_descend(graph, ctx, entry, top, level + 1, &mut visited);
    }

    // Phases 2 and 3, per layer: beam-search candidates, prune to M,
    // publish our list, then backlink.
    for layer in (0..=level.min(top)).rev() {
        let candidates = search_layer(
            graph,
            ctx,
            &[ep],
            graph.ef_construction(),
            layer,
            &mut visited,
            None,
        );

        let selected = select_neighbors(store, &candidates, graph.m());
        let ids: Vec<u32> = selected.iter().map(|&(_, id)| id).collect();
        {
            let _own = graph.lock_node(slot);
            graph.set_links(slot, layer, &ids);
        }
        for &(dist_between, neighbor) in &selected {
            link_back(graph, store, slot, neighbor, dist_between, layer);
        }

        if let Some(&(_, nearest)) = candidates.first() {
            ep = nearest;
        }
    }
    graph.visited.release(visited);

    if level > graph.max_level() {
        graph.set_entry(slot, level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::distance::Space;
    use crate::hnsw::search::knn_search;
    use crate::labels::LabelTable;
    use crate::quantization::StorageKind;

    fn fixture(capacity: usize) -> (HnswGraph, VectorStore, LabelTable) {
        (
            HnswGraph::new(4, 50, 99, capacity),
            VectorStore::new(2, StorageKind::Float32, Space::Euclidean, capacity),
            LabelTable::new(capacity),
        )
    }

    fn add(graph: &HnswGraph, store: &VectorStore, labels: &LabelTable, v: &[f32]) -> u32 {
        let slot = graph.try_claim_slot().expect("capacity");
        let block = store.encode(v).unwrap();
        unsafe { store.write(slot, &block) };
        labels.claim(slot as u64, || Some(slot)).unwrap();
        insert_node(graph, store, slot, graph.level_for(slot as u64));
        slot
    }

    #[test]
    fn test_first_insert_becomes_entry_point() {
        let (graph, store, labels) = fixture(4);
        let slot = add(&graph, &store, &labels, &[1.0, 2.0]);
        assert_eq!(graph.entry_point(), Some(slot));
    }

    #[test]
    fn test_inserted_points_are_searchable() {
        let (graph, store, labels) = fixture(32);
        let points: Vec<[f32; 2]> = (0..20)
            .map(|i| [(i % 5) as f32, (i / 5) as f32])
            .collect();
        for p in &points {
            add(&graph, &store, &labels, p);
        }
        for (i, p) in points.iter().enumerate() {
            let found = knn_search(&graph, &store, &labels, p, 1, 50);
            assert_eq!(found[0].1 as usize, i, "self-query missed point {i}");
            assert_eq!(found[0].0, 0.0);
        }
    }

    #[test]
    fn test_degree_caps_hold() {
        let (graph, store, labels) = fixture(64);
        // A hub surrounded by many near-duplicates stresses the caps.
        for i in 0..50 {
            let angle = i as f32 * 0.13;
            add(&graph, &store, &labels, &[angle.cos(), angle.sin()]);
        }
        for node in 0..50u32 {
            let top = graph.node_level(node);
            for level in 0..=top {
                let len = graph.links(node, level).len();
                assert!(
                    len <= graph.cap_at(level),
                    "node {node} level {level} has {len} links"
                );
            }
        }
    }

    #[test]
    fn test_links_are_bidirectional_enough_for_recall() {
        let (graph, store, labels) = fixture(64);
        for i in 0..40 {
            add(&graph, &store, &labels, &[i as f32, (i * 7 % 13) as f32]);
        }
        // Nearly every node reachable via a full-width search from the
        // entry; diversity pruning may orphan the odd point at these small
        // parameters.
        let mut seen = 0;
        for i in 0..40u32 {
            let target = store.decoded(i);
            let found = knn_search(&graph, &store, &labels, &target, 1, 64);
            if found.first().map(|&(_, id)| id) == Some(i) {
                seen += 1;
            }
        }
        assert!(seen >= 36, "only {seen}/40 nodes reachable from the entry");
    }

    #[test]
    fn test_select_neighbors_prefers_diverse_directions() {
        let (_graph, store, _labels) = fixture(8);
        // Base at the origin (slot 3); two near-collinear candidates and
        // one in a distinct direction.
        for (slot, v) in [[1.0f32, 0.0], [1.1, 0.0], [0.0, 1.2], [0.0, 0.0]]
            .iter()
            .enumerate()
        {
            let block = store.encode(v).unwrap();
            unsafe { store.write(slot as u32, &block) };
        }
        let candidates = vec![
            (store.distance(3, 0), 0u32),
            (store.distance(3, 1), 1u32),
            (store.distance(3, 2), 2u32),
        ];
        let kept = select_neighbors(&store, &candidates, 4);
        let ids: Vec<u32> = kept.iter().map(|&(_, id)| id).collect();
        assert_eq!(ids, vec![0, 2], "collinear duplicate should be pruned");
    }

    #[test]
    fn test_select_neighbors_ties_break_by_index() {
        let (_, store, _) = fixture(8);
        for (slot, v) in [[5.0f32, 0.0], [0.0, 5.0]].iter().enumerate() {
            let block = store.encode(v).unwrap();
            unsafe { store.write(slot as u32, &block) };
        }
        // Equal distances to the base; only index order distinguishes them.
        let kept = select_neighbors(&store, &[(25.0, 1), (25.0, 0)], 1);
        assert_eq!(kept[0].1, 0);
    }

    #[test]
    fn test_overfull_backlink_repruned() {
        let (graph, store, labels) = fixture(64);
        // All points at distance ~1 from a central node force repeated
        // backlinks into it.
        add(&graph, &store, &labels, &[0.0, 0.0]);
        for i in 1..40 {
            let angle = i as f32 * 0.157;
            add(&graph, &store, &labels, &[angle.cos(), angle.sin()]);
        }
        let len = graph.links(0, 0).len();
        assert!(len <= graph.max_m0(), "central node overflowed: {len}");
        assert!(!graph.links(0, 0).is_empty());
    }
}
