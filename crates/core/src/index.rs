//! Public index facade.
//!
//! [`Index`] ties the pieces together: the typed vector store, the HNSW
//! graph, and the label table, all behind one structural reader-writer
//! lock. Queries, single inserts, and batch workers hold it shared;
//! capacity growth, explicit resizes, and (de)serialization hold it
//! exclusively. Batch calls fan work out on an index-owned rayon pool and
//! surface the first worker error.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::errors::{Error, Result};
use crate::hnsw::distance::Space;
use crate::hnsw::graph::HnswGraph;
use crate::hnsw::insert::insert_node;
use crate::hnsw::search::knn_search;
use crate::labels::{Claim, LabelTable};
use crate::quantization::StorageKind;
use crate::storage::persistence::{self, LoadParams, LoadedIndex};
use crate::storage::store::{normalized, VectorStore};

/// Construction-time tuning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexOptions {
    /// Target out-degree per node at levels >= 1 (`M_max0` is `2 * M`).
    pub m: usize,
    /// Beam width while building the graph.
    pub ef_construction: usize,
    /// Seed for the deterministic level-sampling PRNG.
    pub random_seed: u64,
    /// Initial element capacity; the index doubles it on demand.
    pub initial_capacity: usize,
    /// Per-scalar storage encoding.
    pub storage: StorageKind,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            m: config::DEFAULT_M,
            ef_construction: config::DEFAULT_EF_CONSTRUCTION,
            random_seed: config::DEFAULT_RANDOM_SEED,
            initial_capacity: config::DEFAULT_INITIAL_CAPACITY,
            storage: StorageKind::Float32,
        }
    }
}

/// One search hit: the caller's label and its distance from the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub label: u64,
    pub distance: f32,
}

/// Everything guarded by the structural lock.
pub(crate) struct IndexCore {
    pub(crate) graph: HnswGraph,
    pub(crate) store: VectorStore,
    pub(crate) labels: LabelTable,
}

impl IndexCore {
    fn grow(&mut self, capacity: usize) {
        self.graph.grow(capacity);
        self.store.grow(capacity);
        self.labels.grow(capacity);
    }
}

/// An in-memory approximate-nearest-neighbor index.
pub struct Index {
    core: RwLock<IndexCore>,
    space: Space,
    num_dimensions: usize,
    storage: StorageKind,
    default_ef: AtomicUsize,
    num_threads: AtomicUsize,
    next_label: AtomicU64,
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("space", &self.space)
            .field("num_dimensions", &self.num_dimensions)
            .field("storage", &self.storage)
            .field("elements", &self.element_count())
            .finish_non_exhaustive()
    }
}

fn build_pool(threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| Error::Internal(format!("failed to start worker pool: {e}")))
}

fn hardware_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Index {
    /// Creates an empty index over `num_dimensions`-dimensional vectors.
    pub fn new(space: Space, num_dimensions: usize, options: IndexOptions) -> Result<Self> {
        if num_dimensions == 0 || num_dimensions > config::MAX_DIMENSIONS {
            return Err(Error::InvalidParameter(format!(
                "num_dimensions must be in [1, {}], got {num_dimensions}",
                config::MAX_DIMENSIONS
            )));
        }
        let capacity = options.initial_capacity.clamp(1, config::MAX_ELEMENTS);
        let core = IndexCore {
            graph: HnswGraph::new(
                options.m,
                options.ef_construction,
                options.random_seed,
                capacity,
            ),
            store: VectorStore::new(num_dimensions, options.storage, space, capacity),
            labels: LabelTable::new(capacity),
        };
        let threads = hardware_threads();
        Ok(Self {
            core: RwLock::new(core),
            space,
            num_dimensions,
            storage: options.storage,
            default_ef: AtomicUsize::new(config::DEFAULT_EF_SEARCH),
            num_threads: AtomicUsize::new(threads),
            next_label: AtomicU64::new(0),
            pool: build_pool(threads)?,
        })
    }

    fn from_loaded(loaded: LoadedIndex) -> Result<Self> {
        let next_label = loaded.core.labels.max_label().map_or(0, |l| l.saturating_add(1));
        let threads = hardware_threads();
        Ok(Self {
            space: loaded.space,
            num_dimensions: loaded.num_dimensions,
            storage: loaded.storage,
            core: RwLock::new(loaded.core),
            default_ef: AtomicUsize::new(config::DEFAULT_EF_SEARCH),
            num_threads: AtomicUsize::new(threads),
            next_label: AtomicU64::new(next_label),
            pool: build_pool(threads)?,
        })
    }

    // ── Introspection ───────────────────────────────────────────────────

    pub fn space(&self) -> Space {
        self.space
    }

    pub fn num_dimensions(&self) -> usize {
        self.num_dimensions
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.storage
    }

    pub fn m(&self) -> usize {
        self.core.read().graph.m()
    }

    pub fn ef_construction(&self) -> usize {
        self.core.read().graph.ef_construction()
    }

    /// Number of live (non-deleted) elements.
    pub fn len(&self) -> usize {
        self.core.read().labels.live_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of occupied slots, deleted nodes included.
    pub fn element_count(&self) -> usize {
        self.core.read().graph.count()
    }

    pub fn deleted_count(&self) -> usize {
        self.core.read().labels.deleted_count()
    }

    /// Current element capacity.
    pub fn max_elements(&self) -> usize {
        self.core.read().graph.capacity()
    }

    /// All live labels, in unspecified order.
    pub fn ids(&self) -> Vec<u64> {
        self.core.read().labels.ids()
    }

    pub fn contains(&self, label: u64) -> bool {
        self.core.read().labels.get_live(label).is_ok()
    }

    /// Default search beam width.
    pub fn ef(&self) -> usize {
        self.default_ef.load(Ordering::Acquire)
    }

    pub fn set_ef(&self, ef: usize) {
        self.default_ef.store(ef.max(1), Ordering::Release);
    }

    /// Default worker-thread count for batch calls.
    pub fn num_threads(&self) -> usize {
        self.num_threads.load(Ordering::Acquire)
    }

    pub fn set_num_threads(&self, threads: usize) {
        self.num_threads.store(threads.max(1), Ordering::Release);
    }

    // ── Insertion ───────────────────────────────────────────────────────

    /// Inserts one vector, returning its label.
    ///
    /// Omitted labels come from a monotonic counter. Re-inserting a label
    /// that was marked deleted overwrites the stored vector in place
    /// without re-linking the graph; inserting a live label is an error.
    pub fn add_item(&self, vector: &[f32], id: Option<u64>) -> Result<u64> {
        let label = match id {
            Some(label) => {
                self.next_label.fetch_max(label.saturating_add(1), Ordering::AcqRel);
                label
            }
            None => self.next_label.fetch_add(1, Ordering::AcqRel),
        };
        self.insert_with_retry(vector, label)
    }

    /// Inserts a batch, dispatching rows across worker threads.
    ///
    /// Returned labels correspond positionally to the input. The first
    /// worker error (in input order) is propagated. Small batches run on
    /// the calling thread; thread startup would dominate them.
    pub fn add_items<V>(
        &self,
        vectors: &[V],
        ids: Option<&[u64]>,
        threads: Option<usize>,
    ) -> Result<Vec<u64>>
    where
        V: AsRef<[f32]> + Sync,
    {
        if let Some(ids) = ids {
            if ids.len() != vectors.len() {
                return Err(Error::InvalidParameter(format!(
                    "{} ids provided for {} vectors",
                    ids.len(),
                    vectors.len()
                )));
            }
            if let Some(&max) = ids.iter().max() {
                self.next_label.fetch_max(max.saturating_add(1), Ordering::AcqRel);
            }
        }
        let rows = vectors.len();
        if rows == 0 {
            return Ok(Vec::new());
        }

        // Reserve capacity for the whole batch up front so workers under
        // the shared lock never need to grow the slabs.
        let needed = self.core.read().graph.count() + rows;
        self.reserve(needed)?;

        let base = match ids {
            Some(_) => 0,
            None => self.next_label.fetch_add(rows as u64, Ordering::AcqRel),
        };
        let label_for = |row: usize| match ids {
            Some(ids) => ids[row],
            None => base + row as u64,
        };

        let threads = threads.unwrap_or_else(|| self.num_threads()).max(1);
        if threads == 1 || rows <= config::SMALL_BATCH_FACTOR * threads {
            let mut labels = Vec::with_capacity(rows);
            for (row, vector) in vectors.iter().enumerate() {
                labels.push(self.insert_with_retry(vector.as_ref(), label_for(row))?);
            }
            return Ok(labels);
        }

        let results: Vec<Result<u64>> = self.install(threads, || {
            vectors
                .par_iter()
                .enumerate()
                .map(|(row, vector)| self.insert_with_retry(vector.as_ref(), label_for(row)))
                .collect()
        })?;
        results.into_iter().collect()
    }

    fn insert_with_retry(&self, vector: &[f32], label: u64) -> Result<u64> {
        if vector.len() != self.num_dimensions {
            return Err(Error::DimensionMismatch {
                expected: self.num_dimensions,
                got: vector.len(),
            });
        }
        loop {
            {
                let core = self.core.read();
                match Self::insert_under(&core, vector, label) {
                    // Another insert took the last slot; grow and retry.
                    Err(Error::CapacityExhausted) => {}
                    other => return other,
                }
            }
            let needed = self.core.read().graph.count() + 1;
            self.reserve(needed)?;
        }
    }

    fn insert_under(core: &IndexCore, vector: &[f32], label: u64) -> Result<u64> {
        let block = core.store.encode(vector)?;
        let claim = core.labels.claim(label, || core.graph.try_claim_slot())?;
        match claim {
            Claim::New(slot) => {
                // Safety: the slot was just claimed and is unpublished.
                unsafe { core.store.write(slot, &block) };
                let level = core.graph.level_for(slot as u64);
                insert_node(&core.graph, &core.store, slot, level);
            }
            Claim::Replace(slot) => {
                // Deleted label re-inserted: overwrite storage in place,
                // keep the node's links.
                let _guard = core.graph.lock_node(slot);
                unsafe { core.store.write(slot, &block) };
            }
        }
        Ok(label)
    }

    /// Grows capacity to hold at least `needed` elements.
    fn reserve(&self, needed: usize) -> Result<()> {
        if needed > config::MAX_ELEMENTS {
            return Err(Error::CapacityExhausted);
        }
        if self.core.read().graph.capacity() >= needed {
            return Ok(());
        }
        let mut core = self.core.write();
        let current = core.graph.capacity();
        if current < needed {
            let mut target = current.max(1);
            while target < needed {
                target = target
                    .saturating_mul(config::CAPACITY_GROWTH_FACTOR)
                    .min(config::MAX_ELEMENTS);
            }
            tracing::debug!("growing index capacity {current} -> {target}");
            core.grow(target);
        }
        Ok(())
    }

    /// Grows capacity explicitly. Capacity never shrinks; a target below
    /// the current element count is an error.
    pub fn resize(&self, max_elements: usize) -> Result<()> {
        let mut core = self.core.write();
        if max_elements < core.graph.count() {
            return Err(Error::InvalidParameter(format!(
                "cannot resize to {max_elements}: {} elements are stored",
                core.graph.count()
            )));
        }
        if max_elements > config::MAX_ELEMENTS {
            return Err(Error::InvalidParameter(format!(
                "max_elements cannot exceed {}",
                config::MAX_ELEMENTS
            )));
        }
        core.grow(max_elements);
        Ok(())
    }

    // ── Deletion ────────────────────────────────────────────────────────

    /// Marks a label deleted. The node's storage and links survive; it is
    /// filtered from results until re-inserted or unmarked.
    pub fn mark_deleted(&self, label: u64) -> Result<()> {
        let core = self.core.read();
        core.labels.mark_deleted(label)?;
        Ok(())
    }

    /// Reverses [`Index::mark_deleted`].
    pub fn unmark_deleted(&self, label: u64) -> Result<()> {
        let core = self.core.read();
        core.labels.unmark_deleted(label)?;
        Ok(())
    }

    // ── Lookup ──────────────────────────────────────────────────────────

    /// The stored vector for a live label, decoded back to `f32`s. For
    /// cosine indexes this is the original direction scaled by the stored
    /// pre-normalization norm.
    pub fn get_vector(&self, label: u64) -> Result<Vec<f32>> {
        let core = self.core.read();
        let slot = core.labels.get_live(label)?;
        Ok(core.store.decoded(slot))
    }

    /// [`Index::get_vector`] for a batch of labels.
    pub fn get_vectors(&self, labels: &[u64]) -> Result<Vec<Vec<f32>>> {
        let core = self.core.read();
        labels
            .iter()
            .map(|&label| {
                let slot = core.labels.get_live(label)?;
                Ok(core.store.decoded(slot))
            })
            .collect()
    }

    /// Metric distance between two caller vectors, through the index's
    /// storage encoding (so quantization is reflected).
    pub fn get_distance(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        self.core.read().store.distance_between(a, b)
    }

    // ── Search ──────────────────────────────────────────────────────────

    /// Finds the `k` nearest live labels to `vector`.
    ///
    /// `ef` overrides the default beam width and must be at least `k`.
    /// Fewer than `k` results may come back if deletions have thinned the
    /// reachable set; the result is never padded.
    pub fn query(&self, vector: &[f32], k: usize, ef: Option<usize>) -> Result<Vec<Neighbor>> {
        let core = self.core.read();
        self.query_under(&core, vector, k, ef)
    }

    /// [`Index::query`] for a batch, dispatched across worker threads.
    pub fn query_batch<V>(
        &self,
        queries: &[V],
        k: usize,
        threads: Option<usize>,
        ef: Option<usize>,
    ) -> Result<Vec<Vec<Neighbor>>>
    where
        V: AsRef<[f32]> + Sync,
    {
        let rows = queries.len();
        let threads = threads.unwrap_or_else(|| self.num_threads()).max(1);
        if threads == 1 || rows <= config::SMALL_BATCH_FACTOR * threads {
            let core = self.core.read();
            return queries
                .iter()
                .map(|q| self.query_under(&core, q.as_ref(), k, ef))
                .collect();
        }
        let results: Vec<Result<Vec<Neighbor>>> = self.install(threads, || {
            queries
                .par_iter()
                .map(|q| {
                    let core = self.core.read();
                    self.query_under(&core, q.as_ref(), k, ef)
                })
                .collect()
        })?;
        results.into_iter().collect()
    }

    fn query_under(
        &self,
        core: &IndexCore,
        vector: &[f32],
        k: usize,
        ef: Option<usize>,
    ) -> Result<Vec<Neighbor>> {
        if vector.len() != self.num_dimensions {
            return Err(Error::DimensionMismatch {
                expected: self.num_dimensions,
                got: vector.len(),
            });
        }
        let live = core.labels.live_count();
        if k > live {
            return Err(Error::InvalidParameter(format!(
                "k ({k}) exceeds the number of live elements ({live})"
            )));
        }
        let ef = match ef {
            Some(ef) if ef < k => {
                return Err(Error::InvalidParameter(format!(
                    "ef ({ef}) must be at least k ({k})"
                )));
            }
            Some(ef) => ef,
            None => self.ef().max(k),
        };

        let hits = if self.space.normalizes() {
            let (unit, _) = normalized(vector);
            knn_search(&core.graph, &core.store, &core.labels, &unit, k, ef)
        } else {
            knn_search(&core.graph, &core.store, &core.labels, vector, k, ef)
        };

        hits.into_iter()
            .map(|(distance, slot)| {
                let label = core.labels.label_of(slot);
                Ok(Neighbor {
                    label,
                    distance: self.finalize_distance(distance, label)?,
                })
            })
            .collect()
    }

    /// Clamps the floating-point noise a cosine self-query can produce.
    /// Distances more negative than the storage kind's quantization could
    /// explain indicate a corrupted index.
    fn finalize_distance(&self, distance: f32, label: u64) -> Result<f32> {
        if self.space != Space::Cosine || distance >= 0.0 {
            return Ok(distance);
        }
        let slack = match self.storage {
            StorageKind::Float32 => config::NEGATIVE_DISTANCE_SLACK,
            StorageKind::Float8 => config::NEGATIVE_DISTANCE_SLACK_F8,
            StorageKind::E4M3 => config::NEGATIVE_DISTANCE_SLACK_E4M3,
        };
        if distance >= -slack {
            Ok(0.0)
        } else {
            Err(Error::Internal(format!(
                "candidate with label {label} had negative distance {distance}; \
                 the index may be corrupted"
            )))
        }
    }

    fn install<T: Send>(&self, threads: usize, job: impl FnOnce() -> T + Send) -> Result<T> {
        if threads == self.pool.current_num_threads() {
            Ok(self.pool.install(job))
        } else {
            Ok(build_pool(threads)?.install(job))
        }
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Writes the index to `writer` in the V1 binary format. Takes the
    /// structural lock exclusively; the stream reflects a quiescent index.
    pub fn save_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let core = self.core.write();
        persistence::save_index(&core, writer)
    }

    /// Saves atomically to `path` (temp file + rename).
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp)?;
        self.save_to(&mut file)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Loads a V1 stream. Headerless legacy streams need
    /// [`Index::load_with_params`].
    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        Self::from_loaded(persistence::load_index(reader, None)?)
    }

    /// Loads a V1 or legacy stream. For V1 the supplied parameters must
    /// match the stream's header; a mismatch is an error naming both.
    pub fn load_with_params<R: Read>(reader: &mut R, params: LoadParams) -> Result<Self> {
        Self::from_loaded(persistence::load_index(reader, Some(params))?)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load(&mut std::fs::File::open(path)?)
    }

    pub fn load_from_file_with_params<P: AsRef<Path>>(
        path: P,
        params: LoadParams,
    ) -> Result<Self> {
        Self::load_with_params(&mut std::fs::File::open(path)?, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn euclidean(dim: usize) -> Index {
        Index::new(Space::Euclidean, dim, IndexOptions::default()).unwrap()
    }

    #[test]
    fn test_add_and_query_roundtrip() {
        let index = euclidean(3);
        index.add_item(&[1.0, 0.0, 0.0], None).unwrap();
        index.add_item(&[0.0, 1.0, 0.0], None).unwrap();
        let hits = index.query(&[0.9, 0.1, 0.0], 1, None).unwrap();
        assert_eq!(hits[0].label, 0);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_labels_default_to_insertion_counter() {
        let index = euclidean(2);
        assert_eq!(index.add_item(&[0.0, 0.0], None).unwrap(), 0);
        assert_eq!(index.add_item(&[1.0, 0.0], None).unwrap(), 1);
        // Explicit ids push the counter forward.
        assert_eq!(index.add_item(&[2.0, 0.0], Some(10)).unwrap(), 10);
        assert_eq!(index.add_item(&[3.0, 0.0], None).unwrap(), 11);
    }

    #[test]
    fn test_duplicate_live_label_rejected() {
        let index = euclidean(2);
        index.add_item(&[0.0, 0.0], Some(5)).unwrap();
        match index.add_item(&[1.0, 1.0], Some(5)) {
            Err(Error::DuplicateLabel(5)) => {}
            other => panic!("expected DuplicateLabel, got {other:?}"),
        }
    }

    #[test]
    fn test_dimension_mismatch_on_add_and_query() {
        let index = euclidean(3);
        assert!(matches!(
            index.add_item(&[1.0], None),
            Err(Error::DimensionMismatch { expected: 3, got: 1 })
        ));
        index.add_item(&[0.0, 0.0, 0.0], None).unwrap();
        assert!(matches!(
            index.query(&[1.0, 2.0], 1, None),
            Err(Error::DimensionMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_k_greater_than_len_rejected() {
        let index = euclidean(2);
        index.add_item(&[0.0, 0.0], None).unwrap();
        assert!(index.query(&[0.0, 0.0], 2, None).is_err());
    }

    #[test]
    fn test_ef_must_cover_k() {
        let index = euclidean(2);
        for i in 0..5 {
            index.add_item(&[i as f32, 0.0], None).unwrap();
        }
        assert!(index.query(&[0.0, 0.0], 3, Some(2)).is_err());
        assert_eq!(index.query(&[0.0, 0.0], 3, Some(3)).unwrap().len(), 3);
    }

    #[test]
    fn test_capacity_doubles_transparently() {
        let index = Index::new(
            Space::Euclidean,
            2,
            IndexOptions {
                initial_capacity: 1,
                ..IndexOptions::default()
            },
        )
        .unwrap();
        for i in 0..70 {
            index.add_item(&[i as f32, 1.0], None).unwrap();
        }
        assert_eq!(index.len(), 70);
        assert!(index.max_elements() >= 70);
    }

    #[test]
    fn test_delete_then_replace_keeps_slot() {
        let index = euclidean(2);
        index.add_item(&[1.0, 1.0], Some(3)).unwrap();
        index.add_item(&[5.0, 5.0], Some(4)).unwrap();
        index.mark_deleted(3).unwrap();
        assert!(!index.contains(3));
        assert_eq!(index.len(), 1);
        assert!(index.get_vector(3).is_err());

        index.add_item(&[2.0, 2.0], Some(3)).unwrap();
        assert!(index.contains(3));
        assert_eq!(index.element_count(), 2, "slot must be reused");
        assert_eq!(index.get_vector(3).unwrap(), vec![2.0, 2.0]);
    }

    #[test]
    fn test_unmark_deleted_restores() {
        let index = euclidean(2);
        index.add_item(&[1.0, 1.0], Some(9)).unwrap();
        index.mark_deleted(9).unwrap();
        index.unmark_deleted(9).unwrap();
        assert!(index.contains(9));
        assert!(matches!(index.unmark_deleted(9), Err(Error::LabelNotFound(9))));
    }

    #[test]
    fn test_batch_insert_positional_labels() {
        let index = euclidean(2);
        let vectors: Vec<[f32; 2]> = (0..10).map(|i| [i as f32, 0.0]).collect();
        let ids: Vec<u64> = (100..110).collect();
        let labels = index.add_items(&vectors, Some(&ids), Some(2)).unwrap();
        assert_eq!(labels, ids);
        assert_eq!(index.len(), 10);
    }

    #[test]
    fn test_batch_id_length_mismatch() {
        let index = euclidean(2);
        let vectors = vec![[0.0f32, 0.0], [1.0, 1.0]];
        assert!(index.add_items(&vectors, Some(&[1u64][..]), None).is_err());
    }

    #[test]
    fn test_query_batch_matches_single() {
        let index = euclidean(2);
        let vectors: Vec<[f32; 2]> = (0..30).map(|i| [(i % 6) as f32, (i / 6) as f32]).collect();
        index.add_items(&vectors, None, None).unwrap();
        let queries: Vec<[f32; 2]> = vec![[0.1, 0.1], [4.9, 3.9], [2.0, 2.0]];
        let batched = index.query_batch(&queries, 3, Some(2), Some(20)).unwrap();
        for (q, batch_hits) in queries.iter().zip(&batched) {
            let single = index.query(q, 3, Some(20)).unwrap();
            assert_eq!(&single, batch_hits);
        }
    }

    #[test]
    fn test_get_distance_reflects_metric() {
        let index = euclidean(3);
        let d = index.get_distance(&[0.0, 3.0, 0.0], &[4.0, 0.0, 0.0]).unwrap();
        assert_eq!(d, 25.0);

        let ip = Index::new(Space::InnerProduct, 2, IndexOptions::default()).unwrap();
        assert_eq!(ip.get_distance(&[2.0, 1.0], &[3.0, 4.0]).unwrap(), -9.0);
    }

    #[test]
    fn test_cosine_get_vector_restores_magnitude() {
        let index = Index::new(Space::Cosine, 3, IndexOptions::default()).unwrap();
        index.add_item(&[0.0, 3.0, 4.0], Some(1)).unwrap();
        let restored = index.get_vector(1).unwrap();
        for (got, want) in restored.iter().zip([0.0, 3.0, 4.0]) {
            assert!((got - want).abs() < 1e-4, "restored {restored:?}");
        }
    }

    #[test]
    fn test_ids_unique_per_live_label() {
        let index = euclidean(2);
        for i in 0..20 {
            index.add_item(&[i as f32, 0.0], None).unwrap();
        }
        index.mark_deleted(7).unwrap();
        let mut ids = index.ids();
        ids.sort_unstable();
        let mut deduped = ids.clone();
        deduped.dedup();
        assert_eq!(ids, deduped, "ids must be unique");
        assert_eq!(ids.len(), 19);
        assert!(!ids.contains(&7));
    }
}
