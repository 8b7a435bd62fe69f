//! HNSW graph structure.
//!
//! Adjacency lives in preallocated word slabs rather than per-node `Vec`s:
//! level 0 is a single arena of `1 + M_max0` atomic words per node (a
//! count header followed by padded neighbor indices), and levels >= 1 are
//! a per-node block of `(1 + M_max) * level` words allocated when the node
//! is inserted. A node's list at any level therefore sits at a fixed
//! offset, which is what lets the serializer write slabs verbatim.
//!
//! Lists are published by storing entry words first and the count header
//! last with release ordering; readers load the count with acquire
//! ordering and never observe a torn list. One `parking_lot::Mutex<()>`
//! per node (a single byte) serializes writers of that node's lists.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config;
use crate::hnsw::visited::VisitedPool;

/// Sentinel for "no entry point".
pub const NO_ENTRY: u32 = u32::MAX;

/// Mixing constant for the per-insertion level PRNG seed (splitmix64).
const SEED_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// A borrowed neighbor list: `len` valid indices.
#[derive(Clone, Copy)]
pub struct Links<'a> {
    words: &'a [AtomicU32],
    len: usize,
}

impl<'a> Links<'a> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, i: usize) -> u32 {
        self.words[i].load(Ordering::Relaxed)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + 'a {
        let words = self.words;
        (0..self.len).map(move |i| words[i].load(Ordering::Relaxed))
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }
}

/// Multi-layer adjacency plus the construction parameters.
#[derive(Debug)]
pub struct HnswGraph {
    m: usize,
    max_m: usize,
    max_m0: usize,
    ef_construction: usize,
    mult: f64,
    seed: u64,

    capacity: usize,
    count: AtomicU32,
    entry_point: AtomicU32,
    max_level: AtomicU32,

    /// Level-0 arena: `1 + max_m0` words per node.
    level0: Vec<AtomicU32>,
    /// Upper-level blocks: `(1 + max_m) * level` words, set at insert.
    upper: Vec<OnceLock<Box<[AtomicU32]>>>,
    levels: Vec<AtomicU32>,
    link_locks: Vec<Mutex<()>>,

    /// Serializes entry-point / max-level transitions.
    pub(crate) global: Mutex<()>,
    pub(crate) visited: VisitedPool,
}

fn atomic_words(n: usize) -> Vec<AtomicU32> {
    let mut v = Vec::with_capacity(n);
    v.resize_with(n, || AtomicU32::new(0));
    v
}

impl HnswGraph {
    pub fn new(m: usize, ef_construction: usize, seed: u64, capacity: usize) -> Self {
        let m = if m > config::MAX_M {
            tracing::warn!("M = {m} exceeds {}; capping", config::MAX_M);
            config::MAX_M
        } else {
            m.max(2)
        };
        let max_m = m;
        let max_m0 = m * 2;
        let ef_construction = ef_construction.max(m);
        let mut upper = Vec::with_capacity(capacity);
        upper.resize_with(capacity, OnceLock::new);
        let mut link_locks = Vec::with_capacity(capacity);
        link_locks.resize_with(capacity, || Mutex::new(()));
        Self {
            m,
            max_m,
            max_m0,
            ef_construction,
            mult: 1.0 / (m as f64).ln(),
            seed,
            capacity,
            count: AtomicU32::new(0),
            entry_point: AtomicU32::new(NO_ENTRY),
            max_level: AtomicU32::new(0),
            level0: atomic_words(capacity * (1 + max_m0)),
            upper,
            levels: atomic_words(capacity),
            link_locks,
            global: Mutex::new(()),
            visited: VisitedPool::new(),
        }
    }

    #[inline]
    pub fn m(&self) -> usize {
        self.m
    }

    #[inline]
    pub fn max_m(&self) -> usize {
        self.max_m
    }

    #[inline]
    pub fn max_m0(&self) -> usize {
        self.max_m0
    }

    #[inline]
    pub fn ef_construction(&self) -> usize {
        self.ef_construction
    }

    #[inline]
    pub fn mult(&self) -> f64 {
        self.mult
    }

    /// Overrides the level multiplier (used when loading a stream that
    /// recorded a different value).
    pub(crate) fn set_mult(&mut self, mult: f64) {
        self.mult = mult;
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of claimed slots (inserted or mid-insertion).
    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire) as usize
    }

    #[inline]
    pub fn entry_point(&self) -> Option<u32> {
        match self.entry_point.load(Ordering::Acquire) {
            NO_ENTRY => None,
            ep => Some(ep),
        }
    }

    #[inline]
    pub fn max_level(&self) -> usize {
        self.max_level.load(Ordering::Acquire) as usize
    }

    /// Degree cap at `level`.
    #[inline]
    pub fn cap_at(&self, level: usize) -> usize {
        if level == 0 {
            self.max_m0
        } else {
            self.max_m
        }
    }

    /// Claims the next free slot, if any.
    pub fn try_claim_slot(&self) -> Option<u32> {
        let mut cur = self.count.load(Ordering::Acquire);
        loop {
            if cur as usize >= self.capacity {
                return None;
            }
            match self.count.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(cur),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Samples the level for the `counter`-th insertion.
    ///
    /// The PRNG is re-seeded from `(seed, counter)` so the assignment is
    /// deterministic regardless of how concurrent inserts interleave.
    pub fn level_for(&self, counter: u64) -> usize {
        let mut rng =
            StdRng::seed_from_u64(self.seed ^ counter.wrapping_add(1).wrapping_mul(SEED_MIX));
        let mut u: f64 = rng.gen();
        if u <= 0.0 {
            u = f64::MIN_POSITIVE;
        }
        (-u.ln() * self.mult) as usize
    }

    #[inline]
    pub fn node_level(&self, node: u32) -> usize {
        self.levels[node as usize].load(Ordering::Acquire) as usize
    }

    pub(crate) fn set_node_level(&self, node: u32, level: usize) {
        self.levels[node as usize].store(level as u32, Ordering::Release);
    }

    /// Allocates the upper-level block for a node being inserted at
    /// `level` (> 0). Idempotent.
    pub(crate) fn ensure_upper(&self, node: u32, level: usize) {
        debug_assert!(level > 0);
        let words = (1 + self.max_m) * level;
        self.upper[node as usize].get_or_init(|| atomic_words(words).into_boxed_slice());
    }

    #[inline]
    fn block(&self, node: u32, level: usize) -> &[AtomicU32] {
        if level == 0 {
            let words = 1 + self.max_m0;
            let start = node as usize * words;
            &self.level0[start..start + words]
        } else {
            let raw = self.upper[node as usize]
                .get()
                .expect("upper links read before allocation");
            let words = 1 + self.max_m;
            let start = (level - 1) * words;
            &raw[start..start + words]
        }
    }

    /// The neighbor list of `node` at `level`.
    #[inline]
    pub fn links(&self, node: u32, level: usize) -> Links<'_> {
        let block = self.block(node, level);
        let len = (block[0].load(Ordering::Acquire) as usize).min(self.cap_at(level));
        Links {
            words: &block[1..],
            len,
        }
    }

    /// Replaces the neighbor list of `node` at `level`.
    ///
    /// Entry words land before the count header (release), so lock-free
    /// readers always see a consistent prefix. Callers hold the node's
    /// link lock.
    pub(crate) fn set_links(&self, node: u32, level: usize, neighbors: &[u32]) {
        debug_assert!(neighbors.len() <= self.cap_at(level));
        let block = self.block(node, level);
        for (word, &id) in block[1..].iter().zip(neighbors) {
            word.store(id, Ordering::Relaxed);
        }
        block[0].store(neighbors.len() as u32, Ordering::Release);
    }

    /// Appends one neighbor to `node`'s list at `level`. Caller holds the
    /// node's link lock and has checked the list is not full.
    pub(crate) fn push_link(&self, node: u32, level: usize, neighbor: u32) {
        let block = self.block(node, level);
        let len = block[0].load(Ordering::Relaxed) as usize;
        debug_assert!(len < self.cap_at(level));
        block[1 + len].store(neighbor, Ordering::Relaxed);
        block[0].store(len as u32 + 1, Ordering::Release);
    }

    #[inline]
    pub(crate) fn lock_node(&self, node: u32) -> parking_lot::MutexGuard<'_, ()> {
        self.link_locks[node as usize].lock()
    }

    /// Publishes `node` as the entry point with the given top level.
    /// Caller holds the global lock.
    pub(crate) fn set_entry(&self, node: u32, level: usize) {
        self.max_level.store(level as u32, Ordering::Release);
        self.entry_point.store(node, Ordering::Release);
    }

    /// Restores counters when loading. Caller has exclusive access.
    pub(crate) fn set_state(&mut self, count: usize, entry: u32, max_level: usize) {
        self.count.store(count as u32, Ordering::Release);
        self.entry_point.store(entry, Ordering::Release);
        self.max_level.store(max_level as u32, Ordering::Release);
    }

    /// Installs a loaded upper-level block for a node.
    pub(crate) fn install_upper(&mut self, node: u32, words: Vec<u32>) {
        let mut atoms = Vec::with_capacity(words.len());
        for w in words {
            atoms.push(AtomicU32::new(w));
        }
        // OnceLock is empty for a freshly constructed graph.
        let _ = self.upper[node as usize].set(atoms.into_boxed_slice());
    }

    /// Grows every per-node structure to `capacity`. Caller holds the
    /// structural lock exclusively.
    pub fn grow(&mut self, capacity: usize) {
        if capacity <= self.capacity {
            return;
        }
        let words = 1 + self.max_m0;
        let mut level0 = atomic_words(capacity * words);
        for (dst, src) in level0.iter_mut().zip(self.level0.iter()) {
            *dst.get_mut() = src.load(Ordering::Relaxed);
        }
        self.level0 = level0;
        self.upper.resize_with(capacity, OnceLock::new);
        let mut levels = atomic_words(capacity);
        for (dst, src) in levels.iter_mut().zip(self.levels.iter()) {
            *dst.get_mut() = src.load(Ordering::Relaxed);
        }
        self.levels = levels;
        self.link_locks.resize_with(capacity, || Mutex::new(()));
        self.capacity = capacity;
        tracing::debug!("graph capacity grown to {capacity}");
    }
}
