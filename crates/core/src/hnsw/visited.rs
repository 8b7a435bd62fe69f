//! Generation-stamped visited set for graph traversal.
//!
//! Replaces `HashSet<u32>` with O(1) array indexing. Each `clear()` bumps
//! a generation counter instead of zeroing the array, so repeated searches
//! pay a full memset only once every 65534 clears. A small pool recycles
//! sets across concurrent searches.

use parking_lot::Mutex;

/// Array-backed visited set keyed by internal node index.
#[derive(Debug)]
pub struct VisitedSet {
    stamps: Vec<u16>,
    generation: u16,
}

impl VisitedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            stamps: vec![0u16; capacity],
            generation: 1,
        }
    }

    /// Resets the set. O(1) amortized.
    pub fn clear(&mut self) {
        if self.generation == u16::MAX {
            self.stamps.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    /// Grows the backing array to cover at least `cap` node indices.
    pub fn ensure_capacity(&mut self, cap: usize) {
        if cap > self.stamps.len() {
            self.stamps.resize(cap, 0);
        }
    }

    /// Marks `id` visited. Returns `true` if it was not already visited.
    #[inline]
    pub fn insert(&mut self, id: u32) -> bool {
        let slot = &mut self.stamps[id as usize];
        if *slot == self.generation {
            false
        } else {
            *slot = self.generation;
            true
        }
    }
}

/// Pool of [`VisitedSet`]s shared by concurrent searches.
///
/// Acquiring returns a cleared set sized for the current element count;
/// callers hand it back when the search finishes so the allocation is
/// reused.
#[derive(Debug, Default)]
pub struct VisitedPool {
    free: Mutex<Vec<VisitedSet>>,
}

impl VisitedPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, capacity: usize) -> VisitedSet {
        let mut set = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| VisitedSet::new(capacity));
        set.ensure_capacity(capacity);
        set.clear();
        set
    }

    pub fn release(&self, set: VisitedSet) {
        self.free.lock().push(set);
    }
}
