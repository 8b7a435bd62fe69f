//! Label table and deleted set.
//!
//! Maps caller-facing 64-bit labels to dense internal node indices and
//! back. The forward map lives behind a mutex; the reverse direction is a
//! per-node atomic array. Deletion state is a separate atomic bitset over
//! `[0, capacity)` so the search hot path can test membership with one
//! load. Among *live* nodes the mapping is a bijection; a deleted node
//! keeps its map entry so that re-inserting the same label can reuse its
//! slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::errors::{Error, Result};

/// Fixed-size bitset with atomic bit operations.
#[derive(Debug)]
pub struct AtomicBitset {
    words: Vec<AtomicU64>,
}

impl AtomicBitset {
    pub fn new(bits: usize) -> Self {
        let words = (bits + 63) / 64;
        let mut v = Vec::with_capacity(words);
        v.resize_with(words, || AtomicU64::new(0));
        Self { words: v }
    }

    #[inline]
    pub fn get(&self, bit: u32) -> bool {
        let word = (bit / 64) as usize;
        let mask = 1u64 << (bit % 64);
        self.words[word].load(Ordering::Acquire) & mask != 0
    }

    /// Sets the bit; returns its previous value.
    #[inline]
    pub fn set(&self, bit: u32) -> bool {
        let word = (bit / 64) as usize;
        let mask = 1u64 << (bit % 64);
        self.words[word].fetch_or(mask, Ordering::AcqRel) & mask != 0
    }

    /// Clears the bit; returns its previous value.
    #[inline]
    pub fn clear(&self, bit: u32) -> bool {
        let word = (bit / 64) as usize;
        let mask = 1u64 << (bit % 64);
        self.words[word].fetch_and(!mask, Ordering::AcqRel) & mask != 0
    }

    /// Grows to cover at least `bits` bits. Existing bits are preserved.
    pub fn grow(&mut self, bits: usize) {
        let words = (bits + 63) / 64;
        if words > self.words.len() {
            self.words.resize_with(words, || AtomicU64::new(0));
        }
    }
}

/// Outcome of claiming a label for insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The label is new; a fresh slot was allocated for it.
    New(u32),
    /// The label was marked deleted; its old slot is reused and the
    /// deletion mark has been cleared.
    Replace(u32),
}

impl Claim {
    #[inline]
    pub fn slot(self) -> u32 {
        match self {
            Claim::New(i) | Claim::Replace(i) => i,
        }
    }
}

/// Bidirectional label mapping plus the deleted set.
#[derive(Debug)]
pub struct LabelTable {
    forward: Mutex<HashMap<u64, u32>>,
    by_node: Vec<AtomicU64>,
    deleted: AtomicBitset,
    num_deleted: AtomicUsize,
}

impl LabelTable {
    pub fn new(capacity: usize) -> Self {
        let mut by_node = Vec::with_capacity(capacity);
        by_node.resize_with(capacity, || AtomicU64::new(0));
        Self {
            forward: Mutex::new(HashMap::new()),
            by_node,
            deleted: AtomicBitset::new(capacity),
            num_deleted: AtomicUsize::new(0),
        }
    }

    /// Grows per-node storage to the new capacity. Caller holds the
    /// structural lock exclusively.
    pub fn grow(&mut self, capacity: usize) {
        if capacity > self.by_node.len() {
            self.by_node.resize_with(capacity, || AtomicU64::new(0));
        }
        self.deleted.grow(capacity);
    }

    /// Claims `label` for an insertion.
    ///
    /// New labels get a slot from `alloc` (called under the table lock, so
    /// label claims are serialized); a deleted label's old slot is reused
    /// and revived; a live label is a collision error. `alloc` failing
    /// (capacity exhausted) leaves the table untouched.
    pub fn claim(&self, label: u64, alloc: impl FnOnce() -> Option<u32>) -> Result<Claim> {
        let mut forward = self.forward.lock();
        match forward.get(&label) {
            Some(&slot) => {
                if self.deleted.clear(slot) {
                    self.num_deleted.fetch_sub(1, Ordering::AcqRel);
                    Ok(Claim::Replace(slot))
                } else {
                    Err(Error::DuplicateLabel(label))
                }
            }
            None => {
                let slot = alloc().ok_or(Error::CapacityExhausted)?;
                forward.insert(label, slot);
                self.by_node[slot as usize].store(label, Ordering::Release);
                Ok(Claim::New(slot))
            }
        }
    }

    /// Registers a label for a slot without liveness checks. Load-time only.
    pub fn install(&self, label: u64, slot: u32, deleted: bool) -> Result<()> {
        let mut forward = self.forward.lock();
        if forward.insert(label, slot).is_some() {
            return Err(Error::Format(format!("duplicate label {label} in stream")));
        }
        self.by_node[slot as usize].store(label, Ordering::Release);
        if deleted {
            self.deleted.set(slot);
            self.num_deleted.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Internal index for a label, live or deleted.
    pub fn get_any(&self, label: u64) -> Option<u32> {
        self.forward.lock().get(&label).copied()
    }

    /// Internal index for a live label.
    pub fn get_live(&self, label: u64) -> Result<u32> {
        match self.get_any(label) {
            Some(slot) if !self.deleted.get(slot) => Ok(slot),
            _ => Err(Error::LabelNotFound(label)),
        }
    }

    /// The label stored at an internal index.
    #[inline]
    pub fn label_of(&self, slot: u32) -> u64 {
        self.by_node[slot as usize].load(Ordering::Acquire)
    }

    /// Whether the node at `slot` is marked deleted.
    #[inline]
    pub fn is_deleted(&self, slot: u32) -> bool {
        self.deleted.get(slot)
    }

    /// Marks the node behind `label` deleted.
    pub fn mark_deleted(&self, label: u64) -> Result<u32> {
        let forward = self.forward.lock();
        let slot = *forward.get(&label).ok_or(Error::LabelNotFound(label))?;
        if self.deleted.set(slot) {
            return Err(Error::LabelNotFound(label));
        }
        self.num_deleted.fetch_add(1, Ordering::AcqRel);
        Ok(slot)
    }

    /// Reverses a deletion mark.
    pub fn unmark_deleted(&self, label: u64) -> Result<u32> {
        let forward = self.forward.lock();
        let slot = *forward.get(&label).ok_or(Error::LabelNotFound(label))?;
        if !self.deleted.clear(slot) {
            return Err(Error::LabelNotFound(label));
        }
        self.num_deleted.fetch_sub(1, Ordering::AcqRel);
        Ok(slot)
    }

    /// All live labels, in unspecified order.
    pub fn ids(&self) -> Vec<u64> {
        self.forward
            .lock()
            .iter()
            .filter(|(_, &slot)| !self.deleted.get(slot))
            .map(|(&label, _)| label)
            .collect()
    }

    /// Number of live labels.
    pub fn live_count(&self) -> usize {
        let total = self.forward.lock().len();
        total - self.num_deleted.load(Ordering::Acquire)
    }

    /// Number of deleted nodes.
    pub fn deleted_count(&self) -> usize {
        self.num_deleted.load(Ordering::Acquire)
    }

    /// Largest label ever assigned, live or deleted.
    pub fn max_label(&self) -> Option<u64> {
        self.forward.lock().keys().max().copied()
    }
}
