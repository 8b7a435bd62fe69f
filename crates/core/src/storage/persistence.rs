//! Versioned binary index format.
//!
//! V1 streams open with a `"VOYA"` header carrying the parameters needed
//! to interpret the payload (version, dimensionality, space, storage
//! kind, max norm); the graph section that follows is also a complete
//! legacy V0 stream, which older files consist of alone. Everything is
//! little-endian.
//!
//! Graph section layout:
//!
//! ```text
//! offset_level0 u64   max_elements u64   cur_element_count u64
//! size_data_per_element u64   label_offset u64   offset_data u64
//! maxlevel u32   enterpoint_node u32
//! maxM u64   maxM0 u64   M u64   mult f64   ef_construction u64
//! level-0 slab: per node, [count u32][maxM0 ids, padded][vector][label u64]
//! upper levels: per node, [size u32][(1 + maxM) * 4 * level bytes]
//! ```
//!
//! The level-0 count word carries the node's deletion mark in bit 16, as
//! legacy streams do. Every size field is validated against the bytes
//! actually remaining before anything is allocated; a forged
//! `max_elements` is additionally clamped to a small multiple of the
//! element count.

use std::io::{Read, Write};

use crate::config;
use crate::errors::{Error, Result};
use crate::hnsw::distance::Space;
use crate::hnsw::graph::{HnswGraph, NO_ENTRY};
use crate::index::IndexCore;
use crate::labels::LabelTable;
use crate::quantization::StorageKind;
use crate::storage::store::VectorStore;

/// V1 stream magic.
pub const MAGIC: [u8; 4] = *b"VOYA";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Deletion flag carried in bit 16 of the level-0 count word.
const DELETE_MARK: u32 = 1 << 16;

/// Mask extracting the neighbor count from a count word.
const COUNT_MASK: u32 = 0xffff;

/// Byte size of the graph section's fixed parameter block; the level-0
/// slab starts here.
const GRAPH_PARAMS_BYTES: u64 = 96;

// ── Writer ──────────────────────────────────────────────────────────────

fn write_padded_links(
    out: &mut Vec<u8>,
    graph: &HnswGraph,
    node: u32,
    level: usize,
    cap: usize,
    flags: u32,
) {
    let links = graph.links(node, level);
    out.extend_from_slice(&(links.len() as u32 | flags).to_le_bytes());
    for i in 0..links.len() {
        out.extend_from_slice(&links.get(i).to_le_bytes());
    }
    for _ in links.len()..cap {
        out.extend_from_slice(&0u32.to_le_bytes());
    }
}

/// Serializes a quiescent index to `writer` in V1 format.
pub(crate) fn save_index<W: Write>(core: &IndexCore, writer: &mut W) -> Result<()> {
    let graph = &core.graph;
    let store = &core.store;
    let count = graph.count();

    // V1 header.
    writer.write_all(&MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    writer.write_all(&(store.dim() as u32).to_le_bytes())?;
    writer.write_all(&[store.space().tag(), store.kind().tag()])?;
    writer.write_all(&store.max_norm().to_le_bytes())?;
    writer.write_all(&[0u8])?; // use_order_preserving_transform, reserved

    // Graph parameter block.
    let size_links0 = (1 + graph.max_m0()) * 4;
    let data_bytes = store.bytes_per_vector();
    let size_data_per_element = size_links0 + data_bytes + 8;
    let label_offset = size_links0 + data_bytes;
    let enterpoint = graph.entry_point().unwrap_or(NO_ENTRY);

    writer.write_all(&GRAPH_PARAMS_BYTES.to_le_bytes())?;
    writer.write_all(&(graph.capacity() as u64).to_le_bytes())?;
    writer.write_all(&(count as u64).to_le_bytes())?;
    writer.write_all(&(size_data_per_element as u64).to_le_bytes())?;
    writer.write_all(&(label_offset as u64).to_le_bytes())?;
    writer.write_all(&(size_links0 as u64).to_le_bytes())?;
    writer.write_all(&(graph.max_level() as u32).to_le_bytes())?;
    writer.write_all(&enterpoint.to_le_bytes())?;
    writer.write_all(&(graph.max_m() as u64).to_le_bytes())?;
    writer.write_all(&(graph.max_m0() as u64).to_le_bytes())?;
    writer.write_all(&(graph.m() as u64).to_le_bytes())?;
    writer.write_all(&graph.mult().to_le_bytes())?;
    writer.write_all(&(graph.ef_construction() as u64).to_le_bytes())?;

    // Level-0 slab.
    let mut entry = Vec::with_capacity(size_data_per_element);
    for node in 0..count as u32 {
        entry.clear();
        let flags = if core.labels.is_deleted(node) {
            DELETE_MARK
        } else {
            0
        };
        write_padded_links(&mut entry, graph, node, 0, graph.max_m0(), flags);
        entry.extend_from_slice(store.block(node));
        entry.extend_from_slice(&core.labels.label_of(node).to_le_bytes());
        debug_assert_eq!(entry.len(), size_data_per_element);
        writer.write_all(&entry)?;
    }

    // Upper-level blocks.
    let words_per_level = 1 + graph.max_m();
    for node in 0..count as u32 {
        let level = graph.node_level(node);
        let block_bytes = (words_per_level * 4 * level) as u32;
        writer.write_all(&block_bytes.to_le_bytes())?;
        if level == 0 {
            continue;
        }
        entry.clear();
        for l in 1..=level {
            write_padded_links(&mut entry, graph, node, l, graph.max_m(), 0);
        }
        debug_assert_eq!(entry.len(), block_bytes as usize);
        writer.write_all(&entry)?;
    }

    tracing::info!(
        "saved index: {count} elements, dim {}, {:?}/{:?}",
        store.dim(),
        store.space(),
        store.kind()
    );
    Ok(())
}

// ── Reader ──────────────────────────────────────────────────────────────

struct Cursor<'a> {
    bytes: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(Error::Format(format!(
                "unexpected end of stream: needed {n} bytes, {} remain",
                self.bytes.len()
            )));
        }
        let (head, rest) = self.bytes.split_at(n);
        self.bytes = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    fn remaining(&self) -> usize {
        self.bytes.len()
    }
}

/// Out-of-band parameters for loading a headerless (V0) stream, or for
/// cross-checking a V1 header.
#[derive(Debug, Clone, Copy)]
pub struct LoadParams {
    pub space: Space,
    pub num_dimensions: usize,
    pub storage: StorageKind,
}

pub(crate) struct LoadedIndex {
    pub core: IndexCore,
    pub space: Space,
    pub storage: StorageKind,
    pub num_dimensions: usize,
}

fn usize_field(value: u64, what: &str) -> Result<usize> {
    usize::try_from(value)
        .ok()
        .filter(|&v| v <= config::MAX_ELEMENTS)
        .ok_or_else(|| Error::Format(format!("{what} = {value} is out of range")))
}

/// Deserializes an index from `reader`.
///
/// A V1 header, when present, must agree with `params` if both are given;
/// a headerless stream requires `params`.
pub(crate) fn load_index<R: Read>(
    reader: &mut R,
    params: Option<LoadParams>,
) -> Result<LoadedIndex> {
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;
    let mut cur = Cursor { bytes: &buffer };

    // Header detection: V1 streams start with the magic; anything else is
    // interpreted as a bare graph section.
    let (space, dim, storage, max_norm) =
        if cur.remaining() >= 4 && cur.bytes[..4] == MAGIC {
            cur.take(4)?;
            let version = cur.u32()?;
            if version != FORMAT_VERSION {
                return Err(Error::Format(format!(
                    "unsupported index format version {version} (expected {FORMAT_VERSION})"
                )));
            }
            let dim_in_file = cur.u32()?;
            let space_tag = cur.u8()?;
            let storage_tag = cur.u8()?;
            let max_norm = cur.f32()?;
            let _reserved = cur.u8()?;

            let space = Space::from_tag(space_tag)
                .ok_or_else(|| Error::Format(format!("unknown space tag {space_tag:#04x}")))?;
            let storage = StorageKind::from_tag(storage_tag).ok_or_else(|| {
                Error::Format(format!("unknown storage kind tag {storage_tag:#04x}"))
            })?;
            let dim = usize_field(dim_in_file as u64, "num_dimensions")?;
            if dim == 0 || dim > config::MAX_DIMENSIONS {
                return Err(Error::Format(format!(
                    "num_dimensions = {dim} is outside [1, {}]",
                    config::MAX_DIMENSIONS
                )));
            }

            if let Some(p) = params {
                if p.space != space {
                    return Err(Error::space_mismatch(space, p.space));
                }
                if p.num_dimensions != dim {
                    return Err(Error::dimension_mismatch_on_load(dim_in_file, p.num_dimensions));
                }
                if p.storage != storage {
                    return Err(Error::storage_mismatch(storage, p.storage));
                }
            }
            (space, dim, storage, max_norm)
        } else {
            let Some(p) = params else {
                return Err(Error::Format(
                    "stream has no VOYA header; space, num_dimensions, and storage_kind \
                     must be supplied to load a legacy index"
                        .into(),
                ));
            };
            tracing::warn!("loading legacy headerless index stream");
            if p.num_dimensions == 0 || p.num_dimensions > config::MAX_DIMENSIONS {
                return Err(Error::Format(format!(
                    "num_dimensions = {} is outside [1, {}]",
                    p.num_dimensions,
                    config::MAX_DIMENSIONS
                )));
            }
            (p.space, p.num_dimensions, p.storage, 0.0)
        };

    // Graph parameter block.
    let offset_level0 = cur.u64()?;
    if offset_level0 != 0 && offset_level0 != GRAPH_PARAMS_BYTES {
        return Err(Error::Format(format!(
            "offset_level0 = {offset_level0} does not match the parameter block size"
        )));
    }
    let max_elements = cur.u64()?;
    let count = usize_field(cur.u64()?, "cur_element_count")?;
    let size_data_per_element = cur.u64()?;
    let label_offset = cur.u64()?;
    let offset_data = cur.u64()?;
    let max_level = cur.u32()? as usize;
    let enterpoint = cur.u32()?;
    let max_m = usize_field(cur.u64()?, "maxM")?;
    let max_m0 = usize_field(cur.u64()?, "maxM0")?;
    let m = usize_field(cur.u64()?, "M")?;
    let mult = cur.f64()?;
    let ef_construction = usize_field(cur.u64()?, "ef_construction")?;

    if m < 2 || m > config::MAX_M {
        return Err(Error::Format(format!("M = {m} is out of range")));
    }
    if max_m != m {
        return Err(Error::Format(format!("maxM = {max_m} does not equal M = {m}")));
    }
    if max_m0 != m * 2 {
        return Err(Error::Format(format!(
            "maxM0 = {max_m0} does not equal 2 * M = {}",
            m * 2
        )));
    }
    if (count as u64) > max_elements {
        return Err(Error::Format(format!(
            "cur_element_count {count} exceeds max_elements {max_elements}"
        )));
    }

    // Derived layout must agree with the declared parameters; this is
    // where a wrong out-of-band dimension surfaces for V0 streams.
    let size_links0 = (1 + max_m0) * 4;
    let data_bytes =
        dim * storage.scalar_size() + if space.normalizes() { 4 } else { 0 };
    let expected_sdpe = (size_links0 + data_bytes + 8) as u64;
    if size_data_per_element != expected_sdpe {
        return Err(Error::Format(format!(
            "size_data_per_element is {size_data_per_element}, but {dim} dimensions of \
             {storage:?} imply {expected_sdpe}"
        )));
    }
    if offset_data != size_links0 as u64 {
        return Err(Error::Format(format!(
            "offset_data = {offset_data}, expected {size_links0}"
        )));
    }
    if label_offset != (size_links0 + data_bytes) as u64 {
        return Err(Error::Format(format!(
            "label_offset = {label_offset}, expected {}",
            size_links0 + data_bytes
        )));
    }

    // The whole level-0 slab must be present before any allocation.
    let slab_bytes = (count as u64)
        .checked_mul(size_data_per_element)
        .ok_or_else(|| Error::Format("level-0 slab size overflows".into()))?;
    if slab_bytes > cur.remaining() as u64 {
        return Err(Error::Format(format!(
            "level-0 slab needs {slab_bytes} bytes, stream has {}",
            cur.remaining()
        )));
    }
    if count > 0 && enterpoint as usize >= count {
        return Err(Error::Format(format!(
            "enterpoint_node {enterpoint} is out of bounds for {count} elements"
        )));
    }

    // Clamp the declared capacity: a forged max_elements must not drive
    // allocation beyond a small multiple of what the stream proves.
    let capacity = (max_elements.min(count.max(1) as u64 * 2) as usize).max(count).max(1);

    let mut graph = HnswGraph::new(m, ef_construction, config::DEFAULT_RANDOM_SEED, capacity);
    graph.set_mult(mult);
    let store = VectorStore::new(dim, storage, space, capacity);
    let labels = LabelTable::new(capacity);

    // Level-0 slab: links, vector bytes, label, per node.
    for node in 0..count as u32 {
        let header = cur.u32()?;
        let len = (header & COUNT_MASK) as usize;
        if len > max_m0 {
            return Err(Error::Format(format!(
                "node {node} has {len} level-0 links (cap {max_m0})"
            )));
        }
        let mut links = Vec::with_capacity(len);
        for i in 0..max_m0 {
            let id = cur.u32()?;
            if i < len {
                if id as usize >= count {
                    return Err(Error::Format(format!(
                        "node {node} links to out-of-bounds node {id}"
                    )));
                }
                links.push(id);
            }
        }
        graph.set_links(node, 0, &links);

        let block = cur.take(data_bytes)?;
        // Safety: the store was just built and nothing else references it.
        unsafe { store.write(node, block) };

        let label = cur.u64()?;
        labels.install(label, node, header & DELETE_MARK != 0)?;
    }

    // Upper-level blocks.
    let words_per_level = 1 + max_m;
    let bytes_per_level = words_per_level * 4;
    for node in 0..count as u32 {
        let block_bytes = cur.u32()? as usize;
        if block_bytes == 0 {
            continue;
        }
        if block_bytes % bytes_per_level != 0 {
            return Err(Error::Format(format!(
                "node {node} has a {block_bytes}-byte upper block, not a multiple of \
                 {bytes_per_level}"
            )));
        }
        let levels = block_bytes / bytes_per_level;
        let raw = cur.take(block_bytes)?;
        let mut words = Vec::with_capacity(block_bytes / 4);
        for chunk in raw.chunks_exact(4) {
            words.push(u32::from_le_bytes(chunk.try_into().expect("4 bytes")));
        }
        for level in 0..levels {
            let base = level * words_per_level;
            let len = (words[base] & COUNT_MASK) as usize;
            if len > max_m {
                return Err(Error::Format(format!(
                    "node {node} has {len} links at level {} (cap {max_m})",
                    level + 1
                )));
            }
            for &id in &words[base + 1..base + 1 + len] {
                if id as usize >= count {
                    return Err(Error::Format(format!(
                        "node {node} links to out-of-bounds node {id} at level {}",
                        level + 1
                    )));
                }
            }
            words[base] &= COUNT_MASK;
        }
        graph.set_node_level(node, levels);
        graph.install_upper(node, words);
    }

    if cur.remaining() != 0 {
        return Err(Error::Format(format!(
            "{} trailing bytes after the index payload",
            cur.remaining()
        )));
    }

    let entry = if count == 0 { NO_ENTRY } else { enterpoint };
    if count > 0 && graph.node_level(entry) < max_level {
        return Err(Error::Format(format!(
            "enterpoint_node {entry} has level {} but maxlevel is {max_level}",
            graph.node_level(entry)
        )));
    }
    graph.set_state(count, entry, max_level);

    if space.normalizes() {
        if max_norm > 0.0 {
            store.set_max_norm(max_norm);
        } else {
            // Legacy streams lack the header field; recompute.
            let mut recomputed = 0.0f32;
            for node in 0..count as u32 {
                recomputed = recomputed.max(store.norm(node));
            }
            store.set_max_norm(recomputed);
        }
    }

    tracing::info!(
        "loaded index: {count} elements, dim {dim}, {space:?}/{storage:?}"
    );
    Ok(LoadedIndex {
        core: IndexCore {
            graph,
            store,
            labels,
        },
        space,
        storage,
        num_dimensions: dim,
    })
}
