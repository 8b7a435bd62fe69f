//! End-to-end scenarios: metric correctness on known datasets, storage
//! tolerance, save/load fidelity, malformed-stream handling, recall, and
//! concurrent batch operations.

use std::io::Cursor;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use argonaut_core::{Error, Index, IndexOptions, LoadParams, Neighbor, Space, StorageKind};

/// The five-row dataset every metric scenario uses, zero-padded to `dim`.
fn axis_dataset(dim: usize) -> Vec<Vec<f32>> {
    let rows: [[f32; 3]; 5] = [
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 0.0, 1.0],
        [1.0, 1.0, 1.0],
    ];
    rows.iter()
        .map(|row| {
            let mut v = vec![0.0f32; dim];
            v[..3].copy_from_slice(row);
            v
        })
        .collect()
}

fn build_index(space: Space, dim: usize, storage: StorageKind, rows: &[Vec<f32>]) -> Index {
    let index = Index::new(
        space,
        dim,
        IndexOptions {
            storage,
            ..IndexOptions::default()
        },
    )
    .expect("index construction");
    for row in rows {
        index.add_item(row, None).expect("insert");
    }
    index
}

fn distances(hits: &[Neighbor]) -> Vec<f32> {
    hits.iter().map(|n| n.distance).collect()
}

// ── S1..S3: metric scenarios ────────────────────────────────────────────

#[test]
fn axis_aligned_euclidean_distances() {
    for dim in [3, 7, 64, 200] {
        let rows = axis_dataset(dim);
        let index = build_index(Space::Euclidean, dim, StorageKind::Float32, &rows);
        let hits = index.query(&rows[4], 5, Some(50)).unwrap();
        let got = distances(&hits);
        assert_eq!(got[0], 0.0, "self distance at dim {dim}");
        assert_eq!(got[1], 1.0);
        assert_eq!(got[2..].to_vec(), vec![2.0, 2.0, 2.0], "tie group at dim {dim}");
        assert_eq!(hits[0].label, 4);
    }
}

#[test]
fn inner_product_sign() {
    let rows = axis_dataset(3);
    let index = build_index(Space::InnerProduct, 3, StorageKind::Float32, &rows);
    let hits = index.query(&[1.0, 1.0, 1.0], 5, Some(50)).unwrap();
    assert_eq!(distances(&hits), vec![-2.0, -1.0, 0.0, 0.0, 0.0]);
    assert_eq!(hits[0].label, 4);
    assert_eq!(hits[1].label, 3);
}

#[test]
fn cosine_ordering() {
    let rows = axis_dataset(3);
    let index = build_index(Space::Cosine, 3, StorageKind::Float32, &rows);
    let hits = index.query(&[1.0, 1.0, 1.0], 5, Some(50)).unwrap();
    let got = distances(&hits);
    assert!(
        got[0].abs() <= 1e-6,
        "self cosine distance should be zero, got {}",
        got[0]
    );
    assert_eq!(hits[0].label, 4);
    for (i, &d) in got[1..].iter().enumerate() {
        let near_diag = (d - 0.1835).abs() < 1e-3;
        let axis = (d - 0.423).abs() < 1e-3;
        assert!(near_diag || axis, "distance {i} = {d} matches neither group");
    }
    assert!((got[1] - 0.1835).abs() < 1e-3, "[1,0,1] is the second hit");
}

// ── Storage tolerance (invariant 1) ─────────────────────────────────────

fn unit_direction(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

#[test]
fn get_vector_tolerance_per_storage_kind() {
    let dim = 24;
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let rows: Vec<Vec<f32>> = (0..40)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();

    for (storage, tolerance) in [
        (StorageKind::Float32, 2e-7f32),
        (StorageKind::Float8, 0.03),
        (StorageKind::E4M3, 0.1),
    ] {
        for space in [Space::Euclidean, Space::Cosine] {
            let index = build_index(space, dim, storage, &rows);
            for (label, row) in rows.iter().enumerate() {
                let stored = index.get_vector(label as u64).unwrap();
                // Cosine keeps only the direction faithfully; compare unit
                // vectors there (with headroom for the extra normalization
                // rounding), raw values elsewhere.
                let (expect, got, tolerance) = if space == Space::Cosine {
                    (
                        unit_direction(row),
                        unit_direction(&stored),
                        tolerance.max(1e-6),
                    )
                } else {
                    (row.clone(), stored, tolerance)
                };
                for (g, w) in got.iter().zip(&expect) {
                    assert!(
                        (g - w).abs() <= tolerance,
                        "{space:?}/{storage:?} label {label}: {g} vs {w}"
                    );
                }
            }
        }
    }
}

// ── Save / load fidelity (invariant 6, S4) ──────────────────────────────

fn serialized(index: &Index) -> Vec<u8> {
    let mut bytes = Vec::new();
    index.save_to(&mut bytes).expect("save");
    bytes
}

fn assert_same_index(a: &Index, b: &Index, queries: &[Vec<f32>], k: usize) {
    let mut ids_a = a.ids();
    let mut ids_b = b.ids();
    ids_a.sort_unstable();
    ids_b.sort_unstable();
    assert_eq!(ids_a, ids_b, "ids diverge");
    for &label in &ids_a {
        assert_eq!(
            a.get_vector(label).unwrap(),
            b.get_vector(label).unwrap(),
            "vector for label {label} diverges"
        );
    }
    for q in queries {
        assert_eq!(
            a.query(q, k, Some(64)).unwrap(),
            b.query(q, k, Some(64)).unwrap(),
            "query results diverge"
        );
    }
}

#[test]
fn save_load_roundtrip_preserves_everything() {
    let dim = 12;
    let mut rng = StdRng::seed_from_u64(17);
    let rows: Vec<Vec<f32>> = (0..120)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();
    let queries: Vec<Vec<f32>> = (0..10)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();

    for (space, storage) in [
        (Space::Euclidean, StorageKind::Float32),
        (Space::InnerProduct, StorageKind::Float8),
        (Space::Cosine, StorageKind::E4M3),
    ] {
        let index = build_index(space, dim, storage, &rows);
        index.mark_deleted(5).unwrap();
        index.mark_deleted(77).unwrap();

        let bytes = serialized(&index);
        let loaded = Index::load(&mut Cursor::new(&bytes)).expect("load");
        assert_eq!(loaded.space(), space);
        assert_eq!(loaded.storage_kind(), storage);
        assert_eq!(loaded.num_dimensions(), dim);
        assert_eq!(loaded.deleted_count(), 2);
        assert_same_index(&index, &loaded, &queries, 5);
    }
}

#[test]
fn loaded_index_accepts_new_inserts_and_replacements() {
    let rows = axis_dataset(3);
    let index = build_index(Space::Euclidean, 3, StorageKind::Float32, &rows);
    index.mark_deleted(2).unwrap();

    let bytes = serialized(&index);
    let loaded = Index::load(&mut Cursor::new(&bytes)).unwrap();

    // The deleted label replaces in place; a fresh label takes a new slot.
    loaded.add_item(&[9.0, 9.0, 9.0], Some(2)).unwrap();
    assert_eq!(loaded.element_count(), 5);
    let fresh = loaded.add_item(&[3.0, 3.0, 3.0], None).unwrap();
    assert_eq!(fresh, 5, "label counter resumes after the loaded maximum");
    assert_eq!(loaded.element_count(), 6);
    let hits = loaded.query(&[9.0, 9.0, 9.0], 1, None).unwrap();
    assert_eq!(hits[0].label, 2);
}

#[test]
fn legacy_stream_roundtrip_with_params() {
    let rows = axis_dataset(4);
    let index = build_index(Space::Euclidean, 4, StorageKind::Float8, &rows);
    let bytes = serialized(&index);

    // Dropping the 19-byte V1 header leaves a legacy (V0) stream.
    let legacy = &bytes[19..];
    let params = LoadParams {
        space: Space::Euclidean,
        num_dimensions: 4,
        storage: StorageKind::Float8,
    };
    let loaded = Index::load_with_params(&mut Cursor::new(legacy), params).expect("legacy load");
    assert_same_index(&index, &loaded, &axis_dataset(4), 3);

    // Without parameters the headerless stream is rejected.
    let err = Index::load(&mut Cursor::new(legacy)).unwrap_err();
    assert!(matches!(err, Error::Format(_)), "got {err:?}");
}

#[test]
fn load_rejects_mismatched_dimensions() {
    let rows: Vec<Vec<f32>> = (0..6).map(|i| vec![i as f32; 10]).collect();
    let index = build_index(Space::Euclidean, 10, StorageKind::Float32, &rows);
    let bytes = serialized(&index);

    let err = Index::load_with_params(
        &mut Cursor::new(&bytes),
        LoadParams {
            space: Space::Euclidean,
            num_dimensions: 11,
            storage: StorageKind::Float32,
        },
    )
    .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("10"), "missing file value: {message}");
    assert!(message.contains("11"), "missing supplied value: {message}");
}

#[test]
fn load_rejects_mismatched_space_and_storage() {
    let rows = axis_dataset(3);
    let index = build_index(Space::InnerProduct, 3, StorageKind::E4M3, &rows);
    let bytes = serialized(&index);

    let err = Index::load_with_params(
        &mut Cursor::new(&bytes),
        LoadParams {
            space: Space::Euclidean,
            num_dimensions: 3,
            storage: StorageKind::E4M3,
        },
    )
    .unwrap_err();
    assert!(err.to_string().contains("space"), "{err}");

    let err = Index::load_with_params(
        &mut Cursor::new(&bytes),
        LoadParams {
            space: Space::InnerProduct,
            num_dimensions: 3,
            storage: StorageKind::Float32,
        },
    )
    .unwrap_err();
    assert!(err.to_string().contains("storage"), "{err}");
}

#[test]
fn empty_index_roundtrip() {
    let index = Index::new(Space::Cosine, 8, IndexOptions::default()).unwrap();
    let bytes = serialized(&index);
    let loaded = Index::load(&mut Cursor::new(&bytes)).unwrap();
    assert!(loaded.is_empty());
    loaded.add_item(&[1.0; 8], None).unwrap();
    assert_eq!(loaded.len(), 1);
}

#[test]
fn file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("axis.voy");
    let rows = axis_dataset(3);
    let index = build_index(Space::Euclidean, 3, StorageKind::Float32, &rows);
    index.save_to_file(&path).unwrap();
    let loaded = Index::load_from_file(&path).unwrap();
    assert_same_index(&index, &loaded, &rows, 3);
}

// ── S6: fuzzed malformed streams ────────────────────────────────────────

#[test]
fn fuzzed_streams_never_crash() {
    let mut rng = StdRng::seed_from_u64(0xf022);
    let valid_header: Vec<u8> = {
        // Magic, version 1, 4 dimensions, Euclidean, Float32: the fixed
        // 14-byte prefix of a genuine stream.
        let mut h = Vec::new();
        h.extend_from_slice(b"VOYA");
        h.extend_from_slice(&1u32.to_le_bytes());
        h.extend_from_slice(&4u32.to_le_bytes());
        h.push(0);
        h.push(0x20);
        h
    };

    for round in 0..10_000 {
        let len = rng.gen_range(0..256);
        let mut bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        if round % 2 == 0 {
            let mut prefixed = valid_header.clone();
            prefixed.append(&mut bytes);
            bytes = prefixed;
        }
        match Index::load(&mut Cursor::new(&bytes)) {
            Ok(_) => panic!("round {round}: random stream parsed as valid"),
            Err(Error::Format(_) | Error::ParameterMismatch { .. }) => {}
            Err(other) => panic!("round {round}: unexpected error family {other:?}"),
        }
    }
}

#[test]
fn truncated_valid_stream_fails_cleanly() {
    let rows = axis_dataset(3);
    let index = build_index(Space::Euclidean, 3, StorageKind::Float32, &rows);
    let bytes = serialized(&index);
    for cut in [0, 4, 13, 19, 50, bytes.len() - 9, bytes.len() - 1] {
        let err = Index::load(&mut Cursor::new(&bytes[..cut]));
        assert!(err.is_err(), "truncation at {cut} loaded successfully");
    }
    // Trailing garbage is rejected too.
    let mut extended = bytes.clone();
    extended.extend_from_slice(&[0xab; 7]);
    assert!(Index::load(&mut Cursor::new(&extended)).is_err());
}

// ── Recall (invariant 7) ────────────────────────────────────────────────

fn self_recall(storage: StorageKind, n: usize, dim: usize) -> usize {
    let mut rng = StdRng::seed_from_u64(0xacc01ade);
    let rows: Vec<Vec<f32>> = (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();
    let index = Index::new(
        Space::Euclidean,
        dim,
        IndexOptions {
            storage,
            ef_construction: 200,
            ..IndexOptions::default()
        },
    )
    .unwrap();
    index.add_items(&rows, None, None).unwrap();

    rows.iter()
        .enumerate()
        .filter(|(i, row)| {
            let hits = index.query(row, 1, Some(100)).unwrap();
            hits.first().map(|h| h.label) == Some(*i as u64)
        })
        .count()
}

#[test]
fn self_recall_float32() {
    let hit = self_recall(StorageKind::Float32, 300, 16);
    assert!(hit >= 295, "float32 self-recall {hit}/300");
}

#[test]
fn self_recall_float8() {
    let hit = self_recall(StorageKind::Float8, 300, 16);
    assert!(hit >= 150, "float8 self-recall {hit}/300");
}

#[test]
fn self_recall_e4m3() {
    let hit = self_recall(StorageKind::E4M3, 300, 16);
    assert!(hit >= 120, "e4m3 self-recall {hit}/300");
}

// ── Deletion semantics ──────────────────────────────────────────────────

#[test]
fn deleted_labels_vanish_from_results_until_reinserted() {
    let dim = 8;
    let mut rng = StdRng::seed_from_u64(99);
    let rows: Vec<Vec<f32>> = (0..50)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();
    let index = build_index(Space::Euclidean, dim, StorageKind::Float32, &rows);

    index.mark_deleted(13).unwrap();
    let hits = index.query(&rows[13], 10, Some(64)).unwrap();
    assert!(hits.iter().all(|h| h.label != 13), "deleted label surfaced");

    // Replacement reuses the slot but answers with the new vector.
    let replacement = vec![7.5f32; dim];
    index.add_item(&replacement, Some(13)).unwrap();
    let hits = index.query(&replacement, 1, Some(64)).unwrap();
    assert_eq!(hits[0].label, 13);
    assert_eq!(index.element_count(), 50);
}

#[test]
fn mark_deleted_unknown_label_is_not_found() {
    let index = build_index(Space::Euclidean, 3, StorageKind::Float32, &axis_dataset(3));
    assert!(matches!(index.mark_deleted(42), Err(Error::LabelNotFound(42))));
    index.mark_deleted(1).unwrap();
    assert!(matches!(index.get_vector(1), Err(Error::LabelNotFound(1))));
    assert!(matches!(index.mark_deleted(1), Err(Error::LabelNotFound(1))));
}

// ── Concurrency ─────────────────────────────────────────────────────────

#[test]
fn parallel_batch_insert_then_query_sees_all() {
    let dim = 16;
    let mut rng = StdRng::seed_from_u64(0xbee);
    let rows: Vec<Vec<f32>> = (0..400)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();

    let index = Index::new(Space::Euclidean, dim, IndexOptions::default()).unwrap();
    let labels = index.add_items(&rows, None, Some(4)).unwrap();
    assert_eq!(labels, (0..400).collect::<Vec<u64>>());
    assert_eq!(index.len(), 400);

    let results = index.query_batch(&rows, 1, Some(4), Some(100)).unwrap();
    let hit = results
        .iter()
        .enumerate()
        .filter(|(i, hits)| hits.first().map(|h| h.label) == Some(*i as u64))
        .count();
    assert!(hit >= 396, "batch self-recall {hit}/400");
}

#[test]
fn batch_error_propagates_bad_row() {
    let index = Index::new(
        Space::Euclidean,
        4,
        IndexOptions {
            storage: StorageKind::E4M3,
            ..IndexOptions::default()
        },
    )
    .unwrap();
    let mut rows: Vec<Vec<f32>> = (0..40).map(|i| vec![i as f32; 4]).collect();
    rows[25] = vec![1000.0; 4]; // outside E4M3 range
    let err = index.add_items(&rows, None, Some(4)).unwrap_err();
    assert!(matches!(err, Error::ValueOutOfRange { .. }), "got {err:?}");
}

#[test]
fn concurrent_insert_and_query_do_not_tear() {
    let dim = 8;
    let index = std::sync::Arc::new(
        Index::new(Space::Euclidean, dim, IndexOptions::default()).unwrap(),
    );
    let seed_rows: Vec<Vec<f32>> = (0..64)
        .map(|i| (0..dim).map(|d| ((i * 31 + d * 7) % 17) as f32).collect())
        .collect();
    index.add_items(&seed_rows, None, None).unwrap();

    std::thread::scope(|scope| {
        let writer = {
            let index = std::sync::Arc::clone(&index);
            scope.spawn(move || {
                for i in 0..200u64 {
                    let v: Vec<f32> = (0..dim).map(|d| (i as f32) + d as f32 * 0.01).collect();
                    index.add_item(&v, Some(1000 + i)).unwrap();
                }
            })
        };
        for _ in 0..3 {
            let index = std::sync::Arc::clone(&index);
            scope.spawn(move || {
                let q: Vec<f32> = vec![1.0; dim];
                for _ in 0..300 {
                    let hits = index.query(&q, 5, Some(32)).unwrap();
                    assert!(hits.len() <= 5);
                    for pair in hits.windows(2) {
                        assert!(pair[0].distance <= pair[1].distance);
                    }
                }
            });
        }
        writer.join().unwrap();
    });
    assert_eq!(index.len(), 264);
}
