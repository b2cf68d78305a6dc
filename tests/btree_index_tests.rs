use std::collections::HashSet;
use std::sync::Arc;

use rand::prelude::*;
use tempfile::TempDir;

use arbordb::storage::codec::CommonCodec;
use arbordb::{
    ArborError, AttrType, BTreeConfig, BTreeIndex, BufferPoolConfig, BufferPoolManager, RangeOp,
    RecordId, TableHeap,
};

/// Attribute offset used by every test relation: two flag bytes, then the
/// indexed i32, then a short payload.
const ATTR_OFFSET: u32 = 2;

fn record_for(key: i32) -> Vec<u8> {
    let mut record = vec![0xEE, 0xFF];
    record.extend(CommonCodec::encode_i32(key));
    record.extend_from_slice(b"payload");
    record
}

fn setup(pool_size: usize) -> (TempDir, Arc<BufferPoolManager>) {
    let dir = TempDir::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(BufferPoolConfig {
        buffer_pool_size: pool_size,
        ..Default::default()
    }));
    (dir, pool)
}

fn heap_with_keys(
    pool: &Arc<BufferPoolManager>,
    dir: &TempDir,
    keys: &[i32],
) -> (TableHeap, Vec<(i32, RecordId)>) {
    let mut heap = TableHeap::create(pool.clone(), dir.path().join("rel")).unwrap();
    let mut pairs = Vec::with_capacity(keys.len());
    for &key in keys {
        let rid = heap.insert_record(&record_for(key)).unwrap();
        pairs.push((key, rid));
    }
    (heap, pairs)
}

fn collect_scan(index: &mut BTreeIndex) -> Vec<RecordId> {
    let mut out = Vec::new();
    loop {
        match index.scan_next() {
            Ok(rid) => out.push(rid),
            Err(ArborError::IndexScanCompleted) => break,
            Err(e) => panic!("scan failed: {e}"),
        }
    }
    out
}

#[test]
fn empty_relation_scan_completes_immediately() {
    let (dir, pool) = setup(32);
    let (heap, _) = heap_with_keys(&pool, &dir, &[]);
    let mut index = BTreeIndex::new(&heap, pool.clone(), ATTR_OFFSET, AttrType::Int).unwrap();

    index.start_scan(0, RangeOp::GTE, 100, RangeOp::LTE).unwrap();
    assert!(matches!(
        index.scan_next().unwrap_err(),
        ArborError::IndexScanCompleted
    ));
    index.end_scan().unwrap();
}

#[test]
fn unordered_build_scans_in_key_order() {
    let (dir, pool) = setup(32);
    let keys = [5, 3, 8, 1, 9, 2, 7, 4, 6];
    let (heap, pairs) = heap_with_keys(&pool, &dir, &keys);
    let mut index = BTreeIndex::new(&heap, pool.clone(), ATTR_OFFSET, AttrType::Int).unwrap();

    index
        .start_scan(i32::MIN, RangeOp::GTE, i32::MAX, RangeOp::LTE)
        .unwrap();
    let rids = collect_scan(&mut index);
    index.end_scan().unwrap();

    let mut expected = pairs.clone();
    expected.sort_by_key(|(key, _)| *key);
    assert_eq!(
        rids,
        expected.iter().map(|(_, rid)| *rid).collect::<Vec<_>>()
    );
}

#[test]
fn deep_tree_range_scan_is_exact() {
    let (dir, pool) = setup(32);
    let (heap, _) = heap_with_keys(&pool, &dir, &[]);
    let config = BTreeConfig {
        leaf_max_size: 4,
        internal_max_size: 4,
    };
    let mut index =
        BTreeIndex::with_config(&heap, pool.clone(), ATTR_OFFSET, AttrType::Int, config).unwrap();

    // Sequential inserts force repeated splits of the rightmost path,
    // growing the root several times.
    for key in 1..=1000 {
        index.insert_entry(key, RecordId::new(key as u32, 7)).unwrap();
    }

    // The split cascades must have grown the root at least once, and all
    // leaves must sit at the same depth.
    assert!(index.depth().unwrap() > 1);

    index.start_scan(500, RangeOp::GT, 510, RangeOp::LT).unwrap();
    let rids = collect_scan(&mut index);
    index.end_scan().unwrap();
    assert_eq!(
        rids,
        (501..=509).map(|k| RecordId::new(k, 7)).collect::<Vec<_>>()
    );

    assert_eq!(index.lookup(1000).unwrap(), RecordId::new(1000, 7));
}

#[test]
fn mismatched_metadata_is_rejected() {
    let (dir, pool) = setup(32);
    let (heap, _) = heap_with_keys(&pool, &dir, &[1, 2, 3]);
    let index = BTreeIndex::new(&heap, pool.clone(), ATTR_OFFSET, AttrType::Int).unwrap();
    let index_path = index.index_name().to_string();
    drop(index);

    // Masquerade the persisted index as one built over a different
    // attribute offset.
    let alias = format!("{}.{}", heap.path().display(), 6);
    std::fs::copy(&index_path, &alias).unwrap();
    let err = BTreeIndex::new(&heap, pool.clone(), 6, AttrType::Int).unwrap_err();
    assert!(matches!(err, ArborError::BadIndexInfo(_)));
}

#[test]
fn invalid_scan_ranges_and_opcodes() {
    let (dir, pool) = setup(32);
    let (heap, _) = heap_with_keys(&pool, &dir, &[1, 2, 3]);
    let mut index = BTreeIndex::new(&heap, pool.clone(), ATTR_OFFSET, AttrType::Int).unwrap();

    assert!(matches!(
        index.start_scan(10, RangeOp::GT, 5, RangeOp::LT).unwrap_err(),
        ArborError::BadScanrange
    ));
    assert!(matches!(
        index.start_scan(0, RangeOp::LT, 10, RangeOp::LT).unwrap_err(),
        ArborError::BadOpcodes
    ));
    assert!(matches!(
        index.start_scan(0, RangeOp::GTE, 10, RangeOp::GT).unwrap_err(),
        ArborError::BadOpcodes
    ));
    // A failed start leaves no cursor behind.
    assert!(matches!(
        index.scan_next().unwrap_err(),
        ArborError::ScanNotInitialized
    ));
}

#[test]
fn duplicate_keys_are_all_surfaced() {
    let (dir, pool) = setup(32);
    let (heap, _) = heap_with_keys(&pool, &dir, &[]);
    let config = BTreeConfig {
        leaf_max_size: 3,
        internal_max_size: 3,
    };
    let mut index =
        BTreeIndex::with_config(&heap, pool.clone(), ATTR_OFFSET, AttrType::Int, config).unwrap();

    let mut expected = HashSet::new();
    for slot in 0..40u32 {
        index.insert_entry(42, RecordId::new(9, slot)).unwrap();
        expected.insert(RecordId::new(9, slot));
    }
    for key in [41, 43] {
        index.insert_entry(key, RecordId::new(1, key as u32)).unwrap();
    }

    index.start_scan(42, RangeOp::GTE, 42, RangeOp::LTE).unwrap();
    let rids: HashSet<_> = collect_scan(&mut index).into_iter().collect();
    index.end_scan().unwrap();
    assert_eq!(rids, expected);
}

#[test]
fn random_ranges_match_reference_model() {
    let (dir, pool) = setup(64);
    let mut rng = StdRng::seed_from_u64(0xB7EE);
    let mut keys: Vec<i32> = (0..600).map(|_| rng.gen_range(-300..300)).collect();
    keys.shuffle(&mut rng);
    let (heap, pairs) = heap_with_keys(&pool, &dir, &keys);

    let config = BTreeConfig {
        leaf_max_size: 5,
        internal_max_size: 5,
    };
    let mut index =
        BTreeIndex::with_config(&heap, pool.clone(), ATTR_OFFSET, AttrType::Int, config).unwrap();

    for _ in 0..25 {
        let a = rng.gen_range(-350..350);
        let b = rng.gen_range(-350..350);
        let (low, high) = (a.min(b), a.max(b));
        let low_op = if rng.gen_bool(0.5) { RangeOp::GT } else { RangeOp::GTE };
        let high_op = if rng.gen_bool(0.5) { RangeOp::LT } else { RangeOp::LTE };

        index.start_scan(low, low_op, high, high_op).unwrap();
        let got: Vec<RecordId> = collect_scan(&mut index);
        index.end_scan().unwrap();

        let mut expected: Vec<(i32, RecordId)> = pairs
            .iter()
            .filter(|(key, _)| {
                let above = match low_op {
                    RangeOp::GT => *key > low,
                    _ => *key >= low,
                };
                let below = match high_op {
                    RangeOp::LT => *key < high,
                    _ => *key <= high,
                };
                above && below
            })
            .copied()
            .collect();
        expected.sort_by_key(|(key, _)| *key);

        // Keys must come back ordered; rid order among duplicates is
        // unspecified, so compare as multisets per key.
        let got_keys: Vec<i32> = got
            .iter()
            .map(|rid| pairs.iter().find(|(_, r)| r == rid).unwrap().0)
            .collect();
        assert_eq!(
            got_keys,
            expected.iter().map(|(k, _)| *k).collect::<Vec<_>>()
        );
        let got_set: HashSet<RecordId> = got.into_iter().collect();
        let expected_set: HashSet<RecordId> = expected.into_iter().map(|(_, r)| r).collect();
        assert_eq!(got_set, expected_set);
    }
}

#[test]
fn pin_counts_return_to_zero_after_every_operation() {
    let (dir, pool) = setup(16);
    let keys: Vec<i32> = (0..100).collect();
    let (heap, _) = heap_with_keys(&pool, &dir, &keys);
    let config = BTreeConfig {
        leaf_max_size: 4,
        internal_max_size: 4,
    };
    let mut index =
        BTreeIndex::with_config(&heap, pool.clone(), ATTR_OFFSET, AttrType::Int, config).unwrap();

    index.insert_entry(1000, RecordId::new(1, 1)).unwrap();

    let _ = index.start_scan(10, RangeOp::GT, 5, RangeOp::LT);
    let _ = index.start_scan(0, RangeOp::LT, 10, RangeOp::LT);

    index.start_scan(0, RangeOp::GTE, 50, RangeOp::LTE).unwrap();
    index.scan_next().unwrap();
    index.end_scan().unwrap();

    let _ = index.lookup(10).unwrap();

    // Every file known to the pool is pin-free at quiescence.
    for file in 0..4 {
        assert_eq!(pool.pinned_page_count(file), 0, "file {file} holds pins");
    }
}

#[test]
fn persisted_index_reopens_without_rebuild() {
    let (dir, pool) = setup(32);
    let keys = [10, 20, 30, 40, 50];
    let (heap, pairs) = heap_with_keys(&pool, &dir, &keys);
    {
        let mut index = BTreeIndex::new(&heap, pool.clone(), ATTR_OFFSET, AttrType::Int).unwrap();
        index.insert_entry(60, RecordId::new(99, 0)).unwrap();
    }

    // Same parameters: the existing file is opened and verified, not
    // rebuilt.
    let mut index = BTreeIndex::new(&heap, pool.clone(), ATTR_OFFSET, AttrType::Int).unwrap();
    index
        .start_scan(i32::MIN, RangeOp::GTE, i32::MAX, RangeOp::LTE)
        .unwrap();
    let rids = collect_scan(&mut index);
    index.end_scan().unwrap();

    let mut expected: Vec<RecordId> = {
        let mut sorted = pairs.clone();
        sorted.sort_by_key(|(key, _)| *key);
        sorted.into_iter().map(|(_, rid)| rid).collect()
    };
    expected.push(RecordId::new(99, 0));
    assert_eq!(rids, expected);
}

#[test]
fn scan_crosses_leaf_boundaries_mid_range() {
    let (dir, pool) = setup(32);
    let (heap, _) = heap_with_keys(&pool, &dir, &[]);
    let config = BTreeConfig {
        leaf_max_size: 2,
        internal_max_size: 2,
    };
    let mut index =
        BTreeIndex::with_config(&heap, pool.clone(), ATTR_OFFSET, AttrType::Int, config).unwrap();
    for key in [1, 3, 5, 7, 9, 11, 13] {
        index.insert_entry(key, RecordId::new(key as u32, 0)).unwrap();
    }

    // Bounds that fall between stored keys and inside the sibling chain.
    index.start_scan(2, RangeOp::GT, 12, RangeOp::LT).unwrap();
    let rids = collect_scan(&mut index);
    index.end_scan().unwrap();
    assert_eq!(
        rids,
        [3, 5, 7, 9, 11]
            .iter()
            .map(|&k| RecordId::new(k as u32, 0))
            .collect::<Vec<_>>()
    );
}
