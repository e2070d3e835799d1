//! End-to-end scenarios over real key files.

use std::collections::BTreeSet;

use btree::{decode_next, make_key, pack_search_key};
use buffer::{FilePager, PageStore};
use catalog::{KeyDefinition, KeySegment, SegmentFlags};
use common::pretty::{TableStyleKind, render_page_summaries};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use testsupport::prelude::*;
use testsupport::proptest_generators::{IndexOp, arb_ops, arb_text_flags};
use types::KeyType;

fn pointers(range: impl Iterator<Item = u64>) -> Vec<RecordPointer> {
    range.map(RecordPointer).collect()
}

#[test]
fn sequential_numeric_keys_walk_in_order() {
    let config = Config::default();
    let mut fixture = TestKeyFile::new(vec![numeric_key("by_id", true, &config)]);
    for n in 1..=100 {
        fixture.file.insert(0, &numeric_record(n, 6), RecordPointer(n)).unwrap();
    }

    let (record, cursor) = fixture.file.search_first(0).unwrap();
    assert_eq!(record, RecordPointer(1));
    assert_eq!(&cursor.key()[..6], b"000001");
    let (record, _) = fixture.file.search_last(0).unwrap();
    assert_eq!(record, RecordPointer(100));

    assert_walk(&mut fixture.file, 0, &pointers(1..=100));
    let keys = collect_keys(&mut fixture.file, 0).unwrap();
    let distinct: BTreeSet<_> = keys.iter().map(|(key, _)| key.clone()).collect();
    assert_eq!(distinct.len(), 100);
    assert_verified(&mut fixture.file, 0, 100);
}

#[test]
fn front_coded_page_shares_prefixes() {
    let config = Config::default();
    let mut fixture = TestKeyFile::new(vec![packed_text_key("by_word", 8, false, &config)]);
    let words = ["aa", "aab", "aac", "ab"];
    for (ptr, word) in words.iter().enumerate() {
        fixture
            .file
            .insert(0, &text_record(word, 8), RecordPointer(ptr as u64))
            .unwrap();
    }
    fixture.file.flush().unwrap();

    let root = fixture.file.root(0).unwrap().expect("index has a root");
    let mut pager = FilePager::open(&fixture.path, &config).unwrap();
    let page = pager.fetch(root, config.block_length).unwrap();
    assert!(!page.is_internal());

    let data = page.data();
    // "aa" takes eight bytes: two length codes, two characters and the pointer.
    assert_eq!(&data[2..6], &[0, 2, b'a', b'a']);
    assert_eq!(&data[10..13], &[2, 1, b'b']);
    assert_eq!(&data[17..20], &[2, 1, b'c']);
    assert_eq!(&data[24..27], &[1, 1, b'b']);

    let def = fixture.file.definition(0).unwrap();
    let mut decoded = Vec::new();
    let mut pos = 2;
    while pos < data.len() {
        let prev = decoded.last().map(Vec::as_slice);
        let (key, child, next) = decode_next(def, false, data, pos, prev).unwrap();
        assert_eq!(child, None);
        decoded.push(key);
        pos = next;
    }
    let expected: Vec<_> = words
        .iter()
        .enumerate()
        .map(|(ptr, word)| make_key(def, &text_record(word, 8), RecordPointer(ptr as u64)).unwrap())
        .collect();
    assert_eq!(decoded, expected);
}

#[test]
fn second_insert_of_unique_key_is_rejected() {
    let config = Config::default();
    let mut fixture = TestKeyFile::new(vec![numeric_key("by_id", true, &config)]);
    fixture.file.insert(0, &numeric_record(42, 6), RecordPointer(1)).unwrap();

    let result = fixture.file.insert(0, &numeric_record(42, 6), RecordPointer(2));
    assert_duplicate(result, 0, RecordPointer(1));
    assert_walk(&mut fixture.file, 0, &[RecordPointer(1)]);
    assert_verified(&mut fixture.file, 0, 1);
}

#[test]
fn underflowing_child_merges_back_into_root_leaf() {
    let config = small_pages();
    let mut fixture =
        TestKeyFile::with_config(vec![numeric_key("by_id", true, &config)], config.clone());
    for n in 1..=52 {
        fixture.file.insert(0, &numeric_record(n, 6), RecordPointer(n)).unwrap();
    }

    let pages = fixture.file.describe(0).unwrap();
    assert_eq!(pages.len(), 3);
    assert!(pages[0].internal);
    assert_eq!(pages[0].keys, 1);

    fixture.file.delete(0, &numeric_record(52, 6), RecordPointer(52)).unwrap();

    let pages = fixture.file.describe(0).unwrap();
    assert_eq!(pages.len(), 1);
    assert!(!pages[0].internal);
    assert_eq!(pages[0].keys, 51);
    assert_walk(&mut fixture.file, 0, &pointers(1..=51));
    let stats = assert_verified(&mut fixture.file, 0, 51);
    assert_eq!(stats.depth, 1);

    let rendered = render_page_summaries(&pages, TableStyleKind::Ascii);
    assert!(rendered.contains("leaf"));
}

#[test]
fn rank_of_extreme_keys() {
    let config = Config::default();
    let mut fixture = TestKeyFile::new(vec![numeric_key("by_id", true, &config)]);
    for n in 0..1000 {
        fixture.file.insert(0, &numeric_record(n, 6), RecordPointer(n)).unwrap();
    }
    let def = fixture.file.definition(0).unwrap().clone();

    let (min, min_len) = pack_search_key(&def, &[numeric_record(0, 6).as_slice()]).unwrap();
    let (max, max_len) = pack_search_key(&def, &[numeric_record(999, 6).as_slice()]).unwrap();
    let low = fixture.file.approximate_rank(0, Some((min.as_slice(), min_len))).unwrap();
    let high = fixture.file.approximate_rank(0, Some((max.as_slice(), max_len))).unwrap();

    assert!(low < 0.05, "rank of the smallest key was {low}");
    assert!(high > 0.95, "rank of the largest key was {high}");
    assert_eq!(fixture.file.approximate_rank(0, None).unwrap(), 0.0);
}

#[test]
fn composite_key_orders_by_code_then_number() {
    let config = Config::default();
    let mut fixture = TestKeyFile::new(vec![composite_key("by_code", true, &config)]);
    let rows = [("ab", 5u32, 1), ("ab", 1, 2), ("aa", 300, 3), ("ac", 0, 4)];
    for (code, seq, ptr) in rows {
        fixture
            .file
            .insert(0, &composite_record(code, seq), RecordPointer(ptr))
            .unwrap();
    }
    assert_walk(&mut fixture.file, 0, &pointers([3, 2, 1, 4].into_iter()));

    let def = fixture.file.definition(0).unwrap();
    let (key, length) = pack_search_key(def, &[b"ab".as_slice()]).unwrap();
    let KeyLength::Prefix(prefix) = length else {
        panic!("partial key without a length limit");
    };
    let (record, cursor) = fixture.file.search(0, &key, length, ReadMode::Exact).unwrap();
    assert_eq!(record, RecordPointer(2));
    let (record, cursor) = fixture.file.search_next_same(&cursor, prefix).unwrap();
    assert_eq!(record, RecordPointer(1));
    assert!(matches!(
        fixture.file.search_next_same(&cursor, prefix),
        Err(IndexError::EndOfIndex)
    ));
}

#[test]
fn reopened_file_keeps_all_indexes() {
    let config = small_pages();
    let definitions = vec![
        numeric_key("by_id", true, &config),
        KeyDefinition::new(
            "by_name",
            vec![
                KeySegment::new(KeyType::Text, 6, 8)
                    .with_flags(SegmentFlags::SPACE_PACK | SegmentFlags::PACK_KEY),
            ],
            false,
            &config,
        )
        .unwrap(),
    ];
    let mut fixture = TestKeyFile::with_config(definitions, config);
    for n in 0..250u64 {
        let mut record = numeric_record(n, 6);
        record.extend(text_record(&format!("n{}", n % 17), 8));
        fixture.file.write_record(&record, RecordPointer(n)).unwrap();
    }
    let changes = fixture.file.changes();

    let mut fixture = fixture.reopen().unwrap();
    assert_eq!(fixture.file.changes(), changes);
    assert_walk(&mut fixture.file, 0, &pointers(0..250));
    assert_verified(&mut fixture.file, 0, 250);
    assert_verified(&mut fixture.file, 1, 250);
}

#[test]
fn damaged_page_header_is_reported() {
    let config = Config::default();
    let mut fixture = TestKeyFile::new(vec![numeric_key("by_id", true, &config)]);
    fixture.file.insert(0, &numeric_record(1, 6), RecordPointer(1)).unwrap();
    fixture.file.flush().unwrap();
    let root = fixture.file.root(0).unwrap().expect("index has a root");
    drop(fixture.file);
    let path = fixture.path.clone();

    let mut bytes = std::fs::read(&path).unwrap();
    let at = root.0 as usize;
    bytes[at..at + 2].copy_from_slice(&0x7fffu16.to_be_bytes());
    std::fs::write(&path, bytes).unwrap();

    let mut file = KeyFile::open(&path, &config).unwrap();
    assert_crashed(file.search_first(0));
    assert_crashed(file.verify(0));
}

#[test]
fn child_pointer_back_to_root_is_reported() {
    let config = small_pages();
    let mut fixture =
        TestKeyFile::with_config(vec![numeric_key("by_id", true, &config)], config.clone());
    for n in 0..200 {
        fixture.file.insert(0, &numeric_record(n, 6), RecordPointer(n)).unwrap();
    }
    fixture.file.flush().unwrap();
    let root = fixture.file.root(0).unwrap().expect("index has a root");
    let width = fixture.file.definition(0).unwrap().node_pointer;
    drop(fixture.file);
    let path = fixture.path.clone();

    // The first child pointer follows the page header; aim it at the root itself.
    let mut pointer = Vec::new();
    assert!(width.encode(root.0 / 512, &mut pointer));
    let mut bytes = std::fs::read(&path).unwrap();
    let at = root.0 as usize + 2;
    bytes[at..at + pointer.len()].copy_from_slice(&pointer);
    std::fs::write(&path, bytes).unwrap();

    let mut file = KeyFile::open(&path, &config).unwrap();
    let def = file.definition(0).unwrap().clone();
    let (key, length) = pack_search_key(&def, &[numeric_record(0, 6).as_slice()]).unwrap();
    assert_crashed(file.search_first(0));
    assert_crashed(file.search(0, &key, length, ReadMode::Exact));
    assert_crashed(file.search(0, &key, length, ReadMode::KeyOrPrev));
    assert_crashed(file.insert(0, &numeric_record(0, 6), RecordPointer(500)));
    assert_crashed(file.delete(0, &numeric_record(0, 6), RecordPointer(0)));
    assert_crashed(file.approximate_rank(0, Some((key.as_slice(), length))));
    assert_crashed(file.verify(0));
    let (record, _) = file.search_last(0).unwrap();
    assert_eq!(record, RecordPointer(199));
}

#[test]
fn ascending_and_descending_workloads_stay_half_full() {
    let config = small_pages();
    let mut fixture =
        TestKeyFile::with_config(vec![numeric_key("by_id", true, &config)], config.clone());
    for n in 0..1500 {
        fixture.file.insert(0, &numeric_record(n, 6), RecordPointer(n)).unwrap();
    }
    assert_balanced(&mut fixture.file, 0, 1500);

    for n in (0..1500).rev().filter(|n| n % 3 != 0) {
        fixture.file.delete(0, &numeric_record(n, 6), RecordPointer(n)).unwrap();
    }
    let stats = assert_balanced(&mut fixture.file, 0, 500);
    assert!(stats.depth >= 2);
    assert_walk(&mut fixture.file, 0, &pointers((0..1500).step_by(3)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn random_workload_matches_model(flags in arb_text_flags(), ops in arb_ops(8, 300)) {
        let config = small_pages();
        let definitions = vec![text_key("by_word", 8, flags, false, &config)];
        let mut fixture = TestKeyFile::with_config(definitions, config);
        let mut model: BTreeSet<(String, u64)> = BTreeSet::new();
        let mut next_ptr = 0;
        for op in ops {
            match op {
                IndexOp::Insert(word) => {
                    fixture
                        .file
                        .insert(0, &text_record(&word, 8), RecordPointer(next_ptr))
                        .unwrap();
                    model.insert((word, next_ptr));
                    next_ptr += 1;
                }
                IndexOp::Delete(pick) if !model.is_empty() => {
                    let (word, ptr) = model.iter().nth(pick % model.len()).cloned().unwrap();
                    fixture.file.delete(0, &text_record(&word, 8), RecordPointer(ptr)).unwrap();
                    model.remove(&(word, ptr));
                }
                IndexOp::Delete(_) => {}
            }
        }

        let expected: Vec<_> = model.iter().map(|(_, ptr)| RecordPointer(*ptr)).collect();
        assert_walk(&mut fixture.file, 0, &expected);
        assert_balanced(&mut fixture.file, 0, model.len() as u64);
    }

    #[test]
    fn delete_then_reinsert_restores_search_results(
        flags in arb_text_flags(),
        ops in arb_ops(8, 200),
        pick in any::<usize>(),
    ) {
        let config = small_pages();
        let definitions = vec![text_key("by_word", 8, flags, false, &config)];
        let mut fixture = TestKeyFile::with_config(definitions, config);
        let mut next_ptr = 0;
        for op in ops {
            if let IndexOp::Insert(word) = op {
                fixture.file.insert(0, &text_record(&word, 8), RecordPointer(next_ptr)).unwrap();
                next_ptr += 1;
            }
        }

        let before = collect_keys(&mut fixture.file, 0).unwrap();
        prop_assume!(!before.is_empty());
        let (key, _) = before[pick % before.len()].clone();
        fixture.file.delete_key(0, &key).unwrap();
        fixture.file.insert_key(0, &key).unwrap();

        let after = collect_keys(&mut fixture.file, 0).unwrap();
        prop_assert_eq!(after, before);
        assert_verified(&mut fixture.file, 0, next_ptr);
    }
}
