//! Tests for the table writer and reader
//!
//! These tests verify:
//! - Empty and single-record tables
//! - Multi-block tables with a ref index
//! - Seeking refs and logs, reads of deleted refs
//! - Reverse lookups through the object index and by full scan
//! - Writer misuse errors
//! - Detection of corrupt tables
//! - File-backed readers

use std::fs;

use reftable::record::{LogRecord, RefRecord, BLOCK_TYPE_REF, HASH_SIZE};
use reftable::table::{ByteBlockSource, Reader, Table, Writer, TABLE_OVERHEAD};
use reftable::{read_log_at, read_ref, Config, ReftableError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn oid(b: u8) -> Vec<u8> {
    vec![b; HASH_SIZE]
}

fn branch(i: usize) -> String {
    format!("refs/heads/branch{:04}", i)
}

fn log_entry(name: &str, update_index: u64) -> LogRecord {
    LogRecord {
        ref_name: name.to_string(),
        update_index,
        old: Some(oid(update_index as u8)),
        new: Some(oid(update_index as u8 + 1)),
        name: "Jane Doe".to_string(),
        email: "jane@example.com".to_string(),
        time: 1_600_000_000 + update_index,
        tz_offset: 100,
        message: format!("update {}", update_index),
    }
}

fn table_bytes(config: &Config, min: u64, max: u64, refs: &[RefRecord], logs: &[LogRecord]) -> Vec<u8> {
    let mut writer = Writer::in_memory(config);
    writer.set_limits(min, max).unwrap();
    for r in refs {
        writer.add_ref(r).unwrap();
    }
    for l in logs {
        writer.add_log(l).unwrap();
    }
    writer.close().unwrap();
    writer.into_inner()
}

fn build_table(config: &Config, min: u64, max: u64, refs: &[RefRecord], logs: &[LogRecord]) -> Reader {
    let bytes = table_bytes(config, min, max, refs, logs);
    Reader::open(Box::new(ByteBlockSource::new(bytes)), "test.ref").unwrap()
}

fn small_blocks() -> Config {
    Config::builder().block_size(256).restart_interval(4).build()
}

fn many_refs(count: usize) -> Vec<RefRecord> {
    (0..count)
        .map(|i| RefRecord::val1(branch(i), 5, oid((i % 7) as u8)))
        .collect()
}

// =============================================================================
// Basic Tests
// =============================================================================

#[test]
fn test_empty_table() {
    let reader = build_table(&Config::default(), 1, 1, &[], &[]);

    assert_eq!(reader.size(), TABLE_OVERHEAD);
    assert_eq!(reader.min_update_index(), 1);
    assert_eq!(reader.max_update_index(), 1);
    assert!(read_ref(&reader, "refs/heads/main").unwrap().is_none());
    assert_eq!(reader.seek_ref("").unwrap().count(), 0);
    assert_eq!(reader.seek_log("", u64::MAX).unwrap().count(), 0);
}

#[test]
fn test_single_ref() {
    let rec = RefRecord::val1("refs/heads/main", 42, oid(1));
    let reader = build_table(&Config::default(), 40, 50, &[rec.clone()], &[]);

    assert_eq!(read_ref(&reader, "refs/heads/main").unwrap(), Some(rec));
    assert!(read_ref(&reader, "refs/heads/mai").unwrap().is_none());
    assert!(read_ref(&reader, "refs/heads/main2").unwrap().is_none());
}

#[test]
fn test_all_ref_value_types() {
    let refs = vec![
        RefRecord::symref("HEAD", 3, "refs/heads/main"),
        RefRecord::deletion("refs/heads/gone", 3),
        RefRecord::val1("refs/heads/main", 3, oid(1)),
        RefRecord::val2("refs/tags/v1.0", 3, oid(2), oid(3)),
    ];
    let reader = build_table(&Config::default(), 3, 3, &refs, &[]);

    let read: Vec<RefRecord> = reader.seek_ref("").unwrap().map(Result::unwrap).collect();
    assert_eq!(read, refs);

    // Deletions are stored but read as absent
    assert!(read_ref(&reader, "refs/heads/gone").unwrap().is_none());
    assert_eq!(read_ref(&reader, "HEAD").unwrap().unwrap().target(), Some("refs/heads/main"));
}

// =============================================================================
// Multi-Block Tests
// =============================================================================

#[test]
fn test_many_refs_span_blocks() {
    let refs = many_refs(200);
    let reader = build_table(&small_blocks(), 5, 5, &refs, &[]);

    assert!(reader.has_ref_index());
    for rec in &refs {
        assert_eq!(read_ref(&reader, &rec.ref_name).unwrap().as_ref(), Some(rec));
    }

    let all: Vec<RefRecord> = reader.seek_ref("").unwrap().map(Result::unwrap).collect();
    assert_eq!(all, refs);
}

#[test]
fn test_seek_ref_positions_mid_table() {
    let refs = many_refs(100);
    let reader = build_table(&small_blocks(), 5, 5, &refs, &[]);

    // Between branch0041 and branch0042
    let from: Vec<String> = reader
        .seek_ref("refs/heads/branch0041x")
        .unwrap()
        .map(|r| r.unwrap().ref_name)
        .collect();
    assert_eq!(from.len(), 58);
    assert_eq!(from[0], branch(42));

    assert_eq!(reader.seek_ref("refs/heads/zzz").unwrap().count(), 0);
}

#[test]
fn test_single_block_has_no_ref_index() {
    let reader = build_table(&Config::default(), 5, 5, &many_refs(3), &[]);
    assert!(!reader.has_ref_index());
}

#[test]
fn test_oversized_record_gets_own_block() {
    let config = Config::builder().block_size(64).build();
    let target = format!("refs/heads/{}", "x".repeat(300));
    let refs = vec![
        RefRecord::val1("refs/heads/a", 1, oid(1)),
        RefRecord::symref("refs/heads/b", 1, target.clone()),
        RefRecord::val1("refs/heads/c", 1, oid(2)),
    ];
    let reader = build_table(&config, 1, 1, &refs, &[]);

    let b = read_ref(&reader, "refs/heads/b").unwrap().unwrap();
    assert_eq!(b.target(), Some(target.as_str()));
    assert_eq!(read_ref(&reader, "refs/heads/c").unwrap().unwrap().value(), Some(oid(2).as_slice()));
}

// =============================================================================
// Log Tests
// =============================================================================

#[test]
fn test_logs_newest_first() {
    let logs: Vec<LogRecord> = (1..=50)
        .rev()
        .map(|i| log_entry("refs/heads/main", i))
        .chain((1..=3).rev().map(|i| log_entry("refs/heads/other", i)))
        .collect();
    let reader = build_table(&small_blocks(), 1, 50, &[], &logs);

    let read: Vec<LogRecord> = reader.seek_log("", u64::MAX).unwrap().map(Result::unwrap).collect();
    assert_eq!(read, logs);

    assert_eq!(read_log_at(&reader, "refs/heads/main", 25).unwrap().unwrap().update_index, 25);
    assert_eq!(read_log_at(&reader, "refs/heads/main", 1000).unwrap().unwrap().update_index, 50);
    assert!(read_log_at(&reader, "refs/heads/main", 0).unwrap().is_none());
    assert!(read_log_at(&reader, "refs/heads/missing", 10).unwrap().is_none());
}

#[test]
fn test_log_seeks_across_many_blocks() {
    // Ten refs with twenty entries each, spread over many small log blocks
    let names: Vec<String> = (0..10).map(branch).collect();
    let logs: Vec<LogRecord> = names
        .iter()
        .flat_map(|name| (1..=20).rev().map(move |i| log_entry(name, i)))
        .collect();
    let reader = build_table(&small_blocks(), 1, 20, &[], &logs);
    assert!(reader.size() > 10 * 256);

    // Every seek after the first reuses the block positions it collected
    for _ in 0..2 {
        for name in &names {
            for at in [1, 7, 20, 500] {
                let rec = read_log_at(&reader, name, at).unwrap().unwrap();
                assert_eq!(rec.ref_name, *name);
                assert_eq!(rec.update_index, at.min(20));
            }
            assert!(read_log_at(&reader, name, 0).unwrap().is_none());
        }
    }

    assert!(read_log_at(&reader, "refs/heads/a", 5).unwrap().is_none());
    assert!(read_log_at(&reader, "refs/tags/z", 5).unwrap().is_none());
    let first = reader.seek_log("", u64::MAX).unwrap().next().unwrap().unwrap();
    assert_eq!(first, logs[0]);
}

#[test]
fn test_refs_and_logs_together() {
    let refs = vec![RefRecord::val1("refs/heads/main", 7, oid(7))];
    let logs = vec![log_entry("refs/heads/main", 7), log_entry("refs/heads/main", 6)];
    let reader = build_table(&Config::default(), 6, 7, &refs, &logs);

    assert_eq!(read_ref(&reader, "refs/heads/main").unwrap().unwrap().update_index, 7);
    assert_eq!(read_log_at(&reader, "refs/heads/main", 6).unwrap().unwrap().message, "update 6");
}

#[test]
fn test_log_tombstone_survives() {
    let tombstone = LogRecord {
        ref_name: "refs/heads/main".to_string(),
        update_index: 4,
        ..Default::default()
    };
    let reader = build_table(&Config::default(), 4, 4, &[], &[tombstone.clone()]);

    assert_eq!(read_log_at(&reader, "refs/heads/main", 4).unwrap(), Some(tombstone));
}

// =============================================================================
// Object Index Tests
// =============================================================================

#[test]
fn test_refs_for_uses_object_index() {
    let refs = many_refs(100);
    let reader = build_table(&small_blocks(), 5, 5, &refs, &[]);
    assert!(reader.has_obj_index());

    let found = reader.refs_for(&oid(3)).unwrap();
    let expected: Vec<RefRecord> = refs.iter().filter(|r| r.points_to(&oid(3))).cloned().collect();
    assert_eq!(found, expected);

    assert!(reader.refs_for(&oid(99)).unwrap().is_empty());
}

#[test]
fn test_refs_for_across_many_obj_blocks() {
    // Distinct ids give an object index spanning several blocks
    let refs: Vec<RefRecord> = (0..200)
        .map(|i| RefRecord::val1(branch(i), 5, vec![i as u8; HASH_SIZE]))
        .collect();
    let reader = build_table(&small_blocks(), 5, 5, &refs, &[]);
    assert!(reader.has_obj_index());

    for _ in 0..2 {
        for (i, r) in refs.iter().enumerate() {
            let found = reader.refs_for(&[i as u8; HASH_SIZE]).unwrap();
            assert_eq!(found, vec![r.clone()]);
        }
    }
    assert!(reader.refs_for(&[0xff; HASH_SIZE]).unwrap().is_empty());
}

#[test]
fn test_refs_for_without_object_index() {
    let config = Config::builder().block_size(256).index_objects(false).build();
    let refs = many_refs(50);
    let reader = build_table(&config, 5, 5, &refs, &[]);
    assert!(!reader.has_obj_index());

    let found = reader.refs_for(&oid(2)).unwrap();
    assert_eq!(found.len(), refs.iter().filter(|r| r.points_to(&oid(2))).count());
    assert!(found.iter().all(|r| r.points_to(&oid(2))));
}

#[test]
fn test_refs_for_peeled_value() {
    let refs = vec![
        RefRecord::val1("refs/heads/main", 1, oid(1)),
        RefRecord::val2("refs/tags/v1", 1, oid(2), oid(1)),
    ];
    let reader = build_table(&Config::default(), 1, 1, &refs, &[]);

    let found: Vec<String> = reader.refs_for(&oid(1)).unwrap().into_iter().map(|r| r.ref_name).collect();
    assert_eq!(found, vec!["refs/heads/main", "refs/tags/v1"]);
}

// =============================================================================
// Writer Error Tests
// =============================================================================

#[test]
fn test_writer_rejects_out_of_order_refs() {
    let mut writer = Writer::in_memory(&Config::default());
    writer.set_limits(1, 1).unwrap();
    writer.add_ref(&RefRecord::val1("refs/heads/b", 1, oid(1))).unwrap();

    let err = writer.add_ref(&RefRecord::val1("refs/heads/a", 1, oid(1))).unwrap_err();
    assert!(matches!(err, ReftableError::Api(_)));
    let err = writer.add_ref(&RefRecord::val1("refs/heads/b", 1, oid(1))).unwrap_err();
    assert!(matches!(err, ReftableError::Api(_)));
}

#[test]
fn test_writer_rejects_update_index_outside_limits() {
    let mut writer = Writer::in_memory(&Config::default());
    writer.set_limits(5, 6).unwrap();

    assert!(writer.add_ref(&RefRecord::val1("a", 4, oid(1))).is_err());
    assert!(writer.add_ref(&RefRecord::val1("a", 7, oid(1))).is_err());
    writer.add_ref(&RefRecord::val1("a", 6, oid(1))).unwrap();
}

#[test]
fn test_writer_tracks_lowest_offered_update_index() {
    let mut writer = Writer::in_memory(&Config::default());
    writer.set_limits(5, 6).unwrap();
    assert_eq!(writer.observed_min_update_index(), None);

    writer.add_ref(&RefRecord::val1("a", 6, oid(1))).unwrap();
    assert_eq!(writer.observed_min_update_index(), Some(6));

    // Rejected records still count
    let err = writer.add_ref(&RefRecord::val1("b", 3, oid(1))).unwrap_err();
    assert!(matches!(err, ReftableError::Api(_)));
    assert_eq!(writer.observed_min_update_index(), Some(3));
    assert_eq!(writer.min_update_index(), 5);

    writer.add_log(&log_entry("a", 4)).unwrap();
    assert_eq!(writer.observed_min_update_index(), Some(3));
}

#[test]
fn test_writer_rejects_refs_after_logs() {
    let mut writer = Writer::in_memory(&Config::default());
    writer.set_limits(1, 1).unwrap();
    writer.add_log(&log_entry("refs/heads/main", 1)).unwrap();

    let err = writer.add_ref(&RefRecord::val1("refs/heads/main", 1, oid(1))).unwrap_err();
    assert!(matches!(err, ReftableError::Api(_)));
}

#[test]
fn test_writer_limits_fixed_after_first_record() {
    let mut writer = Writer::in_memory(&Config::default());
    assert!(writer.set_limits(3, 2).is_err());
    writer.set_limits(1, 2).unwrap();
    writer.add_ref(&RefRecord::val1("a", 1, oid(1))).unwrap();

    assert!(writer.set_limits(1, 5).is_err());
    assert_eq!(writer.min_update_index(), 1);
    assert_eq!(writer.stats().refs, 1);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_open_rejects_corruption() {
    let good = table_bytes(&Config::default(), 1, 1, &many_refs(5), &[]);

    let mut bad_crc = good.clone();
    let last = bad_crc.len() - 1;
    bad_crc[last] ^= 0xff;

    let mut bad_magic = good.clone();
    bad_magic[0] = b'X';

    let short = good[..10].to_vec();

    for bytes in [bad_crc, bad_magic, short] {
        let err = Reader::open(Box::new(ByteBlockSource::new(bytes)), "bad.ref")
            .err()
            .expect("corrupt table must not open");
        assert!(matches!(err, ReftableError::Format(_)), "{}", err);
    }
}

#[test]
fn test_corrupt_block_surfaces_on_read() {
    let mut bytes = table_bytes(&Config::default(), 1, 1, &many_refs(5), &[]);
    // First block starts right after the header; break its type byte
    bytes[24] = b'z';
    let reader = Reader::open(Box::new(ByteBlockSource::new(bytes)), "bad.ref").unwrap();

    let mut iter = reader.iter(BLOCK_TYPE_REF);
    assert!(matches!(iter.next(), Some(Err(ReftableError::Format(_)))));
    assert!(iter.next().is_none());
}

// =============================================================================
// File Tests
// =============================================================================

#[test]
fn test_open_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("000000000001-000000000001.ref");
    fs::write(&path, table_bytes(&Config::default(), 1, 1, &many_refs(10), &[])).unwrap();

    let reader = Reader::open_file(&path).unwrap();
    assert_eq!(reader.name(), "000000000001-000000000001.ref");
    assert_eq!(reader.size(), fs::metadata(&path).unwrap().len());
    assert!(read_ref(&reader, &branch(9)).unwrap().is_some());
}

#[test]
fn test_open_missing_file() {
    let temp = TempDir::new().unwrap();
    let err = Reader::open_file(&temp.path().join("nope.ref")).err().unwrap();
    assert!(matches!(err, ReftableError::Io(_)));
}
