//! Tests for merged table views
//!
//! These tests verify:
//! - Newer tables shadow older ones per key
//! - Tombstones hide older values unless deletions are requested
//! - Refs and logs from several tables come back in key order
//! - Table order and hash consistency checks
//! - Object id lookups only report refs that still resolve to the id

use std::sync::Arc;

use bytes::Bytes;
use reftable::{
    HashId, LogEntry, LogRecord, MergedTable, ObjectId, RefRecord, RefSource, RefValue,
    ReftableError, Signature, Table, TableWriter, WriteOptions,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn oid(fill: u8) -> ObjectId {
    ObjectId::from_bytes(&[fill; 20])
}

fn object(name: &str, update_index: u64, fill: u8) -> RefRecord {
    RefRecord::new(name, update_index, RefValue::Object(oid(fill)))
}

fn log(name: &str, update_index: u64, message: &str) -> LogRecord {
    LogRecord::new(
        name,
        update_index,
        LogEntry {
            old_id: oid(0),
            new_id: oid(update_index as u8),
            committer: Signature::new("Tester", "tester@example.com", 1_600_000_000 + update_index, 0),
            message: message.to_string(),
        },
    )
}

fn table(
    name: &str,
    limits: (u64, u64),
    refs: Vec<RefRecord>,
    logs: Vec<LogRecord>,
) -> Arc<Table> {
    table_with(WriteOptions::default(), name, limits, refs, logs)
}

fn table_with(
    options: WriteOptions,
    name: &str,
    limits: (u64, u64),
    refs: Vec<RefRecord>,
    logs: Vec<LogRecord>,
) -> Arc<Table> {
    let mut out = Vec::new();
    {
        let mut writer = TableWriter::new(&mut out, options).unwrap();
        writer.set_limits(limits.0, limits.1).unwrap();
        writer.add_refs(refs).unwrap();
        writer.add_logs(logs).unwrap();
        writer.finish().unwrap();
    }
    Arc::new(Table::from_bytes(name, Bytes::from(out)).unwrap())
}

fn merged(tables: Vec<Arc<Table>>) -> MergedTable {
    MergedTable::new(tables, HashId::Sha1).unwrap()
}

fn names(source: &dyn RefSource, prefix: &str) -> Vec<String> {
    source
        .seek_ref(prefix)
        .unwrap()
        .map(|r| r.unwrap().name)
        .take_while(|name| name.starts_with(prefix))
        .collect()
}

// =============================================================================
// Shadowing Tests
// =============================================================================

#[test]
fn test_newer_table_wins() {
    let view = merged(vec![
        table("t0", (1, 1), vec![object("refs/heads/main", 1, 0xaa)], Vec::new()),
        table("t1", (2, 2), vec![object("refs/heads/main", 2, 0xbb)], Vec::new()),
    ]);

    let main = view.read_ref("refs/heads/main").unwrap().unwrap();
    assert_eq!(main.value, RefValue::Object(oid(0xbb)));
    assert_eq!(main.update_index, 2);
    assert_eq!(names(&view, ""), vec!["refs/heads/main"]);
}

#[test]
fn test_key_present_in_every_table_yields_once() {
    let view = merged(vec![
        table("t0", (1, 1), vec![object("refs/heads/main", 1, 1)], Vec::new()),
        table("t1", (2, 2), vec![object("refs/heads/main", 2, 2)], Vec::new()),
        table("t2", (3, 3), vec![object("refs/heads/main", 3, 3)], Vec::new()),
    ]);

    let all: Vec<RefRecord> = view.seek_ref("").unwrap().map(|r| r.unwrap()).collect();
    assert_eq!(all, vec![object("refs/heads/main", 3, 3)]);
}

#[test]
fn test_tombstone_hides_older_value() {
    let view = merged(vec![
        table(
            "t0",
            (1, 1),
            vec![object("refs/heads/feature", 1, 1), object("refs/heads/main", 1, 2)],
            Vec::new(),
        ),
        table("t1", (2, 2), vec![RefRecord::deletion("refs/heads/feature", 2)], Vec::new()),
    ]);

    assert!(view.read_ref("refs/heads/feature").unwrap().is_none());
    assert_eq!(names(&view, "refs/"), vec!["refs/heads/main"]);
}

#[test]
fn test_with_deletions_shows_tombstones() {
    let view = merged(vec![
        table("t0", (1, 1), vec![object("refs/heads/feature", 1, 1)], Vec::new()),
        table("t1", (2, 2), vec![RefRecord::deletion("refs/heads/feature", 2)], Vec::new()),
    ])
    .with_deletions(true);

    let feature = view.read_ref("refs/heads/feature").unwrap().unwrap();
    assert!(feature.is_deletion());
    assert_eq!(feature.update_index, 2);
}

#[test]
fn test_value_written_after_tombstone_is_visible() {
    let view = merged(vec![
        table("t0", (1, 1), vec![object("refs/heads/topic", 1, 1)], Vec::new()),
        table("t1", (2, 2), vec![RefRecord::deletion("refs/heads/topic", 2)], Vec::new()),
        table("t2", (3, 3), vec![object("refs/heads/topic", 3, 9)], Vec::new()),
    ]);

    let topic = view.read_ref("refs/heads/topic").unwrap().unwrap();
    assert_eq!(topic.value, RefValue::Object(oid(9)));
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_interleaved_names_come_back_sorted() {
    let view = merged(vec![
        table(
            "t0",
            (1, 1),
            vec![object("refs/heads/a", 1, 1), object("refs/heads/c", 1, 1), object("refs/heads/e", 1, 1)],
            Vec::new(),
        ),
        table(
            "t1",
            (2, 2),
            vec![object("refs/heads/b", 2, 2), object("refs/heads/d", 2, 2)],
            Vec::new(),
        ),
    ]);

    assert_eq!(
        names(&view, "refs/heads/"),
        vec!["refs/heads/a", "refs/heads/b", "refs/heads/c", "refs/heads/d", "refs/heads/e"]
    );
    assert_eq!(names(&view, "refs/heads/c"), vec!["refs/heads/c"]);
}

#[test]
fn test_logs_merge_newest_first() {
    let view = merged(vec![
        table("t0", (1, 1), Vec::new(), vec![log("refs/heads/main", 1, "first")]),
        table("t1", (2, 2), Vec::new(), vec![log("refs/heads/main", 2, "second")]),
        table("t2", (3, 3), Vec::new(), vec![log("refs/heads/dev", 3, "dev")]),
    ]);

    let main: Vec<String> = view
        .seek_log("refs/heads/main")
        .unwrap()
        .map(|r| r.unwrap())
        .take_while(|r| r.name == "refs/heads/main")
        .map(|r| r.entry().unwrap().message.clone())
        .collect();
    assert_eq!(main, vec!["second", "first"]);

    let dev = view.read_log("refs/heads/dev").unwrap().unwrap();
    assert_eq!(dev.update_index, 3);
}

#[test]
fn test_update_index_bounds() {
    let view = merged(vec![
        table("t0", (1, 2), vec![object("refs/heads/a", 2, 1)], Vec::new()),
        table("t1", (3, 5), vec![object("refs/heads/b", 5, 1)], Vec::new()),
    ]);
    assert_eq!(view.min_update_index(), 1);
    assert_eq!(view.max_update_index(), 5);
    assert_eq!(view.len(), 2);
}

#[test]
fn test_empty_view() {
    let view = merged(Vec::new());
    assert!(view.is_empty());
    assert_eq!(view.max_update_index(), 0);
    assert!(view.read_ref("HEAD").unwrap().is_none());
    assert_eq!(view.seek_ref("").unwrap().count(), 0);
}

// =============================================================================
// Consistency Check Tests
// =============================================================================

#[test]
fn test_overlapping_tables_rejected() {
    let result = MergedTable::new(
        vec![
            table("t0", (1, 5), Vec::new(), Vec::new()),
            table("t1", (3, 6), Vec::new(), Vec::new()),
        ],
        HashId::Sha1,
    );
    assert!(matches!(result, Err(ReftableError::Format(_))));
}

#[test]
fn test_mixed_hash_rejected() {
    let sha256 = WriteOptions {
        hash_id: HashId::Sha256,
        ..WriteOptions::default()
    };
    let result = MergedTable::new(
        vec![
            table("t0", (1, 1), Vec::new(), Vec::new()),
            table_with(sha256, "t1", (2, 2), Vec::new(), Vec::new()),
        ],
        HashId::Sha1,
    );
    assert!(matches!(result, Err(ReftableError::Format(_))));
}

// =============================================================================
// Object Id Lookup Tests
// =============================================================================

#[test]
fn test_refs_for_oid_skips_shadowed_refs() {
    let view = merged(vec![
        table(
            "t0",
            (1, 1),
            vec![object("refs/heads/main", 1, 0xaa), object("refs/heads/stable", 1, 0xaa)],
            Vec::new(),
        ),
        table("t1", (2, 2), vec![object("refs/heads/main", 2, 0xbb)], Vec::new()),
    ]);

    let on_old: Vec<String> = view
        .refs_for_oid(&oid(0xaa))
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(on_old, vec!["refs/heads/stable"]);

    let on_new = view.refs_for_oid(&oid(0xbb)).unwrap();
    assert_eq!(on_new.len(), 1);
    assert_eq!(on_new[0].name, "refs/heads/main");
}

#[test]
fn test_refs_for_oid_ignores_deleted_refs() {
    let view = merged(vec![
        table("t0", (1, 1), vec![object("refs/heads/old", 1, 0xcc)], Vec::new()),
        table("t1", (2, 2), vec![RefRecord::deletion("refs/heads/old", 2)], Vec::new()),
    ]);
    assert!(view.refs_for_oid(&oid(0xcc)).unwrap().is_empty());
}
