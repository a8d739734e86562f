//! Tests for the table stack
//!
//! These tests verify:
//! - Transactions commit as new tables with increasing update indexes
//! - Compare-and-swap expectations and transaction validation
//! - Renames and reflog entries
//! - Full and geometric compaction
//! - Several writers racing on one directory
//! - Cleaning orphaned files and reopening a stack

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use reftable::stack::{
    parse_table_name, read_list, suggest_compaction_segment, COMPACTION_LOCK_FILE, LIST_FILE,
    LIST_LOCK_FILE,
};
use reftable::{
    Config, HashId, LogEntry, ObjectId, RefSource, RefUpdate, RefValue, ReftableError, Signature,
    Stack, Transaction,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn oid(fill: u8) -> ObjectId {
    ObjectId::from_bytes(&[fill; 20])
}

fn committer() -> Signature {
    Signature::new("Test User", "test@example.com", 1_700_000_000, 60)
}

fn config(dir: &Path) -> reftable::config::ConfigBuilder {
    Config::builder().dir(dir).auto_compact(false)
}

fn setup_temp_stack() -> (TempDir, Stack) {
    let temp_dir = TempDir::new().unwrap();
    let stack = Stack::open(config(temp_dir.path()).build()).unwrap();
    (temp_dir, stack)
}

fn set(stack: &Stack, name: &str, fill: u8) -> u64 {
    stack
        .apply_transaction(Transaction::new().update(RefUpdate::new(name, RefValue::Object(oid(fill)))))
        .unwrap()
}

fn value(stack: &Stack, name: &str) -> Option<RefValue> {
    stack.resolve(name).unwrap().map(|(value, _)| value)
}

// =============================================================================
// Transaction Tests
// =============================================================================

#[test]
fn test_open_creates_empty_stack() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("refs");
    let stack = Stack::open(config(&dir).build()).unwrap();

    assert!(dir.is_dir());
    assert!(stack.table_names().is_empty());
    assert_eq!(stack.next_update_index(), 1);
    assert!(stack.resolve("HEAD").unwrap().is_none());
}

#[test]
fn test_each_transaction_adds_a_table() {
    let (temp_dir, stack) = setup_temp_stack();

    assert_eq!(set(&stack, "refs/heads/main", 1), 1);
    assert_eq!(set(&stack, "refs/heads/main", 2), 2);

    let names = stack.table_names();
    assert_eq!(names.len(), 2);
    assert_eq!(parse_table_name(&names[0]), Some((1, 1)));
    assert_eq!(parse_table_name(&names[1]), Some((2, 2)));
    assert_eq!(read_list(&temp_dir.path().join(LIST_FILE)).unwrap(), names);
    assert!(!temp_dir.path().join(LIST_LOCK_FILE).exists());

    assert_eq!(stack.resolve("refs/heads/main").unwrap(), Some((RefValue::Object(oid(2)), 2)));
}

#[test]
fn test_transaction_updates_share_update_index() {
    let (_temp_dir, stack) = setup_temp_stack();
    let tx = Transaction::new()
        .update(RefUpdate::new("refs/heads/a", RefValue::Object(oid(1))))
        .update(RefUpdate::new("refs/heads/b", RefValue::Object(oid(2))))
        .update(RefUpdate::new("HEAD", RefValue::Symbolic("refs/heads/a".into())));
    assert_eq!(stack.apply_transaction(tx).unwrap(), 1);

    let refs = stack.iterate("").unwrap();
    assert_eq!(refs.len(), 3);
    for (name, _) in &refs {
        assert_eq!(stack.resolve(name).unwrap().unwrap().1, 1);
    }
    assert_eq!(stack.table_names().len(), 1);
}

#[test]
fn test_delete_hides_ref() {
    let (_temp_dir, stack) = setup_temp_stack();
    set(&stack, "refs/heads/topic", 1);
    stack
        .apply_transaction(Transaction::new().update(RefUpdate::delete("refs/heads/topic")))
        .unwrap();

    assert!(!stack.exists("refs/heads/topic").unwrap());
    assert!(stack.iterate("refs/").unwrap().is_empty());
}

#[test]
fn test_iterate_prefix() {
    let (_temp_dir, stack) = setup_temp_stack();
    set(&stack, "refs/heads/main", 1);
    set(&stack, "refs/tags/v1", 2);
    set(&stack, "refs/heads/dev", 3);

    let heads: Vec<String> = stack
        .iterate("refs/heads/")
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(heads, vec!["refs/heads/dev", "refs/heads/main"]);
}

#[test]
fn test_create_fails_when_ref_exists() {
    let (_temp_dir, stack) = setup_temp_stack();
    set(&stack, "refs/heads/main", 1);

    let result = stack.apply_transaction(
        Transaction::new().update(RefUpdate::create("refs/heads/main", RefValue::Object(oid(2)))),
    );
    assert!(matches!(result, Err(ReftableError::Conflict { ref name, .. }) if name == "refs/heads/main"));
    assert_eq!(stack.next_update_index(), 2);
    assert_eq!(value(&stack, "refs/heads/main"), Some(RefValue::Object(oid(1))));
}

#[test]
fn test_expected_value_mismatch() {
    let (_temp_dir, stack) = setup_temp_stack();
    set(&stack, "refs/heads/main", 1);

    let stale = RefUpdate::new("refs/heads/main", RefValue::Object(oid(3))).expect(RefValue::Object(oid(9)));
    assert!(matches!(
        stack.apply_transaction(Transaction::new().update(stale)),
        Err(ReftableError::Conflict { .. })
    ));

    let fresh = RefUpdate::new("refs/heads/main", RefValue::Object(oid(3))).expect(RefValue::Object(oid(1)));
    assert_eq!(stack.apply_transaction(Transaction::new().update(fresh)).unwrap(), 2);
}

#[test]
fn test_failed_expectation_aborts_whole_transaction() {
    let (_temp_dir, stack) = setup_temp_stack();
    let tx = Transaction::new()
        .update(RefUpdate::new("refs/heads/a", RefValue::Object(oid(1))))
        .update(RefUpdate::delete("refs/heads/missing").expect(RefValue::Object(oid(1))));

    assert!(matches!(stack.apply_transaction(tx), Err(ReftableError::Conflict { .. })));
    assert!(!stack.exists("refs/heads/a").unwrap());
    assert!(stack.table_names().is_empty());
}

#[test]
fn test_invalid_transactions_rejected() {
    let (_temp_dir, stack) = setup_temp_stack();

    assert!(matches!(
        stack.apply_transaction(Transaction::new()),
        Err(ReftableError::InvalidState(_))
    ));

    let duplicate = Transaction::new()
        .update(RefUpdate::new("refs/heads/a", RefValue::Object(oid(1))))
        .update(RefUpdate::delete("refs/heads/a"));
    assert!(matches!(
        stack.apply_transaction(duplicate),
        Err(ReftableError::DuplicateName(_))
    ));

    let bad_name = Transaction::new().update(RefUpdate::new("refs/heads/a\nb", RefValue::Object(oid(1))));
    assert!(matches!(
        stack.apply_transaction(bad_name),
        Err(ReftableError::InvalidName(_))
    ));
    assert!(stack.table_names().is_empty());
}

// =============================================================================
// Reflog Tests
// =============================================================================

#[test]
fn test_logged_updates_record_old_and_new_ids() {
    let (_temp_dir, stack) = setup_temp_stack();
    for fill in 1..=3u8 {
        let update = RefUpdate::new("refs/heads/main", RefValue::Object(oid(fill)))
            .with_log(committer(), format!("commit {}", fill));
        stack.apply_transaction(Transaction::new().update(update)).unwrap();
    }

    let log = stack.log("refs/heads/main").unwrap();
    let indexes: Vec<u64> = log.iter().map(|r| r.update_index).collect();
    assert_eq!(indexes, vec![3, 2, 1]);

    let newest = log[0].entry().unwrap();
    assert_eq!(newest.old_id, oid(2));
    assert_eq!(newest.new_id, oid(3));
    assert_eq!(newest.message, "commit 3");

    let oldest = log[2].entry().unwrap();
    assert!(oldest.old_id.is_zero());
    assert!(stack.has_log("refs/heads/main").unwrap());
    assert!(!stack.has_log("refs/heads/other").unwrap());
}

#[test]
fn test_append_logs() {
    let (_temp_dir, stack) = setup_temp_stack();
    let entries: Vec<LogEntry> = (1..=3u8)
        .map(|i| LogEntry {
            old_id: oid(i - 1),
            new_id: oid(i),
            committer: committer(),
            message: format!("imported {}", i),
        })
        .collect();

    assert_eq!(stack.append_logs("refs/heads/main", entries).unwrap(), 3);
    assert_eq!(stack.table_names().len(), 1);
    assert!(stack.resolve("refs/heads/main").unwrap().is_none());

    let messages: Vec<String> = stack
        .log("refs/heads/main")
        .unwrap()
        .iter()
        .map(|r| r.entry().unwrap().message.clone())
        .collect();
    assert_eq!(messages, vec!["imported 3", "imported 2", "imported 1"]);

    assert!(matches!(
        stack.append_logs("refs/heads/main", Vec::new()),
        Err(ReftableError::InvalidState(_))
    ));
}

#[test]
fn test_rename_ref() {
    let (_temp_dir, stack) = setup_temp_stack();
    set(&stack, "refs/heads/master", 7);

    let update_index = stack
        .rename_ref("refs/heads/master", "refs/heads/main", false, committer(), "rename")
        .unwrap();
    assert_eq!(update_index, 2);
    assert!(!stack.exists("refs/heads/master").unwrap());
    assert_eq!(value(&stack, "refs/heads/main"), Some(RefValue::Object(oid(7))));

    let deleted = stack.read_log("refs/heads/master").unwrap().unwrap();
    assert_eq!(deleted.entry().unwrap().old_id, oid(7));
    assert!(deleted.entry().unwrap().new_id.is_zero());
    let created = stack.read_log("refs/heads/main").unwrap().unwrap();
    assert_eq!(created.entry().unwrap().old_id, oid(7));
    assert_eq!(created.entry().unwrap().new_id, oid(7));
}

#[test]
fn test_rename_missing_or_onto_existing_fails() {
    let (_temp_dir, stack) = setup_temp_stack();
    set(&stack, "refs/heads/a", 1);
    set(&stack, "refs/heads/b", 2);

    assert!(matches!(
        stack.rename_ref("refs/heads/none", "refs/heads/c", false, committer(), "m"),
        Err(ReftableError::Conflict { .. })
    ));
    assert!(matches!(
        stack.rename_ref("refs/heads/a", "refs/heads/b", false, committer(), "m"),
        Err(ReftableError::Conflict { .. })
    ));
    assert_eq!(value(&stack, "refs/heads/a"), Some(RefValue::Object(oid(1))));
}

#[test]
fn test_forced_rename_overwrites_target() {
    let (_temp_dir, stack) = setup_temp_stack();
    set(&stack, "refs/heads/a", 1);
    set(&stack, "refs/heads/b", 2);

    assert_eq!(
        stack.rename_ref("refs/heads/a", "refs/heads/b", true, committer(), "m").unwrap(),
        3
    );
    assert!(!stack.exists("refs/heads/a").unwrap());
    assert_eq!(value(&stack, "refs/heads/b"), Some(RefValue::Object(oid(1))));
}

#[test]
fn test_rename_symbolic_ref_logs_zero_ids() {
    let (_temp_dir, stack) = setup_temp_stack();
    stack
        .apply_transaction(
            Transaction::new().update(RefUpdate::new("HEAD", RefValue::Symbolic("refs/heads/main".into()))),
        )
        .unwrap();

    stack.rename_ref("HEAD", "ORIG_HEAD", false, committer(), "m").unwrap();
    assert_eq!(
        value(&stack, "ORIG_HEAD"),
        Some(RefValue::Symbolic("refs/heads/main".into()))
    );
    let log = stack.read_log("ORIG_HEAD").unwrap().unwrap();
    assert!(log.entry().unwrap().old_id.is_zero());
    assert!(log.entry().unwrap().new_id.is_zero());
}

#[test]
fn test_rename_log_copies_newest_entry() {
    let (temp_dir, stack) = setup_temp_stack();
    for fill in 1..=2u8 {
        let update = RefUpdate::new("refs/heads/old", RefValue::Object(oid(fill)))
            .with_log(committer(), format!("commit {}", fill));
        stack.apply_transaction(Transaction::new().update(update)).unwrap();
    }

    assert_eq!(stack.rename_log("refs/heads/old", "refs/heads/new").unwrap(), 3);

    let copied = stack.log("refs/heads/new").unwrap();
    assert_eq!(copied.len(), 1);
    assert_eq!(copied[0].update_index, 3);
    assert_eq!(copied[0].entry().unwrap().message, "commit 2");
    assert_eq!(copied[0].entry().unwrap().new_id, oid(2));

    // the old log gains a tombstone, which merged reads skip
    let top_name = stack.table_names().pop().unwrap();
    let top = reftable::Table::open(&temp_dir.path().join(top_name)).unwrap();
    assert!(top.read_log("refs/heads/old").unwrap().unwrap().is_deletion());
    assert_eq!(stack.log("refs/heads/old").unwrap().len(), 2);

    assert!(matches!(
        stack.rename_log("refs/heads/none", "refs/heads/other"),
        Err(ReftableError::Conflict { .. })
    ));
}

#[test]
fn test_write_log_skips_stored_entries() {
    let (_temp_dir, stack) = setup_temp_stack();
    let entries: Vec<LogEntry> = (1..=3u8)
        .map(|i| LogEntry {
            old_id: oid(i - 1),
            new_id: oid(i),
            committer: committer(),
            message: format!("entry {}", i),
        })
        .collect();

    assert_eq!(stack.write_log("refs/heads/main", entries[..2].to_vec()).unwrap(), Some(2));
    assert_eq!(stack.write_log("refs/heads/main", entries.clone()).unwrap(), Some(3));
    assert_eq!(stack.table_names().len(), 2);

    let messages: Vec<String> = stack
        .log("refs/heads/main")
        .unwrap()
        .iter()
        .map(|r| r.entry().unwrap().message.clone())
        .collect();
    assert_eq!(messages, vec!["entry 3", "entry 2", "entry 1"]);

    // nothing new: no table is written
    assert_eq!(stack.write_log("refs/heads/main", entries).unwrap(), None);
    assert_eq!(stack.table_names().len(), 2);
    assert_eq!(stack.stats().commits, 2);
}

#[test]
fn test_refs_for_oid_across_tables() {
    let (_temp_dir, stack) = setup_temp_stack();
    set(&stack, "refs/heads/a", 5);
    set(&stack, "refs/heads/b", 5);
    set(&stack, "refs/heads/a", 6);

    let names: Vec<String> = stack
        .refs_for_oid(&oid(5))
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["refs/heads/b"]);
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_suggest_compaction_segment() {
    assert_eq!(suggest_compaction_segment(&[], 2), None);
    assert_eq!(suggest_compaction_segment(&[100], 2), None);
    assert_eq!(suggest_compaction_segment(&[100, 10], 2), None);
    assert_eq!(suggest_compaction_segment(&[10, 10], 2), Some((0, 2)));
    assert_eq!(suggest_compaction_segment(&[1, 1, 1, 1], 2), Some((0, 4)));
    assert_eq!(suggest_compaction_segment(&[900, 120, 40, 10, 8], 2), Some((3, 5)));
    assert_eq!(suggest_compaction_segment(&[10, 5, 4], 3), Some((0, 3)));
}

#[test]
fn test_compact_merges_into_one_table() {
    let (temp_dir, stack) = setup_temp_stack();

    let a = Transaction::new()
        .update(RefUpdate::new("refs/heads/main", RefValue::Object(oid(1))).with_log(committer(), "A"));
    let b = Transaction::new()
        .update(RefUpdate::new("refs/heads/feature", RefValue::Object(oid(2))).with_log(committer(), "B"))
        .update(RefUpdate::new("refs/heads/main", RefValue::Object(oid(3))).with_log(committer(), "B"));
    let c = Transaction::new().update(RefUpdate::delete("refs/heads/feature").with_log(committer(), "C"));
    for tx in [a, b, c] {
        stack.apply_transaction(tx).unwrap();
    }
    let old_names = stack.table_names();
    assert_eq!(old_names.len(), 3);

    stack.compact().unwrap();

    let names = stack.table_names();
    assert_eq!(names.len(), 1);
    assert_eq!(parse_table_name(&names[0]), Some((1, 3)));
    for old in &old_names {
        assert!(!temp_dir.path().join(old).exists());
    }
    assert!(!temp_dir.path().join(COMPACTION_LOCK_FILE).exists());

    assert_eq!(value(&stack, "refs/heads/main"), Some(RefValue::Object(oid(3))));
    assert!(!stack.exists("refs/heads/feature").unwrap());

    // the bottom of the stack needs no tombstones
    let merged = stack.merged();
    let table = &merged.tables()[0];
    assert!(table.read_ref("refs/heads/feature").unwrap().is_none());
    assert_eq!(stack.log("refs/heads/main").unwrap().len(), 2);
    assert_eq!(stack.log("refs/heads/feature").unwrap().len(), 2);

    let stats = stack.stats();
    assert_eq!(stats.compactions, 1);
    assert_eq!(stats.tables_compacted, 3);
    assert_eq!(stats.max_update_index, 3);
}

#[test]
fn test_deleted_ref_gone_after_compaction() {
    let (_temp_dir, stack) = setup_temp_stack();
    assert_eq!(set(&stack, "refs/heads/main", 1), 1);
    assert_eq!(set(&stack, "refs/heads/main", 2), 2);
    let deleted = stack
        .apply_transaction(Transaction::new().update(RefUpdate::delete("refs/heads/main")))
        .unwrap();
    assert_eq!(deleted, 3);
    assert!(stack.resolve("refs/heads/main").unwrap().is_none());

    stack.compact().unwrap();

    assert!(stack.iterate("refs/heads/").unwrap().is_empty());
    assert_eq!(stack.table_names().len(), 1);
    assert_eq!(stack.next_update_index(), 4);
}

#[test]
fn test_compact_is_idempotent() {
    let (_temp_dir, stack) = setup_temp_stack();
    stack.compact().unwrap();
    assert!(stack.table_names().is_empty());

    set(&stack, "refs/heads/main", 1);
    set(&stack, "refs/heads/dev", 2);
    stack.compact().unwrap();
    let once = stack.table_names();
    stack.compact().unwrap();
    assert_eq!(stack.table_names(), once);
    assert_eq!(stack.stats().compactions, 1);
}

#[test]
fn test_partial_compaction_keeps_tombstones() {
    let (temp_dir, stack) = setup_temp_stack();
    // a big bottom table keeps the geometric policy off it
    let big: Vec<RefUpdate> = (0..200)
        .map(|i| RefUpdate::new(format!("refs/heads/branch{:03}", i), RefValue::Object(oid(1))))
        .collect();
    let mut tx = Transaction::new();
    for update in big {
        tx.push(update);
    }
    stack.apply_transaction(tx).unwrap();
    stack
        .apply_transaction(Transaction::new().update(RefUpdate::delete("refs/heads/branch007")))
        .unwrap();
    set(&stack, "refs/heads/new", 2);

    assert!(stack.auto_compact().unwrap());
    let names = stack.table_names();
    assert_eq!(names.len(), 2);
    assert_eq!(parse_table_name(&names[1]), Some((2, 3)));

    let top = reftable::Table::open(&temp_dir.path().join(&names[1])).unwrap();
    assert!(top.read_ref("refs/heads/branch007").unwrap().unwrap().is_deletion());
    assert!(!stack.exists("refs/heads/branch007").unwrap());
}

#[test]
fn test_auto_compaction_bounds_table_count() {
    let temp_dir = TempDir::new().unwrap();
    let stack = Stack::open(config(temp_dir.path()).auto_compact(true).build()).unwrap();

    for i in 0..32u8 {
        set(&stack, &format!("refs/heads/b{:02}", i), i);
    }

    let stats = stack.stats();
    assert!(stats.tables <= 6, "{} tables left", stats.tables);
    assert!(stats.compactions > 0);
    assert_eq!(stats.max_update_index, 32);
    assert_eq!(stack.iterate("refs/heads/").unwrap().len(), 32);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_second_writer_retries_after_lost_race() {
    let temp_dir = TempDir::new().unwrap();
    let first = Stack::open(config(temp_dir.path()).build()).unwrap();
    let second = Stack::open(config(temp_dir.path()).build()).unwrap();

    set(&first, "refs/heads/main", 1);
    // `second` still sees an empty list and has to reload before committing
    assert_eq!(set(&second, "refs/heads/dev", 2), 2);
    assert_eq!(second.stats().commit_retries, 1);

    first.reload().unwrap();
    assert_eq!(first.table_names(), second.table_names());
    assert!(first.exists("refs/heads/dev").unwrap());
}

#[test]
fn test_lost_race_without_retries_fails() {
    let temp_dir = TempDir::new().unwrap();
    let first = Stack::open(config(temp_dir.path()).build()).unwrap();
    let second = Stack::open(config(temp_dir.path()).commit_retries(0).build()).unwrap();

    set(&first, "refs/heads/main", 1);
    let result = second.apply_transaction(
        Transaction::new().update(RefUpdate::new("refs/heads/dev", RefValue::Object(oid(2)))),
    );
    assert!(matches!(result, Err(ReftableError::ConcurrentUpdate(_))));

    // nothing but the committed table and the list is left behind
    let files = fs::read_dir(temp_dir.path()).unwrap().count();
    assert_eq!(files, 2);
}

#[test]
fn test_held_list_lock_blocks_commit() {
    let temp_dir = TempDir::new().unwrap();
    let stack = Stack::open(config(temp_dir.path()).commit_retries(0).build()).unwrap();
    let lock = temp_dir.path().join(LIST_LOCK_FILE);
    fs::write(&lock, b"").unwrap();

    let tx = || Transaction::new().update(RefUpdate::new("refs/heads/main", RefValue::Object(oid(1))));
    assert!(matches!(
        stack.apply_transaction(tx()),
        Err(ReftableError::ConcurrentUpdate(_))
    ));
    // a fresh lock belongs to a live writer
    assert_eq!(stack.clean().unwrap(), 0);
    assert!(lock.exists());

    fs::remove_file(&lock).unwrap();
    assert_eq!(stack.apply_transaction(tx()).unwrap(), 1);
}

#[test]
fn test_commit_after_foreign_compaction() {
    let temp_dir = TempDir::new().unwrap();
    let writer = Stack::open(config(temp_dir.path()).build()).unwrap();
    let compactor = Stack::open(config(temp_dir.path()).build()).unwrap();

    for i in 1..=3u8 {
        set(&writer, &format!("refs/heads/b{}", i), i);
    }
    compactor.reload().unwrap();
    compactor.compact().unwrap();

    // the writer's open tables are gone from disk but still readable
    assert!(writer.exists("refs/heads/b1").unwrap());
    assert_eq!(set(&writer, "refs/heads/b4", 4), 4);
    assert_eq!(writer.table_names().len(), 2);
    assert_eq!(writer.iterate("refs/heads/").unwrap().len(), 4);
}

#[test]
fn test_compaction_succeeds_when_reload_after_commit_fails() {
    let temp_dir = TempDir::new().unwrap();
    let stack = Stack::open(config(temp_dir.path()).reload_retries(0).build()).unwrap();
    set(&stack, "refs/heads/a", 1);
    set(&stack, "refs/heads/b", 2);
    let compacted = stack.table_names();

    // another writer appends a table whose file then disappears
    let other = Stack::open(config(temp_dir.path()).build()).unwrap();
    set(&other, "refs/heads/c", 3);
    let missing = other.table_names().pop().unwrap();
    fs::remove_file(temp_dir.path().join(&missing)).unwrap();

    stack.compact().unwrap();

    let listed = read_list(&temp_dir.path().join(LIST_FILE)).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(parse_table_name(&listed[0]), Some((1, 2)));
    assert_eq!(listed[1], missing);
    for name in &compacted {
        assert!(!temp_dir.path().join(name).exists());
    }
    let stats = stack.stats();
    assert_eq!(stats.compactions, 1);
    assert_eq!(stats.failed_compactions, 0);
}

#[test]
fn test_concurrent_writers_in_one_process() {
    let temp_dir = TempDir::new().unwrap();
    let stack = Arc::new(
        Stack::open(
            Config::builder()
                .dir(temp_dir.path())
                .commit_retries(200)
                .build(),
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let stack = Arc::clone(&stack);
            thread::spawn(move || {
                for i in 0..10 {
                    set(&stack, &format!("refs/heads/t{}-{}", t, i), t as u8);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    stack.reload().unwrap();
    assert_eq!(stack.iterate("refs/heads/").unwrap().len(), 40);
    assert_eq!(stack.merged().max_update_index(), 40);
}

#[test]
fn test_view_matches_list_after_concurrent_commits() {
    let temp_dir = TempDir::new().unwrap();
    let stack = Arc::new(
        Stack::open(config(temp_dir.path()).commit_retries(200).build()).unwrap(),
    );

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let stack = Arc::clone(&stack);
            thread::spawn(move || {
                for i in 0..10 {
                    set(&stack, &format!("refs/heads/w{}-{}", t, i), i as u8);
                }
            })
        })
        .collect();
    let readers: Vec<_> = (0..2)
        .map(|_| {
            let stack = Arc::clone(&stack);
            thread::spawn(move || {
                for _ in 0..20 {
                    stack.reload().unwrap();
                }
            })
        })
        .collect();
    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    // no reload here: the last reload to finish saw the newest list
    let listed = read_list(&temp_dir.path().join(LIST_FILE)).unwrap();
    assert_eq!(listed.len(), 40);
    assert_eq!(stack.table_names(), listed);
    assert_eq!(stack.merged().max_update_index(), 40);
}

// =============================================================================
// Persistence and Cleanup Tests
// =============================================================================

#[test]
fn test_reopen_sees_committed_refs() {
    let temp_dir = TempDir::new().unwrap();
    {
        let stack = Stack::open(config(temp_dir.path()).build()).unwrap();
        set(&stack, "refs/heads/main", 1);
        set(&stack, "refs/heads/dev", 2);
    }

    let stack = Stack::open(config(temp_dir.path()).build()).unwrap();
    assert_eq!(stack.table_names().len(), 2);
    assert_eq!(stack.next_update_index(), 3);
    assert_eq!(value(&stack, "refs/heads/dev"), Some(RefValue::Object(oid(2))));
}

#[test]
fn test_clean_removes_orphans() {
    let temp_dir = TempDir::new().unwrap();
    let stack = Stack::open(config(temp_dir.path()).lock_timeout_ms(0).build()).unwrap();
    set(&stack, "refs/heads/main", 1);
    set(&stack, "refs/heads/dev", 2);

    let orphan = temp_dir.path().join("0x000000000001-0x000000000001-deadbeef.ref");
    let future = temp_dir.path().join("0x000000000063-0x000000000063-deadbeef.ref");
    let temp = temp_dir.path().join("tmp_abandoned");
    let stale_lock = temp_dir.path().join(COMPACTION_LOCK_FILE);
    for path in [&orphan, &future, &temp, &stale_lock] {
        fs::write(path, b"junk").unwrap();
    }

    assert_eq!(stack.clean().unwrap(), 3);
    assert!(!orphan.exists());
    assert!(!temp.exists());
    assert!(!stale_lock.exists());
    // may belong to a writer that has not committed its list yet
    assert!(future.exists());

    assert_eq!(stack.table_names().len(), 2);
    assert_eq!(value(&stack, "refs/heads/main"), Some(RefValue::Object(oid(1))));
}

#[test]
fn test_missing_listed_table_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    {
        let stack = Stack::open(config(temp_dir.path()).build()).unwrap();
        set(&stack, "refs/heads/main", 1);
        let name = stack.table_names().remove(0);
        fs::remove_file(temp_dir.path().join(name)).unwrap();
    }

    let result = Stack::open(config(temp_dir.path()).reload_retries(1).build());
    assert!(matches!(result, Err(ReftableError::IoPath { .. })));
}

#[test]
fn test_sha256_stack() {
    let temp_dir = TempDir::new().unwrap();
    let stack = Stack::open(config(temp_dir.path()).hash_id(HashId::Sha256).build()).unwrap();
    let id = ObjectId::from_bytes(&[0x7e; 32]);

    stack
        .apply_transaction(Transaction::new().update(RefUpdate::new("refs/heads/main", RefValue::Object(id.clone()))))
        .unwrap();
    assert_eq!(value(&stack, "refs/heads/main"), Some(RefValue::Object(id)));

    let name = stack.table_names().remove(0);
    let image = fs::read(temp_dir.path().join(name)).unwrap();
    assert_eq!(image[4], 2);
    assert_eq!(stack.merged().hash_id(), HashId::Sha256);
}
