use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use tempfile::tempdir;

use super::{FlushMode, LogOptions, PersistentStore, RedeliveryLedger, WriteAheadLog};
use crate::broker::message::Message;
use crate::persistence::store::read_messages;

fn sync_options() -> LogOptions {
    LogOptions {
        flush: FlushMode::Sync,
        keep_backup: false,
    }
}

fn ids(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.message_id.clone()).collect()
}

#[test]
fn test_reload_returns_inserts_minus_deletes_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("orders.wal");

    {
        let store = PersistentStore::open(&path, sync_options()).unwrap();
        for i in 0..10 {
            let msg = Message::new(format!("payload-{i}")).with_id(format!("m{i}"));
            store.insert(&msg).unwrap();
        }
        store.delete("m3").unwrap();
        store.delete("m7").unwrap();
        store.close().unwrap();
    }

    let store = PersistentStore::open(&path, sync_options()).unwrap();
    let loaded = store.load().unwrap();
    assert_eq!(
        ids(&loaded),
        vec!["m0", "m1", "m2", "m4", "m5", "m6", "m8", "m9"]
    );
    assert_eq!(loaded[0].payload, "payload-0");
    assert_eq!(store.live_records(), 8);
    assert_eq!(store.dead_records(), 4);
}

#[test]
fn test_delete_of_unknown_id_is_harmless() {
    let dir = tempdir().unwrap();
    let store = PersistentStore::open(dir.path().join("q.wal"), sync_options()).unwrap();
    store.insert(&Message::new("a").with_id("a")).unwrap();
    store.delete("missing").unwrap();
    assert_eq!(ids(&store.load().unwrap()), vec!["a"]);
}

#[test]
fn test_torn_tail_is_cut_and_appends_continue() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("torn.wal");

    {
        let store = PersistentStore::open(&path, sync_options()).unwrap();
        store.insert(&Message::new("one").with_id("m1")).unwrap();
        store.insert(&Message::new("two").with_id("m2")).unwrap();
    }

    // half a record: insert type, id length 5, only two id bytes
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0x10, 5, b'm', b'3']).unwrap();
    drop(file);

    let store = PersistentStore::open(&path, sync_options()).unwrap();
    assert_eq!(ids(&store.load().unwrap()), vec!["m1", "m2"]);

    store.insert(&Message::new("four").with_id("m4")).unwrap();
    drop(store);

    assert_eq!(ids(&read_messages(&path).unwrap()), vec!["m1", "m2", "m4"]);
}

#[test]
fn test_unreadable_middle_is_preserved_before_truncation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mangled.wal");

    let first_len = {
        let store = PersistentStore::open(&path, sync_options()).unwrap();
        store.insert(&Message::new("one").with_id("m1")).unwrap();
        let first_len = std::fs::metadata(&path).unwrap().len();
        store.insert(&Message::new("two").with_id("m2")).unwrap();
        store.insert(&Message::new("three").with_id("m3")).unwrap();
        first_len
    };
    let mut mangled = std::fs::read(&path).unwrap();

    // content length of the second record (type, id length, "m2", varint)
    // gains a continuation bit and now claims more bytes than the file holds
    mangled[first_len as usize + 4] |= 0x80;
    std::fs::write(&path, &mangled).unwrap();

    let store = PersistentStore::open(&path, sync_options()).unwrap();
    assert_eq!(ids(&store.load().unwrap()), vec!["m1"]);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), first_len);

    let preserved = dir.path().join("mangled.wal.corrupt");
    assert_eq!(std::fs::read(&preserved).unwrap(), mangled);

    store.destroy().unwrap();
    assert!(!preserved.exists());
}

#[test]
fn test_corrupt_record_is_skipped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("corrupt.wal");

    {
        let store = PersistentStore::open(&path, sync_options()).unwrap();
        store.insert(&Message::new("one").with_id("m1")).unwrap();
    }
    // a framed record with an unknown type byte, then zero padding
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0x77, 1, b'x', 2, b'h', b'i']).unwrap();
    file.write_all(&[0, 0, 0, 0, 0, 0]).unwrap();
    drop(file);

    {
        let store = PersistentStore::open(&path, sync_options()).unwrap();
        store.insert(&Message::new("two").with_id("m2")).unwrap();
    }

    assert_eq!(ids(&read_messages(&path).unwrap()), vec!["m1", "m2"]);
}

#[test]
fn test_undecodable_payload_is_dropped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("raw.wal");
    let log = WriteAheadLog::open(&path, sync_options()).unwrap();
    log.append(super::Record::insert("bad", "not json")).unwrap();
    drop(log);

    let store = PersistentStore::open(&path, sync_options()).unwrap();
    assert!(store.load().unwrap().is_empty());
}

#[test]
fn test_buffered_mode_reaches_disk_on_flush() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffered.wal");
    let store = PersistentStore::open(
        &path,
        LogOptions {
            flush: FlushMode::Buffered,
            keep_backup: false,
        },
    )
    .unwrap();

    store.insert(&Message::new("x").with_id("m1")).unwrap();
    assert!(read_messages(&path).unwrap().is_empty());

    store.flush().unwrap();
    assert_eq!(ids(&read_messages(&path).unwrap()), vec!["m1"]);
}

#[test]
fn test_shrink_keeps_live_records_only() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shrink.wal");
    let store = PersistentStore::open(
        &path,
        LogOptions {
            flush: FlushMode::Sync,
            keep_backup: true,
        },
    )
    .unwrap();

    for i in 0..50 {
        store
            .insert(&Message::new("x".repeat(64)).with_id(format!("m{i}")))
            .unwrap();
    }
    for i in 0..40 {
        store.delete(&format!("m{i}")).unwrap();
    }
    assert!(store.needs_shrink(10));

    let stats = store.shrink().unwrap();
    assert_eq!(stats.live_records, 10);
    assert!(stats.bytes_after < stats.bytes_before);
    assert_eq!(store.dead_records(), 0);
    assert!(!store.needs_shrink(10));
    assert!(dir.path().join("shrink.wal.bak").exists());

    let expected: Vec<String> = (40..50).map(|i| format!("m{i}")).collect();
    assert_eq!(ids(&store.load().unwrap()), expected);

    // the log stays writable after the swap
    store.insert(&Message::new("y").with_id("after")).unwrap();
    drop(store);
    let reloaded = read_messages(&path).unwrap();
    assert_eq!(reloaded.len(), 11);
    assert_eq!(reloaded.last().unwrap().message_id, "after");
}

#[test]
fn test_shrink_during_concurrent_inserts_loses_nothing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("busy.wal");
    let store = Arc::new(PersistentStore::open(&path, sync_options()).unwrap());

    for i in 0..200 {
        store
            .insert(&Message::new("seed").with_id(format!("seed{i}")))
            .unwrap();
    }
    for i in 0..100 {
        store.delete(&format!("seed{i}")).unwrap();
    }

    let writer = {
        let store = store.clone();
        std::thread::spawn(move || {
            for i in 0..300 {
                store
                    .insert(&Message::new("late").with_id(format!("late{i}")))
                    .unwrap();
                if i % 3 == 0 {
                    store.delete(&format!("late{i}")).unwrap();
                }
            }
        })
    };
    for _ in 0..5 {
        store.shrink().unwrap();
    }
    writer.join().unwrap();
    store.shrink().unwrap();

    let loaded = ids(&store.load().unwrap());
    for i in 100..200 {
        assert!(loaded.contains(&format!("seed{i}")), "lost seed{i}");
    }
    for i in 0..300 {
        let id = format!("late{i}");
        assert_eq!(loaded.contains(&id), i % 3 != 0, "wrong state for {id}");
    }
    assert_eq!(loaded.len(), 100 + 200);
}

#[test]
fn test_destroy_removes_files() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gone.wal");
    let store = PersistentStore::open(&path, sync_options()).unwrap();
    store.insert(&Message::new("x").with_id("m1")).unwrap();
    assert!(path.exists());

    store.destroy().unwrap();
    assert!(!path.exists());
    assert!(store.insert(&Message::new("y").with_id("m2")).is_err());
}

#[test]
fn test_ledger_latest_count_wins_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("orders.delivery");

    {
        let ledger = RedeliveryLedger::open(&path, sync_options()).unwrap();
        ledger.set("m1", 1).unwrap();
        ledger.set("m2", 1).unwrap();
        ledger.set("m1", 2).unwrap();
        ledger.set("m1", 3).unwrap();
        ledger.remove("m2").unwrap();
        ledger.set("big", 300).unwrap();
        assert_eq!(ledger.len(), 2);
    }

    let ledger = RedeliveryLedger::open(&path, sync_options()).unwrap();
    let counts = ledger.load().unwrap();
    assert_eq!(counts.get("m1"), Some(&3));
    assert_eq!(counts.get("big"), Some(&300));
    assert!(!counts.contains_key("m2"));

    assert!(ledger.needs_shrink(3));
    ledger.shrink().unwrap();
    assert_eq!(ledger.load().unwrap(), counts);
}

#[test]
fn test_ledger_remove_unknown_writes_nothing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.delivery");
    let ledger = RedeliveryLedger::open(&path, sync_options()).unwrap();
    ledger.remove("nobody").unwrap();
    assert!(ledger.is_empty());
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
}
