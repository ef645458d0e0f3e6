//! Crash recovery tests.
//!
//! A crash is simulated by dropping a `Database` without calling `close`:
//! dirty pages are lost, the log and the XID file survive.

use kestreldb::common::config::MB;
use kestreldb::{Config, Database, IsolationLevel, Uid};
use std::path::Path;
use tempfile::tempdir;

fn config() -> Config {
    Config::with_memory(MB)
}

fn read_committed(db: &Database, uid: Uid) -> Option<Vec<u8>> {
    db.run_implicit(|vm, xid| vm.read(xid, uid)).unwrap()
}

/// The xmax field of the entry stored at `uid`.
fn raw_xmax(db: &Database, uid: Uid) -> u64 {
    let dm = db.data_manager();
    let item = dm.read(uid).unwrap().unwrap();
    let xmax = item.read_data(|raw| u64::from_be_bytes(raw[8..16].try_into().unwrap()));
    dm.release(&item).unwrap();
    xmax
}

fn crash(db: Database) {
    drop(db);
}

fn reopen(path: &Path) -> Database {
    Database::open(path, config()).unwrap()
}

#[test]
fn test_clean_close_and_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let db = Database::create(&path, config()).unwrap();
    let uid = db.run_implicit(|vm, xid| vm.insert(xid, b"durable")).unwrap();
    db.close().unwrap();

    let db = reopen(&path);
    assert_eq!(read_committed(&db, uid), Some(b"durable".to_vec()));
    db.close().unwrap();
}

#[test]
fn test_committed_insert_is_redone() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let db = Database::create(&path, config()).unwrap();
    let uids: Vec<Uid> = (0..50u32)
        .map(|i| {
            db.run_implicit(|vm, xid| vm.insert(xid, &i.to_be_bytes()))
                .unwrap()
        })
        .collect();
    crash(db);

    let db = reopen(&path);
    for (i, &uid) in uids.iter().enumerate() {
        assert_eq!(read_committed(&db, uid), Some((i as u32).to_be_bytes().to_vec()));
    }
    db.close().unwrap();
}

#[test]
fn test_uncommitted_insert_is_undone() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let db = Database::create(&path, config()).unwrap();
    let kept = db.run_implicit(|vm, xid| vm.insert(xid, b"kept")).unwrap();

    let vm = db.version_manager();
    let loser = vm.begin(IsolationLevel::ReadCommitted).unwrap();
    let lost = vm.insert(loser, b"lost").unwrap();
    crash(db);

    let db = reopen(&path);
    assert!(db.transaction_manager().is_aborted(loser));
    assert_eq!(read_committed(&db, kept), Some(b"kept".to_vec()));
    assert_eq!(read_committed(&db, lost), None);

    // The undone record stays deleted at the data layer too.
    assert!(db.data_manager().read(lost).unwrap().is_none());
    db.close().unwrap();
}

#[test]
fn test_uncommitted_delete_is_undone() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let db = Database::create(&path, config()).unwrap();
    let uid = db.run_implicit(|vm, xid| vm.insert(xid, b"row")).unwrap();

    let vm = db.version_manager();
    let loser = vm.begin(IsolationLevel::ReadCommitted).unwrap();
    assert!(vm.delete(loser, uid).unwrap());
    crash(db);

    let db = reopen(&path);
    assert!(db.transaction_manager().is_aborted(loser));
    assert_eq!(raw_xmax(&db, uid), 0);
    assert_eq!(read_committed(&db, uid), Some(b"row".to_vec()));
    db.close().unwrap();
}

#[test]
fn test_committed_delete_is_redone() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let db = Database::create(&path, config()).unwrap();
    let uid = db.run_implicit(|vm, xid| vm.insert(xid, b"row")).unwrap();
    let mut deleter = 0;
    assert!(db
        .run_implicit(|vm, xid| {
            deleter = xid;
            vm.delete(xid, uid)
        })
        .unwrap());
    crash(db);

    let db = reopen(&path);
    assert_eq!(raw_xmax(&db, uid), deleter);
    assert_eq!(read_committed(&db, uid), None);
    db.close().unwrap();
}

#[test]
fn test_index_survives_crash() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let db = Database::create(&path, config()).unwrap();
    let index = db.create_index().unwrap();
    for key in 0..300u64 {
        index.insert(key, Uid::from_raw(key + 1)).unwrap();
    }
    db.booter().update_uid(index.boot_uid()).unwrap();
    drop(index);
    crash(db);

    let db = reopen(&path);
    let index = db.load_index(db.booter().load_uid().unwrap()).unwrap();
    let all = index.search_range(0, u64::MAX).unwrap();
    let expected: Vec<Uid> = (1..=300).map(Uid::from_raw).collect();
    assert_eq!(all, expected);
    index.close().unwrap();
    db.close().unwrap();
}

#[test]
fn test_repeated_crashes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let db = Database::create(&path, config()).unwrap();
    let first = db.run_implicit(|vm, xid| vm.insert(xid, b"first")).unwrap();
    crash(db);

    let db = reopen(&path);
    let second = db.run_implicit(|vm, xid| vm.insert(xid, b"second")).unwrap();
    crash(db);

    let db = reopen(&path);
    assert_eq!(read_committed(&db, first), Some(b"first".to_vec()));
    assert_eq!(read_committed(&db, second), Some(b"second".to_vec()));
    db.close().unwrap();
}
