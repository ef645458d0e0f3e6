//! Database facade tests.

use kestreldb::common::config::{KB, MB};
use kestreldb::{Config, Database, Error, IsolationLevel, Uid};
use tempfile::tempdir;

#[test]
fn test_run_implicit_commits() {
    let dir = tempdir().unwrap();
    let db = Database::create(dir.path().join("db"), Config::with_memory(MB)).unwrap();

    let uid = db.run_implicit(|vm, xid| vm.insert(xid, b"value")).unwrap();

    let vm = db.version_manager();
    let reader = vm.begin(IsolationLevel::ReadCommitted).unwrap();
    assert_eq!(vm.read(reader, uid).unwrap(), Some(b"value".to_vec()));
    vm.commit(reader).unwrap();
    db.close().unwrap();
}

#[test]
fn test_run_implicit_error_rolls_back() {
    let dir = tempdir().unwrap();
    let db = Database::create(dir.path().join("db"), Config::with_memory(MB)).unwrap();

    let mut inserted = None;
    let result = db.run_implicit(|vm, xid| {
        inserted = Some(vm.insert(xid, b"half done")?);
        vm.insert(xid, &vec![0u8; 9000])
    });
    assert!(matches!(result, Err(Error::DataTooLarge { .. })));

    let uid = inserted.unwrap();
    assert_eq!(db.run_implicit(|vm, xid| vm.read(xid, uid)).unwrap(), None);
    db.close().unwrap();
}

#[test]
fn test_open_missing_database() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        Database::open(dir.path().join("nope"), Config::default()),
        Err(Error::FileNotExists(_))
    ));
}

#[test]
fn test_memory_too_small() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        Database::create(dir.path().join("db"), Config::with_memory(64 * KB)),
        Err(Error::MemoryTooSmall { .. })
    ));
}

#[test]
fn test_boot_file_round_trips_root() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let db = Database::create(&path, Config::with_memory(MB)).unwrap();
    assert_eq!(db.booter().load_uid().unwrap(), Uid::from_raw(0));

    let index = db.create_index().unwrap();
    let uid = db.run_implicit(|vm, xid| vm.insert(xid, b"indexed")).unwrap();
    index.insert(7, uid).unwrap();
    db.booter().update_uid(index.boot_uid()).unwrap();
    index.close().unwrap();
    db.close().unwrap();

    // A temp file left by an interrupted update is ignored.
    std::fs::write(dir.path().join("db.bt_tmp"), b"garbage").unwrap();

    let db = Database::open(&path, Config::with_memory(MB)).unwrap();
    let index = db.load_index(db.booter().load_uid().unwrap()).unwrap();
    let found = index.search(7).unwrap();
    assert_eq!(found, vec![uid]);
    assert_eq!(
        db.run_implicit(|vm, xid| vm.read(xid, found[0])).unwrap(),
        Some(b"indexed".to_vec())
    );
    assert!(!dir.path().join("db.bt_tmp").exists());
    index.close().unwrap();
    db.close().unwrap();
}

#[test]
fn test_many_transactions_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let db = Database::create(&path, Config::with_memory(MB)).unwrap();
    let uids: Vec<Uid> = (0..100u32)
        .map(|i| {
            db.run_implicit(|vm, xid| vm.insert(xid, &i.to_be_bytes()))
                .unwrap()
        })
        .collect();
    let xids = db.transaction_manager().xid_count();
    db.close().unwrap();

    let db = Database::open(&path, Config::with_memory(MB)).unwrap();
    assert_eq!(db.transaction_manager().xid_count(), xids);
    let next = db.version_manager().begin(IsolationLevel::ReadCommitted).unwrap();
    assert_eq!(next, xids + 1);
    db.version_manager().abort(next).unwrap();

    for (i, uid) in uids.into_iter().enumerate() {
        let data = db.run_implicit(|vm, xid| vm.read(xid, uid)).unwrap();
        assert_eq!(data, Some((i as u32).to_be_bytes().to_vec()));
    }
    db.close().unwrap();
}
