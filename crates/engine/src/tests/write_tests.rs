use tempfile::tempdir;

use super::helpers::{key, open_db, value};

#[test]
fn put_get_delete_round_trip() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    let mut batch = db.write().unwrap();
    for i in 0..3 {
        batch.put(&key(i), &value(i)).unwrap();
    }
    batch.commit().unwrap();

    for i in 0..3 {
        assert_eq!(db.get(&key(i)).unwrap(), Some(value(i)));
    }
    assert_eq!(db.get(b"missing").unwrap(), None);

    let mut batch = db.write().unwrap();
    batch.delete(&key(1)).unwrap();
    batch.commit().unwrap();

    assert_eq!(db.get(&key(0)).unwrap(), Some(value(0)));
    assert_eq!(db.get(&key(1)).unwrap(), None);
    assert_eq!(db.get(&key(2)).unwrap(), Some(value(2)));
}

#[test]
fn out_of_order_put_keeps_batch_usable() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    let mut batch = db.write().unwrap();
    batch.put(b"banana", b"1").unwrap();
    assert!(batch.put(b"apple", b"2").is_err());
    batch.put(b"cherry", b"3").unwrap();
    batch.commit().unwrap();

    assert_eq!(db.get(b"banana").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get(b"apple").unwrap(), None);
    assert_eq!(db.get(b"cherry").unwrap(), Some(b"3".to_vec()));
}

#[test]
fn duplicate_key_in_batch_is_rejected() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    let mut batch = db.write().unwrap();
    batch.put(b"a", b"1").unwrap();
    assert!(batch.put(b"a", b"2").is_err());
    assert!(batch.delete(b"a").is_err());
    batch.commit().unwrap();

    assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn empty_commit_leaves_no_file() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    let batch = db.write().unwrap();
    batch.commit().unwrap();

    assert!(db.stats().unwrap().is_empty());
    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert!(names.is_empty(), "unexpected files: {names:?}");
}

#[test]
fn dropped_batch_is_discarded() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    let mut batch = db.write().unwrap();
    batch.put(b"a", b"1").unwrap();
    drop(batch);

    assert_eq!(db.get(b"a").unwrap(), None);
    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert!(names.is_empty(), "unexpected files: {names:?}");
}

#[test]
fn closed_db_rejects_operations() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    let mut batch = db.write().unwrap();
    batch.put(b"a", b"1").unwrap();
    batch.commit().unwrap();

    db.close();
    assert!(db.write().is_err());
    assert!(db.cursor().is_err());
    assert!(db.compact().is_err());

    // Closing twice is harmless.
    db.close();
}

#[test]
fn reopen_preserves_data() {
    let dir = tempdir().unwrap();

    let db = open_db(dir.path());
    let mut batch = db.write().unwrap();
    batch.put(&key(1), &value(1)).unwrap();
    batch.commit().unwrap();
    drop(db);

    // The new writer must not reuse sequence numbers from the first
    // session, or the second commit would clobber the first.
    let db = open_db(dir.path());
    let mut batch = db.write().unwrap();
    batch.put(&key(2), &value(2)).unwrap();
    batch.commit().unwrap();

    assert_eq!(db.get(&key(1)).unwrap(), Some(value(1)));
    assert_eq!(db.get(&key(2)).unwrap(), Some(value(2)));
}

#[test]
fn oversized_key_is_rejected() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    let mut batch = db.write().unwrap();
    assert!(batch.put(&vec![b'k'; config::MAX_KEY_SIZE + 1], b"v").is_err());
    assert!(batch.put(b"", b"v").is_err());
    batch.put(b"ok", b"v").unwrap();
    batch.commit().unwrap();

    assert_eq!(db.get(b"ok").unwrap(), Some(b"v".to_vec()));
}
