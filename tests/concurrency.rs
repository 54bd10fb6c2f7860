//! Concurrency tests: parallel readers and writers, snapshot isolation,
//! and read-modify-write serialization.

// Test code is allowed to use unwrap for simplicity
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{sync::Arc, thread};

use tidelog::Database;

/// S4 (scaled to test time): parallel single-key writes, reads, and
/// counter increments. Every committed write must be readable and the
/// counter must equal the number of increments.
#[test]
fn test_parallel_writes_reads_and_increments() {
    let db = Database::in_memory().unwrap();

    // Seed the counter
    {
        let mut txn = db.write().unwrap();
        txn.insert(b"counter", b"0").unwrap();
        txn.commit().unwrap();
    }

    let writer_threads = 4u32;
    let keys_per_writer = 100u32;
    let incrementer_threads = 4u32;
    let increments_per_thread = 50u32;

    let mut handles = Vec::new();

    for thread_id in 0..writer_threads {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for i in 0..keys_per_writer {
                let key = format!("w{thread_id}-{i:04}");
                let mut txn = db.write().unwrap();
                txn.insert(key.as_bytes(), key.to_uppercase().as_bytes()).unwrap();
                txn.commit().unwrap();
            }
        }));
    }

    for _ in 0..incrementer_threads {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for _ in 0..increments_per_thread {
                // Read-modify-write under the write lock: increments
                // cannot be lost.
                let mut txn = db.write().unwrap();
                let current: u64 = String::from_utf8(txn.get(b"counter").unwrap().unwrap())
                    .unwrap()
                    .parse()
                    .unwrap();
                txn.insert(b"counter", (current + 1).to_string().as_bytes()).unwrap();
                txn.commit().unwrap();
            }
        }));
    }

    // Readers run alongside, continuously taking consistent snapshots.
    for _ in 0..2 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for _ in 0..200 {
                let txn = db.read().unwrap();
                let entries = txn.seek(b"", b"\xff", None).unwrap();
                // A snapshot's keys are always sorted, whatever commits race by
                assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
            }
        }));
    }

    for handle in handles {
        handle.join().expect("thread panicked");
    }

    let txn = db.read().unwrap();

    let expected = u64::from(incrementer_threads) * u64::from(increments_per_thread);
    let counter: u64 =
        String::from_utf8(txn.get(b"counter").unwrap().unwrap()).unwrap().parse().unwrap();
    assert_eq!(counter, expected, "no increment may be lost");

    for thread_id in 0..writer_threads {
        for i in 0..keys_per_writer {
            let key = format!("w{thread_id}-{i:04}");
            assert_eq!(
                txn.get(key.as_bytes()).unwrap(),
                Some(key.to_uppercase().into_bytes()),
                "missing write {key}"
            );
        }
    }

    assert!(txn.verify().unwrap().is_empty());
}

/// Invariant 8: a reader constructed before a commit keeps observing the
/// pre-commit snapshot after the writer completes.
#[test]
fn test_snapshot_isolation_across_commit() {
    let db = Database::in_memory().unwrap();

    {
        let mut txn = db.write().unwrap();
        for i in 0..100u32 {
            txn.insert(format!("key{i:04}").as_bytes(), b"old").unwrap();
        }
        txn.commit().unwrap();
    }

    let reader = db.read().unwrap();

    {
        let mut txn = db.write().unwrap();
        for i in 0..100u32 {
            txn.insert(format!("key{i:04}").as_bytes(), b"new").unwrap();
        }
        // Drop half of them too, to move the tree around
        for i in 0..50u32 {
            txn.remove(format!("key{i:04}").as_bytes()).unwrap();
        }
        txn.commit().unwrap();
    }

    // The old snapshot is fully intact
    let entries = reader.seek(b"", b"\xff", None).unwrap();
    assert_eq!(entries.len(), 100);
    assert!(entries.iter().all(|(_, v)| v == b"old"));

    // A fresh snapshot sees the new state
    let fresh = db.read().unwrap();
    let entries = fresh.seek(b"", b"\xff", None).unwrap();
    assert_eq!(entries.len(), 50);
    assert!(entries.iter().all(|(_, v)| v == b"new"));
}

/// Readers racing a writer always see one of the committed states, never
/// a partial one.
#[test]
fn test_readers_never_observe_partial_commits() {
    let db = Database::in_memory().unwrap();
    let batches = 50u32;
    let batch_size = 20u32;

    let writer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for batch in 0..batches {
                let mut txn = db.write().unwrap();
                for i in 0..batch_size {
                    let key = format!("b{batch:03}-{i:02}");
                    txn.insert(key.as_bytes(), b"v").unwrap();
                }
                txn.commit().unwrap();
            }
        })
    };

    let reader = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for _ in 0..500 {
                let txn = db.read().unwrap();
                let count = txn.seek(b"", b"\xff", None).unwrap().len() as u32;
                // Batches are atomic: the count is always a multiple of
                // the batch size.
                assert_eq!(count % batch_size, 0, "observed a partial batch: {count}");
            }
        })
    };

    writer.join().expect("writer panicked");
    reader.join().expect("reader panicked");

    let final_count = db.read().unwrap().seek(b"", b"\xff", None).unwrap().len() as u32;
    assert_eq!(final_count, batches * batch_size);
}

/// Dropping an uncommitted write transaction releases the write lock and
/// publishes nothing.
#[test]
fn test_dropped_transaction_releases_lock() {
    let db = Database::in_memory().unwrap();

    {
        let mut txn = db.write().unwrap();
        txn.insert(b"ghost", b"boo").unwrap();
        // dropped here
    }

    // The lock is free again and the ghost never materialized
    let mut txn = db.write().unwrap();
    assert_eq!(txn.get(b"ghost").unwrap(), None);
    txn.insert(b"real", b"yes").unwrap();
    txn.commit().unwrap();

    assert_eq!(db.read().unwrap().get(b"real").unwrap(), Some(b"yes".to_vec()));
}
