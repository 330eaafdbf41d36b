//! Concurrency tests: readers racing the writer, and writers queued on the gate

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use cowdb::{Config, Database, Value, WritePolicy};

const KEYS: i64 = 10;

fn small_config() -> Config {
    Config::default().with_page_size(512).with_max_keys(8)
}

#[test]
fn test_readers_see_whole_commits() {
    let db = Database::in_memory(small_config()).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    // Commit N sets every key to N, so a reader at version V must see V everywhere
    let writer = {
        let db = db.clone();
        let done = done.clone();
        thread::spawn(move || {
            for _ in 0..100 {
                let mut txn = db.begin_write().unwrap();
                let next = txn.base_version() as i64 + 1;
                for k in 0..KEYS {
                    txn.insert(format!("key{}", k), &Value::Int64(next)).unwrap();
                }
                txn.commit().unwrap();
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let mut readers = vec![];
    for _ in 0..4 {
        let db = db.clone();
        let done = done.clone();
        readers.push(thread::spawn(move || {
            let mut snapshots = 0;
            loop {
                let finished = done.load(Ordering::SeqCst);
                let mut reader = db.begin_read();
                let version = reader.version() as i64;
                for k in 0..KEYS {
                    let value = reader.get(format!("key{}", k)).unwrap();
                    if version == 0 {
                        assert_eq!(value, None);
                    } else {
                        assert_eq!(value, Some(Value::Int64(version)));
                    }
                }
                snapshots += 1;
                if finished {
                    return snapshots;
                }
            }
        }));
    }

    writer.join().unwrap();
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(db.version(), 100);

    // Whoever closed last, the writer or a reader, freed every retired page
    assert_eq!(db.stats().retired_pages, 0);
    db.verify().unwrap();
}

#[test]
fn test_closing_readers_never_blocks_writer() {
    let db = Database::in_memory(small_config()).unwrap();
    {
        let mut txn = db.begin_write().unwrap();
        txn.insert("seed", &Value::Int64(0)).unwrap();
        txn.commit().unwrap();
    }
    let stop = Arc::new(AtomicBool::new(false));

    let churn = {
        let db = db.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                drop(db.begin_read());
            }
        })
    };

    // Readers come and go between every attempt; fail-fast must still succeed
    for round in 0..20_000i64 {
        let mut txn = db.begin_write().unwrap();
        if round % 100 == 0 {
            txn.insert("seed", &Value::Int64(round)).unwrap();
            txn.commit().unwrap();
        } else {
            txn.abort().unwrap();
        }
        db.clone().close().unwrap();
    }

    stop.store(true, Ordering::SeqCst);
    churn.join().unwrap();
    assert_eq!(db.stats().retired_pages, 0);
    db.verify().unwrap();
}

#[test]
fn test_long_reader_survives_page_reuse() {
    let db = Database::in_memory(small_config()).unwrap();
    {
        let mut txn = db.begin_write().unwrap();
        for i in 0..200i64 {
            txn.insert(format!("doc{:03}", i), &Value::Int64(i)).unwrap();
        }
        txn.commit().unwrap();
    }

    let mut reader = db.begin_read();
    let expected = reader.scan().unwrap();

    let writer = {
        let db = db.clone();
        thread::spawn(move || {
            for round in 1..=50i64 {
                let mut txn = db.begin_write().unwrap();
                for i in 0..200i64 {
                    if (i + round) % 4 == 0 {
                        txn.delete(format!("doc{:03}", i)).unwrap();
                    } else {
                        txn.insert(format!("doc{:03}", i), &Value::Int64(i * 1000 + round))
                            .unwrap();
                    }
                }
                txn.commit().unwrap();
            }
        })
    };

    // Scan repeatedly while the writer churns through free pages
    while !writer.is_finished() {
        assert_eq!(reader.scan().unwrap(), expected);
    }
    writer.join().unwrap();
    assert_eq!(reader.scan().unwrap(), expected);
    reader.close().unwrap();
    assert_eq!(db.stats().retired_pages, 0);
}

#[test]
fn test_blocking_writers_serialize() {
    let db = Database::in_memory(small_config().with_write_policy(WritePolicy::Block)).unwrap();
    let mut handles = vec![];

    for _ in 0..4 {
        let db = db.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..25 {
                let mut txn = db.begin_write().unwrap();
                let current = match txn.get("counter").unwrap() {
                    Some(value) => value.as_i64().unwrap(),
                    None => 0,
                };
                txn.insert("counter", &Value::Int64(current + 1)).unwrap();
                txn.commit().unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(db.version(), 100);
    assert_eq!(
        db.begin_read().get("counter").unwrap(),
        Some(Value::Int64(100))
    );
}
