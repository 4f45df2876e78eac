//! Concurrency stress tests: hot-key contention, mixed readers and
//! writers, worker churn, single-bucket torture.
//!
//! These verify the safety guarantees under real interleavings:
//! no torn values, no use-after-free panics, exactly one surviving value
//! per key, workers recyclable under load.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use petek::{Error, Table, TableConfig};

#[test]
fn hot_key_contention_leaves_one_winner() {
    const THREADS: usize = 8;
    const ITERS: usize = 10_000;

    let table = Arc::new(Table::new());
    let mut handles = Vec::new();

    for tid in 0..THREADS {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            let mut worker = table.register().unwrap();
            for i in 0..ITERS {
                worker.set("hot", &format!("t{tid}-i{i}")).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let worker = table.register().unwrap();
    let value = worker.get("hot").expect("hot key must survive");
    // The survivor must be exactly one thread's published write, whole and
    // untorn. (Which write wins depends on the interleaving.)
    let valid = (0..THREADS).any(|tid| {
        value
            .strip_prefix(&format!("t{tid}-i"))
            .is_some_and(|i| i.parse::<usize>().is_ok_and(|i| i < ITERS))
    });
    assert!(valid, "unexpected survivor {value:?}");
}

#[test]
fn concurrent_distinct_keys_all_land() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 20;

    let table = Arc::new(Table::with_config(TableConfig {
        capacity: 128,
        ..TableConfig::default()
    }));
    let mut handles = Vec::new();

    for tid in 0..THREADS {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            let mut worker = table.register().unwrap();
            for i in 0..PER_THREAD {
                let key = format!("t{tid}-k{i}");
                worker.set(&key, &format!("{}", tid * PER_THREAD + i)).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let worker = table.register().unwrap();
    for tid in 0..THREADS {
        for i in 0..PER_THREAD {
            let key = format!("t{tid}-k{i}");
            assert_eq!(
                worker.get(&key).as_deref(),
                Some(format!("{}", tid * PER_THREAD + i).as_str()),
                "lost {key}"
            );
        }
    }
}

#[test]
fn readers_see_whole_values_or_nothing() {
    const WRITERS: usize = 4;
    const READERS: usize = 4;
    const WRITE_ITERS: usize = 25_000;

    let table = Arc::new(Table::new());
    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();

    for tid in 0..WRITERS {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            let mut worker = table.register().unwrap();
            for i in 0..WRITE_ITERS {
                worker.set("k", &format!("payload-{tid}-{i}")).unwrap();
                worker.del("k");
            }
        }));
    }

    let mut reader_handles = Vec::new();
    for _ in 0..READERS {
        let table = Arc::clone(&table);
        let stop = Arc::clone(&stop);
        reader_handles.push(thread::spawn(move || {
            let worker = table.register().unwrap();
            let mut observed = 0u64;
            while !stop.load(Ordering::Relaxed) {
                if let Some(value) = worker.get("k") {
                    // A torn or freed read would fail this shape check.
                    assert!(
                        value.starts_with("payload-"),
                        "corrupt snapshot {value:?}"
                    );
                    observed += 1;
                }
            }
            observed
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for handle in reader_handles {
        handle.join().unwrap();
    }
}

#[test]
fn single_bucket_torture() {
    // Capacity 1: every operation fights over the same bucket, forcing
    // the update spin loop, the tombstone reinsert path and the abort
    // paths far more often than a spread-out workload would.
    const THREADS: usize = 4;
    const ITERS: usize = 2_000;

    let table = Arc::new(Table::with_config(TableConfig {
        capacity: 1,
        spin_per_sleep: 100,
        ..TableConfig::default()
    }));
    let mut handles = Vec::new();

    for tid in 0..THREADS {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            let mut worker = table.register().unwrap();
            for i in 0..ITERS {
                // With one bucket, a probe that lands inside another
                // writer's intent window is a legitimate full-table
                // verdict; retry until the bucket settles.
                while worker.set("only", &format!("{tid}:{i}")) == Err(Error::TableFull) {
                    std::hint::spin_loop();
                }
                if i % 3 == 0 {
                    worker.del("only");
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let worker = table.register().unwrap();
    match worker.get("only") {
        None => {}
        Some(value) => {
            assert!(value.contains(':'), "corrupt survivor {value:?}");
        }
    }
}

#[test]
fn worker_churn_recycles_records_under_load() {
    const CHURNERS: usize = 4;
    const ROUNDS: usize = 200;

    // Tight worker limit: recycling must work or registration starves.
    let table = Arc::new(Table::with_config(TableConfig {
        max_workers: CHURNERS + 1,
        ..TableConfig::default()
    }));
    let mut handles = Vec::new();

    for tid in 0..CHURNERS {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            for round in 0..ROUNDS {
                let mut worker = table.register().unwrap();
                let key = format!("churn-{tid}");
                worker.set(&key, &format!("{round}")).unwrap();
                worker.del(&key);
                // Worker drops here: hazards cleared, leftovers adopted,
                // record released for the next round.
            }
        }));
    }

    let table_main = Arc::clone(&table);
    let steady = thread::spawn(move || {
        let mut worker = table_main.register().unwrap();
        for i in 0..ROUNDS {
            worker.set("steady", &format!("{i}")).unwrap();
        }
        assert_eq!(
            worker.get("steady").as_deref(),
            Some(format!("{}", ROUNDS - 1).as_str())
        );
    });

    for handle in handles {
        handle.join().unwrap();
    }
    steady.join().unwrap();
}

#[test]
fn random_hot_cold_mix_stays_coherent() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const THREADS: usize = 4;
    const ITERS: usize = 20_000;

    let table = Arc::new(Table::new());
    let mut handles = Vec::new();

    for tid in 0..THREADS {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(0xC0FFEE ^ tid as u64);
            let mut worker = table.register().unwrap();
            for _ in 0..ITERS {
                // 98% of traffic hammers three hot keys; the rest spreads
                // over a cold tail. Hot traffic is delete-heavy to keep
                // the tombstone and reinsert paths busy.
                let hot = rng.gen_range(1..=100) <= 98;
                let key = if hot {
                    format!("key_{}", rng.gen_range(0..3))
                } else {
                    format!("key_{}", rng.gen_range(3..21))
                };
                let op = rng.gen_range(1..=10);
                let set_share = if hot { 1 } else { 4 };
                let get_share = if hot { 2 } else { 8 };
                if op <= set_share {
                    let _ = worker.set(&key, &format!("v{}", rng.gen_range(0..1000)));
                } else if op <= get_share {
                    if let Some(value) = worker.get(&key) {
                        assert!(value.starts_with('v'), "corrupt {value:?}");
                    }
                } else {
                    worker.del(&key);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let worker = table.register().unwrap();
    for i in 0..21 {
        if let Some(value) = worker.get(&format!("key_{i}")) {
            assert!(value.starts_with('v'), "corrupt survivor {value:?}");
        }
    }
}

#[test]
fn set_del_loop_reclaims_while_readers_watch() {
    const WRITE_ITERS: usize = 50_000;

    let table = Arc::new(Table::with_config(TableConfig {
        retire_batch: 32,
        ..TableConfig::default()
    }));
    let stop = Arc::new(AtomicBool::new(false));

    let reader_table = Arc::clone(&table);
    let reader_stop = Arc::clone(&stop);
    let reader = thread::spawn(move || {
        let worker = reader_table.register().unwrap();
        while !reader_stop.load(Ordering::Relaxed) {
            if let Some(value) = worker.get("cycle") {
                assert!(value.starts_with("gen-"), "corrupt {value:?}");
            }
        }
    });

    {
        let mut worker = table.register().unwrap();
        for i in 0..WRITE_ITERS {
            worker.set("cycle", &format!("gen-{i}")).unwrap();
            worker.del("cycle");
        }
        // A low retire_batch forced thousands of scans along the way; if
        // reclamation ever freed a protected pointer, the reader's shape
        // assert or the allocator would have caught it.
    }

    stop.store(true, Ordering::Relaxed);
    reader.join().unwrap();
    assert_eq!(table.register().unwrap().get("cycle"), None);
}
