//! Concurrent access tests for the advisory lock manager
//!
//! Verifies that the fs2-based locking gives exactly one winner per mirror
//! name and never makes distinct names wait on each other.

use mirror_fs::{LockHandle, LockManager};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use tempfile::tempdir;

#[test]
fn test_concurrent_acquire_same_name_has_one_winner() {
    let dir = tempdir().unwrap();
    let locks = Arc::new(LockManager::new(dir.path().join("locks")));

    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));
    let held: Arc<Mutex<Vec<LockHandle>>> = Arc::new(Mutex::new(Vec::new()));
    let refused = Arc::new(Mutex::new(0usize));

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let locks = Arc::clone(&locks);
            let barrier = Arc::clone(&barrier);
            let held = Arc::clone(&held);
            let refused = Arc::clone(&refused);

            thread::spawn(move || {
                barrier.wait();
                match locks.try_acquire("fedora").expect("acquire should not error") {
                    // Keep the winner's handle alive until every thread has tried
                    Some(handle) => held.lock().unwrap().push(handle),
                    None => *refused.lock().unwrap() += 1,
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread should not panic");
    }

    assert_eq!(held.lock().unwrap().len(), 1, "exactly one thread should win");
    assert_eq!(*refused.lock().unwrap(), num_threads - 1);
}

#[test]
fn test_concurrent_acquire_distinct_names_all_succeed() {
    let dir = tempdir().unwrap();
    let locks = Arc::new(LockManager::new(dir.path()));
    let num_threads = 6;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let locks = Arc::clone(&locks);
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                barrier.wait();
                let name = format!("mirror-{}", thread_id);
                let handle = locks.try_acquire(&name).unwrap();
                assert!(handle.is_some(), "{} should lock", name);
                handle.unwrap().release().unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread should not panic");
    }

    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 0, "released locks should leave no files behind");
}

#[test]
fn test_release_then_reacquire_across_threads() {
    let dir = tempdir().unwrap();
    let locks = Arc::new(LockManager::new(dir.path()));

    for _ in 0..20 {
        let locks = Arc::clone(&locks);
        thread::spawn(move || {
            if let Some(handle) = locks.try_acquire("cycle").unwrap() {
                handle.release().unwrap();
            }
        })
        .join()
        .unwrap();
    }

    assert!(locks.try_acquire("cycle").unwrap().is_some());
}
