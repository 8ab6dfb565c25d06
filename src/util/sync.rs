//! Guards for the std locks behind the in-memory store and catalog.
//!
//! Writers finish each mutation in a single step, so data behind a poisoned
//! lock is still consistent and the guard is handed back after a warning.

use std::sync::{LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recover<G>(result: LockResult<G>, owner: &'static str, op: &'static str, mode: &'static str) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(owner, op, mode, "lock poisoned by a panicked holder, reusing its data");
        poisoned.into_inner()
    })
}

pub(crate) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    owner: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), owner, op, "read")
}

pub(crate) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    owner: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), owner, op, "write")
}

pub(crate) fn lock_mutex<'a, T>(
    lock: &'a Mutex<T>,
    owner: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(lock.lock(), owner, op, "exclusive")
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    fn poison<T>(lock: &Mutex<T>) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.lock().expect("first lock");
            panic!("holder panicked");
        }));
    }

    #[test]
    fn store_entries_stay_usable_after_a_panicked_writer() {
        let entries = Mutex::new(vec!["cache:v2:cars:/api/cars:".to_string()]);
        poison(&entries);
        assert!(entries.is_poisoned());

        lock_mutex(&entries, "store::memory", "set").push("lock:cache:v2".to_string());
        assert_eq!(lock_mutex(&entries, "store::memory", "get").len(), 2);
    }

    #[test]
    fn catalog_document_is_readable_after_a_panicked_writer() {
        let document = RwLock::new(vec!["creta"]);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let mut guard = document.write().expect("first lock");
            guard.push("venue");
            panic!("holder panicked");
        }));

        assert_eq!(*read_lock(&document, "catalog::memory", "brands"), vec!["creta", "venue"]);
        write_lock(&document, "catalog::memory", "remove_model").retain(|name| *name != "venue");
        assert_eq!(read_lock(&document, "catalog::memory", "brands").len(), 1);
    }
}
