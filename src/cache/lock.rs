//! Poison-tolerant lock acquisition for the cache's shared state.
//!
//! Cache state is always safe to keep using after a panic elsewhere: the
//! worst case is a stale or half-patched view, which the next fetch repairs.

use std::sync::{
    Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use tracing::warn;

fn recover<G>(
    poisoned: PoisonError<G>,
    target: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    warn!(
        op,
        target_module = target,
        lock_kind,
        result = "poisoned_recovered",
        hint = "cached views may hold a partially applied mutation",
        "Recovered from poisoned cache lock"
    );
    poisoned.into_inner()
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read()
        .unwrap_or_else(|poisoned| recover(poisoned, target, op, "rwlock.read"))
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write()
        .unwrap_or_else(|poisoned| recover(poisoned, target, op, "rwlock.write"))
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock()
        .unwrap_or_else(|poisoned| recover(poisoned, target, op, "mutex.lock"))
}
