//! Обёртки над `std::sync`, восстанавливающиеся после отравления мьютекса.
//!
//! Пользовательский код никогда не исполняется под этими мьютексами, поэтому
//! отравление означает только панику в логировании; состояние остаётся целым.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn wait<'a, T>(condvar: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    condvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
}
