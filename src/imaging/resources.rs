//! Scoped native-resource accounting.
//!
//! Every backend allocates its engine-side objects (matrices, surfaces,
//! pipeline images, resamplers, decoder contexts) through a [`HandleLedger`].
//! The ledger hands back a [`Handle`] guard that releases the resource exactly
//! once when it goes out of scope, so an early `?` return cannot leak it.
//!
//! The ledger also counts acquisitions and releases, and can be told to fail
//! the n-th acquisition so tests can force an error halfway through an
//! operation and check that nothing stays outstanding.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("failed to acquire {kind} handle")]
    Exhausted { kind: &'static str },
}

/// Acquired/released counters at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerSnapshot {
    pub acquired: usize,
    pub released: usize,
}

impl LedgerSnapshot {
    pub fn outstanding(&self) -> usize {
        self.acquired.saturating_sub(self.released)
    }
}

#[derive(Default)]
pub struct HandleLedger {
    acquired: AtomicUsize,
    released: AtomicUsize,
    /// Countdown to an injected failure; 0 means disarmed.
    fail_countdown: AtomicUsize,
}

impl HandleLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `value` as a native handle.
    pub fn acquire<T>(&self, kind: &'static str, value: T) -> Result<Handle<'_, T>, ResourceError> {
        self.acquire_inner(kind, value, None)
    }

    /// Track `value` and run `release` on it when the handle is dropped.
    ///
    /// If acquisition fails, `release` runs immediately so the already-created
    /// resource is still torn down.
    pub fn acquire_with<'a, T>(
        &'a self,
        kind: &'static str,
        value: T,
        release: impl FnOnce(&mut T) + 'a,
    ) -> Result<Handle<'a, T>, ResourceError> {
        self.acquire_inner(kind, value, Some(Box::new(release)))
    }

    fn acquire_inner<'a, T>(
        &'a self,
        kind: &'static str,
        mut value: T,
        release: Option<Box<dyn FnOnce(&mut T) + 'a>>,
    ) -> Result<Handle<'a, T>, ResourceError> {
        if self.should_fail() {
            if let Some(release) = release {
                release(&mut value);
            }
            log::debug!("injected failure acquiring {kind} handle");
            return Err(ResourceError::Exhausted { kind });
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Handle {
            ledger: self,
            kind,
            value: Some(value),
            release,
        })
    }

    fn should_fail(&self) -> bool {
        self.fail_countdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n > 0).then(|| n - 1))
            .is_ok_and(|previous| previous == 1)
    }

    /// Make the `nth` acquisition from now on fail (1 = the next one).
    pub fn fail_on_acquire(&self, nth: usize) {
        self.fail_countdown.store(nth, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            acquired: self.acquired.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.snapshot().outstanding()
    }
}

impl fmt::Debug for HandleLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("HandleLedger")
            .field("acquired", &snap.acquired)
            .field("released", &snap.released)
            .finish()
    }
}

/// RAII guard around one native resource.
pub struct Handle<'a, T> {
    ledger: &'a HandleLedger,
    kind: &'static str,
    value: Option<T>,
    release: Option<Box<dyn FnOnce(&mut T) + 'a>>,
}

impl<T> Handle<'_, T> {
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Swap the guarded value, keeping the same handle slot.
    pub fn replace(&mut self, value: T) -> T {
        std::mem::replace(&mut **self, value)
    }
}

impl<T> Deref for Handle<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `Drop` takes the value out.
        self.value.as_ref().unwrap_or_else(|| unreachable!("handle used after release"))
    }
}

impl<T> DerefMut for Handle<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().unwrap_or_else(|| unreachable!("handle used after release"))
    }
}

impl<T> Drop for Handle<'_, T> {
    fn drop(&mut self) {
        if let Some(mut value) = self.value.take() {
            if let Some(release) = self.release.take() {
                release(&mut value);
            }
            drop(value);
            self.ledger.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Handle<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &self.kind)
            .field("value", &self.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn drop_releases_once() {
        let ledger = HandleLedger::new();
        {
            let a = ledger.acquire("mat", 1u8).unwrap();
            let _b = ledger.acquire("mat", 2u8).unwrap();
            assert_eq!(*a, 1);
            assert_eq!(ledger.outstanding(), 2);
        }
        assert_eq!(ledger.snapshot(), LedgerSnapshot { acquired: 2, released: 2 });
    }

    #[test]
    fn release_callback_runs_on_drop() {
        let ledger = HandleLedger::new();
        let closed = Cell::new(false);
        {
            let _ctx = ledger.acquire_with("ctx", (), |_| closed.set(true)).unwrap();
            assert!(!closed.get());
        }
        assert!(closed.get());
    }

    #[test]
    fn injected_failure_hits_the_nth_acquire() {
        let ledger = HandleLedger::new();
        ledger.fail_on_acquire(2);
        let first = ledger.acquire("surface", ()).unwrap();
        let second = ledger.acquire("surface", ());
        assert_eq!(second.unwrap_err(), ResourceError::Exhausted { kind: "surface" });
        drop(first);
        // Disarmed after firing.
        assert!(ledger.acquire("surface", ()).is_ok());
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn failed_acquire_still_tears_down_the_value() {
        let ledger = HandleLedger::new();
        let closed = Cell::new(false);
        ledger.fail_on_acquire(1);
        let result = ledger.acquire_with("ctx", 7, |_| closed.set(true));
        assert!(result.is_err());
        assert!(closed.get());
        assert_eq!(ledger.snapshot(), LedgerSnapshot::default());
    }

    #[test]
    fn replace_keeps_the_slot() {
        let ledger = HandleLedger::new();
        let mut h = ledger.acquire("image", vec![1u8]).unwrap();
        let old = h.replace(vec![2, 3]);
        assert_eq!(old, vec![1]);
        assert_eq!(h.len(), 2);
        drop(h);
        assert_eq!(ledger.snapshot(), LedgerSnapshot { acquired: 1, released: 1 });
    }
}
