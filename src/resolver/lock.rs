//! Striped locks over identifier neighborhoods.
//!
//! Each normalized identifier (see [`Identifiers::lock_keys`]) hashes to one of
//! a fixed number of stripes. A submission locks every stripe its identifiers
//! land on, in ascending stripe order, so two submissions sharing an email or
//! a phone number never run their read-decide-write step concurrently and no
//! two acquisitions can deadlock. Waiting is always bounded.
//!
//! [`Identifiers::lock_keys`]: crate::contact::Identifiers::lock_keys

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::ExecutionError;

#[derive(Debug, Default)]
struct Stripe {
    held: Mutex<bool>,
    released: Condvar,
}

impl Stripe {
    fn state(&self) -> MutexGuard<'_, bool> {
        // The guarded flag cannot be left half-updated, so a poisoned lock is still usable.
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_hold_until(&self, deadline: Instant) -> bool {
        let mut held = self.state();
        while *held {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            held = self
                .released
                .wait_timeout(held, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *held = true;
        true
    }

    fn release(&self) {
        *self.state() = false;
        self.released.notify_all();
    }
}

/// Fixed set of lock stripes.
#[derive(Debug)]
pub struct NeighborhoodLocks {
    stripes: Vec<Stripe>,
}

impl NeighborhoodLocks {
    /// Create `stripes` stripes (at least one).
    #[must_use]
    pub fn new(stripes: usize) -> Self {
        let stripes = (0..stripes.max(1)).map(|_| Stripe::default()).collect();
        Self { stripes }
    }

    /// Stripe index for a normalized key.
    #[must_use]
    pub fn stripe_of(&self, key: &str) -> usize {
        let hash = blake3::hash(key.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        let n = self.stripes.len() as u64;
        #[allow(clippy::cast_possible_truncation)]
        let idx = (u64::from_le_bytes(prefix) % n) as usize;
        idx
    }

    /// Lock every stripe covering `keys`, waiting at most `timeout` in total.
    ///
    /// # Errors
    /// Returns `LockTimeout` if some stripe stays held past the deadline;
    /// stripes taken so far are released before returning.
    pub fn acquire<S: AsRef<str>>(
        &self,
        keys: &[S],
        timeout: Duration,
    ) -> Result<NeighborhoodGuard<'_>, ExecutionError> {
        let mut indices: Vec<usize> = keys.iter().map(|k| self.stripe_of(k.as_ref())).collect();
        indices.sort_unstable();
        indices.dedup();

        let deadline = Instant::now() + timeout;
        let mut guard = NeighborhoodGuard {
            locks: self,
            held: Vec::with_capacity(indices.len()),
        };
        for idx in indices {
            if !self.stripes[idx].try_hold_until(deadline) {
                return Err(ExecutionError::LockTimeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            guard.held.push(idx);
        }
        Ok(guard)
    }
}

/// Held stripes; released on drop.
#[derive(Debug)]
pub struct NeighborhoodGuard<'a> {
    locks: &'a NeighborhoodLocks,
    held: Vec<usize>,
}

impl NeighborhoodGuard<'_> {
    /// Stripe indices held by this guard, ascending.
    #[must_use]
    pub fn stripes(&self) -> &[usize] {
        &self.held
    }
}

impl Drop for NeighborhoodGuard<'_> {
    fn drop(&mut self) {
        for idx in self.held.drain(..).rev() {
            self.locks.stripes[idx].release();
        }
    }
}
