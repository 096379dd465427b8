//! Record locks scoped to the application of a single transaction.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::error::{ReplicaError, Result};
use crate::transaction::RecordKind;

/// Identifies a lock held inside a [`LockGroup`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct LockKey {
    table: u64,
    slot: u64,
}

/// Locks acquired while applying one transaction.
///
/// Every lock added to the group is released when the group is dropped, in
/// reverse acquisition order.
#[derive(Default)]
pub struct LockGroup {
    held: Vec<(Option<LockKey>, Box<dyn Any>)>,
}

impl LockGroup {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of a lock guard until the group is dropped.
    pub fn add<G: 'static>(&mut self, guard: G) {
        self.held.push((None, Box::new(guard)));
    }

    /// Takes ownership of a guard registered under `key`.
    pub fn add_keyed<G: 'static>(&mut self, key: LockKey, guard: G) {
        self.held.push((Some(key), Box::new(guard)));
    }

    /// Returns true when the group already holds `key`.
    pub fn holds(&self, key: LockKey) -> bool {
        self.held.iter().any(|(held, _)| *held == Some(key))
    }

    /// Number of locks held.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Returns true when no lock is held.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl Drop for LockGroup {
    fn drop(&mut self) {
        while let Some(entry) = self.held.pop() {
            drop(entry);
        }
    }
}

const DEFAULT_STRIPES: usize = 64;

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Striped exclusive locks over record ids.
///
/// Store appliers take these while applying pulled transactions so local
/// writers touching the same records wait for the transaction to finish.
pub struct RecordLocks {
    table: u64,
    stripes: Vec<Arc<RwLock<()>>>,
}

impl RecordLocks {
    /// Creates a lock table with `stripes` stripes (at least one).
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            table: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            stripes: (0..stripes).map(|_| Arc::new(RwLock::new(()))).collect(),
        }
    }

    /// Locks the record exclusively and parks the guard in `group`.
    ///
    /// A stripe already held by `group` is not locked twice.
    pub fn lock(&self, kind: RecordKind, id: u64, group: &mut LockGroup) {
        let stripe = self.stripe_of(kind, id);
        let key = LockKey {
            table: self.table,
            slot: stripe as u64,
        };
        if group.holds(key) {
            return;
        }
        let guard = self.stripes[stripe].write_arc();
        group.add_keyed(key, guard);
    }

    /// Like [`RecordLocks::lock`], but gives up after `timeout`.
    ///
    /// Fails with [`ReplicaError::Lock`] when the stripe stays held elsewhere.
    pub fn try_lock_for(
        &self,
        kind: RecordKind,
        id: u64,
        group: &mut LockGroup,
        timeout: Duration,
    ) -> Result<()> {
        let stripe = self.stripe_of(kind, id);
        let key = LockKey {
            table: self.table,
            slot: stripe as u64,
        };
        if group.holds(key) {
            return Ok(());
        }
        let guard = self.stripes[stripe].try_write_arc_for(timeout).ok_or_else(|| {
            ReplicaError::Lock(format!(
                "{kind:?} record {id} still locked after {}ms",
                timeout.as_millis()
            ))
        })?;
        group.add_keyed(key, guard);
        Ok(())
    }

    /// Returns true when the stripe covering the record is currently locked.
    pub fn is_locked(&self, kind: RecordKind, id: u64) -> bool {
        self.stripes[self.stripe_of(kind, id)].is_locked()
    }

    fn stripe_of(&self, kind: RecordKind, id: u64) -> usize {
        let mixed = id.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ (kind as u64);
        (mixed % self.stripes.len() as u64) as usize
    }
}

impl Default for RecordLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
