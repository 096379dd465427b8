//! Start/stop lifecycle gating response acceptance.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{ReplicaError, Result};

/// Lifecycle of a response unpacker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleState {
    /// Created, dependencies not bound yet.
    Uninitialized,
    /// Accepting responses.
    Started,
    /// Refusing responses; a new instance is needed to resume.
    Stopped,
}

impl LifecycleState {
    const fn as_u8(self) -> u8 {
        match self {
            LifecycleState::Uninitialized => 0,
            LifecycleState::Started => 1,
            LifecycleState::Stopped => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecycleState::Uninitialized,
            1 => LifecycleState::Started,
            _ => LifecycleState::Stopped,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Started => "started",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Lifecycle flag readable from any thread.
///
/// A shutdown sequence running on another thread may stop the unpacker while
/// the replication thread is between responses.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    /// Creates an uninitialized lifecycle.
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Uninitialized.as_u8()),
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves to [`LifecycleState::Started`]; starting again while started is allowed.
    pub fn start(&self) -> Result<()> {
        let started = LifecycleState::Started.as_u8();
        match self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
            match LifecycleState::from_u8(raw) {
                LifecycleState::Stopped => None,
                _ => Some(started),
            }
        }) {
            Ok(_) => Ok(()),
            Err(_) => Err(ReplicaError::Invalid(
                "a stopped unpacker cannot be restarted",
            )),
        }
    }

    /// Moves to [`LifecycleState::Stopped`]. Irreversible.
    pub fn stop(&self) {
        self.state
            .store(LifecycleState::Stopped.as_u8(), Ordering::Release);
    }

    /// Fails unless the lifecycle is started.
    pub fn ensure_started(&self) -> Result<()> {
        match self.state() {
            LifecycleState::Started => Ok(()),
            LifecycleState::Stopped => Err(ReplicaError::Stopped),
            LifecycleState::Uninitialized => Err(ReplicaError::NotStarted),
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
