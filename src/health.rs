//! Kernel health shared by every component that can panic the database.

use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::error::{ReplicaError, Result};

/// Message attached to every refusal caused by an earlier kernel panic.
pub const KERNEL_PANIC_MESSAGE: &str = "Kernel panic detected: pulled transactions cannot be \
     applied to a non-healthy database. In order to resolve this issue a manual restart of this \
     instance is required.";

/// Description of the failure that panicked the kernel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PanicCause {
    message: Arc<str>,
}

impl PanicCause {
    /// Captures `err` and its source chain as a cause.
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }
        Self {
            message: message.into(),
        }
    }

    /// Human-readable cause.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for PanicCause {}

#[derive(Default)]
struct HealthInner {
    panicked: AtomicBool,
    panics: AtomicU64,
    cause: Mutex<Option<PanicCause>>,
}

/// Shared health flag of the database kernel.
///
/// Cloning yields another handle on the same state. Once panicked the kernel
/// stays unhealthy for the lifetime of the process.
#[derive(Clone, Default)]
pub struct KernelHealth {
    inner: Arc<HealthInner>,
}

impl KernelHealth {
    /// Creates a healthy kernel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false once [`KernelHealth::panic`] was called.
    pub fn is_healthy(&self) -> bool {
        !self.inner.panicked.load(Ordering::Acquire)
    }

    /// Marks the kernel unhealthy. The first cause is kept.
    pub fn panic(&self, cause: &(dyn StdError + 'static)) {
        let captured = PanicCause::from_error(cause);
        {
            let mut slot = self.inner.cause.lock();
            if slot.is_none() {
                *slot = Some(captured.clone());
            }
        }
        self.inner.panics.fetch_add(1, Ordering::Relaxed);
        self.inner.panicked.store(true, Ordering::Release);
        error!(cause = %captured, "kernel.panic");
    }

    /// Cause recorded by the first panic.
    pub fn cause_of_panic(&self) -> Option<PanicCause> {
        self.inner.cause.lock().clone()
    }

    /// Number of panic calls observed.
    pub fn panic_count(&self) -> u64 {
        self.inner.panics.load(Ordering::Relaxed)
    }

    /// Fails with [`ReplicaError::KernelPanic`] when the kernel is unhealthy.
    pub fn assert_healthy(&self) -> Result<()> {
        if self.is_healthy() {
            return Ok(());
        }
        let cause = self
            .cause_of_panic()
            .unwrap_or_else(|| PanicCause::from_error(&ReplicaError::Invalid("unknown cause")));
        Err(ReplicaError::KernelPanic { cause })
    }
}

impl fmt::Debug for KernelHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelHealth")
            .field("healthy", &self.is_healthy())
            .field("panics", &self.panic_count())
            .finish()
    }
}
