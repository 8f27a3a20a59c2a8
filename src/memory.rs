//! Memory budget accounting.

use std::error::Error;
use std::fmt;

/// Error returned when a reservation would exceed the configured budget.
#[derive(Debug)]
pub struct MemoryError {
    requested: u64,
    used: u64,
    limit: u64,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory budget exceeded: {} bytes requested, {} of {} already in use",
            self.requested, self.used, self.limit
        )
    }
}

impl Error for MemoryError {}

/// Capacity oracle the queue charges for every long-lived structure it creates.
///
/// The limit is fixed at construction and the running total lives here, owned
/// by the queue instance rather than by process-wide state. A failed
/// reservation is fatal to the triggering operation and is never retried.
#[derive(Debug)]
pub struct MemoryBudget {
    limit: u64,
    used: u64,
}

impl MemoryBudget {
    /// Creates a budget capped at `limit` bytes.
    pub fn limited(limit: u64) -> Self {
        MemoryBudget { limit, used: 0 }
    }

    /// Creates a budget that admits everything.
    pub fn unlimited() -> Self {
        MemoryBudget {
            limit: u64::MAX,
            used: 0,
        }
    }

    /// Checks whether `bytes` more would fit, without reserving them.
    pub fn check(&self, bytes: u64) -> Result<(), MemoryError> {
        match self.used.checked_add(bytes) {
            Some(used) if used <= self.limit => Ok(()),
            _ => Err(MemoryError {
                requested: bytes,
                used: self.used,
                limit: self.limit,
            }),
        }
    }

    /// Charges `bytes` against the budget.
    pub fn reserve(&mut self, bytes: u64) -> Result<(), MemoryError> {
        self.check(bytes)?;
        self.used += bytes;
        log::trace!("reserved {} bytes ({} of {} in use)", bytes, self.used, self.limit);
        Ok(())
    }

    /// Returns `bytes` to the budget.
    pub fn release(&mut self, bytes: u64) {
        self.used = self.used.saturating_sub(bytes);
        log::trace!("released {} bytes ({} of {} in use)", bytes, self.used, self.limit);
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}
