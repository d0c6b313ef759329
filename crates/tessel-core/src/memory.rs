//! Memory Budgets
//!
//! Accounting for memory handed out by an external allocator (typically a
//! graphics device):
//! - Budget configuration per subsystem
//! - Lock-free allocation statistics with peak tracking
//! - Reservation that fails instead of exceeding the budget

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;
use thiserror::Error;

/// Memory budget configuration for subsystems
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryBudget {
    /// Maximum bytes for this subsystem
    pub max_bytes: usize,
    /// Warning threshold (percentage of max)
    pub warning_threshold: f32,
}

impl MemoryBudget {
    /// Budget with no practical limit
    pub fn unlimited() -> Self {
        Self {
            max_bytes: usize::MAX,
            warning_threshold: 1.0,
        }
    }

    /// Budget limited to `max_bytes`
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            ..Default::default()
        }
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024 * 1024, // 256 MB default
            warning_threshold: 0.8,
        }
    }
}

/// A reservation that would exceed the budget
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("memory budget exceeded: requested {requested} bytes with {available} bytes available")]
pub struct BudgetExceeded {
    /// Bytes requested
    pub requested: usize,
    /// Bytes left in the budget
    pub available: usize,
}

/// Memory tracking statistics
#[derive(Debug, Default)]
pub struct MemoryStats {
    /// Total bytes allocated
    pub allocated: AtomicUsize,
    /// Peak bytes allocated
    pub peak: AtomicUsize,
    /// Number of allocations
    pub allocation_count: AtomicUsize,
}

impl MemoryStats {
    /// Create new memory stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an allocation unless it would take the total above `limit`.
    ///
    /// Returns the new total on success.
    pub fn try_record_alloc(&self, size: usize, limit: usize) -> Result<usize, BudgetExceeded> {
        let mut current = self.current();
        loop {
            let available = limit.saturating_sub(current);
            if size > available {
                return Err(BudgetExceeded {
                    requested: size,
                    available,
                });
            }

            match self.allocated.compare_exchange_weak(
                current,
                current + size,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let new_size = current + size;
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        self.peak.fetch_max(new_size, Ordering::Relaxed);
        Ok(new_size)
    }

    /// Record a deallocation
    pub fn record_dealloc(&self, size: usize) {
        self.allocated.fetch_sub(size, Ordering::Relaxed);
    }

    /// Get current allocated bytes
    pub fn current(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Get peak allocated bytes
    pub fn peak_usage(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Get total allocation count
    pub fn count(&self) -> usize {
        self.allocation_count.load(Ordering::Relaxed)
    }
}

/// Budget-enforcing tracker
#[derive(Debug)]
pub struct MemoryTracker {
    budget: MemoryBudget,
    stats: MemoryStats,
}

impl MemoryTracker {
    /// Create a tracker for the given budget
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            budget,
            stats: MemoryStats::new(),
        }
    }

    /// Reserve `size` bytes, failing if the budget would be exceeded
    pub fn try_reserve(&self, size: usize) -> Result<(), BudgetExceeded> {
        let new_size = self.stats.try_record_alloc(size, self.budget.max_bytes)?;

        if new_size as f64 > self.budget.max_bytes as f64 * f64::from(self.budget.warning_threshold) {
            log::warn!(
                "memory usage {} bytes above {:.0}% of budget ({} bytes)",
                new_size,
                self.budget.warning_threshold * 100.0,
                self.budget.max_bytes
            );
        }

        Ok(())
    }

    /// Return `size` bytes to the budget
    pub fn release(&self, size: usize) {
        self.stats.record_dealloc(size);
    }

    /// Get the budget
    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    /// Get memory statistics
    pub fn stats(&self) -> &MemoryStats {
        &self.stats
    }
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new(MemoryBudget::default())
    }
}
