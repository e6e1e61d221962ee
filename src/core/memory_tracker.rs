//! Memory tracking and budget enforcement for build buffers.
//!
//! Every `GpuBuffer` registers its size here on creation and unregisters on
//! drop, so the registry always reflects the live allocations of one
//! `GpuContext`. Budget checks run before the device is touched.

use crate::error::AccelError;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use wgpu::BufferUsages;

/// Stable identity of a tracked buffer, used by hazard tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// Error type for budget enforcement violations.
#[derive(thiserror::Error, Debug)]
pub enum BudgetError {
    #[error("Memory budget exceeded: current {current_bytes} bytes + requested {requested_bytes} bytes would exceed limit of {limit_bytes} bytes")]
    BudgetExceeded {
        current_bytes: u64,
        requested_bytes: u64,
        limit_bytes: u64,
    },
}

impl From<BudgetError> for AccelError {
    fn from(err: BudgetError) -> Self {
        AccelError::allocation(err)
    }
}

/// Memory usage metrics for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryMetrics {
    /// Number of live tracked buffers
    pub buffer_count: usize,
    /// Total bytes in live tracked buffers
    pub buffer_bytes: u64,
    /// Subset of `buffer_bytes` that is mappable by the host
    pub host_visible_bytes: u64,
    /// Current budget limit in bytes (0 = unlimited)
    pub limit_bytes: u64,
    pub within_budget: bool,
}

impl MemoryMetrics {
    /// Utilization as a fraction of the budget (0.0 to 1.0+).
    pub fn utilization_ratio(&self) -> f64 {
        if self.limit_bytes == 0 {
            0.0
        } else {
            self.buffer_bytes as f64 / self.limit_bytes as f64
        }
    }
}

/// Registry of live buffer allocations for one device context.
///
/// Uses atomic operations so stages on any thread can allocate without locks.
#[derive(Debug)]
pub struct ResourceRegistry {
    next_id: AtomicU64,
    buffer_count: AtomicUsize,
    buffer_bytes: AtomicU64,
    host_visible_bytes: AtomicU64,
    // 0 = no limit
    limit_bytes: AtomicU64,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            buffer_count: AtomicUsize::new(0),
            buffer_bytes: AtomicU64::new(0),
            host_visible_bytes: AtomicU64::new(0),
            limit_bytes: AtomicU64::new(0),
        }
    }

    /// Set the memory budget limit in bytes. 0 disables enforcement.
    pub fn set_budget_limit(&self, limit_bytes: u64) {
        self.limit_bytes.store(limit_bytes, Ordering::Relaxed);
    }

    pub fn budget_limit(&self) -> u64 {
        self.limit_bytes.load(Ordering::Relaxed)
    }

    /// Check whether `additional_bytes` more would still fit in the budget.
    pub fn check_budget(&self, additional_bytes: u64) -> Result<(), BudgetError> {
        check_within(
            self.limit_bytes.load(Ordering::Relaxed),
            self.buffer_bytes.load(Ordering::Relaxed),
            additional_bytes,
        )
    }

    /// Record a new buffer and hand out its id.
    pub fn track_buffer(&self, size: u64, usage: BufferUsages) -> ResourceId {
        self.buffer_count.fetch_add(1, Ordering::Relaxed);
        self.buffer_bytes.fetch_add(size, Ordering::Relaxed);
        if is_host_visible_usage(usage) {
            self.host_visible_bytes.fetch_add(size, Ordering::Relaxed);
        }
        ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn free_buffer(&self, size: u64, usage: BufferUsages) {
        self.buffer_count.fetch_sub(1, Ordering::Relaxed);
        self.buffer_bytes.fetch_sub(size, Ordering::Relaxed);
        if is_host_visible_usage(usage) {
            self.host_visible_bytes.fetch_sub(size, Ordering::Relaxed);
        }
    }

    pub fn metrics(&self) -> MemoryMetrics {
        let buffer_bytes = self.buffer_bytes.load(Ordering::Relaxed);
        let limit_bytes = self.limit_bytes.load(Ordering::Relaxed);
        MemoryMetrics {
            buffer_count: self.buffer_count.load(Ordering::Relaxed),
            buffer_bytes,
            host_visible_bytes: self.host_visible_bytes.load(Ordering::Relaxed),
            limit_bytes,
            within_budget: limit_bytes == 0 || buffer_bytes <= limit_bytes,
        }
    }
}

/// `current + requested` against `limit`; a zero limit never fails.
pub fn check_within(
    limit_bytes: u64,
    current_bytes: u64,
    requested_bytes: u64,
) -> Result<(), BudgetError> {
    if limit_bytes == 0 || current_bytes + requested_bytes <= limit_bytes {
        return Ok(());
    }
    Err(BudgetError::BudgetExceeded {
        current_bytes,
        requested_bytes,
        limit_bytes,
    })
}

/// Whether a buffer usage pattern is host-mappable.
pub fn is_host_visible_usage(usage: BufferUsages) -> bool {
    usage.contains(BufferUsages::MAP_READ) || usage.contains(BufferUsages::MAP_WRITE)
}
