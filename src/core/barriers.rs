//! Read/write hazard tracking between dependent compute passes.
//!
//! Mirrors the device-side barrier discipline on the host: every access a
//! dispatch makes stays pending until a barrier over that resource is
//! recorded. A conflicting access (either side a write) to a resource with
//! a pending access is refused before anything reaches the encoder.

use crate::core::memory_tracker::ResourceId;
use crate::error::{AccelError, AccelResult};
use std::collections::HashMap;

/// How a pass touches a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone)]
struct PendingAccess {
    pass: String,
    name: String,
    written: bool,
}

/// Tracks unbarriered accesses for one recording
#[derive(Debug, Default)]
pub struct HazardTracker {
    pending: HashMap<ResourceId, PendingAccess>,
    dispatch_count: u32,
    barrier_count: u32,
}

impl HazardTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse `accesses` if any conflicts with an unbarriered earlier access.
    pub fn check(&self, pass: &str, accesses: &[(ResourceId, &str, Access)]) -> AccelResult<()> {
        for &(id, name, access) in accesses {
            if let Some(prev) = self.pending.get(&id) {
                if prev.written || access == Access::Write {
                    let (earlier, later) = if prev.written {
                        ("written", "accessed")
                    } else {
                        ("read", "written")
                    };
                    return Err(AccelError::hazard(format!(
                        "'{}' {} by '{}' is {} by '{}' without a barrier",
                        name, earlier, prev.pass, later, pass
                    )));
                }
            }
        }
        Ok(())
    }

    /// Record a pass's accesses after it passed `check`.
    pub fn record(&mut self, pass: &str, accesses: &[(ResourceId, &str, Access)]) {
        for &(id, name, access) in accesses {
            let entry = self.pending.entry(id).or_insert_with(|| PendingAccess {
                pass: pass.to_string(),
                name: name.to_string(),
                written: false,
            });
            entry.pass = pass.to_string();
            entry.written |= access == Access::Write;
        }
        self.dispatch_count += 1;
    }

    /// Make all pending accesses to `resources` complete and visible.
    pub fn barrier(&mut self, resources: &[ResourceId]) {
        for id in resources {
            self.pending.remove(id);
        }
        self.barrier_count += 1;
    }

    pub fn has_pending(&self, id: ResourceId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn dispatch_count(&self) -> u32 {
        self.dispatch_count
    }

    pub fn barrier_count(&self) -> u32 {
        self.barrier_count
    }
}
