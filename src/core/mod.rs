//! Core scheduling and resource modules
//!
//! Contains the task scheduler, its fences, RAII device buffers and the
//! compute-pass plumbing every build stage records through.

pub mod barriers;
pub mod compute;
pub mod fence;
pub mod memory_tracker;
pub mod queue;
pub mod readback;
pub mod resource;
pub mod scheduler;

pub use barriers::{Access, HazardTracker};
pub use compute::{Binding, ComputeKernel, PassRecorder};
pub use fence::SyncFence;
pub use memory_tracker::{MemoryMetrics, ResourceId, ResourceRegistry};
pub use queue::{CommandQueue, WgpuQueue, WgpuRecorder};
pub use readback::read_buffer;
pub use resource::GpuBuffer;
pub use scheduler::{SchedulerStats, TaskScheduler};
