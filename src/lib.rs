//! Pipelined GPU command scheduling and Morton-sorted BVH construction.
//! Rust: wgpu 0.19. N-buffered task scheduler, LSD radix sort and pairwise BVH reduction in WGSL.

pub mod accel;
pub mod config;
pub mod core;
pub mod error;
pub mod gpu;

pub use accel::{
    build_bvh, AccelBackend, AccelBuilder, Aabb, BuildState, BuildStats, BuiltBvh, BvhNode,
    BvhPipeline, MeshSource, MortonEntry, PairingRule, PairwiseHalving,
};
pub use config::{AccelConfig, DeviceConfig, PowerPreference};
pub use crate::core::{CommandQueue, GpuBuffer, SyncFence, TaskScheduler, WgpuQueue};
pub use error::{AccelError, AccelResult, ErrorKind};
pub use gpu::GpuContext;
