// src/accel/types.rs
// Core types for the Morton/sort/reduce BVH build - AABB, nodes, sort entries, cursor and build state.
// GPU-visible structs use layouts that match the WGSL kernels byte for byte.
// RELEVANT FILES:src/accel/bvh_build.rs,src/shaders/bvh_leaves.wgsl,src/shaders/bvh_reduce.wgsl

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned bounding box - GPU compatible layout
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Aabb {
    pub min: [f32; 3],
    pub _pad0: f32,
    pub max: [f32; 3],
    pub _pad1: f32,
}

impl Aabb {
    /// Create empty AABB (inverted bounds for union operations)
    pub fn empty() -> Self {
        Self {
            min: [f32::INFINITY; 3],
            _pad0: 0.0,
            max: [f32::NEG_INFINITY; 3],
            _pad1: 0.0,
        }
    }

    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self {
            min,
            _pad0: 0.0,
            max,
            _pad1: 0.0,
        }
    }

    /// Smallest box containing all `points`
    pub fn from_points(points: &[[f32; 3]]) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.expand_point(*p);
        }
        aabb
    }

    pub fn expand_point(&mut self, point: [f32; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(point[i]);
            self.max[i] = self.max[i].max(point[i]);
        }
    }

    pub fn expand_aabb(&mut self, other: &Aabb) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(other.min[i]);
            self.max[i] = self.max[i].max(other.max[i]);
        }
    }

    /// Component-wise union of two boxes
    pub fn union(&self, other: &Aabb) -> Aabb {
        let mut out = *self;
        out.expand_aabb(other);
        out
    }

    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    pub fn extent(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Check if AABB is valid (min <= max)
    pub fn is_valid(&self) -> bool {
        self.min[0] <= self.max[0] && self.min[1] <= self.max[1] && self.min[2] <= self.max[2]
    }

    /// `other` lies entirely inside this box (boundaries inclusive)
    pub fn contains(&self, other: &Aabb) -> bool {
        (0..3).all(|i| other.min[i] >= self.min[i] && other.max[i] <= self.max[i])
    }

    /// Same corners, ignoring padding
    pub fn same_bounds(&self, other: &Aabb) -> bool {
        self.min == other.min && self.max == other.max
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

/// BVH node - one box in the flat node array
///
/// Children are implicit: they are addressed through the build schedule,
/// not stored in the node.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb: Aabb,
}

impl BvhNode {
    pub fn new(aabb: Aabb) -> Self {
        Self { aabb }
    }
}

/// Sort record: spatial key plus the triangle it came from
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
pub struct MortonEntry {
    pub key: u32,
    pub primitive_index: u32,
}

impl MortonEntry {
    pub fn new(key: u32, primitive_index: u32) -> Self {
        Self {
            key,
            primitive_index,
        }
    }
}

/// Where one build pass reads from and writes to in the flat node array.
///
/// For the leaf pass `remaining_count` is the primitive count and
/// `previous_level_base` is unused; for the root pass
/// `current_level_base` is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCursor {
    pub remaining_count: u32,
    pub previous_level_base: u32,
    pub current_level_base: u32,
}

impl BuildCursor {
    /// Number of nodes this pass writes
    pub fn output_count(&self) -> u32 {
        (self.remaining_count + 1) / 2
    }
}

/// Uniform block the build kernels read a cursor from
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct CursorUniforms {
    pub remaining_count: u32,
    pub previous_level_base: u32,
    pub current_level_base: u32,
    pub _pad0: u32,
}

impl From<BuildCursor> for CursorUniforms {
    fn from(c: BuildCursor) -> Self {
        Self {
            remaining_count: c.remaining_count,
            previous_level_base: c.previous_level_base,
            current_level_base: c.current_level_base,
            _pad0: 0,
        }
    }
}

/// Progress of one BVH build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildState {
    Idle,
    Sorting,
    BuildingLeaves,
    /// Reduction pass `k`, counted from 0
    Reducing(u32),
    BuildingRoot,
    Done,
}

impl BuildState {
    pub fn is_done(&self) -> bool {
        matches!(self, BuildState::Done)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildState::Idle => f.write_str("idle"),
            BuildState::Sorting => f.write_str("sorting"),
            BuildState::BuildingLeaves => f.write_str("building leaves"),
            BuildState::Reducing(k) => write!(f, "reducing (pass {})", k),
            BuildState::BuildingRoot => f.write_str("building root"),
            BuildState::Done => f.write_str("done"),
        }
    }
}

/// Statistics from one BVH construction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildStats {
    /// Host time spent recording (GPU) or computing (host path)
    pub build_time_ms: f32,
    pub morton_time_ms: f32,
    pub sort_time_ms: f32,
    pub reduce_time_ms: f32,
    pub primitive_count: u32,
    pub leaf_count: u32,
    pub node_count: u32,
    pub reduction_passes: u32,
    pub dispatch_count: u32,
    pub barrier_count: u32,
    pub memory_usage_bytes: u64,
}
