// src/accel/host.rs
// Host reference path for the Morton -> sort -> reduce build, used as the CPU fallback
// and as the oracle the GPU results are checked against.
// RELEVANT FILES:src/accel/morton.rs,src/accel/radix_sort.rs,src/accel/bvh_build.rs,src/accel/mod.rs

use crate::accel::bvh_build::{BuildSchedule, PairingRule, ROOT_INDEX};
use crate::accel::mesh::MeshSource;
use crate::accel::morton::{inv_extent, morton_key};
use crate::accel::radix_sort::{RADIX_BITS, RADIX_BUCKETS, RADIX_PASSES};
use crate::accel::types::{Aabb, BuildCursor, BuildStats, BvhNode, MortonEntry};
use crate::error::{AccelError, AccelResult};
use glam::Vec3;
use std::time::Instant;

/// A BVH built entirely on the host
#[derive(Debug, Clone)]
pub struct HostBvh {
    /// Entries sorted ascending by key
    pub entries: Vec<MortonEntry>,
    pub nodes: Vec<BvhNode>,
    pub schedule: BuildSchedule,
    pub world_aabb: Aabb,
    pub stats: BuildStats,
}

impl HostBvh {
    pub fn root(&self) -> &BvhNode {
        &self.nodes[ROOT_INDEX as usize]
    }
}

/// One unsorted entry per triangle, keyed against `scene`.
pub fn morton_entries(mesh: &MeshSource, scene: &Aabb) -> Vec<MortonEntry> {
    let min = Vec3::from_array(scene.min);
    let inv = inv_extent(scene);
    (0..mesh.triangle_count())
        .map(|i| {
            let centroid = mesh.triangle_aabb(i).center();
            MortonEntry::new(morton_key(centroid, min, inv), i as u32)
        })
        .collect()
}

/// Bucket sizes of the digit at `shift`
pub fn count_digits(entries: &[MortonEntry], shift: u32) -> [u32; RADIX_BUCKETS] {
    let mut histogram = [0u32; RADIX_BUCKETS];
    for e in entries {
        histogram[((e.key >> shift) & 0xff) as usize] += 1;
    }
    histogram
}

/// Exclusive running offsets of a histogram
pub fn exclusive_prefix_sum(histogram: &[u32; RADIX_BUCKETS]) -> [u32; RADIX_BUCKETS] {
    let mut offsets = [0u32; RADIX_BUCKETS];
    let mut running = 0;
    for (offset, count) in offsets.iter_mut().zip(histogram) {
        *offset = running;
        running += count;
    }
    offsets
}

/// Stable scatter of `src` into `dst` by the digit at `shift`.
pub fn scatter_digits(
    src: &[MortonEntry],
    dst: &mut [MortonEntry],
    mut offsets: [u32; RADIX_BUCKETS],
    shift: u32,
) {
    for e in src {
        let bucket = ((e.key >> shift) & 0xff) as usize;
        dst[offsets[bucket] as usize] = *e;
        offsets[bucket] += 1;
    }
}

/// LSD radix sort, one count / prefix-sum / scatter per 8-bit digit.
pub fn radix_sort(entries: &[MortonEntry]) -> Vec<MortonEntry> {
    let mut src = entries.to_vec();
    let mut dst = vec![MortonEntry::default(); entries.len()];
    for digit in 0..RADIX_PASSES {
        let shift = digit * RADIX_BITS;
        let offsets = exclusive_prefix_sum(&count_digits(&src, shift));
        scatter_digits(&src, &mut dst, offsets, shift);
        std::mem::swap(&mut src, &mut dst);
    }
    src
}

fn union_pair<R: PairingRule>(rule: &R, level: &[Aabb], slot: u32) -> Aabb {
    let (a, b) = rule.pair(slot, level.len() as u32);
    level[a as usize].union(&level[b as usize])
}

fn run_level<R: PairingRule>(rule: &R, nodes: &mut [BvhNode], cursor: BuildCursor) {
    let start = cursor.previous_level_base as usize;
    let inputs: Vec<Aabb> = nodes[start..start + cursor.remaining_count as usize]
        .iter()
        .map(|n| n.aabb)
        .collect();
    for slot in 0..cursor.output_count() {
        let out = (cursor.current_level_base + slot) as usize;
        nodes[out] = BvhNode::new(union_pair(rule, &inputs, slot));
    }
}

/// Walk `schedule` over `sorted` and return the flat node array.
pub fn build_nodes<R: PairingRule>(
    rule: &R,
    schedule: &BuildSchedule,
    mesh: &MeshSource,
    sorted: &[MortonEntry],
) -> AccelResult<Vec<BvhNode>> {
    if sorted.len() != schedule.primitive_count() as usize {
        return Err(AccelError::precondition(format!(
            "schedule covers {} primitives, got {} sorted entries",
            schedule.primitive_count(),
            sorted.len()
        )));
    }
    if let Some(e) = sorted
        .iter()
        .find(|e| e.primitive_index as usize >= mesh.triangle_count())
    {
        return Err(AccelError::precondition(format!(
            "sorted entry references triangle {} of {}",
            e.primitive_index,
            mesh.triangle_count()
        )));
    }

    let mut nodes = vec![BvhNode::new(Aabb::empty()); schedule.node_count() as usize];

    let leaf = schedule.leaf_pass();
    let prims: Vec<Aabb> = sorted
        .iter()
        .map(|e| mesh.triangle_aabb(e.primitive_index as usize))
        .collect();
    for slot in 0..leaf.output_count() {
        nodes[(leaf.current_level_base + slot) as usize] =
            BvhNode::new(union_pair(rule, &prims, slot));
    }

    for cursor in schedule.reduction_passes() {
        run_level(rule, &mut nodes, *cursor);
    }
    run_level(rule, &mut nodes, schedule.root_pass());
    Ok(nodes)
}

/// Full host build of `mesh` with `rule`.
pub fn build<R: PairingRule>(rule: &R, mesh: &MeshSource) -> AccelResult<HostBvh> {
    let started = Instant::now();
    mesh.validate()?;
    let schedule = rule.schedule(mesh.triangle_count() as u32)?;
    let world_aabb = mesh.scene_aabb();

    let t = Instant::now();
    let unsorted = morton_entries(mesh, &world_aabb);
    let morton_time_ms = t.elapsed().as_secs_f32() * 1000.0;

    let t = Instant::now();
    let entries = radix_sort(&unsorted);
    let sort_time_ms = t.elapsed().as_secs_f32() * 1000.0;

    let t = Instant::now();
    let nodes = build_nodes(rule, &schedule, mesh, &entries)?;
    let reduce_time_ms = t.elapsed().as_secs_f32() * 1000.0;

    let stats = BuildStats {
        build_time_ms: started.elapsed().as_secs_f32() * 1000.0,
        morton_time_ms,
        sort_time_ms,
        reduce_time_ms,
        primitive_count: schedule.primitive_count(),
        leaf_count: schedule.leaf_count(),
        node_count: schedule.node_count(),
        reduction_passes: schedule.reduction_passes().len() as u32,
        dispatch_count: 0,
        barrier_count: 0,
        memory_usage_bytes: (nodes.len() * std::mem::size_of::<BvhNode>()
            + entries.len() * std::mem::size_of::<MortonEntry>()) as u64,
    };
    log::debug!(
        "host BVH: {} primitives -> {} nodes in {:.2} ms",
        stats.primitive_count,
        stats.node_count,
        stats.build_time_ms
    );

    Ok(HostBvh {
        entries,
        nodes,
        schedule,
        world_aabb,
        stats,
    })
}
