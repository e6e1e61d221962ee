// src/accel/validate.rs
// Structural checks for built node arrays and sorted entry arrays.
// Used by tests and by callers that read results back for diagnostics.
// RELEVANT FILES:src/accel/host.rs,src/accel/pipeline.rs

use crate::accel::bvh_build::{BuildSchedule, PairingRule, ROOT_INDEX};
use crate::accel::mesh::MeshSource;
use crate::accel::types::{Aabb, BuildCursor, BvhNode, MortonEntry};
use anyhow::{bail, ensure, Result};

/// `sorted` is non-decreasing by key and a permutation of `input`.
pub fn check_sorted(input: &[MortonEntry], sorted: &[MortonEntry]) -> Result<()> {
    ensure!(
        input.len() == sorted.len(),
        "sort changed the entry count from {} to {}",
        input.len(),
        sorted.len()
    );
    if let Some(i) = sorted.windows(2).position(|w| w[0].key > w[1].key) {
        bail!(
            "keys out of order at {}: {:#x} > {:#x}",
            i,
            sorted[i].key,
            sorted[i + 1].key
        );
    }

    let mut a = input.to_vec();
    let mut b = sorted.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    ensure!(a == b, "sorted entries are not a permutation of the input");
    Ok(())
}

fn check_level<R: PairingRule>(
    rule: &R,
    nodes: &[BvhNode],
    children: &[Aabb],
    cursor: BuildCursor,
    what: &str,
) -> Result<()> {
    for slot in 0..cursor.output_count() {
        let index = (cursor.current_level_base + slot) as usize;
        let parent = &nodes[index].aabb;
        let (a, b) = rule.pair(slot, cursor.remaining_count);
        for child in [a, b] {
            let child_box = &children[child as usize];
            ensure!(
                parent.contains(child_box),
                "{} node {} {:?} does not contain child {} {:?}",
                what,
                index,
                parent,
                child,
                child_box
            );
        }
    }
    Ok(())
}

fn level(nodes: &[BvhNode], cursor: BuildCursor) -> Vec<Aabb> {
    let start = cursor.previous_level_base as usize;
    nodes[start..start + cursor.remaining_count as usize]
        .iter()
        .map(|n| n.aabb)
        .collect()
}

/// Every node contains its children and the root is exactly the union of
/// all primitive boxes.
pub fn check_bvh<R: PairingRule>(
    rule: &R,
    schedule: &BuildSchedule,
    mesh: &MeshSource,
    sorted: &[MortonEntry],
    nodes: &[BvhNode],
) -> Result<()> {
    ensure!(
        nodes.len() >= schedule.node_count() as usize,
        "node array has {} nodes, schedule needs {}",
        nodes.len(),
        schedule.node_count()
    );
    ensure!(
        sorted.len() == schedule.primitive_count() as usize,
        "{} sorted entries for {} primitives",
        sorted.len(),
        schedule.primitive_count()
    );

    let prims: Vec<Aabb> = sorted
        .iter()
        .map(|e| mesh.triangle_aabb(e.primitive_index as usize))
        .collect();
    check_level(rule, nodes, &prims, schedule.leaf_pass(), "leaf")?;
    for cursor in schedule.reduction_passes() {
        check_level(rule, nodes, &level(nodes, *cursor), *cursor, "internal")?;
    }
    let root_cursor = schedule.root_pass();
    check_level(rule, nodes, &level(nodes, root_cursor), root_cursor, "root")?;

    let root = &nodes[ROOT_INDEX as usize].aabb;
    let expected = mesh.scene_aabb();
    ensure!(
        root.same_bounds(&expected),
        "root {:?} is not the union of all primitives {:?}",
        root,
        expected
    );
    Ok(())
}
