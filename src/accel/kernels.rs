// src/accel/kernels.rs
// WGSL sources for the six build kernels, bound by reference into each stage.
// Defaults are the built-in shaders; callers may substitute their own sources.
// RELEVANT FILES:src/shaders/*.wgsl,src/accel/morton.rs,src/accel/radix_sort.rs,src/accel/bvh_build.rs

use std::borrow::Cow;

/// Kernel sources for one BVH pipeline
///
/// Every kernel has a single `main` entry point and the bind group layout
/// declared by the stage that loads it.
#[derive(Debug, Clone)]
pub struct KernelSources {
    pub morton_codes: Cow<'static, str>,
    pub sort_count: Cow<'static, str>,
    pub sort_prefix_sum: Cow<'static, str>,
    pub sort_scatter: Cow<'static, str>,
    pub bvh_leaves: Cow<'static, str>,
    pub bvh_reduce: Cow<'static, str>,
}

impl KernelSources {
    pub const ENTRY_POINT: &'static str = "main";
}

impl Default for KernelSources {
    fn default() -> Self {
        Self {
            morton_codes: Cow::Borrowed(include_str!("../shaders/morton_codes.wgsl")),
            sort_count: Cow::Borrowed(include_str!("../shaders/sort_count.wgsl")),
            sort_prefix_sum: Cow::Borrowed(include_str!("../shaders/sort_prefix_sum.wgsl")),
            sort_scatter: Cow::Borrowed(include_str!("../shaders/sort_scatter.wgsl")),
            bvh_leaves: Cow::Borrowed(include_str!("../shaders/bvh_leaves.wgsl")),
            bvh_reduce: Cow::Borrowed(include_str!("../shaders/bvh_reduce.wgsl")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_sources_declare_entry_points() {
        let k = KernelSources::default();
        for src in [
            &k.morton_codes,
            &k.sort_count,
            &k.sort_prefix_sum,
            &k.sort_scatter,
            &k.bvh_leaves,
            &k.bvh_reduce,
        ] {
            assert!(src.contains("fn main("));
            assert!(src.contains("@workgroup_size(256)"));
        }
    }
}
