// src/accel/morton.rs
// Morton code stage: maps triangle centroids to 30-bit Z-order keys against the scene bounds.
// Host encoding helpers here are bit-for-bit the same as src/shaders/morton_codes.wgsl.
// RELEVANT FILES:src/shaders/morton_codes.wgsl,src/accel/radix_sort.rs,src/accel/host.rs

use crate::accel::kernels::KernelSources;
use crate::accel::mesh::GpuMesh;
use crate::accel::types::{Aabb, MortonEntry};
use crate::core::compute::{Binding, ComputeKernel, PassRecorder};
use crate::core::resource::GpuBuffer;
use crate::error::{AccelError, AccelResult};
use crate::gpu::{workgroups_for, GpuContext};
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Quantization bits per axis; three axes fill the low 30 bits of a key
pub const MORTON_BITS_PER_AXIS: u32 = 10;
const MORTON_GRID: f32 = (1u32 << MORTON_BITS_PER_AXIS) as f32;

/// Spread the low 10 bits of `v` so two zero bits separate each bit.
#[inline]
pub fn expand_bits(v: u32) -> u32 {
    let mut v = v & 0x3ff;
    v = v.wrapping_mul(0x0001_0001) & 0xff00_00ff;
    v = v.wrapping_mul(0x0000_0101) & 0x0f00_f00f;
    v = v.wrapping_mul(0x0000_0011) & 0xc30c_30c3;
    v = v.wrapping_mul(0x0000_0005) & 0x4924_9249;
    v
}

/// Interleave three 10-bit cell coordinates, x highest.
#[inline]
pub fn encode(x: u32, y: u32, z: u32) -> u32 {
    (expand_bits(x) << 2) | (expand_bits(y) << 1) | expand_bits(z)
}

/// Map a normalized coordinate to a grid cell, clamping out-of-range input.
#[inline]
pub fn quantize(x: f32) -> u32 {
    (x.clamp(0.0, 1.0) * MORTON_GRID).min(MORTON_GRID - 1.0) as u32
}

/// Reciprocal scene extent; 0 on a flat axis so every key lands in cell 0 there.
pub fn inv_extent(scene: &Aabb) -> Vec3 {
    let extent = Vec3::from_array(scene.extent());
    Vec3::select(
        extent.cmpgt(Vec3::splat(f32::EPSILON)),
        extent.recip(),
        Vec3::ZERO,
    )
}

/// Key of a point relative to the scene box
pub fn morton_key(point: [f32; 3], scene_min: Vec3, inv_extent: Vec3) -> u32 {
    let n = (Vec3::from_array(point) - scene_min) * inv_extent;
    encode(quantize(n.x), quantize(n.y), quantize(n.z))
}

/// Uniforms for Morton code generation
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MortonUniforms {
    scene_min: [f32; 3],
    primitive_count: u32,
    inv_extent: [f32; 3],
    _pad0: u32,
}

impl MortonUniforms {
    fn new(primitive_count: u32, scene: &Aabb) -> Self {
        Self {
            scene_min: scene.min,
            primitive_count,
            inv_extent: inv_extent(scene).to_array(),
            _pad0: 0,
        }
    }
}

/// Writes one unsorted `MortonEntry` per triangle into its entry buffer
pub struct MortonCodeStage {
    kernel: ComputeKernel,
    uniforms: GpuBuffer,
    entries: GpuBuffer,
    primitive_count: u32,
    scene: Aabb,
}

impl MortonCodeStage {
    pub fn new(
        ctx: &GpuContext,
        kernels: &KernelSources,
        primitive_count: u32,
        scene: Aabb,
    ) -> AccelResult<Self> {
        if primitive_count == 0 {
            return Err(AccelError::precondition(
                "Morton stage needs at least one primitive",
            ));
        }
        if !scene.is_valid() {
            return Err(AccelError::precondition(format!(
                "scene bounds are inverted: {:?}",
                scene
            )));
        }

        let kernel = ComputeKernel::new(
            ctx,
            "morton-codes",
            &kernels.morton_codes,
            KernelSources::ENTRY_POINT,
            &[
                Binding::Uniform,
                Binding::READ,
                Binding::READ,
                Binding::READ_WRITE,
            ],
        )?;
        let uniforms = GpuBuffer::uniform_init(
            ctx,
            "morton-uniforms",
            bytemuck::bytes_of(&MortonUniforms::new(primitive_count, &scene)),
        )?;
        let entries = GpuBuffer::storage(
            ctx,
            "morton-entries",
            primitive_count as u64 * std::mem::size_of::<MortonEntry>() as u64,
        )?;

        Ok(Self {
            kernel,
            uniforms,
            entries,
            primitive_count,
            scene,
        })
    }

    /// Record key generation for every triangle of `mesh`.
    pub fn record(&self, pass: &mut PassRecorder<'_>, mesh: &GpuMesh) -> AccelResult<()> {
        if mesh.triangle_count() != self.primitive_count {
            return Err(AccelError::precondition(format!(
                "Morton stage sized for {} primitives, mesh has {}",
                self.primitive_count,
                mesh.triangle_count()
            )));
        }
        pass.dispatch(
            &self.kernel,
            &[&self.uniforms, mesh.vertices(), mesh.indices(), &self.entries],
            workgroups_for(self.primitive_count, crate::config::KERNEL_WORKGROUP_SIZE),
        )?;
        log::debug!("recorded Morton keys for {} primitives", self.primitive_count);
        Ok(())
    }

    /// Re-normalize against new scene bounds for the next build.
    pub fn set_scene_bounds(&mut self, ctx: &GpuContext, scene: Aabb) -> AccelResult<()> {
        if !scene.is_valid() {
            return Err(AccelError::precondition(format!(
                "scene bounds are inverted: {:?}",
                scene
            )));
        }
        let uniforms = MortonUniforms::new(self.primitive_count, &scene);
        ctx.queue
            .write_buffer(self.uniforms.raw(), 0, bytemuck::bytes_of(&uniforms));
        self.scene = scene;
        Ok(())
    }

    /// Unsorted entries; sorted in place by the radix sort stage
    pub fn entries(&self) -> &GpuBuffer {
        &self.entries
    }

    pub fn primitive_count(&self) -> u32 {
        self.primitive_count
    }

    pub fn scene_bounds(&self) -> &Aabb {
        &self.scene
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_bits_spreads_every_third_bit() {
        assert_eq!(expand_bits(0), 0);
        assert_eq!(expand_bits(1), 1);
        assert_eq!(expand_bits(0b11), 0b1001);
        assert_eq!(expand_bits(0x3ff), 0x0924_9249);
        // only the low 10 bits count
        assert_eq!(expand_bits(0x7ff), expand_bits(0x3ff));
    }

    #[test]
    fn encode_puts_x_highest() {
        assert_eq!(encode(1, 0, 0), 0b100);
        assert_eq!(encode(0, 1, 0), 0b010);
        assert_eq!(encode(0, 0, 1), 0b001);
        assert_eq!(encode(1023, 1023, 1023), 0x3fff_ffff);
    }

    #[test]
    fn quantize_clamps_to_grid() {
        assert_eq!(quantize(-0.5), 0);
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(0.5), 512);
        assert_eq!(quantize(1.0), 1023);
        assert_eq!(quantize(7.0), 1023);
    }

    #[test]
    fn flat_axis_collapses_to_zero() {
        let scene = Aabb::new([0.0, 0.0, 5.0], [2.0, 4.0, 5.0]);
        let inv = inv_extent(&scene);
        assert_eq!(inv.z, 0.0);
        let min = Vec3::from_array(scene.min);
        let key = morton_key([2.0, 4.0, 5.0], min, inv);
        assert_eq!(key, encode(1023, 1023, 0));
    }

    #[test]
    fn nearby_points_share_high_bits() {
        let scene = Aabb::new([0.0; 3], [1.0; 3]);
        let (min, inv) = (Vec3::ZERO, inv_extent(&scene));
        let a = morton_key([0.10, 0.10, 0.10], min, inv);
        let b = morton_key([0.11, 0.10, 0.10], min, inv);
        let far = morton_key([0.90, 0.90, 0.90], min, inv);
        assert!(a.abs_diff(b) < a.abs_diff(far));
    }
}
