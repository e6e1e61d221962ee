// src/accel/mesh.rs
// Triangle mesh input for BVH builds and its upload into GPU storage buffers.
// Uploads go through a one-shot record/execute/flush on the task scheduler.
// RELEVANT FILES:src/accel/pipeline.rs,src/core/scheduler.rs,src/shaders/morton_codes.wgsl

use crate::accel::types::Aabb;
use crate::core::queue::WgpuQueue;
use crate::core::resource::GpuBuffer;
use crate::core::scheduler::TaskScheduler;
use crate::error::{AccelError, AccelResult};
use glam::Vec3;
use wgpu::BufferUsages;

/// Indexed triangle mesh on the host
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshSource {
    pub vertices: Vec<[f32; 3]>,
    pub indices: Vec<[u32; 3]>,
}

impl MeshSource {
    pub fn new(vertices: Vec<[f32; 3]>, indices: Vec<[u32; 3]>) -> Self {
        Self { vertices, indices }
    }

    /// One triangle per box, spanning exactly that box.
    pub fn from_boxes(boxes: &[Aabb]) -> Self {
        let mut vertices = Vec::with_capacity(boxes.len() * 3);
        let mut indices = Vec::with_capacity(boxes.len());
        for (i, b) in boxes.iter().enumerate() {
            let base = (i * 3) as u32;
            vertices.push(b.min);
            vertices.push(b.max);
            vertices.push(b.center());
            indices.push([base, base + 1, base + 2]);
        }
        Self { vertices, indices }
    }

    /// Unit cube (12 triangles)
    pub fn cube() -> Self {
        let vertices = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            [0.0, 1.0, 1.0],
        ];
        let indices = vec![
            [0, 1, 2],
            [0, 2, 3],
            [1, 5, 6],
            [1, 6, 2],
            [5, 4, 7],
            [5, 7, 6],
            [4, 0, 3],
            [4, 3, 7],
            [3, 2, 6],
            [3, 6, 7],
            [4, 5, 1],
            [4, 1, 0],
        ];
        Self { vertices, indices }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_aabb(&self, index: usize) -> Aabb {
        let [a, b, c] = self.indices[index];
        Aabb::from_points(&[
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ])
    }

    /// Union of all triangle boxes
    pub fn scene_aabb(&self) -> Aabb {
        let (lo, hi) = (0..self.triangle_count())
            .map(|i| self.triangle_aabb(i))
            .fold(
                (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
                |(lo, hi), b| {
                    (
                        lo.min(Vec3::from_array(b.min)),
                        hi.max(Vec3::from_array(b.max)),
                    )
                },
            );
        Aabb::new(lo.to_array(), hi.to_array())
    }

    /// Reject meshes a build cannot consume.
    pub fn validate(&self) -> AccelResult<()> {
        if self.indices.is_empty() {
            return Err(AccelError::precondition("mesh has no triangles"));
        }
        if self.indices.len() > u32::MAX as usize / 3 {
            return Err(AccelError::precondition(format!(
                "mesh has {} triangles, more than a 32-bit index can address",
                self.indices.len()
            )));
        }

        let vertex_count = self.vertices.len();
        for (t, tri) in self.indices.iter().enumerate() {
            for &v in tri {
                if v as usize >= vertex_count {
                    return Err(AccelError::precondition(format!(
                        "triangle {} references vertex {} but the mesh has {} vertices",
                        t, v, vertex_count
                    )));
                }
            }
        }

        if let Some(i) = self
            .vertices
            .iter()
            .position(|v| !v.iter().all(|c| c.is_finite()))
        {
            return Err(AccelError::precondition(format!(
                "vertex {} has a non-finite coordinate",
                i
            )));
        }
        Ok(())
    }

    /// Vertices widened to `vec4` for storage-buffer alignment
    pub(crate) fn padded_vertices(&self) -> Vec<[f32; 4]> {
        self.vertices
            .iter()
            .map(|v| [v[0], v[1], v[2], 1.0])
            .collect()
    }
}

/// Mesh resident in device storage buffers
#[derive(Debug)]
pub struct GpuMesh {
    vertices: GpuBuffer,
    indices: GpuBuffer,
    triangle_count: u32,
    vertex_count: u32,
}

impl GpuMesh {
    /// Validate `mesh` and copy it to the device.
    ///
    /// Records the copies in a frame of their own and flushes, so the
    /// staging buffers are released only after the device has read them.
    pub fn upload(scheduler: &mut TaskScheduler<WgpuQueue>, mesh: &MeshSource) -> AccelResult<Self> {
        mesh.validate()?;
        let ctx = scheduler.queue().context().clone();

        let vertex_data = mesh.padded_vertices();
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertex_data);
        let index_bytes: &[u8] = bytemuck::cast_slice(&mesh.indices);

        let vertices = GpuBuffer::storage(&ctx, "mesh-vertices", vertex_bytes.len() as u64)?;
        let indices = GpuBuffer::storage(&ctx, "mesh-indices", index_bytes.len() as u64)?;

        let vertex_staging = GpuBuffer::with_contents(
            &ctx,
            "mesh-vertices-staging",
            vertex_bytes,
            BufferUsages::COPY_SRC,
        )?;
        let index_staging = GpuBuffer::with_contents(
            &ctx,
            "mesh-indices-staging",
            index_bytes,
            BufferUsages::COPY_SRC,
        )?;

        scheduler.record()?;
        let encoder = scheduler.encoder()?;
        encoder.copy_buffer_to_buffer(
            vertex_staging.raw(),
            0,
            vertices.raw(),
            0,
            vertex_staging.size(),
        );
        encoder.copy_buffer_to_buffer(index_staging.raw(), 0, indices.raw(), 0, index_staging.size());
        scheduler.execute()?;
        scheduler.flush()?;

        log::debug!(
            "uploaded mesh: {} vertices, {} triangles",
            mesh.vertices.len(),
            mesh.triangle_count()
        );

        Ok(Self {
            vertices,
            indices,
            triangle_count: mesh.triangle_count() as u32,
            vertex_count: mesh.vertices.len() as u32,
        })
    }

    /// Overwrite vertex positions in place; topology must not change.
    pub fn update_vertices(
        &mut self,
        scheduler: &TaskScheduler<WgpuQueue>,
        vertices: &[[f32; 3]],
    ) -> AccelResult<()> {
        if vertices.len() != self.vertex_count as usize {
            return Err(AccelError::precondition(format!(
                "vertex update has {} vertices, mesh has {}",
                vertices.len(),
                self.vertex_count
            )));
        }
        let padded: Vec<[f32; 4]> = vertices.iter().map(|v| [v[0], v[1], v[2], 1.0]).collect();
        let ctx = scheduler.queue().context();
        ctx.queue
            .write_buffer(self.vertices.raw(), 0, bytemuck::cast_slice(&padded));
        Ok(())
    }

    pub fn vertices(&self) -> &GpuBuffer {
        &self.vertices
    }

    pub fn indices(&self) -> &GpuBuffer {
        &self.indices
    }

    pub fn triangle_count(&self) -> u32 {
        self.triangle_count
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}
