// SPDX-License-Identifier: CEPL-1.0
use std::f32::consts::TAU;

use anyhow::{Context, Result};
use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};

use crate::memory::{upload_via_staging, GpuBuffer};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub fn binding() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attributes() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, color) as u32,
            },
        ]
    }
}

/// CPU-side geometry, indexed as a triangle list.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

const WHEEL_RADIUS: f32 = 0.5;
const WHEEL_Z: f32 = -0.4;

impl Mesh {
    /// Colour wheel: a black centre vertex and `triangles` rim vertices on a
    /// circle, each triangle `(0, k, k + 1)`, the last one closing back to
    /// rim vertex 1. Rim colours are three cosines 120° apart. Fewer than 3
    /// triangles is raised to 3.
    pub fn color_wheel(triangles: u32) -> Self {
        let n = triangles.max(3);
        let step = TAU / n as f32;

        let mut vertices = Vec::with_capacity(n as usize + 1);
        vertices.push(Vertex {
            pos: [0.0, 0.0, WHEEL_Z],
            color: [0.0, 0.0, 0.0],
        });
        for k in 0..n {
            let a = k as f32 * step;
            let channel = |phase_deg: f32| 0.5 * ((a + phase_deg.to_radians()).cos() + 1.0);
            vertices.push(Vertex {
                pos: [WHEEL_RADIUS * a.cos(), WHEEL_RADIUS * a.sin(), WHEEL_Z],
                color: [channel(0.0), channel(120.0), channel(240.0)],
            });
        }

        let mut indices = Vec::with_capacity(3 * n as usize);
        for k in 1..=n {
            let next = if k == n { 1 } else { k + 1 };
            indices.extend_from_slice(&[0, k, next]);
        }

        Self { vertices, indices }
    }
}

/// Device-local vertex and index buffers. Immutable once uploaded; the only
/// way to change the geometry is destroy + upload.
#[derive(Clone, Copy, Debug)]
pub struct MeshBuffer {
    pub vertex: GpuBuffer,
    pub index: GpuBuffer,
    pub index_count: u32,
}

impl MeshBuffer {
    pub unsafe fn upload(
        device: &Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        queue: vk::Queue,
        pool: vk::CommandPool,
        mesh: &Mesh,
    ) -> Result<Self> {
        let vbytes: &[u8] = bytemuck::cast_slice(&mesh.vertices);
        let ibytes: &[u8] = bytemuck::cast_slice(&mesh.indices);

        let vertex = GpuBuffer::new(
            device,
            mem_props,
            vbytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .context("vertex buffer")?;
        let index = match GpuBuffer::new(
            device,
            mem_props,
            ibytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) {
            Ok(b) => b,
            Err(e) => {
                vertex.destroy(device);
                return Err(e.context("index buffer"));
            }
        };

        let uploaded = upload_via_staging(device, mem_props, queue, pool, &vertex, vbytes)
            .context("upload vertices")
            .and_then(|()| {
                upload_via_staging(device, mem_props, queue, pool, &index, ibytes)
                    .context("upload indices")
            });
        if let Err(e) = uploaded {
            index.destroy(device);
            vertex.destroy(device);
            return Err(e);
        }

        Ok(Self {
            vertex,
            index,
            index_count: mesh.indices.len() as u32,
        })
    }

    pub unsafe fn destroy(self, device: &Device) {
        self.index.destroy(device);
        self.vertex.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wheel_has_centre_plus_rim() {
        let m = Mesh::color_wheel(1000);
        assert_eq!(m.vertices.len(), 1001);
        assert_eq!(m.indices.len(), 3000);
        assert_eq!(m.vertices[0].pos, [0.0, 0.0, WHEEL_Z]);
        assert_eq!(m.vertices[0].color, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn every_triangle_fans_from_centre() {
        let m = Mesh::color_wheel(6);
        let tris: Vec<_> = m.indices.chunks(3).collect();
        assert_eq!(tris[0], [0, 1, 2]);
        assert_eq!(tris[4], [0, 5, 6]);
        assert_eq!(tris[5], [0, 6, 1]);
        assert!(m.indices.iter().all(|&i| (i as usize) < m.vertices.len()));
    }

    #[test]
    fn rim_sits_on_the_circle_with_unit_colours() {
        for v in &Mesh::color_wheel(64).vertices[1..] {
            let r = (v.pos[0] * v.pos[0] + v.pos[1] * v.pos[1]).sqrt();
            assert!((r - WHEEL_RADIUS).abs() < 1e-5);
            assert_eq!(v.pos[2], WHEEL_Z);
            assert!(v.color.iter().all(|c| (0.0..=1.0).contains(c)));
        }
    }

    #[test]
    fn first_rim_vertex_is_red() {
        let m = Mesh::color_wheel(12);
        let c = m.vertices[1].color;
        assert!((c[0] - 1.0).abs() < 1e-6);
        assert!((c[1] - 0.25).abs() < 1e-6);
        assert!((c[2] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn degenerate_counts_are_raised() {
        let m = Mesh::color_wheel(0);
        assert_eq!(m.vertices.len(), 4);
        assert_eq!(m.indices, [0, 1, 2, 0, 2, 3, 0, 3, 1]);
    }

    #[test]
    fn vertex_layout_matches_attributes() {
        let [pos, color] = Vertex::attributes();
        assert_eq!(Vertex::binding().stride, 24);
        assert_eq!(pos.offset, 0);
        assert_eq!(color.offset, 12);
        assert_eq!(bytemuck::cast_slice::<Vertex, u8>(&Mesh::color_wheel(3).vertices).len(), 4 * 24);
    }
}
