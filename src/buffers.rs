// buffers.rs — 球面网格上传到 GPU：位置 / UV / 索引 三个缓冲区

use crate::graphics::{BufferHandle, BufferKind, GraphicsContext};
use crate::mesh::SphereMesh;

/// Device copies of a [`SphereMesh`]. Written once; re-tessellating means a
/// fresh set and releasing this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBufferSet {
    pub positions: BufferHandle,
    pub tex_coords: BufferHandle,
    pub indices: BufferHandle,
    pub index_count: u32,
}

impl GpuBufferSet {
    pub fn upload<G: GraphicsContext + ?Sized>(ctx: &mut G, mesh: &SphereMesh) -> Self {
        let positions = ctx.create_buffer(
            BufferKind::Vertex,
            "Sphere Positions",
            bytemuck::cast_slice(&mesh.positions),
        );
        let tex_coords = ctx.create_buffer(
            BufferKind::Vertex,
            "Sphere TexCoords",
            bytemuck::cast_slice(&mesh.uvs),
        );
        let indices = ctx.create_buffer(
            BufferKind::Index,
            "Sphere Indices",
            bytemuck::cast_slice(&mesh.indices),
        );

        log::debug!(
            "uploaded sphere mesh: {} vertices, {} indices",
            mesh.vertex_count(),
            mesh.index_count()
        );

        Self {
            positions,
            tex_coords,
            indices,
            index_count: mesh.index_count(),
        }
    }

    pub fn release<G: GraphicsContext + ?Sized>(self, ctx: &mut G) {
        ctx.release_buffer(self.positions);
        ctx.release_buffer(self.tex_coords);
        ctx.release_buffer(self.indices);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::recording::{Call, RecordingContext};
    use crate::mesh::build_sphere;

    #[test]
    fn upload_copies_all_three_arrays() {
        let mut ctx = RecordingContext::new();
        let mesh = build_sphere(4, 8).unwrap();
        let set = GpuBufferSet::upload(&mut ctx, &mesh);

        assert_eq!(set.index_count, 6 * 4 * 8);
        assert_eq!(ctx.buffers[&set.positions.0].len(), 45 * 12);
        assert_eq!(ctx.buffers[&set.tex_coords.0].len(), 45 * 8);
        assert_eq!(ctx.buffers[&set.indices.0].len(), 192 * 4);

        let expected: &[u8] = bytemuck::cast_slice(&mesh.indices);
        assert_eq!(ctx.buffers[&set.indices.0].as_slice(), expected);
        assert_eq!(
            ctx.count(|c| matches!(c, Call::CreateBuffer { kind: BufferKind::Index, .. })),
            1
        );
    }

    #[test]
    fn release_frees_every_buffer() {
        let mut ctx = RecordingContext::new();
        let set = GpuBufferSet::upload(&mut ctx, &build_sphere(2, 2).unwrap());
        set.release(&mut ctx);
        assert!(ctx.buffers.is_empty());
        assert_eq!(ctx.count(|c| matches!(c, Call::ReleaseBuffer(_))), 3);
    }
}
