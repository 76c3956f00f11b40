// graphics.rs — 图形上下文接口：着色器、缓冲区、纹理、绘制

use crate::error::{DrawError, ShaderError};
use crate::texture::PreparedFrame;
use glam::Mat4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    Repeat,
    ClampToEdge,
}

/// How a texture is sampled. Minification is always linear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureSampling {
    pub mipmaps: bool,
    pub wrap: WrapMode,
}

impl TextureSampling {
    /// Mip chains only for power-of-two sources; everything else is sampled
    /// from a single level with clamp-to-edge.
    pub fn for_dimensions(width: u32, height: u32) -> Self {
        if width.is_power_of_two() && height.is_power_of_two() {
            Self {
                mipmaps: true,
                wrap: WrapMode::Repeat,
            }
        } else {
            Self {
                mipmaps: false,
                wrap: WrapMode::ClampToEdge,
            }
        }
    }
}

/// Everything one indexed draw of the sphere needs.
#[derive(Debug, Clone, Copy)]
pub struct DrawCall {
    pub program: ProgramHandle,
    pub positions: BufferHandle,
    pub tex_coords: BufferHandle,
    pub indices: BufferHandle,
    pub index_count: u32,
    pub texture: TextureHandle,
    pub projection: Mat4,
    pub view: Mat4,
    pub clear_color: [f64; 4],
}

/// The GPU-facing collaborator the renderer drives.
pub trait GraphicsContext {
    fn compile_program(
        &mut self,
        vertex_src: &str,
        fragment_src: &str,
    ) -> Result<ProgramHandle, ShaderError>;

    fn create_buffer(&mut self, kind: BufferKind, label: &str, contents: &[u8]) -> BufferHandle;

    fn release_buffer(&mut self, buffer: BufferHandle);

    /// Allocates a texture with `frame.level_count()` levels, sampled per
    /// `frame.sampling()`, and fills every level.
    fn create_texture(&mut self, frame: &PreparedFrame) -> TextureHandle;

    /// Overwrites every level. `frame` must match the size the texture was
    /// created with.
    fn write_texture(&mut self, texture: TextureHandle, frame: &PreparedFrame);

    fn release_texture(&mut self, texture: TextureHandle);

    fn max_texture_dimension(&self) -> u32;

    /// Current drawable size in physical pixels.
    fn surface_size(&self) -> (u32, u32);

    /// Clears color and depth, binds everything in `call`, draws the indexed
    /// triangle list and presents.
    fn draw_indexed(&mut self, call: &DrawCall) -> Result<(), DrawError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_of_two_sources_get_mipmaps() {
        let s = TextureSampling::for_dimensions(4096, 2048);
        assert!(s.mipmaps);
        assert_eq!(s.wrap, WrapMode::Repeat);

        let s = TextureSampling::for_dimensions(1, 1);
        assert!(s.mipmaps);
    }

    #[test]
    fn other_sizes_clamp_without_mipmaps() {
        for (w, h) in [(3840, 1920), (1024, 1000), (1920, 1080)] {
            let s = TextureSampling::for_dimensions(w, h);
            assert!(!s.mipmaps, "{w}x{h}");
            assert_eq!(s.wrap, WrapMode::ClampToEdge);
        }
    }
}
