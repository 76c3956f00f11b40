// lib.rs — 360° 全景查看器：球面网格 + 拖拽相机 + 流式纹理渲染循环

pub mod buffers;
pub mod camera;
pub mod config;
pub mod error;
pub mod frame_source;
pub mod graphics;
pub mod mesh;
pub mod renderer;
pub mod texture;
pub mod wgpu_context;

pub use camera::{OrbitCamera, PointerEvent, Projection};
pub use config::{Cli, RedrawPolicy, ViewerConfig};
pub use error::{ConfigError, DrawError, FrameError, ShaderError, ShaderStage, ViewerError};
pub use frame_source::{open_source, AnimatedSource, EmptySource, FrameSource, StillImageSource};
pub use graphics::GraphicsContext;
pub use mesh::{build_sphere, SphereMesh};
pub use renderer::{Renderer, TickOutcome};
pub use texture::{PreparedFrame, StreamingTexture};
pub use wgpu_context::WgpuContext;
