// error.rs — 错误分类：配置 / 着色器 / 帧源 / 绘制

use std::fmt;
use thiserror::Error;

/// Pipeline stage a shader diagnostic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Link,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Link => "link",
        };
        f.write_str(name)
    }
}

/// Shader compile or program link failure, carrying the compiler log.
#[derive(Debug, Clone, Error)]
#[error("{stage} shader stage failed:\n{log}")]
pub struct ShaderError {
    pub stage: ShaderStage,
    pub log: String,
}

/// Rejected before any GPU resource is allocated.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("sphere needs at least one latitude and one longitude segment (got {lat}x{lon})")]
    InvalidSegments { lat: u32, lon: u32 },

    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Recoverable per-tick failure of a frame source.
///
/// Messages are kept as strings so a source can hand out the same failure on
/// every poll and the texture can compare consecutive failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("cannot open {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("cannot decode {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("frame producer for {0} stopped")]
    Disconnected(String),

    #[error("frame {width}x{height} exceeds the texture limit {limit}")]
    Oversized { width: u32, height: u32, limit: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrawError {
    #[error("surface lost")]
    SurfaceLost,
    #[error("surface outdated")]
    SurfaceOutdated,
    #[error("timed out acquiring the next surface texture")]
    Timeout,
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("unknown {0} handle")]
    UnknownHandle(&'static str),
}

impl From<wgpu::SurfaceError> for DrawError {
    fn from(e: wgpu::SurfaceError) -> Self {
        match e {
            wgpu::SurfaceError::Lost => DrawError::SurfaceLost,
            wgpu::SurfaceError::Outdated => DrawError::SurfaceOutdated,
            wgpu::SurfaceError::Timeout => DrawError::Timeout,
            wgpu::SurfaceError::OutOfMemory => DrawError::OutOfMemory,
        }
    }
}

/// Fatal initialization errors: the viewer never starts drawing.
#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("graphics context unavailable: {0}")]
    ContextUnavailable(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Shader(#[from] ShaderError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_error_names_stage_and_log() {
        let e = ShaderError {
            stage: ShaderStage::Fragment,
            log: "error: unknown identifier `uv`".into(),
        };
        let text = e.to_string();
        assert!(text.starts_with("fragment shader stage failed"));
        assert!(text.contains("unknown identifier"));
    }

    #[test]
    fn surface_errors_map_one_to_one() {
        assert_eq!(DrawError::from(wgpu::SurfaceError::Lost), DrawError::SurfaceLost);
        assert_eq!(DrawError::from(wgpu::SurfaceError::OutOfMemory), DrawError::OutOfMemory);
    }
}
