// config.rs — 配置：JSON 文件 + 命令行覆盖

use crate::camera::{Projection, DEFAULT_SENSITIVITY};
use crate::error::ConfigError;
use crate::mesh::check_segments;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// When the render loop issues a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedrawPolicy {
    /// Every display refresh.
    #[default]
    Continuous,
    /// Only after a camera move, a new frame, a resize or a source swap.
    OnDemand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub source: Option<PathBuf>,
    pub lat_segments: u32,
    pub lon_segments: u32,
    pub fov_y_degrees: f32,
    pub z_near: f32,
    pub z_far: f32,
    pub sensitivity: f32,
    pub redraw: RedrawPolicy,
    pub clear_color: [f64; 4],
    pub placeholder_rgba: [u8; 4],
    pub vsync: bool,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            source: None,
            lat_segments: 60,
            lon_segments: 60,
            fov_y_degrees: 45.0,
            z_near: 0.1,
            z_far: 100.0,
            sensitivity: DEFAULT_SENSITIVITY,
            redraw: RedrawPolicy::Continuous,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            placeholder_rgba: [255, 255, 255, 255],
            vsync: true,
            window_width: 1280,
            window_height: 720,
        }
    }
}

impl ViewerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let label = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: label.clone(),
            source,
        })?;
        Self::from_json(&text, &label)
    }

    pub fn from_json(text: &str, label: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: label.to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_segments(self.lat_segments, self.lon_segments)?;
        if !(self.fov_y_degrees > 0.0 && self.fov_y_degrees < 180.0) {
            return Err(invalid("fov_y_degrees", format!("{} is outside (0, 180)", self.fov_y_degrees)));
        }
        if !(self.z_near > 0.0 && self.z_far > self.z_near) {
            return Err(invalid(
                "z_near/z_far",
                format!("need 0 < near < far, got {} / {}", self.z_near, self.z_far),
            ));
        }
        // 球半径为 1，远平面必须包住球面
        if self.z_near >= 1.0 || self.z_far <= 1.0 {
            return Err(invalid(
                "z_near/z_far",
                format!("unit sphere is clipped by near {} / far {}", self.z_near, self.z_far),
            ));
        }
        if !(self.sensitivity.is_finite() && self.sensitivity > 0.0) {
            return Err(invalid("sensitivity", format!("{} must be positive", self.sensitivity)));
        }
        if self.window_width == 0 || self.window_height == 0 {
            return Err(invalid("window size", "must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn projection(&self) -> Projection {
        Projection {
            fov_y: self.fov_y_degrees.to_radians(),
            z_near: self.z_near,
            z_far: self.z_far,
        }
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::InvalidValue { field, reason }
}

/// 360° panorama viewer: drag to look around.
#[derive(Debug, Parser)]
#[command(name = "panosphere", version, about)]
pub struct Cli {
    /// Equirectangular still image or animated GIF clip.
    pub source: Option<PathBuf>,

    /// JSON config file; command-line flags override its values.
    #[arg(long, env = "PANORAMA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Latitude segments of the sphere.
    #[arg(long)]
    pub lat: Option<u32>,

    /// Longitude segments of the sphere.
    #[arg(long)]
    pub lon: Option<u32>,

    /// Vertical field of view in degrees.
    #[arg(long)]
    pub fov: Option<f32>,

    /// Radians per dragged pixel.
    #[arg(long)]
    pub sensitivity: Option<f32>,

    /// Draw only when the view or the frame changes.
    #[arg(long)]
    pub on_demand: bool,

    #[arg(long)]
    pub no_vsync: bool,
}

impl Cli {
    /// Loads the config file (if any), applies flag overrides and validates.
    pub fn resolve(&self) -> Result<ViewerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ViewerConfig::load(path)?,
            None => ViewerConfig::default(),
        };

        if let Some(source) = &self.source {
            config.source = Some(source.clone());
        }
        if let Some(lat) = self.lat {
            config.lat_segments = lat;
        }
        if let Some(lon) = self.lon {
            config.lon_segments = lon;
        }
        if let Some(fov) = self.fov {
            config.fov_y_degrees = fov;
        }
        if let Some(sensitivity) = self.sensitivity {
            config.sensitivity = sensitivity;
        }
        if self.on_demand {
            config.redraw = RedrawPolicy::OnDemand;
        }
        if self.no_vsync {
            config.vsync = false;
        }

        config.validate()?;
        Ok(config)
    }
}
