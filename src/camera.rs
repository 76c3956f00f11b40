// camera.rs — 视角参数：拖拽累积 yaw/pitch，眼睛固定在球心

use glam::{Mat4, Vec3};
use std::f32::consts::FRAC_PI_2;

/// Radians of rotation per pixel of pointer travel.
pub const DEFAULT_SENSITIVITY: f32 = 0.01;

/// Pointer input in screen-space pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down { x: f64, y: f64 },
    Move { x: f64, y: f64 },
    Up,
}

#[derive(Debug, Clone)]
pub struct OrbitCamera {
    pub yaw: f32,
    pub pitch: f32,
    pub sensitivity: f32,
    anchor: Option<(f64, f64)>,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVITY)
    }
}

impl OrbitCamera {
    pub fn new(sensitivity: f32) -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            sensitivity,
            anchor: None,
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn begin_drag(&mut self, x: f64, y: f64) {
        self.anchor = Some((x, y));
    }

    /// Applies the pointer travel since the last anchor. Returns `true` when
    /// the view changed; outside a drag this is a no-op.
    pub fn drag(&mut self, x: f64, y: f64) -> bool {
        let Some((last_x, last_y)) = self.anchor else {
            return false;
        };

        let dx = (x - last_x) as f32;
        let dy = (y - last_y) as f32;
        let before = (self.yaw, self.pitch);

        self.yaw += dx * self.sensitivity;
        // 限制俯仰角，避免越过南北极翻转
        self.pitch = (self.pitch + dy * self.sensitivity).clamp(-FRAC_PI_2, FRAC_PI_2);
        self.anchor = Some((x, y));

        (self.yaw, self.pitch) != before
    }

    pub fn end_drag(&mut self) {
        self.anchor = None;
    }

    pub fn handle(&mut self, event: PointerEvent) -> bool {
        match event {
            PointerEvent::Down { x, y } => {
                self.begin_drag(x, y);
                false
            }
            PointerEvent::Move { x, y } => self.drag(x, y),
            PointerEvent::Up => {
                self.end_drag();
                false
            }
        }
    }

    pub fn reset(&mut self) {
        self.yaw = 0.0;
        self.pitch = 0.0;
        self.anchor = None;
    }

    /// `lookAt(origin -> +X, up +Y) * Rz(pitch) * Ry(yaw)`.
    ///
    /// The order matters: pitch is taken about the world Z axis before yaw
    /// about world Y, which is what gives the orbit its shape.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(Vec3::ZERO, Vec3::X, Vec3::Y)
            * Mat4::from_rotation_z(self.pitch)
            * Mat4::from_rotation_y(self.yaw)
    }
}

/// Perspective parameters; the aspect ratio is supplied per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub fov_y: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            fov_y: 45f32.to_radians(),
            z_near: 0.1,
            z_far: 100.0,
        }
    }
}

impl Projection {
    pub fn matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect.max(1e-3), self.z_near, self.z_far)
    }
}
