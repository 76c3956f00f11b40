// renderer.rs — 每帧渲染循环：投影 + 视图矩阵，刷新视频纹理，绘制球体

use crate::buffers::GpuBufferSet;
use crate::camera::{OrbitCamera, PointerEvent, Projection};
use crate::config::{RedrawPolicy, ViewerConfig};
use crate::error::{ConfigError, DrawError, ViewerError};
use crate::frame_source::FrameSource;
use crate::graphics::{DrawCall, GraphicsContext, ProgramHandle};
use crate::mesh::{build_sphere, SphereMesh};
use crate::texture::{Refresh, StreamingTexture};

pub const SPHERE_VERTEX_SHADER: &str = include_str!("sphere_vertex.wgsl");
pub const SPHERE_FRAGMENT_SHADER: &str = include_str!("sphere_fragment.wgsl");

/// What a single [`Renderer::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Drawn,
    /// On-demand mode and nothing changed since the last draw.
    Idle,
    /// Zero-sized surface (minimized window).
    Skipped,
    Stopped,
}

/// Owns the session state: camera, mesh, GPU buffers, streaming texture and
/// the frame source. Constructed once, then driven by pointer events and
/// one [`tick`](Self::tick) per display refresh.
pub struct Renderer {
    camera: OrbitCamera,
    projection: Projection,
    mesh: SphereMesh,
    buffers: Option<GpuBufferSet>,
    texture: Option<StreamingTexture>,
    program: ProgramHandle,
    source: Box<dyn FrameSource>,
    redraw: RedrawPolicy,
    clear_color: [f64; 4],
    last_size: (u32, u32),
    dirty: bool,
    running: bool,
}

impl Renderer {
    /// Builds the mesh, compiles the shaders and uploads everything.
    ///
    /// Segment counts are checked before the graphics context is touched.
    pub fn new<G: GraphicsContext + ?Sized>(
        ctx: &mut G,
        config: &ViewerConfig,
        source: Box<dyn FrameSource>,
    ) -> Result<Self, ViewerError> {
        let mesh = build_sphere(config.lat_segments, config.lon_segments)?;
        let program = ctx.compile_program(SPHERE_VERTEX_SHADER, SPHERE_FRAGMENT_SHADER)?;
        let buffers = GpuBufferSet::upload(ctx, &mesh);
        let texture = StreamingTexture::new(ctx, config.placeholder_rgba);

        log::info!(
            "renderer ready: {}x{} sphere, source: {}",
            config.lat_segments,
            config.lon_segments,
            source.describe()
        );

        Ok(Self {
            camera: OrbitCamera::new(config.sensitivity),
            projection: config.projection(),
            mesh,
            buffers: Some(buffers),
            texture: Some(texture),
            program,
            source,
            redraw: config.redraw,
            clear_color: config.clear_color,
            last_size: (0, 0),
            dirty: true,
            running: true,
        })
    }

    pub fn camera(&self) -> &OrbitCamera {
        &self.camera
    }

    pub fn mesh(&self) -> &SphereMesh {
        &self.mesh
    }

    pub fn buffers(&self) -> Option<&GpuBufferSet> {
        self.buffers.as_ref()
    }

    pub fn texture(&self) -> Option<&StreamingTexture> {
        self.texture.as_ref()
    }

    pub fn source(&self) -> &dyn FrameSource {
        self.source.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the next tick draws even if the source has nothing new.
    /// When this is false the host can sleep until the next source poll.
    pub fn needs_redraw(&self) -> bool {
        self.running && (self.redraw == RedrawPolicy::Continuous || self.dirty)
    }

    /// Forces a draw on the next tick, e.g. after the window was resized.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Routes pointer input to the camera; returns whether the view moved.
    pub fn handle_pointer(&mut self, event: PointerEvent) -> bool {
        let changed = self.camera.handle(event);
        self.dirty |= changed;
        changed
    }

    pub fn reset_camera(&mut self) {
        self.camera.reset();
        self.dirty = true;
    }

    /// Swaps the frame source. The current texture stays visible until the
    /// new source delivers its first frame.
    pub fn set_source(&mut self, source: Box<dyn FrameSource>) {
        log::info!("switching source to {}", source.describe());
        self.source = source;
        self.dirty = true;
    }

    /// Replaces the sphere with a new tessellation. Invalid counts leave the
    /// current mesh and buffers untouched.
    pub fn retessellate<G: GraphicsContext + ?Sized>(
        &mut self,
        ctx: &mut G,
        lat: u32,
        lon: u32,
    ) -> Result<(), ConfigError> {
        let mesh = build_sphere(lat, lon)?;
        if !self.running {
            self.mesh = mesh;
            return Ok(());
        }

        let buffers = GpuBufferSet::upload(ctx, &mesh);
        if let Some(old) = self.buffers.replace(buffers) {
            old.release(ctx);
        }
        self.mesh = mesh;
        self.dirty = true;
        Ok(())
    }

    /// One iteration of the render loop.
    ///
    /// The frame source is polled on every tick regardless of the redraw
    /// policy, so on-demand mode still picks up new video frames.
    pub fn tick<G: GraphicsContext + ?Sized>(
        &mut self,
        ctx: &mut G,
    ) -> Result<TickOutcome, DrawError> {
        if !self.running {
            return Ok(TickOutcome::Stopped);
        }
        let (Some(buffers), Some(texture)) = (self.buffers, self.texture.as_mut()) else {
            return Ok(TickOutcome::Stopped);
        };

        if texture.refresh(ctx, self.source.as_mut()) == Refresh::Updated {
            self.dirty = true;
        }

        let (width, height) = ctx.surface_size();
        if width == 0 || height == 0 {
            return Ok(TickOutcome::Skipped);
        }
        if (width, height) != self.last_size {
            self.last_size = (width, height);
            self.dirty = true;
        }

        if self.redraw == RedrawPolicy::OnDemand && !self.dirty {
            return Ok(TickOutcome::Idle);
        }

        // 宽高比每帧重新计算，跟随窗口缩放
        let aspect = width as f32 / height as f32;
        let call = DrawCall {
            program: self.program,
            positions: buffers.positions,
            tex_coords: buffers.tex_coords,
            indices: buffers.indices,
            index_count: buffers.index_count,
            texture: texture.handle(),
            projection: self.projection.matrix(aspect),
            view: self.camera.view_matrix(),
            clear_color: self.clear_color,
        };
        ctx.draw_indexed(&call)?;

        log::trace!("drew frame at yaw {:.3} pitch {:.3}", self.camera.yaw, self.camera.pitch);
        self.dirty = false;
        Ok(TickOutcome::Drawn)
    }

    /// Stops the loop and releases the texture and buffers. The host must
    /// check [`is_running`](Self::is_running) before scheduling another tick.
    pub fn stop<G: GraphicsContext + ?Sized>(&mut self, ctx: &mut G) {
        if !self.running {
            return;
        }
        self.running = false;
        if let Some(texture) = self.texture.take() {
            texture.release(ctx);
        }
        if let Some(buffers) = self.buffers.take() {
            buffers.release(ctx);
        }
        log::info!("render loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FrameError, ShaderStage};
    use crate::frame_source::EmptySource;
    use crate::graphics::recording::{Call, RecordingContext};
    use crate::texture::PreparedFrame;
    use image::{Rgba, RgbaImage};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    type Script = Rc<RefCell<VecDeque<Result<Option<PreparedFrame>, FrameError>>>>;

    struct Scripted(Script);

    impl FrameSource for Scripted {
        fn poll_frame(&mut self) -> Result<Option<PreparedFrame>, FrameError> {
            self.0.borrow_mut().pop_front().unwrap_or(Ok(None))
        }

        fn dimensions(&self) -> Option<(u32, u32)> {
            None
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn solid(w: u32, h: u32, px: [u8; 4]) -> PreparedFrame {
        PreparedFrame::prepare(RgbaImage::from_pixel(w, h, Rgba(px)), 8192)
    }

    fn config(lat: u32, lon: u32) -> ViewerConfig {
        ViewerConfig {
            lat_segments: lat,
            lon_segments: lon,
            ..ViewerConfig::default()
        }
    }

    fn renderer(ctx: &mut RecordingContext, config: &ViewerConfig) -> Renderer {
        Renderer::new(ctx, config, Box::new(EmptySource)).unwrap()
    }

    #[test]
    fn invalid_segments_fail_before_any_allocation() {
        let mut ctx = RecordingContext::new();
        let err = Renderer::new(&mut ctx, &config(0, 12), Box::new(EmptySource)).err();
        assert!(matches!(
            err,
            Some(ViewerError::Config(ConfigError::InvalidSegments { .. }))
        ));
        assert!(ctx.calls.is_empty());
    }

    #[test]
    fn shader_failure_aborts_initialization() {
        let mut ctx = RecordingContext::new();
        ctx.shader_failure = Some(ShaderStage::Vertex);
        let err = Renderer::new(&mut ctx, &config(4, 4), Box::new(EmptySource)).err();
        match err {
            Some(ViewerError::Shader(e)) => assert_eq!(e.stage, ShaderStage::Vertex),
            other => panic!("expected shader error, got {other:?}"),
        }
        assert_eq!(ctx.draws(), 0);
        assert!(ctx.buffers.is_empty());
    }

    #[test]
    fn tick_draws_the_whole_mesh_with_the_placeholder() {
        let mut ctx = RecordingContext::new();
        let mut r = renderer(&mut ctx, &config(2, 2));
        assert_eq!(r.tick(&mut ctx), Ok(TickOutcome::Drawn));

        let call = ctx.last_draw.unwrap();
        assert_eq!(call.index_count, 24);
        let placeholder = &ctx.textures[&call.texture.0];
        assert_eq!(placeholder.dimensions(), (1, 1));
        assert_eq!(placeholder.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
        assert!(call.view.abs_diff_eq(r.camera().view_matrix(), 1e-6));
    }

    #[test]
    fn continuous_mode_draws_every_tick() {
        let mut ctx = RecordingContext::new();
        let mut r = renderer(&mut ctx, &config(3, 3));
        for _ in 0..4 {
            assert_eq!(r.tick(&mut ctx), Ok(TickOutcome::Drawn));
        }
        assert_eq!(ctx.draws(), 4);
    }

    #[test]
    fn projection_follows_surface_resizes() {
        let mut ctx = RecordingContext::new();
        let mut r = renderer(&mut ctx, &config(3, 3));
        r.tick(&mut ctx).unwrap();
        let before = ctx.last_draw.unwrap().projection;

        ctx.size = (1600, 800);
        r.tick(&mut ctx).unwrap();
        let wide = ctx.last_draw.unwrap().projection;
        assert!(!before.abs_diff_eq(wide, 1e-6));
        assert!(wide.abs_diff_eq(Projection::default().matrix(2.0), 1e-6));
    }

    #[test]
    fn on_demand_mode_redraws_only_after_changes() {
        let mut ctx = RecordingContext::new();
        let script: Script = Rc::new(RefCell::new(VecDeque::new()));
        let cfg = ViewerConfig {
            redraw: RedrawPolicy::OnDemand,
            ..config(4, 4)
        };
        let mut r = Renderer::new(&mut ctx, &cfg, Box::new(Scripted(script.clone()))).unwrap();

        assert_eq!(r.tick(&mut ctx), Ok(TickOutcome::Drawn));
        assert_eq!(r.tick(&mut ctx), Ok(TickOutcome::Idle));

        r.handle_pointer(PointerEvent::Down { x: 0.0, y: 0.0 });
        assert_eq!(r.tick(&mut ctx), Ok(TickOutcome::Idle));
        assert!(r.handle_pointer(PointerEvent::Move { x: 30.0, y: 0.0 }));
        assert_eq!(r.tick(&mut ctx), Ok(TickOutcome::Drawn));
        assert_eq!(r.tick(&mut ctx), Ok(TickOutcome::Idle));

        script
            .borrow_mut()
            .push_back(Ok(Some(solid(8, 4, [1, 2, 3, 255]))));
        assert_eq!(r.tick(&mut ctx), Ok(TickOutcome::Drawn));
        assert_eq!(r.tick(&mut ctx), Ok(TickOutcome::Idle));

        ctx.size = (1024, 512);
        assert_eq!(r.tick(&mut ctx), Ok(TickOutcome::Drawn));
        assert_eq!(ctx.draws(), 4);
    }

    #[test]
    fn idle_on_demand_renderer_asks_for_no_redraw() {
        let mut ctx = RecordingContext::new();
        let cfg = ViewerConfig {
            redraw: RedrawPolicy::OnDemand,
            ..config(4, 4)
        };
        let mut r = renderer(&mut ctx, &cfg);
        assert!(r.needs_redraw());
        r.tick(&mut ctx).unwrap();
        assert!(!r.needs_redraw());

        r.handle_pointer(PointerEvent::Down { x: 0.0, y: 0.0 });
        assert!(!r.needs_redraw());
        r.handle_pointer(PointerEvent::Move { x: 0.0, y: 10.0 });
        assert!(r.needs_redraw());
        r.tick(&mut ctx).unwrap();

        r.invalidate();
        assert!(r.needs_redraw());
        assert_eq!(r.tick(&mut ctx), Ok(TickOutcome::Drawn));

        r.stop(&mut ctx);
        r.invalidate();
        assert!(!r.needs_redraw());
    }

    #[test]
    fn continuous_renderer_always_wants_the_next_frame() {
        let mut ctx = RecordingContext::new();
        let mut r = renderer(&mut ctx, &config(4, 4));
        r.tick(&mut ctx).unwrap();
        assert!(r.needs_redraw());
        r.stop(&mut ctx);
        assert!(!r.needs_redraw());
    }

    #[test]
    fn stalled_source_keeps_rendering_with_the_last_frame() {
        let mut ctx = RecordingContext::new();
        let script: Script = Rc::new(RefCell::new(VecDeque::from(vec![
            Ok(Some(solid(8, 4, [9, 9, 9, 255]))),
            Err(FrameError::Disconnected("clip".into())),
            Err(FrameError::Disconnected("clip".into())),
        ])));
        let mut r = Renderer::new(&mut ctx, &config(4, 4), Box::new(Scripted(script))).unwrap();

        r.tick(&mut ctx).unwrap();
        let texture = ctx.last_draw.unwrap().texture;
        assert_eq!(ctx.textures[&texture.0].dimensions(), (8, 4));

        assert_eq!(r.tick(&mut ctx), Ok(TickOutcome::Drawn));
        assert_eq!(r.tick(&mut ctx), Ok(TickOutcome::Drawn));
        assert_eq!(ctx.last_draw.unwrap().texture, texture);
    }

    #[test]
    fn drag_changes_the_next_view() {
        let mut ctx = RecordingContext::new();
        let mut r = renderer(&mut ctx, &config(4, 4));
        r.tick(&mut ctx).unwrap();
        let before = ctx.last_draw.unwrap().view;

        r.handle_pointer(PointerEvent::Down { x: 100.0, y: 100.0 });
        r.handle_pointer(PointerEvent::Move { x: 200.0, y: 100.0 });
        r.handle_pointer(PointerEvent::Up);
        r.tick(&mut ctx).unwrap();

        assert!((r.camera().yaw - 1.0).abs() < 1e-6);
        assert!(!ctx.last_draw.unwrap().view.abs_diff_eq(before, 1e-3));
    }

    #[test]
    fn zero_sized_surface_skips_drawing() {
        let mut ctx = RecordingContext::new();
        let mut r = renderer(&mut ctx, &config(4, 4));
        ctx.size = (0, 300);
        assert_eq!(r.tick(&mut ctx), Ok(TickOutcome::Skipped));
        assert_eq!(ctx.draws(), 0);
    }

    #[test]
    fn draw_errors_propagate() {
        let mut ctx = RecordingContext::new();
        let mut r = renderer(&mut ctx, &config(4, 4));
        ctx.draw_failure = Some(DrawError::SurfaceLost);
        assert_eq!(r.tick(&mut ctx), Err(DrawError::SurfaceLost));
        assert!(r.is_running());
    }

    #[test]
    fn stop_releases_resources_and_halts() {
        let mut ctx = RecordingContext::new();
        let mut r = renderer(&mut ctx, &config(4, 4));
        r.tick(&mut ctx).unwrap();
        r.stop(&mut ctx);

        assert!(!r.is_running());
        assert!(ctx.buffers.is_empty());
        assert!(ctx.textures.is_empty());
        assert_eq!(r.tick(&mut ctx), Ok(TickOutcome::Stopped));
        assert_eq!(ctx.draws(), 1);

        let released = ctx.calls.len();
        r.stop(&mut ctx);
        assert_eq!(ctx.calls.len(), released);
    }

    #[test]
    fn retessellation_swaps_buffers() {
        let mut ctx = RecordingContext::new();
        let mut r = renderer(&mut ctx, &config(4, 4));
        let old = *r.buffers().unwrap();

        r.retessellate(&mut ctx, 8, 16).unwrap();
        assert_eq!(r.buffers().unwrap().index_count, 6 * 8 * 16);
        assert_eq!(r.mesh().vertex_count(), 9 * 17);
        assert!(!ctx.buffers.contains_key(&old.positions.0));
        assert_eq!(ctx.buffers.len(), 3);

        assert!(r.retessellate(&mut ctx, 0, 16).is_err());
        assert_eq!(r.buffers().unwrap().index_count, 6 * 8 * 16);
        assert_eq!(ctx.count(|c| matches!(c, Call::ReleaseBuffer(_))), 3);
    }

    #[test]
    fn shaders_declare_the_expected_entry_points() {
        assert!(SPHERE_VERTEX_SHADER.contains("fn vs_main"));
        assert!(SPHERE_FRAGMENT_SHADER.contains("fn fs_main"));
    }
}
