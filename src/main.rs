// main.rs — 窗口与事件：拖拽旋转视角，每次刷新驱动一次渲染循环

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")] // 在 Release 模式下隐藏控制台窗口

use clap::Parser;
use panosphere::{
    open_source, Cli, DrawError, EmptySource, FrameSource, GraphicsContext, PointerEvent, Renderer,
    TickOutcome, ViewerError, WgpuContext,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    dpi::{LogicalSize, PhysicalPosition},
    event::*,
    event_loop::{ControlFlow, EventLoop},
    window::WindowBuilder,
};

/// How often an idle on-demand loop still polls the frame source.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(16);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), ViewerError> {
    let cli = Cli::parse();
    let config = cli.resolve()?;

    let event_loop = EventLoop::new();
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Panosphere")
            .with_inner_size(LogicalSize::new(config.window_width, config.window_height))
            .build(&event_loop)
            .map_err(|e| ViewerError::ContextUnavailable(e.to_string()))?,
    );

    let mut context = pollster::block_on(WgpuContext::new(window.clone(), config.vsync))?;
    let source: Box<dyn FrameSource> = match &config.source {
        Some(path) => open_source(path, context.max_texture_dimension()),
        None => {
            log::info!("no source given; press O or drop a file onto the window");
            Box::new(EmptySource)
        }
    };
    let mut renderer = Renderer::new(&mut context, &config, source)?;

    // 交互状态
    let mut cursor = PhysicalPosition::new(0.0, 0.0);

    // FPS 统计
    let mut last_report = Instant::now();
    let mut frame_count = 0u32;

    event_loop.run(move |event, _, control_flow| {
        match event {
            // 空闲等待到期：轮询一次帧源
            Event::NewEvents(StartCause::ResumeTimeReached { .. }) => window.request_redraw(),

            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    renderer.stop(&mut context);
                    *control_flow = ControlFlow::Exit;
                }

                WindowEvent::Resized(new_size) => {
                    context.resize(new_size);
                    renderer.invalidate();
                }

                WindowEvent::ScaleFactorChanged { new_inner_size, .. } => {
                    context.resize(*new_inner_size);
                    renderer.invalidate();
                }

                // 键盘快捷键
                WindowEvent::KeyboardInput { input, .. } if input.state == ElementState::Pressed => {
                    match input.virtual_keycode {
                        Some(VirtualKeyCode::O) => {
                            if let Some(path) = pick_source() {
                                let limit = context.max_texture_dimension();
                                renderer.set_source(open_source(&path, limit));
                            }
                        }
                        Some(VirtualKeyCode::R) => renderer.reset_camera(),
                        Some(VirtualKeyCode::Escape) => {
                            renderer.stop(&mut context);
                            *control_flow = ControlFlow::Exit;
                        }
                        _ => {}
                    }
                }

                // 鼠标交互
                WindowEvent::MouseInput {
                    state,
                    button: MouseButton::Left,
                    ..
                } => {
                    let pointer = match state {
                        ElementState::Pressed => PointerEvent::Down {
                            x: cursor.x,
                            y: cursor.y,
                        },
                        ElementState::Released => PointerEvent::Up,
                    };
                    renderer.handle_pointer(pointer);
                }

                WindowEvent::CursorMoved { position, .. } => {
                    cursor = position;
                    renderer.handle_pointer(PointerEvent::Move {
                        x: position.x,
                        y: position.y,
                    });
                }

                WindowEvent::DroppedFile(path) => {
                    let limit = context.max_texture_dimension();
                    renderer.set_source(open_source(&path, limit));
                }

                _ => {}
            },

            Event::RedrawRequested(_) => {
                match renderer.tick(&mut context) {
                    Ok(TickOutcome::Drawn) => frame_count += 1,
                    Ok(_) => {}
                    Err(DrawError::SurfaceLost | DrawError::SurfaceOutdated) => {
                        context.reconfigure()
                    }
                    Err(DrawError::OutOfMemory) => {
                        log::error!("GPU out of memory, exiting");
                        renderer.stop(&mut context);
                        *control_flow = ControlFlow::Exit;
                    }
                    Err(e) => log::warn!("render error: {e}"),
                }

                let elapsed = last_report.elapsed().as_secs_f32();
                if elapsed >= 1.0 {
                    log::debug!("{:.1} fps", frame_count as f32 / elapsed);
                    frame_count = 0;
                    last_report = Instant::now();
                }
            }

            // 停止后不再安排下一帧；按需模式无变化时休眠到下次轮询
            Event::MainEventsCleared if renderer.is_running() => {
                if renderer.needs_redraw() {
                    *control_flow = ControlFlow::Poll;
                    window.request_redraw();
                } else {
                    *control_flow = ControlFlow::WaitUntil(Instant::now() + IDLE_POLL_INTERVAL);
                }
            }

            _ => {}
        }
    });
}

fn pick_source() -> Option<PathBuf> {
    rfd::FileDialog::new()
        .add_filter("Panoramas", &["jpg", "jpeg", "png", "bmp", "gif"])
        .pick_file()
}
