// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use kiln_core::{init_tracing, Clock};
use kiln_platform::{framebuffer_size, FramebufferSize};
use kiln_render::{BackendConfig, RenderPacket, RenderSize, Renderer, RendererBackend};
use kiln_render_vk::{is_gpu_hang, VulkanBackend};
use tracing::{error, info};

use kiln_platform::winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

mod config;

use config::{load_cfg, KilnCfg};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendChoice {
    Vulkan,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = "kiln.toml")]
    config: PathBuf,
    /// Renderer backend
    #[arg(long, value_enum, default_value_t = BackendChoice::Vulkan)]
    backend: BackendChoice,
    /// Enable validation layers regardless of the config file
    #[arg(long)]
    validation: bool,
}

struct App {
    backend_choice: BackendChoice,
    cfg: KilnCfg,
    backend_cfg: BackendConfig,

    window: Option<Window>,
    renderer: Option<Renderer>,
    clock: Clock,

    paused: bool,
    exiting: bool,
    frames: u32,
    last_fps_instant: std::time::Instant,
    failure: Option<anyhow::Error>,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        self.failure = Some(err);
        event_loop.exit();
    }

    fn create_renderer(&self, window: &Window) -> Result<Renderer> {
        let fb = framebuffer_size(window);
        let size = RenderSize {
            width: fb.width as u32,
            height: fb.height as u32,
        };
        let backend: Box<dyn RendererBackend> = match self.backend_choice {
            BackendChoice::Vulkan => Box::new(VulkanBackend::initialize(
                &self.cfg.app.name,
                window,
                window,
                size,
                &self.backend_cfg,
            )?),
        };
        Ok(Renderer::new(backend))
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attrs = Window::default_attributes()
            .with_title(self.cfg.app.name.clone())
            .with_inner_size(LogicalSize::new(self.cfg.app.width, self.cfg.app.height));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => window,
            Err(e) => {
                error!("window creation failed: {e}");
                self.fail(event_loop, anyhow!("window creation failed: {e}"));
                return;
            }
        };

        let renderer = match self.create_renderer(&window) {
            Ok(renderer) => renderer,
            Err(e) => {
                error!("renderer init failed: {e:#}");
                self.fail(event_loop, e);
                return;
            }
        };
        info!("backend = {:?}", renderer.backend_type());

        self.paused = framebuffer_size(&window).is_zero_area();
        self.window = Some(window);
        self.renderer = Some(renderer);
        self.clock.start();

        event_loop.set_control_flow(ControlFlow::Poll);
        info!("resumed → paused={}", self.paused);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.shutdown();
                }
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                let size = FramebufferSize::from(new_size);
                let now_paused = size.is_zero_area();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!("Resized → {}x{} (paused={})", size.width, size.height, self.paused);
                }
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.on_resized(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                let packet = RenderPacket {
                    delta_time: self.clock.tick(),
                };
                match renderer.draw_frame(&packet) {
                    Ok(true) => self.frames = self.frames.saturating_add(1),
                    Ok(false) => {}
                    Err(e) => {
                        if is_gpu_hang(&e) {
                            error!("GPU hang, shutting down: {e:#}");
                        } else {
                            error!("render error: {e:#}");
                        }
                        self.fail(event_loop, e);
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = std::time::Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config);
    let backend_cfg = cfg.render.backend_config(args.validation);
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App {
        backend_choice: args.backend,
        cfg,
        backend_cfg,
        window: None,
        renderer: None,
        clock: Clock::default(),
        paused: false,
        exiting: false,
        frames: 0,
        last_fps_instant: std::time::Instant::now(),
        failure: None,
    };

    event_loop.run_app(&mut app)?;
    match app.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
