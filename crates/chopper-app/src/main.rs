// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use chopper_core::init_tracing_with;
use chopper_render::{RenderData, RenderSize, Renderer, RendererBackendType};
use tracing::{error, info, warn};

use chopper_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

mod config;
mod renderer;

use config::{AppConfig, DEFAULT_CONFIG_PATH};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Vulkan,
    DirectX,
    OpenGl,
}

impl From<BackendArg> for RendererBackendType {
    fn from(b: BackendArg) -> Self {
        match b {
            BackendArg::Vulkan => RendererBackendType::Vulkan,
            BackendArg::DirectX => RendererBackendType::DirectX,
            BackendArg::OpenGl => RendererBackendType::OpenGl,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Renderer backend, overrides `[render] backend`
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    /// Config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

struct App {
    cfg: AppConfig,
    // Dropped before the window it renders into.
    renderer: Option<Renderer>,
    window: Option<Window>,
    render_size: RenderSize,
    paused: bool,
    exiting: bool,
    init_error: Option<anyhow::Error>,

    frames: u32,
    last_fps_instant: Instant,
    last_frame: Instant,
}

impl App {
    fn new(cfg: AppConfig) -> Self {
        let now = Instant::now();
        Self {
            cfg,
            renderer: None,
            window: None,
            render_size: RenderSize::default(),
            paused: false,
            exiting: false,
            init_error: None,
            frames: 0,
            last_fps_instant: now,
            last_frame: now,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("startup failed: {err:#}");
        self.init_error = Some(err);
        self.exiting = true;
        event_loop.exit();
    }

    fn shutdown(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            renderer.shutdown();
        }
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.exiting {
            return;
        }

        let window = match event_loop.create_window(self.cfg.window.attributes()) {
            Ok(w) => w,
            Err(e) => return self.fail(event_loop, anyhow!(e).context("creating the window")),
        };
        let size = window.inner_size();
        self.render_size = RenderSize::new(size.width, size.height);

        let backend = match renderer::create_backend(&self.cfg.render, &window, &window, self.render_size)
        {
            Ok(b) => b,
            Err(e) => return self.fail(event_loop, e.into()),
        };
        self.renderer = Some(Renderer::new(backend));
        info!("vsync cfg = {}", self.cfg.render.vsync);

        self.paused = self.render_size.is_zero_area();
        self.last_frame = Instant::now();
        if !self.paused {
            window.request_redraw();
        }
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize::new(new_size.width, new_size.height);
                let now_paused = self.render_size.is_zero_area();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!("Resized → {} (paused={})", self.render_size, self.paused);
                }
                if let Some(renderer) = &mut self.renderer {
                    renderer.on_window_resize(self.render_size);
                }
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                let now = Instant::now();
                let dt = now.duration_since(self.last_frame).as_secs_f32();
                self.last_frame = now;

                if let Some(renderer) = &mut self.renderer {
                    if renderer.draw_frame(&mut RenderData::new(dt)) {
                        self.frames = self.frames.saturating_add(1);
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

        event_loop.set_control_flow(if self.cfg.render.vsync {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        });
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Tracing needs `log_level` from the file, so report load problems afterwards.
    let loaded = AppConfig::load(&args.config);
    let mut cfg = loaded.as_ref().cloned().unwrap_or_default();
    init_tracing_with(&cfg.log_level);
    if let Err(e) = &loaded {
        warn!("config: {e:#}; using defaults");
    }
    if let Some(b) = args.backend {
        cfg.render.backend = b.into();
    }
    info!("backend = {}", cfg.render.backend);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.init_error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_flag_values() {
        let args = Args::try_parse_from(["chopper-app", "--backend", "open-gl"]).unwrap();
        assert_eq!(args.backend, Some(BackendArg::OpenGl));
        assert_eq!(RendererBackendType::from(BackendArg::DirectX), RendererBackendType::DirectX);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(Args::try_parse_from(["chopper-app", "--backend", "metal"]).is_err());
    }

    #[test]
    fn config_flag_overrides_path() {
        let args = Args::try_parse_from(["chopper-app", "--config", "alt.toml"]).unwrap();
        assert_eq!(args.config, PathBuf::from("alt.toml"));
        assert_eq!(args.backend, None);
    }
}
