// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use vktut_core::{init_tracing, FpsCounter};
use vktut_render::{FrameStatus, RenderSize, Renderer};
use vktut_render_vk::VkRenderer;

use vktut_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use vktut_platform::{framebuffer_size, window_attributes};

mod config;

use config::{AppCfg, Args};

struct App {
    cfg: AppCfg,
    // declared before `window` so the surface is gone before the window
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    paused: bool,
    fps: FpsCounter,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        Self {
            cfg,
            renderer: None,
            window: None,
            paused: false,
            fps: FpsCounter::new(Duration::from_secs(1)),
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let w = &self.cfg.window;
        let window = event_loop
            .create_window(window_attributes(&w.title, w.width, w.height))
            .context("create_window")?;
        let (width, height) = framebuffer_size(&window);
        let size = RenderSize::new(width, height);

        let renderer = VkRenderer::new(&window, &window, size, &self.cfg.render_options())?;
        self.paused = size.is_empty();
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    /// Renderer goes before the window: the surface must not outlive it.
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(r) = self.renderer.take() {
            info!(frames = r.presented(), "renderer shutting down");
        }
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.fatal = Some(e);
        self.shutdown(event_loop);
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e.context("renderer setup"));
                return;
            }
        }
        info!("resumed → paused={}", self.paused);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        match &self.window {
            Some(window) if window.id() == window_id => {}
            _ => return,
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                let size = RenderSize::new(new_size.width, new_size.height);
                let now_paused = size.is_empty();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    self.fps.reset(Instant::now());
                }
                info!(
                    "Resized → {}x{} (paused={})",
                    size.width, size.height, self.paused
                );
                if let Some(r) = &mut self.renderer {
                    r.resize(size);
                }
                if let (false, Some(w)) = (self.paused, &self.window) {
                    w.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                if self.paused {
                    return;
                }
                let Some(r) = &mut self.renderer else {
                    return;
                };
                match r.render() {
                    // count only frames that were actually presented
                    Ok(FrameStatus::Presented { .. }) => self.fps.frame(),
                    Ok(FrameStatus::Skipped(_)) => {}
                    Err(e) => self.fail(event_loop, e.context("draw_frame")),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.fatal.is_some() || self.renderer.is_none() {
            return;
        }
        if self.paused {
            // zero-size framebuffer: sleep until the next window event
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        if let Some(frames) = self.fps.tick(Instant::now()) {
            info!("fps ~ {frames}");
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut cfg = AppCfg::load(&args.config)?;
    cfg.apply_args(&args);
    info!(config = %args.config.display(), ?cfg, "starting");

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => {
            info!("clean shutdown");
            Ok(())
        }
    }
}
