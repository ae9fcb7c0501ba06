// =============================================================================
// FIREWORKS - GPU particle animation on Vulkan
// =============================================================================
//
// A compute pass moves the particles, a graphics pass draws one star per
// particle, and the two are pipelined across two frame slots.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, window, input signals)                  │
// │    └── FrameScheduler (slot rotation, tick ordering)            │
// │          └── Renderer (owns every GPU object)                   │
// │                ├── SurfaceChain (presentable images)            │
// │                ├── Compute + graphics pipelines                 │
// │                └── Per-slot buffers, command buffers, sync      │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW (one tick, slot i):
// 1. Wait compute fence i, write delta time (and relaunch particles)
// 2. Submit compute: particles[i-1] -> particles[i]
// 3. Wait graphics fence i, acquire image
// 4. Submit draw (waits on compute + image), present
// 5. Advance to slot i+1
//
// =============================================================================

mod backend;
mod clock;
mod config;
mod frame;
mod geometry;
mod input;
mod particles;
mod renderer;
mod uniforms;

use anyhow::{Context, Result};
use config::Config;
use frame::{FrameOutcome, FrameScheduler};
use input::{KeyAction, KeyBindings, WindowSignals};
use renderer::Renderer;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    // Initialize logging
    init_logging(&config)?;
    log::info!("Starting fireworks");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    if let Err(e) = config.validate() {
        log::error!("Invalid configuration: {:#}", e);
        return Err(e.context("Invalid configuration"));
    }

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging, optionally redirected into the configured log file
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    if config.debug.log_to_file {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
            .with_context(|| format!("Failed to open log file {:?}", config.debug.log_file))?;

        writeln!(file, "=== Fireworks Log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
        writeln!(file)?;

        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Window, input state and the renderer.
///
/// The renderer is declared before the window so the surface is destroyed
/// while the window still exists.
struct App {
    // ─────────────────────────────────────────────────────────────────────────
    // CONFIGURATION
    // ─────────────────────────────────────────────────────────────────────────
    config: Config,
    bindings: KeyBindings,

    // ─────────────────────────────────────────────────────────────────────────
    // RENDERING
    // ─────────────────────────────────────────────────────────────────────────
    renderer: Option<Renderer>,
    scheduler: FrameScheduler,

    // ─────────────────────────────────────────────────────────────────────────
    // WINDOW & INPUT
    // ─────────────────────────────────────────────────────────────────────────
    window: Option<Arc<Window>>,
    signals: WindowSignals,
    is_fullscreen: bool,
    /// Window has no drawable area; the loop parks until it has one
    is_minimized: bool,
    /// A recreation was deferred because the surface had no drawable area
    recreate_pending: bool,

    /// First unrecoverable error; returned from main
    fatal: Option<anyhow::Error>,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let bindings = KeyBindings::from_config(&config.controls);
        let now = Instant::now();

        Self {
            config,
            bindings,
            renderer: None,
            scheduler: FrameScheduler::new(),
            window: None,
            signals: WindowSignals::new(),
            is_fullscreen,
            is_minimized: false,
            recreate_pending: false,
            fatal: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn window_size(&self) -> (u32, u32) {
        self.window
            .as_ref()
            .map(|w| {
                let size = w.inner_size();
                (size.width, size.height)
            })
            .unwrap_or((0, 0))
    }

    /// Log the error, remember it for main and stop the event loop
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("Fatal error: {:#}", error);
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
        self.signals.request_close();
        event_loop.exit();
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Run one animation tick, rebuilding the surface chain when it went stale.
    fn render_frame(&mut self) -> Result<()> {
        if self.signals.close_requested() || self.is_minimized {
            return Ok(());
        }

        let window_size = self.window_size();
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        // ─────────────────────────────────────────────────────────────────────
        // Finish a recreation that had to wait for a drawable area
        // ─────────────────────────────────────────────────────────────────────
        if self.recreate_pending {
            if !renderer.recreate_surface(window_size)? {
                return Ok(());
            }
            self.recreate_pending = false;
        }

        // ─────────────────────────────────────────────────────────────────────
        // Tick: compute -> acquire -> draw -> present
        // ─────────────────────────────────────────────────────────────────────
        let resize_requested = self.signals.take_stale();
        log::trace!("Tick on slot {}", self.scheduler.current());
        let outcome = self.scheduler.tick(renderer, resize_requested)?;

        // ─────────────────────────────────────────────────────────────────────
        // Recover from a stale surface
        // ─────────────────────────────────────────────────────────────────────
        if outcome.needs_recreate() {
            log::debug!("Surface stale after {:?}", outcome);
            self.recreate_pending = !renderer.recreate_surface(window_size)?;
        }

        if !matches!(outcome, FrameOutcome::Aborted { .. }) {
            self.update_fps();
        }

        Ok(())
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                // Enter fullscreen (use current monitor)
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            self.signals.mark_stale();
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    /// Drain the GPU and leave the event loop
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        log::info!(
            "Close requested after {} frames, shutting down...",
            self.scheduler.frames_presented()
        );
        if let Some(ref renderer) = self.renderer {
            if let Err(e) = renderer.wait_idle() {
                log::error!("Failed to drain device: {:#}", e);
            }
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Create window with settings from config
        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        let size = window.inner_size();
        match Renderer::new(&self.config, window.as_ref(), (size.width, size.height)) {
            Ok(renderer) => {
                let extent = renderer.extent();
                log::info!("Rendering at {}x{}", extent.width, extent.height);
                self.renderer = Some(renderer);
            }
            Err(e) => {
                self.fail(event_loop, e.context("Failed to initialize Vulkan"));
                return;
            }
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                self.signals.request_close();
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                self.is_minimized = size.width == 0 || size.height == 0;
                self.signals.mark_stale();
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render_frame() {
                    self.fail(event_loop, e);
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::PhysicalKey;

                if event.state.is_pressed() && !event.repeat {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match self.bindings.action(key) {
                            Some(KeyAction::Quit) => {
                                log::info!("{:?} pressed, exiting...", key);
                                self.signals.request_close();
                            }
                            Some(KeyAction::ToggleFullscreen) => self.toggle_fullscreen(),
                            None => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Tick boundary: honor a close request, otherwise keep animating.
    /// A minimized window parks the loop until the next event.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.signals.close_requested() {
            if self.fatal.is_none() {
                self.shutdown(event_loop);
            }
            return;
        }

        if self.is_minimized {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    /// Tear the renderer down while the window still exists.
    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.renderer = None;
        log::info!("Cleanup complete");
    }
}
