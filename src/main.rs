use std::any::Any;
use std::env;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use log::info;
use pollster::block_on;
use rand::rngs::StdRng;
use rand::SeedableRng;
use winit::dpi::LogicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget};
use winit::window::WindowBuilder;

use glitch_stage::app::{print_final_state, print_summary};
use glitch_stage::input::map_key_event;
use glitch_stage::{
    load_stage, EventQueue, HeadlessBackend, LoadedStage, RenderLoop, Renderer, SceneContext,
    StageSettings, UiEvent, Viewport,
};

const USAGE: &str = "Usage: glitch-stage <scene.stage|scene.xml> [--headless] [--frames N] \
[--delta-ms MS] [--seed N] [--fall-at FRAME] [--reset-at FRAME] [--scaled-rotation]";

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

#[cfg(target_arch = "wasm32")]
fn main() {}

fn run() -> Result<()> {
    let options = CliOptions::parse(env::args().skip(1))?;
    let mut settings = StageSettings::default();
    if options.scaled_rotation {
        settings = settings.with_scaled_rotation();
    }
    let rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let stage = load_stage(&options.path, settings, rng)
        .with_context(|| format!("failed to load stage {}", options.path))?;
    print_summary(&stage.context);

    if options.headless {
        return run_headless(stage.context, &options);
    }
    let fallback = stage.context.clone();
    match run_interactive(stage) {
        Ok(()) => Ok(()),
        Err(err) => {
            if err.downcast_ref::<WindowInitError>().is_some() {
                eprintln!(
                    "{err}. Falling back to --headless mode (set DISPLAY or install a GPU driver to enable rendering)."
                );
                run_headless(fallback, &options)
            } else {
                Err(err)
            }
        }
    }
}

/// Drives the stage on a simulated clock without a window.
fn run_headless(context: SceneContext, options: &CliOptions) -> Result<()> {
    let viewport = Arc::new(Viewport::new(1280, 720, 1.0));
    let mut render_loop = RenderLoop::new(context, HeadlessBackend::new(), viewport);
    for frame in 1..=options.frames {
        let now = frame_time(options.delta_ms, frame);
        if options.fall_at == Some(frame) {
            let outcome = render_loop.dispatch(UiEvent::Fall, now);
            info!("fall at frame {frame}: {outcome:?}");
        }
        if options.reset_at == Some(frame) {
            let outcome = render_loop.dispatch(UiEvent::Reset, now);
            info!("reset at frame {frame}: {outcome:?}");
        }
        render_loop.tick(now)?;
    }
    let frames = render_loop.frames();
    render_loop.context_mut().shutdown();
    print_final_state(render_loop.context(), frames);
    Ok(())
}

/// Simulated host time of `frame`; saturates instead of wrapping.
fn frame_time(delta_ms: u64, frame: u64) -> Duration {
    Duration::from_millis(delta_ms.saturating_mul(frame))
}

fn run_interactive(stage: LoadedStage) -> Result<()> {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let event_loop = panic::catch_unwind(AssertUnwindSafe(EventLoop::new));
    panic::set_hook(default_hook);
    let event_loop = event_loop
        .map_err(|panic| WindowInitError::from_panic("event loop", panic))?
        .map_err(|err| WindowInitError::from_error("event loop", err))?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Glitch Stage")
            .with_inner_size(LogicalSize::new(1280.0, 720.0))
            .build(&event_loop)
            .map_err(|err| WindowInitError::from_error("window", err))?,
    );

    let renderer = block_on(Renderer::new(Arc::clone(&window), &stage.meshes))
        .map_err(|err| WindowInitError::from_error("renderer", format!("{err:#}")))?;
    let size = window.inner_size();
    let viewport = Arc::new(Viewport::new(size.width, size.height, window.scale_factor()));

    let mut app = AppState {
        render_loop: RenderLoop::new(stage.context, renderer, Arc::clone(&viewport)),
        viewport,
        events: EventQueue::new(),
        started: Instant::now(),
        last_error: None,
    };

    event_loop
        .run(|event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);
            if let Err(err) = app.process_event(&event, elwt) {
                app.last_error = Some(err);
                elwt.exit();
            }
        })
        .context("event loop failed")?;

    app.shutdown();

    if let Some(err) = app.last_error {
        return Err(err);
    }

    Ok(())
}

struct AppState {
    render_loop: RenderLoop<Renderer>,
    viewport: Arc<Viewport>,
    events: EventQueue,
    started: Instant,
    last_error: Option<anyhow::Error>,
}

#[derive(Debug)]
struct WindowInitError {
    message: String,
}

impl WindowInitError {
    fn from_panic(stage: &str, panic: Box<dyn Any + Send>) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {}", panic_message(panic)),
        }
    }

    fn from_error(stage: &str, err: impl fmt::Display) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {err}"),
        }
    }
}

impl fmt::Display for WindowInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for WindowInitError {}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "unknown panic".into(),
        },
    }
}

impl AppState {
    fn process_event(&mut self, event: &Event<()>, elwt: &EventLoopWindowTarget<()>) -> Result<()> {
        let window_id = self.render_loop.backend().window_id();
        match event {
            Event::WindowEvent { event, window_id: id } if *id == window_id => match event {
                WindowEvent::CloseRequested => elwt.exit(),
                WindowEvent::Resized(size) => {
                    let scale = self.render_loop.backend().window().scale_factor();
                    self.viewport.update(size.width, size.height, scale);
                }
                WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                    let size = self.render_loop.backend().window().inner_size();
                    self.viewport.update(size.width, size.height, *scale_factor);
                }
                WindowEvent::KeyboardInput { event, .. } => {
                    if let Some(trigger) = map_key_event(event) {
                        self.events.push(trigger);
                    }
                }
                WindowEvent::RedrawRequested => {
                    let now = self.started.elapsed();
                    for trigger in self.events.drain() {
                        let outcome = self.render_loop.dispatch(trigger, now);
                        info!("{trigger:?}: {outcome:?}");
                    }
                    self.render_loop.tick(now)?;
                }
                _ => {}
            },
            Event::AboutToWait => {
                self.render_loop.backend().window().request_redraw();
            }
            _ => {}
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.render_loop.context_mut().shutdown();
        print_final_state(self.render_loop.context(), self.render_loop.frames());
    }
}

#[derive(Debug, PartialEq)]
struct CliOptions {
    path: String,
    headless: bool,
    frames: u64,
    delta_ms: u64,
    seed: Option<u64>,
    fall_at: Option<u64>,
    reset_at: Option<u64>,
    scaled_rotation: bool,
}

impl CliOptions {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let Some(path) = args.next() else {
            return Err(anyhow!(USAGE));
        };
        let mut options = Self {
            path,
            headless: false,
            frames: 312,
            delta_ms: 16,
            seed: None,
            fall_at: None,
            reset_at: None,
            scaled_rotation: false,
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--headless" => options.headless = true,
                "--scaled-rotation" => options.scaled_rotation = true,
                "--frames" => options.frames = number(&arg, args.next())?,
                "--delta-ms" => options.delta_ms = number(&arg, args.next())?,
                "--seed" => options.seed = Some(number(&arg, args.next())?),
                "--fall-at" => options.fall_at = Some(number(&arg, args.next())?),
                "--reset-at" => options.reset_at = Some(number(&arg, args.next())?),
                other => return Err(anyhow!("Unknown argument: {other}. {USAGE}")),
            }
        }
        Ok(options)
    }
}

fn number(flag: &str, value: Option<String>) -> Result<u64> {
    let value = value.ok_or_else(|| anyhow!("{flag} expects a number"))?;
    value
        .parse()
        .map_err(|_| anyhow!("{flag} expects a number, got {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliOptions> {
        CliOptions::parse(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn defaults_match_reference_run() {
        let options = parse(&["scene.xml"]).unwrap();
        assert_eq!(options.frames, 312);
        assert_eq!(options.delta_ms, 16);
        assert!(!options.headless);
    }

    #[test]
    fn parses_every_flag() {
        let options = parse(&[
            "scene.stage",
            "--headless",
            "--frames",
            "10",
            "--delta-ms",
            "33",
            "--seed",
            "7",
            "--fall-at",
            "2",
            "--reset-at",
            "5",
            "--scaled-rotation",
        ])
        .unwrap();
        assert!(options.headless && options.scaled_rotation);
        assert_eq!(
            (options.frames, options.delta_ms, options.seed),
            (10, 33, Some(7))
        );
        assert_eq!((options.fall_at, options.reset_at), (Some(2), Some(5)));
    }

    #[test]
    fn simulated_clock_never_wraps() {
        assert_eq!(frame_time(16, 312), Duration::from_millis(4992));
        let past_u32 = u64::from(u32::MAX) + 2;
        assert!(frame_time(1, past_u32) > frame_time(1, past_u32 - 1));
        assert_eq!(frame_time(u64::MAX, 2), Duration::from_millis(u64::MAX));
        assert!(frame_time(u64::MAX / 2, 3) >= frame_time(u64::MAX / 2, 2));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["scene.xml", "--frames"]).is_err());
        assert!(parse(&["scene.xml", "--frames", "many"]).is_err());
        assert!(parse(&["scene.xml", "--run-scripts"]).is_err());
    }
}
