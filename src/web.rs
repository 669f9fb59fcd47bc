#![cfg(target_arch = "wasm32")]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, HtmlCanvasElement, HtmlElement};
use winit::dpi::LogicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget};
use winit::platform::web::{EventLoopExtWebSys, WindowBuilderExtWebSys};
use winit::window::{Window, WindowBuilder};

use crate::app::Viewport;
use crate::builder::load_source;
use crate::bundle::{StageBundle, StageSource};
use crate::input::{EventQueue, UiEvent, LOADING_SCREEN_ID};
use crate::render::Renderer;
use crate::render_loop::RenderLoop;
use crate::settings::StageSettings;

#[wasm_bindgen(start)]
pub fn bootstrap() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
}

/// Builds the stage from bundle bytes and starts rendering into `canvas_id`.
///
/// On failure the error is logged and the loading screen stays up.
#[wasm_bindgen]
pub async fn run(canvas_id: String, bundle: js_sys::Uint8Array) -> Result<(), JsValue> {
    match start(&canvas_id, bundle.to_vec()).await {
        Ok(()) => Ok(()),
        Err(err) => {
            error!("stage failed to start: {err:?}");
            Err(JsValue::from_str(&format!("{err:#}")))
        }
    }
}

async fn start(canvas_id: &str, bytes: Vec<u8>) -> Result<()> {
    let browser = web_sys::window().ok_or_else(|| anyhow!("missing window"))?;
    let document = browser
        .document()
        .ok_or_else(|| anyhow!("missing document"))?;
    let canvas: HtmlCanvasElement = document
        .get_element_by_id(canvas_id)
        .ok_or_else(|| anyhow!("canvas element {canvas_id} not found"))?
        .dyn_into()
        .map_err(|_| anyhow!("element {canvas_id} is not a canvas"))?;
    let performance = browser
        .performance()
        .ok_or_else(|| anyhow!("performance timer not available"))?;

    let source = StageSource::Bundle(Arc::new(
        StageBundle::from_bytes("page-bundle", bytes).context("failed to read stage bundle")?,
    ));
    let stage = load_source(&source, StageSettings::default(), StdRng::from_entropy())
        .context("failed to build stage")?;

    let event_loop = EventLoop::new().context("failed to create event loop")?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_canvas(Some(canvas))
            .with_inner_size(browser_size(&browser))
            .build(&event_loop)
            .context("failed to attach to canvas")?,
    );
    let renderer = Renderer::new(Arc::clone(&window), &stage.meshes).await?;

    let physical = window.inner_size();
    let viewport = Arc::new(Viewport::new(
        physical.width,
        physical.height,
        window.scale_factor(),
    ));
    let events = Arc::new(EventQueue::new());
    for event in [UiEvent::Fall, UiEvent::Reset] {
        listen_for_clicks(&document, event, Arc::clone(&events))?;
    }
    listen_for_resize(&browser, Arc::clone(&window))?;

    info!(
        "stage ready: {} nodes, {} meshes",
        stage.context.graph(crate::error::Layer::Main).len(),
        stage.meshes.len()
    );
    hide_loading_screen(&document);

    let start = performance.now();
    let mut state = WebState {
        render_loop: RenderLoop::new(stage.context, renderer, Arc::clone(&viewport)),
        window,
        viewport,
        events,
        performance,
        start,
    };
    event_loop.spawn(move |event, target| {
        target.set_control_flow(ControlFlow::Poll);
        if let Err(err) = state.process_event(&event, target) {
            error!("stage stopped: {err:?}");
            target.exit();
        }
    });
    Ok(())
}

struct WebState {
    render_loop: RenderLoop<Renderer>,
    window: Arc<Window>,
    viewport: Arc<Viewport>,
    events: Arc<EventQueue>,
    performance: web_sys::Performance,
    start: f64,
}

impl WebState {
    fn now(&self) -> Duration {
        Duration::from_secs_f64(((self.performance.now() - self.start) / 1000.0).max(0.0))
    }

    fn process_event(&mut self, event: &Event<()>, target: &EventLoopWindowTarget<()>) -> Result<()> {
        match event {
            Event::WindowEvent { event, window_id } if *window_id == self.window.id() => {
                match event {
                    WindowEvent::CloseRequested => {
                        self.render_loop.context_mut().shutdown();
                        target.exit();
                    }
                    WindowEvent::Resized(size) => {
                        self.viewport
                            .update(size.width, size.height, self.window.scale_factor());
                    }
                    WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                        let size = self.window.inner_size();
                        self.viewport.update(size.width, size.height, *scale_factor);
                    }
                    WindowEvent::RedrawRequested => {
                        let now = self.now();
                        for trigger in self.events.drain() {
                            self.render_loop.dispatch(trigger, now);
                        }
                        self.render_loop.tick(now)?;
                    }
                    _ => {}
                }
            }
            Event::AboutToWait => self.window.request_redraw(),
            _ => {}
        }
        Ok(())
    }
}

fn browser_size(browser: &web_sys::Window) -> LogicalSize<f64> {
    let width = browser
        .inner_width()
        .ok()
        .and_then(|value| value.as_f64())
        .unwrap_or(1280.0);
    let height = browser
        .inner_height()
        .ok()
        .and_then(|value| value.as_f64())
        .unwrap_or(720.0);
    LogicalSize::new(width, height)
}

fn listen_for_clicks(document: &Document, event: UiEvent, events: Arc<EventQueue>) -> Result<()> {
    let id = event.element_id();
    let element = document
        .get_element_by_id(id)
        .ok_or_else(|| anyhow!("button {id} not found"))?;
    let callback = Closure::<dyn FnMut()>::new(move || events.push(event));
    element
        .add_event_listener_with_callback("click", callback.as_ref().unchecked_ref())
        .map_err(|err| anyhow!("failed to listen on {id}: {err:?}"))?;
    callback.forget();
    Ok(())
}

fn listen_for_resize(browser: &web_sys::Window, window: Arc<Window>) -> Result<()> {
    let target = browser.clone();
    let callback = Closure::<dyn FnMut()>::new(move || {
        let _ = window.request_inner_size(browser_size(&target));
    });
    browser
        .add_event_listener_with_callback("resize", callback.as_ref().unchecked_ref())
        .map_err(|err| anyhow!("failed to listen for resize: {err:?}"))?;
    callback.forget();
    Ok(())
}

fn hide_loading_screen(document: &Document) {
    let Some(element) = document.get_element_by_id(LOADING_SCREEN_ID) else {
        return;
    };
    if let Ok(element) = element.dyn_into::<HtmlElement>() {
        let _ = element.style().set_property("display", "none");
    }
}
