//! Per-frame driver shared by every host.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::debug;

use crate::app::{Viewport, ViewportSize};
use crate::context::SceneContext;
use crate::glitch::GlitchParameters;
use crate::graph::DrawItem;
use crate::heightmap::Heightmap;
use crate::input::UiEvent;
use crate::interaction::Transition;
use crate::render::{CameraParams, LightParams};

/// Draw list and lights of one render layer.
#[derive(Debug, Clone)]
pub struct LayerView {
    pub items: Vec<DrawItem>,
    pub lights: Vec<LightParams>,
}

/// Everything a backend needs to draw one tick.
#[derive(Debug, Clone)]
pub struct Frame<'a> {
    pub index: u64,
    pub elapsed: Duration,
    pub camera: CameraParams,
    pub main: LayerView,
    pub shadow: LayerView,
    pub glitch: GlitchParameters,
    pub displacement: &'a Heightmap,
}

/// Draws the two layers into offscreen targets and composites them.
///
/// Backends own their targets; they are sized in [`resize`](Self::resize)
/// and reused by every [`render`](Self::render) call.
pub trait RenderBackend {
    fn resize(&mut self, width: u32, height: u32);
    fn render(&mut self, frame: &Frame<'_>) -> Result<()>;
}

/// Delta and elapsed time from host timestamps measured since stage start.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameClock {
    last: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(delta, elapsed)`. Timestamps that go backwards yield a
    /// zero delta.
    pub fn tick(&mut self, now: Duration) -> (Duration, Duration) {
        let delta = now.saturating_sub(self.last);
        self.last = self.last.max(now);
        (delta, self.last)
    }

    pub fn elapsed(&self) -> Duration {
        self.last
    }
}

/// What the headless backend saw for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRecord {
    pub index: u64,
    pub elapsed: Duration,
    pub glitch_enabled: bool,
    pub main_items: usize,
    pub shadow_items: usize,
    pub displacement_generation: u64,
}

/// Backend without a GPU; records each frame it is handed.
#[derive(Debug, Clone, Default)]
pub struct HeadlessBackend {
    size: (u32, u32),
    resizes: usize,
    records: Vec<FrameRecord>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Number of times targets were (re)allocated.
    pub fn resizes(&self) -> usize {
        self.resizes
    }

    pub fn frames(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&FrameRecord> {
        self.records.last()
    }
}

impl RenderBackend for HeadlessBackend {
    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.resizes += 1;
    }

    fn render(&mut self, frame: &Frame<'_>) -> Result<()> {
        self.records.push(FrameRecord {
            index: frame.index,
            elapsed: frame.elapsed,
            glitch_enabled: frame.glitch.enabled,
            main_items: frame.main.items.len(),
            shadow_items: frame.shadow.items.len(),
            displacement_generation: frame.displacement.generation(),
        });
        Ok(())
    }
}

/// Owns the stage and a backend and advances both once per display refresh.
pub struct RenderLoop<B> {
    context: SceneContext,
    backend: B,
    viewport: Arc<Viewport>,
    applied: Option<ViewportSize>,
    clock: FrameClock,
    frames: u64,
}

impl<B: RenderBackend> RenderLoop<B> {
    pub fn new(context: SceneContext, backend: B, viewport: Arc<Viewport>) -> Self {
        Self {
            context,
            backend,
            viewport,
            applied: None,
            clock: FrameClock::new(),
            frames: 0,
        }
    }

    pub fn context(&self) -> &SceneContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SceneContext {
        &mut self.context
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn into_parts(self) -> (SceneContext, B) {
        (self.context, self.backend)
    }

    /// Routes a UI trigger into the interaction state machine.
    pub fn dispatch(&mut self, event: UiEvent, now: Duration) -> Transition {
        match event {
            UiEvent::Fall => self.context.trigger_fall(now),
            UiEvent::Reset => self.context.trigger_reset(now),
        }
    }

    /// One display refresh at host time `now`.
    pub fn tick(&mut self, now: Duration) -> Result<()> {
        let (delta, elapsed) = self.clock.tick(now);
        self.apply_viewport();

        self.context.run_timers(elapsed);
        self.context.advance_animations(delta);
        self.context.poll_ambient_glitch(elapsed);
        self.context.rotate(delta);
        self.context.aim_camera();

        self.frames += 1;
        let frame = self.context.frame(self.frames, elapsed);
        self.backend.render(&frame)
    }

    fn apply_viewport(&mut self) {
        let size = self.viewport.size();
        if self.applied == Some(size) {
            return;
        }
        debug!(
            "viewport {}x{} at scale {}",
            size.width, size.height, size.scale_factor
        );
        self.backend.resize(size.width, size.height);
        self.context
            .resize(size.logical_width(), size.logical_height());
        self.applied = Some(size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Layout;
    use crate::builder::fixture;

    fn render_loop(seed: u64) -> RenderLoop<HeadlessBackend> {
        RenderLoop::new(
            fixture::context(seed),
            HeadlessBackend::new(),
            Arc::new(Viewport::new(1280, 720, 1.0)),
        )
    }

    #[test]
    fn clock_reports_delta_and_elapsed() {
        let mut clock = FrameClock::new();
        assert_eq!(
            clock.tick(Duration::from_millis(16)),
            (Duration::from_millis(16), Duration::from_millis(16))
        );
        assert_eq!(
            clock.tick(Duration::from_millis(40)),
            (Duration::from_millis(24), Duration::from_millis(40))
        );
        assert_eq!(clock.tick(Duration::from_millis(30)).0, Duration::ZERO);
    }

    #[test]
    fn targets_resize_only_when_viewport_changes() {
        let viewport = Arc::new(Viewport::new(1280, 720, 1.0));
        let mut render_loop = RenderLoop::new(
            fixture::context(1),
            HeadlessBackend::new(),
            Arc::clone(&viewport),
        );
        for frame in 1..=10u32 {
            render_loop.tick(Duration::from_millis(16) * frame).unwrap();
        }
        assert_eq!(render_loop.backend().resizes(), 1);

        viewport.update(600, 900, 1.0);
        render_loop.tick(Duration::from_millis(176)).unwrap();
        assert_eq!(render_loop.backend().resizes(), 2);
        assert_eq!(render_loop.backend().size(), (600, 900));
        assert_eq!(render_loop.context().layout(), Layout::Narrow);
    }

    #[test]
    fn every_tick_hands_one_frame_to_the_backend() {
        let mut render_loop = render_loop(2);
        for frame in 1..=5u32 {
            render_loop.tick(Duration::from_millis(16) * frame).unwrap();
        }
        let records = render_loop.backend().records();
        assert_eq!(render_loop.frames(), 5);
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.main_items > 0 && r.shadow_items > 0));
        assert_eq!(records[4].index, 5);
    }

    #[test]
    fn reseed_happens_on_wall_clock_not_per_frame() {
        let mut render_loop = render_loop(3);
        for frame in 1..=12u32 {
            render_loop.tick(Duration::from_millis(16) * frame).unwrap();
        }
        let generations: std::collections::BTreeSet<u64> = render_loop
            .backend()
            .records()
            .iter()
            .map(|r| r.displacement_generation)
            .collect();
        // 192 ms covers one reseed at 100 ms.
        assert_eq!(generations.len(), 2);
    }

    #[test]
    fn dispatch_routes_ui_events() {
        let mut render_loop = render_loop(4);
        render_loop.tick(Duration::from_millis(16)).unwrap();
        assert_eq!(
            render_loop.dispatch(UiEvent::Fall, Duration::from_millis(20)),
            Transition::Applied
        );
        assert!(!render_loop.context().rotation_enabled());
        assert_eq!(
            render_loop.dispatch(UiEvent::Reset, Duration::from_millis(30)),
            Transition::Applied
        );
        assert_eq!(
            render_loop.dispatch(UiEvent::Fall, Duration::from_millis(40)),
            Transition::Ignored
        );
    }
}
