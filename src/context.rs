//! The single owner of all mutable stage state.

use std::time::Duration;

use log::debug;
use rand::rngs::StdRng;

use crate::animation::{AnimationRegistry, MixerId};
use crate::app::{self, Camera, Layout};
use crate::error::{Layer, SceneError, SceneResult};
use crate::glitch::{AmbientGlitch, GlitchCompositor};
use crate::graph::{NodeId, SceneGraph};
use crate::interaction::{InteractionState, PendingReset};
use crate::lamps::LampChase;
use crate::render_loop::{Frame, LayerView};
use crate::scheduler::Scheduler;
use crate::settings::{RigNames, StageSettings};

/// Work queued on the stage scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTask {
    ReseedGlitch,
    LampChase,
    EndAmbientBurst,
    CompleteReset,
}

/// Contractual nodes of one scene graph instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RigNodes {
    pub rotation_group: NodeId,
    pub body: NodeId,
    pub engine: NodeId,
    pub engine_fire: NodeId,
    pub camera_target: NodeId,
    pub camera_target_narrow: NodeId,
    pub upper_lamps: NodeId,
    pub lower_lamps: NodeId,
    pub interface_lamps: NodeId,
    pub ground: NodeId,
    pub engine_body: NodeId,
    pub engine_body_dark: NodeId,
}

impl RigNodes {
    pub fn resolve(graph: &SceneGraph, names: &RigNames, layer: Layer) -> SceneResult<Self> {
        let find = |name: &str| {
            graph.find(name).ok_or_else(|| SceneError::MissingNode {
                name: name.to_string(),
                layer,
            })
        };
        let engine_body = find(&names.engine_body)?;
        Ok(Self {
            rotation_group: find(&names.rotation_group)?,
            body: find(&names.body)?,
            engine: find(&names.engine)?,
            engine_fire: find(&names.engine_fire)?,
            camera_target: find(&names.camera_target)?,
            camera_target_narrow: find(&names.camera_target_narrow)?,
            upper_lamps: find(&names.upper_lamps)?,
            lower_lamps: find(&names.lower_lamps)?,
            interface_lamps: find(&names.interface_lamps)?,
            ground: find(&names.ground)?,
            engine_body,
            engine_body_dark: graph
                .find_in_subtree(engine_body, &names.engine_body_dark)
                .ok_or_else(|| SceneError::MissingNode {
                    name: names.engine_body_dark.clone(),
                    layer,
                })?,
        })
    }
}

/// One animation player per animated object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixerSet {
    pub body: MixerId,
    pub fire: MixerId,
    pub engine: MixerId,
    pub camera_target: MixerId,
    pub shadow: MixerId,
    pub shadow_fire: MixerId,
    pub lamps: MixerId,
}

/// A fire effect node with the visibility it had when the stage loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireChild {
    pub layer: Layer,
    pub node: NodeId,
    pub baseline: bool,
}

#[derive(Debug, Clone)]
pub struct SceneContext {
    pub(crate) settings: StageSettings,
    pub(crate) main: SceneGraph,
    pub(crate) shadow: SceneGraph,
    pub(crate) rig: RigNodes,
    pub(crate) shadow_rig: RigNodes,
    pub(crate) animations: AnimationRegistry,
    pub(crate) mixers: MixerSet,
    pub(crate) glitch: GlitchCompositor,
    pub(crate) ambient: AmbientGlitch,
    pub(crate) interaction: InteractionState,
    pub(crate) pending_reset: Option<PendingReset>,
    pub(crate) fire: Vec<FireChild>,
    pub(crate) rotation_enabled: bool,
    pub(crate) lamp_chase: LampChase,
    pub(crate) camera: Camera,
    pub(crate) layout: Layout,
    pub(crate) scheduler: Scheduler<TimerTask>,
    pub(crate) rng: StdRng,
}

impl SceneContext {
    pub fn settings(&self) -> &StageSettings {
        &self.settings
    }

    pub fn graph(&self, layer: Layer) -> &SceneGraph {
        match layer {
            Layer::Main => &self.main,
            Layer::Shadow => &self.shadow,
        }
    }

    pub fn rig(&self, layer: Layer) -> &RigNodes {
        match layer {
            Layer::Main => &self.rig,
            Layer::Shadow => &self.shadow_rig,
        }
    }

    pub fn animations(&self) -> &AnimationRegistry {
        &self.animations
    }

    pub fn mixers(&self) -> &MixerSet {
        &self.mixers
    }

    pub fn glitch(&self) -> &GlitchCompositor {
        &self.glitch
    }

    pub fn ambient(&self) -> &AmbientGlitch {
        &self.ambient
    }

    pub fn state(&self) -> InteractionState {
        self.interaction
    }

    pub fn rotation_enabled(&self) -> bool {
        self.rotation_enabled
    }

    pub fn fire_children(&self) -> &[FireChild] {
        &self.fire
    }

    pub fn lamp_chase(&self) -> &LampChase {
        &self.lamp_chase
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn pending_timers(&self) -> usize {
        self.scheduler.len()
    }

    /// Current z rotation of the rotating group in the main scene.
    pub fn rotation(&self) -> f32 {
        self.main.node(self.rig.rotation_group).rotation.z
    }

    /// Re-evaluates the responsive layout for a logical viewport size.
    pub fn resize(&mut self, width: u32, height: u32) {
        let layout = Layout::for_width(width, self.settings.breakpoint_width);
        if layout != self.layout {
            debug!("layout switched to {layout:?} at {width}x{height}");
        }
        self.layout = layout;
        self.camera.fov_degrees = layout.fov(&self.settings);
        self.camera.aspect = width.max(1) as f32 / height.max(1) as f32;
        self.aim_camera();
    }

    /// Runs every timer due at or before `now`, in due order.
    pub fn run_timers(&mut self, now: Duration) {
        for task in self.scheduler.drain_due(now) {
            match task {
                TimerTask::ReseedGlitch => {
                    let size = self.settings.heightmap_reseed_size;
                    self.glitch.reseed(&mut self.rng, size);
                }
                TimerTask::LampChase => self.lamp_chase.step(&mut self.main),
                TimerTask::EndAmbientBurst => {
                    self.ambient.finish();
                    self.glitch.end_pulse();
                    debug!("ambient glitch burst ended at {now:?}");
                }
                TimerTask::CompleteReset => self.complete_reset(),
            }
        }
    }

    pub fn advance_animations(&mut self, delta: Duration) {
        self.animations.update(delta, &mut self.main, &mut self.shadow);
    }

    /// Starts an ambient burst when `elapsed` crosses the next trigger.
    pub fn poll_ambient_glitch(&mut self, elapsed: Duration) {
        let burst = self
            .ambient
            .poll(elapsed.as_secs_f32(), &self.settings, &mut self.rng);
        if let Some(length) = burst {
            self.glitch.begin_pulse();
            let handle = self
                .scheduler
                .schedule_once(elapsed + length, TimerTask::EndAmbientBurst);
            self.ambient.track(handle);
            debug!(
                "ambient glitch burst for {length:?}, next at {:.2}s",
                self.ambient.next_trigger()
            );
        }
    }

    /// Turns both rotation groups while rotation is enabled.
    pub fn rotate(&mut self, delta: Duration) {
        if !self.rotation_enabled {
            return;
        }
        let step = self.settings.rotation.step(delta);
        self.main.node_mut(self.rig.rotation_group).rotation.z -= step;
        self.shadow.node_mut(self.shadow_rig.rotation_group).rotation.z -= step;
    }

    /// Points the camera at the look target of the current layout.
    pub fn aim_camera(&mut self) {
        let target = match self.layout {
            Layout::Wide => self.rig.camera_target,
            Layout::Narrow => self.rig.camera_target_narrow,
        };
        self.camera.target = self.main.node(target).position;
    }

    /// Snapshot of everything the backend needs to draw this tick.
    pub fn frame(&self, index: u64, elapsed: Duration) -> Frame<'_> {
        Frame {
            index,
            elapsed,
            camera: self.camera.params(),
            main: LayerView {
                items: self.main.draw_items(),
                lights: app::main_lights(&self.settings),
            },
            shadow: LayerView {
                items: self.shadow.draw_items(),
                lights: app::shadow_lights(&self.settings, self.layout),
            },
            glitch: *self.glitch.params(),
            displacement: self.glitch.displacement(),
        }
    }

    /// Applies baseline (or inverted, when `fallen`) visibility to every fire
    /// child in both layers.
    pub(crate) fn set_fire_pose(&mut self, fallen: bool) {
        for child in &self.fire {
            let graph = match child.layer {
                Layer::Main => &mut self.main,
                Layer::Shadow => &mut self.shadow,
            };
            graph.set_visible(child.node, child.baseline != fallen);
        }
    }

    /// Drops every outstanding timer. The stage stops animating lamps and
    /// reseeding afterwards.
    pub fn shutdown(&mut self) {
        self.cancel_pending_reset();
        if let Some(handle) = self.ambient.finish() {
            self.scheduler.cancel(handle);
            self.glitch.end_pulse();
        }
        self.scheduler = Scheduler::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::fixture;

    #[test]
    fn missing_rig_node_names_the_layer() {
        let description = crate::scene::SceneDescription::from_xml(
            r#"<scene><node name="kebabRocket"/></scene>"#,
        )
        .unwrap();
        let graph = SceneGraph::instantiate(&description);
        let err = RigNodes::resolve(&graph, &RigNames::default(), Layer::Shadow).unwrap_err();
        assert!(matches!(
            err,
            SceneError::MissingNode { ref name, layer: Layer::Shadow } if name == "kebabBody"
        ));
    }

    #[test]
    fn resize_switches_layout_at_breakpoint() {
        let mut context = fixture::context(1);
        context.resize(1280, 720);
        assert_eq!(context.layout(), Layout::Wide);
        assert_eq!(context.camera().fov_degrees, 13.0);
        let wide_target = context.camera().target;

        context.resize(640, 900);
        assert_eq!(context.layout(), Layout::Narrow);
        assert_eq!(context.camera().fov_degrees, 16.0);
        assert_ne!(context.camera().target, wide_target);
    }

    #[test]
    fn rotation_moves_both_groups_and_stops_when_disabled() {
        let mut context = fixture::context(1);
        context.rotate(Duration::from_millis(16));
        assert!((context.rotation() + 0.001).abs() < 1e-7);
        let shadow = context.shadow.node(context.shadow_rig.rotation_group).rotation.z;
        assert_eq!(shadow, context.rotation());

        context.rotation_enabled = false;
        context.rotate(Duration::from_millis(16));
        assert!((context.rotation() + 0.001).abs() < 1e-7);
    }

    #[test]
    fn reseed_timer_replaces_displacement_every_interval() {
        let mut context = fixture::context(3);
        let first = context.glitch().displacement().generation();
        assert_eq!(context.glitch().displacement().size(), 32);
        context.run_timers(Duration::from_millis(99));
        assert_eq!(context.glitch().displacement().generation(), first);
        context.run_timers(Duration::from_millis(100));
        assert_ne!(context.glitch().displacement().generation(), first);
        assert_eq!(context.glitch().displacement().size(), 123);
    }

    #[test]
    fn ambient_burst_holds_glitch_until_its_timer() {
        let mut context = fixture::context(5);
        let trigger = Duration::from_secs_f32(context.ambient().next_trigger() + 0.01);
        context.poll_ambient_glitch(trigger);
        assert!(context.glitch().enabled());
        assert!(context.ambient().in_flight());

        context.run_timers(trigger + Duration::from_millis(300));
        assert!(!context.glitch().enabled());
        assert!(!context.ambient().in_flight());
    }

    #[test]
    fn shutdown_clears_all_timers() {
        let mut context = fixture::context(2);
        assert!(context.pending_timers() >= 2);
        context.shutdown();
        assert_eq!(context.pending_timers(), 0);
    }
}
