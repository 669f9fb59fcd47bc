mod common;

use std::sync::Arc;
use std::time::Duration;

use glam::{Vec2, Vec4};
use glitch_stage::glitch::{GlitchCompositor, Image};
use glitch_stage::heightmap;
use glitch_stage::{
    HeadlessBackend, InteractionState, Layer, RenderLoop, SceneContext, StageSettings, Transition,
    UiEvent, Viewport,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

const TICK: Duration = Duration::from_millis(16);

fn render_loop(context: SceneContext) -> RenderLoop<HeadlessBackend> {
    RenderLoop::new(
        context,
        HeadlessBackend::new(),
        Arc::new(Viewport::new(1280, 720, 1.0)),
    )
}

fn run_ticks(render_loop: &mut RenderLoop<HeadlessBackend>, from: u32, to: u32) {
    for frame in from..=to {
        render_loop.tick(TICK * frame).unwrap();
    }
}

fn fire_visibility(context: &SceneContext) -> Vec<bool> {
    context
        .fire_children()
        .iter()
        .map(|child| context.graph(child.layer).node(child.node).visible)
        .collect()
}

#[test]
fn idle_stage_rotates_one_milliradian_per_tick() {
    let mut render_loop = render_loop(common::context(1));
    run_ticks(&mut render_loop, 1, 312);
    assert_eq!(render_loop.frames(), 312);
    assert!((render_loop.context().rotation() + 0.312).abs() < 1e-3);

    let shadow_rig = render_loop.context().rig(Layer::Shadow).rotation_group;
    let shadow = render_loop.context().graph(Layer::Shadow).node(shadow_rig).rotation.z;
    assert_eq!(shadow, render_loop.context().rotation());
}

#[test]
fn scaled_rotation_follows_elapsed_time() {
    let settings = StageSettings::default().with_scaled_rotation();
    let mut render_loop = render_loop(common::context_with(settings, 1));
    run_ticks(&mut render_loop, 1, 312);
    let expected = -0.06 * (TICK * 312).as_secs_f32();
    assert!((render_loop.context().rotation() - expected).abs() < 1e-3);
}

#[test]
fn fall_then_reset_returns_to_idle_pose() {
    let mut render_loop = render_loop(common::context(11));
    let baseline = fire_visibility(render_loop.context());
    run_ticks(&mut render_loop, 1, 10);

    assert_eq!(
        render_loop.dispatch(UiEvent::Fall, TICK * 10),
        Transition::Applied
    );
    run_ticks(&mut render_loop, 11, 100);
    let context = render_loop.context();
    assert_eq!(context.state(), InteractionState::Fallen);
    assert!(context
        .animations()
        .fall_actions()
        .all(|action| action.is_active() && !action.paused()));
    let stopped_at = context.rotation();

    let reset_at = TICK * 100;
    assert_eq!(
        render_loop.dispatch(UiEvent::Reset, reset_at),
        Transition::Applied
    );
    let due = render_loop.context().pending_reset().unwrap();
    assert!(due > reset_at);
    run_ticks(&mut render_loop, 101, 160);

    let context = render_loop.context();
    assert_eq!(context.state(), InteractionState::Idle);
    assert!(!context.glitch().enabled());
    assert!(context
        .animations()
        .fall_actions()
        .all(|action| action.paused() && action.time() == 0.0));
    assert_eq!(fire_visibility(context), baseline);
    assert!(context.rotation() < stopped_at);
}

#[test]
fn glitch_covers_the_whole_reset_wait() {
    let mut render_loop = render_loop(common::context(21));
    run_ticks(&mut render_loop, 1, 5);
    let reset_at = TICK * 5;
    render_loop.dispatch(UiEvent::Reset, reset_at);
    let due = render_loop.context().pending_reset().unwrap();
    run_ticks(&mut render_loop, 6, 70);

    for record in render_loop.backend().records() {
        if record.elapsed > reset_at && record.elapsed < due {
            assert!(record.glitch_enabled, "glitch dropped at {:?}", record.elapsed);
        }
        if record.elapsed >= due {
            assert!(!record.glitch_enabled, "glitch held at {:?}", record.elapsed);
        }
    }
    let first_idle = render_loop
        .backend()
        .records()
        .iter()
        .find(|record| record.elapsed > reset_at && !record.glitch_enabled)
        .map(|record| record.elapsed)
        .unwrap();
    assert!(first_idle >= due);
}

#[test]
fn double_fall_keeps_pose_but_restores_fire() {
    let mut render_loop = render_loop(common::context(3));
    let baseline = fire_visibility(render_loop.context());
    render_loop.dispatch(UiEvent::Fall, Duration::ZERO);
    run_ticks(&mut render_loop, 1, 30);
    render_loop.dispatch(UiEvent::Fall, TICK * 30);

    let context = render_loop.context();
    assert_eq!(context.state(), InteractionState::Idle);
    assert_eq!(fire_visibility(context), baseline);
    assert!(context
        .animations()
        .fall_actions()
        .all(|action| action.time() > 0.0));
}

#[test]
fn every_mixer_advances_by_the_same_delta() {
    let mut render_loop = render_loop(common::context(13));
    run_ticks(&mut render_loop, 1, 10);
    render_loop.dispatch(UiEvent::Fall, TICK * 10);
    // 40 ticks stay short of the shortest fall clip, so nothing clamps.
    run_ticks(&mut render_loop, 11, 50);

    let context = render_loop.context();
    let times: Vec<f32> = context
        .animations()
        .fall_actions()
        .map(|action| action.time())
        .collect();
    assert_eq!(times.len(), 5);
    assert!(times[0] > 0.6);
    assert!(times.iter().all(|time| *time == times[0]), "{times:?}");

    let flicker: Vec<(Layer, f32)> = context
        .animations()
        .mixers()
        .iter()
        .flat_map(|mixer| {
            mixer
                .actions()
                .iter()
                .filter(|action| action.clip().name == "fireFlicker")
                .map(move |action| (mixer.layer(), action.time()))
        })
        .collect();
    assert_eq!(flicker.len(), 2);
    assert_ne!(flicker[0].0, flicker[1].0);
    assert_eq!(flicker[0].1, flicker[1].1);

    let main = context.graph(Layer::Main);
    let shadow = context.graph(Layer::Shadow);
    for name in ["meat", "staticEngineBody"] {
        let main_node = main.node(main.find(name).unwrap());
        let shadow_node = shadow.node(shadow.find(name).unwrap());
        assert_eq!(main_node.position, shadow_node.position, "{name} position");
        assert_eq!(main_node.rotation, shadow_node.rotation, "{name} rotation");
    }
    assert!(main.node(main.find("meat").unwrap()).position.y < -1.0);
}

#[test]
fn lamp_chase_lights_one_lamp_at_a_time() {
    let mut render_loop = render_loop(common::context(4));
    run_ticks(&mut render_loop, 1, 40);
    let context = render_loop.context();
    let intensities = context.lamp_chase().intensities(context.graph(Layer::Main));
    assert_eq!(intensities.len(), 5);
    assert_eq!(intensities.iter().filter(|value| **value == 2.0).count(), 1);
}

#[test]
fn disabled_composite_is_plain_overlay() {
    let mut rng = StdRng::seed_from_u64(5);
    let compositor = GlitchCompositor::new(&StageSettings::default(), &mut rng);
    assert!(!compositor.enabled());

    let main = Image::from_fn(8, 4, |x, y| Vec4::new(x as f32 / 8.0, y as f32 / 4.0, 0.2, 1.0));
    let shadow = Image::filled(8, 4, Vec4::new(0.0, 0.0, 0.0, 0.25));
    let out = compositor.composite(&main, &shadow);
    for y in 0..4 {
        for x in 0..8 {
            assert_eq!(out.pixel(x, y), main.pixel(x, y) + shadow.pixel(x, y));
        }
    }
    assert_eq!(
        out.sample(Vec2::new(0.99, 0.99)),
        main.pixel(7, 3) + shadow.pixel(7, 3)
    );
}

#[test]
fn reseeded_heightmap_stays_in_unit_range() {
    let mut rng = StdRng::seed_from_u64(8);
    let map = heightmap::generate(123, &mut rng);
    assert_eq!(map.size(), 123);
    assert_eq!(map.data().len(), 123 * 123);
    assert!(map.data().iter().all(|value| (0.0..=1.0).contains(value)));
}
