//! Wires a loaded scene description into a running stage.

use std::path::Path;
use std::sync::Arc;

use glam::Vec3;
use log::info;
use rand::rngs::StdRng;

use crate::animation::{AnimationClip, AnimationRegistry, Mixer};
use crate::app::{Camera, Layout};
use crate::bundle::StageSource;
use crate::context::{FireChild, MixerSet, RigNodes, SceneContext, TimerTask};
use crate::error::{Layer, SceneError, SceneResult};
use crate::glitch::{AmbientGlitch, GlitchCompositor};
use crate::graph::{Material, SceneGraph, Shading};
use crate::interaction::InteractionState;
use crate::lamps::{self, LampChase};
use crate::mesh::MeshLibrary;
use crate::scene::{SceneDescription, TrackProperty};
use crate::scheduler::Scheduler;
use crate::settings::{hex, StageSettings};

const FLAME_EMISSIVE: u32 = 0xf89d7a;
const UPPER_LAMP_EMISSIVE: u32 = 0xf1d67e;
const LOWER_LAMP_EMISSIVE: u32 = 0xffcc84;
const ENGINE_BODY_TINT: f32 = 0.12;
const UPPER_LAMP_MATERIAL: &str = "upperLampPulse";
const LAMP_PULSE_CLIP: &str = "lampPuls";

/// A built stage plus the meshes its backend needs.
#[derive(Debug, Clone)]
pub struct LoadedStage {
    pub context: SceneContext,
    pub meshes: MeshLibrary,
}

/// Opens a `.stage` bundle or `.xml` scene and builds it.
pub fn load_stage<P: AsRef<Path>>(
    path: P,
    settings: StageSettings,
    rng: StdRng,
) -> SceneResult<LoadedStage> {
    load_source(&StageSource::open(path)?, settings, rng)
}

/// Builds a stage from an already opened source, such as bundle bytes fetched
/// by the page.
pub fn load_source(
    source: &StageSource,
    settings: StageSettings,
    rng: StdRng,
) -> SceneResult<LoadedStage> {
    let description = SceneDescription::from_xml(source.scene_xml())?;
    let meshes = MeshLibrary::load(&description, source)?;
    let context = build_stage(&description, settings, rng)?;
    Ok(LoadedStage { context, meshes })
}

/// Instantiates the main and shadow scenes, validates the naming contract
/// and binds every clip to its mixers.
pub fn build_stage(
    description: &SceneDescription,
    settings: StageSettings,
    mut rng: StdRng,
) -> SceneResult<SceneContext> {
    let names = &settings.names;
    let mut main = SceneGraph::instantiate(description);
    let mut shadow = SceneGraph::instantiate(description);
    let rig = RigNodes::resolve(&main, names, Layer::Main)?;
    let shadow_rig = RigNodes::resolve(&shadow, names, Layer::Shadow)?;

    for required in &names.required_clips {
        if description.clip(required).is_none() {
            return Err(SceneError::MissingClip {
                name: required.clone(),
            });
        }
    }
    for node in &description.nodes {
        if let Some(material) = &node.material {
            if main.material_id(material).is_none() {
                return Err(SceneError::MissingMaterial {
                    name: material.clone(),
                });
            }
        }
    }

    apply_shadow_materials(&mut shadow, &shadow_rig);
    apply_main_materials(&mut main, &rig);
    let upper_lamps = main.children(rig.upper_lamps).to_vec();
    let pulse = main.add_material(Material::emissive(
        UPPER_LAMP_MATERIAL,
        Vec3::ONE,
        hex(UPPER_LAMP_EMISSIVE),
        1.0,
    ));
    for lamp in upper_lamps {
        main.assign_material(lamp, pulse);
    }
    let lower_lamps = main.children(rig.lower_lamps).to_vec();
    let lamp_chase = LampChase::install(&mut main, &lower_lamps, hex(LOWER_LAMP_EMISSIVE));
    let interface_lamps = main.children(rig.interface_lamps).to_vec();
    lamps::paint_interface_lamps(
        &mut main,
        &interface_lamps,
        &settings.interface_lamp_colors,
        &mut rng,
    );

    let mut animations = AnimationRegistry::new();
    let mixers = MixerSet {
        body: animations.add_mixer(Mixer::new("body", Layer::Main, Some(rig.body))),
        fire: animations.add_mixer(Mixer::new("fire", Layer::Main, Some(rig.engine_fire))),
        engine: animations.add_mixer(Mixer::new("engine", Layer::Main, Some(rig.engine))),
        camera_target: animations.add_mixer(Mixer::new(
            "camera-target",
            Layer::Main,
            Some(rig.camera_target),
        )),
        shadow: animations.add_mixer(Mixer::new(
            "shadow",
            Layer::Shadow,
            Some(shadow_rig.rotation_group),
        )),
        shadow_fire: animations.add_mixer(Mixer::new(
            "shadow-fire",
            Layer::Shadow,
            Some(shadow_rig.engine_fire),
        )),
        lamps: animations.add_mixer(Mixer::new("lamps", Layer::Main, None)),
    };

    for clip in &description.clips {
        let name = clip.name.as_str();
        let clip = Arc::new(AnimationClip::from_description(clip));
        if name.contains(names.fire_clip_key.as_str()) {
            animations.add_looping(mixers.fire, Arc::clone(&clip), &main)?;
            animations.add_looping(mixers.shadow_fire, clip, &shadow)?;
        } else if name.contains(names.engine_clip_key.as_str()) {
            animations.add_fall(mixers.engine, Arc::clone(&clip), &main)?;
            animations.add_fall(mixers.shadow, clip, &shadow)?;
        } else if name == names.camera_fall_clip {
            animations.add_fall(mixers.camera_target, clip, &main)?;
        } else {
            animations.add_fall(mixers.body, Arc::clone(&clip), &main)?;
            animations.add_fall(mixers.shadow, clip, &shadow)?;
        }
    }
    let lamp_pulse = AnimationClip::scalar(
        LAMP_PULSE_CLIP,
        UPPER_LAMP_MATERIAL,
        TrackProperty::EmissiveIntensity,
        &settings.lamp_pulse_keys,
    );
    animations.add_looping(mixers.lamps, Arc::new(lamp_pulse), &main)?;

    let mut fire = Vec::new();
    for (layer, graph, fire_root) in [
        (Layer::Main, &main, rig.engine_fire),
        (Layer::Shadow, &shadow, shadow_rig.engine_fire),
    ] {
        fire.extend(graph.children(fire_root).iter().map(|node| FireChild {
            layer,
            node: *node,
            baseline: graph.node(*node).visible,
        }));
    }

    let glitch = GlitchCompositor::new(&settings, &mut rng);
    let ambient = AmbientGlitch::new(&settings, &mut rng);
    let mut scheduler = Scheduler::new();
    scheduler.schedule_every(
        settings.reseed_interval,
        settings.reseed_interval,
        TimerTask::ReseedGlitch,
    );
    scheduler.schedule_every(
        settings.lamp_chase_interval,
        settings.lamp_chase_interval,
        TimerTask::LampChase,
    );

    let layout = Layout::Wide;
    let camera = Camera::new(&settings, layout, 16.0 / 9.0);
    info!(
        "stage ready: {} nodes, {} clips, {} fall actions, {} mixers",
        main.len(),
        description.clips.len(),
        animations.fall_count(),
        animations.mixers().len()
    );

    let mut context = SceneContext {
        settings,
        main,
        shadow,
        rig,
        shadow_rig,
        animations,
        mixers,
        glitch,
        ambient,
        interaction: InteractionState::Idle,
        pending_reset: None,
        fire,
        rotation_enabled: true,
        lamp_chase,
        camera,
        layout,
        scheduler,
        rng,
    };
    context.aim_camera();
    Ok(context)
}

/// The shadow rocket only casts; its fire keeps the authored look and the
/// ground only receives.
fn apply_shadow_materials(shadow: &mut SceneGraph, rig: &RigNodes) {
    let caster = shadow.add_material(Material {
        name: "shadowCaster".to_string(),
        opacity: 0.0,
        shading: Shading::ShadowCaster,
        ..Material::default()
    });
    let fire = shadow.subtree(rig.engine_fire);
    for node in shadow.subtree(rig.rotation_group) {
        if shadow.node(node).mesh.is_some() && !fire.contains(&node) {
            shadow.assign_material(node, caster);
        }
    }
    let receiver = shadow.add_material(Material {
        name: "shadowReceiver".to_string(),
        color: Vec3::ZERO,
        shading: Shading::ShadowReceiver,
        ..Material::default()
    });
    shadow.assign_material(rig.ground, receiver);
}

fn apply_main_materials(main: &mut SceneGraph, rig: &RigNodes) {
    main.remove_subtree_from_draw(rig.ground);

    let mut dark = main
        .node(rig.engine_body_dark)
        .material
        .map(|id| main.material(id).clone())
        .unwrap_or_default();
    dark.name = format!("{}Dark", dark.name);
    dark.color = Vec3::splat(ENGINE_BODY_TINT);
    let dark = main.add_material(dark);
    main.assign_material(rig.engine_body_dark, dark);

    let flame = main.add_material(Material {
        name: "flame".to_string(),
        color: Vec3::ZERO,
        emissive: hex(FLAME_EMISSIVE),
        emissive_intensity: 2.0,
        opacity: 0.7,
        shading: Shading::Flame,
    });
    for child in main.children(rig.engine_fire).to_vec() {
        main.assign_material(child, flame);
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    use rand::SeedableRng;

    use super::*;

    pub(crate) const SCENE: &str = include_str!("../tests/fixtures/scene.xml");

    pub(crate) fn description() -> SceneDescription {
        SceneDescription::from_xml(SCENE).unwrap()
    }

    pub(crate) fn context(seed: u64) -> SceneContext {
        build_stage(
            &description(),
            StageSettings::default(),
            StdRng::seed_from_u64(seed),
        )
        .unwrap()
    }
}
