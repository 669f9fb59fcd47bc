#![allow(dead_code)]

use std::fs;

use glitch_stage::scene::SceneDescription;
use glitch_stage::{build_stage, SceneContext, StageSettings};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

pub const SCENE: &str = include_str!("../fixtures/scene.xml");

pub const CUBE_OBJ: &str = "\
v -0.5 -0.5 0.5
v 0.5 -0.5 0.5
v 0.5 0.5 0.5
v -0.5 0.5 0.5
v -0.5 -0.5 -0.5
v 0.5 -0.5 -0.5
v 0.5 0.5 -0.5
v -0.5 0.5 -0.5
f 1 2 3 4
f 6 5 8 7
f 5 1 4 8
f 2 6 7 3
f 4 3 7 8
f 5 6 2 1
";

pub fn context(seed: u64) -> SceneContext {
    context_with(StageSettings::default(), seed)
}

pub fn context_with(settings: StageSettings, seed: u64) -> SceneContext {
    let description = SceneDescription::from_xml(SCENE).expect("fixture scene parses");
    build_stage(&description, settings, StdRng::seed_from_u64(seed)).expect("fixture builds")
}

/// A scene directory with `scene.xml` next to the mesh it references.
pub fn scene_dir() -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    fs::write(dir.path().join("scene.xml"), SCENE).expect("write scene");
    fs::write(dir.path().join("cube.obj"), CUBE_OBJ).expect("write mesh");
    dir
}
