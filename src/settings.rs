//! Stage constants and the naming contract the scene asset must honour.

use std::ops::Range;
use std::time::Duration;

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Node and clip names the stage wiring depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigNames {
    pub rotation_group: String,
    pub body: String,
    pub engine: String,
    pub engine_fire: String,
    pub camera_target: String,
    pub camera_target_narrow: String,
    pub upper_lamps: String,
    pub lower_lamps: String,
    pub interface_lamps: String,
    pub ground: String,
    pub engine_body: String,
    pub engine_body_dark: String,
    pub fire_clip_key: String,
    pub engine_clip_key: String,
    pub camera_fall_clip: String,
    pub required_clips: Vec<String>,
}

impl Default for RigNames {
    fn default() -> Self {
        Self {
            rotation_group: "kebabRocket".to_string(),
            body: "kebabBody".to_string(),
            engine: "engine".to_string(),
            engine_fire: "engine_fire".to_string(),
            camera_target: "camTrgt".to_string(),
            camera_target_narrow: "camTrgtmobile".to_string(),
            upper_lamps: "upperLamps".to_string(),
            lower_lamps: "lowerLamps".to_string(),
            interface_lamps: "interfaceLamps".to_string(),
            ground: "ground".to_string(),
            engine_body: "staticEngineBody".to_string(),
            engine_body_dark: "Mesh076".to_string(),
            fire_clip_key: "fire".to_string(),
            engine_clip_key: "ec".to_string(),
            camera_fall_clip: "camTrgtFall".to_string(),
            required_clips: vec!["camTrgtFall".to_string()],
        }
    }
}

/// How the idle rotation advances each tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RotationPolicy {
    /// Fixed angle per rendered frame, independent of frame time.
    PerTick(f32),
    /// Angular speed in radians per second, scaled by frame delta.
    PerSecond(f32),
}

impl RotationPolicy {
    pub fn step(self, delta: Duration) -> f32 {
        match self {
            RotationPolicy::PerTick(step) => step,
            RotationPolicy::PerSecond(rate) => rate * delta.as_secs_f32(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightSetting {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub position: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightKind {
    Directional,
    Point,
    Spot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    pub names: RigNames,

    pub camera_position: Vec3,
    pub camera_near: f32,
    pub camera_far: f32,
    pub fov_wide: f32,
    pub fov_narrow: f32,
    pub breakpoint_width: u32,

    pub main_lights: Vec<LightSetting>,
    pub key_light: LightSetting,
    pub key_light_narrow: Vec3,

    pub glitch_amount: f32,
    pub glitch_angle: f32,
    pub glitch_col_s: f32,
    pub glitch_initial_seed: f32,
    pub glitch_initial_seed_xy: f32,
    pub reseed_interval: Duration,
    pub heightmap_startup_size: usize,
    pub heightmap_reseed_size: usize,

    pub ambient_first_window: Range<f32>,
    pub ambient_next_window: Range<f32>,
    pub ambient_burst_ms: Range<f32>,
    pub reset_wait_ms: Range<f32>,

    pub rotation: RotationPolicy,

    pub lamp_chase_interval: Duration,
    pub lamp_pulse_keys: Vec<(f32, f32)>,
    pub interface_lamp_colors: Vec<Vec3>,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            names: RigNames::default(),
            camera_position: Vec3::new(8.0, 21.0, 48.0),
            camera_near: 0.1,
            camera_far: 1000.0,
            fov_wide: 13.0,
            fov_narrow: 16.0,
            breakpoint_width: 640,
            main_lights: vec![
                LightSetting {
                    kind: LightKind::Directional,
                    color: hex(0xffe9dd),
                    intensity: 2.7,
                    position: Vec3::new(12.0, 22.0, 22.0),
                },
                LightSetting {
                    kind: LightKind::Spot,
                    color: hex(0xffffff),
                    intensity: 88.0,
                    position: Vec3::new(5.0, 9.0, -6.0),
                },
                LightSetting {
                    kind: LightKind::Point,
                    color: hex(0xfdeaea),
                    intensity: 24.0,
                    position: Vec3::new(-5.0, 12.0, 6.0),
                },
            ],
            key_light: LightSetting {
                kind: LightKind::Spot,
                color: hex(0xffe5d2),
                intensity: 1132.0,
                position: Vec3::new(12.0, 23.0, 22.0),
            },
            key_light_narrow: Vec3::new(1.0, 20.0, -9.0),
            glitch_amount: 0.0018,
            glitch_angle: 0.02,
            glitch_col_s: 0.01,
            glitch_initial_seed: 0.122,
            glitch_initial_seed_xy: 0.02,
            reseed_interval: Duration::from_millis(100),
            heightmap_startup_size: 32,
            heightmap_reseed_size: 123,
            ambient_first_window: 5.0..37.0,
            ambient_next_window: 5.0..57.0,
            ambient_burst_ms: 0.0..300.0,
            reset_wait_ms: 1.0..801.0,
            rotation: RotationPolicy::PerTick(0.001),
            lamp_chase_interval: Duration::from_millis(50),
            lamp_pulse_keys: vec![(0.0, 0.2), (2.0, 0.2), (3.0, 1.6), (5.0, 0.2)],
            interface_lamp_colors: vec![hex(0xff2a2a), hex(0x0004ff), hex(0x2eff00)],
        }
    }
}

impl StageSettings {
    /// Switches a per-tick rotation to the same speed at 60 frames per
    /// second, scaled by frame time.
    pub fn with_scaled_rotation(mut self) -> Self {
        if let RotationPolicy::PerTick(step) = self.rotation {
            self.rotation = RotationPolicy::PerSecond(step * 60.0);
        }
        self
    }
}

/// Converts a packed `0xRRGGBB` color into linear-ish 0..1 components.
pub fn hex(rgb: u32) -> Vec3 {
    Vec3::new(
        ((rgb >> 16) & 0xff) as f32 / 255.0,
        ((rgb >> 8) & 0xff) as f32 / 255.0,
        (rgb & 0xff) as f32 / 255.0,
    )
}
