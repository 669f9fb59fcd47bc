use parking_lot::RwLock;

use glam::{Mat4, Vec3};

use crate::context::SceneContext;
use crate::error::Layer;
use crate::render::{CameraParams, LightParams};
use crate::settings::{LightSetting, StageSettings};

/// Physical surface size plus the scale factor that maps it to layout pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
    pub scale_factor: f64,
}

impl ViewportSize {
    pub fn logical_width(&self) -> u32 {
        (self.width as f64 / self.scale_factor).round() as u32
    }

    pub fn logical_height(&self) -> u32 {
        (self.height as f64 / self.scale_factor).round() as u32
    }
}

/// Latest window size, written by the host's resize callbacks and picked up
/// by the render loop on its next tick.
#[derive(Debug)]
pub struct Viewport {
    size: RwLock<ViewportSize>,
}

impl Viewport {
    pub fn new(width: u32, height: u32, scale_factor: f64) -> Self {
        Self {
            size: RwLock::new(ViewportSize {
                width: width.max(1),
                height: height.max(1),
                scale_factor: sanitize_scale(scale_factor),
            }),
        }
    }

    pub fn update(&self, width: u32, height: u32, scale_factor: f64) {
        *self.size.write() = ViewportSize {
            width: width.max(1),
            height: height.max(1),
            scale_factor: sanitize_scale(scale_factor),
        };
    }

    pub fn size(&self) -> ViewportSize {
        *self.size.read()
    }
}

fn sanitize_scale(scale_factor: f64) -> f64 {
    if scale_factor.is_finite() && scale_factor > 0.0 {
        scale_factor
    } else {
        1.0
    }
}

/// Responsive breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Wide,
    Narrow,
}

impl Layout {
    /// Narrow at or below `breakpoint` logical pixels.
    pub fn for_width(logical_width: u32, breakpoint: u32) -> Self {
        if logical_width <= breakpoint {
            Layout::Narrow
        } else {
            Layout::Wide
        }
    }

    pub fn fov(self, settings: &StageSettings) -> f32 {
        match self {
            Layout::Wide => settings.fov_wide,
            Layout::Narrow => settings.fov_narrow,
        }
    }

    pub fn key_light_position(self, settings: &StageSettings) -> Vec3 {
        match self {
            Layout::Wide => settings.key_light.position,
            Layout::Narrow => settings.key_light_narrow,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub fov_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(settings: &StageSettings, layout: Layout, aspect: f32) -> Self {
        Self {
            position: settings.camera_position,
            target: Vec3::ZERO,
            fov_degrees: layout.fov(settings),
            aspect,
            near: settings.camera_near,
            far: settings.camera_far,
        }
    }

    pub fn view_proj(&self) -> Mat4 {
        let view = Mat4::look_at_rh(self.position, self.target, Vec3::Y);
        let projection = Mat4::perspective_rh(
            self.fov_degrees.to_radians(),
            self.aspect.max(0.01),
            self.near,
            self.far,
        );
        projection * view
    }

    pub fn params(&self) -> CameraParams {
        CameraParams {
            view_proj: self.view_proj(),
            position: self.position,
        }
    }
}

fn light_params(light: &LightSetting, position: Vec3) -> LightParams {
    LightParams {
        kind: light.kind,
        position,
        color: light.color,
        intensity: light.intensity,
    }
}

/// Lights of the main scene; they do not depend on layout.
pub fn main_lights(settings: &StageSettings) -> Vec<LightParams> {
    settings
        .main_lights
        .iter()
        .map(|light| light_params(light, light.position))
        .collect()
}

/// The shadow scene is lit by the key light alone, moved per layout.
pub fn shadow_lights(settings: &StageSettings, layout: Layout) -> Vec<LightParams> {
    vec![light_params(
        &settings.key_light,
        layout.key_light_position(settings),
    )]
}

pub fn print_summary(context: &SceneContext) {
    let main = context.graph(Layer::Main);
    let animations = context.animations();
    println!(
        "Loaded stage with {} nodes ({} mixers, {} fall actions)",
        main.len(),
        animations.mixers().len(),
        animations.fall_count()
    );
    for mixer in animations.mixers() {
        let clips: Vec<&str> = mixer
            .actions()
            .iter()
            .map(|action| action.clip().name.as_str())
            .collect();
        println!(" - {} [{}]: {}", mixer.name(), mixer.layer(), clips.join(", "));
    }
}

pub fn print_final_state(context: &SceneContext, frames: u64) {
    println!("Frames rendered: {frames}");
    println!("Interaction state: {:?}", context.state());
    println!("Rotation: {:.3} rad", context.rotation());
    println!("Glitch enabled: {}", context.glitch().enabled());
    let paused = context
        .animations()
        .fall_actions()
        .filter(|action| action.paused())
        .count();
    println!(
        "Fall actions: {} paused of {}",
        paused,
        context.animations().fall_count()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoint_is_inclusive() {
        assert_eq!(Layout::for_width(640, 640), Layout::Narrow);
        assert_eq!(Layout::for_width(641, 640), Layout::Wide);
    }

    #[test]
    fn viewport_clamps_and_reports_logical_size() {
        let viewport = Viewport::new(0, 0, 0.0);
        assert_eq!(viewport.size().width, 1);
        viewport.update(2560, 1440, 2.0);
        let size = viewport.size();
        assert_eq!(size.logical_width(), 1280);
        assert_eq!(size.logical_height(), 720);
    }

    #[test]
    fn key_light_moves_for_narrow_layout() {
        let settings = StageSettings::default();
        let wide = shadow_lights(&settings, Layout::Wide);
        let narrow = shadow_lights(&settings, Layout::Narrow);
        assert_eq!(wide[0].position, Vec3::new(12.0, 23.0, 22.0));
        assert_eq!(narrow[0].position, Vec3::new(1.0, 20.0, -9.0));
        assert_eq!(main_lights(&settings).len(), 3);
    }

    #[test]
    fn camera_projects_target_to_screen_centre() {
        let settings = StageSettings::default();
        let mut camera = Camera::new(&settings, Layout::Wide, 16.0 / 9.0);
        camera.target = Vec3::new(0.0, 4.0, 0.0);
        let clip = camera.view_proj() * camera.target.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }
}
