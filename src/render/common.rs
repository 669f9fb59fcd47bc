use glam::{Mat4, Vec3};

use crate::settings::LightKind;

/// Camera parameters consumed by the renderer's uniform buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraParams {
    pub view_proj: Mat4,
    pub position: Vec3,
}

/// One light of a render layer. Spot lights are shaded as point lights.
#[derive(Clone, Debug, PartialEq)]
pub struct LightParams {
    pub kind: LightKind,
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}
