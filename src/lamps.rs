use glam::Vec3;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::graph::{Material, MaterialId, NodeId, SceneGraph};

const LIT: f32 = 2.0;
const TRAIL: [f32; 3] = [1.0, 0.8, 0.6];
const DIM: f32 = 0.1;

/// Running light along the lower lamp array.
#[derive(Debug, Clone)]
pub struct LampChase {
    materials: Vec<MaterialId>,
    cursor: usize,
}

impl LampChase {
    /// Gives every lamp its own material so each can be driven separately.
    pub fn install(graph: &mut SceneGraph, lamps: &[NodeId], emissive: Vec3) -> Self {
        let materials = lamps
            .iter()
            .map(|lamp| {
                let name = format!("{}-chase", graph.node(*lamp).name);
                let material = graph.add_material(Material::emissive(name, Vec3::ZERO, emissive, 1.0));
                graph.assign_material(*lamp, material);
                material
            })
            .collect();
        Self {
            materials,
            cursor: 0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Lights the current lamp, fades the three behind it, dims the rest and
    /// moves on, wrapping around the array.
    pub fn step(&mut self, graph: &mut SceneGraph) {
        let count = self.materials.len();
        if count == 0 {
            return;
        }
        for material in &self.materials {
            graph.material_mut(*material).emissive_intensity = DIM;
        }
        graph.material_mut(self.materials[self.cursor]).emissive_intensity = LIT;
        for (behind, intensity) in TRAIL.iter().enumerate() {
            if behind + 1 >= count {
                break;
            }
            let index = (self.cursor + count - (behind + 1)) % count;
            graph.material_mut(self.materials[index]).emissive_intensity = *intensity;
        }
        self.cursor = (self.cursor + 1) % count;
    }

    pub fn intensities(&self, graph: &SceneGraph) -> Vec<f32> {
        self.materials
            .iter()
            .map(|id| graph.material(*id).emissive_intensity)
            .collect()
    }
}

/// Gives each interface lamp a random signal color.
pub fn paint_interface_lamps<R: Rng + ?Sized>(
    graph: &mut SceneGraph,
    lamps: &[NodeId],
    palette: &[Vec3],
    rng: &mut R,
) {
    for lamp in lamps {
        let Some(color) = palette.choose(rng) else {
            return;
        };
        let name = format!("{}-signal", graph.node(*lamp).name);
        let material = graph.add_material(Material::emissive(name, Vec3::ONE, *color, 2.0));
        graph.assign_material(*lamp, material);
    }
}
