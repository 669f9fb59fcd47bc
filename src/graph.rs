use glam::{EulerRot, Mat4, Quat, Vec3, Vec4};

use crate::scene::{MaterialDescription, SceneDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub(crate) usize);

/// How a material is shaded by the lit pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shading {
    Standard,
    /// Emissive-only, blended by its opacity.
    Flame,
    /// Casts shadows in the shadow scene but draws nothing.
    ShadowCaster,
    /// Shadow-scene ground; draws transparent black.
    ShadowReceiver,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub color: Vec3,
    pub emissive: Vec3,
    pub emissive_intensity: f32,
    pub opacity: f32,
    pub shading: Shading,
}

impl Material {
    pub fn from_description(description: &MaterialDescription) -> Self {
        Self {
            name: description.name.clone(),
            color: description.color,
            emissive: description.emissive,
            emissive_intensity: description.emissive_intensity,
            opacity: description.opacity,
            shading: Shading::Standard,
        }
    }

    pub fn emissive(name: impl Into<String>, color: Vec3, emissive: Vec3, intensity: f32) -> Self {
        Self {
            name: name.into(),
            color,
            emissive,
            emissive_intensity: intensity,
            opacity: 1.0,
            shading: Shading::Standard,
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::from_description(&MaterialDescription::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub position: Vec3,
    /// Euler XYZ, radians.
    pub rotation: Vec3,
    pub scale: Vec3,
    pub visible: bool,
    pub mesh: Option<String>,
    pub material: Option<MaterialId>,
}

impl Node {
    pub fn local_matrix(&self) -> Mat4 {
        let rotation = Quat::from_euler(
            EulerRot::XYZ,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
        );
        Mat4::from_scale_rotation_translation(self.scale, rotation, self.position)
    }
}

/// One draw submitted to a render layer.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawItem {
    pub node: NodeId,
    pub mesh: String,
    pub model: Mat4,
    pub color: Vec4,
    pub emissive: Vec3,
    pub shading: Shading,
}

/// Runtime instance of a scene description.
///
/// The stage keeps two of these, one per render pass. Nodes live in an arena
/// indexed by [`NodeId`]; parents always precede their children.
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    nodes: Vec<Node>,
    materials: Vec<Material>,
}

impl SceneGraph {
    pub fn instantiate(description: &SceneDescription) -> Self {
        let materials: Vec<Material> = description
            .materials
            .iter()
            .map(Material::from_description)
            .collect();
        let mut graph = Self {
            nodes: Vec::with_capacity(description.nodes.len()),
            materials,
        };
        for node in &description.nodes {
            let material = node.material.as_deref().and_then(|name| graph.material_id(name));
            let id = NodeId(graph.nodes.len());
            let parent = node.parent.map(NodeId);
            graph.nodes.push(Node {
                name: node.name.clone(),
                parent,
                children: Vec::new(),
                position: node.position,
                rotation: node.rotation,
                scale: node.scale,
                visible: node.visible,
                mesh: node.mesh.clone(),
                material,
            });
            if let Some(parent) = parent {
                graph.nodes[parent.0].children.push(id);
            }
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.name == name)
            .map(NodeId)
    }

    /// Depth-first search below (and including) `root`.
    pub fn find_in_subtree(&self, root: NodeId, name: &str) -> Option<NodeId> {
        self.subtree(root).into_iter().find(|id| self.node(*id).name == name)
    }

    /// `root` followed by all of its descendants, depth first.
    pub fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.node(id).children.iter().rev().copied());
        }
        out
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn world_matrix(&self, id: NodeId) -> Mat4 {
        let mut matrix = self.node(id).local_matrix();
        let mut parent = self.node(id).parent;
        while let Some(p) = parent {
            matrix = self.node(p).local_matrix() * matrix;
            parent = self.node(p).parent;
        }
        matrix
    }

    pub fn world_position(&self, id: NodeId) -> Vec3 {
        self.world_matrix(id).transform_point3(Vec3::ZERO)
    }

    pub fn set_visible(&mut self, id: NodeId, visible: bool) {
        self.nodes[id.0].visible = visible;
    }

    /// Hides `id` and everything below it from [`draw_items`](Self::draw_items).
    pub fn remove_subtree_from_draw(&mut self, id: NodeId) {
        self.set_visible(id, false);
    }

    /// Visible only if the node and every ancestor are visible.
    pub fn is_effectively_visible(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id);
            if !node.visible {
                return false;
            }
            current = node.parent;
        }
        true
    }

    pub fn material_id(&self, name: &str) -> Option<MaterialId> {
        self.materials
            .iter()
            .position(|material| material.name == name)
            .map(MaterialId)
    }

    pub fn material(&self, id: MaterialId) -> &Material {
        &self.materials[id.0]
    }

    pub fn material_mut(&mut self, id: MaterialId) -> &mut Material {
        &mut self.materials[id.0]
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    pub fn assign_material(&mut self, node: NodeId, material: MaterialId) {
        self.nodes[node.0].material = Some(material);
    }

    /// Meshes that should be drawn this frame, with resolved world transforms.
    pub fn draw_items(&self) -> Vec<DrawItem> {
        let fallback = Material::default();
        let mut worlds: Vec<Mat4> = Vec::with_capacity(self.nodes.len());
        let mut visible: Vec<bool> = Vec::with_capacity(self.nodes.len());
        let mut items = Vec::new();
        for (index, node) in self.nodes.iter().enumerate() {
            let (parent_world, parent_visible) = match node.parent {
                Some(parent) => (worlds[parent.0], visible[parent.0]),
                None => (Mat4::IDENTITY, true),
            };
            let world = parent_world * node.local_matrix();
            let shown = parent_visible && node.visible;
            worlds.push(world);
            visible.push(shown);

            let Some(mesh) = node.mesh.as_ref() else {
                continue;
            };
            let material = node.material.map(|id| self.material(id)).unwrap_or(&fallback);
            if !shown || material.shading == Shading::ShadowCaster {
                continue;
            }
            items.push(DrawItem {
                node: NodeId(index),
                mesh: mesh.clone(),
                model: world,
                color: material.color.extend(material.opacity),
                emissive: material.emissive * material.emissive_intensity,
                shading: material.shading,
            });
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r##"
    <scene>
        <material name="red" color="#ff0000"/>
        <node name="group" position="1 0 0">
            <node name="child" mesh="cube" material="red" position="0 2 0"/>
            <node name="hidden" mesh="cube" visible="false"/>
        </node>
    </scene>
    "##;

    fn graph() -> SceneGraph {
        SceneGraph::instantiate(&SceneDescription::from_xml(XML).unwrap())
    }

    #[test]
    fn world_position_accumulates_parents() {
        let graph = graph();
        let child = graph.find("child").unwrap();
        let position = graph.world_position(child);
        assert!((position - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn draw_items_skip_hidden_nodes_and_inherit_visibility() {
        let mut graph = graph();
        let items = graph.draw_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].color, Vec4::new(1.0, 0.0, 0.0, 1.0));

        let group = graph.find("group").unwrap();
        graph.set_visible(group, false);
        assert!(graph.draw_items().is_empty());
        assert!(!graph.is_effectively_visible(graph.find("child").unwrap()));
    }

    #[test]
    fn subtree_search_stays_below_root() {
        let graph = graph();
        let child = graph.find("child").unwrap();
        assert!(graph.find_in_subtree(child, "hidden").is_none());
        let group = graph.find("group").unwrap();
        assert_eq!(graph.find_in_subtree(group, "hidden"), graph.find("hidden"));
    }
}
