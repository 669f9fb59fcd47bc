use glam::Vec3;
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

use crate::error::{SceneError, SceneResult};

/// Parsed scene asset: a node hierarchy, a material table and animation clips.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SceneDescription {
    pub nodes: Vec<NodeDescription>,
    pub materials: Vec<MaterialDescription>,
    pub clips: Vec<ClipDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub name: String,
    /// Index into [`SceneDescription::nodes`]; parents always precede children.
    pub parent: Option<usize>,
    pub mesh: Option<String>,
    pub material: Option<String>,
    pub visible: bool,
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialDescription {
    pub name: String,
    pub color: Vec3,
    pub emissive: Vec3,
    pub emissive_intensity: f32,
    pub opacity: f32,
}

impl Default for MaterialDescription {
    fn default() -> Self {
        Self {
            name: String::new(),
            color: Vec3::ONE,
            emissive: Vec3::ZERO,
            emissive_intensity: 1.0,
            opacity: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipDescription {
    pub name: String,
    pub duration: f32,
    pub tracks: Vec<TrackDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDescription {
    pub target: String,
    pub property: TrackProperty,
    pub times: Vec<f32>,
    pub values: Vec<f32>,
}

/// Animatable property; transform properties target nodes, the rest materials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackProperty {
    Position,
    Rotation,
    Scale,
    EmissiveIntensity,
    Opacity,
}

impl TrackProperty {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "position" => Self::Position,
            "rotation" => Self::Rotation,
            "scale" => Self::Scale,
            "emissive_intensity" | "emissiveIntensity" => Self::EmissiveIntensity,
            "opacity" => Self::Opacity,
            _ => return None,
        })
    }

    /// Number of floats per keyframe.
    pub fn width(self) -> usize {
        match self {
            Self::Position | Self::Rotation | Self::Scale => 3,
            Self::EmissiveIntensity | Self::Opacity => 1,
        }
    }

    pub fn targets_material(self) -> bool {
        matches!(self, Self::EmissiveIntensity | Self::Opacity)
    }
}

impl SceneDescription {
    /// Parses the XML scene format.
    pub fn from_xml(xml: &str) -> SceneResult<Self> {
        let document = Document::parse(xml)?;
        let root = document.root_element();
        if !root.has_tag_name("scene") {
            return Err(SceneError::UnsupportedFormat {
                detail: format!("root element <{}> is not <scene>", root.tag_name().name()),
            });
        }

        let mut scene = SceneDescription::default();
        for child in root.children().filter(Node::is_element) {
            match child.tag_name().name() {
                "node" => collect_nodes(child, None, &mut scene.nodes)?,
                "material" => scene.materials.push(parse_material(child)?),
                "clip" => scene.clips.push(parse_clip(child)?),
                _ => {}
            }
        }
        Ok(scene)
    }

    pub fn clip(&self, name: &str) -> Option<&ClipDescription> {
        self.clips.iter().find(|clip| clip.name == name)
    }
}

fn collect_nodes(
    element: Node<'_, '_>,
    parent: Option<usize>,
    nodes: &mut Vec<NodeDescription>,
) -> SceneResult<()> {
    // Hierarchy comes from nesting only.
    if let Some(parent) = element.attribute("parent") {
        return Err(SceneError::invalid("node parent attribute", parent));
    }
    let index = nodes.len();
    nodes.push(NodeDescription {
        name: required_attr(element, "name")?,
        parent,
        mesh: element.attribute("mesh").map(str::to_string),
        material: element.attribute("material").map(str::to_string),
        visible: parse_bool(element.attribute("visible"), true)?,
        position: parse_vec3(element.attribute("position"), Vec3::ZERO)?,
        rotation: parse_vec3(element.attribute("rotation"), Vec3::ZERO)?,
        scale: parse_vec3(element.attribute("scale"), Vec3::ONE)?,
    });
    for child in element.children().filter(|n| n.has_tag_name("node")) {
        collect_nodes(child, Some(index), nodes)?;
    }
    Ok(())
}

fn parse_material(element: Node<'_, '_>) -> SceneResult<MaterialDescription> {
    let defaults = MaterialDescription::default();
    Ok(MaterialDescription {
        name: required_attr(element, "name")?,
        color: parse_color(element.attribute("color"), defaults.color)?,
        emissive: parse_color(element.attribute("emissive"), defaults.emissive)?,
        emissive_intensity: parse_f32(
            element.attribute("emissive_intensity"),
            defaults.emissive_intensity,
        )?,
        opacity: parse_f32(element.attribute("opacity"), defaults.opacity)?,
    })
}

fn parse_clip(element: Node<'_, '_>) -> SceneResult<ClipDescription> {
    let name = required_attr(element, "name")?;
    let mut tracks = Vec::new();
    for track in element.children().filter(|n| n.has_tag_name("track")) {
        let property_name = required_attr(track, "property")?;
        let property = TrackProperty::parse(&property_name)
            .ok_or_else(|| SceneError::invalid("track property", property_name.clone()))?;
        let times = parse_floats(&required_attr(track, "times")?)?;
        let values = parse_floats(&required_attr(track, "values")?)?;
        if times.is_empty() || values.len() != times.len() * property.width() {
            return Err(SceneError::invalid(
                format!("track values in clip {name}"),
                format!(
                    "{} key(s) need {} values, got {}",
                    times.len(),
                    times.len() * property.width(),
                    values.len()
                ),
            ));
        }
        if times.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(SceneError::invalid(
                format!("key times in clip {name}"),
                "times must not decrease",
            ));
        }
        tracks.push(TrackDescription {
            target: required_attr(track, "target")?,
            property,
            times,
            values,
        });
    }

    let last_key = tracks
        .iter()
        .filter_map(|track| track.times.last().copied())
        .fold(0.0_f32, f32::max);
    let duration = parse_f32(element.attribute("duration"), last_key)?;
    Ok(ClipDescription {
        name,
        duration,
        tracks,
    })
}

fn required_attr(node: Node<'_, '_>, name: &str) -> SceneResult<String> {
    node.attribute(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            SceneError::invalid(
                format!("<{}> element", node.tag_name().name()),
                format!("missing `{name}` attribute"),
            )
        })
}

fn parse_floats(value: &str) -> SceneResult<Vec<f32>> {
    value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<f32>()
                .map_err(|_| SceneError::invalid("number", part))
        })
        .collect()
}

fn parse_vec3(value: Option<&str>, default: Vec3) -> SceneResult<Vec3> {
    let Some(value) = value else {
        return Ok(default);
    };
    match parse_floats(value)?.as_slice() {
        [x, y, z] => Ok(Vec3::new(*x, *y, *z)),
        _ => Err(SceneError::invalid("vector", value)),
    }
}

fn parse_color(value: Option<&str>, default: Vec3) -> SceneResult<Vec3> {
    let Some(value) = value else {
        return Ok(default);
    };
    let digits = value.trim().trim_start_matches('#');
    if digits.len() != 6 {
        return Err(SceneError::invalid("color", value));
    }
    let packed =
        u32::from_str_radix(digits, 16).map_err(|_| SceneError::invalid("color", value))?;
    Ok(crate::settings::hex(packed))
}

fn parse_f32(value: Option<&str>, default: f32) -> SceneResult<f32> {
    match value {
        Some(value) => value
            .trim()
            .parse::<f32>()
            .map_err(|_| SceneError::invalid("number", value)),
        None => Ok(default),
    }
}

fn parse_bool(value: Option<&str>, default: bool) -> SceneResult<bool> {
    match value.map(str::trim) {
        None => Ok(default),
        Some("true" | "1") => Ok(true),
        Some("false" | "0") => Ok(false),
        Some(other) => Err(SceneError::invalid("boolean", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
    <scene>
        <material name="flame" emissive="#f89d7a" emissive_intensity="2" opacity="0.7"/>
        <node name="rocket" position="0 1 0">
            <node name="fire" mesh="fire.obj" material="flame" visible="false"/>
        </node>
        <clip name="bodyFall">
            <track target="rocket" property="position" times="0 2" values="0 1 0  0 -3 0"/>
        </clip>
    </scene>
    "##;

    #[test]
    fn parses_hierarchy_materials_and_clips() {
        let scene = SceneDescription::from_xml(SAMPLE).unwrap();
        assert_eq!(scene.nodes.len(), 2);
        assert_eq!(scene.nodes[1].parent, Some(0));
        assert!(!scene.nodes[1].visible);
        assert_eq!(scene.nodes[0].position, Vec3::new(0.0, 1.0, 0.0));

        let flame = &scene.materials[0];
        assert!((flame.opacity - 0.7).abs() < f32::EPSILON);
        assert_eq!(flame.emissive, crate::settings::hex(0xf89d7a));

        let clip = scene.clip("bodyFall").unwrap();
        assert_eq!(clip.duration, 2.0);
        assert_eq!(clip.tracks[0].property, TrackProperty::Position);
    }

    #[test]
    fn track_value_count_must_match_keys() {
        let bad = r#"<scene><clip name="c">
            <track target="a" property="position" times="0 1" values="0 0 0"/>
        </clip></scene>"#;
        assert!(matches!(
            SceneDescription::from_xml(bad),
            Err(SceneError::InvalidValue { .. })
        ));
    }

    #[test]
    fn parent_attribute_is_rejected() {
        let xml = r#"<scene><node name="a"/><node name="b" parent="a"/></scene>"#;
        assert!(matches!(
            SceneDescription::from_xml(xml),
            Err(SceneError::InvalidValue { ref value, .. }) if value == "a"
        ));
    }

    #[test]
    fn node_without_name_is_an_error() {
        assert!(SceneDescription::from_xml("<scene><node/></scene>").is_err());
    }

    #[test]
    fn foreign_root_is_unsupported() {
        assert!(matches!(
            SceneDescription::from_xml("<gltf/>"),
            Err(SceneError::UnsupportedFormat { .. })
        ));
    }
}
