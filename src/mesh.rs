use std::collections::HashMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::bundle::StageSource;
use crate::error::{SceneError, SceneResult};
use crate::scene::SceneDescription;

/// Interleaved `position.xyz normal.xyz` vertices and triangle indices.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeshData {
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 6
    }
}

/// Meshes referenced by a scene, decoded once at load time.
#[derive(Debug, Clone, Default)]
pub struct MeshLibrary {
    meshes: HashMap<String, MeshData>,
}

impl MeshLibrary {
    /// Decodes every mesh the scene references.
    pub fn load(scene: &SceneDescription, source: &StageSource) -> SceneResult<Self> {
        let mut meshes = HashMap::new();
        for name in scene.nodes.iter().filter_map(|node| node.mesh.as_deref()) {
            if meshes.contains_key(name) {
                continue;
            }
            let bytes = source.read_asset(name)?;
            let text = String::from_utf8(bytes).map_err(|err| SceneError::Mesh {
                name: name.to_string(),
                reason: err.to_string(),
            })?;
            let mesh = parse_obj(&text).map_err(|reason| SceneError::Mesh {
                name: name.to_string(),
                reason,
            })?;
            meshes.insert(name.to_string(), mesh);
        }
        Ok(Self { meshes })
    }

    pub fn insert(&mut self, name: impl Into<String>, mesh: MeshData) {
        self.meshes.insert(name.into(), mesh);
    }

    pub fn get(&self, name: &str) -> Option<&MeshData> {
        self.meshes.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MeshData)> {
        self.meshes.iter().map(|(name, mesh)| (name.as_str(), mesh))
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Corner {
    position: usize,
    normal: Option<usize>,
}

/// Decodes the subset of Wavefront OBJ the stage assets use.
pub fn parse_obj(data: &str) -> Result<MeshData, String> {
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut triangles: Vec<[Corner; 3]> = Vec::new();

    for (line_no, line) in data.lines().enumerate() {
        let mut parts = line.split_whitespace();
        let line_no = line_no + 1;
        match parts.next() {
            Some("v") => positions.push(read_vec3(parts).map_err(|e| format!("line {line_no}: {e}"))?),
            Some("vn") => normals.push(read_vec3(parts).map_err(|e| format!("line {line_no}: {e}"))?),
            Some("f") => {
                let mut polygon = Vec::new();
                for corner in parts {
                    let mut fields = corner.split('/');
                    let position = fields
                        .next()
                        .and_then(|field| field.parse::<i64>().ok())
                        .and_then(|index| resolve_index(index, positions.len()))
                        .ok_or_else(|| format!("line {line_no}: bad vertex index `{corner}`"))?;
                    let normal = fields
                        .nth(1)
                        .filter(|field| !field.is_empty())
                        .and_then(|field| field.parse::<i64>().ok())
                        .and_then(|index| resolve_index(index, normals.len()));
                    polygon.push(Corner { position, normal });
                }
                if polygon.len() < 3 {
                    return Err(format!("line {line_no}: face needs three corners"));
                }
                for i in 1..polygon.len() - 1 {
                    triangles.push([polygon[0], polygon[i], polygon[i + 1]]);
                }
            }
            _ => {}
        }
    }

    if positions.is_empty() {
        return Err("no vertices".to_string());
    }

    let mut lookup: HashMap<Corner, u32> = HashMap::new();
    let mut mesh = MeshData::default();
    let mut missing_normals = false;
    for corner in triangles.iter().flatten() {
        let next = mesh.vertex_count() as u32;
        let index = *lookup.entry(*corner).or_insert_with(|| {
            let p = positions[corner.position];
            let n = corner.normal.map(|i| normals[i]).unwrap_or(Vec3::ZERO);
            missing_normals |= corner.normal.is_none();
            mesh.vertices.extend_from_slice(&[p.x, p.y, p.z, n.x, n.y, n.z]);
            next
        });
        mesh.indices.push(index);
    }

    if missing_normals {
        smooth_normals(&mut mesh);
    }
    Ok(mesh)
}

fn read_vec3<'a>(parts: impl Iterator<Item = &'a str>) -> Result<Vec3, String> {
    let values: Vec<f32> = parts
        .take(3)
        .map(|part| part.parse::<f32>().map_err(|_| format!("bad number `{part}`")))
        .collect::<Result<_, _>>()?;
    match values.as_slice() {
        [x, y, z] => Ok(Vec3::new(*x, *y, *z)),
        _ => Err("expected three components".to_string()),
    }
}

/// OBJ indices are 1-based; negative values count back from the end.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let zero_based = if index > 0 { index - 1 } else { len + index };
    (index != 0 && (0..len).contains(&zero_based)).then_some(zero_based as usize)
}

fn smooth_normals(mesh: &mut MeshData) {
    let mut accum = vec![Vec3::ZERO; mesh.vertex_count()];
    let position = |i: usize| Vec3::from_slice(&mesh.vertices[i * 6..i * 6 + 3]);
    for tri in mesh.indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let face = (position(b) - position(a)).cross(position(c) - position(a));
        for i in [a, b, c] {
            accum[i] += face;
        }
    }
    for (i, normal) in accum.into_iter().enumerate() {
        let normal = normal.normalize_or_zero();
        mesh.vertices[i * 6 + 3..i * 6 + 6].copy_from_slice(&normal.to_array());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_is_fan_triangulated() {
        let mesh = parse_obj("v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n").unwrap();
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.vertex_count(), 4);
    }

    #[test]
    fn missing_normals_are_generated() {
        let mesh = parse_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        for chunk in mesh.vertices.chunks_exact(6) {
            assert_eq!(Vec3::new(chunk[3], chunk[4], chunk[5]), Vec3::Z);
        }
    }

    #[test]
    fn negative_indices_count_from_the_end() {
        let mesh = parse_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n").unwrap();
        assert_eq!(mesh.indices.len(), 3);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        assert!(parse_obj("v 0 0 0\nf 1 2 3\n").is_err());
    }
}
