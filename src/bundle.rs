use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::error::{SceneError, SceneResult};

const MAGIC: &[u8; 4] = b"STGB";
const HEADER_LEN: usize = 16;
const FOOTER_LEN: usize = 16;

/// File entry from the bundle table of contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub name: String,
    pub offset: u64,
    pub size: u64,
}

/// The single binary asset a stage is loaded from: scene XML plus meshes.
#[derive(Debug, Clone)]
pub struct StageBundle {
    label: String,
    data: Arc<[u8]>,
    version: u32,
    files: Vec<BundleEntry>,
    scene_xml: String,
}

impl StageBundle {
    /// Reads a bundle from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> SceneResult<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        Self::from_bytes(path.display().to_string(), data)
    }

    /// Parses a bundle already resident in memory.
    pub fn from_bytes(label: impl Into<String>, data: Vec<u8>) -> SceneResult<Self> {
        let data: Arc<[u8]> = Arc::from(data.into_boxed_slice());
        let (version, files, scene_xml) = parse_bundle(&data)?;
        let label = label.into();
        debug!("bundle {label}: v{version}, {} file(s)", files.len());
        Ok(Self {
            label,
            data,
            version,
            files,
            scene_xml,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn scene_xml(&self) -> &str {
        &self.scene_xml
    }

    pub fn files(&self) -> &[BundleEntry] {
        &self.files
    }

    pub fn file(&self, name: &str) -> Option<&BundleEntry> {
        self.files.iter().find(|entry| entry.name == name)
    }

    /// Copies out the bytes of a named entry.
    pub fn extract_file(&self, name: &str) -> SceneResult<Vec<u8>> {
        let entry = self.file(name).ok_or_else(|| SceneError::MissingAsset {
            name: name.to_string(),
        })?;
        let (start, end) = span(entry.offset, entry.size, self.data.len())
            .ok_or_else(|| SceneError::Bundle(format!("entry {} is out of bounds", entry.name)))?;
        Ok(self.data[start..end].to_vec())
    }

    /// Serialises a bundle; used by tooling and tests.
    pub fn encode(scene_xml: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(MAGIC);
        buffer.extend_from_slice(&1u32.to_le_bytes());
        buffer.extend_from_slice(&0u64.to_le_bytes());

        let mut entries = Vec::with_capacity(files.len());
        for (name, bytes) in files {
            entries.push((*name, buffer.len() as u64, bytes.len() as u64));
            buffer.extend_from_slice(bytes);
        }

        let scene_offset = buffer.len() as u64;
        buffer.extend_from_slice(scene_xml.as_bytes());

        let toc_offset = buffer.len() as u64;
        buffer.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for (name, offset, size) in entries {
            buffer.extend_from_slice(&(name.len() as u32).to_le_bytes());
            buffer.extend_from_slice(name.as_bytes());
            buffer.extend_from_slice(&offset.to_le_bytes());
            buffer.extend_from_slice(&size.to_le_bytes());
        }
        buffer.extend_from_slice(&scene_offset.to_le_bytes());
        buffer.extend_from_slice(&(scene_xml.len() as u64).to_le_bytes());

        buffer[8..16].copy_from_slice(&toc_offset.to_le_bytes());
        buffer
    }
}

/// Where the scene description and its meshes come from.
#[derive(Debug, Clone)]
pub enum StageSource {
    Bundle(Arc<StageBundle>),
    Directory { scene_xml: String, root: PathBuf },
}

impl StageSource {
    /// Picks a loader by file extension: `.stage` bundles or plain `.xml` scenes.
    pub fn open<P: AsRef<Path>>(path: P) -> SceneResult<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("stage") => Ok(Self::Bundle(Arc::new(StageBundle::open(path)?))),
            Some("xml") => {
                let scene_xml = fs::read_to_string(path)?;
                let root = path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                Ok(Self::Directory { scene_xml, root })
            }
            other => Err(SceneError::UnsupportedFormat {
                detail: format!(
                    "expected a .stage bundle or .xml scene, got {}",
                    other.map(|ext| format!(".{ext}")).unwrap_or_else(|| "no extension".into())
                ),
            }),
        }
    }

    pub fn scene_xml(&self) -> &str {
        match self {
            Self::Bundle(bundle) => bundle.scene_xml(),
            Self::Directory { scene_xml, .. } => scene_xml,
        }
    }

    /// Reads a referenced asset (a mesh file) by its scene-relative name.
    pub fn read_asset(&self, name: &str) -> SceneResult<Vec<u8>> {
        match self {
            Self::Bundle(bundle) => bundle.extract_file(name),
            Self::Directory { root, .. } => {
                let path = root.join(name);
                fs::read(&path).map_err(|_| SceneError::MissingAsset {
                    name: name.to_string(),
                })
            }
        }
    }
}

fn parse_bundle(data: &[u8]) -> SceneResult<(u32, Vec<BundleEntry>, String)> {
    if data.len() < HEADER_LEN + FOOTER_LEN + 4 {
        return Err(SceneError::UnsupportedFormat {
            detail: format!("bundle too small ({} bytes)", data.len()),
        });
    }
    if &data[..4] != MAGIC {
        return Err(SceneError::UnsupportedFormat {
            detail: format!("bad magic {:?}, expected STGB", &data[..4]),
        });
    }

    let mut cursor = 4;
    let version = read_u32(data, &mut cursor)?;
    let toc_offset = read_u64(data, &mut cursor)?;

    let toc_end = data.len() - FOOTER_LEN;
    let mut cursor = usize::try_from(toc_offset)
        .ok()
        .filter(|start| (HEADER_LEN..toc_end).contains(start))
        .ok_or_else(|| SceneError::Bundle(format!("TOC offset {toc_offset} out of bounds")))?;

    let count = read_u32(data, &mut cursor)?;
    let mut files = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let name_len = read_u32(data, &mut cursor)? as usize;
        let name_end = cursor
            .checked_add(name_len)
            .filter(|end| *end <= toc_end)
            .ok_or_else(|| SceneError::Bundle("file name runs past the TOC".to_string()))?;
        let name = String::from_utf8(data[cursor..name_end].to_vec())
            .map_err(|err| SceneError::Bundle(format!("file name is not UTF-8: {err}")))?;
        cursor = name_end;
        let offset = read_u64(data, &mut cursor)?;
        let size = read_u64(data, &mut cursor)?;
        if span(offset, size, data.len()).is_none() {
            return Err(SceneError::Bundle(format!(
                "entry {name} points outside the bundle (offset={offset}, size={size})"
            )));
        }
        files.push(BundleEntry { name, offset, size });
    }
    if cursor != toc_end {
        return Err(SceneError::Bundle(format!(
            "TOC ended at {cursor}, expected {toc_end}"
        )));
    }

    let scene_offset = read_u64(data, &mut cursor)?;
    let scene_size = read_u64(data, &mut cursor)?;
    let (start, end) = span(scene_offset, scene_size, data.len())
        .ok_or_else(|| SceneError::Bundle("scene blob is out of bounds".to_string()))?;
    let scene_xml = String::from_utf8(data[start..end].to_vec())
        .map_err(|err| SceneError::Bundle(format!("scene XML is not UTF-8: {err}")))?;

    Ok((version, files, scene_xml))
}

fn span(offset: u64, size: u64, len: usize) -> Option<(usize, usize)> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(size).ok()?)?;
    (end <= len).then_some((start, end))
}

fn read_u32(data: &[u8], cursor: &mut usize) -> SceneResult<u32> {
    let bytes = data
        .get(*cursor..*cursor + 4)
        .ok_or_else(|| SceneError::Bundle("unexpected end of bundle".to_string()))?;
    *cursor += 4;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u64(data: &[u8], cursor: &mut usize) -> SceneResult<u64> {
    let bytes = data
        .get(*cursor..*cursor + 8)
        .ok_or_else(|| SceneError::Bundle("unexpected end of bundle".to_string()))?;
    *cursor += 8;
    let mut array = [0u8; 8];
    array.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(array))
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::io::Write;
    use tempfile::Builder;

    static SCENE_XML: Lazy<String> =
        Lazy::new(|| "<scene>\n  <node name=\"root\"/>\n</scene>\n".to_string());

    #[test]
    fn bundle_exposes_scene_and_files() {
        let bytes = StageBundle::encode(&SCENE_XML, &[("meshes/body.obj", b"v 0 0 0")]);
        let bundle = StageBundle::from_bytes("memory", bytes).unwrap();
        assert_eq!(bundle.version(), 1);
        assert_eq!(bundle.scene_xml(), SCENE_XML.as_str());
        assert_eq!(bundle.files().len(), 1);
        assert_eq!(bundle.extract_file("meshes/body.obj").unwrap(), b"v 0 0 0");
    }

    #[test]
    fn missing_entry_is_missing_asset() {
        let bytes = StageBundle::encode(&SCENE_XML, &[]);
        let bundle = StageBundle::from_bytes("memory", bytes).unwrap();
        assert!(matches!(
            bundle.extract_file("nope.obj"),
            Err(SceneError::MissingAsset { .. })
        ));
    }

    #[test]
    fn wrong_magic_is_unsupported_format() {
        let mut bytes = StageBundle::encode(&SCENE_XML, &[]);
        bytes[..4].copy_from_slice(b"glTF");
        assert!(matches!(
            StageBundle::from_bytes("memory", bytes),
            Err(SceneError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn corrupted_toc_offset_is_rejected() {
        let mut bytes = StageBundle::encode(&SCENE_XML, &[("a.obj", b"v 0 0 0")]);
        bytes[8..16].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            StageBundle::from_bytes("memory", bytes),
            Err(SceneError::Bundle(_))
        ));
    }

    #[test]
    fn source_dispatches_on_extension() {
        let mut file = Builder::new().suffix(".stage").tempfile().unwrap();
        file.write_all(&StageBundle::encode(&SCENE_XML, &[])).unwrap();
        let source = StageSource::open(file.path()).unwrap();
        assert!(matches!(source, StageSource::Bundle(_)));
        assert_eq!(source.scene_xml(), SCENE_XML.as_str());

        let other = Builder::new().suffix(".glb").tempfile().unwrap();
        assert!(matches!(
            StageSource::open(other.path()),
            Err(SceneError::UnsupportedFormat { .. })
        ));
    }
}
