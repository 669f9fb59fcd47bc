use std::io;

use thiserror::Error;

/// Which instance of the scene graph a lookup ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Main,
    Shadow,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Layer::Main => f.write_str("main"),
            Layer::Shadow => f.write_str("shadow"),
        }
    }
}

/// Failures raised while loading and wiring a stage.
///
/// Everything that can go wrong is detected up front: once a
/// [`SceneContext`](crate::SceneContext) exists, per-frame work cannot fail.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("unsupported scene format: {detail}")]
    UnsupportedFormat { detail: String },

    #[error("node `{name}` is missing from the {layer} scene")]
    MissingNode { name: String, layer: Layer },

    #[error("animation clip `{name}` is missing")]
    MissingClip { name: String },

    #[error("material `{name}` is missing")]
    MissingMaterial { name: String },

    #[error("asset `{name}` could not be found")]
    MissingAsset { name: String },

    #[error("invalid {what}: {value}")]
    InvalidValue { what: String, value: String },

    #[error("invalid scene XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("malformed bundle: {0}")]
    Bundle(String),

    #[error("failed to decode mesh `{name}`: {reason}")]
    Mesh { name: String, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SceneError {
    pub(crate) fn invalid(what: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            what: what.into(),
            value: value.into(),
        }
    }
}

pub type SceneResult<T> = Result<T, SceneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_node_names_the_layer() {
        let err = SceneError::MissingNode {
            name: "engine".to_string(),
            layer: Layer::Shadow,
        };
        assert_eq!(
            err.to_string(),
            "node `engine` is missing from the shadow scene"
        );
    }
}
