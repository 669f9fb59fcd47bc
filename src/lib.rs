//! An interactive 3D landing-page stage.
//!
//! A scene description is loaded twice, once for the lit main layer and once
//! for a shadow layer, animated by keyframe mixers, and composited through a
//! digital glitch pass. Everything up to the GPU boundary is plain data driven
//! by host timestamps, so the whole stage runs headless under test.

pub mod animation;
pub mod app;
pub mod builder;
pub mod bundle;
pub mod context;
pub mod error;
pub mod glitch;
pub mod graph;
pub mod heightmap;
pub mod input;
pub mod interaction;
pub mod lamps;
pub mod mesh;
pub mod render;
pub mod render_loop;
pub mod scene;
pub mod scheduler;
pub mod settings;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use app::{Camera, Layout, Viewport};
pub use builder::{build_stage, load_source, load_stage, LoadedStage};
pub use bundle::{StageBundle, StageSource};
pub use context::SceneContext;
pub use error::{Layer, SceneError, SceneResult};
pub use input::{EventQueue, UiEvent};
pub use interaction::{InteractionState, Transition};
pub use render::{CameraParams, LightParams, Renderer};
pub use render_loop::{Frame, HeadlessBackend, RenderBackend, RenderLoop};
pub use settings::{RotationPolicy, StageSettings};
