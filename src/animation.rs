//! Keyframe playback: clips, per-object mixers and the registry that advances
//! all of them in lock step.

use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;

use crate::error::{Layer, SceneError, SceneResult};
use crate::graph::{MaterialId, NodeId, SceneGraph};
use crate::scene::{ClipDescription, TrackProperty};

#[derive(Debug, Clone, PartialEq)]
pub struct KeyframeTrack {
    pub target: String,
    pub property: TrackProperty,
    pub times: Vec<f32>,
    pub values: Vec<f32>,
}

impl KeyframeTrack {
    /// Linear interpolation, holding the first/last key outside the key range.
    /// Scalar properties come back in `x`.
    pub fn sample(&self, time: f32) -> Vec3 {
        let width = self.property.width();
        if self.times.is_empty() || self.values.len() < self.times.len() * width {
            return Vec3::ZERO;
        }
        let key = |index: usize| {
            let v = &self.values[index * width..(index + 1) * width];
            if width == 3 {
                Vec3::new(v[0], v[1], v[2])
            } else {
                Vec3::new(v[0], 0.0, 0.0)
            }
        };
        let next = self.times.partition_point(|t| *t <= time);
        if next == 0 {
            return key(0);
        }
        if next == self.times.len() {
            return key(next - 1);
        }
        let (t0, t1) = (self.times[next - 1], self.times[next]);
        let span = t1 - t0;
        let alpha = if span > f32::EPSILON {
            (time - t0) / span
        } else {
            1.0
        };
        key(next - 1).lerp(key(next), alpha)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationClip {
    pub name: String,
    pub duration: f32,
    pub tracks: Vec<KeyframeTrack>,
}

impl AnimationClip {
    pub fn from_description(description: &ClipDescription) -> Self {
        Self {
            name: description.name.clone(),
            duration: description.duration,
            tracks: description
                .tracks
                .iter()
                .map(|track| KeyframeTrack {
                    target: track.target.clone(),
                    property: track.property,
                    times: track.times.clone(),
                    values: track.values.clone(),
                })
                .collect(),
        }
    }

    /// Single scalar track clip, e.g. a material pulse.
    pub fn scalar(
        name: impl Into<String>,
        target: impl Into<String>,
        property: TrackProperty,
        keys: &[(f32, f32)],
    ) -> Self {
        let duration = keys.last().map(|(t, _)| *t).unwrap_or(0.0);
        Self {
            name: name.into(),
            duration,
            tracks: vec![KeyframeTrack {
                target: target.into(),
                property,
                times: keys.iter().map(|(t, _)| *t).collect(),
                values: keys.iter().map(|(_, v)| *v).collect(),
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    Repeat,
    /// Play to the end once; `clamp` holds the last frame afterwards.
    Once { clamp: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Node(NodeId),
    Material(MaterialId),
}

/// One clip bound to concrete nodes/materials of one scene graph.
#[derive(Debug, Clone)]
pub struct AnimationAction {
    clip: Arc<AnimationClip>,
    bindings: Vec<Binding>,
    mode: LoopMode,
    time: f32,
    paused: bool,
    active: bool,
    finished: bool,
}

impl AnimationAction {
    pub fn clip(&self) -> &AnimationClip {
        &self.clip
    }

    pub fn mode(&self) -> LoopMode {
        self.mode
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Activates the action from wherever it currently is.
    pub fn play(&mut self) {
        self.active = true;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Rewinds to the first frame.
    pub fn reset(&mut self) {
        self.time = 0.0;
        self.finished = false;
    }

    fn advance(&mut self, delta: f32) {
        if !self.active || self.paused {
            return;
        }
        let duration = self.clip.duration;
        self.time += delta;
        match self.mode {
            LoopMode::Repeat => {
                if duration > 0.0 {
                    self.time = self.time.rem_euclid(duration);
                }
            }
            LoopMode::Once { clamp } => {
                if self.time >= duration {
                    self.time = duration;
                    self.finished = true;
                    if !clamp {
                        self.active = false;
                    }
                }
            }
        }
    }

    /// Writes the pose at the current time. Paused actions still hold theirs.
    fn apply(&self, graph: &mut SceneGraph) {
        if !self.active {
            return;
        }
        for (track, binding) in self.clip.tracks.iter().zip(&self.bindings) {
            let value = track.sample(self.time);
            match (*binding, track.property) {
                (Binding::Node(id), TrackProperty::Position) => graph.node_mut(id).position = value,
                (Binding::Node(id), TrackProperty::Rotation) => graph.node_mut(id).rotation = value,
                (Binding::Node(id), TrackProperty::Scale) => graph.node_mut(id).scale = value,
                (Binding::Material(id), TrackProperty::EmissiveIntensity) => {
                    graph.material_mut(id).emissive_intensity = value.x
                }
                (Binding::Material(id), TrackProperty::Opacity) => {
                    graph.material_mut(id).opacity = value.x
                }
                _ => {}
            }
        }
    }
}

/// Animation player for one object of one scene graph.
#[derive(Debug, Clone)]
pub struct Mixer {
    name: String,
    layer: Layer,
    root: Option<NodeId>,
    actions: Vec<AnimationAction>,
}

impl Mixer {
    /// A mixer rooted at `root`, or bound to materials only when `root` is `None`.
    pub fn new(name: impl Into<String>, layer: Layer, root: Option<NodeId>) -> Self {
        Self {
            name: name.into(),
            layer,
            root,
            actions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub fn actions(&self) -> &[AnimationAction] {
        &self.actions
    }

    /// Resolves the clip's track targets inside this mixer's root.
    pub fn clip_action(
        &mut self,
        clip: Arc<AnimationClip>,
        mode: LoopMode,
        graph: &SceneGraph,
    ) -> SceneResult<usize> {
        let mut bindings = Vec::with_capacity(clip.tracks.len());
        for track in &clip.tracks {
            let binding = if track.property.targets_material() {
                graph
                    .material_id(&track.target)
                    .map(Binding::Material)
                    .ok_or_else(|| SceneError::MissingMaterial {
                        name: track.target.clone(),
                    })?
            } else {
                let node = match self.root {
                    Some(root) => graph.find_in_subtree(root, &track.target),
                    None => graph.find(&track.target),
                };
                node.map(Binding::Node).ok_or_else(|| SceneError::MissingNode {
                    name: track.target.clone(),
                    layer: self.layer,
                })?
            };
            bindings.push(binding);
        }
        self.actions.push(AnimationAction {
            clip,
            bindings,
            mode,
            time: 0.0,
            paused: false,
            active: false,
            finished: false,
        });
        Ok(self.actions.len() - 1)
    }

    pub fn action_mut(&mut self, index: usize) -> &mut AnimationAction {
        &mut self.actions[index]
    }

    pub fn update(&mut self, delta: f32, graph: &mut SceneGraph) {
        for action in &mut self.actions {
            action.advance(delta);
            action.apply(graph);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MixerId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionRef {
    pub mixer: MixerId,
    pub action: usize,
}

/// The stage's mixer set plus the one-shot "fall" actions.
#[derive(Debug, Clone, Default)]
pub struct AnimationRegistry {
    mixers: Vec<Mixer>,
    fall: Vec<ActionRef>,
}

impl AnimationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mixer(&mut self, mixer: Mixer) -> MixerId {
        self.mixers.push(mixer);
        MixerId(self.mixers.len() - 1)
    }

    pub fn mixer(&self, id: MixerId) -> &Mixer {
        &self.mixers[id.0]
    }

    pub fn mixers(&self) -> &[Mixer] {
        &self.mixers
    }

    /// Binds a looping clip and starts it immediately.
    pub fn add_looping(
        &mut self,
        mixer: MixerId,
        clip: Arc<AnimationClip>,
        graph: &SceneGraph,
    ) -> SceneResult<ActionRef> {
        let action = self.mixers[mixer.0].clip_action(clip, LoopMode::Repeat, graph)?;
        self.mixers[mixer.0].action_mut(action).play();
        Ok(ActionRef { mixer, action })
    }

    /// Binds a play-once-and-hold clip that waits for [`play_fall`](Self::play_fall).
    pub fn add_fall(
        &mut self,
        mixer: MixerId,
        clip: Arc<AnimationClip>,
        graph: &SceneGraph,
    ) -> SceneResult<ActionRef> {
        let action = self.mixers[mixer.0].clip_action(clip, LoopMode::Once { clamp: true }, graph)?;
        let reference = ActionRef { mixer, action };
        self.fall.push(reference);
        Ok(reference)
    }

    pub fn action(&self, reference: ActionRef) -> &AnimationAction {
        &self.mixers[reference.mixer.0].actions[reference.action]
    }

    pub fn fall_actions(&self) -> impl Iterator<Item = &AnimationAction> + '_ {
        self.fall.iter().map(|r| self.action(*r))
    }

    pub fn fall_count(&self) -> usize {
        self.fall.len()
    }

    /// Unpauses and plays every fall action from its current position.
    pub fn play_fall(&mut self) {
        for r in &self.fall {
            let action = self.mixers[r.mixer.0].action_mut(r.action);
            action.set_paused(false);
            action.play();
        }
    }

    /// Rewinds every fall action to its first frame and pauses it there.
    pub fn reset_fall(&mut self) {
        for r in &self.fall {
            let action = self.mixers[r.mixer.0].action_mut(r.action);
            action.reset();
            action.set_paused(true);
        }
    }

    /// Advances every mixer by the same `delta`.
    pub fn update(&mut self, delta: Duration, main: &mut SceneGraph, shadow: &mut SceneGraph) {
        let delta = delta.as_secs_f32();
        for mixer in &mut self.mixers {
            let graph = match mixer.layer {
                Layer::Main => &mut *main,
                Layer::Shadow => &mut *shadow,
            };
            mixer.update(delta, graph);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneDescription;

    const XML: &str = r##"
    <scene>
        <material name="glow" emissive="#ffffff" emissive_intensity="0.2"/>
        <node name="rocket">
            <node name="body" position="0 0 0"/>
        </node>
        <node name="elsewhere"/>
        <clip name="drop">
            <track target="body" property="position" times="0 2" values="0 0 0  0 -4 0"/>
        </clip>
    </scene>
    "##;

    fn setup() -> (SceneDescription, SceneGraph) {
        let description = SceneDescription::from_xml(XML).unwrap();
        let graph = SceneGraph::instantiate(&description);
        (description, graph)
    }

    fn drop_clip(description: &SceneDescription) -> Arc<AnimationClip> {
        Arc::new(AnimationClip::from_description(description.clip("drop").unwrap()))
    }

    #[test]
    fn track_interpolates_and_holds_ends() {
        let track = KeyframeTrack {
            target: "x".into(),
            property: TrackProperty::Opacity,
            times: vec![0.0, 2.0, 3.0, 5.0],
            values: vec![0.2, 0.2, 1.6, 0.2],
        };
        assert!((track.sample(-1.0).x - 0.2).abs() < 1e-6);
        assert!((track.sample(2.5).x - 0.9).abs() < 1e-6);
        assert!((track.sample(9.0).x - 0.2).abs() < 1e-6);
    }

    #[test]
    fn fall_action_plays_once_and_clamps() {
        let (description, mut graph) = setup();
        let rocket = graph.find("rocket");
        let body = graph.find("body").unwrap();
        let mut registry = AnimationRegistry::new();
        let mixer = registry.add_mixer(Mixer::new("body", Layer::Main, rocket));
        let fall = registry.add_fall(mixer, drop_clip(&description), &graph).unwrap();
        let mut shadow = SceneGraph::default();

        registry.update(Duration::from_secs(1), &mut graph, &mut shadow);
        assert_eq!(graph.node(body).position, Vec3::ZERO);

        registry.play_fall();
        registry.update(Duration::from_secs(1), &mut graph, &mut shadow);
        assert!((graph.node(body).position.y + 2.0).abs() < 1e-5);

        registry.update(Duration::from_secs(5), &mut graph, &mut shadow);
        assert!(registry.action(fall).is_finished());
        assert!((graph.node(body).position.y + 4.0).abs() < 1e-5);
    }

    #[test]
    fn reset_and_pause_holds_the_start_pose() {
        let (description, mut graph) = setup();
        let body = graph.find("body").unwrap();
        let mut registry = AnimationRegistry::new();
        let mixer = registry.add_mixer(Mixer::new("body", Layer::Main, graph.find("rocket")));
        registry.add_fall(mixer, drop_clip(&description), &graph).unwrap();
        let mut shadow = SceneGraph::default();

        registry.play_fall();
        registry.update(Duration::from_millis(1500), &mut graph, &mut shadow);
        registry.reset_fall();
        registry.update(Duration::from_millis(500), &mut graph, &mut shadow);

        assert!(registry.fall_actions().all(|a| a.paused() && a.time() == 0.0));
        assert_eq!(graph.node(body).position, Vec3::ZERO);

        registry.play_fall();
        registry.update(Duration::from_millis(500), &mut graph, &mut shadow);
        assert!((graph.node(body).position.y + 1.0).abs() < 1e-5);
    }

    #[test]
    fn play_resumes_instead_of_restarting() {
        let (description, mut graph) = setup();
        let mut registry = AnimationRegistry::new();
        let mixer = registry.add_mixer(Mixer::new("body", Layer::Main, graph.find("rocket")));
        let fall = registry.add_fall(mixer, drop_clip(&description), &graph).unwrap();
        let mut shadow = SceneGraph::default();

        registry.play_fall();
        registry.update(Duration::from_millis(500), &mut graph, &mut shadow);
        registry.play_fall();
        registry.update(Duration::from_millis(500), &mut graph, &mut shadow);
        assert!((registry.action(fall).time() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn looping_material_clip_wraps() {
        let (_, mut graph) = setup();
        let glow = graph.material_id("glow").unwrap();
        let mut registry = AnimationRegistry::new();
        let mixer = registry.add_mixer(Mixer::new("lamps", Layer::Main, None));
        let clip = AnimationClip::scalar(
            "pulse",
            "glow",
            TrackProperty::EmissiveIntensity,
            &[(0.0, 0.2), (2.0, 0.2), (3.0, 1.6), (5.0, 0.2)],
        );
        registry.add_looping(mixer, Arc::new(clip), &graph).unwrap();
        let mut shadow = SceneGraph::default();

        registry.update(Duration::from_secs(8), &mut graph, &mut shadow);
        assert!((graph.material(glow).emissive_intensity - 1.6).abs() < 1e-4);
    }

    #[test]
    fn unresolved_target_outside_root_is_missing_node() {
        let (_, graph) = setup();
        let mut mixer = Mixer::new("body", Layer::Shadow, graph.find("elsewhere"));
        let clip = Arc::new(AnimationClip {
            name: "c".into(),
            duration: 1.0,
            tracks: vec![KeyframeTrack {
                target: "body".into(),
                property: TrackProperty::Position,
                times: vec![0.0],
                values: vec![0.0, 0.0, 0.0],
            }],
        });
        let err = mixer.clip_action(clip, LoopMode::Repeat, &graph).unwrap_err();
        assert!(matches!(err, SceneError::MissingNode { layer: Layer::Shadow, .. }));
    }
}
