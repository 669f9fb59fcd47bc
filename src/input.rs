use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{Key, NamedKey as WinitNamedKey};

/// Button that starts or toggles the fall.
pub const FALL_BUTTON_ID: &str = "bottom-works-menupoint";
/// Button that starts the glitch-covered reset.
pub const RESET_BUTTON_ID: &str = "close-about-btn";
/// Overlay hidden once the stage is ready.
pub const LOADING_SCREEN_ID: &str = "loadingScreen";

/// The two triggers the page exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UiEvent {
    Fall,
    Reset,
}

impl UiEvent {
    pub fn element_id(self) -> &'static str {
        match self {
            Self::Fall => FALL_BUTTON_ID,
            Self::Reset => RESET_BUTTON_ID,
        }
    }

    pub fn from_key(key: KeyCode) -> Option<Self> {
        match key {
            KeyCode::Character('F') | KeyCode::Named(NamedKey::Space) => Some(Self::Fall),
            KeyCode::Character('R') | KeyCode::Named(NamedKey::Escape) => Some(Self::Reset),
            _ => None,
        }
    }
}

/// Identifier for a keyboard key, independent of the windowing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    Named(NamedKey),
    Character(char),
}

impl KeyCode {
    pub fn from_name(name: &str) -> Option<Self> {
        if let Some(key) = parse_named_key(name) {
            return Some(Self::Named(key));
        }
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) if ch.is_ascii_alphanumeric() => {
                Some(Self::Character(ch.to_ascii_uppercase()))
            }
            _ => None,
        }
    }

    pub fn from_winit(key: &Key) -> Option<Self> {
        match key {
            Key::Named(WinitNamedKey::Space) => Some(Self::Named(NamedKey::Space)),
            Key::Named(WinitNamedKey::Escape) => Some(Self::Named(NamedKey::Escape)),
            Key::Character(text) => Self::from_name(text.as_str()),
            _ => None,
        }
    }
}

fn parse_named_key(name: &str) -> Option<NamedKey> {
    let key = match name {
        "Space" | " " => NamedKey::Space,
        "Escape" | "Esc" => NamedKey::Escape,
        _ => return None,
    };
    Some(key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamedKey {
    Space,
    Escape,
}

/// Maps a window keyboard event to a trigger. Releases and auto-repeats are
/// ignored so holding a key fires once.
pub fn map_key_event(event: &KeyEvent) -> Option<UiEvent> {
    if event.state != ElementState::Pressed || event.repeat {
        return None;
    }
    KeyCode::from_winit(&event.logical_key).and_then(UiEvent::from_key)
}

/// Triggers collected by input callbacks and drained by the frame loop.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<Vec<UiEvent>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: UiEvent) {
        self.events.lock().push(event);
    }

    /// Takes every queued trigger in arrival order.
    pub fn drain(&self) -> Vec<UiEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::keyboard::SmolStr;

    #[test]
    fn parses_named_and_character_keys() {
        assert_eq!(
            KeyCode::from_name("Space"),
            Some(KeyCode::Named(NamedKey::Space))
        );
        assert_eq!(KeyCode::from_name("f"), Some(KeyCode::Character('F')));
        assert_eq!(KeyCode::from_name("F12"), None);
    }

    #[test]
    fn winit_keys_map_to_triggers() {
        let fall = Key::Character(SmolStr::new("f"));
        let reset = Key::Named(WinitNamedKey::Escape);
        let other = Key::Named(WinitNamedKey::Tab);
        assert_eq!(
            KeyCode::from_winit(&fall).and_then(UiEvent::from_key),
            Some(UiEvent::Fall)
        );
        assert_eq!(
            KeyCode::from_winit(&reset).and_then(UiEvent::from_key),
            Some(UiEvent::Reset)
        );
        assert_eq!(KeyCode::from_winit(&other), None);
    }

    #[test]
    fn each_trigger_has_its_own_button() {
        assert_eq!(UiEvent::Fall.element_id(), "bottom-works-menupoint");
        assert_eq!(UiEvent::Reset.element_id(), "close-about-btn");
        assert_ne!(UiEvent::Fall.element_id(), LOADING_SCREEN_ID);
    }

    #[test]
    fn enter_is_not_a_trigger() {
        let enter = Key::Named(WinitNamedKey::Enter);
        assert_eq!(KeyCode::from_winit(&enter), None);
        assert_eq!(KeyCode::from_name("Enter"), None);
    }

    #[test]
    fn queue_drains_in_arrival_order() {
        let queue = EventQueue::new();
        queue.push(UiEvent::Reset);
        queue.push(UiEvent::Fall);
        assert_eq!(queue.drain(), vec![UiEvent::Reset, UiEvent::Fall]);
        assert!(queue.is_empty());
    }
}
