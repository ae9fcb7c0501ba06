// Window/input signals
//
// Event callbacks only raise flags; the frame loop reads them once per tick.

use std::sync::atomic::{AtomicBool, Ordering};
use winit::keyboard::KeyCode;

use crate::config::ControlsConfig;

/// Flags raised from window callbacks and consumed at tick boundaries.
#[derive(Debug, Default)]
pub struct WindowSignals {
    close_requested: AtomicBool,
    surface_stale: AtomicBool,
}

impl WindowSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_close(&self) {
        self.close_requested.store(true, Ordering::Release);
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }

    /// Mark the surface chain as no longer matching the window
    pub fn mark_stale(&self) {
        self.surface_stale.store(true, Ordering::Release);
    }

    /// Consume the stale flag
    pub fn take_stale(&self) -> bool {
        self.surface_stale.swap(false, Ordering::AcqRel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Quit,
    ToggleFullscreen,
}

#[derive(Debug, Clone)]
pub struct KeyBindings {
    fullscreen: Option<KeyCode>,
    quit: Vec<KeyCode>,
}

impl KeyBindings {
    pub fn from_config(controls: &ControlsConfig) -> Self {
        let fullscreen = parse_key(&controls.fullscreen_key);
        if fullscreen.is_none() {
            log::warn!("Unknown fullscreen key '{}', ignoring", controls.fullscreen_key);
        }

        let quit = controls
            .quit_keys
            .iter()
            .filter_map(|name| {
                let key = parse_key(name);
                if key.is_none() {
                    log::warn!("Unknown quit key '{}', ignoring", name);
                }
                key
            })
            .collect();

        Self { fullscreen, quit }
    }

    pub fn action(&self, key: KeyCode) -> Option<KeyAction> {
        if self.quit.contains(&key) {
            Some(KeyAction::Quit)
        } else if self.fullscreen == Some(key) {
            Some(KeyAction::ToggleFullscreen)
        } else {
            None
        }
    }
}

/// Map a key name from config.toml to a physical key code (case-insensitive).
pub fn parse_key(name: &str) -> Option<KeyCode> {
    let name = name.trim().to_ascii_uppercase();

    let key = match name.as_str() {
        "ESCAPE" | "ESC" => KeyCode::Escape,
        "SPACE" => KeyCode::Space,
        "ENTER" | "RETURN" => KeyCode::Enter,
        "TAB" => KeyCode::Tab,
        "BACKSPACE" => KeyCode::Backspace,
        "F1" => KeyCode::F1,
        "F2" => KeyCode::F2,
        "F3" => KeyCode::F3,
        "F4" => KeyCode::F4,
        "F5" => KeyCode::F5,
        "F6" => KeyCode::F6,
        "F7" => KeyCode::F7,
        "F8" => KeyCode::F8,
        "F9" => KeyCode::F9,
        "F10" => KeyCode::F10,
        "F11" => KeyCode::F11,
        "F12" => KeyCode::F12,
        "0" => KeyCode::Digit0,
        "1" => KeyCode::Digit1,
        "2" => KeyCode::Digit2,
        "3" => KeyCode::Digit3,
        "4" => KeyCode::Digit4,
        "5" => KeyCode::Digit5,
        "6" => KeyCode::Digit6,
        "7" => KeyCode::Digit7,
        "8" => KeyCode::Digit8,
        "9" => KeyCode::Digit9,
        "A" => KeyCode::KeyA,
        "B" => KeyCode::KeyB,
        "C" => KeyCode::KeyC,
        "D" => KeyCode::KeyD,
        "E" => KeyCode::KeyE,
        "F" => KeyCode::KeyF,
        "G" => KeyCode::KeyG,
        "H" => KeyCode::KeyH,
        "I" => KeyCode::KeyI,
        "J" => KeyCode::KeyJ,
        "K" => KeyCode::KeyK,
        "L" => KeyCode::KeyL,
        "M" => KeyCode::KeyM,
        "N" => KeyCode::KeyN,
        "O" => KeyCode::KeyO,
        "P" => KeyCode::KeyP,
        "Q" => KeyCode::KeyQ,
        "R" => KeyCode::KeyR,
        "S" => KeyCode::KeyS,
        "T" => KeyCode::KeyT,
        "U" => KeyCode::KeyU,
        "V" => KeyCode::KeyV,
        "W" => KeyCode::KeyW,
        "X" => KeyCode::KeyX,
        "Y" => KeyCode::KeyY,
        "Z" => KeyCode::KeyZ,
        _ => return None,
    };

    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bindings() {
        let bindings = KeyBindings::from_config(&ControlsConfig::default());

        assert_eq!(bindings.action(KeyCode::Escape), Some(KeyAction::Quit));
        assert_eq!(bindings.action(KeyCode::KeyQ), Some(KeyAction::Quit));
        assert_eq!(bindings.action(KeyCode::F11), Some(KeyAction::ToggleFullscreen));
        assert_eq!(bindings.action(KeyCode::KeyW), None);
    }

    #[test]
    fn key_names_are_case_insensitive() {
        assert_eq!(parse_key("escape"), Some(KeyCode::Escape));
        assert_eq!(parse_key(" q "), Some(KeyCode::KeyQ));
        assert_eq!(parse_key("f11"), Some(KeyCode::F11));
        assert_eq!(parse_key("NotAKey"), None);
    }

    #[test]
    fn unknown_keys_are_dropped() {
        let bindings = KeyBindings::from_config(&ControlsConfig {
            fullscreen_key: "Hyper".to_string(),
            quit_keys: vec!["Bogus".to_string(), "X".to_string()],
        });

        assert_eq!(bindings.action(KeyCode::KeyX), Some(KeyAction::Quit));
        assert_eq!(bindings.action(KeyCode::F11), None);
    }

    #[test]
    fn stale_flag_is_consumed_once() {
        let signals = WindowSignals::new();
        assert!(!signals.take_stale());

        signals.mark_stale();
        signals.mark_stale();
        assert!(signals.take_stale());
        assert!(!signals.take_stale());
    }

    #[test]
    fn close_request_is_sticky() {
        let signals = WindowSignals::new();
        assert!(!signals.close_requested());

        signals.request_close();
        assert!(signals.close_requested());
        assert!(signals.close_requested());
    }
}
