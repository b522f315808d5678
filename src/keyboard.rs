//! Keyboard event normalization for shortcut capture.
//!
//! Physical key events are turned into the lowercase tokens the backend
//! understands (`"ctrl"`, `"shift"`, `"a"`, `"f5"`, `"caps lock"`), and tokens
//! are joined with `+` into a chord string such as `"ctrl+shift+h"`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static FUNCTION_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^F\d+$").expect("key pattern should compile"));
static LETTER_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Key([A-Z])$").expect("key pattern should compile"));
static DIGIT_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Digit(\d)$").expect("key pattern should compile"));
static NUMPAD_DIGIT_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Numpad(\d)$").expect("key pattern should compile"));
static CAMEL_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z])([A-Z])").expect("key pattern should compile"));

/// Token produced for the Escape key; pressing it cancels a recording.
pub const ESCAPE_TOKEN: &str = "esc";

const MODIFIER_TOKENS: [&str; 11] = [
    "ctrl", "control", "shift", "alt", "option", "meta", "command", "cmd", "super", "win",
    "windows",
];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Macos,
    Windows,
    Linux,
    Unknown,
}

impl OsType {
    /// The platform this crate was compiled for.
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            OsType::Macos
        } else if cfg!(target_os = "windows") {
            OsType::Windows
        } else if cfg!(target_os = "linux") {
            OsType::Linux
        } else {
            OsType::Unknown
        }
    }

    fn alt_name(self) -> &'static str {
        match self {
            OsType::Macos => "option",
            _ => "alt",
        }
    }

    fn meta_name(self) -> &'static str {
        match self {
            OsType::Macos => "command",
            _ => "super",
        }
    }
}

impl Default for OsType {
    fn default() -> Self {
        OsType::current()
    }
}

/// A raw keyboard event as delivered by the host window.
///
/// `code` is the physical key (`"KeyA"`, `"ShiftLeft"`), `key` the produced
/// value (`"a"`, `"Shift"`); either may be missing depending on the source.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyEvent {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub key_code: u32,
    #[serde(default)]
    pub repeat: bool,
}

impl KeyEvent {
    pub fn from_code(code: &str) -> Self {
        Self {
            code: Some(code.to_string()),
            ..Self::default()
        }
    }

    pub fn from_key(key: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            ..Self::default()
        }
    }

    /// Same event, flagged as an OS auto-repeat.
    pub fn repeated(mut self) -> Self {
        self.repeat = true;
        self
    }
}

fn code_to_name(code: &str, os: OsType) -> String {
    if FUNCTION_KEY.is_match(code) {
        return code.to_lowercase();
    }
    if let Some(caps) = LETTER_KEY.captures(code) {
        return caps[1].to_lowercase();
    }
    if let Some(caps) = DIGIT_KEY.captures(code) {
        return caps[1].to_string();
    }
    if let Some(caps) = NUMPAD_DIGIT_KEY.captures(code) {
        return format!("numpad {}", &caps[1]);
    }

    let named = match code {
        "ShiftLeft" | "ShiftRight" => "shift",
        "ControlLeft" | "ControlRight" => "ctrl",
        "AltLeft" | "AltRight" => os.alt_name(),
        "MetaLeft" | "MetaRight" | "OSLeft" | "OSRight" => os.meta_name(),
        "CapsLock" => "caps lock",
        "Tab" => "tab",
        "Enter" => "enter",
        "Space" => "space",
        "Backspace" => "backspace",
        "Delete" => "delete",
        "Escape" => ESCAPE_TOKEN,
        "ArrowUp" => "up",
        "ArrowDown" => "down",
        "ArrowLeft" => "left",
        "ArrowRight" => "right",
        "Home" => "home",
        "End" => "end",
        "PageUp" => "page up",
        "PageDown" => "page down",
        "Insert" => "insert",
        "PrintScreen" => "print screen",
        "ScrollLock" => "scroll lock",
        "Pause" => "pause",
        "ContextMenu" => "menu",
        "NumpadMultiply" => "numpad *",
        "NumpadAdd" => "numpad +",
        "NumpadSubtract" => "numpad -",
        "NumpadDecimal" => "numpad .",
        "NumpadDivide" => "numpad /",
        "NumLock" => "num lock",
        // Punctuation
        "Semicolon" => ";",
        "Equal" => "=",
        "Comma" => ",",
        "Minus" => "-",
        "Period" => ".",
        "Slash" => "/",
        "Backquote" => "`",
        "BracketLeft" => "[",
        "Backslash" => "\\",
        "BracketRight" => "]",
        "Quote" => "'",
        _ => "",
    };
    if !named.is_empty() {
        return named.to_string();
    }

    // "NumpadEnter" -> "numpad enter", "IntlBackslash" -> "intl backslash"
    CAMEL_BOUNDARY
        .replace_all(code, "$1 $2")
        .to_lowercase()
}

fn key_to_name(key: &str, os: OsType) -> String {
    match key {
        "Control" => "ctrl".to_string(),
        "Alt" => os.alt_name().to_string(),
        "Shift" => "shift".to_string(),
        "Meta" | "OS" => match os {
            OsType::Macos => "command".to_string(),
            OsType::Windows => "win".to_string(),
            _ => "super".to_string(),
        },
        "CapsLock" => "caps lock".to_string(),
        "ArrowUp" => "up".to_string(),
        "ArrowDown" => "down".to_string(),
        "ArrowLeft" => "left".to_string(),
        "ArrowRight" => "right".to_string(),
        "Escape" => ESCAPE_TOKEN.to_string(),
        " " => "space".to_string(),
        other => other.to_lowercase(),
    }
}

/// Map a key event to its token, using OS-specific modifier names.
///
/// The physical `code` is preferred; `key` is the fallback, and an event with
/// neither becomes `unknown-<key_code>`.
pub fn get_key_name(event: &KeyEvent, os: OsType) -> String {
    if let Some(code) = event.code.as_deref().filter(|c| !c.is_empty()) {
        return code_to_name(code, os);
    }
    if let Some(key) = event.key.as_deref().filter(|k| !k.is_empty()) {
        return key_to_name(key, os);
    }
    format!("unknown-{}", event.key_code)
}

/// Collapse left/right variants ("left shift" -> "shift").
pub fn normalize_key(key: &str) -> String {
    if key.starts_with("left ") || key.starts_with("right ") {
        let parts: Vec<&str> = key.split(' ').collect();
        if parts.len() == 2 {
            return parts[1].to_string();
        }
    }
    key.to_string()
}

/// Token for an event, ready to be added to a chord.
pub fn normalized_key_name(event: &KeyEvent, os: OsType) -> String {
    normalize_key(&get_key_name(event, os))
}

fn format_macos_key(key: &str) -> &str {
    if key.eq_ignore_ascii_case("alt") {
        "option"
    } else {
        key
    }
}

/// Display form of a chord for the given platform.
pub fn format_key_combination(combination: &str, os: OsType) -> String {
    if os != OsType::Macos {
        return combination.to_string();
    }
    combination
        .split('+')
        .map(format_macos_key)
        .collect::<Vec<_>>()
        .join(" + ")
}

pub fn is_modifier(token: &str) -> bool {
    MODIFIER_TOKENS.contains(&token.trim().to_lowercase().as_str())
}

/// Determine whether a shortcut string contains at least one non-modifier key.
/// Single non-modifier keys (e.g. "f5" or "space") are allowed, modifier-only
/// combos (e.g. "ctrl" or "ctrl+shift") are not.
pub fn validate_shortcut_string(raw: &str) -> Result<(), String> {
    if raw.trim().is_empty() {
        return Err("Shortcut must not be empty".into());
    }
    if raw.split('+').any(|part| !is_modifier(part)) {
        Ok(())
    } else {
        Err("Shortcut must contain at least one non-modifier key".into())
    }
}

/// Ordered set of key tokens, kept in order of first press.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chord {
    keys: Vec<String>,
}

impl Chord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the token unless it is already part of the chord. Returns whether it was added.
    pub fn push(&mut self, key: &str) -> bool {
        if self.contains(key) {
            return false;
        }
        self.keys.push(key.to_string());
        true
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.keys.len();
        self.keys.retain(|k| k != key);
        self.keys.len() != before
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.keys.join("+"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_map_to_tokens() {
        let os = OsType::Linux;
        assert_eq!(get_key_name(&KeyEvent::from_code("KeyA"), os), "a");
        assert_eq!(get_key_name(&KeyEvent::from_code("Digit7"), os), "7");
        assert_eq!(get_key_name(&KeyEvent::from_code("F13"), os), "f13");
        assert_eq!(get_key_name(&KeyEvent::from_code("Numpad4"), os), "numpad 4");
        assert_eq!(get_key_name(&KeyEvent::from_code("CapsLock"), os), "caps lock");
        assert_eq!(get_key_name(&KeyEvent::from_code("BracketLeft"), os), "[");
        assert_eq!(get_key_name(&KeyEvent::from_code("Escape"), os), ESCAPE_TOKEN);
        assert_eq!(
            get_key_name(&KeyEvent::from_code("NumpadEnter"), os),
            "numpad enter"
        );
    }

    #[test]
    fn test_modifier_names_follow_platform() {
        let meta = KeyEvent::from_code("MetaLeft");
        let alt = KeyEvent::from_code("AltRight");
        assert_eq!(get_key_name(&meta, OsType::Macos), "command");
        assert_eq!(get_key_name(&meta, OsType::Windows), "super");
        assert_eq!(get_key_name(&meta, OsType::Linux), "super");
        assert_eq!(get_key_name(&alt, OsType::Macos), "option");
        assert_eq!(get_key_name(&alt, OsType::Windows), "alt");
    }

    #[test]
    fn test_left_and_right_variants_collapse() {
        for code in ["ShiftLeft", "ShiftRight"] {
            let token = normalized_key_name(&KeyEvent::from_code(code), OsType::Linux);
            assert_eq!(token, "shift");
        }
        assert_eq!(normalize_key("left shift"), "shift");
        assert_eq!(normalize_key("right ctrl"), "ctrl");
        assert_eq!(normalize_key("left"), "left");
        assert_eq!(normalize_key("page up"), "page up");
    }

    #[test]
    fn test_chord_from_right_and_left_shift_is_identical() {
        let mut right = Chord::new();
        right.push(&normalize_key("right shift"));
        right.push("a");

        let mut left = Chord::new();
        left.push(&normalize_key("left shift"));
        left.push("a");

        assert_eq!(right.to_string(), "shift+a");
        assert_eq!(left.to_string(), right.to_string());
    }

    #[test]
    fn test_key_fallback_and_unknown() {
        let os = OsType::Windows;
        assert_eq!(get_key_name(&KeyEvent::from_key("Meta"), os), "win");
        assert_eq!(get_key_name(&KeyEvent::from_key(" "), os), "space");
        assert_eq!(get_key_name(&KeyEvent::from_key("Q"), os), "q");
        let bare = KeyEvent {
            key_code: 229,
            ..KeyEvent::default()
        };
        assert_eq!(get_key_name(&bare, os), "unknown-229");
    }

    #[test]
    fn test_chord_keeps_first_press_order() {
        let mut chord = Chord::new();
        assert!(chord.push("ctrl"));
        assert!(chord.push("shift"));
        assert!(!chord.push("ctrl"));
        assert!(chord.push("h"));
        assert_eq!(chord.to_string(), "ctrl+shift+h");
        assert!(chord.remove("shift"));
        assert_eq!(chord.len(), 2);
    }

    #[test]
    fn test_format_for_display() {
        assert_eq!(
            format_key_combination("alt+space", OsType::Macos),
            "option + space"
        );
        assert_eq!(format_key_combination("alt+space", OsType::Linux), "alt+space");
    }

    #[test]
    fn test_validate_shortcut_string() {
        assert!(validate_shortcut_string("f5").is_ok());
        assert!(validate_shortcut_string("ctrl+space").is_ok());
        assert!(validate_shortcut_string("ctrl+shift").is_err());
        assert!(validate_shortcut_string("").is_err());
    }
}
