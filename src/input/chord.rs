//! Key-combination strings and injected key chords.

use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use std::fmt;
use thiserror::Error;

/// Combination string parse errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChordError {
    /// String was empty or only separators
    #[error("empty key combination")]
    Empty,

    /// Token is neither a modifier nor a supported key
    #[error("unsupported key: {0}")]
    UnknownKey(String),

    /// More than one non-modifier key
    #[error("more than one key in combination: {0}")]
    MultipleKeys(String),

    /// Only modifiers, no key
    #[error("missing key in combination: {0}")]
    MissingKey(String),
}

/// Modifier keys used in injected chords
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChordModifier {
    /// Control
    Control,
    /// Alt / Option
    Alt,
    /// Shift
    Shift,
    /// Command / Windows / Super
    Super,
}

/// The modifier used for copy and paste on this platform
#[cfg(target_os = "macos")]
pub const PRIMARY_MODIFIER: ChordModifier = ChordModifier::Super;
/// The modifier used for copy and paste on this platform
#[cfg(not(target_os = "macos"))]
pub const PRIMARY_MODIFIER: ChordModifier = ChordModifier::Control;

/// A key press with held modifiers, delivered to the focused application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    /// Modifiers held while `key` is tapped
    pub modifiers: Vec<ChordModifier>,
    /// Lowercase letter to tap
    pub key: char,
}

impl KeyChord {
    /// Platform copy shortcut (Cmd+C / Ctrl+C)
    #[must_use]
    pub fn copy() -> Self {
        Self {
            modifiers: vec![PRIMARY_MODIFIER],
            key: 'c',
        }
    }

    /// Platform paste shortcut (Cmd+V / Ctrl+V)
    #[must_use]
    pub fn paste() -> Self {
        Self {
            modifiers: vec![PRIMARY_MODIFIER],
            key: 'v',
        }
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in &self.modifiers {
            let name = match modifier {
                ChordModifier::Control => "Ctrl",
                ChordModifier::Alt => "Alt",
                ChordModifier::Shift => "Shift",
                ChordModifier::Super => "Cmd",
            };
            write!(f, "{name}+")?;
        }
        write!(f, "{}", self.key.to_ascii_uppercase())
    }
}

/// Parse a combination such as `Ctrl+Shift+R` into an OS hotkey
///
/// Tokens are `+`-separated and case-insensitive. `CommandOrControl` maps to
/// Cmd on macOS and Ctrl elsewhere.
///
/// # Errors
/// Returns error for empty strings, unknown keys, or not exactly one key
pub fn parse_combination(combination: &str) -> Result<HotKey, ChordError> {
    let tokens: Vec<&str> = combination
        .split('+')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return Err(ChordError::Empty);
    }

    let mut modifiers = Modifiers::empty();
    let mut code = None;
    for token in tokens {
        if let Some(modifier) = parse_modifier(token) {
            modifiers |= modifier;
            continue;
        }
        let key = parse_key(token).ok_or_else(|| ChordError::UnknownKey(token.to_owned()))?;
        if code.replace(key).is_some() {
            return Err(ChordError::MultipleKeys(combination.to_owned()));
        }
    }

    let code = code.ok_or_else(|| ChordError::MissingKey(combination.to_owned()))?;
    Ok(HotKey::new(Some(modifiers), code))
}

/// Whether two combination strings name the same chord
///
/// Falls back to a case-insensitive string comparison when either side does
/// not parse.
#[must_use]
pub fn same_combination(a: &str, b: &str) -> bool {
    match (parse_combination(a), parse_combination(b)) {
        (Ok(left), Ok(right)) => left.id() == right.id(),
        _ => a.trim().eq_ignore_ascii_case(b.trim()),
    }
}

fn parse_modifier(token: &str) -> Option<Modifiers> {
    match token.to_ascii_lowercase().as_str() {
        "control" | "ctrl" => Some(Modifiers::CONTROL),
        "option" | "alt" => Some(Modifiers::ALT),
        "shift" => Some(Modifiers::SHIFT),
        "command" | "cmd" | "super" | "meta" | "win" => Some(Modifiers::SUPER),
        "commandorcontrol" | "cmdorctrl" => Some(primary_modifiers()),
        _ => None,
    }
}

#[cfg(target_os = "macos")]
const fn primary_modifiers() -> Modifiers {
    Modifiers::SUPER
}

#[cfg(not(target_os = "macos"))]
const fn primary_modifiers() -> Modifiers {
    Modifiers::CONTROL
}

fn parse_key(token: &str) -> Option<Code> {
    let upper = token.to_ascii_uppercase();
    let code = match upper.as_str() {
        "A" => Code::KeyA,
        "B" => Code::KeyB,
        "C" => Code::KeyC,
        "D" => Code::KeyD,
        "E" => Code::KeyE,
        "F" => Code::KeyF,
        "G" => Code::KeyG,
        "H" => Code::KeyH,
        "I" => Code::KeyI,
        "J" => Code::KeyJ,
        "K" => Code::KeyK,
        "L" => Code::KeyL,
        "M" => Code::KeyM,
        "N" => Code::KeyN,
        "O" => Code::KeyO,
        "P" => Code::KeyP,
        "Q" => Code::KeyQ,
        "R" => Code::KeyR,
        "S" => Code::KeyS,
        "T" => Code::KeyT,
        "U" => Code::KeyU,
        "V" => Code::KeyV,
        "W" => Code::KeyW,
        "X" => Code::KeyX,
        "Y" => Code::KeyY,
        "Z" => Code::KeyZ,
        "0" => Code::Digit0,
        "1" => Code::Digit1,
        "2" => Code::Digit2,
        "3" => Code::Digit3,
        "4" => Code::Digit4,
        "5" => Code::Digit5,
        "6" => Code::Digit6,
        "7" => Code::Digit7,
        "8" => Code::Digit8,
        "9" => Code::Digit9,
        "F1" => Code::F1,
        "F2" => Code::F2,
        "F3" => Code::F3,
        "F4" => Code::F4,
        "F5" => Code::F5,
        "F6" => Code::F6,
        "F7" => Code::F7,
        "F8" => Code::F8,
        "F9" => Code::F9,
        "F10" => Code::F10,
        "F11" => Code::F11,
        "F12" => Code::F12,
        "SPACE" => Code::Space,
        "ENTER" | "RETURN" => Code::Enter,
        "TAB" => Code::Tab,
        "ESC" | "ESCAPE" => Code::Escape,
        "UP" | "ARROWUP" => Code::ArrowUp,
        "DOWN" | "ARROWDOWN" => Code::ArrowDown,
        "LEFT" | "ARROWLEFT" => Code::ArrowLeft,
        "RIGHT" | "ARROWRIGHT" => Code::ArrowRight,
        "BACKSPACE" => Code::Backspace,
        "DELETE" | "DEL" => Code::Delete,
        "INSERT" | "INS" => Code::Insert,
        "HOME" => Code::Home,
        "END" => Code::End,
        "PAGEUP" => Code::PageUp,
        "PAGEDOWN" => Code::PageDown,
        // `+` itself is the separator
        "PLUS" => Code::Equal,
        "," => Code::Comma,
        "." => Code::Period,
        "/" => Code::Slash,
        ";" => Code::Semicolon,
        "'" => Code::Quote,
        "[" => Code::BracketLeft,
        "]" => Code::BracketRight,
        "-" => Code::Minus,
        "=" => Code::Equal,
        "`" => Code::Backquote,
        "\\" => Code::Backslash,
        _ => return None,
    };
    Some(code)
}
