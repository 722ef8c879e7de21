use thiserror::Error;
use tracing::{debug, info};

use super::chord::KeyChord;

/// Key injection errors
#[derive(Debug, Error)]
pub enum InjectionError {
    /// No key-simulation mechanism on this platform or session
    #[error("key injection unsupported: {0}")]
    Unsupported(String),

    /// Failed to create `CGEvent` source
    #[error("failed to create CGEvent source")]
    EventSourceCreation,

    /// Failed to create keyboard `CGEvent`
    #[error("failed to create keyboard CGEvent")]
    EventCreation,

    /// The chord's key has no keycode mapping
    #[error("no keycode for key '{0}'")]
    UnmappedKey(char),

    /// Backend reported a failure while sending input
    #[error("key injection failed: {0}")]
    Backend(String),
}

/// Delivers key chords to the focused application
#[cfg_attr(test, mockall::automock)]
pub trait KeyInjector: Send + Sync {
    /// Press the chord's modifiers, tap its key, release the modifiers
    ///
    /// # Errors
    /// Returns [`InjectionError::Unsupported`] when the platform cannot
    /// inject keys, or a backend error if sending fails
    fn simulate_chord(&self, chord: &KeyChord) -> Result<(), InjectionError>;
}

/// Platform key injector (`CGEvent` on macOS, `enigo` elsewhere)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInjector;

#[cfg(target_os = "macos")]
mod platform {
    use core_graphics::event::{CGEvent, CGEventFlags, CGEventTapLocation, CGKeyCode};
    use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
    use tracing::{debug, error};

    use super::InjectionError;
    use crate::input::chord::{ChordModifier, KeyChord};

    // kVK_ANSI_* virtual keycodes
    const fn keycode(key: char) -> Option<CGKeyCode> {
        match key {
            'a' => Some(0x00),
            'c' => Some(0x08),
            'v' => Some(0x09),
            'x' => Some(0x07),
            'z' => Some(0x06),
            _ => None,
        }
    }

    fn flags(chord: &KeyChord) -> CGEventFlags {
        chord
            .modifiers
            .iter()
            .fold(CGEventFlags::CGEventFlagNull, |acc, m| {
                acc | match m {
                    ChordModifier::Control => CGEventFlags::CGEventFlagControl,
                    ChordModifier::Alt => CGEventFlags::CGEventFlagAlternate,
                    ChordModifier::Shift => CGEventFlags::CGEventFlagShift,
                    ChordModifier::Super => CGEventFlags::CGEventFlagCommand,
                }
            })
    }

    fn post_key(keycode: CGKeyCode, flags: CGEventFlags, keydown: bool) -> Result<(), InjectionError> {
        // Requires Accessibility / Input Monitoring (checked at startup)
        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState).map_err(|()| {
            error!("FAILED: CGEventSource creation - Accessibility permission may have been revoked");
            InjectionError::EventSourceCreation
        })?;
        let event = CGEvent::new_keyboard_event(source, keycode, keydown)
            .map_err(|()| InjectionError::EventCreation)?;
        // Explicit flags so modifiers still physically held from the
        // triggering hotkey don't leak into the chord
        event.set_flags(flags);
        event.post(CGEventTapLocation::HID);
        Ok(())
    }

    pub(super) fn send(chord: &KeyChord) -> Result<(), InjectionError> {
        let code = keycode(chord.key).ok_or(InjectionError::UnmappedKey(chord.key))?;
        let flags = flags(chord);
        debug!(keycode = code, "posting CGEvent key down/up");
        post_key(code, flags, true)?;
        post_key(code, flags, false)
    }
}

#[cfg(not(target_os = "macos"))]
mod platform {
    use enigo::{Direction, Enigo, Key, Keyboard, Settings};
    use tracing::debug;

    use super::InjectionError;
    use crate::input::chord::{ChordModifier, KeyChord};

    const fn key_for(modifier: ChordModifier) -> Key {
        match modifier {
            ChordModifier::Control => Key::Control,
            ChordModifier::Alt => Key::Alt,
            ChordModifier::Shift => Key::Shift,
            ChordModifier::Super => Key::Meta,
        }
    }

    fn backend<E: std::fmt::Display>(e: E) -> InjectionError {
        InjectionError::Backend(e.to_string())
    }

    pub(super) fn send(chord: &KeyChord) -> Result<(), InjectionError> {
        let mut enigo = Enigo::new(&Settings::default())
            .map_err(|e| InjectionError::Unsupported(e.to_string()))?;

        // The triggering hotkey's modifiers may still be held down
        for held in [Key::Shift, Key::Alt, Key::Control, Key::Meta] {
            let _ = enigo.key(held, Direction::Release);
        }

        for modifier in &chord.modifiers {
            enigo.key(key_for(*modifier), Direction::Press).map_err(backend)?;
        }
        debug!(key = %chord.key, "sending key click via enigo");
        let clicked = enigo.key(Key::Unicode(chord.key), Direction::Click);
        for modifier in chord.modifiers.iter().rev() {
            enigo.key(key_for(*modifier), Direction::Release).map_err(backend)?;
        }
        clicked.map_err(backend)
    }
}

impl KeyInjector for SystemInjector {
    fn simulate_chord(&self, chord: &KeyChord) -> Result<(), InjectionError> {
        debug!(chord = %chord, "injecting key chord");
        platform::send(chord)?;
        info!(chord = %chord, "key chord delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_error_message() {
        let err = InjectionError::Unsupported("no display".to_owned());
        assert_eq!(err.to_string(), "key injection unsupported: no display");
    }

    #[test]
    fn test_unmapped_key_message() {
        assert_eq!(
            InjectionError::UnmappedKey('q').to_string(),
            "no keycode for key 'q'"
        );
    }

    #[test]
    #[ignore = "requires Accessibility permissions and a focused text field"]
    fn test_system_injector_copy() {
        let result = SystemInjector.simulate_chord(&KeyChord::copy());
        assert!(result.is_ok());
    }
}
