/// Combination strings and injected key chords
pub mod chord;
/// System clipboard access
pub mod clipboard;
/// Hotkey registry and in-flight tracking
pub mod hotkey;
/// Synthetic key chord delivery
pub mod inject;

pub use clipboard::{Clipboard, SystemClipboard};
pub use hotkey::HotkeyRegistry;
pub use inject::{KeyInjector, SystemInjector};
