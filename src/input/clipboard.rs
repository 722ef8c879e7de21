use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;

/// Generate preview of text for logging (pure, testable)
///
/// Truncates text >50 bytes with "..." suffix. Respects UTF-8 char boundaries.
#[must_use]
pub fn generate_text_preview(text: &str) -> String {
    if text.len() > 50 {
        // Find char boundary at or before byte 47
        let mut end = 47.min(text.len());
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            return "...".to_owned();
        }
        format!("{}...", &text[..end])
    } else {
        text.to_owned()
    }
}

/// Clipboard access errors
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// Platform clipboard could not be opened
    #[error("failed to open clipboard: {0}")]
    Open(String),

    /// Reading text failed
    #[error("failed to read clipboard: {0}")]
    Read(String),

    /// Writing text failed
    #[error("failed to write clipboard: {0}")]
    Write(String),
}

/// System clipboard, text only
#[cfg_attr(test, mockall::automock)]
pub trait Clipboard: Send + Sync {
    /// Current clipboard text; empty when the clipboard holds no text
    ///
    /// # Errors
    /// Returns error if the platform clipboard cannot be read
    fn read_text(&self) -> Result<String, ClipboardError>;

    /// Replace the clipboard contents with `text`
    ///
    /// # Errors
    /// Returns error if the platform clipboard cannot be written
    fn write_text(&self, text: &str) -> Result<(), ClipboardError>;
}

/// `arboard`-backed clipboard
///
/// The handle is kept for the process lifetime; on X11 written content is
/// only served while a handle exists.
pub struct SystemClipboard {
    inner: Mutex<arboard::Clipboard>,
}

impl SystemClipboard {
    /// Open the platform clipboard
    ///
    /// # Errors
    /// Returns error if no clipboard is available (e.g. no display server)
    pub fn new() -> Result<Self, ClipboardError> {
        let inner = arboard::Clipboard::new().map_err(|e| ClipboardError::Open(e.to_string()))?;
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }
}

impl Clipboard for SystemClipboard {
    fn read_text(&self) -> Result<String, ClipboardError> {
        let mut clipboard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match clipboard.get_text() {
            Ok(text) => Ok(text),
            Err(arboard::Error::ContentNotAvailable) => {
                debug!("clipboard holds no text");
                Ok(String::new())
            }
            Err(e) => Err(ClipboardError::Read(e.to_string())),
        }
    }

    fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        let mut clipboard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        clipboard
            .set_text(text)
            .map_err(|e| ClipboardError::Write(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_text_preview_short() {
        assert_eq!(generate_text_preview("hello"), "hello");
        assert_eq!(generate_text_preview(""), "");
    }

    #[test]
    fn test_generate_text_preview_exactly_50_bytes() {
        let text_50 = "a".repeat(50);
        assert_eq!(generate_text_preview(&text_50), text_50);
    }

    #[test]
    fn test_generate_text_preview_long() {
        let text_100 = "a".repeat(100);
        let preview = generate_text_preview(&text_100);
        assert_eq!(preview.len(), 50);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_generate_text_preview_unicode_boundary() {
        let long_unicode = "👋".repeat(30);
        let preview = generate_text_preview(&long_unicode);
        assert!(preview.ends_with("..."));
        // 11 emoji (44 bytes) fit before byte 47
        assert_eq!(preview.chars().filter(|c| *c == '👋').count(), 11);
    }

    #[test]
    #[ignore = "requires a desktop session with a clipboard"]
    fn test_system_clipboard_write_then_read() {
        let clipboard = SystemClipboard::new().unwrap();
        clipboard.write_text("rephrase-hotkey test").unwrap();
        assert_eq!(clipboard.read_text().unwrap(), "rephrase-hotkey test");
    }
}
