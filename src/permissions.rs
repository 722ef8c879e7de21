use anyhow::Result;

/// Check that synthetic key events can be posted (for copy/paste injection)
///
/// # Errors
/// Returns error if Accessibility / Input Monitoring access is missing (macOS only)
pub fn check_key_injection_permission() -> Result<()> {
    tracing::info!("checking key injection permission");

    #[cfg(target_os = "macos")]
    {
        use core_graphics::event::CGEvent;
        use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};

        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState).map_err(|()| {
            anyhow::anyhow!(
                "Accessibility permission denied\n\n\
                Enable in: System Settings → Privacy & Security → Accessibility\n\
                Add and enable this app, then restart.\n"
            )
        })?;

        CGEvent::new_keyboard_event(source, 0, true).map_err(|()| {
            anyhow::anyhow!(
                "Failed to create CGEvent - Input Monitoring may be restricted\n\n\
                Enable in: System Settings → Privacy & Security → Input Monitoring\n"
            )
        })?;

        tracing::info!("key injection permission granted");
    }

    Ok(())
}

/// Run startup permission checks
///
/// Missing permissions do not stop the daemon; copy/paste injection then
/// fails per firing and the clipboard is used as-is.
pub fn check_all() -> bool {
    match check_key_injection_permission() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "key injection unavailable, running degraded");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_os = "macos"))]
    fn test_check_passes_off_macos() {
        assert!(check_key_injection_permission().is_ok());
        assert!(check_all());
    }

    #[test]
    #[cfg(target_os = "macos")]
    #[ignore = "requires Accessibility permission on macOS"]
    fn test_check_key_injection_permission() {
        assert!(check_key_injection_permission().is_ok());
    }
}
