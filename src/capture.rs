//! Selection capture: inject "copy", then wait for the clipboard to change.

use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::input::chord::KeyChord;
use crate::input::clipboard::{generate_text_preview, Clipboard, ClipboardError};
use crate::input::inject::{InjectionError, KeyInjector};

/// Polling parameters for [`capture_selection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Time between clipboard reads
    pub poll_interval: Duration,
    /// Give up after this long without a change
    pub timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(25),
            timeout: Duration::from_millis(1000),
        }
    }
}

impl From<&crate::config::CaptureConfig> for CaptureSettings {
    fn from(config: &crate::config::CaptureConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
        }
    }
}

/// Result of a bounded poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// Value differed from the baseline
    Changed(T),
    /// Deadline passed; last value read
    TimedOut(T),
}

/// Read `read` until its value differs from `baseline` or `timeout` elapses
///
/// The first read happens immediately; later reads are `interval` apart,
/// with the final wait clipped to the deadline.
///
/// # Errors
/// Propagates the first error returned by `read`
pub async fn poll_until_changed<T, E, F>(
    mut read: F,
    baseline: &T,
    interval: Duration,
    timeout: Duration,
) -> Result<PollOutcome<T>, E>
where
    T: PartialEq,
    F: FnMut() -> Result<T, E>,
{
    let deadline = Instant::now() + timeout;
    loop {
        let current = read()?;
        if current != *baseline {
            return Ok(PollOutcome::Changed(current));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(PollOutcome::TimedOut(current));
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// What selection capture produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The copy landed: fresh selection text
    Changed(String),
    /// Nothing changed before the deadline; treat as "no selection"
    Unchanged(String),
    /// No key injection available; existing clipboard text is used as-is
    Degraded(String),
}

impl Selection {
    /// Text to rephrase, or `None` when there is nothing to do
    #[must_use]
    pub fn usable_text(&self) -> Option<&str> {
        match self {
            Self::Changed(text) | Self::Degraded(text) if !text.trim().is_empty() => Some(text.as_str()),
            _ => None,
        }
    }
}

/// Capture failures that abort the firing
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Clipboard could not be read
    #[error(transparent)]
    Clipboard(#[from] ClipboardError),

    /// Copy chord could not be delivered
    #[error(transparent)]
    Injection(InjectionError),
}

/// Copy the focused application's selection and wait for it on the clipboard
///
/// `on_unsupported` runs when the platform cannot inject keys; capture then
/// returns [`Selection::Degraded`] with the current clipboard text.
///
/// # Errors
/// Returns error if the clipboard fails or injection fails for a reason
/// other than being unsupported
pub async fn capture_selection<C, K, U>(
    clipboard: &C,
    injector: &K,
    settings: CaptureSettings,
    on_unsupported: U,
) -> Result<Selection, CaptureError>
where
    C: Clipboard + ?Sized,
    K: KeyInjector + ?Sized,
    U: FnOnce(&InjectionError),
{
    let previous = clipboard.read_text()?;
    let started = Instant::now();

    match injector.simulate_chord(&KeyChord::copy()) {
        Ok(()) => {}
        Err(e @ InjectionError::Unsupported(_)) => {
            on_unsupported(&e);
            return Ok(Selection::Degraded(previous));
        }
        Err(e) => return Err(CaptureError::Injection(e)),
    }

    let outcome = poll_until_changed(
        || clipboard.read_text(),
        &previous,
        settings.poll_interval,
        settings.timeout,
    )
    .await?;

    let elapsed_ms = started.elapsed().as_millis();
    match outcome {
        PollOutcome::Changed(text) => {
            info!(
                elapsed_ms,
                text_len = text.len(),
                text_preview = %generate_text_preview(&text),
                "selection captured"
            );
            Ok(Selection::Changed(text))
        }
        PollOutcome::TimedOut(text) => {
            debug!(elapsed_ms, "clipboard unchanged before deadline");
            Ok(Selection::Unchanged(text))
        }
    }
}

/// Logs a degraded-capture warning the first time it is called
#[derive(Debug, Default)]
pub struct UnsupportedNotice {
    warned: std::sync::atomic::AtomicBool,
}

impl UnsupportedNotice {
    /// Log `error` once per process lifetime of this notice
    pub fn report(&self, error: &InjectionError) {
        use std::sync::atomic::Ordering;
        if !self.warned.swap(true, Ordering::Relaxed) {
            warn!(error = %error, "key injection unavailable, using existing clipboard text");
        } else {
            debug!("key injection unavailable (degraded capture)");
        }
    }

    /// Whether the warning has been emitted
    #[must_use]
    pub fn has_warned(&self) -> bool {
        self.warned.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::clipboard::MockClipboard;
    use crate::input::inject::MockKeyInjector;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Clipboard whose text flips to `after` once `changes_at` passes
    struct DelayedClipboard {
        before: String,
        after: String,
        changes_at: Instant,
        writes: Mutex<Vec<String>>,
    }

    impl DelayedClipboard {
        fn new(before: &str, after: &str, delay: Duration) -> Self {
            Self {
                before: before.to_owned(),
                after: after.to_owned(),
                changes_at: Instant::now() + delay,
                writes: Mutex::new(Vec::new()),
            }
        }
    }

    impl Clipboard for DelayedClipboard {
        fn read_text(&self) -> Result<String, ClipboardError> {
            if Instant::now() >= self.changes_at {
                Ok(self.after.clone())
            } else {
                Ok(self.before.clone())
            }
        }

        fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
            self.writes.lock().unwrap().push(text.to_owned());
            Ok(())
        }
    }

    fn injector_ok() -> MockKeyInjector {
        let mut injector = MockKeyInjector::new();
        injector
            .expect_simulate_chord()
            .withf(|chord| *chord == KeyChord::copy())
            .times(1)
            .returning(|_| Ok(()));
        injector
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_returns_as_soon_as_clipboard_changes() {
        let clipboard = DelayedClipboard::new("old", "new", Duration::from_millis(200));
        let settings = CaptureSettings {
            poll_interval: Duration::from_millis(25),
            timeout: Duration::from_millis(1000),
        };

        let started = Instant::now();
        let selection = capture_selection(&clipboard, &injector_ok(), settings, |_| {})
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(selection, Selection::Changed("new".to_owned()));
        assert!(elapsed >= Duration::from_millis(200), "returned too early: {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(250), "waited too long: {elapsed:?}");
        assert!(clipboard.writes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_times_out_with_unchanged_value() {
        let clipboard = DelayedClipboard::new("old", "new", Duration::from_secs(60));
        let settings = CaptureSettings {
            poll_interval: Duration::from_millis(30),
            timeout: Duration::from_millis(1000),
        };

        let started = Instant::now();
        let selection = capture_selection(&clipboard, &injector_ok(), settings, |_| {})
            .await
            .unwrap();

        assert_eq!(selection, Selection::Unchanged("old".to_owned()));
        assert_eq!(selection.usable_text(), None);
        // last sleep is clipped to the deadline
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1000), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1030), "overshot deadline: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_degrades_when_injection_unsupported() {
        let clipboard = DelayedClipboard::new("already copied", "never", Duration::from_secs(60));
        let mut injector = MockKeyInjector::new();
        injector
            .expect_simulate_chord()
            .times(1)
            .returning(|_| Err(InjectionError::Unsupported("no backend".to_owned())));

        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let started = Instant::now();
        let selection = capture_selection(&clipboard, &injector, CaptureSettings::default(), |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        assert_eq!(selection, Selection::Degraded("already copied".to_owned()));
        assert_eq!(selection.usable_text(), Some("already copied"));
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_propagates_other_injection_errors() {
        let clipboard = DelayedClipboard::new("old", "new", Duration::ZERO);
        let mut injector = MockKeyInjector::new();
        injector
            .expect_simulate_chord()
            .returning(|_| Err(InjectionError::EventCreation));

        let result = capture_selection(&clipboard, &injector, CaptureSettings::default(), |_| {}).await;
        assert!(matches!(result, Err(CaptureError::Injection(InjectionError::EventCreation))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_propagates_clipboard_read_error() {
        let mut clipboard = MockClipboard::new();
        clipboard
            .expect_read_text()
            .returning(|| Err(ClipboardError::Read("locked".to_owned())));
        let mut injector = MockKeyInjector::new();
        injector.expect_simulate_chord().times(0);

        let result = capture_selection(&clipboard, &injector, CaptureSettings::default(), |_| {}).await;
        assert!(matches!(result, Err(CaptureError::Clipboard(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_reads_immediately_when_already_changed() {
        let reads = AtomicUsize::new(0);
        let outcome = poll_until_changed(
            || {
                reads.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(2)
            },
            &1,
            Duration::from_millis(10),
            Duration::from_millis(100),
        )
        .await
        .unwrap();
        assert_eq!(outcome, PollOutcome::Changed(2));
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_usable_text_rejects_whitespace() {
        assert_eq!(Selection::Changed("  \n".to_owned()).usable_text(), None);
        assert_eq!(Selection::Degraded(String::new()).usable_text(), None);
        assert_eq!(Selection::Changed("hi".to_owned()).usable_text(), Some("hi"));
    }

    #[test]
    fn test_unsupported_notice_warns_once() {
        let notice = UnsupportedNotice::default();
        assert!(!notice.has_warned());
        notice.report(&InjectionError::Unsupported("x".to_owned()));
        notice.report(&InjectionError::Unsupported("x".to_owned()));
        assert!(notice.has_warned());
    }
}
