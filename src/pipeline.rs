//! One hotkey firing: capture the selection, rephrase it, paste it back.

use std::future::Future;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::capture::{capture_selection, CaptureSettings, Selection, UnsupportedNotice};
use crate::input::chord::KeyChord;
use crate::input::clipboard::{generate_text_preview, Clipboard, ClipboardError};
use crate::input::inject::{InjectionError, KeyInjector};
use crate::rephrase::{FailureKind, Generator, RephraseInvoker};
use crate::store::{HotkeyBinding, ProfileSource};

/// How a firing ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Store could not be read
    StoreUnavailable,
    /// Binding points at a profile that no longer exists
    NoProfile,
    /// Clipboard did not change, or held only whitespace
    NoSelection,
    /// Clipboard or copy injection failed
    CaptureFailed,
    /// Rephrasing failed; clipboard untouched
    RephraseFailed(FailureKind),
    /// Result written to the clipboard; this platform cannot send the paste chord
    LeftOnClipboard {
        /// Model that produced the text
        model: String,
    },
    /// Clipboard write or paste injection failed
    PasteFailed,
    /// Result pasted into the focused application
    Pasted {
        /// Model that produced the text
        model: String,
        /// Models that failed first
        fallbacks: usize,
    },
}

/// Paste-back failures
#[derive(Debug, Error)]
pub enum PasteError {
    /// Result could not be placed on the clipboard
    #[error(transparent)]
    Clipboard(#[from] ClipboardError),

    /// Paste chord could not be delivered
    #[error(transparent)]
    Injection(#[from] InjectionError),
}

/// Write `text` to the clipboard and inject the paste chord
///
/// Empty text is skipped entirely; returns whether anything was pasted.
///
/// # Errors
/// Returns error if the clipboard write or the paste injection fails
pub fn paste_back<C, K>(clipboard: &C, injector: &K, text: &str) -> Result<bool, PasteError>
where
    C: Clipboard + ?Sized,
    K: KeyInjector + ?Sized,
{
    if text.is_empty() {
        debug!("empty result, skipping paste-back");
        return Ok(false);
    }
    clipboard.write_text(text)?;
    injector.simulate_chord(&KeyChord::paste())?;
    Ok(true)
}

/// Something the dispatcher can run once per firing
pub trait Cycle: Send + Sync {
    /// Run one firing of `binding` to completion
    fn run_cycle(&self, binding: &HotkeyBinding) -> impl Future<Output = CycleOutcome> + Send;
}

/// Capture, rephrase and paste wired to concrete seams
pub struct RephrasePipeline<S, C, K, G> {
    source: S,
    clipboard: C,
    injector: K,
    invoker: RephraseInvoker<G>,
    capture: CaptureSettings,
    notice: UnsupportedNotice,
}

impl<S, C, K, G> RephrasePipeline<S, C, K, G>
where
    S: ProfileSource,
    C: Clipboard,
    K: KeyInjector,
    G: Generator,
{
    /// Assemble a pipeline
    pub fn new(
        source: S,
        clipboard: C,
        injector: K,
        invoker: RephraseInvoker<G>,
        capture: CaptureSettings,
    ) -> Self {
        Self {
            source,
            clipboard,
            injector,
            invoker,
            capture,
            notice: UnsupportedNotice::default(),
        }
    }

    /// Run one firing; never fails, every problem is logged and reported
    pub async fn run(&self, binding: &HotkeyBinding) -> CycleOutcome {
        // Fresh snapshot so settings edits apply to the next keypress
        let store = match self.source.snapshot() {
            Ok(store) => store,
            Err(e) => {
                error!(error = %e, "failed to read profile store");
                return CycleOutcome::StoreUnavailable;
            }
        };
        let Some(profile) = store.profile(&binding.profile_id) else {
            warn!(
                combination = %binding.combination,
                profile_id = %binding.profile_id,
                "binding references missing profile (ignored)"
            );
            return CycleOutcome::NoProfile;
        };

        let selection = match capture_selection(
            &self.clipboard,
            &self.injector,
            self.capture,
            |e| self.notice.report(e),
        )
        .await
        {
            Ok(selection) => selection,
            Err(e) => {
                error!(error = %e, "selection capture failed");
                return CycleOutcome::CaptureFailed;
            }
        };
        let Some(text) = selection.usable_text() else {
            if matches!(selection, Selection::Unchanged(_)) {
                debug!("clipboard unchanged, nothing selected");
            } else {
                debug!("selection is empty");
            }
            return CycleOutcome::NoSelection;
        };

        let api_key = store.api_key(profile.provider).unwrap_or_default();
        let rephrasing = match self.invoker.invoke(text, profile, api_key).await {
            Ok(rephrasing) => rephrasing,
            Err(e) => {
                error!(
                    profile = %profile.name,
                    error = %e,
                    user_message = %e.user_message(),
                    "rephrase failed"
                );
                return CycleOutcome::RephraseFailed(e.kind());
            }
        };

        match paste_back(&self.clipboard, &self.injector, &rephrasing.text) {
            Ok(true) => {
                info!(
                    profile = %profile.name,
                    model = %rephrasing.model,
                    text_preview = %generate_text_preview(&rephrasing.text),
                    "rephrased text pasted"
                );
                CycleOutcome::Pasted {
                    model: rephrasing.model,
                    fallbacks: rephrasing.failures.len(),
                }
            }
            Ok(false) => CycleOutcome::NoSelection,
            Err(PasteError::Injection(e @ InjectionError::Unsupported(_))) => {
                self.notice.report(&e);
                info!(model = %rephrasing.model, "rephrased text left on clipboard");
                CycleOutcome::LeftOnClipboard {
                    model: rephrasing.model,
                }
            }
            Err(PasteError::Injection(e)) => {
                error!(
                    model = %rephrasing.model,
                    error = %e,
                    "failed to paste rephrased text, result left on clipboard"
                );
                CycleOutcome::PasteFailed
            }
            Err(PasteError::Clipboard(e)) => {
                error!(error = %e, "failed to write result to clipboard");
                CycleOutcome::PasteFailed
            }
        }
    }
}

impl<S, C, K, G> Cycle for RephrasePipeline<S, C, K, G>
where
    S: ProfileSource,
    C: Clipboard,
    K: KeyInjector,
    G: Generator,
{
    fn run_cycle(&self, binding: &HotkeyBinding) -> impl Future<Output = CycleOutcome> + Send {
        self.run(binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::inject::MockKeyInjector;
    use crate::rephrase::{FallbackLadders, GenerationError, GenerationRequest};
    use crate::store::{Profile, ProfileStore, Provider};
    use mockall::Sequence;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Clipboard replaying scripted reads (last value repeats) and recording writes
    struct ScriptedClipboard {
        reads: Mutex<VecDeque<String>>,
        writes: Mutex<Vec<String>>,
    }

    impl ScriptedClipboard {
        fn new(reads: &[&str]) -> Self {
            Self {
                reads: Mutex::new(reads.iter().map(|r| (*r).to_owned()).collect()),
                writes: Mutex::new(Vec::new()),
            }
        }

        fn writes(&self) -> Vec<String> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl Clipboard for ScriptedClipboard {
        fn read_text(&self) -> Result<String, ClipboardError> {
            let mut reads = self.reads.lock().unwrap();
            if reads.len() > 1 {
                Ok(reads.pop_front().unwrap_or_default())
            } else {
                Ok(reads.front().cloned().unwrap_or_default())
            }
        }

        fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
            self.writes.lock().unwrap().push(text.to_owned());
            Ok(())
        }
    }

    /// Replies with `reply` for every model, or fails every call when `None`
    struct StubGenerator {
        reply: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl StubGenerator {
        const fn new(reply: Option<&'static str>) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Generator for &StubGenerator {
        async fn generate(&self, _request: GenerationRequest<'_>) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .map(str::to_owned)
                .ok_or_else(|| GenerationError::Status {
                    status: 500,
                    message: "internal error".to_owned(),
                })
        }
    }

    fn store(api_key: &str) -> ProfileStore {
        let mut store = ProfileStore::default();
        store.profiles.push(Profile {
            id: "formal".to_owned(),
            name: "Formal".to_owned(),
            prompt: "Rewrite formally".to_owned(),
            provider: Provider::Anthropic,
            model: "claude-3-haiku-20240307".to_owned(),
        });
        store.set_api_key(Provider::Anthropic, api_key);
        store
    }

    fn binding(profile_id: &str) -> HotkeyBinding {
        HotkeyBinding {
            id: "b1".to_owned(),
            profile_id: profile_id.to_owned(),
            combination: "Ctrl+Shift+R".to_owned(),
            label: "Formal".to_owned(),
        }
    }

    fn pipeline<'g>(
        store: ProfileStore,
        clipboard: ScriptedClipboard,
        injector: MockKeyInjector,
        generator: &'g StubGenerator,
    ) -> RephrasePipeline<ProfileStore, ScriptedClipboard, MockKeyInjector, &'g StubGenerator> {
        let invoker =
            RephraseInvoker::new(generator, FallbackLadders::default(), Duration::from_secs(30));
        RephrasePipeline::new(store, clipboard, injector, invoker, CaptureSettings::default())
    }

    fn expect_copy_only() -> MockKeyInjector {
        let mut injector = MockKeyInjector::new();
        injector
            .expect_simulate_chord()
            .withf(|chord| *chord == KeyChord::copy())
            .times(1)
            .returning(|_| Ok(()));
        injector
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_pastes_rephrased_text() {
        let generator = StubGenerator::new(Some("Good afternoon."));
        let mut injector = MockKeyInjector::new();
        let mut seq = Sequence::new();
        injector
            .expect_simulate_chord()
            .withf(|chord| *chord == KeyChord::copy())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        injector
            .expect_simulate_chord()
            .withf(|chord| *chord == KeyChord::paste())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let clipboard = ScriptedClipboard::new(&["previous", "hey there"]);
        let pipeline = pipeline(store("sk-test"), clipboard, injector, &generator);

        let outcome = pipeline.run(&binding("formal")).await;

        assert_eq!(
            outcome,
            CycleOutcome::Pasted {
                model: "claude-3-haiku-20240307".to_owned(),
                fallbacks: 0
            }
        );
        assert_eq!(pipeline.clipboard.writes(), vec!["Good afternoon.".to_owned()]);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_selection_never_generates_or_writes() {
        let generator = StubGenerator::new(Some("unused"));
        let clipboard = ScriptedClipboard::new(&[""]);
        let pipeline = pipeline(store("sk-test"), clipboard, expect_copy_only(), &generator);

        let outcome = pipeline.run(&binding("formal")).await;

        assert_eq!(outcome, CycleOutcome::NoSelection);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert!(pipeline.clipboard.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_whitespace_selection_is_no_selection() {
        let generator = StubGenerator::new(Some("unused"));
        let clipboard = ScriptedClipboard::new(&["old", "  \n"]);
        let pipeline = pipeline(store("sk-test"), clipboard, expect_copy_only(), &generator);

        assert_eq!(pipeline.run(&binding("formal")).await, CycleOutcome::NoSelection);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert!(pipeline.clipboard.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_models_failing_leaves_clipboard_alone() {
        let generator = StubGenerator::new(None);
        let clipboard = ScriptedClipboard::new(&["old", "hey there"]);
        let pipeline = pipeline(store("sk-test"), clipboard, expect_copy_only(), &generator);

        let outcome = pipeline.run(&binding("formal")).await;

        assert_eq!(outcome, CycleOutcome::RephraseFailed(FailureKind::Generic));
        // one call per ladder rung
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
        assert!(pipeline.clipboard.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_api_key_fails_without_generating() {
        let generator = StubGenerator::new(Some("unused"));
        let clipboard = ScriptedClipboard::new(&["old", "hey there"]);
        let pipeline = pipeline(store("  "), clipboard, expect_copy_only(), &generator);

        let outcome = pipeline.run(&binding("formal")).await;

        assert_eq!(outcome, CycleOutcome::RephraseFailed(FailureKind::InvalidApiKey));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert!(pipeline.clipboard.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_profile_is_a_no_op() {
        let generator = StubGenerator::new(Some("unused"));
        let mut injector = MockKeyInjector::new();
        injector.expect_simulate_chord().times(0);
        let clipboard = ScriptedClipboard::new(&["old"]);
        let pipeline = pipeline(store("sk-test"), clipboard, injector, &generator);

        assert_eq!(pipeline.run(&binding("deleted")).await, CycleOutcome::NoProfile);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_injection_uses_clipboard_and_leaves_result() {
        let generator = StubGenerator::new(Some("Rephrased."));
        let mut injector = MockKeyInjector::new();
        injector
            .expect_simulate_chord()
            .times(2)
            .returning(|_| Err(InjectionError::Unsupported("wayland".to_owned())));
        let clipboard = ScriptedClipboard::new(&["copied by hand"]);
        let pipeline = pipeline(store("sk-test"), clipboard, injector, &generator);

        let outcome = pipeline.run(&binding("formal")).await;

        assert!(matches!(outcome, CycleOutcome::LeftOnClipboard { .. }));
        assert_eq!(pipeline.clipboard.writes(), vec!["Rephrased.".to_owned()]);
        assert!(pipeline.notice.has_warned());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paste_backend_failure_is_not_reported_as_unsupported() {
        let generator = StubGenerator::new(Some("Rephrased."));
        let mut injector = MockKeyInjector::new();
        injector
            .expect_simulate_chord()
            .withf(|chord| *chord == KeyChord::copy())
            .times(1)
            .returning(|_| Ok(()));
        injector
            .expect_simulate_chord()
            .withf(|chord| *chord == KeyChord::paste())
            .times(1)
            .returning(|_| Err(InjectionError::Backend("xdo: BadWindow".to_owned())));
        let clipboard = ScriptedClipboard::new(&["old", "hey there"]);
        let pipeline = pipeline(store("sk-test"), clipboard, injector, &generator);

        let outcome = pipeline.run(&binding("formal")).await;

        assert_eq!(outcome, CycleOutcome::PasteFailed);
        assert_eq!(pipeline.clipboard.writes(), vec!["Rephrased.".to_owned()]);
        // the once-only degraded notice stays available
        assert!(!pipeline.notice.has_warned());
    }

    #[test]
    fn test_paste_back_skips_empty_text() {
        let clipboard = ScriptedClipboard::new(&["keep"]);
        let mut injector = MockKeyInjector::new();
        injector.expect_simulate_chord().times(0);

        assert!(!paste_back(&clipboard, &injector, "").unwrap());
        assert!(clipboard.writes().is_empty());
    }

    #[test]
    fn test_paste_back_writes_then_pastes() {
        let clipboard = ScriptedClipboard::new(&["keep"]);
        let mut injector = MockKeyInjector::new();
        injector
            .expect_simulate_chord()
            .withf(|chord| *chord == KeyChord::paste())
            .times(1)
            .returning(|_| Ok(()));

        assert!(paste_back(&clipboard, &injector, "done").unwrap());
        assert_eq!(clipboard.writes(), vec!["done".to_owned()]);
    }
}
