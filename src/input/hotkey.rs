use anyhow::Context;
use global_hotkey::{hotkey::HotKey, GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, error, info};

use super::chord::{self, ChordError};
use crate::store::HotkeyBinding;

/// Why a combination could not be made live
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Combination string did not parse
    #[error(transparent)]
    InvalidCombination(#[from] ChordError),

    /// Another binding in the same list already holds this chord
    #[error("combination already bound in this list")]
    DuplicateInList,

    /// The OS refused (usually claimed by another process)
    #[error("OS rejected hotkey: {0}")]
    Rejected(String),
}

/// OS-level hotkey registration
pub trait HotkeyBackend {
    /// Make `hotkey` live
    ///
    /// # Errors
    /// Returns error if the OS refuses the registration
    fn register(&self, hotkey: HotKey) -> Result<(), RegistrationError>;

    /// Remove a live hotkey
    ///
    /// # Errors
    /// Returns error if the OS refuses the removal
    fn unregister(&self, hotkey: HotKey) -> Result<(), RegistrationError>;
}

impl HotkeyBackend for GlobalHotKeyManager {
    fn register(&self, hotkey: HotKey) -> Result<(), RegistrationError> {
        Self::register(self, hotkey).map_err(|e| RegistrationError::Rejected(e.to_string()))
    }

    fn unregister(&self, hotkey: HotKey) -> Result<(), RegistrationError> {
        Self::unregister(self, hotkey).map_err(|e| RegistrationError::Rejected(e.to_string()))
    }
}

/// A combination that was rejected during `set_bindings`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedBinding {
    /// Combination string as given
    pub combination: String,
    /// Human-readable reason
    pub reason: String,
}

/// Outcome of replacing the binding set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrationReport {
    /// Combinations now live
    pub registered: Vec<String>,
    /// Combinations skipped, with reasons
    pub rejected: Vec<RejectedBinding>,
}

struct ActiveBinding {
    hotkey: HotKey,
    binding: HotkeyBinding,
}

/// Process-wide table of live hotkeys, rebuilt in full on every change
pub struct HotkeyRegistry<B: HotkeyBackend = GlobalHotKeyManager> {
    backend: B,
    bindings: Vec<HotkeyBinding>,
    active: HashMap<u32, ActiveBinding>,
}

impl HotkeyRegistry<GlobalHotKeyManager> {
    /// Registry backed by the OS hotkey manager
    ///
    /// # Errors
    /// Returns error if the platform hotkey manager cannot be created
    pub fn system() -> anyhow::Result<Self> {
        let manager = GlobalHotKeyManager::new().context("failed to create hotkey manager")?;
        Ok(Self::new(manager))
    }
}

impl<B: HotkeyBackend> HotkeyRegistry<B> {
    /// Empty registry over `backend`
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            bindings: Vec::new(),
            active: HashMap::new(),
        }
    }

    /// Replace the whole binding set
    ///
    /// Every live hotkey is unregistered before any new one is registered.
    /// Bindings that fail to parse, repeat a chord already registered from
    /// this list, or that the OS rejects are logged and skipped.
    pub fn set_bindings(&mut self, bindings: Vec<HotkeyBinding>) -> RegistrationReport {
        self.unregister_all();

        let mut report = RegistrationReport::default();
        for binding in &bindings {
            match self.register_one(binding) {
                Ok(()) => {
                    info!(
                        combination = %binding.combination,
                        profile_id = %binding.profile_id,
                        "registered hotkey"
                    );
                    report.registered.push(binding.combination.clone());
                }
                Err(e) => {
                    error!(combination = %binding.combination, error = %e, "failed to register hotkey");
                    report.rejected.push(RejectedBinding {
                        combination: binding.combination.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.bindings = bindings;
        info!(
            registered = report.registered.len(),
            rejected = report.rejected.len(),
            "hotkey set replaced"
        );
        report
    }

    /// The list last passed to [`Self::set_bindings`]
    #[must_use]
    pub fn bindings(&self) -> &[HotkeyBinding] {
        &self.bindings
    }

    /// Binding for a live OS hotkey id
    #[must_use]
    pub fn resolve(&self, hotkey_id: u32) -> Option<&HotkeyBinding> {
        self.active.get(&hotkey_id).map(|a| &a.binding)
    }

    /// Binding to fire for an OS event, `None` for releases and unknown ids
    #[must_use]
    pub fn binding_for_event(&self, event: &GlobalHotKeyEvent) -> Option<&HotkeyBinding> {
        if !matches!(event.state, HotKeyState::Pressed) {
            return None;
        }
        let binding = self.resolve(event.id);
        if binding.is_none() {
            debug!(hotkey_id = event.id, "event for unknown hotkey (ignored)");
        }
        binding
    }

    /// Number of live OS hotkeys
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.active.len()
    }

    fn register_one(&mut self, binding: &HotkeyBinding) -> Result<(), RegistrationError> {
        let hotkey = chord::parse_combination(&binding.combination)?;
        if self.active.contains_key(&hotkey.id()) {
            return Err(RegistrationError::DuplicateInList);
        }
        self.backend.register(hotkey)?;
        self.active.insert(
            hotkey.id(),
            ActiveBinding {
                hotkey,
                binding: binding.clone(),
            },
        );
        Ok(())
    }

    fn unregister_all(&mut self) {
        for (_, active) in self.active.drain() {
            if let Err(e) = self.backend.unregister(active.hotkey) {
                error!(combination = %active.binding.combination, error = %e, "failed to unregister hotkey");
            }
        }
    }
}

impl<B: HotkeyBackend> Drop for HotkeyRegistry<B> {
    fn drop(&mut self) {
        self.unregister_all();
    }
}

/// Combinations whose pipeline run is still in progress
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    running: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    /// Claim `combination`, or `None` if a run for it is already active
    #[must_use]
    pub fn try_begin(&self, combination: &str) -> Option<InFlightGuard> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(combination.to_owned()) {
            debug!(combination, "hotkey fired while previous run in flight (dropped)");
            return None;
        }
        Some(InFlightGuard {
            running: Arc::clone(&self.running),
            combination: combination.to_owned(),
        })
    }

    /// Whether a run for `combination` is active
    #[must_use]
    pub fn is_running(&self, combination: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(combination)
    }
}

/// Releases the in-flight claim on drop
#[derive(Debug)]
pub struct InFlightGuard {
    running: Arc<Mutex<HashSet<String>>>,
    combination: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.combination);
    }
}
