//! Profiles, provider API keys and hotkey bindings.
//!
//! The settings UI owns this data; the daemon only reads it, except for the
//! first-run default it writes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::input::chord;

/// Generation providers a profile can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Gemini models
    Google,
    /// Llama models
    Meta,
    /// Claude models
    Anthropic,
}

impl Provider {
    /// All providers, in display order
    pub const ALL: [Self; 3] = [Self::Google, Self::Meta, Self::Anthropic];

    /// Lowercase provider name as used in config files
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Meta => "meta",
            Self::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named prompt + provider + model combination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Stable identifier referenced by bindings
    pub id: String,
    /// Display name
    pub name: String,
    /// Instruction prepended to the selected text
    pub prompt: String,
    /// Which generation service to call
    pub provider: Provider,
    /// Requested model (first rung of the fallback ladder)
    pub model: String,
}

/// A key combination bound to a profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotkeyBinding {
    /// Stable identifier
    pub id: String,
    /// Weak reference to a [`Profile`]
    pub profile_id: String,
    /// Key chord string, e.g. `Ctrl+Shift+R`
    pub combination: String,
    /// Display label
    #[serde(alias = "keyLabel", default)]
    pub label: String,
}

/// API key for one provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    /// User-supplied key, passed through untouched
    #[serde(default)]
    pub api_key: String,
}

/// Credentials for every provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Google AI key
    #[serde(default)]
    pub google: ProviderCredentials,
    /// Llama API key
    #[serde(default)]
    pub meta: ProviderCredentials,
    /// Anthropic key
    #[serde(default)]
    pub anthropic: ProviderCredentials,
}

impl LlmConfig {
    /// Credentials for `provider`
    #[must_use]
    pub const fn get(&self, provider: Provider) -> &ProviderCredentials {
        match provider {
            Provider::Google => &self.google,
            Provider::Meta => &self.meta,
            Provider::Anthropic => &self.anthropic,
        }
    }

    fn get_mut(&mut self, provider: Provider) -> &mut ProviderCredentials {
        match provider {
            Provider::Google => &mut self.google,
            Provider::Meta => &mut self.meta,
            Provider::Anthropic => &mut self.anthropic,
        }
    }
}

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the store file failed
    #[error("store I/O failed for {path}: {source}")]
    Io {
        /// Store file path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Store file is not valid TOML for this schema
    #[error("failed to parse store {path}: {source}")]
    Parse {
        /// Store file path
        path: PathBuf,
        /// Underlying error
        source: toml::de::Error,
    },

    /// Store could not be serialized
    #[error("failed to serialize store: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A profile with this id already exists
    #[error("profile already exists: {0}")]
    DuplicateProfile(String),

    /// No profile with this id
    #[error("unknown profile: {0}")]
    UnknownProfile(String),

    /// Another binding already uses this combination
    #[error("key combination already in use: {0}")]
    DuplicateCombination(String),

    /// Binding has no combination
    #[error("key combination is empty")]
    EmptyCombination,

    /// No binding with this id
    #[error("unknown hotkey binding: {0}")]
    UnknownBinding(String),
}

/// Result of deleting a profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedProfile {
    /// The removed profile
    pub profile: Profile,
    /// Bindings that referenced it and were removed with it
    pub removed_bindings: Vec<HotkeyBinding>,
}

/// Everything the settings UI persists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStore {
    /// Rephrasing profiles
    #[serde(default)]
    pub profiles: Vec<Profile>,
    /// Per-provider credentials
    #[serde(default)]
    pub llm: LlmConfig,
    /// Hotkey bindings
    #[serde(default)]
    pub hotkeys: Vec<HotkeyBinding>,
}

impl ProfileStore {
    /// Load the store from a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let contents = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the store, writing [`ProfileStore::sample`] first if the file is missing
    ///
    /// # Errors
    /// Returns error if the file cannot be created, read or parsed
    pub fn load_or_create(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "store not found, writing sample store");
            Self::sample().save(path)?;
        }
        Self::load(path)
    }

    /// Write the store as TOML, creating parent directories
    ///
    /// # Errors
    /// Returns error if serialization or the write fails
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).map_err(io_err)
    }

    /// First-run store: one profile bound to `Ctrl+Shift+R`, empty keys
    #[must_use]
    pub fn sample() -> Self {
        let profile = Profile {
            id: "professional".to_owned(),
            name: "Professional".to_owned(),
            prompt: "Rephrase the following text to sound clear and professional. \
                     Reply with the rephrased text only."
                .to_owned(),
            provider: Provider::Anthropic,
            model: "claude-3-5-sonnet-latest".to_owned(),
        };
        let binding = HotkeyBinding {
            id: "default-hotkey".to_owned(),
            profile_id: profile.id.clone(),
            combination: "Ctrl+Shift+R".to_owned(),
            label: "Rephrase (professional)".to_owned(),
        };
        Self {
            profiles: vec![profile],
            llm: LlmConfig::default(),
            hotkeys: vec![binding],
        }
    }

    /// Look up a profile by id
    #[must_use]
    pub fn profile(&self, id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// API key for a provider, `None` when unset or blank
    #[must_use]
    pub fn api_key(&self, provider: Provider) -> Option<&str> {
        Some(self.llm.get(provider).api_key.trim()).filter(|k| !k.is_empty())
    }

    /// Set the API key for a provider
    pub fn set_api_key(&mut self, provider: Provider, api_key: impl Into<String>) {
        self.llm.get_mut(provider).api_key = api_key.into();
    }

    /// Bindings in insertion order
    #[must_use]
    pub fn bindings(&self) -> &[HotkeyBinding] {
        &self.hotkeys
    }

    /// First binding that points at a profile
    #[must_use]
    pub fn binding_for_profile(&self, profile_id: &str) -> Option<&HotkeyBinding> {
        self.hotkeys.iter().find(|b| b.profile_id == profile_id)
    }

    /// Add a new profile
    ///
    /// # Errors
    /// Returns [`StoreError::DuplicateProfile`] if the id is taken
    pub fn add_profile(&mut self, profile: Profile) -> Result<(), StoreError> {
        if self.profile(&profile.id).is_some() {
            return Err(StoreError::DuplicateProfile(profile.id));
        }
        self.profiles.push(profile);
        Ok(())
    }

    /// Replace an existing profile with the same id
    ///
    /// # Errors
    /// Returns [`StoreError::UnknownProfile`] if no profile has that id
    pub fn update_profile(&mut self, profile: Profile) -> Result<(), StoreError> {
        let slot = self
            .profiles
            .iter_mut()
            .find(|p| p.id == profile.id)
            .ok_or_else(|| StoreError::UnknownProfile(profile.id.clone()))?;
        *slot = profile;
        Ok(())
    }

    /// Delete a profile and every binding that references it
    ///
    /// # Errors
    /// Returns [`StoreError::UnknownProfile`] if no profile has that id
    pub fn delete_profile(&mut self, id: &str) -> Result<DeletedProfile, StoreError> {
        let index = self
            .profiles
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| StoreError::UnknownProfile(id.to_owned()))?;
        let profile = self.profiles.remove(index);

        let (removed_bindings, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.hotkeys)
            .into_iter()
            .partition(|b| b.profile_id == id);
        self.hotkeys = kept;

        tracing::info!(
            profile = %profile.name,
            removed_bindings = removed_bindings.len(),
            "profile deleted"
        );

        Ok(DeletedProfile {
            profile,
            removed_bindings,
        })
    }

    /// Add a binding; its combination must not match any existing binding
    ///
    /// # Errors
    /// Returns error if the combination is empty or taken, or the profile is unknown
    pub fn add_binding(&mut self, binding: HotkeyBinding) -> Result<(), StoreError> {
        if binding.combination.trim().is_empty() {
            return Err(StoreError::EmptyCombination);
        }
        if self.profile(&binding.profile_id).is_none() {
            return Err(StoreError::UnknownProfile(binding.profile_id));
        }
        if self
            .hotkeys
            .iter()
            .any(|b| chord::same_combination(&b.combination, &binding.combination))
        {
            return Err(StoreError::DuplicateCombination(binding.combination));
        }
        self.hotkeys.push(binding);
        Ok(())
    }

    /// Remove a binding by id
    ///
    /// # Errors
    /// Returns [`StoreError::UnknownBinding`] if no binding has that id
    pub fn remove_binding(&mut self, id: &str) -> Result<HotkeyBinding, StoreError> {
        let index = self
            .hotkeys
            .iter()
            .position(|b| b.id == id)
            .ok_or_else(|| StoreError::UnknownBinding(id.to_owned()))?;
        Ok(self.hotkeys.remove(index))
    }
}

/// Read access to the store at invocation time
pub trait ProfileSource: Send + Sync {
    /// Current view of profiles, keys and bindings
    ///
    /// # Errors
    /// Returns error if the backing store cannot be read
    fn snapshot(&self) -> Result<ProfileStore, StoreError>;
}

/// Store file re-read on every snapshot so UI edits apply without restart
#[derive(Debug, Clone)]
pub struct FileProfileSource {
    path: PathBuf,
}

impl FileProfileSource {
    /// Source backed by the TOML file at `path`
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Backing file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProfileSource for FileProfileSource {
    fn snapshot(&self) -> Result<ProfileStore, StoreError> {
        ProfileStore::load(&self.path)
    }
}

impl ProfileSource for ProfileStore {
    fn snapshot(&self) -> Result<ProfileStore, StoreError> {
        Ok(self.clone())
    }
}
