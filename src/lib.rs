//! Rephrase Hotkey - select text, press a shortcut, get it rewritten in place
//!
//! This library exports core modules for testing and reuse by the daemon binary.

/// Selection capture via injected copy + clipboard polling
pub mod capture;
/// Configuration management
pub mod config;
/// Per-firing task dispatch
pub mod dispatch;
/// Input handling (hotkeys, clipboard, key injection)
pub mod input;
/// Config sync channel for the settings UI
pub mod ipc;
/// macOS permission checks
pub mod permissions;
/// Capture, rephrase, paste-back cycle
pub mod pipeline;
/// Prompt composition, model fallback and provider clients
pub mod rephrase;
/// Profiles, API keys and hotkey bindings
pub mod store;
/// Logging and panic reporting
pub mod telemetry;
