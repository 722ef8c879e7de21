//! Turns resolved hotkey firings into independent pipeline tasks.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::input::hotkey::InFlight;
use crate::pipeline::Cycle;
use crate::store::HotkeyBinding;

/// Spawns one task per firing, at most one in flight per combination
pub struct HotkeyDispatcher<P> {
    pipeline: Arc<P>,
    in_flight: InFlight,
}

impl<P: Cycle + 'static> HotkeyDispatcher<P> {
    /// Dispatcher running `pipeline` for every firing
    pub fn new(pipeline: P) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            in_flight: InFlight::default(),
        }
    }

    /// Combinations currently running
    pub const fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Start a run for `binding`; `None` if one is already in flight for it
    ///
    /// The returned handle finishes after the run does. A panic inside the
    /// run is logged there and never reaches the caller.
    pub fn fire(&self, binding: HotkeyBinding) -> Option<JoinHandle<()>> {
        let guard = self.in_flight.try_begin(&binding.combination)?;
        let pipeline = Arc::clone(&self.pipeline);
        let combination = binding.combination.clone();

        let run = tokio::spawn(async move {
            // released on completion or unwind
            let _guard = guard;
            let outcome = pipeline.run_cycle(&binding).await;
            debug!(combination = %binding.combination, outcome = ?outcome, "hotkey cycle finished");
        });

        Some(tokio::spawn(async move {
            if let Err(e) = run.await {
                if e.is_panic() {
                    error!(combination = %combination, "hotkey cycle panicked");
                } else {
                    debug!(combination = %combination, "hotkey cycle cancelled");
                }
            }
        }))
    }
}
