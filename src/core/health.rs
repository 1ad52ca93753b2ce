//! Post-unseal readiness gate.
//!
//! A freshly unsealed engine spends a warm-up period answering requests
//! with transient errors. The gate polls health on a short fixed interval
//! from a background thread and signals a one-shot event once the engine
//! answers as fully ready; the main flow blocks on that signal. There is no
//! overall deadline: an engine that never becomes healthy stalls the
//! bootstrap until cancellation.

use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::cancel::CancelToken;
use crate::core::client::EngineApi;
use crate::core::state::EngineState;
use crate::error::{Error, Result};

pub struct HealthGate {
    interval: Duration,
}

impl HealthGate {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Block until the engine answers health probes as `Unsealed`.
    pub fn wait_until_ready<A: EngineApi>(&self, api: &A, cancel: &CancelToken) -> Result<()> {
        debug!("waiting for engine to accept requests");

        let (tx, rx) = mpsc::channel();
        std::thread::scope(|s| {
            s.spawn(move || loop {
                if EngineState::classify(api.health()) == EngineState::Unsealed {
                    let _ = tx.send(Ok(()));
                    return;
                }
                debug!("engine not ready yet");
                if cancel.sleep(self.interval) {
                    let _ = tx.send(Err(Error::Cancelled));
                    return;
                }
            });

            rx.recv().unwrap_or(Err(Error::Cancelled))
        })?;

        info!("engine is ready to accept requests");
        Ok(())
    }
}
