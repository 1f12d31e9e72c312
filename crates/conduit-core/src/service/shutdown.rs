//! Graceful shutdown as a finite escalation sequence.
//!
//! The engine documents three shutdown levels. Each level is one
//! [`ShutdownStep`]: a signal and how long to wait for the process to exit
//! after sending it. The sequence stops as soon as the process is gone, so a
//! process that exits after step *k* receives exactly *k* signals. Every wait
//! also races the caller's cancellation token; a cancelled wait ends the
//! escalation with [`ConduitError::StopTimeout`].

use std::time::Duration;

use log::{debug, error, info};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::process::{ProcessHandle, StopSignal};
use crate::constants::EXIT_POLL_INTERVAL;
use crate::error::{ConduitError, Result};

/// One escalation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownStep {
    pub signal: StopSignal,
    /// Upper bound on the wait after sending `signal`
    pub wait: Duration,
}

impl ShutdownStep {
    pub const fn new(signal: StopSignal, wait: Duration) -> Self {
        Self { signal, wait }
    }
}

/// Ordered escalation applied to a single process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownSequence {
    steps: Vec<ShutdownStep>,
    poll_interval: Duration,
}

impl Default for ShutdownSequence {
    /// Smart, then fast, then immediate shutdown.
    fn default() -> Self {
        Self::new(
            vec![
                ShutdownStep::new(StopSignal::Smart, Duration::from_secs(2)),
                ShutdownStep::new(StopSignal::Fast, Duration::from_secs(2)),
                ShutdownStep::new(StopSignal::Immediate, Duration::from_secs(5)),
            ],
            EXIT_POLL_INTERVAL,
        )
    }
}

enum WaitOutcome {
    Exited,
    Elapsed,
    Cancelled,
}

impl ShutdownSequence {
    pub fn new(steps: Vec<ShutdownStep>, poll_interval: Duration) -> Self {
        Self {
            steps,
            poll_interval,
        }
    }

    pub fn steps(&self) -> &[ShutdownStep] {
        &self.steps
    }

    /// Escalates until `process` exits. Returns the number of signals sent.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::StopTimeout` when every step elapsed with the
    /// process still alive, or when `cancel` fired during a wait.
    pub async fn run(&self, process: &dyn ProcessHandle, cancel: &CancellationToken) -> Result<usize> {
        let pid = process.pid();
        let mut sent = 0;

        for step in &self.steps {
            if !process.is_alive() {
                debug!("pid {pid} exited after {sent} signal(s)");
                return Ok(sent);
            }

            debug!("sending {:?} shutdown signal to pid {pid}", step.signal);
            if !process.signal(step.signal) {
                debug!("pid {pid} could not be signalled with {:?}", step.signal);
            }
            sent += 1;

            match self.wait_for_exit(process, step.wait, cancel).await {
                WaitOutcome::Exited => {
                    info!("pid {pid} stopped after {:?} shutdown", step.signal);
                    return Ok(sent);
                }
                WaitOutcome::Cancelled => {
                    error!("shutdown of pid {pid} cancelled during {:?} step", step.signal);
                    return Err(ConduitError::StopTimeout { pid });
                }
                WaitOutcome::Elapsed => {}
            }
        }

        if !process.is_alive() {
            return Ok(sent);
        }
        error!("failed to stop pid {pid} after {sent} signal(s)");
        Err(ConduitError::StopTimeout { pid })
    }

    async fn wait_for_exit(
        &self,
        process: &dyn ProcessHandle,
        bound: Duration,
        cancel: &CancellationToken,
    ) -> WaitOutcome {
        let deadline = Instant::now() + bound;
        loop {
            if !process.is_alive() {
                return WaitOutcome::Exited;
            }
            if Instant::now() >= deadline {
                return WaitOutcome::Elapsed;
            }
            tokio::select! {
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
