//! Scan dispatcher: the top-level loop that looks for configured
//! peripherals and hands discoveries to their supervisors, one session at a
//! time.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::hw::BleCentral;
use crate::supervisor::{SessionOutcome, Supervisor};

/// Owns the central and every per-device supervisor.
pub struct Dispatcher {
    central: Box<dyn BleCentral>,
    supervisors: Vec<Supervisor>,
    scan_timeout: Duration,
    poll_interval: Duration,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        central: Box<dyn BleCentral>,
        supervisors: Vec<Supervisor>,
        scan_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            central,
            supervisors,
            scan_timeout,
            poll_interval,
        }
    }

    /// Runs scan passes until shutdown is requested.
    ///
    /// The radio is shared, so only one session runs at a time; the other
    /// devices wait for the next pass. After a session ends scanning resumes
    /// immediately; the poll interval applies only to passes that saw
    /// nothing.
    #[instrument(skip(self, shutdown), level = "info", fields(devices = self.supervisors.len()))]
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!("dispatcher started");
        while !shutdown.is_cancelled() {
            if self.scan_pass(&shutdown).await {
                continue;
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("dispatcher stopped");
    }

    /// Returns whether a device session was run this pass.
    async fn scan_pass(&mut self, shutdown: &CancellationToken) -> bool {
        let addresses: Vec<String> = self
            .supervisors
            .iter_mut()
            .map(|supervisor| {
                supervisor.mark_scanning();
                supervisor.profile().address().to_string()
            })
            .collect();

        let found = match self.central.scan_for_any(&addresses, self.scan_timeout).await {
            Ok(found) => found,
            Err(error) => {
                warn!(%error, "scan pass failed");
                None
            }
        };

        match found {
            Some(device) => {
                let Some(supervisor) = self
                    .supervisors
                    .iter_mut()
                    .find(|supervisor| {
                        supervisor.profile().address().eq_ignore_ascii_case(device.address())
                    })
                else {
                    debug!(address = device.address(), "discovery matched no supervisor");
                    return false;
                };

                let outcome = supervisor
                    .run_session(self.central.as_ref(), &device, shutdown)
                    .await;
                match outcome {
                    SessionOutcome::Completed => {
                        debug!(address = device.address(), "session completed");
                    }
                    SessionOutcome::RetriesExhausted => {
                        warn!(address = device.address(), "session abandoned after retries");
                    }
                    SessionOutcome::ShutdownRequested => {
                        debug!(address = device.address(), "session cut short by shutdown");
                    }
                }
                true
            }
            None => {
                debug!("scan pass saw none of the configured devices");
                for supervisor in &mut self.supervisors {
                    supervisor.mark_unreachable().await;
                }
                false
            }
        }
    }
}
