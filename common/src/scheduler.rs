//! The main loop of the node.

use log::{debug, info, warn};

use crate::config::NodeConfig;
use crate::connectivity::{AuthSession, ConnectivityError, ConnectivityManager, NetworkLink};
use crate::gateway::{TreeStore, UploadGateway, UploadReport};
use crate::orchestrator::SamplingOrchestrator;
use crate::reading::SensorReading;
use crate::time::{Clock, Delay};

/// Observable state of the [`CycleScheduler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Sampling,
    Uploading,
    Reinitializing,
}

/// What a completed cycle did.
#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    /// The upload interval has not elapsed yet.
    NotDue,
    /// A reading was sampled and uploaded, possibly with failed writes.
    Uploaded(UploadReport),
    /// The session was not ready; the reading was dropped and connectivity
    /// was brought up again (`ready` tells whether that worked).
    Reinitialized { ready: bool },
}

/// Timing of the main loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schedule {
    pub upload_interval_ms: u32,
    pub loop_delay_ms: u32,
}

impl From<&NodeConfig> for Schedule {
    fn from(config: &NodeConfig) -> Self {
        Self {
            upload_interval_ms: config.upload_interval_ms,
            loop_delay_ms: config.loop_delay_ms,
        }
    }
}

enum Phase {
    Idle,
    Sampling,
    Uploading(SensorReading),
    Reinitializing,
}

/// Samples the sensors once per interval and uploads the reading.
///
/// The scheduler owns every piece of mutable state of the node: the
/// sensors, the connectivity and with it the cloud session, the clock and
/// the time of the last upload attempt.
pub struct CycleScheduler<L, S, C, D> {
    orchestrator: SamplingOrchestrator,
    gateway: UploadGateway,
    connectivity: ConnectivityManager<L, S>,
    clock: C,
    delay: D,
    schedule: Schedule,
    phase: Phase,
    last_attempt_ms: Option<u32>,
}

impl<L, S, C, D> CycleScheduler<L, S, C, D>
where
    L: NetworkLink,
    S: AuthSession + TreeStore,
    C: Clock,
    D: Delay,
{
    pub fn new(
        orchestrator: SamplingOrchestrator,
        gateway: UploadGateway,
        connectivity: ConnectivityManager<L, S>,
        clock: C,
        delay: D,
        schedule: Schedule,
    ) -> Self {
        Self {
            orchestrator,
            gateway,
            connectivity,
            clock,
            delay,
            schedule,
            phase: Phase::Idle,
            last_attempt_ms: None,
        }
    }

    pub fn state(&self) -> CycleState {
        match self.phase {
            Phase::Idle => CycleState::Idle,
            Phase::Sampling => CycleState::Sampling,
            Phase::Uploading(_) => CycleState::Uploading,
            Phase::Reinitializing => CycleState::Reinitializing,
        }
    }

    /// Uptime of the last upload attempt, successful or not.
    pub fn last_attempt_ms(&self) -> Option<u32> {
        self.last_attempt_ms
    }

    pub fn connectivity_mut(&mut self) -> &mut ConnectivityManager<L, S> {
        &mut self.connectivity
    }

    pub fn orchestrator_mut(&mut self) -> &mut SamplingOrchestrator {
        &mut self.orchestrator
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Boot sequence: sensors, network link, then the cloud session.
    ///
    /// Connectivity failures are returned for logging only, the loop
    /// recovers from them by itself.
    pub fn start(&mut self) -> Result<(), ConnectivityError> {
        let failed = self.orchestrator.begin_all();
        info!(
            "{} sensors initialized, {} failed",
            self.orchestrator.len() - failed,
            failed
        );

        self.connectivity.connect(&mut self.delay)?;
        self.connectivity.initialize_session(&mut self.delay)
    }

    fn is_due(&self, now: u32) -> bool {
        match self.last_attempt_ms {
            None => true,
            Some(last) => now.wrapping_sub(last) > self.schedule.upload_interval_ms,
        }
    }

    /// Performs a single state transition. Returns the outcome once the
    /// scheduler is back in [`CycleState::Idle`].
    pub fn step(&mut self) -> Option<CycleOutcome> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => {
                if self.is_due(self.clock.uptime_ms()) {
                    self.phase = Phase::Sampling;
                    None
                } else {
                    Some(CycleOutcome::NotDue)
                }
            }
            Phase::Sampling => {
                let reading = self
                    .orchestrator
                    .sample(self.clock.uptime_ms(), &mut self.delay);
                if let Ok(json) = serde_json::to_string(&reading) {
                    debug!("{}", json);
                }

                if self.connectivity.is_ready() {
                    self.phase = Phase::Uploading(reading);
                } else {
                    warn!("Session not ready, dropping reading and reinitializing");
                    self.phase = Phase::Reinitializing;
                }
                None
            }
            Phase::Uploading(reading) => {
                let key = self
                    .clock
                    .epoch_ms()
                    .unwrap_or_else(|| u64::from(self.clock.uptime_ms()));
                let report = self
                    .gateway
                    .upload(self.connectivity.session_mut(), reading, key);
                self.last_attempt_ms = Some(self.clock.uptime_ms());
                Some(CycleOutcome::Uploaded(report))
            }
            Phase::Reinitializing => {
                let ready = match self.connectivity.reinitialize(&mut self.delay) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Reinitialization failed: {}", e);
                        false
                    }
                };
                Some(CycleOutcome::Reinitialized { ready })
            }
        }
    }

    /// Runs the state machine until it is idle again.
    pub fn tick(&mut self) -> CycleOutcome {
        loop {
            if let Some(outcome) = self.step() {
                return outcome;
            }
        }
    }

    /// The main loop. Never returns.
    pub fn run(&mut self) -> ! {
        loop {
            self.tick();
            self.delay.delay_ms(self.schedule.loop_delay_ms);
        }
    }
}
