//! The control loop driving reconciliation cycles.
//!
//! Cycles are triggered by the refresh interval and by every leader change.
//! Losing the leader arms a fail-fast timer; if no leader shows up before it
//! fires the loop returns an error and the daemon exits.

use std::time::Duration;

use thiserror::Error;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::backend::Backend;
use crate::leader::LeaderEvents;
use crate::snapshot::SnapshotProvider;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no leading master detected within {0:?}")]
    LeaderTimeout(Duration),
    #[error("leader detection failed: {0}")]
    Fatal(String),
}

pub struct Scheduler<P> {
    provider: P,
    backends: Vec<Backend>,
    refresh: Duration,
    leader_timeout: Duration,
    leaders: Vec<String>,
    cycles: u64,
}

impl<P: SnapshotProvider> Scheduler<P> {
    /// `leader_timeout` of zero disables the fail-fast timer.
    pub fn new(provider: P, backends: Vec<Backend>, refresh: Duration, leader_timeout: Duration) -> Self {
        Self {
            provider,
            backends,
            refresh,
            leader_timeout,
            leaders: Vec::new(),
            cycles: 0,
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Runs until a fatal condition. The timer starts armed since no leader
    /// is known yet.
    pub async fn run(&mut self, mut events: LeaderEvents) -> Result<(), SchedulerError> {
        let mut ticker = interval_at(Instant::now() + self.refresh, self.refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let deadline = sleep(self.leader_timeout);
        tokio::pin!(deadline);
        let mut armed = !self.leader_timeout.is_zero();
        let mut changes_open = true;
        let mut fatal_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.cycle().await,
                change = events.changes.recv(), if changes_open => match change {
                    Some(leaders) => {
                        if leaders.first().map_or(true, |l| l.is_empty()) {
                            warn!("no leading master");
                            if !self.leader_timeout.is_zero() {
                                deadline.as_mut().reset(Instant::now() + self.leader_timeout);
                                armed = true;
                            }
                        } else {
                            info!(leader = %leaders[0], "leading master changed");
                            armed = false;
                        }
                        self.leaders = leaders;
                        self.cycle().await;
                    }
                    None => changes_open = false,
                },
                msg = events.fatal.recv(), if fatal_open => match msg {
                    Some(reason) => {
                        error!(%reason, "leader detection failed");
                        return Err(SchedulerError::Fatal(reason));
                    }
                    None => fatal_open = false,
                },
                _ = &mut deadline, if armed => {
                    error!(timeout = ?self.leader_timeout, "timed out waiting for a leading master");
                    return Err(SchedulerError::LeaderTimeout(self.leader_timeout));
                }
            }
        }
    }

    /// One snapshot, every backend. A failed fetch leaves every backend on
    /// its previous generation.
    pub async fn cycle(&mut self) {
        self.cycles += 1;
        let snapshot = match self.provider.current_snapshot(&self.leaders).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(cycle = self.cycles, error = %e, "failed to fetch snapshot; keeping previous records");
                return;
            }
        };
        for backend in &mut self.backends {
            if let Err(e) = backend.reconcile(&snapshot).await {
                warn!(cycle = self.cycles, backend = backend.name(), error = %e, "reconciliation failed");
            }
        }
    }
}
