//! Topology Refresh Policy
//!
//! State machine deciding when the topology map is re-fetched:
//!
//! ```text
//!   Idle --(tick | MOVED)--> RefreshInFlight --ok--> Idle
//!                                  |
//!                                 err
//!                                  v
//!                               Backoff --(delay elapsed)--> Idle
//! ```
//!
//! Triggers that arrive while a refresh is in flight or backing off are
//! dropped, so a burst of redirects costs at most one fetch.

use crate::config::RefreshMode;
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

/// Refresh state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    RefreshInFlight,
    Backoff { until: Instant },
}

/// What asked for a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// A node answered MOVED for this slot
    Moved { slot: u16 },
    /// Periodic timer tick
    Periodic,
}

/// Refresh counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshStats {
    /// Fetches started
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// Triggers dropped because a refresh was in flight or backing off
    pub skipped: u64,
}

/// Refresh policy shared by the router and the refresh worker
pub struct RefreshPolicy {
    mode: RefreshMode,
    backoff: Duration,
    state: Mutex<RefreshState>,
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
}

impl RefreshPolicy {
    pub fn new(mode: RefreshMode, backoff: Duration) -> Self {
        Self {
            mode,
            backoff,
            state: Mutex::new(RefreshState::Idle),
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> RefreshMode {
        self.mode
    }

    /// Current state; an expired backoff reads as `Idle`
    pub fn state(&self) -> RefreshState {
        let mut state = self.state.lock();
        Self::expire_backoff(&mut state);
        *state
    }

    /// Move `Idle -> RefreshInFlight`, returning false if that is not allowed
    pub fn try_begin(&self) -> bool {
        let mut state = self.state.lock();
        Self::expire_backoff(&mut state);
        if *state == RefreshState::Idle {
            *state = RefreshState::RefreshInFlight;
            self.attempts.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Finish the in-flight refresh
    pub fn complete(&self, succeeded: bool) {
        let mut state = self.state.lock();
        if succeeded {
            self.successes.fetch_add(1, Ordering::Relaxed);
            *state = RefreshState::Idle;
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
            *state = RefreshState::Backoff {
                until: Instant::now() + self.backoff,
            };
        }
    }

    /// Drop an in-flight refresh that never finished
    ///
    /// Returns to `Idle` without counting a success or a failure.
    pub fn abandon(&self) {
        let mut state = self.state.lock();
        if *state == RefreshState::RefreshInFlight {
            *state = RefreshState::Idle;
        }
    }

    pub fn stats(&self) -> RefreshStats {
        RefreshStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    fn expire_backoff(state: &mut RefreshState) {
        if let RefreshState::Backoff { until } = *state {
            if Instant::now() >= until {
                *state = RefreshState::Idle;
            }
        }
    }
}

/// Something that can fetch and install a fresh topology
#[async_trait]
pub trait TopologyFetcher: Send + Sync {
    /// Fetch from any known node and install; returns the new version
    async fn refresh_topology(&self) -> Result<u64>;
}

/// Sender side used by the router to request refreshes
#[derive(Clone)]
pub struct RefreshHandle {
    policy: Arc<RefreshPolicy>,
    tx: mpsc::UnboundedSender<RefreshTrigger>,
}

impl RefreshHandle {
    pub fn new(policy: Arc<RefreshPolicy>) -> (Self, mpsc::UnboundedReceiver<RefreshTrigger>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { policy, tx }, rx)
    }

    /// Ask for a refresh without waiting for it
    ///
    /// Returns true if this call started one.
    pub fn request(&self, trigger: RefreshTrigger) -> bool {
        if self.tx.is_closed() {
            // Worker gone (session closed)
            return false;
        }
        if !self.policy.try_begin() {
            debug!("Refresh already pending, dropping {:?}", trigger);
            return false;
        }
        if self.tx.send(trigger).is_err() {
            self.policy.abandon();
            return false;
        }
        true
    }

    pub fn policy(&self) -> &Arc<RefreshPolicy> {
        &self.policy
    }
}

/// Spawn the refresh worker
///
/// Runs until `shutdown` flips to true or its sender is dropped. A refresh
/// still running at that point is abandoned rather than awaited.
pub fn spawn_refresh_worker(
    policy: Arc<RefreshPolicy>,
    fetcher: Arc<dyn TopologyFetcher>,
    mut triggers: mpsc::UnboundedReceiver<RefreshTrigger>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = policy.mode().periodic_interval().map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        info!("Topology refresh worker started ({})", policy.mode().name());

        loop {
            let trigger = tokio::select! {
                _ = stopped(&mut shutdown) => break,
                Some(trigger) = triggers.recv() => {
                    // Already moved to RefreshInFlight by the requester
                    trigger
                }
                _ = tick(&mut ticker) => {
                    if !policy.try_begin() {
                        debug!("Skipping periodic refresh, state {:?}", policy.state());
                        continue;
                    }
                    RefreshTrigger::Periodic
                }
            };

            tokio::select! {
                _ = run_refresh(&policy, fetcher.as_ref(), trigger) => {}
                _ = stopped(&mut shutdown) => {
                    debug!("Abandoning topology refresh on shutdown");
                    policy.abandon();
                    break;
                }
            }
        }

        info!("Topology refresh worker stopped");
    })
}

/// Resolves once shutdown is requested or the sender is gone
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_refresh(policy: &RefreshPolicy, fetcher: &dyn TopologyFetcher, trigger: RefreshTrigger) {
    debug!("Refreshing cluster topology ({:?})", trigger);
    match fetcher.refresh_topology().await {
        Ok(version) => {
            debug!("Topology refresh installed v{}", version);
            policy.complete(true);
        }
        Err(err) => {
            warn!("Topology refresh failed, backing off: {}", err);
            policy.complete(false);
        }
    }
}
