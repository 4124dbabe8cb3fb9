use crate::types::NodeAddress;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default periodic refresh interval (60 seconds)
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Delay after a failed refresh before another may start
pub const DEFAULT_REFRESH_BACKOFF: Duration = Duration::from_secs(1);

/// When the topology map is re-fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Only after a MOVED redirect
    OnDemand,
    /// After MOVED redirects and on a fixed interval
    Periodic { interval: Duration },
}

impl RefreshMode {
    pub fn periodic_interval(&self) -> Option<Duration> {
        match self {
            RefreshMode::OnDemand => None,
            RefreshMode::Periodic { interval } => Some(*interval),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RefreshMode::OnDemand => "on-demand",
            RefreshMode::Periodic { .. } => "periodic",
        }
    }
}

/// Redirects a single command may follow, per redirect kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectBudget {
    pub moved: usize,
    pub ask: usize,
}

impl Default for RedirectBudget {
    fn default() -> Self {
        Self { moved: 1, ask: 1 }
    }
}

/// Cluster session configuration
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Seed nodes used for the first topology fetch
    pub seeds: Vec<NodeAddress>,

    pub refresh_mode: RefreshMode,

    pub refresh_backoff: Duration,

    pub redirect_budget: RedirectBudget,

    /// Per-node connect timeout
    pub connect_timeout: Duration,

    /// Upper bound on a single `execute` call, redirects included
    pub command_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            seeds: vec![NodeAddress::new("localhost", 17000)],
            refresh_mode: RefreshMode::OnDemand,
            refresh_backoff: DEFAULT_REFRESH_BACKOFF,
            redirect_budget: RedirectBudget::default(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(60),
        }
    }
}

impl ClusterConfig {
    /// Create a configuration with a single seed node
    pub fn new(seed: NodeAddress) -> Self {
        Self {
            seeds: vec![seed],
            ..Self::default()
        }
    }

    /// Enable periodic refresh at the given interval
    pub fn with_periodic_refresh(mut self, interval: Duration) -> Self {
        self.refresh_mode = RefreshMode::Periodic { interval };
        self
    }

    pub fn with_refresh_backoff(mut self, backoff: Duration) -> Self {
        self.refresh_backoff = backoff;
        self
    }

    pub fn with_redirect_budget(mut self, budget: RedirectBudget) -> Self {
        self.redirect_budget = budget;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}
