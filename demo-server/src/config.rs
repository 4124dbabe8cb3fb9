use cluster_client::{ClusterConfig, NodeAddress, RedirectBudget, RefreshMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variable that switches periodic topology refresh on
pub const ENABLE_REFRESH_ENV: &str = "ENABLE_REFRESH";

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: HttpConfig,
    pub cluster: ClusterSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Seed nodes as `host:port`
    pub seeds: Vec<String>,
    /// Refresh the topology periodically as well as after MOVED
    pub enable_refresh: bool,
    pub refresh_interval_secs: u64,
    pub refresh_backoff_ms: u64,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub redirect_budget: RedirectBudget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            seeds: vec!["localhost:17000".to_string()],
            enable_refresh: false,
            refresh_interval_secs: 60,
            refresh_backoff_ms: 1000,
            connect_timeout_ms: 10_000,
            command_timeout_ms: 60_000,
            redirect_budget: RedirectBudget::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Apply the `ENABLE_REFRESH` value read at startup
    ///
    /// Only the exact string `"true"` turns refresh on; any other value
    /// keeps what the file configured. Returns the effective setting.
    pub fn apply_refresh_flag(&mut self, flag: Option<&str>) -> bool {
        if flag == Some("true") {
            self.cluster.enable_refresh = true;
        }
        self.cluster.enable_refresh
    }

    /// Convert to the session configuration
    pub fn to_cluster_config(&self) -> anyhow::Result<ClusterConfig> {
        let seeds = self
            .cluster
            .seeds
            .iter()
            .map(|seed| seed.parse::<NodeAddress>())
            .collect::<Result<Vec<_>, _>>()?;
        if seeds.is_empty() {
            anyhow::bail!("cluster.seeds must list at least one node");
        }

        let refresh_mode = if self.cluster.enable_refresh {
            RefreshMode::Periodic {
                interval: Duration::from_secs(self.cluster.refresh_interval_secs.max(1)),
            }
        } else {
            RefreshMode::OnDemand
        };

        Ok(ClusterConfig {
            seeds,
            refresh_mode,
            refresh_backoff: Duration::from_millis(self.cluster.refresh_backoff_ms),
            redirect_budget: self.cluster.redirect_budget,
            connect_timeout: Duration::from_millis(self.cluster.connect_timeout_ms),
            command_timeout: Duration::from_millis(self.cluster.command_timeout_ms),
        })
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
