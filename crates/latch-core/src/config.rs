//! Centralized Configuration Management
//!
//! This module consolidates the configuration structures used throughout the
//! Latch substrate: cluster shape, protocol timeouts, heartbeat cadence,
//! transport limits, and the optional recovery store location.
//!
//! Every public blocking operation in the substrate takes its timeout from
//! here; nothing blocks indefinitely.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Cluster Configuration
// ----------------------------------------------------------------------------

/// Expected cluster shape and the scheduler's address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Number of worker nodes the scheduler waits for
    pub worker_num: u32,
    /// Number of server nodes the scheduler waits for
    pub server_num: u32,
    /// Host the scheduler binds/advertises
    pub scheduler_host: String,
    /// Port the scheduler binds/advertises
    pub scheduler_port: u16,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            worker_num: 1,
            server_num: 1,
            scheduler_host: "127.0.0.1".to_string(),
            scheduler_port: 9550,
        }
    }
}

impl ClusterConfig {
    /// `host:port` form of the scheduler address
    pub fn scheduler_endpoint(&self) -> String {
        format!("{}:{}", self.scheduler_host, self.scheduler_port)
    }

    /// Total number of non-scheduler nodes expected to register
    pub fn expected_nodes(&self) -> u32 {
        self.worker_num + self.server_num
    }
}

// ----------------------------------------------------------------------------
// Timeout Configuration
// ----------------------------------------------------------------------------

/// Protocol timeouts for startup, shutdown, and per-request waits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// How long a node waits for the cluster to become available at startup
    pub cluster_available: Duration,
    /// How long a graceful finish may take end to end
    pub finish: Duration,
    /// Per-request communication timeout for synchronous sends
    pub comm: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            cluster_available: Duration::from_secs(300),
            finish: Duration::from_secs(30),
            comm: Duration::from_secs(3),
        }
    }
}

impl TimeoutConfig {
    /// Short timeouts for tests
    pub fn testing() -> Self {
        Self {
            cluster_available: Duration::from_secs(5),
            finish: Duration::from_secs(5),
            comm: Duration::from_secs(1),
        }
    }
}

// ----------------------------------------------------------------------------
// Heartbeat Configuration
// ----------------------------------------------------------------------------

/// Heartbeat cadence between nodes and the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between heartbeats sent by workers/servers
    pub interval: Duration,
    /// Age after which the scheduler considers a node silent
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    /// Fast cadence for tests
    pub fn testing() -> Self {
        Self {
            interval: Duration::from_millis(100),
            timeout: Duration::from_secs(2),
        }
    }
}

// ----------------------------------------------------------------------------
// Transport Configuration
// ----------------------------------------------------------------------------

/// Limits and timeouts for the TCP transport pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Timeout for establishing an outbound connection
    pub connect_timeout: Duration,
    /// Largest frame accepted on the wire
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

impl TransportConfig {
    /// Tight limits for tests
    pub fn testing() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            max_frame_size: 1024 * 1024,
        }
    }
}

// ----------------------------------------------------------------------------
// Recovery Configuration
// ----------------------------------------------------------------------------

/// Backing store kind for persisted node/cluster metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageKind {
    /// JSON key/value file on local disk
    File,
}

/// Location of the recovery store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub storage: StorageKind,
    pub path: PathBuf,
}

impl RecoveryConfig {
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            storage: StorageKind::File,
            path: path.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Master Configuration
// ----------------------------------------------------------------------------

/// Master configuration struct consolidating all Latch configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatchConfig {
    /// Cluster shape and scheduler address
    pub cluster: ClusterConfig,
    /// Protocol timeouts
    pub timeouts: TimeoutConfig,
    /// Heartbeat cadence
    pub heartbeat: HeartbeatConfig,
    /// Transport limits
    pub transport: TransportConfig,
    /// Optional recovery store (None disables persistence)
    pub recovery: Option<RecoveryConfig>,
}

impl LatchConfig {
    /// Create new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration tuned for tests: short timeouts, fast heartbeats
    pub fn testing() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            timeouts: TimeoutConfig::testing(),
            heartbeat: HeartbeatConfig::testing(),
            transport: TransportConfig::testing(),
            recovery: None,
        }
    }

    /// Validate the configuration for consistency and feasibility
    pub fn validate(&self) -> Result<(), String> {
        if self.cluster.expected_nodes() == 0 {
            return Err("Cluster must expect at least one worker or server".into());
        }
        if self.cluster.scheduler_host.is_empty() {
            return Err("Scheduler host cannot be empty".into());
        }
        if self.timeouts.comm.is_zero() {
            return Err("Communication timeout cannot be zero".into());
        }
        if self.timeouts.comm > self.timeouts.cluster_available {
            return Err("Communication timeout cannot exceed cluster-available timeout".into());
        }
        if self.heartbeat.interval.is_zero() {
            return Err("Heartbeat interval cannot be zero".into());
        }
        if self.heartbeat.interval >= self.heartbeat.timeout {
            return Err("Heartbeat interval must be shorter than heartbeat timeout".into());
        }
        if self.transport.max_frame_size == 0 {
            return Err("Maximum frame size cannot be zero".into());
        }
        Ok(())
    }

    /// Convert to Arc-wrapped config for sharing across tasks
    pub fn into_shared(self) -> SharedLatchConfig {
        Arc::new(self)
    }
}

/// Arc-wrapped LatchConfig for efficient sharing across tasks
pub type SharedLatchConfig = Arc<LatchConfig>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        assert!(LatchConfig::default().validate().is_ok());
        assert!(LatchConfig::testing().validate().is_ok());
    }

    #[test]
    fn test_invalid_cluster_shape() {
        let mut config = LatchConfig::default();
        config.cluster.worker_num = 0;
        config.cluster.server_num = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_interval_must_undercut_timeout() {
        let mut config = LatchConfig::default();
        config.heartbeat.interval = config.heartbeat.timeout;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scheduler_endpoint() {
        let cluster = ClusterConfig::default();
        assert_eq!(cluster.scheduler_endpoint(), "127.0.0.1:9550");
        assert_eq!(cluster.expected_nodes(), 2);
    }
}
