// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.5
// Author: Lukas Bower
// Date Modified: 2027-08-30

//! Server configuration, consumed (never parsed) by the core.
//!
//! The binary assembles this from its command line; tests build it
//! directly.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Scheduling intervals per second for the per-client send workers.
pub const INTERVALS_PER_SECOND: u32 = 60;

/// Default UDP port the server listens on.
pub const DEFAULT_LISTEN_PORT: u16 = 40106;

/// Snapshot persistence settings.
#[derive(Debug, Clone)]
pub struct PersistConfig {
    pub path: PathBuf,
    pub interval: Duration,
}

/// Where the jurisdiction map comes from.
#[derive(Debug, Clone, Default)]
pub enum JurisdictionSource {
    /// Serve the whole tree; answer jurisdiction queries with nothing.
    #[default]
    None,
    /// JSON file listing the owned root and delegated end nodes.
    File(PathBuf),
    /// Explicit root prefix plus delegated end-node prefixes.
    Roots { root: String, end_nodes: Vec<String> },
}

/// Environment-broadcast toggles for the per-client send workers.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentConfig {
    /// Send periodic environment-data packets to streaming clients.
    pub broadcast: bool,
    /// Send only the single default environment.
    pub minimal: bool,
}

/// External directory (check-in registry) settings.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub addr: SocketAddr,
    pub check_in_interval: Duration,
    /// Unanswered check-ins tolerated before the server gives up.
    pub silent_check_in_budget: u32,
}

/// Everything the server needs to run.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub persist: Option<PersistConfig>,
    /// Outbound voxel-data budget per client, in packets per second.
    pub packets_per_second: u32,
    pub environment: EnvironmentConfig,
    pub jurisdiction: JurisdictionSource,
    /// Peers receiving periodic jurisdiction broadcasts.
    pub peers: Vec<SocketAddr>,
    pub jurisdiction_broadcast_interval: Duration,
    pub directory: Option<DirectoryConfig>,
    /// Query silence before a session stops being streamed to.
    pub client_silent_timeout: Duration,
    /// Query silence before a session is removed outright.
    pub client_remove_timeout: Duration,
    /// Receive timeout keeping the main loop responsive.
    pub recv_timeout: Duration,
    /// Cadence of session lifecycle sweeps.
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT)),
            persist: None,
            packets_per_second: 600,
            environment: EnvironmentConfig::default(),
            jurisdiction: JurisdictionSource::default(),
            peers: Vec::new(),
            jurisdiction_broadcast_interval: Duration::from_secs(5),
            directory: None,
            client_silent_timeout: Duration::from_secs(5),
            client_remove_timeout: Duration::from_secs(30),
            recv_timeout: Duration::from_millis(100),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// Interval between send-scheduler ticks.
    pub fn send_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(INTERVALS_PER_SECOND))
    }

    /// The per-tick packet budget: the packets-per-second target split
    /// evenly across intervals, never below one.
    pub fn packets_per_client_per_interval(&self) -> usize {
        ((self.packets_per_second / INTERVALS_PER_SECOND).max(1)) as usize
    }
}
