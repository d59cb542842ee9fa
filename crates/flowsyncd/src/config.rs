//! Host configuration for flowsyncd.
//!
//! Loaded once at startup from a TOML file and consumed read-only by the
//! reconciliation driver on every pass.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use flowsync_common::{FlowsyncError, Result};

/// One host-local network binding: a bridge and its uplink interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostNetwork {
    /// Bridge name, e.g. `br0`.
    pub bridge: String,
    /// Host interface attached to the bridge.
    pub ifname: String,
}

/// Complete flowsyncd host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Root directory holding one subdirectory per guest.
    #[serde(default = "default_servers_path")]
    pub servers_path: PathBuf,

    /// Host-local (bridge, interface) bindings.
    #[serde(default)]
    pub networks: Vec<HostNetwork>,

    /// Port the local metadata service listens on.
    #[serde(default = "default_metadata_port")]
    pub metadata_port: u16,

    /// Cluster pod CIDR whose traffic passes unfiltered.
    #[serde(default)]
    pub cluster_cidr: Option<Ipv4Net>,

    /// Host master address used for host-local flows.
    #[serde(default)]
    pub master_ip: Option<Ipv4Addr>,

    /// Host master MAC used for host-local flows.
    #[serde(default)]
    pub master_mac: Option<String>,

    /// Periodic self-healing interval in seconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Unix socket path for the control interface.
    #[serde(default = "default_control_socket")]
    pub control_socket: PathBuf,
}

fn default_servers_path() -> PathBuf {
    PathBuf::from("/opt/cloud/workspace/servers")
}

fn default_metadata_port() -> u16 {
    9090
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_control_socket() -> PathBuf {
    PathBuf::from("/var/run/flowsyncd.sock")
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            servers_path: default_servers_path(),
            networks: Vec::new(),
            metadata_port: default_metadata_port(),
            cluster_cidr: None,
            master_ip: None,
            master_mac: None,
            refresh_interval_secs: default_refresh_interval(),
            control_socket: default_control_socket(),
        }
    }
}

impl HostConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FlowsyncError::config(path.display().to_string(), format!("read failed: {}", e))
        })?;
        toml::from_str(&text).map_err(|e| {
            FlowsyncError::config(path.display().to_string(), format!("parse failed: {}", e))
        })
    }

    /// The periodic self-healing interval.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}
