//! Host-local flow computation.
//!
//! Per (bridge, interface) binding the host installs its own flows under
//! the `hostlocal` owner identity: the metadata-service redirect, cluster
//! CIDR pass flows, and a host-MAC pass flow.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use flowsync_common::{Flow, FlowsyncError, Result};

use crate::config::{HostConfig, HostNetwork};

/// Owner identity for host-local flow subsets.
pub const HOST_LOCAL_OWNER: &str = "hostlocal";

/// Link-local address of the metadata service.
pub const METADATA_ADDR: &str = "169.254.169.254";

const PRIO_METADATA: u16 = 29500;
const PRIO_CLUSTER: u16 = 29000;
const PRIO_HOST_MAC: u16 = 28000;

/// Host-local flow inputs for one bridge.
#[derive(Debug, Clone)]
pub struct HostLocal {
    /// Bridge the flows are addressed to.
    pub bridge: String,
    /// Host uplink interface on the bridge.
    pub ifname: String,
    /// Host master IP.
    pub ip: Ipv4Addr,
    /// Host master MAC.
    pub mac: String,
    /// Local metadata service port.
    pub metadata_port: u16,
    /// Cluster pod CIDR, if configured.
    pub cluster_cidr: Option<Ipv4Net>,
}

impl HostLocal {
    /// Builds host-local inputs for one network binding.
    ///
    /// Fails with a flow-preparation error when the host master address is
    /// not configured; the caller skips the bridge for this pass.
    pub fn from_config(cfg: &HostConfig, net: &HostNetwork) -> Result<Self> {
        let ip = cfg
            .master_ip
            .ok_or_else(|| FlowsyncError::flow_prep(&net.bridge, "master_ip not configured"))?;
        let mac = cfg
            .master_mac
            .clone()
            .ok_or_else(|| FlowsyncError::flow_prep(&net.bridge, "master_mac not configured"))?;
        Ok(Self {
            bridge: net.bridge.clone(),
            ifname: net.ifname.clone(),
            ip,
            mac,
            metadata_port: cfg.metadata_port,
            cluster_cidr: cfg.cluster_cidr,
        })
    }

    /// Owner identity tagging these flows.
    pub fn who(&self) -> &'static str {
        HOST_LOCAL_OWNER
    }

    /// The host-local flow set for this bridge.
    pub fn flows(&self) -> Result<Vec<Flow>> {
        let mut flows = Vec::new();

        // metadata requests are rewritten to the local service
        flows.push(Flow::new(
            PRIO_METADATA,
            format!("tcp,nw_dst={},tp_dst=80", METADATA_ADDR),
            format!(
                "mod_dl_dst:{},mod_nw_dst:{},mod_tp_dst:{},local",
                self.mac, self.ip, self.metadata_port
            ),
        ));

        if let Some(cidr) = self.cluster_cidr {
            flows.push(Flow::new(
                PRIO_CLUSTER,
                format!("ip,nw_src={}", cidr),
                "normal",
            ));
            flows.push(Flow::new(
                PRIO_CLUSTER,
                format!("ip,nw_dst={}", cidr),
                "normal",
            ));
        }

        flows.push(Flow::new(
            PRIO_HOST_MAC,
            format!("dl_dst={}", self.mac),
            "normal",
        ));

        Ok(flows)
    }
}
