//! Guest model: description parsing and per-bridge flow derivation.
//!
//! A guest lives at `<servers_path>/<uuid>/`; its `desc` file is a JSON
//! document carrying the NIC list, and the presence of its `pid` file
//! signals that the guest is running.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use serde::Deserialize;

use flowsync_common::{Flow, FlowsyncError, Result, SecurityRuleSet, DEFAULT_RULES_TEXT};

/// Guest description file name.
pub const DESC_FILE: &str = "desc";

/// Guest process-id file name; presence signals "running".
pub const PID_FILE: &str = "pid";

/// ARP pass flows sit above all security-rule flows.
const PRIO_ARP: u16 = 27000;
/// Inbound security-rule flows start here and descend per rule.
const PRIO_IN_BASE: u16 = 26000;
/// Outbound security-rule flows start here and descend per rule.
const PRIO_OUT_BASE: u16 = 25000;
/// Priority gap between consecutive rules of one direction.
const PRIO_STEP: u16 = 10;

/// One guest network interface from the description file.
#[derive(Debug, Clone, Deserialize)]
pub struct GuestNic {
    /// Bridge the interface is plugged into.
    pub bridge: String,
    /// Interface MAC address.
    pub mac: String,
    /// Interface IPv4 address.
    pub ip: Ipv4Addr,
    /// Security-rule text for this interface; empty means platform default.
    #[serde(default)]
    pub security_rules: String,
}

#[derive(Debug, Deserialize)]
struct GuestDesc {
    #[serde(default)]
    nics: Vec<GuestNic>,
}

/// A guest registered with the watcher.
#[derive(Debug, Clone)]
pub struct Guest {
    /// Guest uuid (directory name).
    pub id: String,
    /// Path to the guest directory.
    pub path: PathBuf,
    /// NIC list from the last successful description load.
    pub nics: Vec<GuestNic>,
}

impl Guest {
    /// Creates a guest entry; the description is loaded separately.
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            nics: Vec::new(),
        }
    }

    /// Owner identity tagging this guest's flow subsets.
    pub fn who(&self) -> &str {
        &self.id
    }

    /// Whether the guest process is running (pid file present).
    pub fn running(&self) -> bool {
        self.path.join(PID_FILE).exists()
    }

    /// Re-reads and re-parses the description file.
    pub fn load_desc(&mut self) -> Result<()> {
        let desc_path = self.path.join(DESC_FILE);
        let text = std::fs::read_to_string(&desc_path).map_err(|e| {
            FlowsyncError::config(desc_path.display().to_string(), format!("read failed: {}", e))
        })?;
        let desc: GuestDesc = serde_json::from_str(&text).map_err(|e| {
            FlowsyncError::config(desc_path.display().to_string(), format!("bad json: {}", e))
        })?;
        self.nics = desc.nics;
        Ok(())
    }

    /// Compiles each NIC's rule set and derives the guest's flows, grouped
    /// by bridge.
    ///
    /// Inbound matches are anchored on the NIC (`dl_dst`/`nw_dst`),
    /// outbound on (`dl_src`/`nw_src`), so guests sharing a bridge never
    /// shadow each other. A parse error in any NIC's rules fails the whole
    /// computation; the caller skips this guest for the pass.
    pub fn flows(&self) -> Result<HashMap<String, Vec<Flow>>> {
        let mut by_bridge: HashMap<String, Vec<Flow>> = HashMap::new();
        for nic in &self.nics {
            let text = if nic.security_rules.trim().is_empty() {
                DEFAULT_RULES_TEXT
            } else {
                nic.security_rules.as_str()
            };
            let rules = SecurityRuleSet::parse(text)?;
            let flows = by_bridge.entry(nic.bridge.clone()).or_default();

            flows.push(Flow::new(PRIO_ARP, format!("arp,dl_dst={}", nic.mac), "normal"));
            flows.push(Flow::new(PRIO_ARP, format!("arp,dl_src={}", nic.mac), "normal"));

            for (idx, rule) in rules.in_rules().iter().enumerate() {
                let prio = PRIO_IN_BASE.saturating_sub(idx as u16 * PRIO_STEP);
                let actions = if rule.is_allow() { "normal" } else { "drop" };
                for m in rule.ovs_matches() {
                    flows.push(Flow::new(
                        prio,
                        format!("{},dl_dst={},nw_dst={}", m, nic.mac, nic.ip),
                        actions,
                    ));
                }
            }
            for (idx, rule) in rules.out_rules().iter().enumerate() {
                let prio = PRIO_OUT_BASE.saturating_sub(idx as u16 * PRIO_STEP);
                let actions = if rule.is_allow() { "normal" } else { "drop" };
                for m in rule.ovs_matches() {
                    flows.push(Flow::new(
                        prio,
                        format!("{},dl_src={},nw_src={}", m, nic.mac, nic.ip),
                        actions,
                    ));
                }
            }
        }
        Ok(by_bridge)
    }
}
