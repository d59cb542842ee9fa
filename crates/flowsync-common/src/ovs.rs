//! Switch control-plane collaborator.
//!
//! `FlowSink` is the narrow interface the flow managers push through. The
//! production implementation shells out to `ovs-ofctl`; tests substitute a
//! recording sink.

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::flow::Flow;
use crate::shell::{self, shellquote, OVS_OFCTL_CMD};

/// Add/remove operations scoped to one bridge.
///
/// Implementations are assumed idempotent: re-issuing an already-installed
/// flow, or removing an absent one, is a no-op. Empty slices are valid and
/// clear nothing.
#[async_trait]
pub trait FlowSink: Send + Sync {
    /// Installs the given flows on `bridge`.
    async fn add_flows(&self, bridge: &str, flows: &[Flow]) -> Result<()>;

    /// Removes the given flows from `bridge`.
    async fn del_flows(&self, bridge: &str, flows: &[Flow]) -> Result<()>;
}

/// `FlowSink` backed by the `ovs-ofctl` command.
#[derive(Debug, Default)]
pub struct OvsOfctl;

impl OvsOfctl {
    /// Creates the ovs-ofctl backed sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FlowSink for OvsOfctl {
    async fn add_flows(&self, bridge: &str, flows: &[Flow]) -> Result<()> {
        for flow in flows {
            let cmd = format!(
                "{} add-flow {} {}",
                OVS_OFCTL_CMD,
                shellquote(bridge),
                shellquote(&flow.to_ofctl_add())
            );
            shell::exec_or_throw(&cmd).await?;
        }
        debug!(bridge = %bridge, count = flows.len(), "Installed flows");
        Ok(())
    }

    async fn del_flows(&self, bridge: &str, flows: &[Flow]) -> Result<()> {
        for flow in flows {
            let cmd = format!(
                "{} --strict del-flows {} {}",
                OVS_OFCTL_CMD,
                shellquote(bridge),
                shellquote(&flow.to_ofctl_del())
            );
            shell::exec_or_throw(&cmd).await?;
        }
        debug!(bridge = %bridge, count = flows.len(), "Removed flows");
        Ok(())
    }
}
