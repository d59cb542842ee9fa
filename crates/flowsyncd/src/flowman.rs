//! Per-bridge flow manager.
//!
//! Owns the committed flow set for one bridge, keyed by owner identity.
//! Replacing an owner's subset is atomic from the driver's perspective, and
//! commits diff the desired union against the last-committed set so the
//! sink only sees actual adds and removes.
//!
//! State sits behind an async mutex: nothing prevents a forced resync from
//! another task touching the same bridge, and per-owner bookkeeping must
//! survive that.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use flowsync_common::{Flow, FlowSink, Result};

use crate::batch::BatchScope;

#[derive(Debug, Default)]
struct FlowManState {
    owner_flows: HashMap<String, Vec<Flow>>,
    committed: HashSet<Flow>,
    pending: usize,
    dirty: bool,
}

/// Flow manager for one bridge.
pub struct FlowMan {
    bridge: String,
    sink: Arc<dyn FlowSink>,
    state: Mutex<FlowManState>,
}

impl FlowMan {
    /// Creates the manager for `bridge` pushing through `sink`.
    pub fn new(bridge: impl Into<String>, sink: Arc<dyn FlowSink>) -> Self {
        Self {
            bridge: bridge.into(),
            sink,
            state: Mutex::new(FlowManState::default()),
        }
    }

    /// The bridge this manager owns.
    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    /// Replaces owner `who`'s flow subset.
    ///
    /// An empty `flows` clears the owner's presence. Inside a batch scope
    /// the update only marks the manager pending; outside one it commits
    /// immediately.
    pub async fn update_flows(
        &self,
        who: &str,
        flows: Vec<Flow>,
        batch: Option<&mut BatchScope>,
    ) -> Result<()> {
        {
            let mut st = self.state.lock().await;
            if flows.is_empty() {
                st.owner_flows.remove(who);
            } else {
                st.owner_flows.insert(who.to_string(), flows);
            }
            st.dirty = true;
            if let Some(scope) = batch {
                st.pending += 1;
                scope.note(&self.bridge);
                return Ok(());
            }
        }
        self.sync_flows().await
    }

    /// Completes this manager's share of a batch: drops `n` pending
    /// updates and issues exactly one commit.
    pub async fn finish_batch(&self, n: usize) -> Result<()> {
        {
            let mut st = self.state.lock().await;
            if st.pending < n {
                warn!(
                    bridge = %self.bridge,
                    pending = st.pending,
                    finishing = n,
                    "pending counter underflow"
                );
                st.pending = 0;
            } else {
                st.pending -= n;
            }
        }
        self.sync_flows().await
    }

    /// Commits the desired state: diffs the union of all owners' subsets
    /// against the last-committed set and pushes adds/removes to the sink.
    ///
    /// The lock is held across the sink calls so no two commits for this
    /// bridge interleave; committed state equals the owners' union on
    /// return.
    pub async fn sync_flows(&self) -> Result<()> {
        let mut st = self.state.lock().await;
        if !st.dirty {
            debug!(bridge = %self.bridge, "no flow changes to commit");
            return Ok(());
        }
        let desired: HashSet<Flow> = st.owner_flows.values().flatten().cloned().collect();
        let to_add: Vec<Flow> = desired.difference(&st.committed).cloned().collect();
        let to_del: Vec<Flow> = st.committed.difference(&desired).cloned().collect();

        self.sink.add_flows(&self.bridge, &to_add).await?;
        self.sink.del_flows(&self.bridge, &to_del).await?;

        debug!(
            bridge = %self.bridge,
            added = to_add.len(),
            removed = to_del.len(),
            total = desired.len(),
            "committed flow set"
        );
        st.committed = desired;
        st.dirty = false;
        Ok(())
    }

    /// Snapshot of the committed flow set.
    pub async fn committed_flows(&self) -> HashSet<Flow> {
        self.state.lock().await.committed.clone()
    }

    /// Current owner identities with installed subsets.
    pub async fn owners(&self) -> Vec<String> {
        self.state.lock().await.owner_flows.keys().cloned().collect()
    }
}
