//! Agent composition root.
//!
//! Maintains one `FlowMan` per bridge, created lazily on first lookup, and
//! hands out the shared flow sink. Not otherwise stateful.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use flowsync_common::FlowSink;

use crate::flowman::FlowMan;

/// Composition root owning the per-bridge flow managers.
pub struct AgentServer {
    sink: Arc<dyn FlowSink>,
    flowmans: Mutex<HashMap<String, Arc<FlowMan>>>,
}

impl AgentServer {
    /// Creates the agent with the given switch control-plane sink.
    pub fn new(sink: Arc<dyn FlowSink>) -> Self {
        Self {
            sink,
            flowmans: Mutex::new(HashMap::new()),
        }
    }

    /// Looks up the flow manager for `bridge`, creating it on first use.
    pub fn flowman(&self, bridge: &str) -> Arc<FlowMan> {
        let mut map = self.flowmans.lock();
        map.entry(bridge.to_string())
            .or_insert_with(|| {
                debug!(bridge = %bridge, "creating flow manager");
                Arc::new(FlowMan::new(bridge, self.sink.clone()))
            })
            .clone()
    }

    /// Bridges with a flow manager instantiated.
    pub fn bridges(&self) -> Vec<String> {
        self.flowmans.lock().keys().cloned().collect()
    }
}
