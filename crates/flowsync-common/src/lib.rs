//! Shared primitives for the flowsync agent.
//!
//! Security-rule parsing and compilation to OVS match predicates, the
//! `Flow` type with its `ovs-ofctl` renderings, the `FlowSink` control-plane
//! trait, and safe shell execution for the `ovs-ofctl` backend.

pub mod error;
pub mod flow;
pub mod ovs;
pub mod secrules;
pub mod shell;

pub use error::{FlowsyncError, Result};
pub use flow::Flow;
pub use ovs::{FlowSink, OvsOfctl};
pub use secrules::{
    port_range_to_masks, Action, Direction, Protocol, SecurityRule, SecurityRuleSet,
    DEFAULT_RULES_TEXT,
};
