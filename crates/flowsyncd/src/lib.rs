//! flowsyncd - OVS flow synchronization agent
//!
//! Keeps the host's Open vSwitch flow tables consistent with the set of
//! guests the host currently runs. Guest lifecycle is observed through the
//! servers directory (one directory per guest with `desc` and `pid` files);
//! each guest's security rules are compiled to OVS match predicates and
//! pushed per bridge, with batched commits during full reconciliation
//! passes.

pub mod agent;
pub mod batch;
pub mod config;
pub mod ctl;
pub mod flowman;
pub mod guest;
pub mod hostlocal;
pub mod watcher;

pub use agent::AgentServer;
pub use batch::BatchScope;
pub use config::{HostConfig, HostNetwork};
pub use ctl::{run_control, CMD_SYNC_FLOWS};
pub use flowman::FlowMan;
pub use guest::{Guest, GuestNic, DESC_FILE, PID_FILE};
pub use hostlocal::{HostLocal, HOST_LOCAL_OWNER};
pub use watcher::{classify, ChangeKind, GuestWatcher, WatchEvent, WatchEventKind};
