//! End-to-end reconciliation tests against an on-disk guest layout and a
//! recording flow sink.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use flowsync_common::{Flow, FlowSink, Result};
use flowsyncd::{
    AgentServer, GuestWatcher, HostConfig, HostNetwork, WatchEvent, WatchEventKind, DESC_FILE,
    PID_FILE,
};

const GUEST_A: &str = "11111111-2222-3333-4444-555555555555";
const GUEST_B: &str = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee";
const MAC_A: &str = "52:54:00:00:00:0a";
const MAC_B: &str = "52:54:00:00:00:0b";

/// Records every sink invocation; each `add_flows` call is one commit.
#[derive(Default)]
struct RecordingSink {
    adds: Mutex<Vec<(String, Vec<Flow>)>>,
    dels: Mutex<Vec<(String, Vec<Flow>)>>,
}

impl RecordingSink {
    fn commits_for(&self, bridge: &str) -> usize {
        self.adds.lock().iter().filter(|(b, _)| b == bridge).count()
    }
}

#[async_trait]
impl FlowSink for RecordingSink {
    async fn add_flows(&self, bridge: &str, flows: &[Flow]) -> Result<()> {
        self.adds.lock().push((bridge.to_string(), flows.to_vec()));
        Ok(())
    }

    async fn del_flows(&self, bridge: &str, flows: &[Flow]) -> Result<()> {
        self.dels.lock().push((bridge.to_string(), flows.to_vec()));
        Ok(())
    }
}

fn write_guest(root: &Path, id: &str, mac: &str, running: bool) {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    let desc = format!(
        r#"{{"nics": [{{"bridge": "br0", "mac": "{}", "ip": "10.168.0.2",
            "security_rules": "in:allow tcp 22; out:allow any"}}]}}"#,
        mac
    );
    fs::write(dir.join(DESC_FILE), desc).unwrap();
    if running {
        fs::write(dir.join(PID_FILE), "4242\n").unwrap();
    }
}

fn setup(
    root: &Path,
    networks: Vec<HostNetwork>,
) -> (Arc<RecordingSink>, Arc<AgentServer>, GuestWatcher) {
    let config = Arc::new(HostConfig {
        servers_path: root.to_path_buf(),
        networks,
        master_ip: Some("192.168.1.10".parse().unwrap()),
        master_mac: Some("52:54:00:aa:bb:cc".to_string()),
        cluster_cidr: Some("10.43.0.0/16".parse().unwrap()),
        ..HostConfig::default()
    });
    let sink = Arc::new(RecordingSink::default());
    let sink_dyn: Arc<dyn FlowSink> = sink.clone();
    let agent = Arc::new(AgentServer::new(sink_dyn));
    let watcher = GuestWatcher::new(config, agent.clone());
    (sink, agent, watcher)
}

fn added_event(root: &Path, id: &str) -> WatchEvent {
    WatchEvent {
        kind: WatchEventKind::GuestAdded,
        guest_id: id.to_string(),
        guest_path: root.join(id),
    }
}

#[tokio::test]
async fn shared_bridge_pass_commits_once() {
    let tmp = tempfile::tempdir().unwrap();
    write_guest(tmp.path(), GUEST_A, MAC_A, true);
    write_guest(tmp.path(), GUEST_B, MAC_B, true);

    let (sink, agent, mut watcher) = setup(tmp.path(), Vec::new());
    watcher.resync().await;

    assert_eq!(sink.commits_for("br0"), 1);

    let committed = agent.flowman("br0").committed_flows().await;
    assert!(committed.iter().any(|f| f.matches.contains(MAC_A)));
    assert!(committed.iter().any(|f| f.matches.contains(MAC_B)));
}

#[tokio::test]
async fn host_local_and_guests_share_one_commit() {
    let tmp = tempfile::tempdir().unwrap();
    write_guest(tmp.path(), GUEST_A, MAC_A, true);

    let networks = vec![HostNetwork {
        bridge: "br0".to_string(),
        ifname: "eth0".to_string(),
    }];
    let (sink, agent, mut watcher) = setup(tmp.path(), networks);
    watcher.resync().await;

    assert_eq!(sink.commits_for("br0"), 1);

    let committed = agent.flowman("br0").committed_flows().await;
    assert!(committed.iter().any(|f| f.matches.contains("169.254.169.254")));
    assert!(committed.iter().any(|f| f.matches.contains(MAC_A)));
}

#[tokio::test]
async fn guest_added_event_commits_immediately() {
    let tmp = tempfile::tempdir().unwrap();
    write_guest(tmp.path(), GUEST_A, MAC_A, true);

    let (sink, _agent, mut watcher) = setup(tmp.path(), Vec::new());
    watcher.handle_event(added_event(tmp.path(), GUEST_A)).await;

    // single event, single commit
    assert_eq!(sink.commits_for("br0"), 1);
    assert_eq!(watcher.guest_ids(), vec![GUEST_A.to_string()]);
}

#[tokio::test]
async fn pid_removal_clears_only_that_guest() {
    let tmp = tempfile::tempdir().unwrap();
    write_guest(tmp.path(), GUEST_A, MAC_A, true);
    write_guest(tmp.path(), GUEST_B, MAC_B, true);

    let (_sink, agent, mut watcher) = setup(tmp.path(), Vec::new());
    watcher.resync().await;

    fs::remove_file(tmp.path().join(GUEST_A).join(PID_FILE)).unwrap();
    watcher
        .handle_event(WatchEvent {
            kind: WatchEventKind::GuestStopped,
            guest_id: GUEST_A.to_string(),
            guest_path: tmp.path().join(GUEST_A),
        })
        .await;

    let committed = agent.flowman("br0").committed_flows().await;
    assert!(!committed.iter().any(|f| f.matches.contains(MAC_A)));
    assert!(committed.iter().any(|f| f.matches.contains(MAC_B)));
    // registry entry is kept after a stop
    assert!(watcher.guest_ids().contains(&GUEST_A.to_string()));
}

#[tokio::test]
async fn stopped_guest_is_skipped_on_refresh() {
    let tmp = tempfile::tempdir().unwrap();
    write_guest(tmp.path(), GUEST_A, MAC_A, false);

    let (sink, _agent, mut watcher) = setup(tmp.path(), Vec::new());
    watcher.resync().await;

    // guest not running: no flows pushed, no commit for its bridge
    assert_eq!(sink.commits_for("br0"), 0);
    assert!(watcher.guest_ids().contains(&GUEST_A.to_string()));
}

#[tokio::test]
async fn directory_removal_keeps_flows_until_stopped() {
    // Removing the guest directory drops the registry entry but does not
    // tear down flows; only pid removal does. The periodic pass recomputes
    // registered guests, so a vanished directory leaves its last committed
    // flows in place.
    let tmp = tempfile::tempdir().unwrap();
    write_guest(tmp.path(), GUEST_A, MAC_A, true);

    let (_sink, agent, mut watcher) = setup(tmp.path(), Vec::new());
    watcher.resync().await;

    fs::remove_dir_all(tmp.path().join(GUEST_A)).unwrap();
    watcher
        .handle_event(WatchEvent {
            kind: WatchEventKind::GuestRemoved,
            guest_id: GUEST_A.to_string(),
            guest_path: tmp.path().join(GUEST_A),
        })
        .await;

    assert!(watcher.guest_ids().is_empty());
    let committed = agent.flowman("br0").committed_flows().await;
    assert!(committed.iter().any(|f| f.matches.contains(MAC_A)));
}

#[tokio::test]
async fn malformed_rules_skip_guest_but_not_pass() {
    let tmp = tempfile::tempdir().unwrap();
    write_guest(tmp.path(), GUEST_B, MAC_B, true);

    // guest A carries bogus rule text
    let dir = tmp.path().join(GUEST_A);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join(DESC_FILE),
        format!(
            r#"{{"nics": [{{"bridge": "br0", "mac": "{}", "ip": "10.168.0.3",
                "security_rules": "in:permit gopher"}}]}}"#,
            MAC_A
        ),
    )
    .unwrap();
    fs::write(dir.join(PID_FILE), "77\n").unwrap();

    let (_sink, agent, mut watcher) = setup(tmp.path(), Vec::new());
    watcher.resync().await;

    let committed = agent.flowman("br0").committed_flows().await;
    assert!(!committed.iter().any(|f| f.matches.contains(MAC_A)));
    assert!(committed.iter().any(|f| f.matches.contains(MAC_B)));
}

#[tokio::test]
async fn refresh_heals_desc_changes() {
    let tmp = tempfile::tempdir().unwrap();
    write_guest(tmp.path(), GUEST_A, MAC_A, true);

    let (_sink, agent, mut watcher) = setup(tmp.path(), Vec::new());
    watcher.resync().await;

    // rewrite the description onto another bridge
    let desc = format!(
        r#"{{"nics": [{{"bridge": "br1", "mac": "{}", "ip": "10.168.0.2"}}]}}"#,
        MAC_A
    );
    fs::write(tmp.path().join(GUEST_A).join(DESC_FILE), desc).unwrap();
    watcher.resync().await;

    let br1 = agent.flowman("br1").committed_flows().await;
    assert!(br1.iter().any(|f| f.matches.contains(MAC_A)));
}
