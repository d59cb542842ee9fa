//! Guest state watcher and reconciliation driver.
//!
//! Classifies raw filesystem notifications into guest lifecycle events,
//! keeps the in-memory guest registry, and drives flow recomputation: full
//! batched passes at startup, on the periodic timer and on forced resync,
//! immediate per-event updates otherwise.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use flowsync_common::{FlowsyncError, Result};

use crate::agent::AgentServer;
use crate::batch::BatchScope;
use crate::config::HostConfig;
use crate::guest::{Guest, DESC_FILE, PID_FILE};
use crate::hostlocal::{HostLocal, HOST_LOCAL_OWNER};

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}$")
        .expect("Invalid regex pattern")
});

/// Whether `name` is a canonical lowercase guest uuid.
pub fn is_guest_id(name: &str) -> bool {
    UUID_RE.is_match(name)
}

/// Reduced filesystem change kind fed to the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Path created.
    Create,
    /// Path contents written.
    Write,
    /// Path removed.
    Remove,
}

/// Guest lifecycle transition derived from one filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// Guest directory appeared: register and compute flows.
    GuestAdded,
    /// Guest directory disappeared: drop the registry entry.
    GuestRemoved,
    /// Description or pid file written: recompute flows.
    GuestUpdated,
    /// Pid file removed: clear this guest's flows.
    GuestStopped,
}

/// Classified filesystem event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// The lifecycle transition.
    pub kind: WatchEventKind,
    /// Guest uuid.
    pub guest_id: String,
    /// Path to the guest directory.
    pub guest_path: PathBuf,
}

/// Maps one filesystem change to a guest lifecycle event.
///
/// Pure function over paths; requires no filesystem access. Anything that
/// is not a guest directory entry under `root` or a `desc`/`pid` file
/// inside one is ignored.
pub fn classify(root: &Path, path: &Path, kind: ChangeKind) -> Option<WatchEvent> {
    let file = path.file_name()?.to_str()?;
    let dir = path.parent()?;

    if is_guest_id(file) && dir == root {
        let kind = match kind {
            ChangeKind::Create => WatchEventKind::GuestAdded,
            ChangeKind::Remove => WatchEventKind::GuestRemoved,
            ChangeKind::Write => return None,
        };
        return Some(WatchEvent {
            kind,
            guest_id: file.to_string(),
            guest_path: path.to_path_buf(),
        });
    }

    if file == DESC_FILE || file == PID_FILE {
        let guest_id = dir.file_name()?.to_str()?;
        if !is_guest_id(guest_id) || dir.parent()? != root {
            return None;
        }
        let kind = match (file, kind) {
            (PID_FILE, ChangeKind::Remove) => WatchEventKind::GuestStopped,
            (DESC_FILE, ChangeKind::Write) => WatchEventKind::GuestUpdated,
            (PID_FILE, ChangeKind::Write) | (PID_FILE, ChangeKind::Create) => {
                WatchEventKind::GuestUpdated
            }
            _ => return None,
        };
        return Some(WatchEvent {
            kind,
            guest_id: guest_id.to_string(),
            guest_path: dir.to_path_buf(),
        });
    }

    None
}

fn change_kind(kind: &notify::EventKind) -> Option<ChangeKind> {
    match kind {
        notify::EventKind::Create(_) => Some(ChangeKind::Create),
        notify::EventKind::Modify(_) => Some(ChangeKind::Write),
        notify::EventKind::Remove(_) => Some(ChangeKind::Remove),
        _ => None,
    }
}

/// Filesystem event classifier, guest registry and reconciliation driver.
pub struct GuestWatcher {
    config: Arc<HostConfig>,
    agent: Arc<AgentServer>,
    guests: HashMap<String, Guest>,
    fs_watcher: Option<RecommendedWatcher>,
}

impl GuestWatcher {
    /// Creates the watcher; filesystem watches are armed inside `run`.
    pub fn new(config: Arc<HostConfig>, agent: Arc<AgentServer>) -> Self {
        Self {
            config,
            agent,
            guests: HashMap::new(),
            fs_watcher: None,
        }
    }

    fn watch_dir(&mut self, path: &Path) {
        if let Some(w) = self.fs_watcher.as_mut() {
            if let Err(e) = w.watch(path, RecursiveMode::NonRecursive) {
                error!(path = %path.display(), error = %e, "watch path failed");
            }
        }
    }

    fn unwatch_dir(&mut self, path: &Path) {
        if let Some(w) = self.fs_watcher.as_mut() {
            // already-removed paths routinely fail to unwatch
            let _ = w.unwatch(path);
        }
    }

    /// Recomputes and pushes one guest's flows.
    ///
    /// Failures are isolated: a desc read or rule parse error skips this
    /// guest for the pass and is retried on the next tick.
    pub async fn update_guest_flows(&mut self, guest_id: &str, mut batch: Option<&mut BatchScope>) {
        let agent = self.agent.clone();
        let Some(guest) = self.guests.get_mut(guest_id) else {
            warn!(guest = %guest_id, "update for unregistered guest");
            return;
        };
        if !guest.running() {
            debug!(guest = %guest_id, "guest is not running yet");
            return;
        }
        if let Err(e) = guest.load_desc() {
            error!(guest = %guest_id, error = %e, "load guest desc failed");
            return;
        }
        let flows_by_bridge = match guest.flows() {
            Ok(f) => f,
            Err(e) => {
                error!(guest = %guest_id, error = %e, "guest flow computation failed");
                return;
            }
        };
        let who = guest.who().to_string();
        for (bridge, flows) in flows_by_bridge {
            let flowman = agent.flowman(&bridge);
            if let Err(e) = flowman.update_flows(&who, flows, batch.as_deref_mut()).await {
                error!(guest = %who, bridge = %bridge, error = %e, "flow update failed");
            }
        }
    }

    /// Clears a stopped guest's owner-tagged flows on every bridge its
    /// NICs reference; the registry entry is kept.
    pub async fn clear_guest_flows(&self, guest: &Guest) {
        let mut bridges: Vec<&str> = guest.nics.iter().map(|n| n.bridge.as_str()).collect();
        bridges.sort_unstable();
        bridges.dedup();
        for bridge in bridges {
            let flowman = self.agent.flowman(bridge);
            if let Err(e) = flowman.update_flows(guest.who(), Vec::new(), None).await {
                error!(guest = %guest.id, bridge = %bridge, error = %e, "flow clear failed");
            }
        }
    }

    /// Recomputes host-local flows for every configured bridge binding.
    async fn update_host_local_flows(&self, batch: &mut BatchScope) {
        for net in &self.config.networks {
            let hostlocal = match HostLocal::from_config(&self.config, net) {
                Ok(h) => h,
                Err(e) => {
                    error!(bridge = %net.bridge, error = %e, "host-local preparation failed");
                    continue;
                }
            };
            let flows = match hostlocal.flows() {
                Ok(f) => f,
                Err(e) => {
                    error!(bridge = %net.bridge, error = %e, "host-local flows failed");
                    continue;
                }
            };
            let flowman = self.agent.flowman(&net.bridge);
            if let Err(e) = flowman
                .update_flows(HOST_LOCAL_OWNER, flows, Some(batch))
                .await
            {
                error!(bridge = %net.bridge, error = %e, "host-local flow update failed");
            }
        }
    }

    /// Scans the servers root, registering every valid guest directory and
    /// recomputing its flows within the given batch scope.
    async fn scan(&mut self, batch: &mut BatchScope) {
        let servers_path = self.config.servers_path.clone();
        let entries = match std::fs::read_dir(&servers_path) {
            Ok(e) => e,
            Err(e) => {
                error!(path = %servers_path.display(), error = %e, "scan servers path failed");
                return;
            }
        };
        let mut found = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_guest_id(name) {
                continue;
            }
            if !entry.path().is_dir() {
                continue;
            }
            let path = entry.path();
            self.watch_dir(&path);
            self.guests
                .entry(name.to_string())
                .or_insert_with(|| Guest::new(name, &path));
            found.push(name.to_string());
        }
        for guest_id in found {
            self.update_guest_flows(&guest_id, Some(&mut *batch)).await;
        }
    }

    /// One full self-healing reconciliation pass: host-local flows plus a
    /// complete guest scan, with exactly one commit per touched bridge.
    pub async fn resync(&mut self) {
        let mut scope = BatchScope::new();
        self.update_host_local_flows(&mut scope).await;
        self.scan(&mut scope).await;
        self.close_batch(scope).await;
    }

    async fn close_batch(&self, scope: BatchScope) {
        for (bridge, count) in scope.into_touched() {
            let flowman = self.agent.flowman(&bridge);
            if let Err(e) = flowman.finish_batch(count).await {
                error!(bridge = %bridge, error = %e, "batch commit failed");
            }
        }
    }

    /// Applies one classified event; single events commit immediately.
    pub async fn handle_event(&mut self, event: WatchEvent) {
        match event.kind {
            WatchEventKind::GuestAdded => {
                info!(guest = %event.guest_id, "guest directory added");
                self.watch_dir(&event.guest_path);
                self.guests
                    .entry(event.guest_id.clone())
                    .or_insert_with(|| Guest::new(&event.guest_id, &event.guest_path));
                self.update_guest_flows(&event.guest_id, None).await;
            }
            WatchEventKind::GuestRemoved => {
                info!(guest = %event.guest_id, "guest directory removed");
                self.unwatch_dir(&event.guest_path);
                self.guests.remove(&event.guest_id);
            }
            WatchEventKind::GuestUpdated => {
                if self.guests.contains_key(&event.guest_id) {
                    self.update_guest_flows(&event.guest_id, None).await;
                } else {
                    warn!(guest = %event.guest_id, "unexpected guest update event");
                }
            }
            WatchEventKind::GuestStopped => {
                if let Some(guest) = self.guests.get(&event.guest_id) {
                    info!(guest = %event.guest_id, "clearing stopped guest flows");
                    let guest = guest.clone();
                    self.clear_guest_flows(&guest).await;
                } else {
                    warn!(guest = %event.guest_id, "unexpected guest stop event");
                }
            }
        }
    }

    async fn handle_notify_event(&mut self, event: notify::Event) {
        let Some(kind) = change_kind(&event.kind) else {
            debug!(?event, "filesystem event ignored");
            return;
        };
        for path in &event.paths {
            match classify(&self.config.servers_path, path, kind) {
                Some(wev) => self.handle_event(wev).await,
                None => debug!(path = %path.display(), "filesystem event ignored"),
            }
        }
    }

    /// Runs the reconciliation driver until cancelled.
    ///
    /// Performs the startup pass, then multiplexes filesystem events, the
    /// periodic self-healing timer and forced-resync requests. A failure
    /// of the watch mechanism itself is returned as a fatal error; the
    /// composition root decides whether to retry or terminate.
    pub async fn run(mut self, resync: Arc<Notify>, shutdown: CancellationToken) -> Result<()> {
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut fs_watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| {
                let _ = tx.send(res);
            },
        )
        .map_err(|e| FlowsyncError::WatchFailed(e.to_string()))?;
        fs_watcher
            .watch(&self.config.servers_path, RecursiveMode::NonRecursive)
            .map_err(|e| FlowsyncError::WatchFailed(e.to_string()))?;
        self.fs_watcher = Some(fs_watcher);

        info!(path = %self.config.servers_path.display(), "watching servers root");
        self.resync().await;

        let period = self.config.refresh_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("watcher shutting down");
                    return Ok(());
                }
                received = events.recv() => match received {
                    Some(Ok(event)) => self.handle_notify_event(event).await,
                    Some(Err(e)) => {
                        return Err(FlowsyncError::WatchFailed(e.to_string()));
                    }
                    None => {
                        return Err(FlowsyncError::WatchFailed(
                            "event channel closed".to_string(),
                        ));
                    }
                },
                _ = ticker.tick() => {
                    debug!("periodic refresh");
                    self.resync().await;
                }
                _ = resync.notified() => {
                    info!("forced resync");
                    self.resync().await;
                }
            }
        }
    }

    /// Registered guest ids, for inspection.
    pub fn guest_ids(&self) -> Vec<String> {
        self.guests.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "/srv/servers";
    const GUEST: &str = "8d3b1f2a-4c5d-6e7f-8901-234567890abc";

    fn root() -> PathBuf {
        PathBuf::from(ROOT)
    }

    fn guest_dir() -> PathBuf {
        root().join(GUEST)
    }

    #[test]
    fn test_is_guest_id() {
        assert!(is_guest_id(GUEST));
        assert!(!is_guest_id("8D3B1F2A-4C5D-6E7F-8901-234567890ABC"));
        assert!(!is_guest_id("not-a-uuid"));
        assert!(!is_guest_id(""));
        assert!(!is_guest_id("8d3b1f2a-4c5d-6e7f-8901-234567890abcd"));
    }

    #[test]
    fn test_classify_guest_dir_created() {
        let ev = classify(&root(), &guest_dir(), ChangeKind::Create).unwrap();
        assert_eq!(ev.kind, WatchEventKind::GuestAdded);
        assert_eq!(ev.guest_id, GUEST);
        assert_eq!(ev.guest_path, guest_dir());
    }

    #[test]
    fn test_classify_guest_dir_removed() {
        let ev = classify(&root(), &guest_dir(), ChangeKind::Remove).unwrap();
        assert_eq!(ev.kind, WatchEventKind::GuestRemoved);
    }

    #[test]
    fn test_classify_desc_written() {
        let ev = classify(&root(), &guest_dir().join("desc"), ChangeKind::Write).unwrap();
        assert_eq!(ev.kind, WatchEventKind::GuestUpdated);
        assert_eq!(ev.guest_path, guest_dir());
    }

    #[test]
    fn test_classify_pid_written_and_removed() {
        let ev = classify(&root(), &guest_dir().join("pid"), ChangeKind::Write).unwrap();
        assert_eq!(ev.kind, WatchEventKind::GuestUpdated);

        let ev = classify(&root(), &guest_dir().join("pid"), ChangeKind::Create).unwrap();
        assert_eq!(ev.kind, WatchEventKind::GuestUpdated);

        let ev = classify(&root(), &guest_dir().join("pid"), ChangeKind::Remove).unwrap();
        assert_eq!(ev.kind, WatchEventKind::GuestStopped);
    }

    #[test]
    fn test_classify_ignores_noise() {
        // non-uuid directory at root
        assert!(classify(&root(), &root().join("lost+found"), ChangeKind::Create).is_none());
        // uuid dir write
        assert!(classify(&root(), &guest_dir(), ChangeKind::Write).is_none());
        // desc removal is not a transition
        assert!(classify(&root(), &guest_dir().join("desc"), ChangeKind::Remove).is_none());
        // unrelated file inside guest dir
        assert!(classify(&root(), &guest_dir().join("console.log"), ChangeKind::Write).is_none());
        // desc under a non-uuid directory
        assert!(
            classify(&root(), &root().join("backup").join("desc"), ChangeKind::Write).is_none()
        );
        // desc nested too deep
        assert!(classify(
            &root(),
            &root().join("x").join(GUEST).join("desc"),
            ChangeKind::Write
        )
        .is_none());
    }
}
