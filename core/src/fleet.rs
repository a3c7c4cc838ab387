//! The fleet client capability (`spec.md` §4.5).
//!
//! The deployer never opens a remote connection itself; it only calls
//! [`RemoteExec::fetch`], [`RemoteExec::deliver`], and [`RemoteExec::apply`]
//! in that order. The real transport (SSH session pooling, command
//! execution) is out of scope here, same as the repository is in
//! `repository.rs` — this module only owns the trait boundary and a
//! demo/test implementation.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::compiler::ChainSet;
use crate::error::FwError;

/// What `fetch` reports back for one host: the live interface addresses
/// (used for the deployer's interface-mismatch check) and whatever ruleset
/// is currently active (used for the diff).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostState {
    pub interfaces: HashMap<String, Ipv4Addr>,
    pub active_rules: ChainSet,
}

/// A capability for talking to the fleet. `fetch`/`deliver`/`apply` each
/// return one `Result` per requested host so a single unreachable host
/// doesn't poison the whole batch (`spec.md` §4.5, §7: "deploy errors are
/// per-host and collected into a composite result").
#[async_trait]
pub trait RemoteExec: Send + Sync {
    async fn fetch(&self, hosts: &[String]) -> HashMap<String, Result<HostState, FwError>>;

    /// Writes `ruleset` to `host` without activating it.
    async fn deliver(&self, host: &str, ruleset: &ChainSet) -> Result<(), FwError>;

    /// Activates whatever was last delivered to `host`.
    async fn apply(&self, host: &str) -> Result<(), FwError>;

    /// Every hostname the fleet currently knows about, independent of the
    /// model — lets the deployer flag a live host the model never declared
    /// (`core::deploy`'s unmanaged-host warning) without guessing from the
    /// model's own host list.
    async fn list_hosts(&self) -> Result<Vec<String>, FwError>;
}

/// An in-memory fleet, grounded on the original's `DemoGitFireSet`: no
/// connection is opened, hosts live in a `Mutex`-guarded map, and
/// reachability is simulated by listing hostnames as unreachable up front.
/// Used by the CLI's `--demo` flag and by this crate's own tests.
pub struct MockFleet {
    state: Mutex<HashMap<String, HostState>>,
    staged: Mutex<HashMap<String, ChainSet>>,
    unreachable: Mutex<HashSet<String>>,
}

impl MockFleet {
    pub fn new() -> Self {
        MockFleet {
            state: Mutex::new(HashMap::new()),
            staged: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(HashSet::new()),
        }
    }

    pub fn seed(&self, host: &str, state: HostState) {
        self.state.lock().unwrap().insert(host.to_string(), state);
    }

    pub fn mark_unreachable(&self, host: &str) {
        self.unreachable.lock().unwrap().insert(host.to_string());
    }

    pub fn applied_rules(&self, host: &str) -> Option<ChainSet> {
        self.state.lock().unwrap().get(host).map(|s| s.active_rules.clone())
    }
}

impl Default for MockFleet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteExec for MockFleet {
    async fn fetch(&self, hosts: &[String]) -> HashMap<String, Result<HostState, FwError>> {
        let unreachable = self.unreachable.lock().unwrap();
        let state = self.state.lock().unwrap();
        hosts
            .iter()
            .map(|host| {
                // A host nobody ever `seed`ed is indistinguishable from one
                // that never answered: both surface as `Unreachable`.
                let result = if unreachable.contains(host) {
                    Err(FwError::Unreachable { host: host.clone() })
                } else {
                    state.get(host).cloned().ok_or_else(|| FwError::Unreachable { host: host.clone() })
                };
                (host.clone(), result)
            })
            .collect()
    }

    async fn deliver(&self, host: &str, ruleset: &ChainSet) -> Result<(), FwError> {
        if self.unreachable.lock().unwrap().contains(host) {
            return Err(FwError::Unreachable { host: host.to_string() });
        }
        self.staged.lock().unwrap().insert(host.to_string(), ruleset.clone());
        Ok(())
    }

    async fn apply(&self, host: &str) -> Result<(), FwError> {
        if self.unreachable.lock().unwrap().contains(host) {
            return Err(FwError::Unreachable { host: host.to_string() });
        }
        let staged = self.staged.lock().unwrap().remove(host).ok_or_else(|| {
            FwError::ApplyFailed { host: host.to_string(), message: "nothing staged to apply".to_string() }
        })?;
        self.state.lock().unwrap().entry(host.to_string()).or_default().active_rules = staged;
        Ok(())
    }

    async fn list_hosts(&self) -> Result<Vec<String>, FwError> {
        Ok(self.state.lock().unwrap().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deliver_then_apply_updates_active_rules() {
        let fleet = MockFleet::new();
        let ruleset = ChainSet { input: vec!["-j DROP".to_string()], ..Default::default() };

        fleet.deliver("web1", &ruleset).await.unwrap();
        assert!(fleet.applied_rules("web1").is_none());

        fleet.apply("web1").await.unwrap();
        assert_eq!(fleet.applied_rules("web1"), Some(ruleset));
    }

    #[tokio::test]
    async fn unreachable_host_fails_every_phase() {
        let fleet = MockFleet::new();
        fleet.mark_unreachable("ghost");

        let fetched = fleet.fetch(&["ghost".to_string()]).await;
        assert!(matches!(fetched["ghost"], Err(FwError::Unreachable { .. })));
        assert!(fleet.deliver("ghost", &ChainSet::default()).await.is_err());
        assert!(fleet.apply("ghost").await.is_err());
    }

    #[tokio::test]
    async fn apply_without_deliver_is_apply_failed() {
        let fleet = MockFleet::new();
        let err = fleet.apply("web1").await.unwrap_err();
        assert!(matches!(err, FwError::ApplyFailed { .. }));
    }
}
