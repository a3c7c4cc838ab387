//! The reconciler / deployer (`spec.md` §4.6).
//!
//! `check()` and `deploy()` both run guard → compile → fetch →
//! check-interfaces → diff; `deploy()` alone continues into apply. Per-host
//! work runs concurrently across hosts via `tokio::task::JoinSet`, matching
//! `spec.md` §5, but apply is two-phase: every host that needs a change is
//! delivered to, as one barrier, before any host is applied, so a slow or
//! failing deliver on one host can never race ahead of another host's apply.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::compiler::{self, ChainSet, CompiledRuleset};
use crate::error::FwError;
use crate::fleet::{HostState, RemoteExec};
use crate::model::{Host, Model};
use crate::repository::Repository;
use crate::resolver::Resolver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOutcome {
    /// Live ruleset already matches the compiled one; nothing to do.
    UpToDate,
    /// Live ruleset differs from the compiled one. `added`/`removed` are the
    /// flattened-ruleset diff (`spec.md` §4.6 step 5): lines the compiled
    /// ruleset has that the live one doesn't, and vice versa.
    Outdated { added: Vec<String>, removed: Vec<String> },
    /// Delivered and applied a new ruleset.
    Applied,
    /// A live interface address doesn't match what the model declares, or
    /// the model's interface is absent from the fetched addressing entirely.
    InterfaceMismatch { iface: String, expected: String, got: String },
    Unreachable,
    ApplyFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployWarning {
    /// A hostname the fleet reports that the model never declared. Left
    /// untouched — never deleted or treated as an error (`spec.md` §9 Open
    /// Question (b)).
    UnmanagedHost(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub outcomes: BTreeMap<String, HostOutcome>,
    pub warnings: Vec<DeployWarning>,
}

impl DeployReport {
    pub fn is_up_to_date(&self) -> bool {
        self.outcomes.values().all(|o| *o == HostOutcome::UpToDate)
    }
}

struct PlannedHost {
    wanted: ChainSet,
    outcome: HostOutcome,
}

pub struct Deployer {
    fleet: Arc<dyn RemoteExec>,
    phase_timeout: Duration,
}

impl Deployer {
    pub fn new(fleet: Arc<dyn RemoteExec>, phase_timeout: Duration) -> Self {
        Deployer { fleet, phase_timeout }
    }

    /// Compiles, fetches live state, checks interfaces, and diffs — never
    /// applies. Used for a dry run ("what would deploy do").
    pub async fn check(&self, model: &Model) -> Result<DeployReport, FwError> {
        let (planned, warnings) = self.plan(model).await?;
        let outcomes = planned.into_iter().map(|(host, p)| (host, p.outcome)).collect();
        Ok(DeployReport { outcomes, warnings })
    }

    /// Guards on a clean repository, then runs the full
    /// compile/fetch/check-interfaces/diff/apply pipeline. An interface
    /// mismatch on any host is fatal for the whole deploy (`spec.md` §7:
    /// "interface-mismatch is fatal for deploy but surfaced for check").
    pub async fn deploy(&self, repo: &dyn Repository, model: &Model) -> Result<DeployReport, FwError> {
        if repo.save_needed()? {
            tracing::warn!("deploy refused: repository has unsaved changes");
            return Err(FwError::SaveRequired { operation: "deploy" });
        }

        let (planned, warnings) = self.plan(model).await?;

        if let Some((host, HostOutcome::InterfaceMismatch { iface, expected, got })) = planned
            .iter()
            .find(|(_, p)| matches!(p.outcome, HostOutcome::InterfaceMismatch { .. }))
            .map(|(h, p)| (h.clone(), p.outcome.clone()))
        {
            tracing::error!(%host, %iface, %expected, %got, "interface mismatch, refusing to deploy");
            return Err(FwError::InterfaceMismatch { host, iface, expected, got });
        }

        tracing::info!(hosts = planned.len(), "applying compiled ruleset to fleet");

        // Two-phase apply (`spec.md` §4.6: "deliver is issued to all hosts
        // before any apply"): every host that needs a change is delivered to
        // first, as one barrier, before any host moves on to apply.
        let mut outcomes = BTreeMap::new();
        let mut deliver_tasks = JoinSet::new();
        for (host, planned_host) in &planned {
            if planned_host.outcome == HostOutcome::UpToDate {
                outcomes.insert(host.clone(), HostOutcome::UpToDate);
                continue;
            }

            let fleet = Arc::clone(&self.fleet);
            let timeout = self.phase_timeout;
            let wanted = planned_host.wanted.clone();
            let host = host.clone();
            deliver_tasks.spawn(async move {
                let result = deliver_one(fleet, &host, wanted, timeout).await;
                (host, result)
            });
        }

        let mut ready_to_apply = Vec::new();
        while let Some(joined) = deliver_tasks.join_next().await {
            let (host, result) = joined.map_err(|e| FwError::bad_data("deploy", format!("task panicked: {e}")))?;
            match result {
                Ok(()) => ready_to_apply.push(host),
                Err(outcome) => {
                    outcomes.insert(host, outcome);
                }
            }
        }

        let mut apply_tasks = JoinSet::new();
        for host in ready_to_apply {
            let fleet = Arc::clone(&self.fleet);
            let timeout = self.phase_timeout;
            apply_tasks.spawn(async move {
                let outcome = apply_one(fleet, &host, timeout).await;
                (host, outcome)
            });
        }

        while let Some(joined) = apply_tasks.join_next().await {
            let (host, outcome) = joined.map_err(|e| FwError::bad_data("deploy", format!("task panicked: {e}")))?;
            outcomes.insert(host, outcome);
        }

        Ok(DeployReport { outcomes, warnings })
    }

    /// Compiles the model, fetches live state, checks interfaces, and
    /// classifies every declared host. Also computes the unmanaged-host
    /// warnings.
    async fn plan(&self, model: &Model) -> Result<(BTreeMap<String, PlannedHost>, Vec<DeployWarning>), FwError> {
        let resolver = Resolver::build(model)?;
        let compiled: CompiledRuleset = compiler::compile(model, &resolver)?;

        let mut rows_by_hostname: BTreeMap<String, Vec<&Host>> = BTreeMap::new();
        for host in model.hosts.iter() {
            rows_by_hostname.entry(host.hostname.clone()).or_default().push(host);
        }

        // `spec.md` §4.6 step 3: every declared host must have at least one
        // management-flagged interface before the fleet is ever contacted.
        let mut mgmt_map: BTreeMap<String, Vec<Ipv4Addr>> = BTreeMap::new();
        for (hostname, rows) in &rows_by_hostname {
            let addrs: Vec<Ipv4Addr> = rows.iter().filter(|r| r.mng).map(|r| r.ip_addr).collect();
            if addrs.is_empty() {
                tracing::error!(%hostname, "host has no management-flagged interface");
                return Err(FwError::MissingManagement { hostname: hostname.clone() });
            }
            mgmt_map.insert(hostname.clone(), addrs);
        }

        let hostnames: Vec<String> = mgmt_map.keys().cloned().collect();
        let fetched = self.fleet.fetch(&hostnames).await;

        let mut planned = BTreeMap::new();
        for (hostname, wanted) in compiled {
            let live = match fetched.get(&hostname) {
                Some(Ok(state)) => Some(state.clone()),
                Some(Err(_)) | None => None,
            };
            let rows = rows_by_hostname.get(hostname.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            let outcome = classify(rows, &wanted, live.as_ref());
            planned.insert(hostname, PlannedHost { wanted, outcome });
        }

        let known = self.fleet.list_hosts().await?;
        let warnings: Vec<_> = known
            .into_iter()
            .filter(|h| !planned.contains_key(h))
            .map(DeployWarning::UnmanagedHost)
            .collect();
        for warning in &warnings {
            let DeployWarning::UnmanagedHost(host) = warning;
            tracing::warn!(%host, "fleet reports a host the model doesn't declare");
        }

        Ok((planned, warnings))
    }
}

fn flatten(chains: &ChainSet) -> Vec<String> {
    chains.input.iter().chain(chains.output.iter()).chain(chains.forward.iter()).cloned().collect()
}

/// `spec.md` §4.6 steps 4–5: check every declared interface against the
/// fetched addressing, then diff the flattened ruleset. A model interface
/// that's simply absent from the live addressing is as much a mismatch as
/// one with the wrong address — `spec.md` §4.6 step 4 requires the iface to
/// "appear in the fetched interface addressing for that hostname" at all.
fn classify(rows: &[&Host], wanted: &ChainSet, live: Option<&HostState>) -> HostOutcome {
    let Some(state) = live else {
        return HostOutcome::Unreachable;
    };

    for row in rows {
        match state.interfaces.get(&row.iface) {
            Some(got) if *got == row.ip_addr => {}
            Some(got) => {
                return HostOutcome::InterfaceMismatch {
                    iface: row.iface.clone(),
                    expected: row.ip_addr.to_string(),
                    got: got.to_string(),
                };
            }
            None => {
                return HostOutcome::InterfaceMismatch {
                    iface: row.iface.clone(),
                    expected: row.ip_addr.to_string(),
                    got: "absent".to_string(),
                };
            }
        }

        // Per-(host, iface) projection from `compiler::ruleset_for_interface`
        // (`spec.md` §4.4.2), surfaced here purely for the reconciliation
        // log; the authoritative diff below compares the full flattened
        // ruleset, since `spec.md` §4.4.2 itself calls the per-interface view
        // a secondary projection, not the authoritative compile result.
        let iface_rules = compiler::ruleset_for_interface(wanted, &row.ip_addr.to_string());
        tracing::debug!(iface = %row.iface, addr = %row.ip_addr, rules = iface_rules.len(), "interface-scoped ruleset");
    }

    let new_flat = flatten(wanted);
    let live_flat = flatten(&state.active_rules);

    let added: Vec<String> = new_flat.iter().filter(|line| !live_flat.contains(line)).cloned().collect();
    let removed: Vec<String> = live_flat.iter().filter(|line| !new_flat.contains(line)).cloned().collect();

    if added.is_empty() && removed.is_empty() {
        HostOutcome::UpToDate
    } else {
        HostOutcome::Outdated { added, removed }
    }
}

/// Phase one of the two-phase apply: stage `wanted` on `host` without
/// activating it. Returns the terminal outcome directly when delivery
/// itself fails, so the caller never attempts phase two for this host.
async fn deliver_one(fleet: Arc<dyn RemoteExec>, host: &str, wanted: ChainSet, timeout: Duration) -> Result<(), HostOutcome> {
    match tokio::time::timeout(timeout, fleet.deliver(host, &wanted)).await {
        Err(_) => {
            tracing::warn!(%host, "deliver timed out");
            Err(HostOutcome::ApplyFailed("deliver timed out".to_string()))
        }
        Ok(Err(FwError::Unreachable { .. })) => {
            tracing::warn!(%host, "unreachable while delivering ruleset");
            Err(HostOutcome::Unreachable)
        }
        Ok(Err(e)) => {
            tracing::warn!(%host, error = %e, "failed to deliver ruleset");
            Err(HostOutcome::ApplyFailed(e.to_string()))
        }
        Ok(Ok(())) => Ok(()),
    }
}

/// Phase two of the two-phase apply: activate whatever was staged in phase
/// one. Only called for hosts that survived `deliver_one`.
async fn apply_one(fleet: Arc<dyn RemoteExec>, host: &str, timeout: Duration) -> HostOutcome {
    let outcome = match tokio::time::timeout(timeout, fleet.apply(host)).await {
        Err(_) => HostOutcome::ApplyFailed("apply timed out".to_string()),
        Ok(Err(FwError::Unreachable { .. })) => HostOutcome::Unreachable,
        Ok(Err(e)) => HostOutcome::ApplyFailed(e.to_string()),
        Ok(Ok(())) => HostOutcome::Applied,
    };
    tracing::debug!(%host, ?outcome, "applied ruleset");
    outcome
}
