//! End-to-end scenarios S1–S6 (`spec.md` §8): load a full on-disk snapshot
//! through a `Repository`, then drive it through resolution, compilation,
//! and deployment exactly as the CLI would.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use fleetwall_core::{
    ChainSet, DeployWarning, Deployer, FwError, HostOutcome, HostState, InMemoryRepository, MockFleet, Model,
    RemoteExec, Repository, Resolver,
};

fn seed_basic_fleet() -> InMemoryRepository {
    let repo = InMemoryRepository::new();
    repo.seed(
        "hosts",
        "fw eth0 10.0.0.1 24 1 1 1 wan\n\
         webserver eth0 10.0.0.10 24 1 0 1\n\
         alice eth0 10.0.0.20 24 1 0 1\n\
         bob eth0 10.0.0.21 24 1 0 1\n",
    );
    repo.seed(
        "networks",
        "lan 10.0.0.0 24\n\
         wan 203.0.113.0 24\n",
    );
    repo.seed("hostgroups", "admins alice:eth0 bob:eth0\n");
    repo.seed(
        "services",
        "icmp ip -\n\
         ssh tcp 22\n",
    );
    repo.seed(
        "rules",
        "1 allow_ping * * webserver:eth0 icmp ACCEPT 0 let pings through\n\
         1 admin_ssh admins * webserver:eth0 ssh ACCEPT 0 admin access\n",
    );
    repo
}

/// S1: a wildcard-source rule is emitted on every host's INPUT chain, and
/// hosts that aren't firewalling forwarded traffic still get a bare DROP in
/// FORWARD.
#[test]
fn s1_wildcard_source_rule_reaches_every_host_input_chain() {
    let repo = seed_basic_fleet();
    let model = Model::load(&repo).unwrap();
    let resolver = Resolver::build(&model).unwrap();
    let compiled = fleetwall_core::compiler::compile(&model, &resolver).unwrap();

    let webserver = &compiled["webserver"];
    assert!(webserver.input.iter().any(|l| l.contains("-p ip") && l.contains("-j ACCEPT")));
    assert_eq!(webserver.forward, vec!["-j DROP"]);
}

/// S2: a rule targeting a host group expands into one line per member, in
/// the group's declared order.
#[test]
fn s2_host_group_expands_in_declared_order() {
    let repo = seed_basic_fleet();
    let model = Model::load(&repo).unwrap();
    let resolver = Resolver::build(&model).unwrap();
    let compiled = fleetwall_core::compiler::compile(&model, &resolver).unwrap();

    let webserver = &compiled["webserver"];
    let ssh_accepts: Vec<_> = webserver.input.iter().filter(|l| l.contains("--dport 22")).collect();
    assert_eq!(ssh_accepts.len(), 2);
    assert!(ssh_accepts[0].contains("10.0.0.20"));
    assert!(ssh_accepts[1].contains("10.0.0.21"));
}

/// S3: a rule whose source and destination services disagree on protocol
/// fails compilation as a whole (no partial output).
#[test]
fn s3_protocol_mismatch_fails_the_whole_compile() {
    let repo = seed_basic_fleet();
    repo.seed(
        "services",
        "icmp ip -\n\
         ssh tcp 22\n\
         dns udp 53\n",
    );
    repo.seed(
        "rules",
        "1 bad admins ssh webserver:eth0 dns ACCEPT 0 mismatched protocol\n",
    );
    let model = Model::load(&repo).unwrap();
    let resolver = Resolver::build(&model).unwrap();

    let err = fleetwall_core::compiler::compile(&model, &resolver).unwrap_err();
    assert!(matches!(err, FwError::BadRule { .. }));
}

/// S4: disabled rules are skipped entirely, not compiled with a no-op
/// action.
#[test]
fn s4_disabled_rule_is_skipped() {
    let repo = seed_basic_fleet();
    repo.seed(
        "rules",
        "0 allow_ping * * webserver:eth0 icmp ACCEPT 0 disabled\n",
    );
    let model = Model::load(&repo).unwrap();
    let resolver = Resolver::build(&model).unwrap();
    let compiled = fleetwall_core::compiler::compile(&model, &resolver).unwrap();

    let webserver = &compiled["webserver"];
    assert_eq!(webserver.input, vec!["-m state --state RELATED,ESTABLISHED -j ACCEPT"]);
}

/// S5: deploying against a repository with unsaved edits fails fast with
/// `SaveRequired`, before any host is ever contacted.
#[test]
fn s5_deploy_refuses_unsaved_changes() {
    let repo = seed_basic_fleet();
    repo.write_file("rules", &repo.read_file("rules").unwrap()).unwrap();
    let model = Model::load(&repo).unwrap();

    let fleet: Arc<dyn RemoteExec> = Arc::new(MockFleet::new());
    let deployer = Deployer::new(fleet, Duration::from_secs(5));

    let rt = tokio::runtime::Runtime::new().unwrap();
    let err = rt.block_on(deployer.deploy(&repo, &model)).unwrap_err();
    assert!(matches!(err, FwError::SaveRequired { .. }));
}

/// S6: once deployed, re-running `check` against the same live state
/// reports every host up to date, and a host the fleet knows about but the
/// model never declared is warned about, not silently dropped.
#[test]
fn s6_check_after_deploy_is_up_to_date_and_flags_unmanaged_hosts() {
    let repo = seed_basic_fleet();
    let model = Model::load(&repo).unwrap();
    repo.save("initial").unwrap();

    let fleet = Arc::new(MockFleet::new());
    let own_addrs = [
        ("fw", Ipv4Addr::new(10, 0, 0, 1)),
        ("webserver", Ipv4Addr::new(10, 0, 0, 10)),
        ("alice", Ipv4Addr::new(10, 0, 0, 20)),
        ("bob", Ipv4Addr::new(10, 0, 0, 21)),
    ];
    for (hostname, addr) in own_addrs {
        fleet.seed(
            hostname,
            HostState { interfaces: [("eth0".to_string(), addr)].into_iter().collect(), ..HostState::default() },
        );
    }
    fleet.seed("legacy-router", HostState::default());
    let deployer = Deployer::new(Arc::clone(&fleet) as Arc<dyn RemoteExec>, Duration::from_secs(5));

    let rt = tokio::runtime::Runtime::new().unwrap();
    let deploy_report = rt.block_on(deployer.deploy(&repo, &model)).unwrap();
    assert!(deploy_report.outcomes.values().any(|o| *o == HostOutcome::Applied));

    let check_report = rt.block_on(deployer.check(&model)).unwrap();
    assert!(check_report.is_up_to_date());
    assert!(check_report.warnings.contains(&DeployWarning::UnmanagedHost("legacy-router".to_string())));

    let _ = ChainSet::default();
}
