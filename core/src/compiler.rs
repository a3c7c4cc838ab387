//! The rule compiler (`spec.md` §4.4): ordered abstract rules in, a
//! per-host, per-chain list of filter lines out. Pure and single-threaded —
//! it consumes an immutable `&Model` snapshot and returns a value, matching
//! `spec.md` §5 ("the compiler stays sequential").

use std::collections::BTreeMap;

use crate::error::FwError;
use crate::model::{Host, Model, Network, Protocol, Rule};
use crate::resolver::{Endpoint, Resolver};

const STATEFUL_PREAMBLE: &str = "-m state --state RELATED,ESTABLISHED -j ACCEPT";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChainSet {
    pub input: Vec<String>,
    pub output: Vec<String>,
    pub forward: Vec<String>,
}

pub type CompiledRuleset = BTreeMap<String, ChainSet>;

/// Compiles `model` into a per-hostname, per-chain ordered list of filter
/// lines. Errors are fatal to the whole operation: `spec.md` §7 ("compilation
/// errors are fatal to the whole operation (no partial output)").
pub fn compile(model: &Model, resolver: &Resolver) -> Result<CompiledRuleset, FwError> {
    let mut rulesets = init_preambles(model);

    let proto_port = build_service_index(model)?;

    for rule in model.rules.iter().filter(|r| r.enabled) {
        rule.validate()?;
        expand_rule(rule, resolver, &proto_port, model, &mut rulesets)?;
    }

    Ok(rulesets)
}

fn init_preambles(model: &Model) -> CompiledRuleset {
    let mut rulesets = CompiledRuleset::new();
    for host in model.hosts.iter() {
        rulesets.entry(host.hostname.clone()).or_insert_with(|| ChainSet {
            input: vec![STATEFUL_PREAMBLE.to_string()],
            output: vec![STATEFUL_PREAMBLE.to_string()],
            forward: vec![if host.network_fw {
                STATEFUL_PREAMBLE.to_string()
            } else {
                "-j DROP".to_string()
            }],
        });
    }
    rulesets
}

fn build_service_index(model: &Model) -> Result<BTreeMap<String, (Option<Protocol>, String)>, FwError> {
    let mut index = BTreeMap::new();
    index.insert("*".to_string(), (None, String::new()));
    for svc in model.services.iter() {
        svc.validate()?;
        index.insert(svc.name.clone(), (svc.protocol, svc.ports.clone()));
    }
    Ok(index)
}

fn resolve_service<'a>(
    name: &str,
    index: &'a BTreeMap<String, (Option<Protocol>, String)>,
) -> Result<&'a (Option<Protocol>, String), FwError> {
    index
        .get(name)
        .ok_or_else(|| FwError::bad_data(name, "unknown service"))
}

fn expand_rule(
    rule: &Rule,
    resolver: &Resolver,
    proto_port: &BTreeMap<String, (Option<Protocol>, String)>,
    model: &Model,
    rulesets: &mut CompiledRuleset,
) -> Result<(), FwError> {
    let (sproto, sports) = resolve_service(&rule.src_serv, proto_port)?;
    let (dproto, dports) = resolve_service(&rule.dst_serv, proto_port)?;

    if let (Some(sp), Some(dp)) = (sproto, dproto) {
        if sp != dp {
            return Err(FwError::bad_rule(
                &rule.name,
                format!("source service is {sp} but destination service is {dp}"),
            ));
        }
    }
    let effective_proto = dproto.or(*sproto);

    let matcher_proto = effective_proto.map(|p| format!(" -p {p}"));
    let matcher_sports = port_fragment(sports, "--sport");
    let matcher_dports = port_fragment(dports, "--dport");

    let srcs = resolver.resolve_endpoint(&rule.src)?;
    let dsts = resolver.resolve_endpoint(&rule.dst)?;

    for src in &srcs {
        for dst in &dsts {
            if let (Endpoint::Host(a), Endpoint::Host(b)) = (src, dst) {
                if a.ip_addr == b.ip_addr {
                    continue;
                }
            }

            let matcher_src = src.ipt().map(|addr| format!(" -s {addr}"));
            let matcher_dst = dst.ipt().map(|addr| format!(" -d {addr}"));

            let matcher = assemble(&[
                matcher_proto.as_deref(),
                matcher_src.as_deref(),
                matcher_sports.as_deref(),
                matcher_dst.as_deref(),
                matcher_dports.as_deref(),
            ]);

            for host in model.hosts.iter() {
                let chains = rulesets
                    .get_mut(&host.hostname)
                    .expect("preamble initialized for every hostname");

                if dst.is_wildcard() || endpoint_contains_host(dst, host) {
                    emit(&mut chains.input, &matcher, rule, Some(host.iface.as_str()));
                }

                if src.is_wildcard() || endpoint_contains_host(src, host) {
                    emit(&mut chains.output, &matcher, rule, None);
                }

                if host.network_fw && forwarded(src, dst, host, resolver)? {
                    emit(&mut chains.forward, &matcher, rule, None);
                }
            }
        }
    }

    Ok(())
}

fn port_fragment(ports: &str, flag: &str) -> Option<String> {
    if ports.is_empty() {
        return None;
    }
    let multiport = if ports.contains(',') { " -m multiport" } else { "" };
    Some(format!("{multiport} {flag} {ports}"))
}

fn assemble(fragments: &[Option<&str>]) -> String {
    fragments.iter().flatten().copied().collect::<Vec<_>>().join("")
}

/// Appends the optional `LOG` line followed by the action line, in that
/// order (`spec.md` §8 property 7: "log precedes action"). `iface` is
/// `Some` only for INPUT's LOG line (`spec.md` §4.4 step 5, and Open
/// Question (a) in §9: OUTPUT/FORWARD never carry `-i`).
fn emit(chain: &mut Vec<String>, matcher: &str, rule: &Rule, iface: Option<&str>) {
    if rule.log_level > 0 {
        let log_line = match iface {
            Some(iface) => format!("-i {iface} {matcher} -j LOG --log-level {} --log-prefix {}", rule.log_level, rule.name),
            None => format!("{matcher} -j LOG --log-level {} --log-prefix {}", rule.log_level, rule.name),
        };
        chain.push(normalize_spaces(&log_line));
    }
    chain.push(normalize_spaces(&format!("{matcher} -j {}", rule.action)));
}

fn normalize_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn endpoint_contains_host(endpoint: &Endpoint, host: &Host) -> bool {
    match endpoint {
        Endpoint::Host(h) => crate::address::same_host(h.ip_addr, host.ip_addr),
        Endpoint::Network(n) => n.cidr().contains_addr(host.ip_addr),
        Endpoint::Wildcard => true,
    }
}

fn endpoint_contains_network(endpoint: &Endpoint, net: &Network) -> bool {
    match endpoint {
        Endpoint::Host(h) => net.cidr().contains_addr(h.ip_addr),
        Endpoint::Network(n) => net.cidr().contains_network(&n.cidr()),
        Endpoint::Wildcard => true,
    }
}

/// The forwarding predicate (`spec.md` §4.4.1).
fn forwarded(src: &Endpoint, dst: &Endpoint, host: &Host, resolver: &Resolver) -> Result<bool, FwError> {
    if src.is_wildcard() {
        return Ok(true);
    }

    if let Endpoint::Host(s) = src {
        if s.ip_addr == host.ip_addr {
            return Ok(false);
        }
    }

    let own_net = host.own_network();
    let src_in_own_net = match src {
        Endpoint::Host(h) => own_net.contains_addr(h.ip_addr),
        Endpoint::Network(n) => own_net.contains_network(&n.cidr()),
        Endpoint::Wildcard => unreachable!("wildcard src handled above"),
    };

    if src_in_own_net {
        let dst_in_own_net = match dst {
            Endpoint::Host(h) => own_net.contains_addr(h.ip_addr),
            Endpoint::Network(n) => own_net.contains_network(&n.cidr()),
            Endpoint::Wildcard => true,
        };
        return Ok(!dst_in_own_net);
    }

    for routed_name in &host.routed {
        let routed_net = resolver
            .network_by_name(routed_name)
            .ok_or_else(|| FwError::bad_data(routed_name, "routed network does not resolve"))?;

        let src_in_routed = endpoint_contains_network(src, routed_net);
        if src_in_routed && !endpoint_contains_network(dst, routed_net) {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Per-host, per-interface projection used by the reconciliation UI
/// (`spec.md` §4.4.2): keeps only lines mentioning the interface's own IP.
/// A projection of the main output, not the authoritative diff source — see
/// `deploy::classify`, which uses it only to log per-interface context.
pub fn ruleset_for_interface(chains: &ChainSet, iface_ip: &str) -> Vec<String> {
    chains
        .input
        .iter()
        .chain(chains.output.iter())
        .chain(chains.forward.iter())
        .filter(|line| line.contains(iface_ip))
        .cloned()
        .collect()
}
