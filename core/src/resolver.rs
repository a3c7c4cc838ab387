//! Name resolution and host-group flattening (`spec.md` §4.3).

use std::collections::HashMap;

use crate::error::FwError;
use crate::model::{Host, Model, Network};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Host(Host),
    Network(Network),
    Wildcard,
}

impl Endpoint {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Endpoint::Wildcard)
    }

    /// The rendering used in `-s`/`-d` clauses; `None` for the wildcard
    /// (which contributes no address constraint at all).
    pub fn ipt(&self) -> Option<String> {
        match self {
            Endpoint::Host(h) => Some(h.ipt()),
            Endpoint::Network(n) => Some(n.ipt()),
            Endpoint::Wildcard => None,
        }
    }
}

pub struct Resolver {
    host_by_hostname_iface: HashMap<String, Host>,
    host_by_hostname: HashMap<String, Host>,
    network_by_name: HashMap<String, Network>,
    hostgroup_children_by_name: HashMap<String, Vec<String>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl Resolver {
    pub fn build(model: &Model) -> Result<Resolver, FwError> {
        let mut host_by_hostname_iface = HashMap::new();
        let mut host_by_hostname = HashMap::new();
        for host in model.hosts.iter() {
            host_by_hostname_iface.insert(format!("{}:{}", host.hostname, host.iface), host.clone());
            host_by_hostname.entry(host.hostname.clone()).or_insert_with(|| host.clone());
        }

        let mut network_by_name = HashMap::new();
        for net in model.networks.iter() {
            network_by_name.insert(net.name.clone(), net.clone());
        }

        let mut hostgroup_children_by_name = HashMap::new();
        for hg in model.hostgroups.iter() {
            hostgroup_children_by_name.insert(hg.name.clone(), hg.children.clone());
        }

        let resolver = Resolver {
            host_by_hostname_iface,
            host_by_hostname,
            network_by_name,
            hostgroup_children_by_name,
        };

        for name in resolver.hostgroup_children_by_name.keys() {
            resolver.detect_cycle(name)?;
        }

        Ok(resolver)
    }

    pub fn host_by_hostname(&self, hostname: &str) -> Option<&Host> {
        self.host_by_hostname.get(hostname)
    }

    pub fn host_by_hostname_iface(&self, key: &str) -> Option<&Host> {
        self.host_by_hostname_iface.get(key)
    }

    pub fn network_by_name(&self, name: &str) -> Option<&Network> {
        self.network_by_name.get(name)
    }

    fn detect_cycle(&self, start: &str) -> Result<(), FwError> {
        let mut colors: HashMap<&str, Color> = HashMap::new();
        self.visit(start, &mut colors)
    }

    fn visit<'a>(&'a self, name: &'a str, colors: &mut HashMap<&'a str, Color>) -> Result<(), FwError> {
        match colors.get(name) {
            Some(Color::Gray) => {
                return Err(FwError::bad_data(name, "host group membership cycle detected"));
            }
            Some(Color::Black) => return Ok(()),
            _ => {}
        }
        colors.insert(name, Color::Gray);
        if let Some(children) = self.hostgroup_children_by_name.get(name) {
            for child in children {
                if self.hostgroup_children_by_name.contains_key(child.as_str()) {
                    self.visit(child, colors)?;
                }
            }
        }
        colors.insert(name, Color::Black);
        Ok(())
    }

    /// Walks a host group's children recursively down to `Host`/`Network`
    /// leaves. Cycles are already ruled out by [`Resolver::build`].
    pub fn flatten(&self, group_name: &str) -> Result<Vec<Endpoint>, FwError> {
        let children = self
            .hostgroup_children_by_name
            .get(group_name)
            .ok_or_else(|| FwError::bad_data(group_name, "unknown host group"))?;

        let mut leaves = Vec::new();
        for child in children {
            if self.hostgroup_children_by_name.contains_key(child.as_str()) {
                leaves.extend(self.flatten(child)?);
            } else if let Some(host) = self.host_by_hostname_iface.get(child.as_str()) {
                leaves.push(Endpoint::Host(host.clone()));
            } else if let Some(net) = self.network_by_name.get(child.as_str()) {
                leaves.push(Endpoint::Network(net.clone()));
            } else {
                return Err(FwError::bad_data(child.as_str(), "does not resolve to a host interface or network"));
            }
        }
        Ok(leaves)
    }

    /// Resolves a rule endpoint name into a sequence of concrete endpoints.
    /// A name present in more than one namespace is ambiguous (`spec.md`
    /// §9 Design Note) and fails with `BadData` rather than picking the
    /// first match.
    pub fn resolve_endpoint(&self, name: &str) -> Result<Vec<Endpoint>, FwError> {
        let in_hosts = self.host_by_hostname_iface.contains_key(name);
        let in_networks = self.network_by_name.contains_key(name);
        let in_groups = self.hostgroup_children_by_name.contains_key(name);

        let matches = [in_hosts, in_networks, in_groups].iter().filter(|b| **b).count();
        if matches > 1 {
            return Err(FwError::bad_data(
                name,
                "name is ambiguous across host, network, and host-group namespaces",
            ));
        }

        if in_hosts {
            return Ok(vec![Endpoint::Host(self.host_by_hostname_iface[name].clone())]);
        }
        if in_networks {
            return Ok(vec![Endpoint::Network(self.network_by_name[name].clone())]);
        }
        if in_groups {
            return self.flatten(name);
        }
        if name == "*" {
            return Ok(vec![Endpoint::Wildcard]);
        }

        Err(FwError::bad_data(name, "does not resolve to a host, network, host group, or \"*\""))
    }
}
