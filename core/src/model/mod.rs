pub mod csv_format;
pub mod entities;
pub mod store;

pub use entities::{validate_name_chars, Action, Host, HostGroup, Network, Protocol, Rule, Service};
pub use store::ModelStore;

use crate::error::FwError;
use crate::repository::Repository;

/// The whole declarative model: five typed, ordered collections.
///
/// The Python original passes a single mutable attribute bag into both the
/// editor and the compiler. Here the distinction from `spec.md` §4.4 ("the
/// compiler receives an immutable snapshot... the editor operates on the
/// mutable store") is enforced by the borrow checker instead of by
/// convention: editing takes `&mut Model`, compiling takes `&Model`.
#[derive(Debug, Clone)]
pub struct Model {
    pub rules: ModelStore<Rule>,
    pub hosts: ModelStore<Host>,
    pub hostgroups: ModelStore<HostGroup>,
    pub services: ModelStore<Service>,
    pub networks: ModelStore<Network>,
}

impl Model {
    pub fn load(repo: &dyn Repository) -> Result<Self, FwError> {
        let (rc, rules) = csv_format::parse_rules(&repo.read_file("rules")?)?;
        let (hc, hosts) = csv_format::parse_hosts(&repo.read_file("hosts")?)?;
        let (gc, hostgroups) = csv_format::parse_hostgroups(&repo.read_file("hostgroups")?)?;
        let (sc, services) = csv_format::parse_services(&repo.read_file("services")?)?;
        let (nc, networks) = csv_format::parse_networks(&repo.read_file("networks")?)?;

        Ok(Model {
            rules: ModelStore::new(rc, rules),
            hosts: ModelStore::new(hc, hosts),
            hostgroups: ModelStore::new(gc, hostgroups),
            services: ModelStore::new(sc, services),
            networks: ModelStore::new(nc, networks),
        })
    }

    pub fn save(&self, repo: &dyn Repository) -> Result<(), FwError> {
        repo.write_file(
            "rules",
            &csv_format::render_rules(self.rules.comments(), self.rules.rows()),
        )?;
        repo.write_file(
            "hosts",
            &csv_format::render_hosts(self.hosts.comments(), self.hosts.rows()),
        )?;
        repo.write_file(
            "hostgroups",
            &csv_format::render_hostgroups(self.hostgroups.comments(), self.hostgroups.rows()),
        )?;
        repo.write_file(
            "services",
            &csv_format::render_services(self.services.comments(), self.services.rows()),
        )?;
        repo.write_file(
            "networks",
            &csv_format::render_networks(self.networks.comments(), self.networks.rows()),
        )?;
        Ok(())
    }
}
