//! Compiler and deployer core for a centrally managed packet-filter
//! firewall: a declarative model of hosts, networks, host groups, services,
//! and rules; a resolver; a rule compiler; a fleet client capability; and a
//! reconciler/deployer that diffs compiled state against the live fleet.

pub mod address;
pub mod compiler;
pub mod deploy;
pub mod error;
pub mod fleet;
pub mod model;
pub mod repository;
pub mod resolver;
pub mod users;

pub use compiler::{ChainSet, CompiledRuleset};
pub use deploy::{DeployReport, DeployWarning, Deployer, HostOutcome};
pub use error::{ErrorExt, FwError};
pub use fleet::{HostState, MockFleet, RemoteExec};
pub use model::Model;
pub use repository::{GitRepository, InMemoryRepository, Repository};
pub use resolver::{Endpoint, Resolver};
pub use users::{User, UserStore};
