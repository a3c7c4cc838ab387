//! Tagged entity records (`spec.md` §3).
//!
//! The original implementation represents every row as an untyped attribute
//! bag (`NetworkObj`/`Bunch`); here each entity kind is its own struct with
//! fields validated at parse time, per the Design Note in `spec.md` §9.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::address::Cidr;
use crate::error::FwError;

/// Rejects any character outside printable ASCII, or one of `" ' < > \``,
/// matching the original's `validc`/`clean` helpers.
pub fn validate_name_chars(entity: &str, s: &str) -> Result<(), FwError> {
    for c in s.chars() {
        let n = c as u32;
        let forbidden = matches!(c, '"' | '\'' | '<' | '>' | '`');
        if !(32..127).contains(&n) || forbidden {
            return Err(FwError::bad_data(
                entity,
                format!("field {s:?} contains a disallowed character {c:?}"),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    pub hostname: String,
    pub iface: String,
    pub ip_addr: Ipv4Addr,
    pub masklen: u8,
    pub local_fw: bool,
    pub network_fw: bool,
    pub mng: bool,
    pub routed: Vec<String>,
}

impl Host {
    pub fn key(&self) -> (String, String) {
        (self.hostname.clone(), self.iface.clone())
    }

    /// The network this host's own interface is directly connected to.
    pub fn own_network(&self) -> Cidr {
        Cidr::new(self.ip_addr, self.masklen).expect("host masklen validated at parse time")
    }

    /// Rendering for `-s`/`-d`: a bare address, no prefix.
    pub fn ipt(&self) -> String {
        self.ip_addr.to_string()
    }

    pub fn validate(&self) -> Result<(), FwError> {
        validate_name_chars(&self.hostname, &self.hostname)?;
        validate_name_chars(&self.hostname, &self.iface)?;
        if self.masklen > 32 {
            return Err(FwError::bad_data(
                &self.hostname,
                format!("masklen {} out of range 0..=32", self.masklen),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Network {
    pub name: String,
    cidr: Cidr,
}

impl Network {
    pub fn new(name: impl Into<String>, addr: Ipv4Addr, masklen: u8) -> Result<Self, FwError> {
        let name = name.into();
        validate_name_chars(&name, &name)?;
        Ok(Network {
            name: name.clone(),
            cidr: Cidr::new(addr, masklen)
                .map_err(|e| FwError::bad_data(name, e.to_string()))?,
        })
    }

    pub fn ip_addr(&self) -> Ipv4Addr {
        self.cidr.network()
    }

    pub fn masklen(&self) -> u8 {
        self.cidr.prefix()
    }

    pub fn cidr(&self) -> Cidr {
        self.cidr
    }

    /// Rendering for `-s`/`-d`: `address/prefix`.
    pub fn ipt(&self) -> String {
        self.cidr.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostGroup {
    pub name: String,
    pub children: Vec<String>,
}

impl HostGroup {
    pub fn validate(&self) -> Result<(), FwError> {
        validate_name_chars(&self.name, &self.name)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Ip,
    Tcp,
    Udp,
    Ospf,
    IsIs,
    Sctp,
    Ah,
    Esp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Ip => "IP",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Ospf => "OSPF",
            Protocol::IsIs => "IS-IS",
            Protocol::Sctp => "SCTP",
            Protocol::Ah => "AH",
            Protocol::Esp => "ESP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().to_lowercase())
    }
}

impl FromStr for Protocol {
    type Err = FwError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IP" => Ok(Protocol::Ip),
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            "OSPF" => Ok(Protocol::Ospf),
            "IS-IS" => Ok(Protocol::IsIs),
            "SCTP" => Ok(Protocol::Sctp),
            "AH" => Ok(Protocol::Ah),
            "ESP" => Ok(Protocol::Esp),
            other => Err(FwError::bad_data("service", format!("unknown protocol {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Service {
    pub name: String,
    /// `None` is the wildcard protocol; wildcard implies `ports` is empty.
    pub protocol: Option<Protocol>,
    pub ports: String,
}

impl Service {
    pub fn wildcard() -> Self {
        Service {
            name: "*".to_string(),
            protocol: None,
            ports: String::new(),
        }
    }

    pub fn validate(&self) -> Result<(), FwError> {
        validate_name_chars(&self.name, &self.name)?;
        if self.protocol.is_none() && !self.ports.is_empty() {
            return Err(FwError::bad_data(
                &self.name,
                "wildcard protocol must have empty ports",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Accept,
    Drop,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Accept => write!(f, "ACCEPT"),
            Action::Drop => write!(f, "DROP"),
        }
    }
}

impl FromStr for Action {
    type Err = FwError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACCEPT" => Ok(Action::Accept),
            "DROP" => Ok(Action::Drop),
            other => Err(FwError::bad_rule("rule", format!("action must be ACCEPT or DROP, got {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    pub enabled: bool,
    pub name: String,
    pub src: String,
    pub src_serv: String,
    pub dst: String,
    pub dst_serv: String,
    pub action: Action,
    pub log_level: u8,
    pub description: String,
}

impl Rule {
    pub fn validate(&self) -> Result<(), FwError> {
        validate_name_chars(&self.name, &self.name)?;
        validate_name_chars(&self.name, &self.description)?;
        if self.log_level > 7 {
            return Err(FwError::bad_rule(
                &self.name,
                format!("log_level {} out of range 0..=7", self.log_level),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_forbidden_characters() {
        assert!(validate_name_chars("x", "has\"quote").is_err());
        assert!(validate_name_chars("x", "has<lt").is_err());
        assert!(validate_name_chars("x", "plain_name-1").is_ok());
    }

    #[test]
    fn network_canonicalizes_ip_addr() {
        let net = Network::new("lan", Ipv4Addr::new(1, 2, 3, 42), 24).unwrap();
        assert_eq!(net.ip_addr(), Ipv4Addr::new(1, 2, 3, 0));
    }

    #[test]
    fn wildcard_service_rejects_ports() {
        let svc = Service {
            name: "*".to_string(),
            protocol: None,
            ports: "80".to_string(),
        };
        assert!(svc.validate().is_err());
    }
}
