//! The on-disk model format (`spec.md` §6): one space-separated file per
//! entity kind, `#`-comments and blank lines preserved verbatim across
//! rewrites.
//!
//! Hand-rolled rather than built on the `csv` crate: the format has no
//! quoting, a variable-arity trailing column on `hosts` rows, and a
//! free-text trailing `description` column on `rules` rows that a
//! general-purpose CSV reader isn't shaped for.

use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::FwError;
use crate::model::entities::{Action, Host, HostGroup, Network, Protocol, Rule, Service};

/// A parsed file: leading comment/blank lines (preserved verbatim) plus the
/// data rows, each already split into whitespace-delimited fields.
pub struct RawTable {
    pub comments: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub fn parse_raw(content: &str) -> RawTable {
    let mut comments = Vec::new();
    let mut rows = Vec::new();
    let mut past_comments = false;

    for line in content.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            if !past_comments {
                comments.push(line.to_string());
            }
            continue;
        }
        past_comments = true;
        rows.push(trimmed.split_whitespace().map(str::to_string).collect());
    }

    RawTable { comments, rows }
}

pub fn render_raw(comments: &[String], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    for c in comments {
        out.push_str(c);
        out.push('\n');
    }
    for row in rows {
        out.push_str(&row.join(" "));
        out.push('\n');
    }
    out
}

fn bool_field(entity: &str, field: &str) -> Result<bool, FwError> {
    match field {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(FwError::bad_data(
            entity,
            format!("boolean field must be \"1\" or \"0\", got {other:?}"),
        )),
    }
}

fn bool_str(b: bool) -> &'static str {
    if b { "1" } else { "0" }
}

pub fn parse_rules(content: &str) -> Result<(Vec<String>, Vec<Rule>), FwError> {
    let table = parse_raw(content);
    let mut rules = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        if row.len() < 9 {
            return Err(FwError::bad_data("rules", format!("expected 9 fields, got {row:?}")));
        }
        let description = row[8..].join(" ");
        let rule = Rule {
            enabled: bool_field(&row[1], &row[0])?,
            name: row[1].clone(),
            src: row[2].clone(),
            src_serv: row[3].clone(),
            dst: row[4].clone(),
            dst_serv: row[5].clone(),
            action: Action::from_str(&row[6])?,
            log_level: row[7]
                .parse()
                .map_err(|_| FwError::bad_rule(&row[1], format!("log_level {:?} is not an integer", row[7])))?,
            description,
        };
        rule.validate()?;
        rules.push(rule);
    }
    Ok((table.comments, rules))
}

pub fn render_rules(comments: &[String], rules: &[Rule]) -> String {
    let rows: Vec<Vec<String>> = rules
        .iter()
        .map(|r| {
            vec![
                bool_str(r.enabled).to_string(),
                r.name.clone(),
                r.src.clone(),
                r.src_serv.clone(),
                r.dst.clone(),
                r.dst_serv.clone(),
                r.action.to_string(),
                r.log_level.to_string(),
                r.description.clone(),
            ]
        })
        .collect();
    render_raw(comments, &rows)
}

pub fn parse_hosts(content: &str) -> Result<(Vec<String>, Vec<Host>), FwError> {
    let table = parse_raw(content);
    let mut hosts = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        if row.len() < 7 {
            return Err(FwError::bad_data("hosts", format!("expected at least 7 fields, got {row:?}")));
        }
        let host = Host {
            hostname: row[0].clone(),
            iface: row[1].clone(),
            ip_addr: row[2]
                .parse::<Ipv4Addr>()
                .map_err(|e| FwError::bad_data(&row[0], format!("invalid ip_addr: {e}")))?,
            masklen: row[3]
                .parse()
                .map_err(|_| FwError::bad_data(&row[0], format!("masklen {:?} is not an integer", row[3])))?,
            local_fw: bool_field(&row[0], &row[4])?,
            network_fw: bool_field(&row[0], &row[5])?,
            mng: bool_field(&row[0], &row[6])?,
            routed: row[7..].to_vec(),
        };
        host.validate()?;
        hosts.push(host);
    }
    Ok((table.comments, hosts))
}

pub fn render_hosts(comments: &[String], hosts: &[Host]) -> String {
    let rows: Vec<Vec<String>> = hosts
        .iter()
        .map(|h| {
            let mut row = vec![
                h.hostname.clone(),
                h.iface.clone(),
                h.ip_addr.to_string(),
                h.masklen.to_string(),
                bool_str(h.local_fw).to_string(),
                bool_str(h.network_fw).to_string(),
                bool_str(h.mng).to_string(),
            ];
            row.extend(h.routed.iter().cloned());
            row
        })
        .collect();
    render_raw(comments, &rows)
}

pub fn parse_hostgroups(content: &str) -> Result<(Vec<String>, Vec<HostGroup>), FwError> {
    let table = parse_raw(content);
    let mut groups = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        if row.is_empty() {
            return Err(FwError::bad_data("hostgroups", "empty row"));
        }
        let group = HostGroup {
            name: row[0].clone(),
            children: row[1..].to_vec(),
        };
        group.validate()?;
        groups.push(group);
    }
    Ok((table.comments, groups))
}

pub fn render_hostgroups(comments: &[String], groups: &[HostGroup]) -> String {
    let rows: Vec<Vec<String>> = groups
        .iter()
        .map(|g| {
            let mut row = vec![g.name.clone()];
            row.extend(g.children.iter().cloned());
            row
        })
        .collect();
    render_raw(comments, &rows)
}

pub fn parse_services(content: &str) -> Result<(Vec<String>, Vec<Service>), FwError> {
    let table = parse_raw(content);
    let mut services = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        if row.len() != 3 {
            return Err(FwError::bad_data("services", format!("expected 3 fields, got {row:?}")));
        }
        let protocol = if row[1] == "*" {
            None
        } else {
            Some(Protocol::from_str(&row[1])?)
        };
        let service = Service {
            name: row[0].clone(),
            protocol,
            ports: if row[2] == "-" { String::new() } else { row[2].clone() },
        };
        service.validate()?;
        services.push(service);
    }
    Ok((table.comments, services))
}

pub fn render_services(comments: &[String], services: &[Service]) -> String {
    let rows: Vec<Vec<String>> = services
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                s.protocol.map(|p| p.as_str().to_string()).unwrap_or_else(|| "*".to_string()),
                if s.ports.is_empty() { "-".to_string() } else { s.ports.clone() },
            ]
        })
        .collect();
    render_raw(comments, &rows)
}

pub fn parse_networks(content: &str) -> Result<(Vec<String>, Vec<Network>), FwError> {
    let table = parse_raw(content);
    let mut networks = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        if row.len() != 3 {
            return Err(FwError::bad_data("networks", format!("expected 3 fields, got {row:?}")));
        }
        let addr = row[1]
            .parse::<Ipv4Addr>()
            .map_err(|e| FwError::bad_data(&row[0], format!("invalid ip_addr: {e}")))?;
        let masklen: u8 = row[2]
            .parse()
            .map_err(|_| FwError::bad_data(&row[0], format!("masklen {:?} is not an integer", row[2])))?;
        networks.push(Network::new(row[0].clone(), addr, masklen)?);
    }
    Ok((table.comments, networks))
}

pub fn render_networks(comments: &[String], networks: &[Network]) -> String {
    let rows: Vec<Vec<String>> = networks
        .iter()
        .map(|n| vec![n.name.clone(), n.ip_addr().to_string(), n.masklen().to_string()])
        .collect();
    render_raw(comments, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_rules_preserving_comments() {
        let input = "# format v1\n\n1 allow_ping internet * webserver icmp ACCEPT 0 let pings through\n";
        let (comments, rules) = parse_rules(input).unwrap();
        assert_eq!(comments, vec!["# format v1".to_string()]);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].description, "let pings through");

        let rendered = render_rules(&comments, &rules);
        let (comments2, rules2) = parse_rules(&rendered).unwrap();
        assert_eq!(comments, comments2);
        assert_eq!(rules, rules2);
    }

    #[test]
    fn hosts_trailing_routed_list_is_variable_length() {
        let input = "fw eth0 1.2.3.1 24 1 1 1 lan dmz\nwebserver eth0 1.2.3.10 24 1 0 1\n";
        let (_, hosts) = parse_hosts(input).unwrap();
        assert_eq!(hosts[0].routed, vec!["lan", "dmz"]);
        assert!(hosts[1].routed.is_empty());
    }

    #[test]
    fn rejects_bad_boolean_field() {
        let input = "fw eth0 1.2.3.1 24 yes 1 1\n";
        assert!(parse_hosts(input).is_err());
    }
}
