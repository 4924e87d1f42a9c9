//! Captive portal firewall and NAT rules
//!
//! Rule sets are plain data composed from the AP parameters; only
//! [`RuleSet::apply`] and [`RuleSet::cleanup`] touch the system. Cleanup runs
//! the exact mirror of creation so a session leaves no rules behind.

use crate::command::Invocation;
use crate::config::FirewallSettings;
use crate::error::{PortalError, PortalResult};
use crate::tools::Toolbox;
use serde::Deserialize;
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::Out => write!(f, "out"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// A ufw allow rule scoped to one interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    pub direction: Direction,
    pub interface: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl FirewallRule {
    pub fn new(direction: Direction, interface: &str, port: u16, protocol: Protocol) -> Self {
        Self {
            direction,
            interface: interface.to_string(),
            port,
            protocol,
        }
    }

    /// `allow in on wlan0 to any port 67 proto udp`
    pub fn allow_args(&self) -> Vec<String> {
        vec![
            "allow".to_string(),
            self.direction.to_string(),
            "on".to_string(),
            self.interface.clone(),
            "to".to_string(),
            "any".to_string(),
            "port".to_string(),
            self.port.to_string(),
            "proto".to_string(),
            self.protocol.to_string(),
        ]
    }

    pub fn delete_args(&self) -> Vec<String> {
        let mut args = vec!["delete".to_string()];
        args.extend(self.allow_args());
        args
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Nat,
    Filter,
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Table::Nat => write!(f, "nat"),
            Table::Filter => write!(f, "filter"),
        }
    }
}

/// An iptables rule: table, chain and the match/target arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRule {
    pub table: Table,
    pub chain: String,
    pub spec: Vec<String>,
}

impl NatRule {
    pub fn new<I, S>(table: Table, chain: &str, spec: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table,
            chain: chain.to_string(),
            spec: spec.into_iter().map(Into::into).collect(),
        }
    }

    fn args(&self, action: &str) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            self.table.to_string(),
            action.to_string(),
            self.chain.clone(),
        ];
        args.extend(self.spec.iter().cloned());
        args
    }

    pub fn append_args(&self) -> Vec<String> {
        self.args("-A")
    }

    pub fn delete_args(&self) -> Vec<String> {
        self.args("-D")
    }
}

/// Outcome of applying or removing a rule set
#[derive(Debug, Default)]
pub struct FirewallReport {
    pub succeeded: usize,
    pub failures: Vec<PortalError>,
}

impl FirewallReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Every rule a captive portal session needs, in creation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    pub allow: Vec<FirewallRule>,
    pub nat: Vec<NatRule>,
}

impl RuleSet {
    /// Compose the rules for `interface` serving the portal on `portal_port`
    ///
    /// `upstream` adds masquerading so clients that pass the portal can reach
    /// the internet; it is ignored when it names the AP interface itself.
    pub fn compose(
        interface: &str,
        portal_port: u16,
        gateway: Ipv4Addr,
        upstream: Option<&str>,
    ) -> Self {
        let port = portal_port.to_string();
        let dns_target = format!("{}:53", gateway);

        let allow = vec![
            FirewallRule::new(Direction::In, interface, 67, Protocol::Udp),
            FirewallRule::new(Direction::Out, interface, 68, Protocol::Udp),
            FirewallRule::new(Direction::In, interface, 53, Protocol::Udp),
            FirewallRule::new(Direction::In, interface, 53, Protocol::Tcp),
            FirewallRule::new(Direction::In, interface, portal_port, Protocol::Tcp),
        ];

        let mut nat = vec![
            NatRule::new(
                Table::Nat,
                "PREROUTING",
                [
                    "-i", interface, "-p", "tcp", "--dport", "80", "-j", "REDIRECT",
                    "--to-ports", port.as_str(),
                ],
            ),
            NatRule::new(
                Table::Nat,
                "PREROUTING",
                [
                    "-i", interface, "-p", "udp", "--dport", "53", "-j", "DNAT",
                    "--to-destination", dns_target.as_str(),
                ],
            ),
            NatRule::new(
                Table::Nat,
                "PREROUTING",
                [
                    "-i", interface, "-p", "tcp", "--dport", "53", "-j", "DNAT",
                    "--to-destination", dns_target.as_str(),
                ],
            ),
            NatRule::new(
                Table::Filter,
                "INPUT",
                ["-i", interface, "-p", "tcp", "--dport", port.as_str(), "-j", "ACCEPT"],
            ),
            NatRule::new(Table::Filter, "FORWARD", ["-i", interface, "-j", "ACCEPT"]),
        ];

        if let Some(upstream) = upstream.filter(|u| !u.is_empty() && *u != interface) {
            nat.push(NatRule::new(
                Table::Nat,
                "POSTROUTING",
                ["-o", upstream, "-j", "MASQUERADE"],
            ));
        }

        Self { allow, nat }
    }

    /// Commands that install the rules, in order
    pub fn create_invocations(&self, tools: &Toolbox, settings: &FirewallSettings) -> Vec<Invocation> {
        let mut invocations = Vec::new();
        if settings.ufw {
            invocations.extend(self.allow.iter().map(|r| tools.ufw().args(r.allow_args())));
        }
        if settings.iptables {
            invocations.extend(self.nat.iter().map(|r| tools.iptables().args(r.append_args())));
        }
        invocations
    }

    /// Commands that remove the rules; same order and predicates as creation
    pub fn cleanup_invocations(&self, tools: &Toolbox, settings: &FirewallSettings) -> Vec<Invocation> {
        let mut invocations = Vec::new();
        if settings.ufw {
            invocations.extend(self.allow.iter().map(|r| tools.ufw().args(r.delete_args())));
        }
        if settings.iptables {
            invocations.extend(self.nat.iter().map(|r| tools.iptables().args(r.delete_args())));
        }
        invocations
    }

    /// Install every rule, continuing past failures
    pub async fn apply(&self, tools: &Toolbox, settings: &FirewallSettings) -> FirewallReport {
        let mut report = FirewallReport::default();

        for invocation in self.create_invocations(tools, settings) {
            let line = invocation.to_string();
            match tools.run(invocation).await {
                Ok(_) => {
                    debug!("Applied: {}", line);
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!("Failed to apply firewall rule '{}': {}", line, e);
                    report.failures.push(e);
                }
            }
        }

        info!(
            "Firewall rules applied: {} ok, {} failed",
            report.succeeded,
            report.failures.len()
        );
        report
    }

    /// Remove every rule; rules that are already gone count as removed
    pub async fn cleanup(&self, tools: &Toolbox, settings: &FirewallSettings) -> FirewallReport {
        let mut report = FirewallReport::default();

        for invocation in self.cleanup_invocations(tools, settings) {
            let line = invocation.to_string();
            match tools.run(invocation).await {
                Ok(_) => report.succeeded += 1,
                Err(e) if is_missing_rule(&e) => {
                    debug!("Rule already absent: {}", line);
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!("Failed to remove firewall rule '{}': {}", line, e);
                    report.failures.push(e);
                }
            }
        }

        report
    }
}

/// Whether a failed delete only means the rule was not there
pub fn is_missing_rule(err: &PortalError) -> bool {
    const MARKERS: &[&str] = &[
        "does a matching rule exist",
        "Bad rule",
        "Could not delete non-existent rule",
        "No chain/target/match by that name",
    ];

    err.command_output()
        .map(|out| MARKERS.iter().any(|m| out.contains(m)))
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
struct RouteEntry {
    dst: Option<String>,
    dev: Option<String>,
}

/// Pick the outgoing device from `ip -json route show default` output
pub fn parse_default_route(json: &str) -> PortalResult<Option<String>> {
    if json.trim().is_empty() {
        return Ok(None);
    }

    let routes: Vec<RouteEntry> = serde_json::from_str(json)?;
    Ok(routes
        .into_iter()
        .filter(|r| r.dst.as_deref().map_or(true, |d| d == "default"))
        .find_map(|r| r.dev))
}

/// The interface carrying the default route, if any
pub async fn detect_default_route_interface(tools: &Toolbox) -> PortalResult<Option<String>> {
    let output = tools
        .run(tools.ip().args(["-json", "route", "show", "default"]))
        .await?;
    parse_default_route(&output.stdout)
}
