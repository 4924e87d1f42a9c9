//! portalctl - captive portal access point library
//!
//! Async orchestration of the tools that turn a wireless interface into a
//! captive portal hotspot:
//! - Wireless interface discovery and AP interface selection
//! - Network scanning and joining (nmcli)
//! - Access point lifecycle (NetworkManager or hostapd)
//! - Captive portal firewall/NAT rules (ufw, iptables)
//! - DHCP/DNS supervision (dnsmasq)
//!
//! Every system change goes through the [`command::CommandExecutor`] seam.

pub mod error;
pub mod validation;
pub mod command;
pub mod config;
pub mod tools;
pub mod wifi;
pub mod interface;
pub mod firewall;
pub mod template;
pub mod daemon;
pub mod dhcp;
pub mod ap;

// Re-export commonly used types
pub use error::{PortalError, PortalResult};
pub use command::{
    ChildProcess, CommandExecutor, CommandOutput, Invocation, RecordingExecutor, SystemExecutor,
};
pub use config::{FirewallSettings, PortalConfig, Timeouts, ToolPaths};
pub use tools::Toolbox;
pub use wifi::WirelessNetwork;
pub use interface::{
    ApSelection, InterfaceCache, InterfaceManager, SelectionWarning, WirelessInterface,
};
pub use firewall::{FirewallReport, FirewallRule, NatRule, RuleSet};
pub use template::{ConfigRenderer, DefaultRenderer, TemplateKind};
pub use dhcp::DhcpServer;
pub use ap::{
    AccessPoint, AccessPointService, AccessPointState, ApConfig, BackendKind, HotspotBackend,
    SecurityMode,
};
