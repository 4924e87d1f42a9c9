//! Configuration management for portalctl

use crate::ap::{ApConfig, BackendKind};
use crate::error::{PortalError, PortalResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main portalctl configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Which subsystem owns the radio while the AP is up
    #[serde(default)]
    pub backend: BackendKind,
    /// Access point to bring up
    #[serde(default)]
    pub access_point: ApConfig,
    /// External tool locations
    #[serde(default)]
    pub tools: ToolPaths,
    /// Firewall behaviour
    #[serde(default)]
    pub firewall: FirewallSettings,
    /// Bounds on external commands
    #[serde(default)]
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    #[serde(default = "default_nmcli")]
    pub nmcli: String,
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_iw")]
    pub iw: String,
    #[serde(default = "default_systemctl")]
    pub systemctl: String,
    #[serde(default = "default_sysctl")]
    pub sysctl: String,
    #[serde(default = "default_ufw")]
    pub ufw: String,
    /// Some distributions need `iptables-legacy` here
    #[serde(default = "default_iptables")]
    pub iptables: String,
    #[serde(default = "default_dnsmasq")]
    pub dnsmasq: String,
    #[serde(default = "default_hostapd")]
    pub hostapd: String,
    #[serde(default = "default_pkill")]
    pub pkill: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallSettings {
    /// Open DHCP/DNS/portal ports through ufw
    #[serde(default = "default_true")]
    pub ufw: bool,
    /// Install the iptables redirect/NAT rules
    #[serde(default = "default_true")]
    pub iptables: bool,
    /// Enable net.ipv4.ip_forward while the AP runs
    #[serde(default = "default_true")]
    pub ip_forward: bool,
    /// Masquerade through this interface instead of the detected default route
    #[serde(default)]
    pub upstream_interface: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Upper bound for a single external command (seconds)
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,
    /// Upper bound for scans, which hang on flaky hardware (seconds)
    #[serde(default = "default_scan_secs")]
    pub scan_secs: u64,
    /// How long a daemon gets to exit after SIGTERM (seconds)
    #[serde(default = "default_terminate_grace_secs")]
    pub terminate_grace_secs: u64,
    /// Pause after creating the hotspot and after spawning daemons (milliseconds)
    #[serde(default = "default_settle_millis")]
    pub settle_millis: u64,
}

impl Timeouts {
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn scan(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_millis)
    }

    /// No settling pauses; used by dry runs and tests
    pub fn immediate() -> Self {
        Self {
            settle_millis: 0,
            ..Self::default()
        }
    }
}

fn default_nmcli() -> String {
    "nmcli".to_string()
}

fn default_ip() -> String {
    "ip".to_string()
}

fn default_iw() -> String {
    "iw".to_string()
}

fn default_systemctl() -> String {
    "systemctl".to_string()
}

fn default_sysctl() -> String {
    "sysctl".to_string()
}

fn default_ufw() -> String {
    "ufw".to_string()
}

fn default_iptables() -> String {
    "iptables".to_string()
}

fn default_dnsmasq() -> String {
    "dnsmasq".to_string()
}

fn default_hostapd() -> String {
    "hostapd".to_string()
}

fn default_pkill() -> String {
    "pkill".to_string()
}

fn default_true() -> bool {
    true
}

fn default_command_secs() -> u64 {
    30
}

fn default_scan_secs() -> u64 {
    45
}

fn default_terminate_grace_secs() -> u64 {
    5
}

fn default_settle_millis() -> u64 {
    2000
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            nmcli: default_nmcli(),
            ip: default_ip(),
            iw: default_iw(),
            systemctl: default_systemctl(),
            sysctl: default_sysctl(),
            ufw: default_ufw(),
            iptables: default_iptables(),
            dnsmasq: default_dnsmasq(),
            hostapd: default_hostapd(),
            pkill: default_pkill(),
        }
    }
}

impl Default for FirewallSettings {
    fn default() -> Self {
        Self {
            ufw: true,
            iptables: true,
            ip_forward: true,
            upstream_interface: None,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command_secs: default_command_secs(),
            scan_secs: default_scan_secs(),
            terminate_grace_secs: default_terminate_grace_secs(),
            settle_millis: default_settle_millis(),
        }
    }
}

impl PortalConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> PortalResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| PortalError::Config(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> PortalResult<Self> {
        toml::from_str(content)
            .map_err(|e| PortalError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> PortalResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| PortalError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| PortalError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ap::SecurityMode;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = PortalConfig::parse("").unwrap();
        assert_eq!(config, PortalConfig::default());
        assert_eq!(config.backend, BackendKind::NetworkManager);
        assert_eq!(config.tools.iptables, "iptables");
        assert_eq!(config.timeouts.command(), Duration::from_secs(30));
        assert!(config.firewall.ufw);
    }

    #[test]
    fn test_partial_config() {
        let config = PortalConfig::parse(
            r#"
            backend = "hostapd"

            [access_point]
            interface = "wlan1"
            ssid = "Setup"
            security = "open"
            portal_port = 9090

            [tools]
            iptables = "iptables-legacy"

            [firewall]
            ufw = false
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendKind::Hostapd);
        assert_eq!(config.access_point.interface, "wlan1");
        assert_eq!(config.access_point.security, SecurityMode::Open);
        assert_eq!(config.access_point.portal_port, 9090);
        // untouched fields keep their defaults
        assert_eq!(config.access_point.gateway, "192.168.4.1");
        assert_eq!(config.tools.iptables, "iptables-legacy");
        assert_eq!(config.tools.nmcli, "nmcli");
        assert!(!config.firewall.ufw);
        assert!(config.firewall.iptables);
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let err = PortalConfig::parse("backend = 3").unwrap_err();
        assert!(matches!(err, PortalError::Config(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portalctl.toml");

        let mut config = PortalConfig::default();
        config.access_point.ssid = "Lobby".to_string();
        config.timeouts.settle_millis = 0;
        config.save(&path).unwrap();

        let loaded = PortalConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        let err = PortalConfig::load("/nonexistent/portalctl.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
