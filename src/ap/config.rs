//! Access point configuration and validation

use crate::error::{PortalError, PortalResult};
use crate::validation::{
    sanitize_config_value, validate_country_code, validate_dhcp_range, validate_interface_name,
    validate_ipv4_address, validate_ssid, validate_wifi_channel, validate_wifi_password,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Link-layer protection offered to clients
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    Open,
    #[default]
    Wpa2,
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityMode::Open => write!(f, "open"),
            SecurityMode::Wpa2 => write!(f, "wpa2"),
        }
    }
}

impl FromStr for SecurityMode {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" | "none" => Ok(SecurityMode::Open),
            "wpa2" | "wpa2-psk" => Ok(SecurityMode::Wpa2),
            other => Err(PortalError::InvalidConfig(format!(
                "unknown security mode '{}' (expected open or wpa2)",
                other
            ))),
        }
    }
}

/// Parameters of one captive-portal access point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApConfig {
    /// Connection profile name
    pub name: String,
    /// Empty means "pick the best interface" (resolved by the caller)
    pub interface: String,
    pub ssid: String,
    pub password: String,
    pub country_code: String,
    pub security: SecurityMode,
    pub gateway: String,
    /// dnsmasq style `start,end`
    pub dhcp_range: String,
    pub portal_port: u16,
    /// None lets the driver choose
    pub channel: Option<u8>,
    /// Answer every DNS query with the gateway address
    pub captive_dns: bool,
    /// dnsmasq lease time, e.g. `12h`
    pub lease_time: String,
}

impl Default for ApConfig {
    fn default() -> Self {
        Self {
            name: "wifiportal".to_string(),
            interface: String::new(),
            ssid: String::new(),
            password: String::new(),
            country_code: "US".to_string(),
            security: SecurityMode::Wpa2,
            gateway: "192.168.4.1".to_string(),
            dhcp_range: "192.168.4.2,192.168.4.50".to_string(),
            portal_port: 8080,
            channel: None,
            captive_dns: true,
            lease_time: "12h".to_string(),
        }
    }
}

impl ApConfig {
    /// Check every field; nothing may touch the system before this passes
    pub fn validate(&self) -> PortalResult<()> {
        if self.name.trim().is_empty() {
            return Err(PortalError::InvalidConfig("name is required".to_string()));
        }
        sanitize_config_value(&self.name)?;

        validate_interface_name(&self.interface)?;
        validate_ssid(&self.ssid)?;
        validate_country_code(&self.country_code)?;

        if self.gateway.trim().is_empty() {
            return Err(PortalError::InvalidConfig("gateway is required".to_string()));
        }
        self.gateway_addr()?;

        validate_dhcp_range(&self.dhcp_range)?;

        if self.security == SecurityMode::Wpa2 {
            if self.password.is_empty() {
                return Err(PortalError::InvalidConfig(
                    "password is required unless security is open".to_string(),
                ));
            }
            validate_wifi_password(&self.password)?;
        }

        if self.portal_port == 0 {
            return Err(PortalError::InvalidConfig(
                "portal port must be non-zero".to_string(),
            ));
        }

        if let Some(channel) = self.channel {
            validate_wifi_channel(channel)?;
        }

        if self.lease_time.is_empty()
            || !self.lease_time.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(PortalError::InvalidConfig(format!(
                "invalid lease time '{}'",
                self.lease_time
            )));
        }

        Ok(())
    }

    pub fn gateway_addr(&self) -> PortalResult<Ipv4Addr> {
        validate_ipv4_address(self.gateway.trim())
    }

    /// Gateway with the /24 prefix used for the AP subnet
    pub fn gateway_cidr(&self) -> String {
        format!("{}/24", self.gateway.trim())
    }

    /// The passphrase, or None for an open network
    pub fn credentials(&self) -> Option<&str> {
        match self.security {
            SecurityMode::Open => None,
            SecurityMode::Wpa2 => Some(self.password.as_str()),
        }
    }

    /// 5 GHz channels need band `a`
    pub fn band(&self) -> Option<&'static str> {
        self.channel.map(|c| if c > 14 { "a" } else { "bg" })
    }
}
