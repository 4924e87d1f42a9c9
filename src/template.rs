//! Daemon configuration rendering
//!
//! dnsmasq and hostapd read flat `key=value` files. Every value is passed
//! through [`sanitize_config_value`] so a crafted SSID or passphrase cannot
//! add directives of its own.

use crate::ap::{ApConfig, SecurityMode};
use crate::error::PortalResult;
use crate::validation::{sanitize_config_value, validate_dhcp_range};
use std::fmt;

/// The config files the crate knows how to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Dnsmasq,
    Hostapd,
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateKind::Dnsmasq => write!(f, "dnsmasq"),
            TemplateKind::Hostapd => write!(f, "hostapd"),
        }
    }
}

/// Produces config file text for a template
pub trait ConfigRenderer: Send + Sync {
    fn render(&self, template: TemplateKind, config: &ApConfig) -> PortalResult<String>;
}

/// Built-in templates
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRenderer;

impl DefaultRenderer {
    pub fn new() -> Self {
        Self
    }

    fn dnsmasq(&self, config: &ApConfig) -> PortalResult<String> {
        let interface = sanitize_config_value(&config.interface)?;
        let gateway = sanitize_config_value(config.gateway.trim())?;
        let lease = sanitize_config_value(&config.lease_time)?;
        let (start, end) = validate_dhcp_range(&config.dhcp_range)?;

        let mut conf = String::new();
        conf.push_str(&format!("interface={}\n", interface));
        conf.push_str("bind-interfaces\n");
        conf.push_str(&format!("listen-address={}\n", gateway));
        conf.push_str(&format!(
            "dhcp-range={},{},255.255.255.0,{}\n",
            start, end, lease
        ));
        conf.push_str(&format!("dhcp-option=option:router,{}\n", gateway));
        conf.push_str(&format!("dhcp-option=option:dns-server,{}\n", gateway));
        conf.push_str("dhcp-authoritative\n");
        conf.push_str("no-resolv\n");

        // Resolve every name to the portal so OS connectivity checks land on it
        if config.captive_dns {
            conf.push_str(&format!("address=/#/{}\n", gateway));
        }

        Ok(conf)
    }

    fn hostapd(&self, config: &ApConfig) -> PortalResult<String> {
        let mut conf = String::new();

        conf.push_str(&format!("interface={}\n", sanitize_config_value(&config.interface)?));
        conf.push_str("driver=nl80211\n");
        conf.push_str(&format!("ssid={}\n", sanitize_config_value(&config.ssid)?));
        conf.push_str(&format!(
            "country_code={}\n",
            sanitize_config_value(&config.country_code.to_ascii_uppercase())?
        ));

        let hw_mode = match config.channel {
            Some(channel) if channel > 14 => "a",
            _ => "g",
        };
        conf.push_str(&format!("hw_mode={}\n", hw_mode));
        // 0 asks hostapd for automatic channel selection
        conf.push_str(&format!("channel={}\n", config.channel.unwrap_or(0)));
        conf.push_str("auth_algs=1\n");

        if config.security == SecurityMode::Wpa2 {
            conf.push_str("wpa=2\n");
            conf.push_str(&format!(
                "wpa_passphrase={}\n",
                sanitize_config_value(&config.password)?
            ));
            conf.push_str("wpa_key_mgmt=WPA-PSK\nwpa_pairwise=CCMP\nrsn_pairwise=CCMP\n");
        }

        Ok(conf)
    }
}

impl ConfigRenderer for DefaultRenderer {
    fn render(&self, template: TemplateKind, config: &ApConfig) -> PortalResult<String> {
        match template {
            TemplateKind::Dnsmasq => self.dnsmasq(config),
            TemplateKind::Hostapd => self.hostapd(config),
        }
    }
}
