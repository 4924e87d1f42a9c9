//! Input validation and sanitization
//!
//! Everything that ends up on a command line or in a rendered daemon config
//! passes through here first.

use crate::error::{PortalError, PortalResult};
use std::net::Ipv4Addr;

/// Maximum length for interface names (Linux kernel limit is 15)
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Maximum length for configuration values
const MAX_CONFIG_VALUE_LEN: usize = 255;

/// Maximum length for tool output echoed back to users
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Validate interface name to prevent command injection
///
/// Interface names must be alphanumeric with optional dashes and underscores,
/// and no longer than 15 characters (Linux kernel limit)
pub fn validate_interface_name(name: &str) -> PortalResult<()> {
    if name.is_empty() {
        return Err(PortalError::InvalidConfig(
            "interface is required".to_string()
        ));
    }

    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(PortalError::InvalidConfig(
            format!("Interface name too long (max {} characters)", MAX_INTERFACE_NAME_LEN)
        ));
    }

    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
            return Err(PortalError::InvalidConfig(
                format!("Invalid interface name '{}': contains invalid character '{}'", name, c)
            ));
        }
    }

    // Don't allow names starting with dash (could be interpreted as option)
    if name.starts_with('-') {
        return Err(PortalError::InvalidConfig(
            "Interface name cannot start with dash".to_string()
        ));
    }

    Ok(())
}

/// Validate an IPv4 address
pub fn validate_ipv4_address(addr: &str) -> PortalResult<Ipv4Addr> {
    addr.parse::<Ipv4Addr>()
        .map_err(|_| PortalError::InvalidConfig(
            format!("Invalid IPv4 address: {}", addr)
        ))
}

/// Validate a dnsmasq style `start,end` DHCP range
pub fn validate_dhcp_range(range: &str) -> PortalResult<(Ipv4Addr, Ipv4Addr)> {
    if range.trim().is_empty() {
        return Err(PortalError::InvalidConfig("DHCP range is required".to_string()));
    }

    let (start, end) = range.split_once(',').ok_or_else(|| {
        PortalError::InvalidConfig(format!(
            "DHCP range '{}' must be 'start,end' (e.g. 192.168.4.2,192.168.4.50)",
            range
        ))
    })?;

    let start = validate_ipv4_address(start.trim())?;
    let end = validate_ipv4_address(end.trim())?;

    if u32::from(start) > u32::from(end) {
        return Err(PortalError::InvalidConfig(format!(
            "DHCP range start {} is after end {}",
            start, end
        )));
    }

    Ok((start, end))
}

/// Sanitize configuration values to prevent injection
///
/// Rejects anything that could break out of a `key=value` line
pub fn sanitize_config_value(value: &str) -> PortalResult<String> {
    // Check for control characters (covers newlines and null bytes)
    if value.chars().any(|c| c.is_control() && c != '\t') {
        return Err(PortalError::InvalidConfig(
            "Configuration value contains invalid control characters".to_string()
        ));
    }

    if value.len() > MAX_CONFIG_VALUE_LEN {
        return Err(PortalError::InvalidConfig(
            format!("Configuration value too long (max {} characters)", MAX_CONFIG_VALUE_LEN)
        ));
    }

    Ok(value.to_string())
}

/// Validate WiFi SSID
///
/// SSIDs can be 1-32 bytes without control characters
pub fn validate_ssid(ssid: &str) -> PortalResult<()> {
    if ssid.is_empty() {
        return Err(PortalError::InvalidConfig(
            "ssid is required".to_string()
        ));
    }

    if ssid.len() > 32 {
        return Err(PortalError::InvalidConfig(
            "SSID cannot exceed 32 bytes".to_string()
        ));
    }

    if ssid.chars().any(|c| c.is_control()) {
        return Err(PortalError::InvalidConfig(
            "SSID contains invalid control characters".to_string()
        ));
    }

    Ok(())
}

/// Validate WiFi password (WPA2-PSK)
///
/// WPA2 requirements: 8-63 ASCII characters
pub fn validate_wifi_password(password: &str) -> PortalResult<()> {
    if password.len() < 8 {
        return Err(PortalError::InvalidConfig(
            "password must be at least 8 characters for WPA2".to_string()
        ));
    }

    if password.len() > 63 {
        return Err(PortalError::InvalidConfig(
            "WiFi password cannot exceed 63 characters".to_string()
        ));
    }

    if !password.is_ascii() {
        return Err(PortalError::InvalidConfig(
            "WiFi password must contain only ASCII characters".to_string()
        ));
    }

    if password.chars().any(|c| c.is_control()) {
        return Err(PortalError::InvalidConfig(
            "WiFi password contains invalid control characters".to_string()
        ));
    }

    Ok(())
}

/// Validate country code (ISO 3166-1 alpha-2 shape)
pub fn validate_country_code(code: &str) -> PortalResult<()> {
    if code.is_empty() {
        return Err(PortalError::InvalidConfig("country code is required".to_string()));
    }

    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(PortalError::InvalidConfig(
            format!("Country code must be 2 letters, got '{}'", code)
        ));
    }

    Ok(())
}

/// Validate WiFi channel (2.4 GHz 1-14 or a 5 GHz channel)
pub fn validate_wifi_channel(channel: u8) -> PortalResult<()> {
    const CHANNELS_5GHZ: &[u8] = &[
        36, 40, 44, 48, 52, 56, 60, 64, 100, 104, 108, 112,
        116, 120, 124, 128, 132, 136, 140, 149, 153, 157, 161, 165,
    ];

    if (1..=14).contains(&channel) || CHANNELS_5GHZ.contains(&channel) {
        Ok(())
    } else {
        Err(PortalError::InvalidConfig(format!("Invalid WiFi channel {}", channel)))
    }
}

/// Truncate tool output before it is embedded in user-facing errors
pub fn sanitize_error_message(output: &str) -> String {
    let mut sanitized = output.trim().to_string();

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let mut cut = MAX_ERROR_MESSAGE_LEN;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str("... (truncated)");
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_name_validation() {
        assert!(validate_interface_name("wlan0").is_ok());
        assert!(validate_interface_name("wlp2s0").is_ok());
        assert!(validate_interface_name("wlan0.1").is_ok());
        assert!(validate_interface_name("ap_0").is_ok());

        // Command injection attempts
        assert!(validate_interface_name("wlan0; rm -rf /").is_err());
        assert!(validate_interface_name("wlan0`id`").is_err());
        assert!(validate_interface_name("wlan0\nx").is_err());

        assert!(validate_interface_name("verylonginterfacename").is_err());
        assert!(validate_interface_name("-wlan0").is_err());
        assert!(validate_interface_name("").is_err());
    }

    #[test]
    fn test_dhcp_range_validation() {
        let (start, end) = validate_dhcp_range("192.168.4.2,192.168.4.50").unwrap();
        assert_eq!(start, Ipv4Addr::new(192, 168, 4, 2));
        assert_eq!(end, Ipv4Addr::new(192, 168, 4, 50));

        assert!(validate_dhcp_range("192.168.4.2, 192.168.4.50").is_ok());
        assert!(validate_dhcp_range("").is_err());
        assert!(validate_dhcp_range("192.168.4.2").is_err());
        assert!(validate_dhcp_range("192.168.4.50,192.168.4.2").is_err());
        assert!(validate_dhcp_range("192.168.4.2,nope").is_err());
    }

    #[test]
    fn test_ssid_validation() {
        assert!(validate_ssid("GoWiFiPortal").is_ok());
        assert!(validate_ssid("").is_err());
        assert!(validate_ssid(&"x".repeat(33)).is_err());
        assert!(validate_ssid("bad\nssid").is_err());
    }

    #[test]
    fn test_wifi_password_validation() {
        assert!(validate_wifi_password("12345678").is_ok());
        assert!(validate_wifi_password("short").is_err());
        assert!(validate_wifi_password(&"a".repeat(64)).is_err());
        assert!(validate_wifi_password("pässwörd1").is_err());
        assert!(validate_wifi_password("pass\nword").is_err());
    }

    #[test]
    fn test_country_code_validation() {
        assert!(validate_country_code("SE").is_ok());
        assert!(validate_country_code("us").is_ok());
        assert!(validate_country_code("").is_err());
        assert!(validate_country_code("USA").is_err());
        assert!(validate_country_code("9Z").is_err());
    }

    #[test]
    fn test_wifi_channel_validation() {
        assert!(validate_wifi_channel(1).is_ok());
        assert!(validate_wifi_channel(14).is_ok());
        assert!(validate_wifi_channel(36).is_ok());
        assert!(validate_wifi_channel(0).is_err());
        assert!(validate_wifi_channel(15).is_err());
    }

    #[test]
    fn test_sanitize_config_value() {
        assert_eq!(sanitize_config_value("wlan0").unwrap(), "wlan0");
        assert!(sanitize_config_value("a\nserver=1.2.3.4").is_err());
        assert!(sanitize_config_value(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_sanitize_error_message_truncates() {
        let long = "e".repeat(600);
        let out = sanitize_error_message(&long);
        assert!(out.ends_with("... (truncated)"));
        assert_eq!(sanitize_error_message("  short \n"), "short");
    }
}
