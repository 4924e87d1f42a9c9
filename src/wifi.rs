//! Nearby network scan results
//!
//! Parsing of `nmcli -t -f SSID,BSSID,MODE,CHAN,FREQ,RATE,SIGNAL,BARS,SECURITY`
//! output into [`WirelessNetwork`] records.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Fields requested from nmcli, in output order
pub const SCAN_FIELDS: &str = "SSID,BSSID,MODE,CHAN,FREQ,RATE,SIGNAL,BARS,SECURITY";

/// Number of colon-delimited fields in a complete terse record
const TERSE_FIELD_COUNT: usize = 9;

/// Shortest whitespace-delimited record still worth keeping
const MIN_FALLBACK_FIELDS: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirelessNetwork {
    pub ssid: String,
    /// Human-readable name (same as SSID for now)
    pub display_name: String,
    pub bssid: String,
    /// Signal strength normalized to 0-100
    pub signal: u8,
    /// "none", "unknown" or the tool's security description (e.g. "WPA2")
    pub security: String,
    pub channel: Option<u16>,
    /// Frequency in MHz
    pub frequency: Option<u32>,
}

impl WirelessNetwork {
    pub fn is_open(&self) -> bool {
        self.security == "none"
    }
}

/// A scan record that could not be turned into a network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanLineError {
    pub line: String,
    pub fields: usize,
}

impl fmt::Display for ScanLineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan record has only {} fields: {:?}", self.fields, self.line)
    }
}

/// Convert a dBm reading to a 0-100 percentage
///
/// -30 dBm or stronger is 100, -90 dBm or weaker is 0, linear in between.
pub fn dbm_to_percent(dbm: i32) -> u8 {
    if dbm >= -30 {
        100
    } else if dbm <= -90 {
        0
    } else {
        (((dbm as f64 + 90.0) / 60.0) * 100.0) as u8
    }
}

/// Interpret a SIGNAL field
///
/// nmcli reports a 0-100 quality; other tools report dBm. Negative values
/// and values carrying a `dBm` suffix are treated as dBm.
pub fn parse_signal(field: &str) -> Option<u8> {
    let trimmed = field.trim();
    let (number, is_dbm) = match trimmed.strip_suffix("dBm") {
        Some(rest) => (rest.trim(), true),
        None => (trimmed, false),
    };

    let value: i32 = number.parse().ok()?;
    if is_dbm || value < 0 {
        Some(dbm_to_percent(value))
    } else {
        Some(value.min(100) as u8)
    }
}

/// Split a terse nmcli line on unescaped colons
///
/// nmcli escapes literal colons and backslashes inside values (`\:`, `\\`),
/// which matters for BSSIDs.
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => current.push(next),
                None => current.push('\\'),
            },
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn leading_number<T: std::str::FromStr>(field: &str) -> Option<T> {
    field.split_whitespace().next()?.parse().ok()
}

/// Parse one scan record
///
/// `Ok(None)` for lines that are skipped on purpose (blank, hidden SSID),
/// `Err` for malformed records.
pub fn parse_scan_line(line: &str) -> Result<Option<WirelessNetwork>, ScanLineError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let mut fields = split_terse(line);
    if fields.len() < TERSE_FIELD_COUNT {
        fields = line.split_whitespace().map(str::to_string).collect();
        if fields.len() < MIN_FALLBACK_FIELDS {
            return Err(ScanLineError {
                line: line.to_string(),
                fields: fields.len(),
            });
        }
    }

    let ssid = fields[0].clone();
    if ssid.is_empty() || ssid == "--" {
        return Ok(None);
    }

    let security = match fields.get(8) {
        Some(s) if s.trim().is_empty() || s.trim() == "--" => "none".to_string(),
        Some(s) => s.trim().to_string(),
        None => "unknown".to_string(),
    };

    Ok(Some(WirelessNetwork {
        display_name: ssid.clone(),
        ssid,
        bssid: fields[1].clone(),
        signal: fields.get(6).and_then(|s| parse_signal(s)).unwrap_or(0),
        security,
        channel: fields.get(3).and_then(|s| leading_number(s)),
        frequency: fields.get(4).and_then(|s| leading_number(s)),
    }))
}

/// Parse a whole scan listing, skipping records that cannot be parsed
pub fn parse_scan_output(output: &str) -> Vec<WirelessNetwork> {
    let mut networks = Vec::new();

    for line in output.lines() {
        match parse_scan_line(line) {
            Ok(Some(network)) => networks.push(network),
            Ok(None) => {}
            Err(e) => debug!("Skipping {}", e),
        }
    }

    debug!("Parsed {} networks", networks.len());
    networks
}
