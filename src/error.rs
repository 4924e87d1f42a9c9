//! Error types for portalctl

use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortalError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// External tool exited unsuccessfully; both outputs are kept for diagnostics
    #[error("Command '{cmd}' failed with {}: {}", describe_code(.code), summarize(.stderr, .stdout))]
    CommandFailed {
        cmd: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// External tool did not finish in time
    #[error("Timeout: '{cmd}' did not finish within {after:?}")]
    Timeout { cmd: String, after: Duration },

    /// Access point configuration rejected before any system change
    #[error("Invalid access point configuration: {0}")]
    InvalidConfig(String),

    /// Start requested while a session is active
    #[error("Access point service is already running")]
    AlreadyRunning,

    /// Lifecycle transition not allowed from the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// No wireless interface can host an access point
    #[error("No AP-capable interface found")]
    NoCapableInterface,

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Joining a network failed
    #[error("Failed to connect to '{ssid}': {reason}")]
    ConnectionFailed { ssid: String, reason: String },

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Supervised daemon error (dnsmasq, hostapd)
    #[error("Service error: {0}")]
    Service(String),
}

impl PortalError {
    /// Combined stdout/stderr of a failed command, if this error carries one
    pub fn command_output(&self) -> Option<String> {
        match self {
            PortalError::CommandFailed { stdout, stderr, .. } => {
                Some(format!("{}{}", stdout, stderr))
            }
            _ => None,
        }
    }
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "no exit code".to_string(),
    }
}

fn summarize(stderr: &str, stdout: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.to_string()
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(error: serde_json::Error) -> Self {
        PortalError::Parse(error.to_string())
    }
}

pub type PortalResult<T> = Result<T, PortalError>;
