use super::config::ApConfig;
use crate::error::{PortalError, PortalResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an access point service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessPointState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl AccessPointState {
    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: AccessPointState) -> bool {
        use AccessPointState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Failed, Stopping)
                // start future dropped before it finished
                | (Starting, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// Checked transition
    pub fn transition(self, next: AccessPointState) -> PortalResult<AccessPointState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PortalError::InvalidState(format!(
                "cannot go from {} to {}",
                self, next
            )))
        }
    }
}

impl fmt::Display for AccessPointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessPointState::Stopped => "stopped",
            AccessPointState::Starting => "starting",
            AccessPointState::Running => "running",
            AccessPointState::Stopping => "stopping",
            AccessPointState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Which subsystem owns the radio while the AP is up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// NetworkManager hotspot profile
    #[default]
    NetworkManager,
    /// hostapd daemon supervised by this process
    Hostapd,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::NetworkManager => write!(f, "network-manager"),
            BackendKind::Hostapd => write!(f, "hostapd"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network-manager" | "networkmanager" | "nm" => Ok(BackendKind::NetworkManager),
            "hostapd" => Ok(BackendKind::Hostapd),
            other => Err(PortalError::Config(format!("unknown backend '{}'", other))),
        }
    }
}

/// Radio-side half of an access point: everything up to a beaconing SSID
///
/// The service drives a backend through prepare, bring-up and tear-down and
/// owns everything else (forwarding, firewall, DHCP/DNS).
#[async_trait]
pub trait HotspotBackend: Send + Sync {
    /// Backend name for logs (e.g. "network-manager", "hostapd")
    fn name(&self) -> &str;

    /// Put the interface into a state where AP mode can be enabled
    async fn prepare_interface(&mut self, config: &ApConfig) -> PortalResult<()>;

    /// Start beaconing with the configured SSID and security
    async fn bring_up(&mut self, config: &ApConfig) -> PortalResult<()>;

    /// Undo prepare and bring-up; every step runs, failures are returned
    async fn tear_down(&mut self, config: &ApConfig) -> Vec<PortalError>;
}

/// Start/stop capability shared by every access point implementation
#[async_trait]
pub trait AccessPoint: Send + Sync {
    async fn start(&self, config: ApConfig) -> PortalResult<()>;

    async fn stop(&self) -> PortalResult<()>;

    fn is_running(&self) -> bool;
}
