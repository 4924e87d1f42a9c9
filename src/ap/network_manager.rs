//! NetworkManager-managed hotspot
//!
//! The AP is an nmcli connection profile in `wifi.mode ap` with a static
//! gateway address; NetworkManager runs wpa_supplicant in AP mode for us.

use super::backend::HotspotBackend;
use super::common::{is_not_active, run_collecting, stop_system_dnsmasq};
use super::config::{ApConfig, SecurityMode};
use crate::command::Invocation;
use crate::error::{PortalError, PortalResult};
use crate::tools::Toolbox;
use async_trait::async_trait;
use tracing::{debug, info, warn};

pub struct NetworkManagerBackend {
    tools: Toolbox,
}

impl NetworkManagerBackend {
    pub fn new(tools: Toolbox) -> Self {
        Self { tools }
    }

    /// `nmcli connection add` for the hotspot profile
    pub fn connection_add(&self, config: &ApConfig) -> Invocation {
        let mut inv = self.tools.nmcli().args([
            "connection",
            "add",
            "type",
            "wifi",
            "ifname",
            config.interface.as_str(),
            "con-name",
            config.name.as_str(),
            "autoconnect",
            "yes",
            "wifi.mode",
            "ap",
            "wifi.ssid",
            config.ssid.as_str(),
        ]);

        if let (Some(channel), Some(band)) = (config.channel, config.band()) {
            inv = inv
                .args(["wifi.band", band])
                .arg("wifi.channel")
                .arg(channel.to_string());
        }

        inv = inv
            .args(["ipv4.method", "manual", "ipv4.addresses"])
            .arg(config.gateway_cidr());

        if config.security == SecurityMode::Wpa2 {
            inv = inv.args([
                "wifi-sec.key-mgmt",
                "wpa-psk",
                "wifi-sec.proto",
                "rsn",
                "wifi-sec.pairwise",
                "ccmp",
                "wifi-sec.group",
                "ccmp",
                "wifi-sec.psk",
                config.password.as_str(),
            ]);
        }

        inv
    }
}

#[async_trait]
impl HotspotBackend for NetworkManagerBackend {
    fn name(&self) -> &str {
        "network-manager"
    }

    async fn prepare_interface(&mut self, config: &ApConfig) -> PortalResult<()> {
        let iface = config.interface.as_str();
        debug!("Preparing {} for a NetworkManager hotspot", iface);

        stop_system_dnsmasq(&self.tools).await;

        self.tools
            .run(self.tools.nmcli().args(["device", "set", iface, "managed", "yes"]))
            .await?;

        match self
            .tools
            .run(self.tools.nmcli().args(["device", "disconnect", iface]))
            .await
        {
            Ok(_) => debug!("Disconnected {}", iface),
            Err(e) if is_not_active(&e) => debug!("{} had no active connection", iface),
            Err(e) => warn!("Failed to disconnect {}: {}", iface, e),
        }

        let status = self
            .tools
            .run(self.tools.nmcli().args(["device", "show", iface]))
            .await?;
        debug!("{} status:\n{}", iface, status.stdout.trim_end());

        Ok(())
    }

    async fn bring_up(&mut self, config: &ApConfig) -> PortalResult<()> {
        info!(
            "Creating hotspot '{}' on {} (ssid '{}', {})",
            config.name, config.interface, config.ssid, config.security
        );

        self.tools.run(self.connection_add(config)).await?;

        let settle = self.tools.timeouts().settle();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        self.tools
            .run(self.tools.nmcli().args(["connection", "up", config.name.as_str()]))
            .await
            .map_err(|e| match e {
                PortalError::CommandFailed { .. } => {
                    PortalError::Service(format!("Failed to activate hotspot: {}", e))
                }
                other => other,
            })?;

        info!("Hotspot '{}' active", config.name);
        Ok(())
    }

    async fn tear_down(&mut self, config: &ApConfig) -> Vec<PortalError> {
        let mut failures = Vec::new();
        let name = config.name.as_str();

        run_collecting(
            &self.tools,
            self.tools.nmcli().args(["connection", "down", name]),
            &mut failures,
        )
        .await;
        run_collecting(
            &self.tools,
            self.tools.nmcli().args(["connection", "delete", name]),
            &mut failures,
        )
        .await;

        failures
    }
}
