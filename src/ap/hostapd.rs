//! Direct hostapd daemon
//!
//! The interface is taken away from NetworkManager, reset, addressed by hand
//! and handed to a supervised hostapd process.

use super::backend::HotspotBackend;
use super::common::{run_collecting, stop_system_dnsmasq};
use super::config::ApConfig;
use crate::daemon::{write_private_config, Daemon};
use crate::error::{PortalError, PortalResult};
use crate::template::{ConfigRenderer, TemplateKind};
use crate::tools::Toolbox;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

pub struct HostapdBackend {
    tools: Toolbox,
    renderer: Arc<dyn ConfigRenderer>,
    daemon: Option<Daemon>,
}

impl HostapdBackend {
    pub fn new(tools: Toolbox, renderer: Arc<dyn ConfigRenderer>) -> Self {
        Self {
            tools,
            renderer,
            daemon: None,
        }
    }

    pub fn is_supervising(&self) -> bool {
        self.daemon.is_some()
    }

    async fn ip(&self, args: &[&str]) -> PortalResult<()> {
        self.tools.run(self.tools.ip().args(args.iter().copied())).await?;
        Ok(())
    }

    async fn iw(&self, args: &[&str]) -> PortalResult<()> {
        self.tools.run(self.tools.iw().args(args.iter().copied())).await?;
        Ok(())
    }
}

#[async_trait]
impl HotspotBackend for HostapdBackend {
    fn name(&self) -> &str {
        "hostapd"
    }

    async fn prepare_interface(&mut self, config: &ApConfig) -> PortalResult<()> {
        let iface = config.interface.as_str();
        debug!("Preparing {} for hostapd", iface);

        stop_system_dnsmasq(&self.tools).await;

        self.tools
            .run(self.tools.nmcli().args(["device", "set", iface, "managed", "no"]))
            .await?;

        self.ip(&["link", "set", iface, "down"]).await?;
        self.ip(&["addr", "flush", "dev", iface]).await?;
        self.iw(&["dev", iface, "set", "type", "managed"]).await?;
        self.ip(&["link", "set", iface, "up"]).await?;

        let country = config.country_code.to_ascii_uppercase();
        self.iw(&["reg", "set", country.as_str()]).await?;

        let status = self
            .tools
            .run(self.tools.ip().args(["link", "show", iface]))
            .await?;
        debug!("{} status: {}", iface, status.stdout.trim_end());

        Ok(())
    }

    async fn bring_up(&mut self, config: &ApConfig) -> PortalResult<()> {
        if self.daemon.is_some() {
            return Err(PortalError::InvalidState(
                "hostapd is already supervised".to_string(),
            ));
        }

        let cidr = config.gateway_cidr();
        self.ip(&["addr", "add", cidr.as_str(), "dev", config.interface.as_str()])
            .await?;

        let conf = self.renderer.render(TemplateKind::Hostapd, config)?;
        let path = write_private_config("hostapd-", &conf)?;
        let invocation = self.tools.hostapd().arg(path.display().to_string());

        info!(
            "Starting hostapd on {} (ssid '{}', {})",
            config.interface, config.ssid, config.security
        );
        let daemon = Daemon::launch(
            &self.tools,
            "hostapd",
            invocation,
            path,
            self.tools.timeouts().settle(),
        )
        .await?;

        self.daemon = Some(daemon);
        Ok(())
    }

    async fn tear_down(&mut self, config: &ApConfig) -> Vec<PortalError> {
        let mut failures = Vec::new();
        let iface = config.interface.as_str();

        if let Some(daemon) = self.daemon.take() {
            failures.extend(daemon.shutdown(&self.tools).await);
        }

        run_collecting(
            &self.tools,
            self.tools.ip().args(["addr", "flush", "dev", iface]),
            &mut failures,
        )
        .await;
        run_collecting(
            &self.tools,
            self.tools.nmcli().args(["device", "set", iface, "managed", "yes"]),
            &mut failures,
        )
        .await;

        failures
    }
}
