//! DHCP/DNS service for access point clients via dnsmasq

use crate::ap::ApConfig;
use crate::daemon::{write_private_config, Daemon};
use crate::error::{PortalError, PortalResult};
use crate::template::{ConfigRenderer, TemplateKind};
use crate::tools::Toolbox;
use std::path::Path;
use tracing::info;

/// dnsmasq bound to the AP interface for the lifetime of a session
pub struct DhcpServer {
    daemon: Daemon,
}

impl DhcpServer {
    /// Render the dnsmasq config and start dnsmasq in the foreground
    pub async fn launch(
        tools: &Toolbox,
        renderer: &dyn ConfigRenderer,
        config: &ApConfig,
    ) -> PortalResult<Self> {
        let conf = renderer.render(TemplateKind::Dnsmasq, config)?;
        let path = write_private_config("dnsmasq-", &conf)?;

        let invocation = tools
            .dnsmasq()
            .arg("-C")
            .arg(path.display().to_string())
            .arg("--keep-in-foreground");

        info!(
            "Starting dnsmasq on {} (range {})",
            config.interface, config.dhcp_range
        );
        let daemon = Daemon::launch(
            tools,
            "dnsmasq",
            invocation,
            path,
            tools.timeouts().settle(),
        )
        .await?;

        Ok(Self { daemon })
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.daemon.config_path()
    }

    /// Stop dnsmasq and remove its config
    pub async fn shutdown(self, tools: &Toolbox) -> Vec<PortalError> {
        info!("Stopping dnsmasq");
        self.daemon.shutdown(tools).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ap::SecurityMode;
    use crate::command::RecordingExecutor;
    use crate::config::{Timeouts, ToolPaths};
    use crate::template::DefaultRenderer;
    use std::sync::Arc;

    fn config() -> ApConfig {
        ApConfig {
            interface: "wlan0".to_string(),
            ssid: "Lobby".to_string(),
            security: SecurityMode::Open,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_launch_and_shutdown() {
        let exec = Arc::new(RecordingExecutor::new());
        let tools = Toolbox::new(exec.clone(), ToolPaths::default(), Timeouts::immediate());

        let server = DhcpServer::launch(&tools, &DefaultRenderer, &config())
            .await
            .unwrap();
        let path = server.config_path().unwrap().to_path_buf();

        let rendered = std::fs::read_to_string(&path).unwrap();
        assert!(rendered.contains("interface=wlan0"));

        let spawned = exec.spawned();
        assert_eq!(spawned.len(), 1);
        assert_eq!(
            spawned[0].to_string(),
            format!("dnsmasq -C {} --keep-in-foreground", path.display())
        );

        assert!(server.shutdown(&tools).await.is_empty());
        assert!(!path.exists());
        assert_eq!(exec.terminations(), 1);
    }

    #[tokio::test]
    async fn test_immediate_exit_is_error() {
        let exec = Arc::new(RecordingExecutor::new());
        exec.exit_early("dnsmasq", 2);
        let tools = Toolbox::new(exec.clone(), ToolPaths::default(), Timeouts::immediate());

        let result = DhcpServer::launch(&tools, &DefaultRenderer, &config()).await;
        assert!(matches!(result, Err(PortalError::Service(_))));
    }
}
