//! Common helpers shared by the hotspot backends and the service

use crate::command::{CommandOutput, Invocation};
use crate::error::{PortalError, PortalResult};
use crate::tools::Toolbox;
use tracing::{debug, info, warn};

/// Stop the distribution's dnsmasq unit so it does not hold port 53/67
///
/// Only logged on failure; the unit is often not installed at all.
pub async fn stop_system_dnsmasq(tools: &Toolbox) {
    let inv = tools.systemctl().args(["stop", "dnsmasq"]);
    match tools.run(inv).await {
        Ok(_) => debug!("Stopped system dnsmasq service"),
        Err(e) => warn!("Could not stop system dnsmasq service: {}", e),
    }
}

/// Turn on IPv4 forwarding for the running session (not persisted)
pub async fn enable_ip_forwarding(tools: &Toolbox) -> PortalResult<()> {
    tools
        .run(tools.sysctl().args(["-w", "net.ipv4.ip_forward=1"]))
        .await?;
    info!("Enabled IPv4 forwarding");
    Ok(())
}

/// Run a teardown step, pushing any failure onto `failures`
pub async fn run_collecting(
    tools: &Toolbox,
    invocation: Invocation,
    failures: &mut Vec<PortalError>,
) -> Option<CommandOutput> {
    let line = invocation.to_string();
    match tools.run(invocation).await {
        Ok(output) => Some(output),
        Err(e) => {
            warn!("Cleanup step '{}' failed: {}", line, e);
            failures.push(e);
            None
        }
    }
}

/// nmcli reports disconnecting an idle device as an error
pub fn is_not_active(err: &PortalError) -> bool {
    err.command_output()
        .map(|out| out.contains("not active") || out.contains("not connected"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RecordingExecutor;
    use std::sync::Arc;

    #[test]
    fn test_is_not_active() {
        let err = PortalError::CommandFailed {
            cmd: "nmcli device disconnect wlan0".to_string(),
            code: Some(6),
            stdout: String::new(),
            stderr: "Error: Device 'wlan0' (/org/freedesktop/...) disconnecting failed: This device is not active".to_string(),
        };
        assert!(is_not_active(&err));
        assert!(!is_not_active(&PortalError::AlreadyRunning));
    }

    #[tokio::test]
    async fn test_run_collecting_keeps_going() {
        let exec = Arc::new(RecordingExecutor::new());
        exec.fail("ip addr flush", 2, "Cannot find device");
        let tools = Toolbox::with_executor(exec.clone());

        let mut failures = Vec::new();
        let first = run_collecting(&tools, tools.ip().args(["addr", "flush", "dev", "wlan0"]), &mut failures).await;
        let second = run_collecting(&tools, tools.ip().args(["link", "set", "wlan0", "up"]), &mut failures).await;

        assert!(first.is_none());
        assert!(second.is_some());
        assert_eq!(failures.len(), 1);
        assert_eq!(exec.command_lines().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_system_dnsmasq_never_fails() {
        let exec = Arc::new(RecordingExecutor::new());
        exec.fail("systemctl stop dnsmasq", 5, "Unit dnsmasq.service not loaded.");
        let tools = Toolbox::with_executor(exec.clone());

        stop_system_dnsmasq(&tools).await;
        assert_eq!(exec.command_lines(), vec!["systemctl stop dnsmasq"]);
    }
}
