//! Command builders for the external tools the crate drives

use crate::command::{CommandExecutor, CommandOutput, Invocation};
use crate::config::{Timeouts, ToolPaths};
use crate::error::PortalResult;
use std::sync::Arc;

/// Executor plus tool locations and time bounds, shared by every component
#[derive(Clone)]
pub struct Toolbox {
    executor: Arc<dyn CommandExecutor>,
    paths: ToolPaths,
    timeouts: Timeouts,
}

impl Toolbox {
    pub fn new(executor: Arc<dyn CommandExecutor>, paths: ToolPaths, timeouts: Timeouts) -> Self {
        Self {
            executor,
            paths,
            timeouts,
        }
    }

    /// Default tool names with the given executor
    pub fn with_executor(executor: Arc<dyn CommandExecutor>) -> Self {
        Self::new(executor, ToolPaths::default(), Timeouts::default())
    }

    pub fn executor(&self) -> &Arc<dyn CommandExecutor> {
        &self.executor
    }

    pub fn paths(&self) -> &ToolPaths {
        &self.paths
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub async fn run(&self, invocation: Invocation) -> PortalResult<CommandOutput> {
        self.executor.run(&invocation).await
    }

    fn tool(&self, program: &str) -> Invocation {
        Invocation::new(program).timeout(self.timeouts.command())
    }

    pub fn nmcli(&self) -> Invocation {
        self.tool(&self.paths.nmcli)
    }

    /// nmcli bounded by the scan timeout
    pub fn nmcli_scan(&self) -> Invocation {
        Invocation::new(&self.paths.nmcli).timeout(self.timeouts.scan())
    }

    pub fn ip(&self) -> Invocation {
        self.tool(&self.paths.ip)
    }

    pub fn iw(&self) -> Invocation {
        self.tool(&self.paths.iw)
    }

    pub fn systemctl(&self) -> Invocation {
        self.tool(&self.paths.systemctl)
    }

    pub fn sysctl(&self) -> Invocation {
        self.tool(&self.paths.sysctl)
    }

    pub fn ufw(&self) -> Invocation {
        self.tool(&self.paths.ufw)
    }

    pub fn iptables(&self) -> Invocation {
        self.tool(&self.paths.iptables)
    }

    pub fn pkill(&self) -> Invocation {
        self.tool(&self.paths.pkill)
    }

    /// Long-lived daemons are spawned, so no timeout applies
    pub fn dnsmasq(&self) -> Invocation {
        Invocation::new(&self.paths.dnsmasq)
    }

    pub fn hostapd(&self) -> Invocation {
        Invocation::new(&self.paths.hostapd)
    }
}
