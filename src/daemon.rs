//! Supervised foreground daemons with private config files
//!
//! dnsmasq and hostapd are both run the same way: config rendered to a
//! mode-0600 temp file, process spawned in the foreground, checked after a
//! settle delay, and on shutdown terminated, reaped and its file removed.

use crate::command::{ChildProcess, Invocation};
use crate::error::{PortalError, PortalResult};
use crate::tools::Toolbox;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::TempPath;
use tracing::{debug, info, warn};

/// Write `contents` to a fresh private temp file named `<prefix>XXXX.conf`
pub fn write_private_config(prefix: &str, contents: &str) -> PortalResult<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".conf")
        .tempfile()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file.into_temp_path())
}

/// A running daemon and the config file it was started with
pub struct Daemon {
    name: String,
    child: Box<dyn ChildProcess>,
    config_path: Option<TempPath>,
}

impl Daemon {
    pub fn new(name: &str, child: Box<dyn ChildProcess>, config_path: Option<TempPath>) -> Self {
        Self {
            name: name.to_string(),
            child,
            config_path,
        }
    }

    /// Spawn `invocation`, wait `settle`, and fail if the process already exited
    ///
    /// On failure the config file is removed with the dropped `TempPath`.
    pub async fn launch(
        tools: &Toolbox,
        name: &str,
        invocation: Invocation,
        config_path: TempPath,
        settle: Duration,
    ) -> PortalResult<Self> {
        let mut child = tools.executor().spawn(&invocation).await.map_err(|e| {
            PortalError::Service(format!("Failed to start {}: {}", name, e))
        })?;

        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        if let Some(code) = child.try_exit()? {
            return Err(PortalError::Service(format!(
                "{} exited immediately with code {}",
                name, code
            )));
        }

        info!("{} running (pid {:?})", name, child.id());
        Ok(Self::new(name, child, Some(config_path)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Terminate, reap and remove the config file; every step runs
    pub async fn shutdown(mut self, tools: &Toolbox) -> Vec<PortalError> {
        let mut failures = Vec::new();
        let grace = tools.timeouts().terminate_grace();

        match self.child.terminate(grace).await {
            Ok(code) => debug!("{} stopped with {:?}", self.name, code),
            Err(e) => {
                warn!("Failed to terminate {}: {}", self.name, e);
                failures.push(e);
                if let Some(path) = &self.config_path {
                    self.kill_by_pattern(tools, path).await;
                }
            }
        }

        if let Some(path) = self.config_path.take() {
            let shown = path.display().to_string();
            if let Err(e) = path.close() {
                warn!("Failed to remove {}: {}", shown, e);
                failures.push(e.into());
            }
        }

        failures
    }

    async fn kill_by_pattern(&self, tools: &Toolbox, path: &Path) {
        let pattern = format!("{}.*{}", self.name, path.display());
        match tools.run(tools.pkill().args(["-f", pattern.as_str()])).await {
            Ok(_) => info!("Killed leftover {} by pattern", self.name),
            // pkill exits 1 when nothing matched
            Err(PortalError::CommandFailed { code: Some(1), .. }) => {}
            Err(e) => warn!("pkill fallback for {} failed: {}", self.name, e),
        }
    }
}
