//! Wireless interface discovery, selection, scanning and joining
//!
//! Enumeration reads sysfs directly; everything else goes through nmcli via
//! the shared [`Toolbox`].

use crate::error::{PortalError, PortalResult};
use crate::tools::Toolbox;
use crate::validation::{sanitize_error_message, validate_interface_name, validate_ssid};
use crate::wifi::{parse_scan_output, split_terse, WirelessNetwork, SCAN_FIELDS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const SYSFS_NET: &str = "/sys/class/net";

/// IFF_UP from <linux/if.h>
const IFF_UP: u32 = 0x1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirelessInterface {
    pub name: String,
    pub mac_address: String,
    /// Administratively up
    pub in_use: bool,
    /// nmcli could drive the device (AP support is assumed from that)
    pub supports_ap: bool,
}

/// Soft problems reported alongside a usable selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SelectionWarning {
    /// Every AP-capable interface is already up; using it may drop a connection
    AllInterfacesInUse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApSelection {
    pub interface: WirelessInterface,
    pub warning: Option<SelectionWarning>,
}

/// Pick the interface to host the AP from an enumeration result
///
/// An unused AP-capable interface wins; otherwise the first AP-capable one is
/// returned with a warning.
pub fn select_ap_interface(interfaces: &[WirelessInterface]) -> PortalResult<ApSelection> {
    let capable: Vec<&WirelessInterface> = interfaces.iter().filter(|i| i.supports_ap).collect();

    if let Some(free) = capable.iter().find(|i| !i.in_use) {
        return Ok(ApSelection {
            interface: (*free).clone(),
            warning: None,
        });
    }

    match capable.first() {
        Some(busy) => Ok(ApSelection {
            interface: (*busy).clone(),
            warning: Some(SelectionWarning::AllInterfacesInUse),
        }),
        None => Err(PortalError::NoCapableInterface),
    }
}

pub struct InterfaceManager {
    tools: Toolbox,
    sysfs_root: PathBuf,
}

impl InterfaceManager {
    pub fn new(tools: Toolbox) -> Self {
        Self::with_sysfs_root(tools, SYSFS_NET)
    }

    /// Read interfaces from another directory laid out like /sys/class/net
    pub fn with_sysfs_root(tools: Toolbox, root: impl Into<PathBuf>) -> Self {
        Self {
            tools,
            sysfs_root: root.into(),
        }
    }

    /// All wireless interfaces, sorted by name
    pub async fn list_wireless_interfaces(&self) -> PortalResult<Vec<WirelessInterface>> {
        let mut entries = fs::read_dir(&self.sysfs_root).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();

        let mut interfaces = Vec::new();
        for name in names {
            let dir = self.sysfs_root.join(&name);
            if !is_dir(&dir.join("wireless")).await {
                continue;
            }

            let mac_address = read_sysfs_string(&dir, "address").await.unwrap_or_default();
            let in_use = read_sysfs_string(&dir, "flags")
                .await
                .and_then(|f| parse_flags(&f))
                .map(|flags| flags & IFF_UP != 0)
                .unwrap_or(false);
            let supports_ap = self.probe_ap_support(&name).await;

            debug!(
                "Found wireless interface {} (mac {}, in use {}, AP {})",
                name, mac_address, in_use, supports_ap
            );
            interfaces.push(WirelessInterface {
                name,
                mac_address,
                in_use,
                supports_ap,
            });
        }

        Ok(interfaces)
    }

    /// Heuristic: if nmcli can list networks on the device, assume AP mode works
    async fn probe_ap_support(&self, interface: &str) -> bool {
        if validate_interface_name(interface).is_err() {
            return false;
        }
        let inv = self
            .tools
            .nmcli()
            .args(["device", "wifi", "list", "ifname", interface]);
        self.tools.run(inv).await.is_ok()
    }

    /// Best interface to host the access point
    pub async fn best_ap_interface(&self) -> PortalResult<ApSelection> {
        let interfaces = self.list_wireless_interfaces().await?;
        let selection = select_ap_interface(&interfaces)?;
        if selection.warning.is_some() {
            warn!(
                "All AP-capable interfaces are in use, falling back to {}",
                selection.interface.name
            );
        }
        Ok(selection)
    }

    /// Scan for nearby networks, optionally on one interface
    pub async fn list_available_networks(
        &self,
        interface: Option<&str>,
    ) -> PortalResult<Vec<WirelessNetwork>> {
        if let Some(iface) = interface {
            validate_interface_name(iface)?;
        }

        let mut rescan = self.tools.nmcli_scan().args(["device", "wifi", "rescan"]);
        if let Some(iface) = interface {
            rescan = rescan.args(["ifname", iface]);
        }
        if let Err(e) = self.tools.run(rescan).await {
            warn!("WiFi rescan failed, using cached results: {}", e);
        }

        let list = self
            .tools
            .nmcli_scan()
            .args(["-t", "-f", SCAN_FIELDS, "device", "wifi", "list"]);

        let output = match interface {
            Some(iface) => {
                match self.tools.run(list.clone().args(["ifname", iface])).await {
                    Ok(output) => output,
                    Err(e) => {
                        warn!("Scan on {} failed ({}), retrying on all interfaces", iface, e);
                        self.tools.run(list).await?
                    }
                }
            }
            None => self.tools.run(list).await?,
        };

        Ok(parse_scan_output(&output.stdout))
    }

    /// Join `ssid` on `interface`, replacing any active profile of that name
    pub async fn connect_to_network(
        &self,
        interface: &str,
        ssid: &str,
        password: Option<&str>,
    ) -> PortalResult<()> {
        validate_interface_name(interface)?;
        validate_ssid(ssid)?;

        self.disconnect_profile(ssid).await;

        let mut inv = self.tools.nmcli().args(["device", "wifi", "connect", ssid]);
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            inv = inv.args(["password", password]);
        }
        inv = inv.args(["ifname", interface]);

        match self.tools.run(inv).await {
            Ok(_) => {
                info!("Connected {} to '{}'", interface, ssid);
                Ok(())
            }
            Err(e) => {
                let reason = e.command_output().unwrap_or_else(|| e.to_string());
                Err(PortalError::ConnectionFailed {
                    ssid: ssid.to_string(),
                    reason: sanitize_error_message(&reason),
                })
            }
        }
    }

    /// Bring down an active connection profile named `name`, if there is one
    async fn disconnect_profile(&self, name: &str) {
        let list = self
            .tools
            .nmcli()
            .args(["-t", "-f", "NAME", "connection", "show", "--active"]);

        let active = match self.tools.run(list).await {
            Ok(output) => output.stdout,
            Err(e) => {
                warn!("Could not list active connections: {}", e);
                return;
            }
        };

        // terse output escapes colons and backslashes in names (`\:`, `\\`)
        let is_active = active
            .lines()
            .any(|line| split_terse(line.trim()).first().map(String::as_str) == Some(name));
        if !is_active {
            return;
        }

        let down = self.tools.nmcli().args(["connection", "down", name]);
        match self.tools.run(down).await {
            Ok(_) => debug!("Brought down existing connection '{}'", name),
            Err(e) => warn!("Failed to bring down connection '{}': {}", name, e),
        }
    }
}

/// Enumeration cache for frequent pollers
pub struct InterfaceCache {
    manager: InterfaceManager,
    ttl: Duration,
    entry: Mutex<Option<(Instant, Vec<WirelessInterface>)>>,
}

impl InterfaceCache {
    pub fn new(manager: InterfaceManager, ttl: Duration) -> Self {
        Self {
            manager,
            ttl,
            entry: Mutex::new(None),
        }
    }

    pub fn manager(&self) -> &InterfaceManager {
        &self.manager
    }

    /// Cached enumeration, refreshed once older than the TTL
    pub async fn interfaces(&self) -> PortalResult<Vec<WirelessInterface>> {
        let mut entry = self.entry.lock().await;

        if let Some((taken, interfaces)) = entry.as_ref() {
            if taken.elapsed() < self.ttl {
                return Ok(interfaces.clone());
            }
        }

        let fresh = self.manager.list_wireless_interfaces().await?;
        *entry = Some((Instant::now(), fresh.clone()));
        Ok(fresh)
    }

    pub async fn best_ap_interface(&self) -> PortalResult<ApSelection> {
        select_ap_interface(&self.interfaces().await?)
    }

    pub async fn invalidate(&self) {
        *self.entry.lock().await = None;
    }
}

fn parse_flags(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let hex = raw.strip_prefix("0x").unwrap_or(raw);
    u32::from_str_radix(hex, 16).ok()
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

async fn read_sysfs_string(dir: &Path, file: &str) -> Option<String> {
    fs::read_to_string(dir.join(file))
        .await
        .ok()
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RecordingExecutor;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn iface(name: &str, in_use: bool, supports_ap: bool) -> WirelessInterface {
        WirelessInterface {
            name: name.to_string(),
            mac_address: "00:11:22:33:44:55".to_string(),
            in_use,
            supports_ap,
        }
    }

    fn fake_sysfs(entries: &[(&str, bool, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, wireless, flags) in entries {
            let path = dir.path().join(name);
            std::fs::create_dir_all(&path).unwrap();
            if *wireless {
                std::fs::create_dir(path.join("wireless")).unwrap();
            }
            std::fs::write(path.join("address"), "aa:bb:cc:dd:ee:ff\n").unwrap();
            std::fs::write(path.join("flags"), format!("{}\n", flags)).unwrap();
        }
        dir
    }

    #[test]
    fn test_select_prefers_unused() {
        let list = vec![iface("wlan0", true, true), iface("wlan1", false, true)];
        let selection = select_ap_interface(&list).unwrap();
        assert_eq!(selection.interface.name, "wlan1");
        assert_eq!(selection.warning, None);
    }

    #[test]
    fn test_select_all_in_use_warns() {
        let list = vec![iface("wlan0", false, false), iface("wlan1", true, true)];
        let selection = select_ap_interface(&list).unwrap();
        assert_eq!(selection.interface.name, "wlan1");
        assert_eq!(selection.warning, Some(SelectionWarning::AllInterfacesInUse));
    }

    #[test]
    fn test_select_none_capable() {
        let list = vec![iface("wlan0", false, false)];
        assert!(matches!(
            select_ap_interface(&list),
            Err(PortalError::NoCapableInterface)
        ));
        assert!(matches!(
            select_ap_interface(&[]),
            Err(PortalError::NoCapableInterface)
        ));
    }

    #[test]
    fn test_parse_flags() {
        assert_eq!(parse_flags("0x1003"), Some(0x1003));
        assert_eq!(parse_flags("0x1002\n"), Some(0x1002));
        assert_eq!(parse_flags("zz"), None);
    }

    #[tokio::test]
    async fn test_enumeration_from_sysfs() {
        let sysfs = fake_sysfs(&[
            ("wlan1", true, "0x1002"),
            ("eth0", false, "0x1003"),
            ("wlan0", true, "0x1003"),
        ]);
        let exec = Arc::new(RecordingExecutor::new());
        exec.fail("nmcli device wifi list ifname wlan1", 10, "Error: No Wi-Fi device found.");
        let manager = InterfaceManager::with_sysfs_root(Toolbox::with_executor(exec.clone()), sysfs.path());

        let interfaces = assert_ok!(manager.list_wireless_interfaces().await);
        let names: Vec<&str> = interfaces.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["wlan0", "wlan1"]);
        assert!(interfaces[0].in_use);
        assert!(interfaces[0].supports_ap);
        assert!(!interfaces[1].in_use);
        assert!(!interfaces[1].supports_ap);
        assert_eq!(interfaces[0].mac_address, "aa:bb:cc:dd:ee:ff");

        // one probe per wireless interface, none for eth0
        assert_eq!(exec.calls().len(), 2);

        let selection = assert_ok!(manager.best_ap_interface().await);
        assert_eq!(selection.interface.name, "wlan0");
        assert_eq!(selection.warning, Some(SelectionWarning::AllInterfacesInUse));
    }

    #[tokio::test]
    async fn test_missing_sysfs_is_error() {
        let manager = InterfaceManager::with_sysfs_root(
            Toolbox::with_executor(Arc::new(RecordingExecutor::new())),
            "/nonexistent/sys/class/net",
        );
        assert_err!(manager.list_wireless_interfaces().await);
    }

    #[tokio::test]
    async fn test_scan_retries_unqualified() {
        let exec = Arc::new(RecordingExecutor::new());
        exec.respond(
            "nmcli -t -f",
            r"Cafe:AA\:BB\:CC\:DD\:EE\:FF:Infra:6:2437 MHz:54 Mbit/s:72:▂▄▆_:WPA2",
        );
        exec.fail("nmcli device wifi rescan", 1, "Scanning not allowed");
        exec.fail(
            &format!("nmcli -t -f {} device wifi list ifname wlan0", SCAN_FIELDS),
            10,
            "Error: Device 'wlan0' not found.",
        );
        let manager = InterfaceManager::new(Toolbox::with_executor(exec.clone()));

        let networks = assert_ok!(manager.list_available_networks(Some("wlan0")).await);
        assert_eq!(networks.len(), 1);
        assert_eq!(networks[0].ssid, "Cafe");

        let lines = exec.command_lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "nmcli device wifi rescan ifname wlan0");
        assert!(lines[2].ends_with("device wifi list"));
    }

    #[tokio::test]
    async fn test_scan_failure_propagates() {
        let exec = Arc::new(RecordingExecutor::new());
        exec.fail("nmcli -t -f", 8, "Error: NetworkManager is not running.");
        let manager = InterfaceManager::new(Toolbox::with_executor(exec.clone()));

        let err = assert_err!(manager.list_available_networks(None).await);
        assert!(matches!(err, PortalError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn test_connect_replaces_active_profile() {
        let exec = Arc::new(RecordingExecutor::new());
        exec.respond("nmcli -t -f NAME connection show --active", "Wired connection 1\nHomeNet\n");
        let manager = InterfaceManager::new(Toolbox::with_executor(exec.clone()));

        assert_ok!(manager.connect_to_network("wlan0", "HomeNet", Some("secret123")).await);
        assert_eq!(
            exec.command_lines(),
            vec![
                "nmcli -t -f NAME connection show --active",
                "nmcli connection down HomeNet",
                "nmcli device wifi connect HomeNet password secret123 ifname wlan0",
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_matches_escaped_profile_name() {
        let exec = Arc::new(RecordingExecutor::new());
        exec.respond("nmcli -t -f NAME connection show --active", "Cafe\\:5G\n");
        let manager = InterfaceManager::new(Toolbox::with_executor(exec.clone()));

        assert_ok!(manager.connect_to_network("wlan0", "Cafe:5G", None).await);
        assert_eq!(exec.command_lines()[1], "nmcli connection down Cafe:5G");
    }

    #[tokio::test]
    async fn test_connect_open_network_without_password() {
        let exec = Arc::new(RecordingExecutor::new());
        exec.fail("nmcli -t -f NAME", 8, "NetworkManager is not running");
        exec.fail("nmcli device wifi connect", 10, "Error: No network with SSID 'Guest' found.");
        let manager = InterfaceManager::new(Toolbox::with_executor(exec.clone()));

        let err = assert_err!(manager.connect_to_network("wlan0", "Guest", None).await);
        match err {
            PortalError::ConnectionFailed { ssid, reason } => {
                assert_eq!(ssid, "Guest");
                assert!(reason.contains("No network with SSID"));
            }
            other => panic!("unexpected error: {}", other),
        }

        let lines = exec.command_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "nmcli device wifi connect Guest ifname wlan0");
    }

    #[tokio::test]
    async fn test_cache_reuses_enumeration() {
        let sysfs = fake_sysfs(&[("wlan0", true, "0x1002")]);
        let exec = Arc::new(RecordingExecutor::new());
        let manager = InterfaceManager::with_sysfs_root(Toolbox::with_executor(exec.clone()), sysfs.path());
        let cache = InterfaceCache::new(manager, Duration::from_secs(60));

        assert_ok!(cache.interfaces().await);
        let selection = assert_ok!(cache.best_ap_interface().await);
        assert_eq!(selection.interface.name, "wlan0");
        assert_eq!(exec.calls().len(), 1);

        cache.invalidate().await;
        assert_ok!(cache.interfaces().await);
        assert_eq!(exec.calls().len(), 2);
    }
}
