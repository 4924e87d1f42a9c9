use super::backend::{AccessPoint, AccessPointState, BackendKind, HotspotBackend};
use super::common::enable_ip_forwarding;
use super::config::ApConfig;
use super::hostapd::HostapdBackend;
use super::network_manager::NetworkManagerBackend;
use crate::command::CommandExecutor;
use crate::config::{FirewallSettings, PortalConfig};
use crate::dhcp::DhcpServer;
use crate::error::{PortalError, PortalResult};
use crate::firewall::{detect_default_route_interface, RuleSet};
use crate::template::{ConfigRenderer, DefaultRenderer};
use crate::tools::Toolbox;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// What one start attempt changed on the system, so stop can undo it
struct Session {
    config: ApConfig,
    /// The backend touched the interface and must tear down
    backend_engaged: bool,
    rules: Option<RuleSet>,
    dhcp: Option<DhcpServer>,
}

impl Session {
    fn new(config: ApConfig) -> Self {
        Self {
            config,
            backend_engaged: false,
            rules: None,
            dhcp: None,
        }
    }
}

struct Lifecycle {
    backend: Box<dyn HotspotBackend>,
    session: Option<Session>,
}

/// Captive portal access point on one interface
///
/// Start and stop are serialized; the current state is published on a watch
/// channel so readers never wait on a lifecycle call in progress.
pub struct AccessPointService {
    tools: Toolbox,
    renderer: Arc<dyn ConfigRenderer>,
    firewall: FirewallSettings,
    lifecycle: Mutex<Lifecycle>,
    state: watch::Sender<AccessPointState>,
}

impl AccessPointService {
    pub fn new(
        backend: Box<dyn HotspotBackend>,
        tools: Toolbox,
        renderer: Arc<dyn ConfigRenderer>,
        firewall: FirewallSettings,
    ) -> Self {
        let (state, _) = watch::channel(AccessPointState::Stopped);
        Self {
            tools,
            renderer,
            firewall,
            lifecycle: Mutex::new(Lifecycle {
                backend,
                session: None,
            }),
            state,
        }
    }

    /// Service with the backend, tools and firewall settings from `config`
    pub fn from_config(config: &PortalConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        let tools = Toolbox::new(executor, config.tools.clone(), config.timeouts.clone());
        let renderer: Arc<dyn ConfigRenderer> = Arc::new(DefaultRenderer::new());

        let backend: Box<dyn HotspotBackend> = match config.backend {
            BackendKind::NetworkManager => Box::new(NetworkManagerBackend::new(tools.clone())),
            BackendKind::Hostapd => {
                Box::new(HostapdBackend::new(tools.clone(), Arc::clone(&renderer)))
            }
        };

        Self::new(backend, tools, renderer, config.firewall.clone())
    }

    pub fn state(&self) -> AccessPointState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AccessPointState> {
        self.state.subscribe()
    }

    /// Configuration of the active or failed session
    pub async fn active_config(&self) -> Option<ApConfig> {
        let lifecycle = self.lifecycle.lock().await;
        lifecycle.session.as_ref().map(|s| s.config.clone())
    }

    fn transition(&self, next: AccessPointState) -> PortalResult<()> {
        let current = self.state();
        let next = current.transition(next)?;
        self.state.send_replace(next);
        debug!("Access point state {} -> {}", current, next);
        Ok(())
    }

    async fn run_start(
        &self,
        backend: &mut Box<dyn HotspotBackend>,
        session: &mut Session,
    ) -> PortalResult<()> {
        let config = session.config.clone();

        session.backend_engaged = true;
        backend.prepare_interface(&config).await?;
        backend.bring_up(&config).await?;

        self.configure_network(session).await;

        let dhcp = DhcpServer::launch(&self.tools, self.renderer.as_ref(), &config).await?;
        session.dhcp = Some(dhcp);

        Ok(())
    }

    /// Forwarding and firewall; problems here never fail the start
    async fn configure_network(&self, session: &mut Session) {
        let config = &session.config;

        if self.firewall.ip_forward {
            if let Err(e) = enable_ip_forwarding(&self.tools).await {
                warn!("Failed to enable IP forwarding: {}", e);
            }
        }

        if !self.firewall.ufw && !self.firewall.iptables {
            return;
        }

        let gateway = match config.gateway_addr() {
            Ok(gateway) => gateway,
            Err(e) => {
                warn!("Skipping firewall rules: {}", e);
                return;
            }
        };

        let upstream = match &self.firewall.upstream_interface {
            Some(upstream) => Some(upstream.clone()),
            None if self.firewall.iptables => {
                match detect_default_route_interface(&self.tools).await {
                    Ok(found) => found,
                    Err(e) => {
                        warn!("Could not detect upstream interface: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        let rules = RuleSet::compose(
            &config.interface,
            config.portal_port,
            gateway,
            upstream.as_deref(),
        );
        // recorded first so a start dropped mid-apply still gets cleaned up
        let rules = session.rules.insert(rules);
        let report = rules.apply(&self.tools, &self.firewall).await;
        if !report.is_clean() {
            warn!(
                "{} firewall rules could not be applied; the portal may be unreachable",
                report.failures.len()
            );
        }
    }

    /// Undo `session` in reverse order of start
    ///
    /// Each part is cleared once it is torn down, so a stop that is itself
    /// interrupted resumes with whatever is left.
    async fn run_stop(&self, backend: &mut Box<dyn HotspotBackend>, session: &mut Session) {
        if let Some(dhcp) = session.dhcp.take() {
            for e in dhcp.shutdown(&self.tools).await {
                warn!("dnsmasq shutdown: {}", e);
            }
        }

        if session.backend_engaged {
            for e in backend.tear_down(&session.config).await {
                warn!("{} tear-down: {}", backend.name(), e);
            }
            session.backend_engaged = false;
        }

        if let Some(rules) = &session.rules {
            let report = rules.cleanup(&self.tools, &self.firewall).await;
            for e in &report.failures {
                warn!("Firewall cleanup: {}", e);
            }
        }
        session.rules = None;
    }

    /// Start, and clean up after a start that left the service `Failed`
    ///
    /// Refusals (`InvalidConfig`, `AlreadyRunning`) leave the service as it was.
    pub async fn start_or_clean_up(&self, config: ApConfig) -> PortalResult<()> {
        let result = self.start(config).await;
        if result.is_err() && self.state() == AccessPointState::Failed {
            if let Err(e) = self.stop().await {
                warn!("Cleanup after failed start: {}", e);
            }
        }
        result
    }
}

#[async_trait]
impl AccessPoint for AccessPointService {
    async fn start(&self, config: ApConfig) -> PortalResult<()> {
        let mut guard = self.lifecycle.lock().await;
        let lifecycle = &mut *guard;

        match self.state() {
            AccessPointState::Stopped => {}
            AccessPointState::Running => return Err(PortalError::AlreadyRunning),
            AccessPointState::Failed => {
                return Err(PortalError::InvalidState(
                    "previous start failed; stop the service before starting again".to_string(),
                ))
            }
            // only seen here when an earlier call was dropped mid-way
            other => {
                return Err(PortalError::InvalidState(format!(
                    "an earlier call was interrupted while {}; stop the service before starting again",
                    other
                )))
            }
        }

        config.validate()?;

        info!(
            "Starting access point '{}' on {} with {} backend",
            config.ssid,
            config.interface,
            lifecycle.backend.name()
        );
        self.transition(AccessPointState::Starting)?;

        let session = lifecycle.session.insert(Session::new(config));
        match self.run_start(&mut lifecycle.backend, session).await {
            Ok(()) => {
                self.transition(AccessPointState::Running)?;
                info!("Access point running");
                Ok(())
            }
            Err(e) => {
                error!("Access point failed to start: {}", e);
                self.transition(AccessPointState::Failed)?;
                Err(e)
            }
        }
    }

    async fn stop(&self) -> PortalResult<()> {
        let mut guard = self.lifecycle.lock().await;
        let lifecycle = &mut *guard;

        if self.state() == AccessPointState::Stopped {
            debug!("Access point already stopped");
            return Ok(());
        }

        info!("Stopping access point");
        // Stopping already means an earlier stop was dropped; resume it
        if self.state() != AccessPointState::Stopping {
            self.transition(AccessPointState::Stopping)?;
        }

        if let Some(session) = lifecycle.session.as_mut() {
            self.run_stop(&mut lifecycle.backend, session).await;
        }
        lifecycle.session = None;

        self.transition(AccessPointState::Stopped)?;
        info!("Access point stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state() == AccessPointState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ap::SecurityMode;
    use crate::command::RecordingExecutor;
    use crate::config::{Timeouts, ToolPaths};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Backend that records which phases ran
    struct StubBackend {
        log: Arc<StdMutex<Vec<&'static str>>>,
        fail_bring_up: bool,
        tear_down_delay: Duration,
    }

    #[async_trait]
    impl HotspotBackend for StubBackend {
        fn name(&self) -> &str {
            "stub"
        }

        async fn prepare_interface(&mut self, _config: &ApConfig) -> PortalResult<()> {
            self.log.lock().unwrap().push("prepare");
            Ok(())
        }

        async fn bring_up(&mut self, _config: &ApConfig) -> PortalResult<()> {
            self.log.lock().unwrap().push("bring_up");
            if self.fail_bring_up {
                Err(PortalError::Service("radio refused AP mode".to_string()))
            } else {
                Ok(())
            }
        }

        async fn tear_down(&mut self, _config: &ApConfig) -> Vec<PortalError> {
            self.log.lock().unwrap().push("tear_down");
            tokio::time::sleep(self.tear_down_delay).await;
            Vec::new()
        }
    }

    fn service(fail_bring_up: bool) -> (AccessPointService, Arc<RecordingExecutor>, Arc<StdMutex<Vec<&'static str>>>) {
        let exec = Arc::new(RecordingExecutor::new());
        let log = Arc::new(StdMutex::new(Vec::new()));
        let backend = StubBackend {
            log: Arc::clone(&log),
            fail_bring_up,
            tear_down_delay: Duration::ZERO,
        };
        let tools = Toolbox::new(exec.clone(), ToolPaths::default(), Timeouts::immediate());
        let service = AccessPointService::new(
            Box::new(backend),
            tools,
            Arc::new(DefaultRenderer),
            FirewallSettings::default(),
        );
        (service, exec, log)
    }

    fn config() -> ApConfig {
        ApConfig {
            interface: "wlan0".to_string(),
            ssid: "Lobby".to_string(),
            security: SecurityMode::Open,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_state_changes_are_published() {
        let (service, _exec, _log) = service(false);
        let mut rx = service.subscribe();
        assert_eq!(*rx.borrow(), AccessPointState::Stopped);

        service.start(config()).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), AccessPointState::Running);
        assert_eq!(service.active_config().await.unwrap().ssid, "Lobby");

        service.stop().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), AccessPointState::Stopped);
        assert!(service.active_config().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_start_requires_stop() {
        let (service, exec, log) = service(true);

        let err = service.start(config()).await.unwrap_err();
        assert!(matches!(err, PortalError::Service(_)));
        assert_eq!(service.state(), AccessPointState::Failed);
        assert!(!service.is_running());
        // no forwarding, firewall or dnsmasq after a failed bring-up
        assert!(exec.calls().is_empty());
        assert!(exec.spawned().is_empty());

        let err = service.start(config()).await.unwrap_err();
        assert!(matches!(err, PortalError::InvalidState(_)));

        service.stop().await.unwrap();
        assert_eq!(service.state(), AccessPointState::Stopped);
        assert_eq!(*log.lock().unwrap(), vec!["prepare", "bring_up", "tear_down"]);

        // a clean start works again after the cleanup
        let (service, _exec, _log) = self::service(false);
        service.start(config()).await.unwrap();
        assert!(service.is_running());
    }

    #[tokio::test]
    async fn test_stop_order() {
        let (service, exec, log) = service(false);
        service.start(config()).await.unwrap();
        let started = exec.calls().len();

        service.stop().await.unwrap();
        assert_eq!(exec.terminations(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["prepare", "bring_up", "tear_down"]);

        let cleanup: Vec<String> = exec.command_lines().split_off(started);
        assert!(cleanup.iter().all(|l| l.starts_with("ufw delete") || l.contains(" -D ")));
        assert_eq!(cleanup.len(), 10);
    }

    #[tokio::test]
    async fn test_firewall_disabled_skips_rules() {
        let exec = Arc::new(RecordingExecutor::new());
        let log = Arc::new(StdMutex::new(Vec::new()));
        let tools = Toolbox::new(exec.clone(), ToolPaths::default(), Timeouts::immediate());
        let service = AccessPointService::new(
            Box::new(StubBackend {
                log,
                fail_bring_up: false,
                tear_down_delay: Duration::ZERO,
            }),
            tools,
            Arc::new(DefaultRenderer),
            FirewallSettings {
                ufw: false,
                iptables: false,
                ip_forward: false,
                upstream_interface: None,
            },
        );

        service.start(config()).await.unwrap();
        service.stop().await.unwrap();
        assert!(exec.calls().is_empty());
        assert_eq!(exec.spawned().len(), 1);
    }

    #[tokio::test]
    async fn test_interrupted_stop_resumes() {
        let exec = Arc::new(RecordingExecutor::new());
        let log = Arc::new(StdMutex::new(Vec::new()));
        let tools = Toolbox::new(exec.clone(), ToolPaths::default(), Timeouts::immediate());
        let service = AccessPointService::new(
            Box::new(StubBackend {
                log: Arc::clone(&log),
                fail_bring_up: false,
                tear_down_delay: Duration::from_millis(500),
            }),
            tools,
            Arc::new(DefaultRenderer),
            FirewallSettings::default(),
        );
        service.start(config()).await.unwrap();

        let interrupted = tokio::time::timeout(Duration::from_millis(20), service.stop()).await;
        assert!(interrupted.is_err());
        assert_eq!(service.state(), AccessPointState::Stopping);

        service.stop().await.unwrap();
        assert_eq!(service.state(), AccessPointState::Stopped);
        // dnsmasq went with the first call and is not terminated twice
        assert_eq!(exec.terminations(), 1);
        assert!(exec.command_lines().iter().any(|l| l.starts_with("ufw delete")));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["prepare", "bring_up", "tear_down", "tear_down"]
        );

        service.start(config()).await.unwrap();
        assert!(service.is_running());
    }
}
