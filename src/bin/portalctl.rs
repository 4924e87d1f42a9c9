//! portalctl - captive portal access point tool
//!
//! # Usage
//!
//! ```bash
//! # List wireless interfaces and pick one for the AP
//! portalctl interfaces
//! portalctl best
//!
//! # Preview the firewall rules for an AP on wlan0
//! portalctl rules --interface wlan0 --port 8080
//!
//! # Run an open access point until Ctrl-C (requires root)
//! sudo portalctl ap --interface wlan0 --ssid Setup --security open
//!
//! # Show what would be executed without touching the system
//! portalctl ap --interface wlan0 --ssid Setup --security open --dry-run
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use libportalctl::ap::{AccessPoint, AccessPointService, ApConfig, BackendKind, SecurityMode};
use libportalctl::command::{CommandExecutor, RecordingExecutor, SystemExecutor};
use libportalctl::config::PortalConfig;
use libportalctl::firewall::RuleSet;
use libportalctl::interface::{InterfaceManager, SelectionWarning};
use libportalctl::tools::Toolbox;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "portalctl")]
#[command(version)]
#[command(about = "Captive portal access point control - interfaces, scanning, firewall rules, AP lifecycle", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List wireless interfaces
    Interfaces,

    /// Select the best interface for the access point
    Best,

    /// Scan for nearby networks
    Scan {
        /// Interface to scan on (all when omitted)
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Join a network
    Connect {
        ssid: String,
        #[arg(short, long)]
        interface: String,
        /// Omit for open networks
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Print the firewall commands for an access point without running them
    Rules {
        #[arg(short, long)]
        interface: String,
        /// Captive portal HTTP port
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
        #[arg(short, long, default_value = "192.168.4.1")]
        gateway: Ipv4Addr,
        /// Masquerade through this interface
        #[arg(short, long)]
        upstream: Option<String>,
        /// Print the removal commands instead
        #[arg(long)]
        cleanup: bool,
    },

    /// Validate the access point configuration
    Validate(ApArgs),

    /// Run the access point until interrupted
    Ap {
        #[command(flatten)]
        ap: ApArgs,

        /// Hotspot backend (network-manager, hostapd)
        #[arg(short, long)]
        backend: Option<BackendKind>,

        /// Record commands instead of executing them, then stop
        #[arg(long)]
        dry_run: bool,
    },
}

/// Command-line overrides for the `[access_point]` section
#[derive(Args, Debug)]
struct ApArgs {
    #[arg(short, long)]
    interface: Option<String>,
    #[arg(short, long)]
    ssid: Option<String>,
    #[arg(short, long)]
    password: Option<String>,
    /// open or wpa2
    #[arg(long)]
    security: Option<SecurityMode>,
    #[arg(long)]
    country: Option<String>,
    #[arg(long)]
    gateway: Option<String>,
    #[arg(long)]
    dhcp_range: Option<String>,
    #[arg(long)]
    portal_port: Option<u16>,
    #[arg(long)]
    channel: Option<u8>,
}

impl ApArgs {
    fn apply(&self, config: &mut ApConfig) {
        if let Some(v) = &self.interface {
            config.interface = v.clone();
        }
        if let Some(v) = &self.ssid {
            config.ssid = v.clone();
        }
        if let Some(v) = &self.password {
            config.password = v.clone();
        }
        if let Some(v) = self.security {
            config.security = v;
        }
        if let Some(v) = &self.country {
            config.country_code = v.clone();
        }
        if let Some(v) = &self.gateway {
            config.gateway = v.clone();
        }
        if let Some(v) = &self.dhcp_range {
            config.dhcp_range = v.clone();
        }
        if let Some(v) = self.portal_port {
            config.portal_port = v;
        }
        if self.channel.is_some() {
            config.channel = self.channel;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let mut config = match &cli.config {
        Some(path) => PortalConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PortalConfig::default(),
    };

    match &cli.command {
        Commands::Interfaces => {
            let manager = InterfaceManager::new(system_toolbox(&config));
            let interfaces = manager.list_wireless_interfaces().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&interfaces)?);
            } else if interfaces.is_empty() {
                println!("No wireless interfaces found");
            } else {
                println!("{:<16} {:<18} {:<7} {}", "NAME", "MAC", "IN USE", "AP");
                for iface in &interfaces {
                    println!(
                        "{:<16} {:<18} {:<7} {}",
                        iface.name,
                        iface.mac_address,
                        yes_no(iface.in_use),
                        yes_no(iface.supports_ap)
                    );
                }
            }
        }

        Commands::Best => {
            let manager = InterfaceManager::new(system_toolbox(&config));
            let selection = manager.best_ap_interface().await?;
            let all_in_use = selection.warning == Some(SelectionWarning::AllInterfacesInUse);
            if cli.json {
                let out = serde_json::json!({
                    "interface": selection.interface,
                    "all_interfaces_in_use": all_in_use,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{}", selection.interface.name);
                if all_in_use {
                    eprintln!("warning: every AP-capable interface is in use");
                }
            }
        }

        Commands::Scan { interface } => {
            let manager = InterfaceManager::new(system_toolbox(&config));
            let networks = manager.list_available_networks(interface.as_deref()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&networks)?);
            } else {
                println!("{:<32} {:<18} {:>4} {:>6} {}", "SSID", "BSSID", "CHAN", "SIGNAL", "SECURITY");
                for n in &networks {
                    println!(
                        "{:<32} {:<18} {:>4} {:>5}% {}",
                        n.ssid,
                        n.bssid,
                        n.channel.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
                        n.signal,
                        n.security
                    );
                }
            }
        }

        Commands::Connect {
            ssid,
            interface,
            password,
        } => {
            check_root();
            let manager = InterfaceManager::new(system_toolbox(&config));
            manager
                .connect_to_network(interface, ssid, password.as_deref())
                .await?;
            println!("Connected {} to '{}'", interface, ssid);
        }

        Commands::Rules {
            interface,
            port,
            gateway,
            upstream,
            cleanup,
        } => {
            let tools = Toolbox::new(
                Arc::new(RecordingExecutor::new()),
                config.tools.clone(),
                config.timeouts.clone(),
            );
            let upstream = upstream
                .clone()
                .or_else(|| config.firewall.upstream_interface.clone());
            let rules = RuleSet::compose(interface, *port, *gateway, upstream.as_deref());
            let invocations = if *cleanup {
                rules.cleanup_invocations(&tools, &config.firewall)
            } else {
                rules.create_invocations(&tools, &config.firewall)
            };

            let lines: Vec<String> = invocations.iter().map(|i| i.to_string()).collect();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&lines)?);
            } else {
                for line in lines {
                    println!("{}", line);
                }
            }
        }

        Commands::Validate(overrides) => {
            overrides.apply(&mut config.access_point);
            config.access_point.validate()?;
            println!("Configuration is valid");
        }

        Commands::Ap {
            ap,
            backend,
            dry_run,
        } => {
            ap.apply(&mut config.access_point);
            if let Some(backend) = backend {
                config.backend = *backend;
            }
            run_access_point(config, *dry_run).await?;
        }
    }

    Ok(())
}

async fn run_access_point(mut config: PortalConfig, dry_run: bool) -> Result<()> {
    let recorder = Arc::new(RecordingExecutor::new());
    let executor: Arc<dyn CommandExecutor> = if dry_run {
        config.timeouts.settle_millis = 0;
        recorder.clone()
    } else {
        check_root();
        Arc::new(SystemExecutor::with_timeout(config.timeouts.command()))
    };

    if config.access_point.interface.is_empty() {
        let tools = Toolbox::new(executor.clone(), config.tools.clone(), config.timeouts.clone());
        let selection = InterfaceManager::new(tools)
            .best_ap_interface()
            .await
            .context("no interface given and none could be selected")?;
        if selection.warning.is_some() {
            warn!(
                "{} is in use; starting the access point will disconnect it",
                selection.interface.name
            );
        }
        info!("Selected interface {}", selection.interface.name);
        config.access_point.interface = selection.interface.name;
    }

    let service = AccessPointService::from_config(&config, executor);
    // tears down a partial start before returning the error
    service.start_or_clean_up(config.access_point.clone()).await?;

    if dry_run {
        print_recorded("start", &recorder);
        let before = recorder.command_lines().len();
        service.stop().await?;
        println!("# stop");
        for line in recorder.command_lines().into_iter().skip(before) {
            println!("{}", line);
        }
        return Ok(());
    }

    println!(
        "Access point '{}' running on {}; press Ctrl-C to stop",
        config.access_point.ssid, config.access_point.interface
    );
    wait_for_shutdown().await?;

    service.stop().await?;
    Ok(())
}

fn print_recorded(phase: &str, recorder: &RecordingExecutor) {
    println!("# {}", phase);
    for line in recorder.command_lines() {
        println!("{}", line);
    }
    for spawned in recorder.spawned() {
        println!("{} &", spawned);
    }
}

async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl-C")?;
            info!("Received SIGINT, stopping access point");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, stopping access point");
        }
    }
    Ok(())
}

fn system_toolbox(config: &PortalConfig) -> Toolbox {
    Toolbox::new(
        Arc::new(SystemExecutor::with_timeout(config.timeouts.command())),
        config.tools.clone(),
        config.timeouts.clone(),
    )
}

fn check_root() {
    let uid = unsafe { libc::geteuid() };
    if uid != 0 {
        warn!("Not running as root - system changes will likely fail");
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Initialize logging based on command-line arguments
fn init_logging(cli: &Cli) {
    let log_level = if cli.verbose { "debug" } else { &cli.log_level };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("portalctl={},libportalctl={}", log_level, log_level))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}

