//! Access point module
//!
//! Brings a wireless interface up as a captive portal access point and takes
//! it down again without leaving state behind.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │   AccessPointService (start/stop/state)  │
//! └───────┬──────────────┬────────────┬──────┘
//!         │              │            │
//!         ▼              ▼            ▼
//!  ┌────────────┐  ┌──────────┐  ┌─────────┐
//!  │  Hotspot   │  │ Firewall │  │ dnsmasq │
//!  │  backend   │  │ RuleSet  │  │ (DHCP/  │
//!  └─────┬──────┘  └──────────┘  │  DNS)   │
//!        │                       └─────────┘
//!   ┌────┴──────┐
//!   ▼           ▼
//! ┌────┐   ┌─────────┐
//! │ NM │   │ hostapd │   <- HotspotBackend implementations
//! └────┘   └─────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use libportalctl::ap::{AccessPoint, AccessPointService, ApConfig, SecurityMode};
//! use libportalctl::command::SystemExecutor;
//! use libportalctl::config::PortalConfig;
//! use std::sync::Arc;
//!
//! # async fn run() -> libportalctl::PortalResult<()> {
//! let service = AccessPointService::from_config(&PortalConfig::default(), Arc::new(SystemExecutor::new()));
//! service
//!     .start(ApConfig {
//!         interface: "wlan0".to_string(),
//!         ssid: "Setup".to_string(),
//!         security: SecurityMode::Open,
//!         ..Default::default()
//!     })
//!     .await?;
//! service.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod common;
pub mod config;
pub mod hostapd;
pub mod network_manager;
pub mod service;

pub use backend::{AccessPoint, AccessPointState, BackendKind, HotspotBackend};
pub use config::{ApConfig, SecurityMode};
pub use hostapd::HostapdBackend;
pub use network_manager::NetworkManagerBackend;
pub use service::AccessPointService;
