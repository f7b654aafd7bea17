//! Portal Auth - captive portal login and network diagnostics
//!
//! This library drives authentication against a captive-portal gateway and
//! explains what is wrong when the network does not work.
//!
//! ## What This Library Provides
//! - Concurrent HTTP, resolver and direct DNS server reachability checks
//! - Local proxy discovery through raw SOCKS4/SOCKS5/HTTP CONNECT handshakes
//! - Gateway session listing, current-session detection and eviction
//! - A login state machine that frees a concurrency slot and retries once
//! - Configurable status-to-message tables for every operation (TOML format)
//!
//! ## Logging
//! Components never log through a global of their own: each one is handed an
//! `Arc<dyn Reporter>`. [`LogReporter`] forwards to the `log` facade; the
//! binary installs `env_logger` behind it.

pub mod address;
pub mod config;
pub mod device;
pub mod diagnosis;
pub mod error;
pub mod handler;
pub mod portal;
pub mod probe;
pub mod report;

// Re-export core types
pub use config::Config;
pub use device::{KnownDeviceSet, LocalInterfaces};
pub use diagnosis::{Diagnosis, DiagnosisReport};
pub use error::{PortalError, Result};
pub use handler::{ErrorDomain, ErrorHandlerBook};
pub use portal::{GatewayClient, LoginReconciler, LoginState, SessionRegistry};
pub use probe::{ConnectivityProbe, ProxyDetector};
pub use report::{LogReporter, Reporter};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
