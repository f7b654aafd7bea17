//! Configuration module for the portal authentication client
//!
//! This module provides TOML-based configuration parsing and validation.
//! Every component receives the sections it needs; nothing reads the file
//! on its own.

use crate::error::{PortalError, Result};
use crate::handler::{parse_level, ErrorDomain, ErrorHandlerBook, ErrorHandlerTable};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Liveness target used when the configured proxy test URL is unusable
pub const DEFAULT_PROXY_TEST_URL: &str = "http://www.gstatic.com/generate_204";

/// Gateway status meaning the account reached its concurrent session limit
pub const DEFAULT_OVERLOAD_STATUS: i32 = 39;

/// Account credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    /// Realm appended as `username@domain` when non-empty
    #[serde(default)]
    pub domain: String,
    pub password: String,
}

impl AuthConfig {
    pub fn login_user(&self) -> String {
        if self.domain.is_empty() {
            self.username.clone()
        } else {
            format!("{}@{}", self.username, self.domain)
        }
    }
}

/// Shared HTTP request settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Connect and request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_http_timeout(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout))
    }
}

/// Gateway web API endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub hostname: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub login_path: String,
    /// Redirect target used when only a token is wanted
    pub fake_redirect_path: String,
    /// Pre-auth URL whose redirect carries the real login redirect URL
    pub bootstrap_url: String,
    pub session_list_path: String,
    pub logout_path: String,
}

impl GatewayConfig {
    pub fn url(&self, path: &str) -> String {
        format!("{}://{}{}", self.scheme, self.hostname, path)
    }
}

/// External "what is my IP" service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpProbeConfig {
    pub hostname: String,
    pub path: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
}

impl IpProbeConfig {
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.hostname, self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTargets {
    pub internet: String,
    pub intranet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsDomains {
    pub internet: String,
    pub intranet: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsServers {
    #[serde(default)]
    pub internet: Vec<String>,
    #[serde(default)]
    pub intranet: Vec<String>,
}

/// DNS probing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    pub domains: DnsDomains,
    #[serde(default)]
    pub servers: DnsServers,
    /// Per-query timeout and inter-query delay in seconds
    #[serde(default = "default_dns_timeout")]
    pub timeout: u32,
}

impl DnsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout))
    }

    /// Domains every server must resolve, intranet first.
    pub fn domain_list(&self) -> Vec<String> {
        vec![self.domains.intranet.clone(), self.domains.internet.clone()]
    }
}

/// Connectivity targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    pub http: HttpTargets,
    pub dns: DnsConfig,
}

/// Local proxy discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Port or `start:end` range mapped to the programs known to listen there
    #[serde(default)]
    pub ports: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_proxy_test_url")]
    pub test_url: String,
    /// Probe timeout in seconds
    #[serde(default = "default_proxy_timeout")]
    pub timeout: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            ports: BTreeMap::new(),
            test_url: default_proxy_test_url(),
            timeout: default_proxy_timeout(),
        }
    }
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout))
    }

    /// Configured test URL, or the default one when it does not parse.
    pub fn effective_test_url(&self) -> String {
        match url::Url::parse(&self.test_url) {
            Ok(_) => self.test_url.clone(),
            Err(_) => DEFAULT_PROXY_TEST_URL.to_string(),
        }
    }
}

/// The operator's own devices
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevicesConfig {
    #[serde(default)]
    pub known_macs: Vec<String>,
    /// Also treat the MACs of local interfaces as known
    #[serde(default)]
    pub use_interface: bool,
}

/// Login reconciliation behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Evict another session and retry once when the account is overloaded
    #[serde(default)]
    pub auto_logout: bool,
    #[serde(default = "default_overload_status")]
    pub overload_status: i32,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            auto_logout: false,
            overload_status: DEFAULT_OVERLOAD_STATUS,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Print operator hints to stdout
    #[serde(default)]
    pub hints: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            hints: false,
        }
    }
}

/// Error-handler tables as written in the file, one ordered list per domain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorHandleConfig {
    #[serde(default)]
    pub internet_check: ErrorHandlerTable,
    #[serde(default)]
    pub intranet_check: ErrorHandlerTable,
    #[serde(default)]
    pub resolve_check: ErrorHandlerTable,
    #[serde(default)]
    pub login: ErrorHandlerTable,
    #[serde(default)]
    pub logout: ErrorHandlerTable,
    #[serde(default)]
    pub get_session: ErrorHandlerTable,
}

impl ErrorHandleConfig {
    pub fn table(&self, domain: ErrorDomain) -> &ErrorHandlerTable {
        match domain {
            ErrorDomain::InternetCheck => &self.internet_check,
            ErrorDomain::IntranetCheck => &self.intranet_check,
            ErrorDomain::ResolveCheck => &self.resolve_check,
            ErrorDomain::Login => &self.login,
            ErrorDomain::Logout => &self.logout,
            ErrorDomain::GetSession => &self.get_session,
        }
    }

    pub fn to_book(&self) -> ErrorHandlerBook {
        let tables: HashMap<_, _> = ErrorDomain::ALL
            .iter()
            .map(|domain| (*domain, self.table(*domain).clone()))
            .collect();
        ErrorHandlerBook::new(tables)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub auth: AuthConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub gateway: GatewayConfig,
    pub ip_probe: IpProbeConfig,
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub devices: DevicesConfig,
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub error_handle: ErrorHandleConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| PortalError::Config(format!("Failed to read config file: {e}")))?;

        <Self as FromStr>::from_str(&contents)
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PortalError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.auth.username.is_empty() {
            return Err(PortalError::Config("Username cannot be empty".to_string()));
        }

        if self.gateway.hostname.is_empty() {
            return Err(PortalError::Config(
                "Gateway hostname cannot be empty".to_string(),
            ));
        }

        for (name, target) in [
            ("connectivity.http.internet", &self.connectivity.http.internet),
            ("connectivity.http.intranet", &self.connectivity.http.intranet),
            ("gateway.bootstrap_url", &self.gateway.bootstrap_url),
        ] {
            url::Url::parse(target)
                .map_err(|e| PortalError::Config(format!("Invalid URL in {name}: {e}")))?;
        }

        if self.http.timeout == 0
            || self.connectivity.dns.timeout == 0
            || self.proxy.timeout == 0
        {
            return Err(PortalError::Config("Timeouts must be positive".to_string()));
        }

        if parse_level(&self.logging.level).is_none() {
            return Err(PortalError::Config(format!(
                "Unknown log level [{}]",
                self.logging.level
            )));
        }

        for domain in ErrorDomain::ALL {
            let table = self.error_handle.table(domain);
            if let Some(handler) = table
                .handlers()
                .iter()
                .find(|h| parse_level(&h.log_level).is_none())
            {
                return Err(PortalError::Config(format!(
                    "Unknown log level [{}] in error_handle.{domain}",
                    handler.log_level
                )));
            }
            if !table.has_wildcard() {
                log::warn!("error_handle.{domain} has no default (-1) handler");
            }
        }

        Ok(())
    }

    /// Create a default configuration for a typical campus gateway
    pub fn default_portal() -> Self {
        Self {
            auth: AuthConfig {
                username: "student".to_string(),
                domain: "portal".to_string(),
                password: "changeme".to_string(),
            },
            http: HttpConfig::default(),
            gateway: GatewayConfig {
                hostname: "portal.example.edu".to_string(),
                scheme: default_scheme(),
                login_path: "/api/portal/v1/login".to_string(),
                fake_redirect_path: "/portal/index.html".to_string(),
                bootstrap_url: "http://portal.example.edu/".to_string(),
                session_list_path: "/api/selfservice/v1/online".to_string(),
                logout_path: "/api/selfservice/v1/online".to_string(),
            },
            ip_probe: IpProbeConfig {
                hostname: "speed.example.edu".to_string(),
                path: "/getIP.php".to_string(),
                scheme: default_scheme(),
            },
            connectivity: ConnectivityConfig {
                http: HttpTargets {
                    internet: "http://www.baidu.com".to_string(),
                    intranet: "http://portal.example.edu".to_string(),
                },
                dns: DnsConfig {
                    domains: DnsDomains {
                        internet: "www.baidu.com".to_string(),
                        intranet: "portal.example.edu".to_string(),
                    },
                    servers: DnsServers {
                        internet: vec!["223.5.5.5".to_string(), "114.114.114.114".to_string()],
                        intranet: vec!["10.6.39.2".to_string()],
                    },
                    timeout: default_dns_timeout(),
                },
            },
            proxy: ProxyConfig::default(),
            devices: DevicesConfig::default(),
            portal: PortalConfig::default(),
            logging: LoggingConfig::default(),
            error_handle: ErrorHandleConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_portal()
    }
}

impl FromStr for Config {
    type Err = PortalError;

    fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| PortalError::Config(format!("Failed to parse TOML: {e}")))
    }
}

// Default value functions for serde
fn default_scheme() -> String {
    "http".to_string()
}

fn default_http_timeout() -> u32 {
    5
}

fn default_user_agent() -> String {
    format!("portal-auth/{}", env!("CARGO_PKG_VERSION"))
}

fn default_accept_language() -> String {
    "en-US,en;q=0.9".to_string()
}

fn default_dns_timeout() -> u32 {
    2
}

fn default_proxy_test_url() -> String {
    DEFAULT_PROXY_TEST_URL.to_string()
}

fn default_proxy_timeout() -> u32 {
    2
}

fn default_overload_status() -> i32 {
    DEFAULT_OVERLOAD_STATUS
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG_TOML: &str = r#"
[auth]
username = "alice"
domain = "campus"
password = "secret"

[gateway]
hostname = "10.0.0.1"
login_path = "/login"
fake_redirect_path = "/fake"
bootstrap_url = "http://10.0.0.1/"
session_list_path = "/sessions"
logout_path = "/sessions"

[ip_probe]
hostname = "ip.example.com"
path = "/"

[connectivity.http]
internet = "http://www.example.com"
intranet = "http://10.0.0.1"

[connectivity.dns]
timeout = 1

[connectivity.dns.domains]
internet = "www.example.com"
intranet = "portal.campus"

[connectivity.dns.servers]
internet = ["1.1.1.1", "8.8.8.8:53"]

[proxy]
test_url = "not a url"

[proxy.ports]
"7890:7891" = ["clash"]
"1080" = ["v2ray"]

[devices]
known_macs = ["AA-BB-CC-DD-EE-FF"]

[portal]
auto_logout = true

[[error_handle.login]]
status = 200
error_code = 0
hint_message = "Logged in"
log_message = "login succeeded"

[[error_handle.login]]
status = 39
error_code = 1
error_description = "concurrency"
log_level = "warning"

[[error_handle.login]]
status = -1
log_level = "error"
"#;

    #[test]
    fn test_config_parsing() {
        let config = CONFIG_TOML
            .parse::<Config>()
            .expect("Failed to parse config");
        assert_eq!(config.auth.login_user(), "alice@campus");
        assert_eq!(config.gateway.url("/login"), "http://10.0.0.1/login");
        assert_eq!(config.connectivity.dns.timeout(), Duration::from_secs(1));
        assert_eq!(
            config.connectivity.dns.domain_list(),
            vec!["portal.campus", "www.example.com"]
        );
        assert!(config.connectivity.dns.servers.intranet.is_empty());
        assert_eq!(config.proxy.ports.len(), 2);
        assert_eq!(config.proxy.effective_test_url(), DEFAULT_PROXY_TEST_URL);
        assert!(config.portal.auto_logout);
        assert_eq!(config.portal.overload_status, 39);

        let book = config.error_handle.to_book();
        assert_eq!(book.map_login_error(1, "max concurrency"), 39);
        assert_eq!(book.map_login_error(7, ""), -1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default_portal();

        // Valid config should pass
        assert!(config.validate().is_ok());

        config.gateway.hostname = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default_portal();
        config.connectivity.http.internet = "::".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default_portal();
        config.logging.level = "chatty".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default_portal();
        config.proxy.timeout = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_file_and_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG_TOML.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        let rendered = config.to_toml().unwrap();
        let reparsed: Config = rendered.parse().unwrap();
        assert_eq!(reparsed.error_handle.login.handlers().len(), 3);
        assert_eq!(reparsed.devices.known_macs, vec!["AA-BB-CC-DD-EE-FF"]);
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config: Config = include_str!("../config.example.toml").parse().unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.auth.login_user(), "student@portal");
        assert_eq!(config.ip_probe.url(), "http://speed.example.edu/getIP.php");
        assert_eq!(config.connectivity.dns.servers.internet.len(), 2);
        assert!(config.logging.hints);

        let book = config.error_handle.to_book();
        assert_eq!(book.map_login_error(10001, "user concurrency exceeded"), 39);
        assert_eq!(book.map_login_error(0, ""), 200);
        assert_eq!(book.map_login_error(10002, "concurrency"), -1);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::from_file("/nonexistent/portal.toml").unwrap_err();
        assert!(matches!(err, PortalError::Config(_)));
    }
}
