//! Reachability checks: HTTP targets, the system resolver and groups of DNS
//! servers queried directly.

use crate::address::dedupe;
use crate::config::{ConnectivityConfig, HttpConfig};
use crate::error::{PortalError, Result};
use crate::portal::http::build_client;
use crate::probe::dns;
use crate::report::Reporter;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::time::{sleep, timeout};

/// Status reported by a fully successful resolver check.
pub const RESOLVE_OK: u16 = 200;

/// The two reachability checks the login flow depends on.
#[async_trait]
pub trait ReachabilityCheck: Send + Sync {
    /// Status of the internet target, or an error carrying the best-known status.
    async fn internet_check(&self) -> Result<u16>;

    /// Status of the gateway's pre-auth target.
    async fn intranet_check(&self) -> Result<u16>;
}

/// Servers split by outcome, each list in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsGroupResult {
    pub available: Vec<String>,
    pub unavailable: Vec<String>,
}

pub struct ConnectivityProbe {
    client: Client,
    config: ConnectivityConfig,
    reporter: Arc<dyn Reporter>,
}

impl ConnectivityProbe {
    pub fn new(
        http: &HttpConfig,
        config: ConnectivityConfig,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(http)?,
            config,
            reporter,
        })
    }

    /// GET `url` without proxy or redirects; statuses of 300 and above fail.
    pub async fn http_check(&self, url: &str) -> Result<u16> {
        self.reporter.debug(&format!("Send connectivity check to [{url}]"));
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        if status >= 300 {
            return Err(PortalError::http(status, format!("GET {url}")));
        }
        Ok(status)
    }

    /// Resolve every domain through the host resolver; the first failure aborts.
    pub async fn system_resolve_check(&self, domains: &[String]) -> Result<u16> {
        let wait = self.config.dns.timeout();
        for domain in domains {
            let addresses = timeout(wait, lookup_host((domain.as_str(), 80)))
                .await
                .map_err(|_| PortalError::Timeout(format!("resolving [{domain}]")))??;
            let addresses: Vec<String> = addresses.map(|a| a.ip().to_string()).collect();
            if addresses.is_empty() {
                return Err(PortalError::NotFound(format!("no address for [{domain}]")));
            }
            self.reporter.debug(&format!(
                "System resolver result for [{domain}]: {}",
                addresses.join(", ")
            ));
        }
        Ok(RESOLVE_OK)
    }

    /// Resolver check over the configured intranet and internet domains.
    pub async fn resolve_check(&self) -> Result<u16> {
        self.system_resolve_check(&self.config.dns.domain_list()).await
    }

    /// Query every domain at every server, one concurrent worker per server.
    ///
    /// A server is available only when all domains resolve to A records. Each
    /// worker stops at its first failure and waits the DNS timeout between
    /// consecutive queries.
    pub async fn dns_group_check(&self, servers: &[String], domains: &[String]) -> DnsGroupResult {
        let (servers, _) = dedupe(
            servers
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty()),
        );
        let domains: Arc<[String]> = domains.to_vec().into();
        let wait = self.config.dns.timeout();

        let handles: Vec<_> = servers
            .iter()
            .map(|server| {
                let server = server.clone();
                let domains = domains.clone();
                let reporter = self.reporter.clone();
                tokio::spawn(async move { check_server(&server, &domains, wait, &*reporter).await })
            })
            .collect();

        // Slot i belongs to servers[i]; awaited in order, not completion order.
        let mut slots = vec![false; servers.len()];
        for (slot, handle) in slots.iter_mut().zip(handles) {
            *slot = handle.await.unwrap_or(false);
        }

        let mut result = DnsGroupResult::default();
        for (server, ok) in servers.into_iter().zip(slots) {
            if ok {
                result.available.push(server);
            } else {
                result.unavailable.push(server);
            }
        }
        result
    }

    pub async fn internet_dns_check(&self) -> DnsGroupResult {
        self.dns_group_check(
            &self.config.dns.servers.internet,
            &self.config.dns.domain_list(),
        )
        .await
    }

    pub async fn intranet_dns_check(&self) -> DnsGroupResult {
        self.dns_group_check(
            &self.config.dns.servers.intranet,
            &self.config.dns.domain_list(),
        )
        .await
    }
}

async fn check_server(
    server: &str,
    domains: &[String],
    wait: Duration,
    reporter: &dyn Reporter,
) -> bool {
    for (i, domain) in domains.iter().enumerate() {
        if i > 0 {
            sleep(wait).await;
        }
        if let Err(e) = dns::check(server, domain, wait, reporter).await {
            reporter.debug(&format!("DNS server [{server}] failed on [{domain}]: {e}"));
            return false;
        }
    }
    true
}

#[async_trait]
impl ReachabilityCheck for ConnectivityProbe {
    async fn internet_check(&self) -> Result<u16> {
        self.http_check(&self.config.http.internet).await
    }

    async fn intranet_check(&self) -> Result<u16> {
        self.http_check(&self.config.http.intranet).await
    }
}
