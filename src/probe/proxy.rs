//! Local proxy discovery.
//!
//! Every configured port is probed with each [`ProxyKind`] handshake; a proxy
//! that answers is then asked to fetch a test URL to prove it forwards traffic.

use crate::address::dedupe;
use crate::config::ProxyConfig;
use crate::probe::socks::{proxy_exists, ProxyKind};
use crate::report::Reporter;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// One proxy found listening on a local port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedProxy {
    pub url: String,
    /// Programs configured for the port, comma separated
    pub label: String,
    /// Whether the test URL was fetched successfully through the proxy
    pub available: bool,
}

/// Detection output in port-then-protocol order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyReport {
    pub proxies: Vec<DetectedProxy>,
}

impl ProxyReport {
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn urls(&self) -> Vec<&str> {
        self.proxies.iter().map(|p| p.url.as_str()).collect()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.proxies.iter().map(|p| p.label.as_str()).collect()
    }

    pub fn availability(&self) -> Vec<bool> {
        self.proxies.iter().map(|p| p.available).collect()
    }
}

/// Expand `"port"` and `"start:end"` keys into single ports with deduplicated labels.
///
/// Malformed keys are skipped.
pub fn expand_ports(
    specs: &BTreeMap<String, Vec<String>>,
    reporter: &dyn Reporter,
) -> BTreeMap<u16, Vec<String>> {
    let mut ports: BTreeMap<u16, Vec<String>> = BTreeMap::new();
    for (spec, labels) in specs {
        let Some((start, end)) = parse_port_range(spec) else {
            reporter.debug(&format!("Skip malformed proxy port spec [{spec}]"));
            continue;
        };
        for port in start..=end {
            ports.entry(port).or_default().extend(labels.iter().cloned());
        }
    }
    for labels in ports.values_mut() {
        *labels = dedupe(std::mem::take(labels)).0;
    }
    ports
}

fn parse_port_range(spec: &str) -> Option<(u16, u16)> {
    let spec = spec.trim();
    let (start, end) = match spec.split_once(':') {
        Some((start, end)) => (start.trim().parse::<u16>().ok()?, end.trim().parse::<u16>().ok()?),
        None => {
            let port = spec.parse::<u16>().ok()?;
            (port, port)
        }
    };
    (start <= end).then_some((start, end))
}

pub struct ProxyDetector {
    ports: BTreeMap<u16, Vec<String>>,
    test_url: String,
    timeout: Duration,
    reporter: Arc<dyn Reporter>,
}

impl ProxyDetector {
    pub fn new(config: &ProxyConfig, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            ports: expand_ports(&config.ports, &*reporter),
            test_url: config.effective_test_url(),
            timeout: config.timeout(),
            reporter,
        }
    }

    /// Probe every port with every protocol concurrently.
    pub async fn detect(&self) -> ProxyReport {
        let candidates: Vec<(u16, ProxyKind)> = self
            .ports
            .keys()
            .flat_map(|port| ProxyKind::ALL.into_iter().map(move |kind| (*port, kind)))
            .collect();
        self.reporter.debug(&format!(
            "Probe {} port(s) for local proxies",
            self.ports.len()
        ));

        let handles: Vec<_> = candidates
            .iter()
            .map(|(port, kind)| {
                let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, *port));
                let kind = *kind;
                let test_url = self.test_url.clone();
                let wait = self.timeout;
                let reporter = self.reporter.clone();
                tokio::spawn(async move {
                    if !proxy_exists(kind, addr, wait, &*reporter).await {
                        return None;
                    }
                    Some(liveness_check(kind, addr, &test_url, wait, &*reporter).await)
                })
            })
            .collect();

        // join_all keeps the order of `candidates`.
        let outcomes = join_all(handles).await;

        let mut report = ProxyReport::default();
        for ((port, kind), outcome) in candidates.into_iter().zip(outcomes) {
            let Ok(Some(available)) = outcome else {
                continue;
            };
            let url = kind.proxy_url(SocketAddr::from((Ipv4Addr::LOCALHOST, port)));
            let label = self
                .ports
                .get(&port)
                .map(|labels| labels.join(", "))
                .unwrap_or_default();
            self.reporter.info(&format!(
                "Found proxy [{url}] ({label}), {}",
                if available { "available" } else { "unavailable" }
            ));
            report.proxies.push(DetectedProxy {
                url,
                label,
                available,
            });
        }
        report
    }
}

/// HEAD the test URL through the proxy; success is any status below 300.
async fn liveness_check(
    kind: ProxyKind,
    addr: SocketAddr,
    test_url: &str,
    wait: Duration,
    reporter: &dyn Reporter,
) -> bool {
    let proxy = match reqwest::Proxy::all(kind.proxy_url(addr)) {
        Ok(proxy) => proxy,
        Err(e) => {
            reporter.debug(&format!("Unsupported proxy [{}]: {e}", kind.proxy_url(addr)));
            return false;
        }
    };
    let client = match reqwest::Client::builder()
        .proxy(proxy)
        .timeout(wait)
        .connect_timeout(wait)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            reporter.debug(&format!("Failed to build proxied client: {e}"));
            return false;
        }
    };

    match client.head(test_url).send().await {
        Ok(response) => response.status().as_u16() < 300,
        Err(e) => {
            reporter.debug(&format!(
                "Liveness check through {} failed: {e}",
                kind.proxy_url(addr)
            ));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::memory::MemoryReporter;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn entry(spec: &str, labels: &[&str]) -> (String, Vec<String>) {
        (
            spec.to_string(),
            labels.iter().map(|l| l.to_string()).collect(),
        )
    }

    #[test]
    fn test_expand_ports() {
        let reporter = MemoryReporter::default();
        let ports = expand_ports(
            &BTreeMap::from([
            entry("7890:7892", &["clash"]),
            entry("7891", &["clash", "v2ray"]),
            entry("1080", &["ssr"]),
            entry("9000:8000", &["backwards"]),
            entry("70000", &["too big"]),
            entry("abc", &["junk"]),
            entry("1:2:3", &["junk"]),
            ]),
            &reporter,
        );
        assert_eq!(ports.keys().copied().collect::<Vec<_>>(), vec![1080, 7890, 7891, 7892]);
        assert_eq!(ports[&7891], vec!["clash", "v2ray"]);
        assert_eq!(ports[&7892], vec!["clash"]);
        assert!(reporter.logged("Skip malformed proxy port spec [9000:8000]"));
    }

    #[tokio::test]
    async fn test_detect_socks5_on_local_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut greeting = [0u8; 3];
                if stream.read_exact(&mut greeting).await.is_ok() {
                    let _ = stream.write_all(&[0x05, 0x00]).await;
                }
            }
        });

        let config = ProxyConfig {
            ports: BTreeMap::from([entry(&port.to_string(), &["clash", "clash"])]),
            test_url: "http://proxy-test.invalid/".to_string(),
            timeout: 1,
        };
        let reporter = Arc::new(MemoryReporter::default());
        let detector = ProxyDetector::new(&config, reporter.clone());
        let report = detector.detect().await;

        assert_eq!(report.urls(), vec![format!("socks5://127.0.0.1:{port}")]);
        assert_eq!(report.labels(), vec!["clash"]);
        // The mock never relays anything.
        assert_eq!(report.availability(), vec![false]);
        assert!(reporter.logged("Liveness check through socks5://"));
    }

    #[tokio::test]
    async fn test_detect_nothing() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ProxyConfig {
            ports: BTreeMap::from([entry(&port.to_string(), &["none"])]),
            ..ProxyConfig::default()
        };
        let detector = ProxyDetector::new(&config, Arc::new(MemoryReporter::default()));
        assert!(detector.detect().await.is_empty());
    }
}
