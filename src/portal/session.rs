//! Session registry: the gateway's list of authenticated devices for this
//! account, validated and keyed by MAC address.

use crate::address::normalize_mac;
use crate::error::{PortalError, Result};
use crate::portal::gateway::{PortalGateway, RawSession};
use crate::report::Reporter;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

lazy_static! {
    static ref IPV4_LIKE: Regex = Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap();
}

/// One authenticated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub nas_ip_addr: String,
    /// Normalized IP address
    pub user_ip_addr: String,
    /// Canonical lower-case colon-separated MAC
    pub user_mac_addr: String,
    pub start_time: String,
    /// Key used for eviction
    pub unique_id: String,
    pub is_current_session: bool,
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MAC: {}  IP: {}  Since: {}",
            self.user_mac_addr, self.user_ip_addr, self.start_time
        )?;
        if self.is_current_session {
            write!(f, "  (current)")?;
        }
        Ok(())
    }
}

/// First address-looking substring of `body` that parses as IPv4.
pub fn first_ipv4(body: &str) -> Option<Ipv4Addr> {
    IPV4_LIKE
        .find_iter(body)
        .find_map(|m| m.as_str().parse::<Ipv4Addr>().ok())
}

pub struct SessionRegistry {
    gateway: Arc<dyn PortalGateway>,
    reporter: Arc<dyn Reporter>,
    sessions: HashMap<String, Session>,
    order: Vec<String>,
}

impl SessionRegistry {
    pub fn new(gateway: Arc<dyn PortalGateway>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            gateway,
            reporter,
            sessions: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Session MACs in gateway order.
    pub fn macs(&self) -> &[String] {
        &self.order
    }

    pub fn get(&self, mac: &str) -> Option<&Session> {
        self.sessions.get(mac)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.order.iter().filter_map(|mac| self.sessions.get(mac))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn current(&self) -> Option<&Session> {
        self.sessions().find(|s| s.is_current_session)
    }

    /// Fetch the session list again and rebuild the registry from empty.
    pub async fn refresh(&mut self) -> Result<u16> {
        self.sessions.clear();
        self.order.clear();

        let token = self.gateway.auth_token().await?;
        let list = self.gateway.fetch_sessions(&token).await?;
        let Some(concurrency) = list.concurrency() else {
            return Err(PortalError::Protocol(format!(
                "error getting concurrency from [{}]",
                list.concurrency
            )));
        };
        self.reporter.debug(&format!("Account concurrency limit: {concurrency}"));

        if list.sessions.is_empty() {
            self.reporter.info("No session");
        }
        self.ingest(list.sessions);
        Ok(200)
    }

    /// Validate raw records one by one; bad records are dropped with a warning.
    pub fn ingest(&mut self, records: Vec<RawSession>) {
        for raw in records {
            if raw.user_mac_addr.is_empty() || raw.user_ip_addr.is_empty() || raw.unique_id.is_empty()
            {
                self.reporter.warn(&format!("Invalid session: {raw:?}"));
                continue;
            }

            let Ok(mac) = normalize_mac(&raw.user_mac_addr) else {
                self.reporter.warn(&format!(
                    "Session with invalid MAC address [{}]",
                    raw.user_mac_addr
                ));
                continue;
            };

            let Ok(ip) = raw.user_ip_addr.trim().parse::<IpAddr>() else {
                self.reporter.warn(&format!(
                    "Session with invalid user IP address [{}]",
                    raw.user_ip_addr
                ));
                continue;
            };

            if self.sessions.contains_key(&mac) {
                self.reporter
                    .warn(&format!("Duplicated session with MAC address [{mac}]"));
                continue;
            }

            self.order.push(mac.clone());
            self.sessions.insert(
                mac.clone(),
                Session {
                    session_id: raw.session_id,
                    nas_ip_addr: raw.nas_ip_addr,
                    user_ip_addr: ip.to_string(),
                    user_mac_addr: mac,
                    start_time: raw.start_time,
                    unique_id: raw.unique_id,
                    is_current_session: false,
                },
            );
        }
    }

    fn mark_current(&mut self, mac: &str) {
        if let Some(session) = self.sessions.get_mut(mac) {
            session.is_current_session = true;
        }
    }

    /// Mark the session whose IP matches what the external probe reports.
    pub async fn identify_by_external_probe(&mut self) -> Result<()> {
        let body = self.gateway.whoami().await?;
        let ip = first_ipv4(&body)
            .ok_or_else(|| PortalError::Parse("cannot get a valid IP from probe".to_string()))?
            .to_string();

        let found = self
            .sessions()
            .find(|s| s.user_ip_addr == ip)
            .map(|s| s.user_mac_addr.clone());
        match found {
            Some(mac) => {
                self.mark_current(&mac);
                Ok(())
            }
            None => Err(PortalError::NotFound(format!("no session with IP [{ip}]"))),
        }
    }

    /// Mark the first session, in registry order, whose MAC is a candidate.
    pub fn identify_by_local_macs(&mut self, candidates: &[String]) -> Result<()> {
        let found = self
            .order
            .iter()
            .find(|mac| candidates.contains(*mac))
            .cloned();
        match found {
            Some(mac) => {
                self.mark_current(&mac);
                Ok(())
            }
            None => Err(PortalError::NotFound(
                "no session has a MAC address in the local MAC list".to_string(),
            )),
        }
    }

    /// Probe first, local MACs as fallback. Failures are only logged.
    pub async fn identify_current(&mut self, local_macs: &[String]) -> Option<&Session> {
        if let Err(e) = self.identify_by_external_probe().await {
            self.reporter.warn(&format!("{e}"));
            if let Err(e) = self.identify_by_local_macs(local_macs) {
                self.reporter.warn(&format!("{e}"));
            }
        }
        self.current()
    }

    /// Re-authenticate and delete the session keyed by `unique_id`.
    pub async fn evict(&self, unique_id: &str) -> Result<u16> {
        let token = self.gateway.auth_token().await?;
        self.reporter
            .info(&format!("Try to logout session [{unique_id}]"));
        self.gateway.delete_session(&token, unique_id).await
    }

    /// Numbered listing in registry order.
    pub fn render(&self) -> String {
        self.sessions()
            .enumerate()
            .map(|(index, session)| format!("[{index}] {session}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::gateway::testing::{raw_session, FakeGateway};
    use crate::portal::gateway::SessionListResponse;
    use crate::report::memory::MemoryReporter;

    const A: &str = "aa:bb:cc:dd:ee:01";
    const B: &str = "aa:bb:cc:dd:ee:02";

    fn setup(gateway: FakeGateway) -> (SessionRegistry, Arc<FakeGateway>, Arc<MemoryReporter>) {
        let gateway = Arc::new(gateway);
        let reporter = Arc::new(MemoryReporter::default());
        (
            SessionRegistry::new(gateway.clone(), reporter.clone()),
            gateway,
            reporter,
        )
    }

    fn list(records: Vec<RawSession>) -> SessionListResponse {
        SessionListResponse {
            concurrency: "2".to_string(),
            sessions: records,
        }
    }

    #[tokio::test]
    async fn test_refresh_drops_bad_records() {
        let (mut registry, _, reporter) = setup(FakeGateway {
            sessions: list(vec![
                raw_session("AA-BB-CC-DD-EE-01", "10.0.0.1", "u1"),
                raw_session(B, "10.0.0.2", ""),
                raw_session("not-a-mac", "10.0.0.3", "u3"),
                raw_session(B, "10.0.0.300", "u4"),
                raw_session("aa:bb:cc:dd:ee:01", "10.0.0.5", "u5"),
                raw_session(B, " 10.0.0.6 ", "u6"),
            ]),
            ..FakeGateway::default()
        });

        assert_eq!(registry.refresh().await.unwrap(), 200);
        assert_eq!(registry.macs(), &[A.to_string(), B.to_string()]);
        assert_eq!(registry.get(A).unwrap().unique_id, "u1");
        assert_eq!(registry.get(B).unwrap().user_ip_addr, "10.0.0.6");
        assert!(registry.sessions().all(|s| !s.unique_id.is_empty()));
        assert!(reporter.logged("Duplicated session with MAC address [aa:bb:cc:dd:ee:01]"));
        assert!(reporter.logged("invalid MAC address [not-a-mac]"));
    }

    #[tokio::test]
    async fn test_refresh_requires_concurrency() {
        let (mut registry, _, _) = setup(FakeGateway {
            sessions: SessionListResponse {
                concurrency: "0".to_string(),
                sessions: vec![raw_session(A, "10.0.0.1", "u1")],
            },
            ..FakeGateway::default()
        });
        registry.ingest(vec![raw_session(B, "10.0.0.2", "old")]);

        let err = registry.refresh().await.unwrap_err();
        assert_eq!(err.status(), -1);
        // Stale entries never survive a refresh.
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_identify_by_probe_then_macs() {
        let (mut registry, _, _) = setup(FakeGateway {
            sessions: list(vec![
                raw_session(A, "10.0.0.1", "u1"),
                raw_session(B, "10.0.0.2", "u2"),
            ]),
            whoami: Some("Your IP: 10.0.0.2\n".to_string()),
            ..FakeGateway::default()
        });
        registry.refresh().await.unwrap();
        let current = registry.identify_current(&[]).await.unwrap();
        assert_eq!(current.user_mac_addr, B);

        let (mut registry, _, reporter) = registry_without_probe();
        registry.refresh().await.unwrap();
        let current = registry
            .identify_current(&[B.to_string(), A.to_string()])
            .await
            .unwrap();
        // Registry order decides, not candidate order.
        assert_eq!(current.user_mac_addr, A);
        assert!(reporter.logged("ip probe unreachable"));
        assert!(registry.render().starts_with("[0] MAC: aa:bb:cc:dd:ee:01"));
        assert!(registry.render().contains("(current)"));
    }

    fn registry_without_probe() -> (SessionRegistry, Arc<FakeGateway>, Arc<MemoryReporter>) {
        setup(FakeGateway {
            sessions: list(vec![
                raw_session(A, "10.0.0.1", "u1"),
                raw_session(B, "10.0.0.2", "u2"),
            ]),
            ..FakeGateway::default()
        })
    }

    #[tokio::test]
    async fn test_identify_failures() {
        let (mut registry, _, _) = setup(FakeGateway {
            sessions: list(vec![raw_session(A, "10.0.0.1", "u1")]),
            whoami: Some("no address here".to_string()),
            ..FakeGateway::default()
        });
        registry.refresh().await.unwrap();
        assert!(registry.identify_by_external_probe().await.is_err());
        assert!(registry.identify_by_local_macs(&[B.to_string()]).is_err());
        assert!(registry.current().is_none());
    }

    #[tokio::test]
    async fn test_evict_reauthenticates() {
        let (registry, gateway, _) = setup(FakeGateway {
            delete_status: 200,
            ..FakeGateway::default()
        });
        assert_eq!(registry.evict("u9").await.unwrap(), 200);
        assert_eq!(gateway.calls(), vec!["token", "delete:u9"]);
    }

    #[test]
    fn test_first_ipv4() {
        assert_eq!(first_ipv4("ip=999.1.1.1 then 10.2.3.4"), Some(Ipv4Addr::new(10, 2, 3, 4)));
        assert_eq!(first_ipv4("none"), None);
        assert_eq!(first_ipv4("1234.5.6.7"), None);
        assert_eq!(first_ipv4("ip:1234.5.6.7, 10.0.0.9"), Some(Ipv4Addr::new(10, 0, 0, 9)));
    }
}
