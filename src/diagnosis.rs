//! Full network diagnosis: local addresses, reachability, DNS and proxies.

use crate::device::LocalInterfaces;
use crate::error::{check_status, Result};
use crate::handler::{ErrorDomain, ErrorHandlerBook};
use crate::probe::{ConnectivityProbe, DnsGroupResult, ProxyDetector, ProxyReport, ReachabilityCheck};
use crate::report::Reporter;
use std::fmt;
use std::sync::Arc;

/// Outcome of every diagnosis step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosisReport {
    /// Usable local IPv4 addresses
    pub local_ipv4: Vec<String>,
    pub internet_status: i32,
    pub intranet_status: i32,
    pub resolve_status: i32,
    pub internet_dns: DnsGroupResult,
    pub intranet_dns: DnsGroupResult,
    pub proxies: ProxyReport,
}

impl fmt::Display for DiagnosisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Local IPv4: {}", self.local_ipv4.join(", "))?;
        writeln!(f, "Internet HTTP status: {}", self.internet_status)?;
        writeln!(f, "Intranet HTTP status: {}", self.intranet_status)?;
        writeln!(f, "System resolver status: {}", self.resolve_status)?;
        for (name, group) in [("Internet", &self.internet_dns), ("Intranet", &self.intranet_dns)] {
            writeln!(
                f,
                "{name} DNS available: [{}] unavailable: [{}]",
                group.available.join(", "),
                group.unavailable.join(", ")
            )?;
        }
        if self.proxies.is_empty() {
            write!(f, "No local proxy found")
        } else {
            write!(f, "Proxies:")?;
            for proxy in &self.proxies.proxies {
                write!(
                    f,
                    "\n  {} ({}) {}",
                    proxy.url,
                    proxy.label,
                    if proxy.available { "available" } else { "unavailable" }
                )?;
            }
            Ok(())
        }
    }
}

pub struct Diagnosis {
    probe: Arc<ConnectivityProbe>,
    proxies: ProxyDetector,
    handlers: ErrorHandlerBook,
    reporter: Arc<dyn Reporter>,
}

impl Diagnosis {
    pub fn new(
        probe: Arc<ConnectivityProbe>,
        proxies: ProxyDetector,
        handlers: ErrorHandlerBook,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            probe,
            proxies,
            handlers,
            reporter,
        }
    }

    pub async fn run(&self, local: &LocalInterfaces) -> DiagnosisReport {
        let mut report = DiagnosisReport {
            local_ipv4: local.ipv4.clone(),
            ..DiagnosisReport::default()
        };
        if report.local_ipv4.is_empty() {
            self.reporter.error("Cannot get any interface with valid IP");
        } else {
            self.reporter.info(&format!(
                "All valid IPv4 address(es): {}",
                report.local_ipv4.join(", ")
            ));
        }

        self.reporter.info("Start internet connectivity check");
        let internet = self.probe.internet_check().await;
        report.internet_status = self.settle(ErrorDomain::InternetCheck, &internet);

        self.reporter.info("Start intranet connectivity check");
        let intranet = self.probe.intranet_check().await;
        report.intranet_status = self.settle(ErrorDomain::IntranetCheck, &intranet);

        self.reporter.info("Start system DNS check");
        let resolved = self.probe.resolve_check().await;
        report.resolve_status = self.settle(ErrorDomain::ResolveCheck, &resolved);

        self.reporter.info("Start internet DNS check");
        report.internet_dns = self.probe.internet_dns_check().await;
        self.summarize_dns("internet", &report.internet_dns);

        self.reporter.info("Start intranet DNS check");
        report.intranet_dns = self.probe.intranet_dns_check().await;
        self.summarize_dns("intranet", &report.intranet_dns);

        self.reporter.info("Start local proxy detecting");
        report.proxies = self.proxies.detect().await;
        if !report.proxies.is_empty() && !report.proxies.availability().contains(&true) {
            self.reporter.warn("No proxy available");
        }

        report
    }

    fn settle(&self, domain: ErrorDomain, result: &Result<u16>) -> i32 {
        if let Err(e) = result {
            self.reporter.warn(&format!("{e}"));
        }
        let status = check_status(result);
        self.handlers.dispatch(domain, status, &*self.reporter);
        status
    }

    fn summarize_dns(&self, group: &str, result: &DnsGroupResult) {
        if !result.available.is_empty() {
            self.reporter.info(&format!(
                "Available {group} DNS: {}",
                result.available.join(", ")
            ));
        } else {
            self.reporter.error(&format!("No {group} DNS available"));
        }
        if !result.unavailable.is_empty() {
            self.reporter.info(&format!(
                "Unavailable {group} DNS: {}",
                result.unavailable.join(", ")
            ));
        }
    }
}
