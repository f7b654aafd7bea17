//! Local interface enumeration and the operator's known-device set.

use crate::address::{self, classify_cidr, dedupe, MacAddr};
use crate::config::DevicesConfig;
use crate::report::Reporter;
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

/// One local network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub mac: Option<String>,
    pub addresses: Vec<IpAddr>,
}

impl InterfaceInfo {
    /// IPv4 addresses outside loopback and link-local ranges.
    pub fn usable_ipv4(&self) -> Vec<IpAddr> {
        self.addresses
            .iter()
            .copied()
            .filter(|ip| is_usable_ipv4(*ip))
            .collect()
    }
}

impl fmt::Display for InterfaceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addresses: Vec<String> = self.addresses.iter().map(|a| a.to_string()).collect();
        writeln!(f, "{}", self.name)?;
        writeln!(f, "  MAC: {}", self.mac.as_deref().unwrap_or("-"))?;
        write!(f, "  Address(es): {}", addresses.join(", "))
    }
}

// Loopback is 127.0.0.0/8, link-local is 169.254.0.0/16.
fn is_usable_ipv4(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_link_local(),
        IpAddr::V6(_) => false,
    }
}

/// Snapshot of local interfaces with the derived MAC and IPv4 lists.
#[derive(Debug, Clone, Default)]
pub struct LocalInterfaces {
    pub interfaces: Vec<InterfaceInfo>,
    /// MACs of interfaces carrying at least one usable IPv4 address
    pub macs: Vec<String>,
    /// All usable IPv4 addresses
    pub ipv4: Vec<String>,
}

impl LocalInterfaces {
    pub fn from_interfaces(interfaces: Vec<InterfaceInfo>) -> Self {
        let mut macs = Vec::new();
        let mut ipv4 = Vec::new();
        for interface in &interfaces {
            let usable = interface.usable_ipv4();
            if usable.is_empty() {
                continue;
            }
            ipv4.extend(usable.iter().map(|ip| ip.to_string()));
            if let Some(mac) = &interface.mac {
                macs.push(mac.clone());
            }
        }
        Self {
            interfaces,
            macs: dedupe(macs).0,
            ipv4,
        }
    }

    /// Enumerate the host's interfaces.
    pub fn discover() -> Self {
        let interfaces = pnet_datalink::interfaces()
            .into_iter()
            .map(|iface| {
                let mac = iface.mac.map(|m| [m.0, m.1, m.2, m.3, m.4, m.5]);
                interface_info(iface.name, mac, iface.ips.iter().map(|net| net.ip()))
            })
            .collect();
        Self::from_interfaces(interfaces)
    }
}

/// Build an [`InterfaceInfo`]; an all-zero hardware address counts as none.
pub fn interface_info<I>(name: String, mac: Option<[u8; 6]>, ips: I) -> InterfaceInfo
where
    I: IntoIterator<Item = IpAddr>,
{
    let mac = mac
        .map(MacAddr::new)
        .filter(|mac| !mac.is_zero())
        .map(|mac| mac.to_string());
    // Normalise through the CIDR parser the same way any other address is.
    let addresses = ips
        .into_iter()
        .filter_map(|ip| classify_cidr(&ip.to_string()).map(|(ip, _)| ip))
        .collect();
    InterfaceInfo {
        name,
        mac,
        addresses,
    }
}

/// Ordered list of the operator's own device MACs plus its lookup set.
#[derive(Debug, Clone, Default)]
pub struct KnownDeviceSet {
    ordered: Vec<String>,
    members: HashSet<String>,
}

impl KnownDeviceSet {
    pub fn new<I, S>(macs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (ordered, members) = dedupe(macs);
        Self { ordered, members }
    }

    /// Build from configuration, optionally appending local interface MACs.
    ///
    /// Malformed configured MACs are dropped with a warning.
    pub fn from_config(
        config: &DevicesConfig,
        local: &LocalInterfaces,
        reporter: &dyn Reporter,
    ) -> Self {
        let (mut macs, rejected) = address::normalize_macs(&config.known_macs);
        if !rejected.is_empty() {
            reporter.warn(&format!(
                "MAC address(es) with invalid format: {}",
                rejected.join(", ")
            ));
        }
        if !local.macs.is_empty() {
            reporter.debug(&format!(
                "MAC address(es) of local interface(s): {}",
                local.macs.join(", ")
            ));
        }
        if config.use_interface {
            macs.extend(local.macs.iter().cloned());
        }
        Self::new(macs)
    }

    pub fn macs(&self) -> &[String] {
        &self.ordered
    }

    pub fn contains(&self, mac: &str) -> bool {
        self.members.contains(mac)
    }

    /// Pick the session MAC to evict.
    ///
    /// A stranger's device goes first; otherwise the known device with the
    /// smallest configured index; otherwise the first session.
    pub fn select_victim<S: AsRef<str>>(&self, session_macs: &[S]) -> Option<String> {
        let (sessions, session_set) = dedupe(session_macs.iter().map(|m| m.as_ref()));

        if let Some(stranger) = sessions.iter().find(|mac| !self.contains(mac)) {
            return Some(stranger.clone());
        }

        if let Some(known) = self.ordered.iter().find(|mac| session_set.contains(*mac)) {
            return Some(known.clone());
        }

        sessions.into_iter().next()
    }
}
