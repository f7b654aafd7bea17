//! MAC/IP normalization, CIDR classification and stable deduplication.

use crate::error::{PortalError, Result};
use ipnet::IpNet;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

lazy_static! {
    static ref NON_ADDRESS_CHARS: Regex = Regex::new(r"[^a-fA-F0-9.:/]").unwrap();
}

/// A 48-bit hardware address rendered as lower-case colon-separated hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = PortalError;

    /// Accepts six hex octets separated by `:` or `-`, any case.
    fn from_str(input: &str) -> Result<Self> {
        let invalid = || PortalError::Parse(format!("invalid MAC address [{input}]"));

        let separator = if input.contains(':') { ':' } else { '-' };
        let parts: Vec<&str> = input.split(separator).collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(&parts) {
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(Self(octets))
    }
}

/// Canonical lower-case colon-separated form of a MAC address.
pub fn normalize_mac(input: &str) -> Result<String> {
    input.parse::<MacAddr>().map(|mac| mac.to_string())
}

/// Normalize a batch, returning `(normalized, rejected)` in input order.
pub fn normalize_macs<S: AsRef<str>>(inputs: &[S]) -> (Vec<String>, Vec<String>) {
    let mut normalized = Vec::with_capacity(inputs.len());
    let mut rejected = Vec::new();
    for input in inputs {
        match normalize_mac(input.as_ref()) {
            Ok(mac) => normalized.push(mac),
            Err(_) => rejected.push(input.as_ref().to_string()),
        }
    }
    (normalized, rejected)
}

/// IP family inferred from textual separators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

/// The last `.` or `:` in the text decides the version.
pub fn infer_ip_version(input: &str) -> Option<IpVersion> {
    input.chars().rev().find_map(|c| match c {
        '.' => Some(IpVersion::V4),
        ':' => Some(IpVersion::V6),
        _ => None,
    })
}

/// Parse an address with optional prefix into `(ip, network)`.
///
/// Characters that cannot be part of an address are stripped first and a host
/// mask (`/32` or `/128`) is assumed when none is given. Unparsable input
/// yields `None`; callers skip such candidates.
pub fn classify_cidr(input: &str) -> Option<(IpAddr, IpNet)> {
    let mut cidr = NON_ADDRESS_CHARS.replace_all(input, "").into_owned();

    if !cidr.contains('/') {
        match infer_ip_version(&cidr)? {
            IpVersion::V4 => cidr.push_str("/32"),
            IpVersion::V6 => cidr.push_str("/128"),
        }
    }

    let net = IpNet::from_str(&cidr).ok()?;
    Some((net.addr(), net.trunc()))
}

/// Stable first-occurrence-wins deduplication.
pub fn dedupe<I, S>(items: I) -> (Vec<String>, HashSet<String>)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut ordered = Vec::new();
    let mut seen = HashSet::new();
    for item in items {
        let item = item.into();
        if seen.insert(item.clone()) {
            ordered.push(item);
        }
    }
    (ordered, seen)
}
