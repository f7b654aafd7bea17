//! Network probes: reachability, DNS servers and local proxies.

pub mod connectivity;
pub mod dns;
pub mod proxy;
pub mod socks;

pub use connectivity::{ConnectivityProbe, DnsGroupResult, ReachabilityCheck};
pub use proxy::{DetectedProxy, ProxyDetector, ProxyReport};
pub use socks::ProxyKind;
