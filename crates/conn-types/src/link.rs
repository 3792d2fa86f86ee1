//! Link properties: interface, addresses, routes, DNS servers and proxy.

use crate::{IpPrefix, ParseError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// An address assigned to an interface, with its on-link prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkAddress {
    pub address: IpAddr,
    pub prefix_len: u8,
}

impl LinkAddress {
    pub fn new(address: IpAddr, prefix_len: u8) -> Self {
        Self {
            address,
            prefix_len,
        }
    }

    pub fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    pub fn is_ipv6(&self) -> bool {
        self.address.is_ipv6()
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for LinkAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let prefix: IpPrefix = s.parse()?;
        Ok(LinkAddress::new(*prefix.address(), prefix.prefix_len()))
    }
}

/// A route: destination prefix, optional gateway and optional interface.
///
/// A route without a gateway is directly connected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteInfo {
    pub destination: IpPrefix,
    pub gateway: Option<IpAddr>,
    pub interface: Option<String>,
}

impl RouteInfo {
    pub fn new(destination: IpPrefix, gateway: Option<IpAddr>) -> Self {
        Self {
            destination,
            gateway,
            interface: None,
        }
    }

    /// Creates a default route (0.0.0.0/0 or ::/0) via `gateway`.
    pub fn default_via(gateway: IpAddr) -> Self {
        let destination = if gateway.is_ipv4() {
            IpPrefix::default_v4()
        } else {
            IpPrefix::default_v6()
        };
        Self::new(destination, Some(gateway))
    }

    /// Creates a host route to `host`, optionally through `gateway`.
    pub fn make_host_route(host: IpAddr, gateway: Option<IpAddr>) -> Self {
        Self::new(IpPrefix::host(host), gateway)
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn is_default_route(&self) -> bool {
        self.destination.is_default()
    }

    pub fn is_host_route(&self) -> bool {
        self.destination.is_host_route()
    }

    /// Returns the gateway when it is a real next hop (not unspecified).
    pub fn next_hop(&self) -> Option<IpAddr> {
        self.gateway.filter(|gw| !gw.is_unspecified())
    }

    pub fn matches(&self, dest: &IpAddr) -> bool {
        self.destination.contains(dest)
    }

    /// Picks the most specific route in `routes` that covers `dest`.
    ///
    /// Routes of the other address family are ignored. On equal prefix
    /// lengths the first route wins.
    pub fn select_best_route<'a>(
        routes: impl IntoIterator<Item = &'a RouteInfo>,
        dest: &IpAddr,
    ) -> Option<&'a RouteInfo> {
        let mut best: Option<&RouteInfo> = None;
        for route in routes {
            if route.destination.is_ipv4() != dest.is_ipv4() {
                continue;
            }
            if let Some(b) = best {
                if b.destination.prefix_len() >= route.destination.prefix_len() {
                    continue;
                }
            }
            if route.matches(dest) {
                best = Some(route);
            }
        }
        best
    }
}

impl fmt::Display for RouteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.destination)?;
        if let Some(gw) = self.gateway {
            write!(f, " via {}", gw)?;
        }
        if let Some(iface) = &self.interface {
            write!(f, " dev {}", iface)?;
        }
        Ok(())
    }
}

/// HTTP proxy settings attached to a link or set globally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyInfo {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub exclusion_list: Vec<String>,
}

impl ProxyInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            exclusion_list: Vec::new(),
        }
    }

    /// Returns true if `host` is excluded from proxying (suffix match).
    pub fn is_excluded(&self, host: &str) -> bool {
        self.exclusion_list
            .iter()
            .any(|e| host == e || host.ends_with(&format!(".{}", e.trim_start_matches('.'))))
    }
}

impl fmt::Display for ProxyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ProxyInfo {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseError::InvalidProxy(s.to_string()))?;
        if host.is_empty() {
            return Err(ParseError::InvalidProxy(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| ParseError::InvalidProxy(s.to_string()))?;
        Ok(ProxyInfo::new(host, port))
    }
}

/// Delta between two collections: what went away and what is new.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareResult<T> {
    pub removed: Vec<T>,
    pub added: Vec<T>,
}

impl<T> CompareResult<T> {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

impl<T> Default for CompareResult<T> {
    fn default() -> Self {
        Self {
            removed: Vec::new(),
            added: Vec::new(),
        }
    }
}

fn compare<T: Clone + PartialEq>(old: &[T], new: Option<&[T]>) -> CompareResult<T> {
    let new = new.unwrap_or(&[]);
    CompareResult {
        removed: old.iter().filter(|o| !new.contains(o)).cloned().collect(),
        added: new.iter().filter(|n| !old.contains(n)).cloned().collect(),
    }
}

/// Everything the stack needs to know to use a connected link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkProperties {
    pub interface_name: Option<String>,
    #[serde(default)]
    pub addresses: Vec<LinkAddress>,
    #[serde(default)]
    pub routes: Vec<RouteInfo>,
    #[serde(default)]
    pub dns_servers: Vec<IpAddr>,
    #[serde(default)]
    pub http_proxy: Option<ProxyInfo>,
}

impl LinkProperties {
    pub fn new(interface_name: impl Into<String>) -> Self {
        Self {
            interface_name: Some(interface_name.into()),
            ..Default::default()
        }
    }

    pub fn interface_name(&self) -> Option<&str> {
        self.interface_name.as_deref().filter(|n| !n.is_empty())
    }

    pub fn add_address(&mut self, address: LinkAddress) {
        if !self.addresses.contains(&address) {
            self.addresses.push(address);
        }
    }

    /// Adds a route, stamping it with this link's interface when it has none.
    pub fn add_route(&mut self, mut route: RouteInfo) {
        if route.interface.is_none() {
            route.interface = self.interface_name.clone();
        }
        if !self.routes.contains(&route) {
            self.routes.push(route);
        }
    }

    pub fn add_dns(&mut self, dns: IpAddr) {
        if !self.dns_servers.contains(&dns) {
            self.dns_servers.push(dns);
        }
    }

    pub fn is_identical_interface_name(&self, other: &LinkProperties) -> bool {
        self.interface_name() == other.interface_name()
    }

    pub fn compare_addresses(&self, other: Option<&LinkProperties>) -> CompareResult<LinkAddress> {
        compare(&self.addresses, other.map(|o| o.addresses.as_slice()))
    }

    pub fn compare_routes(&self, other: Option<&LinkProperties>) -> CompareResult<RouteInfo> {
        compare(&self.routes, other.map(|o| o.routes.as_slice()))
    }

    pub fn compare_dnses(&self, other: Option<&LinkProperties>) -> CompareResult<IpAddr> {
        compare(&self.dns_servers, other.map(|o| o.dns_servers.as_slice()))
    }
}

impl fmt::Display for LinkProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "iface {}", self.interface_name().unwrap_or("(none)"))?;
        let join = |v: Vec<String>| v.join(",");
        write!(
            f,
            " addrs [{}] routes [{}] dns [{}]",
            join(self.addresses.iter().map(|a| a.to_string()).collect()),
            join(self.routes.iter().map(|r| r.to_string()).collect()),
            join(self.dns_servers.iter().map(|d| d.to_string()).collect())
        )?;
        if let Some(proxy) = &self.http_proxy {
            write!(f, " proxy {}", proxy)?;
        }
        Ok(())
    }
}
