//! Link monitor for interface-driven trackers.
//!
//! Dumps links, addresses and routes over rtnetlink, then follows the link,
//! address and route multicast groups. The kernel view is folded into
//! [`KernelLinks`] and each watched interface is reported through its
//! tracker's driver handle, exactly as a radio monitor would.

#[cfg(target_os = "linux")]
mod netlink;

#[cfg(target_os = "linux")]
pub use netlink::{decode_batch, kernel_event, RouteSocket};

use crate::config::DaemonConfig;
use crate::handle::ConnectivityHandle;
use crate::tracker::TrackerDriver;
use conn_types::{LinkAddress, LinkProperties, NetworkType, RouteInfo};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::time::Duration;

pub const REASON_LINK_DOWN: &str = "linkDown";
pub const REASON_NO_ADDRESS: &str = "noAddress";

/// Kernel notification reduced to what the watcher tracks. Interfaces are
/// keyed by ifindex, as the kernel reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelEvent {
    NewLink { index: u32, name: String, up: bool },
    DelLink { index: u32 },
    NewAddress { index: u32, address: LinkAddress },
    DelAddress { index: u32, address: LinkAddress },
    NewRoute { index: u32, route: RouteInfo },
    DelRoute { index: u32, route: RouteInfo },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelLink {
    pub name: String,
    pub up: bool,
    pub addresses: Vec<LinkAddress>,
    pub routes: Vec<RouteInfo>,
}

/// Kernel link table as seen through rtnetlink.
#[derive(Debug, Default)]
pub struct KernelLinks {
    links: HashMap<u32, KernelLink>,
}

impl KernelLinks {
    pub fn apply(&mut self, event: KernelEvent) {
        match event {
            KernelEvent::NewLink { index, name, up } => {
                let link = self.links.entry(index).or_default();
                link.name = name;
                link.up = up;
            }
            KernelEvent::DelLink { index } => {
                self.links.remove(&index);
            }
            KernelEvent::NewAddress { index, address } => {
                let addresses = &mut self.links.entry(index).or_default().addresses;
                if !addresses.contains(&address) {
                    addresses.push(address);
                }
            }
            KernelEvent::DelAddress { index, address } => {
                if let Some(link) = self.links.get_mut(&index) {
                    link.addresses.retain(|a| *a != address);
                }
            }
            KernelEvent::NewRoute { index, route } => {
                let routes = &mut self.links.entry(index).or_default().routes;
                if !routes.contains(&route) {
                    routes.push(route);
                }
            }
            KernelEvent::DelRoute { index, route } => {
                if let Some(link) = self.links.get_mut(&index) {
                    link.routes.retain(|r| *r != route);
                }
            }
        }
    }

    /// Looks a link up by name. Entries whose RTM_NEWLINK has not arrived
    /// yet have no name and never match.
    pub fn by_name(&self, name: &str) -> Option<&KernelLink> {
        self.links.values().find(|link| !link.name.is_empty() && link.name == name)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

struct WatchedInterface {
    network_type: NetworkType,
    iface: String,
    dns: Vec<IpAddr>,
    driver: TrackerDriver,
}

impl WatchedInterface {
    fn link_properties(&self, kernel: &KernelLink) -> LinkProperties {
        let mut link = LinkProperties::new(self.iface.clone());
        for address in &kernel.addresses {
            link.add_address(*address);
        }
        for route in &kernel.routes {
            link.add_route(route.clone());
        }
        for dns in &self.dns {
            link.add_dns(*dns);
        }
        link
    }
}

pub struct InterfaceWatcher {
    resync_interval: Duration,
    watched: Vec<WatchedInterface>,
}

impl InterfaceWatcher {
    /// Watches every configured network that names an interface and has a
    /// driver.
    pub fn new(config: &DaemonConfig, drivers: &BTreeMap<NetworkType, TrackerDriver>) -> Self {
        let watched = config
            .network
            .iter()
            .filter_map(|net| {
                let iface = net.interface.clone()?;
                let driver = drivers.get(&net.network_type)?.clone();
                Some(WatchedInterface {
                    network_type: net.network_type,
                    iface,
                    dns: net.dns.clone(),
                    driver,
                })
            })
            .collect();
        Self {
            resync_interval: config.resync_interval(),
            watched,
        }
    }

    pub fn watched_interfaces(&self) -> Vec<&str> {
        self.watched.iter().map(|w| w.iface.as_str()).collect()
    }

    /// Follows kernel link state until the service stops. A full re-dump
    /// runs every resync interval and whenever the socket overruns.
    #[cfg(target_os = "linux")]
    pub async fn run(self, handle: ConnectivityHandle) {
        tracing::info!(interfaces = ?self.watched_interfaces(), resync = ?self.resync_interval, "Interface watcher started");
        let mut socket = match RouteSocket::open() {
            Ok(socket) => socket,
            Err(e) => {
                tracing::error!(error = %e, "Interface watcher could not open rtnetlink socket");
                return;
            }
        };

        let mut kernel = KernelLinks::default();
        let mut resync = tokio::time::interval(self.resync_interval);
        resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while handle.is_running() {
            tokio::select! {
                _ = resync.tick() => {
                    let mut fresh = KernelLinks::default();
                    match socket.dump(&mut fresh).await {
                        Ok(()) => {
                            tracing::debug!(links = fresh.len(), "Kernel link table dumped");
                            kernel = fresh;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Kernel link dump failed");
                            continue;
                        }
                    }
                }
                batch = socket.recv_events() => match batch {
                    Ok(events) => {
                        for event in events {
                            kernel.apply(event);
                        }
                    }
                    Err(e) if e.is_overrun() => {
                        tracing::warn!("Netlink socket overrun, resyncing");
                        resync.reset_immediately();
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Netlink receive failed");
                        continue;
                    }
                },
            }
            self.report(&kernel);
        }
        tracing::info!("Interface watcher stopped");
    }

    #[cfg(not(target_os = "linux"))]
    pub async fn run(self, _handle: ConnectivityHandle) {
        tracing::warn!(interfaces = ?self.watched_interfaces(), "Interface watcher needs rtnetlink, not started");
    }

    /// Reports the kernel view of every watched interface to its tracker.
    pub fn report(&self, kernel: &KernelLinks) {
        for watched in &self.watched {
            Self::report_interface(watched, kernel.by_name(&watched.iface));
        }
    }

    fn report_interface(watched: &WatchedInterface, kernel: Option<&KernelLink>) {
        let driver = &watched.driver;
        driver.set_available(kernel.is_some());

        let info = driver.info();
        let Some(kernel) = kernel.filter(|link| link.up) else {
            if info.is_connected() {
                tracing::info!(net_type = %watched.network_type, iface = %watched.iface, "Link down");
                driver.disconnected(Some(REASON_LINK_DOWN));
            }
            return;
        };

        if kernel.addresses.is_empty() {
            if info.is_connected() {
                driver.disconnected(Some(REASON_NO_ADDRESS));
            }
            return;
        }
        let link = watched.link_properties(kernel);
        if info.is_connected() {
            driver.update_link_properties(link);
        } else {
            tracing::info!(net_type = %watched.network_type, iface = %watched.iface, "Link configured");
            driver.connected(link);
        }
    }
}
