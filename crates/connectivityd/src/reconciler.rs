//! Route and resolver-route reconciliation.
//!
//! Turns the delta between the previous and the new [`LinkProperties`] of
//! one network into route add/remove calls. Routes installed in the main
//! table are reference counted, since several networks may ask for the
//! same one; the kernel only hears about the first add and the last
//! remove. Transport failures are logged and the remaining steps still run.

use crate::transport::NetdTransport;
use conn_common::{RefChange, RefCountSet};
use conn_types::{CompareResult, LinkProperties, RouteInfo};
use std::net::IpAddr;
use std::sync::Arc;

/// Upper bound on gateway host-route resolution depth.
pub const MAX_HOSTROUTE_CYCLE_COUNT: u32 = 10;

/// Which routing table a route goes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTable {
    Default,
    Secondary,
}

/// What an update changed, for the caller to act on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub routes_changed: bool,
    pub dns_changed: bool,
}

pub struct RouteReconciler {
    transport: Arc<dyn NetdTransport>,
    added_routes: RefCountSet<RouteInfo>,
}

impl RouteReconciler {
    pub fn new(transport: Arc<dyn NetdTransport>) -> Self {
        Self {
            transport,
            added_routes: RefCountSet::new(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn NetdTransport> {
        &self.transport
    }

    /// Current references held on `route` in the main table.
    pub fn added_route_count(&self, route: &RouteInfo) -> u32 {
        self.added_routes.count(route)
    }

    /// Total references held in the main table.
    pub fn added_route_total(&self) -> u64 {
        self.added_routes.total()
    }

    /// Every tracked main-table route with its reference count.
    pub fn added_routes(&self) -> Vec<(RouteInfo, u32)> {
        let mut routes: Vec<(RouteInfo, u32)> = self
            .added_routes
            .iter()
            .map(|(r, n)| (r.clone(), n))
            .collect();
        routes.sort();
        routes
    }

    /// Applies the difference between `cur` and `new` for one network.
    ///
    /// `is_link_default` says whether the network is default-eligible;
    /// default-shaped routes of other networks only go to the secondary
    /// table.
    pub async fn update_routes(
        &mut self,
        new: Option<&LinkProperties>,
        cur: Option<&LinkProperties>,
        is_link_default: bool,
    ) -> ReconcileOutcome {
        let (route_diff, dns_diff) = match (cur, new) {
            (Some(cur), new) => (cur.compare_routes(new), cur.compare_dnses(new)),
            (None, Some(new)) => (
                CompareResult {
                    removed: Vec::new(),
                    added: new.routes.clone(),
                },
                CompareResult {
                    removed: Vec::new(),
                    added: new.dns_servers.clone(),
                },
            ),
            (None, None) => return ReconcileOutcome::default(),
        };
        let routes_changed = !route_diff.is_empty();

        if let Some(cur) = cur {
            for r in &route_diff.removed {
                if is_link_default || !r.is_default_route() {
                    self.modify_route(cur, r, false, RouteTable::Default).await;
                }
                if !is_link_default {
                    self.modify_route(cur, r, false, RouteTable::Secondary).await;
                }
            }
        }

        if let Some(new) = new {
            for r in &route_diff.added {
                if is_link_default || !r.is_default_route() {
                    self.modify_route(new, r, true, RouteTable::Default).await;
                    continue;
                }
                self.modify_route(new, r, true, RouteTable::Secondary).await;
                // Drivers tend to install a default route of their own;
                // keep it only if we hold a reference to it.
                if let Some(iface) = new.interface_name() {
                    if !self.added_routes.contains(&stamp(r, iface)) {
                        if let Err(e) = self.transport.remove_route(iface, r).await {
                            tracing::warn!(iface, route = %r, error = %e, "Failed to strip implicit default route");
                        }
                    }
                }
            }
        }

        if !is_link_default {
            if routes_changed {
                if let Some(cur) = cur {
                    for dns in &cur.dns_servers {
                        self.modify_route_to_address(cur, *dns, false).await;
                    }
                }
                if let Some(new) = new {
                    for dns in &new.dns_servers {
                        self.modify_route_to_address(new, *dns, true).await;
                    }
                }
            } else {
                if let Some(cur) = cur {
                    for dns in &dns_diff.removed {
                        self.modify_route_to_address(cur, *dns, false).await;
                    }
                }
                if let Some(new) = new {
                    for dns in &dns_diff.added {
                        self.modify_route_to_address(new, *dns, true).await;
                    }
                }
            }
        }

        ReconcileOutcome {
            routes_changed,
            dns_changed: !dns_diff.is_empty(),
        }
    }

    /// Installs a host route to `address` through the best route of `lp`.
    ///
    /// Returns the route taken, for [`Self::release_route`].
    pub async fn add_route_to_address(&mut self, lp: &LinkProperties, address: IpAddr) -> Option<RouteInfo> {
        let iface = lp.interface_name()?;
        let route = stamp(&host_route_to(lp, address), iface);
        self.modify_route(lp, &route, true, RouteTable::Default)
            .await
            .then_some(route)
    }

    /// Drops one reference on a route from [`Self::add_route_to_address`].
    pub async fn release_route(&mut self, route: &RouteInfo) {
        let Some(iface) = route.interface.as_deref() else {
            tracing::warn!(route = %route, "Cannot release a route without interface");
            return;
        };
        self.apply(iface, route, false, RouteTable::Default).await;
    }

    async fn modify_route_to_address(&mut self, lp: &LinkProperties, address: IpAddr, add: bool) -> bool {
        let host_route = host_route_to(lp, address);
        self.modify_route(lp, &host_route, add, RouteTable::Default).await
    }

    /// Adds or removes `route`, preceded by the host route to its gateway.
    ///
    /// Returns false when nothing could be attempted.
    async fn modify_route(&mut self, lp: &LinkProperties, route: &RouteInfo, add: bool, table: RouteTable) -> bool {
        let Some(iface) = lp.interface_name() else {
            tracing::warn!(route = %route, "No interface for route, skipping");
            return false;
        };

        // Resolve the chain of gateway host routes, outermost last
        let mut chain = vec![stamp(route, iface)];
        let mut cycle_count = 0;
        loop {
            let Some(current) = chain.last() else { break };
            if current.is_host_route() {
                break;
            }
            let Some(gateway) = current.next_hop() else { break };
            let Some(best) = RouteInfo::select_best_route(&lp.routes, &gateway) else { break };
            let host_route = if best.gateway == current.gateway {
                RouteInfo::make_host_route(gateway, None)
            } else {
                RouteInfo::make_host_route(gateway, best.next_hop())
            };
            cycle_count += 1;
            if cycle_count > MAX_HOSTROUTE_CYCLE_COUNT {
                tracing::error!(iface, route = %route, "Error modifying route: too much recursion");
                return false;
            }
            chain.push(stamp(&host_route, iface));
        }

        for r in chain.iter().rev() {
            self.apply(iface, r, add, table).await;
        }
        true
    }

    async fn apply(&mut self, iface: &str, route: &RouteInfo, add: bool, table: RouteTable) {
        let result = match (table, add) {
            (RouteTable::Default, true) => match self.added_routes.add(route) {
                RefChange::First => self.transport.add_route(iface, route).await,
                change => {
                    tracing::debug!(iface, route = %route, ?change, "Route already installed");
                    Ok(())
                }
            },
            (RouteTable::Default, false) => match self.added_routes.remove(route) {
                RefChange::Shared(n) => {
                    tracing::debug!(iface, route = %route, refs = n, "Route still referenced");
                    Ok(())
                }
                _ => self.transport.remove_route(iface, route).await,
            },
            (RouteTable::Secondary, true) => self.transport.add_secondary_route(iface, route).await,
            (RouteTable::Secondary, false) => self.transport.remove_secondary_route(iface, route).await,
        };
        match result {
            Ok(()) => tracing::debug!(iface, route = %route, add, ?table, "Route updated"),
            Err(e) => tracing::warn!(iface, route = %route, add, ?table, error = %e, "Route update failed"),
        }
    }
}

fn host_route_to(lp: &LinkProperties, address: IpAddr) -> RouteInfo {
    match RouteInfo::select_best_route(&lp.routes, &address) {
        Some(best) if best.gateway != Some(address) => RouteInfo::make_host_route(address, best.next_hop()),
        _ => RouteInfo::make_host_route(address, None),
    }
}

fn stamp(route: &RouteInfo, iface: &str) -> RouteInfo {
    if route.interface.is_some() {
        route.clone()
    } else {
        route.clone().with_interface(iface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{RecordingTransport, TransportCall};
    use pretty_assertions::assert_eq;

    fn route(dest: &str, gw: Option<&str>) -> RouteInfo {
        RouteInfo::new(dest.parse().unwrap(), gw.map(|g| g.parse().unwrap()))
    }

    fn wifi_link() -> LinkProperties {
        let mut lp = LinkProperties::new("wlan0");
        lp.add_address("192.168.1.20/24".parse().unwrap());
        lp.add_route(route("192.168.1.0/24", None));
        lp.add_route(route("0.0.0.0/0", Some("192.168.1.1")));
        lp.add_dns("192.168.1.1".parse().unwrap());
        lp
    }

    fn reconciler() -> (RouteReconciler, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        (RouteReconciler::new(transport.clone()), transport)
    }

    #[tokio::test]
    async fn test_default_link_installs_routes_with_gateway_host_route() {
        let (mut rec, transport) = reconciler();
        let lp = wifi_link();
        let outcome = rec.update_routes(Some(&lp), None, true).await;
        assert!(outcome.routes_changed);
        assert!(outcome.dns_changed);

        let calls = transport.take_calls();
        assert_eq!(
            calls,
            vec![
                TransportCall::AddRoute("wlan0".into(), route("192.168.1.0/24", None).with_interface("wlan0")),
                TransportCall::AddRoute("wlan0".into(), route("192.168.1.1/32", None).with_interface("wlan0")),
                TransportCall::AddRoute(
                    "wlan0".into(),
                    route("0.0.0.0/0", Some("192.168.1.1")).with_interface("wlan0")
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_add_then_remove_restores_refcounts() {
        let (mut rec, _) = reconciler();
        let lp = wifi_link();
        let before = rec.added_route_total();

        rec.update_routes(Some(&lp), None, true).await;
        assert!(rec.added_route_total() > before);
        rec.update_routes(None, Some(&lp), true).await;

        assert_eq!(rec.added_route_total(), before);
        assert!(rec.added_routes().is_empty());
    }

    #[tokio::test]
    async fn test_shared_route_removed_on_last_reference() {
        let (mut rec, transport) = reconciler();
        let shared = route("10.0.0.0/8", None).with_interface("wlan0");
        let mut lp = LinkProperties::new("wlan0");
        lp.add_route(shared.clone());

        rec.update_routes(Some(&lp), None, true).await;
        rec.update_routes(Some(&lp), None, true).await;
        assert_eq!(rec.added_route_count(&shared), 2);
        transport.take_calls();

        rec.update_routes(None, Some(&lp), true).await;
        assert!(transport.take_calls().is_empty());
        rec.update_routes(None, Some(&lp), true).await;
        assert_eq!(
            transport.take_calls(),
            vec![TransportCall::RemoveRoute("wlan0".into(), shared)]
        );
    }

    #[tokio::test]
    async fn test_secondary_link_default_route_goes_to_secondary_table() {
        let (mut rec, transport) = reconciler();
        let mut lp = LinkProperties::new("wwan1");
        lp.add_route(route("0.0.0.0/0", None));
        lp.add_dns("10.10.10.10".parse().unwrap());

        rec.update_routes(Some(&lp), None, false).await;

        let default_route = route("0.0.0.0/0", None).with_interface("wwan1");
        assert_eq!(
            transport.take_calls(),
            vec![
                TransportCall::AddSecondaryRoute("wwan1".into(), default_route.clone()),
                TransportCall::RemoveRoute("wwan1".into(), default_route.clone()),
                TransportCall::AddRoute("wwan1".into(), route("10.10.10.10/32", None).with_interface("wwan1")),
            ]
        );
        assert_eq!(rec.added_route_count(&default_route), 0);
    }

    #[tokio::test]
    async fn test_secondary_dns_diff_without_route_change() {
        let (mut rec, transport) = reconciler();
        let mut old = LinkProperties::new("wwan1");
        old.add_dns("10.0.0.1".parse().unwrap());
        let mut new = LinkProperties::new("wwan1");
        new.add_dns("10.0.0.2".parse().unwrap());

        rec.update_routes(Some(&old), None, false).await;
        transport.take_calls();

        let outcome = rec.update_routes(Some(&new), Some(&old), false).await;
        assert_eq!(
            outcome,
            ReconcileOutcome {
                routes_changed: false,
                dns_changed: true
            }
        );
        assert_eq!(
            transport.take_calls(),
            vec![
                TransportCall::RemoveRoute("wwan1".into(), route("10.0.0.1/32", None).with_interface("wwan1")),
                TransportCall::AddRoute("wwan1".into(), route("10.0.0.2/32", None).with_interface("wwan1")),
            ]
        );
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_stop_reconciliation() {
        let (mut rec, transport) = reconciler();
        transport.fail_on("add_route");
        let lp = wifi_link();

        let outcome = rec.update_routes(Some(&lp), None, true).await;
        assert!(outcome.routes_changed);
        assert_eq!(transport.calls().len(), 3);
        // Tracking state follows intent, not the transport result
        assert_eq!(rec.added_routes().len(), 3);
    }

    #[tokio::test]
    async fn test_route_to_host_via_gateway() {
        let (mut rec, transport) = reconciler();
        let lp = wifi_link();
        let host = route("203.0.113.7/32", Some("192.168.1.1")).with_interface("wlan0");
        let taken = rec.add_route_to_address(&lp, "203.0.113.7".parse().unwrap()).await;
        assert_eq!(taken, Some(host.clone()));
        assert_eq!(
            transport.take_calls(),
            vec![TransportCall::AddRoute("wlan0".into(), host.clone())]
        );

        rec.release_route(&host).await;
        assert_eq!(
            transport.take_calls(),
            vec![TransportCall::RemoveRoute("wlan0".into(), host)]
        );
        assert!(rec.added_routes().is_empty());

        let no_iface = LinkProperties::default();
        assert_eq!(rec.add_route_to_address(&no_iface, "203.0.113.7".parse().unwrap()).await, None);
    }

    #[tokio::test]
    async fn test_referenced_default_route_kept_on_secondary_link() {
        let (mut rec, transport) = reconciler();
        let mut default_link = LinkProperties::new("wwan1");
        default_link.add_route(route("0.0.0.0/0", None));
        rec.update_routes(Some(&default_link), None, true).await;
        transport.take_calls();

        // Routes pushed without an interface still match the referenced one
        let mut secondary = LinkProperties::new("wwan1");
        secondary.routes.push(route("0.0.0.0/0", None));
        rec.update_routes(Some(&secondary), None, false).await;
        assert_eq!(
            transport.take_calls(),
            vec![TransportCall::AddSecondaryRoute(
                "wwan1".into(),
                route("0.0.0.0/0", None).with_interface("wwan1")
            )]
        );
    }

    #[tokio::test]
    async fn test_nothing_to_do_without_links() {
        let (mut rec, transport) = reconciler();
        assert_eq!(rec.update_routes(None, None, true).await, ReconcileOutcome::default());
        assert!(transport.calls().is_empty());
    }
}
