//! Resolver programming.
//!
//! The default network owns the global resolvers. Secondary networks get
//! their servers programmed on their own interface, and only the processes
//! that requested them are bound to it.

use super::Orchestrator;
use crate::transport::NetdTransport;
use conn_types::NetworkType;
use std::net::IpAddr;
use std::sync::Arc;

impl Orchestrator {
    pub(super) async fn handle_dns_configuration_change(&mut self, network_type: NetworkType) {
        let Some(tracker) = self.trackers.get(&network_type) else {
            return;
        };
        if !tracker.network_info().is_connected() || tracker.is_teardown_requested() {
            return;
        }
        let lp = tracker.link_properties();
        let Some(iface) = lp.interface_name() else {
            return;
        };
        let transport = Arc::clone(self.reconciler.transport());

        if self.is_default(network_type) {
            if self.shared.dns.read().overridden {
                tracing::debug!(net_type = %network_type, "Resolvers pinned, not applying link DNS");
                return;
            }
            self.update_default_dns(transport.as_ref(), iface, &lp.dns_servers)
                .await;
            return;
        }

        if let Err(e) = transport
            .set_dns_servers_for_interface(iface, &lp.dns_servers)
            .await
        {
            tracing::warn!(iface, error = %e, "Failed to set interface resolvers");
        }
        for pid in self.features.pids(network_type) {
            if let Err(e) = transport.set_dns_interface_for_pid(iface, pid).await {
                tracing::warn!(iface, pid, error = %e, "Failed to bind process resolvers");
            }
        }
    }

    /// Makes `servers` (or the fallback resolver) the global resolvers.
    async fn update_default_dns(&mut self, transport: &dyn NetdTransport, iface: &str, servers: &[IpAddr]) {
        let servers = if servers.is_empty() {
            let fallback = self.shared.dns.read().default_dns;
            tracing::debug!(iface, fallback = %fallback, "No resolvers on default network, using fallback");
            vec![fallback]
        } else {
            servers.to_vec()
        };
        let changed = {
            let dns = self.shared.dns.read();
            dns.servers != servers || dns.default_interface.as_deref() != Some(iface)
        };
        if !changed {
            return;
        }

        self.program_global_dns(transport, iface, &servers).await;
    }

    async fn program_global_dns(&mut self, transport: &dyn NetdTransport, iface: &str, servers: &[IpAddr]) {
        if let Err(e) = transport.set_dns_servers_for_interface(iface, servers).await {
            tracing::warn!(iface, error = %e, "Failed to set global resolvers");
        }
        if let Err(e) = transport.set_default_interface_for_dns(iface).await {
            tracing::warn!(iface, error = %e, "Failed to set default resolver interface");
        }

        let mut dns = self.shared.dns.write();
        dns.servers = servers.to_vec();
        dns.num_entries = servers.len();
        dns.default_interface = Some(iface.to_string());
        dns.change_count += 1;
        tracing::info!(iface, servers = ?dns.servers, change_count = dns.change_count, "Global resolvers updated");
    }

    /// Binds `pid` to the first connected secondary network it requested,
    /// or back to the global resolvers.
    pub(super) async fn reassess_pid_dns(&mut self, pid: u32) {
        let transport = Arc::clone(self.reconciler.transport());
        for network_type in &self.priority_list {
            if self.is_default(*network_type) || !self.features.has_pid(*network_type, pid) {
                continue;
            }
            let Some(tracker) = self.trackers.get(network_type) else {
                continue;
            };
            if !tracker.network_info().is_connected() || tracker.is_teardown_requested() {
                continue;
            }
            let Some(iface) = tracker.link_properties().interface_name().map(str::to_string) else {
                continue;
            };
            if let Err(e) = transport.set_dns_interface_for_pid(&iface, pid).await {
                tracing::warn!(iface = %iface, pid, error = %e, "Failed to bind process resolvers");
            }
            return;
        }
        if let Err(e) = transport.clear_dns_interface_for_pid(pid).await {
            tracing::warn!(pid, error = %e, "Failed to clear process resolvers");
        }
    }

    /// Pins (Some) or releases (None) the global resolvers.
    pub(super) async fn handle_dns_override(&mut self, servers: Option<Vec<IpAddr>>) {
        let active = self.active_default();
        match servers {
            Some(servers) => {
                tracing::info!(servers = ?servers, "Pinning global resolvers");
                self.shared.dns.write().overridden = true;
                let iface = active
                    .and_then(|a| self.trackers.get(&a))
                    .and_then(|t| t.interface_name());
                let Some(iface) = iface else {
                    tracing::warn!("No default network to pin resolvers on");
                    return;
                };
                let transport = Arc::clone(self.reconciler.transport());
                self.program_global_dns(transport.as_ref(), &iface, &servers)
                    .await;
            }
            None => {
                let was_overridden = std::mem::take(&mut self.shared.dns.write().overridden);
                if !was_overridden {
                    return;
                }
                tracing::info!("Releasing pinned resolvers");
                if let Some(active) = active {
                    self.handle_dns_configuration_change(active).await;
                }
            }
        }
    }
}
