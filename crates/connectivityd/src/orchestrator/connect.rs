//! Connect, disconnect, suspend and failure transitions.

use super::Orchestrator;
use crate::broadcast::{Broadcast, ChangeKind, ConnectivityChange};
use crate::error::{ConnectivityError, Result};
use crate::tracker::mobile::is_transient_suspend_reason;
use crate::transport::ResetMask;
use conn_types::{DetailedState, IpPrefix, LinkProperties, NetworkInfo, NetworkType, State};
use std::sync::Arc;
use std::time::Duration;

impl Orchestrator {
    #[tracing::instrument(skip(self, info), fields(net_type = %info.network_type(), state = %info.detailed_state()))]
    pub(super) async fn handle_state_changed(&mut self, info: NetworkInfo) -> Result<()> {
        let network_type = info.network_type();
        if !self.trackers.contains_key(&network_type) {
            tracing::warn!("Event for an unknown network type");
            return Ok(());
        }
        tracing::debug!(reason = ?info.reason(), "State changed");

        match info.detailed_state() {
            DetailedState::Failed => self.handle_connection_failure(info).await,
            DetailedState::CaptivePortalCheck => {
                self.handle_captive_portal_check(network_type);
                Ok(())
            }
            _ => match info.state() {
                State::Disconnected => self.handle_disconnect(info).await,
                State::Suspended => self.handle_suspend(info).await,
                State::Connected => self.handle_connect(info).await,
                State::Connecting | State::Disconnecting | State::Unknown => Ok(()),
            },
        }
    }

    pub(super) async fn handle_configuration_changed(&mut self, info: NetworkInfo) -> Result<()> {
        let network_type = info.network_type();
        match self.trackers.get(&network_type) {
            Some(tracker) if tracker.network_info().is_connected() => {
                tracing::debug!(net_type = %network_type, "Link configuration changed");
                self.handle_connectivity_change(network_type, false).await
            }
            _ => Ok(()),
        }
    }

    /// The preference only short-circuits priority when the active network
    /// is not the preferred one.
    pub(super) fn is_new_preferred(&self, new: NetworkType, active: NetworkType) -> bool {
        let preference = self.shared.published.read().network_preference;
        !((new != preference && self.priority(active) < self.priority(new)) || preference == active)
    }

    async fn handle_connect(&mut self, info: NetworkInfo) -> Result<()> {
        let network_type = info.network_type();

        if self.is_default(network_type) {
            if let Some(active) = self.active_default() {
                if active != network_type {
                    if self.is_new_preferred(network_type, active) {
                        tracing::info!(winner = %network_type, loser = %active, "Replacing active default network");
                        self.teardown(active);
                    } else {
                        tracing::info!(winner = %active, loser = %network_type, "Keeping active default network");
                        self.teardown(network_type);
                        return Ok(());
                    }
                }
            }
            self.set_active_default(Some(network_type));
            if let Some(key) = self.inet.pending.take() {
                self.timers.cancel(&key);
            }
            self.set_published_inet_condition(0);
            self.default_connection_sequence += 1;
            tracing::info!(
                net_type = %network_type,
                sequence = self.default_connection_sequence,
                "New default network"
            );
        }

        if let Some(tracker) = self.trackers.get_mut(&network_type) {
            tracker.set_teardown_requested(false);
        }
        self.setup_idle_timer(network_type).await;
        self.handle_connectivity_change(network_type, false).await?;

        let Some(info) = self.network_info(network_type) else {
            return Ok(());
        };
        self.send_connected_broadcast(&info, self.connectivity_change_delay());
        if let Some(tracker) = self.trackers.get_mut(&network_type) {
            tracker.set_failover(false);
        }
        Ok(())
    }

    fn handle_captive_portal_check(&mut self, network_type: NetworkType) {
        if self.is_default(network_type) {
            if let Some(active) = self.active_default() {
                if active != network_type && !self.is_new_preferred(network_type, active) {
                    tracing::info!(net_type = %network_type, active = %active, "Not preferred, skipping captive portal check");
                    self.teardown(network_type);
                    return;
                }
            }
        }
        if let Some(tracker) = self.trackers.get_mut(&network_type) {
            tracker.captive_portal_check_complete();
        }
    }

    async fn handle_suspend(&mut self, info: NetworkInfo) -> Result<()> {
        if is_transient_suspend_reason(info.reason()) {
            tracing::info!(net_type = %info.network_type(), reason = ?info.reason(), "Transient suspension, keeping routes");
            let change = ConnectivityChange::new(ChangeKind::Suspended, &info, self.published_inet_condition());
            self.send_broadcast_delayed(Broadcast::ConnectivityChanged(change), self.connectivity_change_delay());
            return Ok(());
        }
        self.handle_disconnect(info).await
    }

    async fn handle_disconnect(&mut self, info: NetworkInfo) -> Result<()> {
        let prev = info.network_type();
        let iface = self.trackers.get(&prev).and_then(|t| t.interface_name());
        if let Some(tracker) = self.trackers.get_mut(&prev) {
            tracker.set_teardown_requested(false);
        }
        self.remove_idle_timer(prev).await;

        // Processes bound to this network's resolvers move back to the default ones
        if !self.is_default(prev) {
            for pid in self.features.pids(prev) {
                self.reassess_pid_dns(pid).await;
            }
        }

        let mut change = ConnectivityChange::new(ChangeKind::Disconnected, &info, 0);
        if self.is_default(prev) {
            self.fill_failover_extras(prev, &mut change);
        }
        change.inet_condition = self.published_inet_condition();

        // Keep sockets alive when another connected network shares the interface
        let do_reset = match iface.as_deref() {
            Some(iface) => !self.trackers.iter().any(|(t, tracker)| {
                *t != prev
                    && tracker.network_info().is_connected()
                    && tracker.interface_name().as_deref() == Some(iface)
            }),
            None => true,
        };
        self.handle_connectivity_change(prev, do_reset).await?;

        let delay = self.connectivity_change_delay();
        self.send_broadcast_delayed(Broadcast::ConnectivityChanged(change), delay);
        if let Some(info) = self.active_default().and_then(|a| self.network_info(a)) {
            self.send_connected_broadcast(&info, delay);
        }
        Ok(())
    }

    async fn handle_connection_failure(&mut self, info: NetworkInfo) -> Result<()> {
        let network_type = info.network_type();
        let teardown_requested = self
            .trackers
            .get(&network_type)
            .is_some_and(|t| t.is_teardown_requested());
        if teardown_requested {
            tracing::info!(net_type = %network_type, "Failure after requested teardown, treating as disconnect");
            return self.handle_disconnect(info).await;
        }

        tracing::warn!(net_type = %network_type, reason = ?info.reason(), "Connection attempt failed");
        if let Some(tracker) = self.trackers.get_mut(&network_type) {
            tracker.set_teardown_requested(false);
        }

        let mut change = ConnectivityChange::new(ChangeKind::ConnectionFailed, &info, 0);
        if self.is_default(network_type) {
            self.fill_failover_extras(network_type, &mut change);
        } else if self.active_default().is_none() {
            change.no_connectivity = true;
        }
        change.inet_condition = self.published_inet_condition();

        if self.current_link_properties.contains_key(&network_type) {
            self.handle_connectivity_change(network_type, true).await?;
        }

        self.shared
            .broadcasts
            .send(Broadcast::ConnectivityChanged(change));
        if let Some(info) = self.active_default().and_then(|a| self.network_info(a)) {
            self.send_connected_broadcast(&info, Duration::ZERO);
        }
        Ok(())
    }

    /// Runs failover for a lost default network and records where traffic goes next.
    fn fill_failover_extras(&mut self, prev: NetworkType, change: &mut ConnectivityChange) {
        change.other_network_info = match self.try_failover(prev) {
            Some(target) => Some(target),
            None => self.active_default().and_then(|a| self.network_info(a)),
        };
        change.no_connectivity = change.other_network_info.is_none();
        if self.active_default().is_none() {
            self.set_published_inet_condition(0);
            self.apply_default_proxy(None);
        }
    }

    /// Kicks the first eligible candidate in priority-list order.
    ///
    /// Returns its info when a reconnect was started. Nothing is attempted
    /// while another default network is still active.
    fn try_failover(&mut self, prev: NetworkType) -> Option<NetworkInfo> {
        if self.active_default() == Some(prev) {
            self.set_active_default(None);
        }
        if let Some(active) = self.active_default() {
            tracing::debug!(prev = %prev, active = %active, "Default network still active, no failover");
            return None;
        }

        let mobile_data_enabled = self.shared.published.read().mobile_data_enabled;
        let candidates: Vec<NetworkType> = self.priority_list.clone();
        for candidate in candidates {
            if candidate == prev || !self.is_default(candidate) {
                continue;
            }
            if candidate.is_mobile() && !mobile_data_enabled {
                continue;
            }
            let Some(tracker) = self.trackers.get_mut(&candidate) else {
                continue;
            };
            if !tracker.is_available() {
                tracing::debug!(candidate = %candidate, "Failover candidate unavailable");
                continue;
            }
            let info = tracker.network_info();
            if info.is_connected_or_connecting() && !tracker.is_teardown_requested() {
                continue;
            }

            tracker.set_failover(true);
            if tracker.reconnect() {
                tracing::info!(prev = %prev, candidate = %candidate, "Failing over");
                return Some(tracker.network_info());
            }
            tracker.set_failover(false);
            tracing::debug!(candidate = %candidate, "Failover candidate refused reconnect");
        }
        tracing::info!(prev = %prev, "No failover candidate");
        None
    }

    pub(super) fn send_connected_broadcast(&mut self, info: &NetworkInfo, delay: Duration) {
        let change = ConnectivityChange::new(ChangeKind::Connected, info, self.published_inet_condition());
        self.send_broadcast_delayed(Broadcast::ConnectivityChanged(change), delay);
    }

    /// Pushes the current link properties of `network_type` to the system.
    ///
    /// With `do_reset`, sockets of every family on the interface are reset;
    /// otherwise only families that lost an address are.
    pub(super) async fn handle_connectivity_change(&mut self, network_type: NetworkType, do_reset: bool) -> Result<()> {
        let Some(tracker) = self.trackers.get(&network_type) else {
            return Ok(());
        };
        let tracker_link = tracker.link_properties();
        let connected = tracker.network_info().is_connected();

        self.handle_dns_configuration_change(network_type).await;

        let is_default = self.is_default(network_type);
        let cur = self.current_link_properties.get(&network_type).cloned();
        let mut reset_mask = if do_reset { ResetMask::ALL } else { ResetMask::NONE };

        let new = if connected {
            validate_addresses(network_type, &tracker_link)?;
            if !do_reset {
                if let Some(cur) = &cur {
                    if cur.is_identical_interface_name(&tracker_link) {
                        for removed in cur.compare_addresses(Some(&tracker_link)).removed {
                            reset_mask.include(&removed.address);
                        }
                    } else {
                        reset_mask = ResetMask::ALL;
                    }
                }
            }
            if is_default {
                self.apply_default_proxy(tracker_link.http_proxy.clone());
            }
            Some(tracker_link.clone())
        } else {
            None
        };

        // Host routes requested on the old link went away with it
        let link_gone = match (&cur, &new) {
            (Some(cur), Some(new)) => !cur.is_identical_interface_name(new),
            (Some(_), None) => true,
            (None, _) => false,
        };
        if link_gone {
            self.release_host_routes(network_type).await;
        }

        match &new {
            Some(lp) => {
                self.current_link_properties.insert(network_type, lp.clone());
            }
            None => {
                self.current_link_properties.remove(&network_type);
            }
        }

        let outcome = self
            .reconciler
            .update_routes(new.as_ref(), cur.as_ref(), is_default)
            .await;

        let transport = Arc::clone(self.reconciler.transport());
        if !reset_mask.is_empty() {
            // Sockets are bound to the link as it was applied
            let (reset_iface, addresses) = match &cur {
                Some(cur) => (cur.interface_name(), cur.addresses.as_slice()),
                None => (tracker_link.interface_name(), tracker_link.addresses.as_slice()),
            };
            if let Some(reset_iface) = reset_iface {
                tracing::info!(iface = %reset_iface, mask = %reset_mask, "Resetting connections");
                if let Err(e) = transport.reset_connections(reset_iface, reset_mask, addresses).await {
                    tracing::warn!(iface = %reset_iface, error = %e, "Failed to reset connections");
                }
            }
        }
        if outcome.routes_changed || outcome.dns_changed {
            let iface = tracker_link
                .interface_name()
                .or_else(|| cur.as_ref().and_then(|c| c.interface_name()));
            if let Some(iface) = iface {
                if let Err(e) = transport.flush_interface_dns_cache(iface).await {
                    tracing::warn!(iface = %iface, error = %e, "Failed to flush resolver cache");
                }
            }
        }
        Ok(())
    }

    async fn setup_idle_timer(&mut self, network_type: NetworkType) {
        let timeout = self
            .config
            .network(network_type)
            .map_or(0, |n| n.idle_timeout_secs);
        if timeout == 0 {
            return;
        }
        let Some(iface) = self.trackers.get(&network_type).and_then(|t| t.interface_name()) else {
            return;
        };
        let transport = Arc::clone(self.reconciler.transport());
        if let Err(e) = transport.add_idle_timer(&iface, timeout, network_type.name()).await {
            tracing::warn!(iface = %iface, error = %e, "Failed to add idle timer");
        }
    }

    async fn remove_idle_timer(&mut self, network_type: NetworkType) {
        let timeout = self
            .config
            .network(network_type)
            .map_or(0, |n| n.idle_timeout_secs);
        if timeout == 0 {
            return;
        }
        let Some(iface) = self.trackers.get(&network_type).and_then(|t| t.interface_name()) else {
            return;
        };
        let transport = Arc::clone(self.reconciler.transport());
        if let Err(e) = transport.remove_idle_timer(&iface, timeout, network_type.name()).await {
            tracing::warn!(iface = %iface, error = %e, "Failed to remove idle timer");
        }
    }
}

/// Every address of a connected link must be a usable, well-formed prefix.
fn validate_addresses(network_type: NetworkType, lp: &LinkProperties) -> Result<()> {
    for addr in &lp.addresses {
        if addr.address.is_unspecified() || IpPrefix::new(addr.address, addr.prefix_len).is_err() {
            return Err(ConnectivityError::InvariantViolation(format!(
                "{} reported invalid link address {}",
                network_type, addr
            )));
        }
    }
    Ok(())
}
