//! Feature start/stop and host routes for specialized networks.

use super::{Orchestrator, TimerKey};
use crate::feature::{convert_feature_to_network_type, ClientHandle, FeatureOutcome, FeatureRequest, FEATURE_ENABLE_DUN_ALWAYS};
use crate::policy::RULE_REJECT_METERED;
use conn_types::{DetailedState, NetworkType};
use std::net::IpAddr;
use std::time::Duration;

impl Orchestrator {
    #[tracing::instrument(skip(self), fields(net_type = %request.network_type, feature = %request.feature, pid = request.pid))]
    pub(super) async fn start_using_network_feature(&mut self, request: FeatureRequest) -> FeatureOutcome {
        if !self.shared.configs.contains_key(&request.network_type) {
            tracing::warn!("Feature request for an unconfigured network type");
            return FeatureOutcome::RequestFailed;
        }
        let used = convert_feature_to_network_type(request.network_type, &request.feature);

        let metered = self
            .trackers
            .get(&used)
            .and_then(|t| t.interface_name())
            .is_some_and(|iface| self.shared.policy.is_metered(&iface));
        if metered && (self.shared.policy.uid_rules(request.uid) & RULE_REJECT_METERED) != 0 {
            tracing::info!(used = %used, uid = request.uid, "Metered network rejected for uid");
            return FeatureOutcome::RequestFailed;
        }

        let Some(tracker) = self.trackers.get(&used) else {
            return FeatureOutcome::TypeNotAvailable;
        };
        if used == request.network_type {
            tracing::warn!("Feature does not select a specialized network");
            return FeatureOutcome::RequestFailed;
        }
        if !tracker.is_available() && request.feature != FEATURE_ENABLE_DUN_ALWAYS {
            return FeatureOutcome::TypeNotAvailable;
        }

        let restore_ms = self.config.restore_time_ms(used);
        let user = self.features.make_user(&request);
        let id = user.id;
        let added = self.features.insert(user, restore_ms < 0);
        self.features.add_pid(used, request.pid);
        if added {
            if let Ok(ms) = u64::try_from(restore_ms) {
                self.timers
                    .schedule(TimerKey::RestoreDefault(id), Duration::from_millis(ms));
            }
        }

        let Some(tracker) = self.trackers.get_mut(&used) else {
            return FeatureOutcome::TypeNotAvailable;
        };
        let info = tracker.network_info();
        if info.is_connected_or_connecting() && !tracker.is_teardown_requested() {
            if info.is_connected() {
                // Binds the new pid to this network's resolvers
                self.handle_dns_configuration_change(used).await;
                return FeatureOutcome::AlreadyActive;
            }
            return FeatureOutcome::RequestStarted;
        }
        if !tracker.reconnect() {
            tracing::debug!(used = %used, "Reconnect could not be started");
        }
        FeatureOutcome::RequestStarted
    }

    /// Stops the caller's request. Returns false when nothing was live.
    pub(super) async fn stop_using_network_feature(
        &mut self,
        pid: u32,
        uid: u32,
        network_type: NetworkType,
        feature: &str,
    ) -> bool {
        match self.features.find(pid, uid, network_type, feature) {
            Some(id) => self.stop_feature_user(id, true).await,
            None => {
                tracing::debug!(pid, uid, net_type = %network_type, feature, "No live feature request to stop");
                false
            }
        }
    }

    /// Drops one feature user and tears its network down once unreferenced.
    ///
    /// Without `ignore_dups`, a remaining identical request keeps everything
    /// as it is.
    pub(super) async fn stop_feature_user(&mut self, id: u64, ignore_dups: bool) -> bool {
        let Some(user) = self.features.remove(id) else {
            return false;
        };
        self.timers.cancel(&TimerKey::RestoreDefault(id));
        tracing::info!(user = %user, "Feature request stopped");

        if !ignore_dups && self.features.has_same_user(&user) {
            return true;
        }

        let used = convert_feature_to_network_type(user.network_type, &user.feature);
        self.features.remove_pid(used, user.pid);
        self.reassess_pid_dns(user.pid).await;
        if self.features.has_requesters(used) {
            tracing::debug!(used = %used, pids = ?self.features.pids(used), "Network still requested");
            return true;
        }
        tracing::info!(used = %used, "Last requester gone, tearing down");
        self.teardown(used);
        true
    }

    pub(super) async fn handle_client_gone(&mut self, client: ClientHandle) {
        let ids = self.features.users_of(client);
        if !ids.is_empty() {
            tracing::info!(client = %client, users = ids.len(), "Client gone, releasing its requests");
        }
        for id in ids {
            self.stop_feature_user(id, false).await;
        }
    }

    pub(super) async fn request_route_to_host(&mut self, network_type: NetworkType, address: IpAddr) -> bool {
        let Some(tracker) = self.trackers.get(&network_type) else {
            return false;
        };
        let state = tracker.network_info().detailed_state();
        if !matches!(state, DetailedState::Connected | DetailedState::CaptivePortalCheck)
            || tracker.is_teardown_requested()
        {
            tracing::debug!(net_type = %network_type, %state, "Route to host refused");
            return false;
        }
        let Some(lp) = self.current_link_properties.get(&network_type).cloned() else {
            tracing::debug!(net_type = %network_type, "Route to host refused: link not applied");
            return false;
        };
        match self.reconciler.add_route_to_address(&lp, address).await {
            Some(route) => {
                self.host_routes.entry(network_type).or_default().push(route);
                true
            }
            None => false,
        }
    }

    /// Drops every host route requested on `network_type`.
    pub(super) async fn release_host_routes(&mut self, network_type: NetworkType) {
        let Some(routes) = self.host_routes.remove(&network_type) else {
            return;
        };
        tracing::debug!(net_type = %network_type, routes = routes.len(), "Releasing host routes");
        for route in &routes {
            self.reconciler.release_route(route).await;
        }
    }
}
