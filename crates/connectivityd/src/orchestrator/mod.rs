//! The connectivity orchestrator.
//!
//! One task owns every tracker, the route reconciler and the feature
//! registry, and drains a single inbox. Tracker events, API requests and
//! due timers are handled strictly one at a time, in arrival order, so no
//! two transitions ever interleave. Read-only queries go through the
//! locks in [`Shared`] instead.

mod connect;
mod dns;
mod feature;
mod inet;
mod message;
mod proxy;
mod state;
mod timers;

pub use message::{Message, TimerKey};
pub use state::{DnsState, ProxyState, PublishedState, Shared};
pub use timers::Timers;

use crate::broadcast::{Broadcast, BroadcastHub};
use crate::config::DaemonConfig;
use crate::error::Result;
use crate::feature::{FeatureRegistry, FeatureUser};
use crate::policy::{PolicyListener, PolicySnapshot};
use crate::reconciler::RouteReconciler;
use crate::tracker::{NetworkStateTracker, TrackerEvent};
use crate::transport::NetdTransport;
use chrono::{DateTime, Utc};
use conn_types::{LinkProperties, NetworkInfo, NetworkType, RouteInfo};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Debounced quality signal of the active default network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct InetCondition {
    /// Last reported value, not yet necessarily published.
    current: u8,
    /// Pending hold, if any.
    pending: Option<TimerKey>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkDump {
    pub info: NetworkInfo,
    pub priority: u32,
    pub is_default: bool,
    pub teardown_requested: bool,
    /// Link properties as last applied to the system.
    pub applied_link: Option<LinkProperties>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InetConditionDump {
    pub current: u8,
    pub published: u8,
    pub in_flight: bool,
    pub default_connection_sequence: u64,
}

/// Point-in-time view of the orchestrator, for `--dump` and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorDump {
    pub taken_at: DateTime<Utc>,
    pub active_default: Option<NetworkType>,
    pub network_preference: NetworkType,
    pub mobile_data_enabled: bool,
    pub priority_list: Vec<NetworkType>,
    pub networks: Vec<NetworkDump>,
    pub feature_users: Vec<FeatureUser>,
    pub requester_pids: Vec<(NetworkType, Vec<u32>)>,
    pub inet_condition: InetConditionDump,
    pub added_routes: Vec<(RouteInfo, u32)>,
    pub dns: DnsState,
    pub proxy: ProxyState,
    pub policy: PolicySnapshot,
    pub pending_timers: usize,
}

pub struct Orchestrator {
    config: Arc<DaemonConfig>,
    shared: Arc<Shared>,
    trackers: BTreeMap<NetworkType, Box<dyn NetworkStateTracker>>,
    /// Most preferred first; fixed after startup.
    priority_list: Vec<NetworkType>,
    /// Link properties last pushed to the system, per type.
    current_link_properties: HashMap<NetworkType, LinkProperties>,
    reconciler: RouteReconciler,
    /// Host routes requested per network, one entry per reference held.
    host_routes: HashMap<NetworkType, Vec<RouteInfo>>,
    features: FeatureRegistry,
    timers: Timers,
    delayed_broadcasts: HashMap<u64, Broadcast>,
    next_broadcast_seq: u64,
    inet: InetCondition,
    default_connection_sequence: u64,
}

impl Orchestrator {
    pub fn new(
        config: Arc<DaemonConfig>,
        trackers: Vec<Box<dyn NetworkStateTracker>>,
        transport: Arc<dyn NetdTransport>,
        policy: Arc<PolicyListener>,
        broadcasts: Arc<BroadcastHub>,
    ) -> Self {
        let mut by_type: BTreeMap<NetworkType, Box<dyn NetworkStateTracker>> = BTreeMap::new();
        for tracker in trackers {
            let network_type = tracker.network_type();
            if by_type.contains_key(&network_type) {
                tracing::error!(net_type = %network_type, "Second tracker for network type ignored");
                continue;
            }
            by_type.insert(network_type, tracker);
        }

        let configs = config
            .network_configs()
            .into_iter()
            .map(|c| (c.network_type, c))
            .collect();
        let network_preference = config
            .effective_preference()
            .unwrap_or(config.daemon.network_preference);
        let mobile_data_enabled = config.daemon.mobile_data_enabled;

        let shared = Arc::new(Shared {
            published: RwLock::new(PublishedState {
                active_default: None,
                network_preference,
                mobile_data_enabled,
                inet_condition: 0,
            }),
            dns: RwLock::new(state::DnsState::new(config.daemon.default_dns)),
            proxy: RwLock::new(ProxyState::default()),
            trackers: by_type
                .iter()
                .map(|(t, tracker)| (*t, tracker.core().shared_state()))
                .collect(),
            configs,
            policy,
            broadcasts,
        });

        let mut orch = Self {
            priority_list: config.priority_list(),
            config,
            shared,
            trackers: by_type,
            current_link_properties: HashMap::new(),
            reconciler: RouteReconciler::new(transport),
            host_routes: HashMap::new(),
            features: FeatureRegistry::new(),
            timers: Timers::new(),
            delayed_broadcasts: HashMap::new(),
            next_broadcast_seq: 0,
            inet: InetCondition::default(),
            default_connection_sequence: 0,
        };
        if !mobile_data_enabled {
            orch.handle_set_mobile_data(false);
        }
        tracing::info!(
            trackers = orch.trackers.len(),
            preference = %network_preference,
            priority_list = ?orch.priority_list,
            "Orchestrator created"
        );
        orch
    }

    pub fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    /// Drains `inbox` until shutdown or a fatal error.
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Message>) {
        tracing::info!("Orchestrator running");
        let warn_depth = self.config.daemon.event_queue_warn_depth;
        loop {
            let message = tokio::select! {
                message = inbox.recv() => match message {
                    Some(message) => message,
                    None => {
                        tracing::info!("Inbox closed");
                        break;
                    }
                },
                Some(key) = self.timers.next_expired(), if !self.timers.is_empty() => Message::TimerFired(key),
            };
            if matches!(message, Message::Shutdown) {
                tracing::info!("Shutdown requested");
                break;
            }
            let depth = inbox.len();
            if warn_depth > 0 && depth >= warn_depth {
                tracing::warn!(depth, "Orchestrator queue is backing up");
            }
            if let Err(e) = self.handle_message(message).await {
                tracing::error!(error = %e, "Fatal orchestrator error, stopping");
                break;
            }
        }
        tracing::info!("Orchestrator stopped");
    }

    pub async fn handle_message(&mut self, message: Message) -> Result<()> {
        match message {
            Message::Tracker(TrackerEvent::StateChanged(info)) => self.handle_state_changed(info).await?,
            Message::Tracker(TrackerEvent::ConfigurationChanged(info)) => {
                self.handle_configuration_changed(info).await?
            }
            Message::SetNetworkPreference(preference) => self.handle_set_network_preference(preference),
            Message::SetMobileData(enabled) => self.handle_set_mobile_data(enabled),
            Message::SetPolicyDataEnable { network_type, enabled } => {
                match self.trackers.get_mut(&network_type) {
                    Some(tracker) => tracker.set_policy_data_enable(enabled),
                    None => tracing::warn!(net_type = %network_type, "Policy data gate for unknown network"),
                }
            }
            Message::StartFeature { request, reply } => {
                let outcome = self.start_using_network_feature(request).await;
                let _ = reply.send(outcome);
            }
            Message::StopFeature {
                pid,
                uid,
                network_type,
                feature,
                reply,
            } => {
                let stopped = self.stop_using_network_feature(pid, uid, network_type, &feature).await;
                let _ = reply.send(stopped);
            }
            Message::ClientGone(client) => self.handle_client_gone(client).await,
            Message::RequestRouteToHost {
                network_type,
                address,
                reply,
            } => {
                let added = self.request_route_to_host(network_type, address).await;
                let _ = reply.send(added);
            }
            Message::ReportInetCondition {
                network_type,
                percentage,
            } => self.handle_inet_condition_change(network_type, percentage),
            Message::SetGlobalProxy(proxy) => self.handle_set_global_proxy(proxy),
            Message::SetDnsOverride(servers) => self.handle_dns_override(servers).await,
            Message::RestrictBackgroundChanged(restrict) => self.handle_restrict_background_changed(restrict),
            Message::SystemReady => self.shared.broadcasts.system_ready(),
            Message::Dump(reply) => {
                let _ = reply.send(self.dump());
            }
            Message::TimerFired(key) => self.handle_timer(key).await,
            Message::Shutdown => {}
        }
        Ok(())
    }

    async fn handle_timer(&mut self, key: TimerKey) {
        match key {
            TimerKey::RestoreDefault(id) => {
                if self.features.contains(id) {
                    tracing::info!(user = id, "Feature request expired");
                    self.stop_feature_user(id, false).await;
                }
            }
            TimerKey::DelayedBroadcast(seq) => match self.delayed_broadcasts.remove(&seq) {
                Some(broadcast) => self.shared.broadcasts.send(broadcast),
                None => tracing::debug!(seq, "Delayed broadcast already gone"),
            },
            TimerKey::InetConditionHoldEnd {
                network_type,
                sequence,
            } => self.handle_inet_condition_hold_end(network_type, sequence),
        }
    }

    fn handle_set_network_preference(&mut self, preference: NetworkType) {
        if !self.is_default(preference) {
            tracing::warn!(net_type = %preference, "Ignoring preference for a non-default network");
            return;
        }
        {
            let mut published = self.shared.published.write();
            if published.network_preference == preference {
                return;
            }
            published.network_preference = preference;
        }
        tracing::info!(net_type = %preference, "Network preference changed");
        self.enforce_preference();
    }

    /// Tears down other connected default networks while the preferred one
    /// is available but not connected.
    fn enforce_preference(&mut self) {
        let preference = self.shared.published.read().network_preference;
        let Some(preferred) = self.trackers.get(&preference) else {
            return;
        };
        if preferred.network_info().is_connected() || !preferred.is_available() {
            return;
        }
        let others: Vec<NetworkType> = self
            .trackers
            .iter()
            .filter(|(t, tracker)| {
                **t != preference && self.is_default(**t) && tracker.network_info().is_connected()
            })
            .map(|(t, _)| *t)
            .collect();
        for t in others {
            tracing::info!(net_type = %t, preferred = %preference, "Tearing down for preferred network");
            self.teardown(t);
        }
    }

    fn handle_set_mobile_data(&mut self, enabled: bool) {
        self.shared.published.write().mobile_data_enabled = enabled;
        for t in [NetworkType::Mobile, NetworkType::Wimax] {
            if let Some(tracker) = self.trackers.get_mut(&t) {
                tracker.set_user_data_enable(enabled);
            }
        }
    }

    /// Re-announces the active network after a global background policy change.
    fn handle_restrict_background_changed(&mut self, restrict: bool) {
        tracing::info!(restrict, "Background data restriction changed");
        let Some(active) = self.active_default() else {
            return;
        };
        let Some(info) = self.network_info(active) else {
            return;
        };
        if info.is_connected() {
            self.send_connected_broadcast(&info, Duration::ZERO);
        }
    }

    pub fn dump(&self) -> OrchestratorDump {
        let published = self.shared.published();
        let networks = self
            .priority_list
            .iter()
            .filter_map(|t| {
                let tracker = self.trackers.get(t)?;
                Some(NetworkDump {
                    info: tracker.network_info(),
                    priority: self.priority(*t),
                    is_default: self.is_default(*t),
                    teardown_requested: tracker.is_teardown_requested(),
                    applied_link: self.current_link_properties.get(t).cloned(),
                })
            })
            .collect();
        OrchestratorDump {
            taken_at: Utc::now(),
            active_default: published.active_default,
            network_preference: published.network_preference,
            mobile_data_enabled: published.mobile_data_enabled,
            priority_list: self.priority_list.clone(),
            networks,
            feature_users: self.features.users().to_vec(),
            requester_pids: self.features.requester_pids(),
            inet_condition: InetConditionDump {
                current: self.inet.current,
                published: published.inet_condition,
                in_flight: self.inet.pending.is_some(),
                default_connection_sequence: self.default_connection_sequence,
            },
            added_routes: self.reconciler.added_routes(),
            dns: self.shared.dns.read().clone(),
            proxy: self.shared.proxy.read().clone(),
            policy: self.shared.policy.snapshot(),
            pending_timers: self.timers.len(),
        }
    }

    fn is_default(&self, network_type: NetworkType) -> bool {
        self.shared
            .configs
            .get(&network_type)
            .is_some_and(|c| c.is_default())
    }

    fn priority(&self, network_type: NetworkType) -> u32 {
        self.shared
            .configs
            .get(&network_type)
            .map_or(u32::MAX, |c| c.priority)
    }

    fn active_default(&self) -> Option<NetworkType> {
        self.shared.published.read().active_default
    }

    fn set_active_default(&self, active: Option<NetworkType>) {
        self.shared.published.write().active_default = active;
    }

    fn published_inet_condition(&self) -> u8 {
        self.shared.published.read().inet_condition
    }

    fn set_published_inet_condition(&self, value: u8) {
        self.shared.published.write().inet_condition = value;
    }

    fn network_info(&self, network_type: NetworkType) -> Option<NetworkInfo> {
        self.trackers.get(&network_type).map(|t| t.network_info())
    }

    /// Asks `network_type` to disconnect and remembers that we asked.
    fn teardown(&mut self, network_type: NetworkType) -> bool {
        let Some(tracker) = self.trackers.get_mut(&network_type) else {
            return false;
        };
        if tracker.teardown() {
            tracker.set_teardown_requested(true);
            true
        } else {
            false
        }
    }

    fn connectivity_change_delay(&self) -> Duration {
        self.config.connectivity_change_delay()
    }

    /// Sends `broadcast` after `delay`, or right away for a zero delay.
    fn send_broadcast_delayed(&mut self, broadcast: Broadcast, delay: Duration) {
        if delay.is_zero() {
            self.shared.broadcasts.send(broadcast);
            return;
        }
        self.next_broadcast_seq += 1;
        let seq = self.next_broadcast_seq;
        self.delayed_broadcasts.insert(seq, broadcast);
        self.timers.schedule(TimerKey::DelayedBroadcast(seq), delay);
    }
}
