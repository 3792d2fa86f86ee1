//! State readable outside the orchestrator task.
//!
//! The orchestrator is the only writer. Public getters read through these
//! locks instead of posting to the queue.

use crate::broadcast::BroadcastHub;
use crate::policy::PolicyListener;
use crate::tracker::SharedTrackerState;
use conn_types::{DetailedState, NetworkConfig, NetworkInfo, NetworkType, ProxyInfo};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Default-network bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedState {
    pub active_default: Option<NetworkType>,
    pub network_preference: NetworkType,
    pub mobile_data_enabled: bool,
    /// Inet condition last announced for the active default.
    pub inet_condition: u8,
}

/// Global resolver bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsState {
    /// Servers currently programmed as the global resolvers.
    pub servers: Vec<IpAddr>,
    pub num_entries: usize,
    /// Bumped on every effective change.
    pub change_count: u64,
    /// Set while a VPN pins the resolvers.
    pub overridden: bool,
    pub default_dns: IpAddr,
    pub default_interface: Option<String>,
}

impl DnsState {
    pub fn new(default_dns: IpAddr) -> Self {
        Self {
            servers: Vec::new(),
            num_entries: 0,
            change_count: 0,
            overridden: false,
            default_dns,
            default_interface: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProxyState {
    /// Proxy of the default network's link.
    pub default_proxy: Option<ProxyInfo>,
    /// Administrator override; wins over the default proxy.
    pub global_proxy: Option<ProxyInfo>,
}

impl ProxyState {
    pub fn effective(&self) -> Option<ProxyInfo> {
        self.global_proxy.clone().or_else(|| self.default_proxy.clone())
    }
}

pub struct Shared {
    pub(crate) published: RwLock<PublishedState>,
    pub(crate) dns: RwLock<DnsState>,
    pub(crate) proxy: RwLock<ProxyState>,
    pub(crate) trackers: BTreeMap<NetworkType, SharedTrackerState>,
    pub(crate) configs: BTreeMap<NetworkType, NetworkConfig>,
    pub(crate) policy: Arc<PolicyListener>,
    pub(crate) broadcasts: Arc<BroadcastHub>,
}

impl Shared {
    pub fn published(&self) -> PublishedState {
        self.published.read().clone()
    }

    pub fn config(&self, network_type: NetworkType) -> Option<&NetworkConfig> {
        self.configs.get(&network_type)
    }

    pub fn is_protected(&self, network_type: NetworkType) -> bool {
        self.configs.get(&network_type).is_some_and(|c| c.protected)
    }

    pub fn policy(&self) -> &Arc<PolicyListener> {
        &self.policy
    }

    pub fn broadcasts(&self) -> &Arc<BroadcastHub> {
        &self.broadcasts
    }

    /// Info of `network_type` as `uid` may see it.
    pub fn filtered_info(&self, network_type: NetworkType, uid: u32) -> Option<NetworkInfo> {
        let tracker = self.trackers.get(&network_type)?;
        let (mut info, iface) = {
            let s = tracker.read();
            (s.info.clone(), s.link.interface_name().map(str::to_string))
        };
        if self.policy.is_blocked(uid, iface.as_deref()) {
            info.set_detailed_state(DetailedState::Blocked, None, None);
        }
        Some(info)
    }

    pub fn active_info(&self, uid: u32) -> Option<NetworkInfo> {
        let active = self.published.read().active_default?;
        self.filtered_info(active, uid)
    }

    pub fn all_info(&self, uid: u32) -> Vec<NetworkInfo> {
        self.trackers
            .keys()
            .filter_map(|t| self.filtered_info(*t, uid))
            .collect()
    }
}
