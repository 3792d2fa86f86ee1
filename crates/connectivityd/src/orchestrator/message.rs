//! The orchestrator inbox.

use super::OrchestratorDump;
use crate::feature::{ClientHandle, FeatureOutcome, FeatureRequest};
use crate::tracker::TrackerEvent;
use conn_types::{NetworkType, ProxyInfo};
use std::net::IpAddr;
use tokio::sync::oneshot;

/// Everything the orchestrator reacts to, in arrival order.
#[derive(Debug)]
pub enum Message {
    /// A tracker reported a transition.
    Tracker(TrackerEvent),
    SetNetworkPreference(NetworkType),
    SetMobileData(bool),
    SetPolicyDataEnable {
        network_type: NetworkType,
        enabled: bool,
    },
    StartFeature {
        request: FeatureRequest,
        reply: oneshot::Sender<FeatureOutcome>,
    },
    StopFeature {
        pid: u32,
        uid: u32,
        network_type: NetworkType,
        feature: String,
        reply: oneshot::Sender<bool>,
    },
    /// A client session ended, explicitly or by dying.
    ClientGone(ClientHandle),
    RequestRouteToHost {
        network_type: NetworkType,
        address: IpAddr,
        reply: oneshot::Sender<bool>,
    },
    ReportInetCondition {
        network_type: NetworkType,
        percentage: u8,
    },
    SetGlobalProxy(Option<ProxyInfo>),
    /// Pin (Some) or release (None) the global resolver configuration.
    SetDnsOverride(Option<Vec<IpAddr>>),
    RestrictBackgroundChanged(bool),
    SystemReady,
    Dump(oneshot::Sender<OrchestratorDump>),
    /// A delayed action came due.
    TimerFired(TimerKey),
    Shutdown,
}

/// Identity of a delayed action. Scheduling a key that is already pending
/// replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Auto-expiry of one feature user.
    RestoreDefault(u64),
    /// A debounced broadcast, by sequence number.
    DelayedBroadcast(u64),
    /// End of an inet condition hold for one default connection.
    InetConditionHoldEnd {
        network_type: NetworkType,
        sequence: u64,
    },
}
