//! Per-network-type state trackers.
//!
//! A tracker owns the live [`NetworkInfo`] and [`LinkProperties`] of one
//! network type. The orchestrator drives it through
//! [`NetworkStateTracker`]; the radio or link monitor reports transitions
//! through a cloneable [`TrackerDriver`]. Both sides share one
//! [`TrackerState`] behind a lock, and every reported transition is posted
//! to the orchestrator queue as a [`TrackerEvent`].

pub mod bluetooth;
pub mod dummy;
pub mod ethernet;
pub mod factory;
pub mod link_control;
pub mod mobile;
pub mod wifi;
#[cfg(feature = "wimax")]
pub mod wimax;

pub use factory::{FactoryRegistry, NetworkFactory, TrackerParams};
pub use link_control::{LinkControl, LinkOp, RecordingLinkControl, ShellLinkControl};

use crate::orchestrator::Message;
use conn_types::{DetailedState, LinkProperties, NetworkInfo, NetworkType};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A transition reported by a tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// The detailed state changed.
    StateChanged(NetworkInfo),
    /// Link properties changed while the state did not.
    ConfigurationChanged(NetworkInfo),
}

impl TrackerEvent {
    pub fn info(&self) -> &NetworkInfo {
        match self {
            TrackerEvent::StateChanged(info) | TrackerEvent::ConfigurationChanged(info) => info,
        }
    }
}

/// Where trackers deliver their events: the orchestrator inbox.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }

    /// Posts `event`; returns false once the orchestrator is gone.
    pub fn send(&self, event: TrackerEvent) -> bool {
        self.tx.send(Message::Tracker(event)).is_ok()
    }
}

/// State shared between a tracker and its driver.
#[derive(Debug)]
pub struct TrackerState {
    pub info: NetworkInfo,
    pub link: LinkProperties,
    pub teardown_requested: bool,
    pub user_data_enabled: bool,
    pub policy_data_enabled: bool,
    pub dependency_met: bool,
    sink: Option<EventSink>,
}

impl TrackerState {
    fn new(network_type: NetworkType) -> Self {
        Self {
            info: NetworkInfo::new(network_type),
            link: LinkProperties::default(),
            teardown_requested: false,
            user_data_enabled: true,
            policy_data_enabled: true,
            dependency_met: true,
            sink: None,
        }
    }

    /// All data gates open.
    pub fn data_enabled(&self) -> bool {
        self.user_data_enabled && self.policy_data_enabled && self.dependency_met
    }
}

pub type SharedTrackerState = Arc<RwLock<TrackerState>>;

fn emit(state: &SharedTrackerState, make: fn(NetworkInfo) -> TrackerEvent) {
    let (info, sink) = {
        let s = state.read();
        (s.info.clone(), s.sink.clone())
    };
    match sink {
        Some(sink) => {
            if !sink.send(make(info)) {
                tracing::debug!("Orchestrator gone, dropping tracker event");
            }
        }
        None => tracing::trace!(net_type = %info.network_type(), "Tracker not monitored yet"),
    }
}

/// Plumbing every tracker family is built on.
pub struct TrackerCore {
    state: SharedTrackerState,
    interface: Option<String>,
    link_control: Arc<dyn LinkControl>,
}

impl TrackerCore {
    pub fn new(
        network_type: NetworkType,
        interface: Option<String>,
        link_control: Arc<dyn LinkControl>,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(TrackerState::new(network_type))),
            interface,
            link_control,
        }
    }

    pub fn shared_state(&self) -> SharedTrackerState {
        Arc::clone(&self.state)
    }

    pub fn driver(&self) -> TrackerDriver {
        TrackerDriver {
            state: self.shared_state(),
        }
    }

    pub fn network_type(&self) -> NetworkType {
        self.state.read().info.network_type()
    }

    /// Configured interface, if any.
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn link_control(&self) -> &dyn LinkControl {
        self.link_control.as_ref()
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, TrackerState> {
        self.state.read()
    }

    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, TrackerState> {
        self.state.write()
    }

    fn attach(&self, sink: EventSink) {
        self.state.write().sink = Some(sink);
    }

    /// Sets the detailed state and reports it.
    pub fn transition(&self, detailed_state: DetailedState, reason: Option<&str>) {
        {
            let mut s = self.state.write();
            let extra = s.info.extra_info().map(str::to_string);
            s.info
                .set_detailed_state(detailed_state, reason.map(str::to_string), extra);
        }
        emit(&self.state, TrackerEvent::StateChanged);
    }

    /// Brings the link up (if there is one) and moves to CONNECTING.
    pub fn begin_connect(&self, reason: &str) {
        if let Some(iface) = &self.interface {
            self.link_control.bring_up(iface);
        }
        self.transition(DetailedState::Connecting, Some(reason));
    }

    /// Brings the link down (if there is one) and moves to DISCONNECTING.
    pub fn begin_disconnect(&self, reason: &str) {
        if let Some(iface) = &self.interface {
            self.link_control.bring_down(iface);
        }
        self.transition(DetailedState::Disconnecting, Some(reason));
    }
}

/// Contract between the orchestrator and one network type's driver.
///
/// `reconnect` and `teardown` never block; their outcome arrives later as
/// a [`TrackerEvent`].
pub trait NetworkStateTracker: Send + Sync {
    fn core(&self) -> &TrackerCore;

    /// Requests connectivity. Returns whether the attempt could be started.
    fn reconnect(&mut self) -> bool;

    /// Requests disconnection. Returns whether the request was accepted.
    fn teardown(&mut self) -> bool;

    /// Begins delivering events to `sink`.
    fn start_monitoring(&mut self, sink: EventSink) {
        tracing::debug!(net_type = %self.network_type(), "Start monitoring");
        self.core().attach(sink);
    }

    fn network_type(&self) -> NetworkType {
        self.core().network_type()
    }

    fn network_info(&self) -> NetworkInfo {
        self.core().read().info.clone()
    }

    fn link_properties(&self) -> LinkProperties {
        self.core().read().link.clone()
    }

    /// The interface currently in use, or the configured one.
    fn interface_name(&self) -> Option<String> {
        let s = self.core().read();
        s.link
            .interface_name()
            .or(self.core().interface())
            .map(str::to_string)
    }

    fn is_available(&self) -> bool {
        self.core().read().info.is_available()
    }

    fn set_teardown_requested(&mut self, requested: bool) {
        self.core().write().teardown_requested = requested;
    }

    fn is_teardown_requested(&self) -> bool {
        self.core().read().teardown_requested
    }

    fn set_failover(&mut self, failover: bool) {
        self.core().write().info.set_failover(failover);
    }

    fn set_user_data_enable(&mut self, enabled: bool) {
        self.core().write().user_data_enabled = enabled;
    }

    fn set_policy_data_enable(&mut self, enabled: bool) {
        self.core().write().policy_data_enabled = enabled;
    }

    fn set_dependency_met(&mut self, met: bool) {
        self.core().write().dependency_met = met;
    }

    /// Captive portal probing is external; finishing the check promotes
    /// the tracker to CONNECTED.
    fn captive_portal_check_complete(&mut self) {
        let checking =
            self.core().read().info.detailed_state() == DetailedState::CaptivePortalCheck;
        if checking {
            self.core().transition(DetailedState::Connected, Some("captivePortalCheckComplete"));
        }
    }
}

/// Handle the radio/link monitor uses to report transitions.
#[derive(Clone)]
pub struct TrackerDriver {
    state: SharedTrackerState,
}

impl TrackerDriver {
    pub fn network_type(&self) -> NetworkType {
        self.state.read().info.network_type()
    }

    pub fn info(&self) -> NetworkInfo {
        self.state.read().info.clone()
    }

    pub fn link_properties(&self) -> LinkProperties {
        self.state.read().link.clone()
    }

    pub fn is_teardown_requested(&self) -> bool {
        self.state.read().teardown_requested
    }

    /// Marks the radio present (or absent). Not reported by itself.
    pub fn set_available(&self, available: bool) {
        self.state.write().info.set_available(available);
    }

    pub fn set_roaming(&self, roaming: bool) {
        self.state.write().info.set_roaming(roaming);
    }

    pub fn set_subtype(&self, subtype: u32, name: &str) {
        self.state.write().info.set_subtype(subtype, name);
    }

    pub fn set_extra_info(&self, extra: Option<&str>) {
        let mut s = self.state.write();
        let (ds, reason) = (s.info.detailed_state(), s.info.reason().map(str::to_string));
        s.info.set_detailed_state(ds, reason, extra.map(str::to_string));
    }

    /// Sets the detailed state and reports it.
    pub fn set_state(&self, detailed_state: DetailedState, reason: Option<&str>) {
        {
            let mut s = self.state.write();
            let extra = s.info.extra_info().map(str::to_string);
            s.info
                .set_detailed_state(detailed_state, reason.map(str::to_string), extra);
        }
        emit(&self.state, TrackerEvent::StateChanged);
    }

    pub fn connecting(&self) {
        self.set_state(DetailedState::Connecting, None);
    }

    /// Installs `link` and reports CONNECTED.
    pub fn connected(&self, link: LinkProperties) {
        self.state.write().link = link;
        self.set_state(DetailedState::Connected, None);
    }

    /// Installs `link` and reports the captive-portal sub-state.
    pub fn captive_portal_check(&self, link: LinkProperties) {
        self.state.write().link = link;
        self.set_state(DetailedState::CaptivePortalCheck, None);
    }

    pub fn suspended(&self, reason: &str) {
        self.set_state(DetailedState::Suspended, Some(reason));
    }

    pub fn disconnected(&self, reason: Option<&str>) {
        self.set_state(DetailedState::Disconnected, reason);
    }

    pub fn failed(&self, reason: &str) {
        self.set_state(DetailedState::Failed, Some(reason));
    }

    /// Replaces link properties; reported only while connected.
    pub fn update_link_properties(&self, link: LinkProperties) {
        let connected = {
            let mut s = self.state.write();
            if s.link == link {
                return;
            }
            s.link = link;
            s.info.is_connected()
        };
        if connected {
            emit(&self.state, TrackerEvent::ConfigurationChanged);
        }
    }
}
