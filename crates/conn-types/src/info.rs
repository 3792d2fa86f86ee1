//! Network connection state.

use crate::NetworkType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse connection state, as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Connecting,
    Connected,
    Suspended,
    Disconnecting,
    Disconnected,
    Unknown,
}

/// Fine-grained connection state, driven by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailedState {
    Idle,
    Scanning,
    Connecting,
    Authenticating,
    ObtainingIpAddr,
    /// Only used by default-eligible networks while connecting.
    CaptivePortalCheck,
    Connected,
    Suspended,
    Disconnecting,
    Disconnected,
    /// Terminal for one connection attempt.
    Failed,
    /// Access denied by policy for the querying uid.
    Blocked,
}

impl DetailedState {
    /// Maps this detailed state onto its coarse [`State`].
    pub const fn state(&self) -> State {
        match self {
            DetailedState::Idle | DetailedState::Disconnected | DetailedState::Failed => {
                State::Disconnected
            }
            DetailedState::Blocked => State::Disconnected,
            DetailedState::Scanning
            | DetailedState::Connecting
            | DetailedState::Authenticating
            | DetailedState::ObtainingIpAddr
            | DetailedState::CaptivePortalCheck => State::Connecting,
            DetailedState::Connected => State::Connected,
            DetailedState::Suspended => State::Suspended,
            DetailedState::Disconnecting => State::Disconnecting,
        }
    }
}

impl fmt::Display for DetailedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Snapshot of one network's connection status.
///
/// Trackers own and mutate the live copy; everyone else holds clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    network_type: NetworkType,
    subtype: u32,
    subtype_name: String,
    detailed_state: DetailedState,
    reason: Option<String>,
    extra_info: Option<String>,
    is_failover: bool,
    is_available: bool,
    is_roaming: bool,
}

impl NetworkInfo {
    /// Creates an idle info for the given type.
    pub fn new(network_type: NetworkType) -> Self {
        Self {
            network_type,
            subtype: 0,
            subtype_name: String::new(),
            detailed_state: DetailedState::Idle,
            reason: None,
            extra_info: None,
            is_failover: false,
            is_available: false,
            is_roaming: false,
        }
    }

    pub fn network_type(&self) -> NetworkType {
        self.network_type
    }

    pub fn type_name(&self) -> &'static str {
        self.network_type.name()
    }

    pub fn subtype(&self) -> u32 {
        self.subtype
    }

    pub fn subtype_name(&self) -> &str {
        &self.subtype_name
    }

    pub fn set_subtype(&mut self, subtype: u32, subtype_name: impl Into<String>) {
        self.subtype = subtype;
        self.subtype_name = subtype_name.into();
    }

    pub fn state(&self) -> State {
        self.detailed_state.state()
    }

    pub fn detailed_state(&self) -> DetailedState {
        self.detailed_state
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn extra_info(&self) -> Option<&str> {
        self.extra_info.as_deref()
    }

    /// Sets the detailed state together with the reason and extra info
    /// that explain the transition.
    pub fn set_detailed_state(
        &mut self,
        detailed_state: DetailedState,
        reason: Option<String>,
        extra_info: Option<String>,
    ) {
        self.detailed_state = detailed_state;
        self.reason = reason;
        self.extra_info = extra_info;
    }

    pub fn is_failover(&self) -> bool {
        self.is_failover
    }

    pub fn set_failover(&mut self, is_failover: bool) {
        self.is_failover = is_failover;
    }

    pub fn is_available(&self) -> bool {
        self.is_available
    }

    pub fn set_available(&mut self, is_available: bool) {
        self.is_available = is_available;
    }

    pub fn is_roaming(&self) -> bool {
        self.is_roaming
    }

    pub fn set_roaming(&mut self, is_roaming: bool) {
        self.is_roaming = is_roaming;
    }

    pub fn is_connected(&self) -> bool {
        self.state() == State::Connected
    }

    pub fn is_connected_or_connecting(&self) -> bool {
        matches!(self.state(), State::Connected | State::Connecting)
    }
}

impl fmt::Display for NetworkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type: {}, state: {:?}/{}, reason: {}, extra: {}, failover: {}, available: {}",
            self.type_name(),
            self.state(),
            self.detailed_state,
            self.reason.as_deref().unwrap_or("(unspecified)"),
            self.extra_info.as_deref().unwrap_or("(none)"),
            self.is_failover,
            self.is_available
        )
    }
}
