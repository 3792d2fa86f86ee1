//! Outbound notifications.
//!
//! Connectivity and proxy broadcasts are sticky: the latest of each is
//! replayed to every new subscriber. Until the system is ready the latest
//! sticky broadcast is also held back as the initial broadcast and sent
//! again by [`BroadcastHub::system_ready`].

use conn_types::{NetworkInfo, ProxyInfo};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Connected,
    Disconnected,
    /// Transient suspension; routes stay in place.
    Suspended,
    ConnectionFailed,
}

/// Payload of a connectivity-changed broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityChange {
    pub kind: ChangeKind,
    pub network_info: NetworkInfo,
    /// The network we are failing over to, or the remaining default.
    pub other_network_info: Option<NetworkInfo>,
    pub no_connectivity: bool,
    pub is_failover: bool,
    pub reason: Option<String>,
    pub extra_info: Option<String>,
    pub inet_condition: u8,
}

impl ConnectivityChange {
    /// Fills the extras from `info` as it is right now.
    pub fn new(kind: ChangeKind, info: &NetworkInfo, inet_condition: u8) -> Self {
        Self {
            kind,
            network_info: info.clone(),
            other_network_info: None,
            no_connectivity: false,
            is_failover: info.is_failover(),
            reason: info.reason().map(str::to_string),
            extra_info: info.extra_info().map(str::to_string),
            inet_condition,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Broadcast {
    ConnectivityChanged(ConnectivityChange),
    InetConditionChanged {
        network_info: NetworkInfo,
        inet_condition: u8,
    },
    ProxyChanged {
        proxy: Option<ProxyInfo>,
    },
}

impl Broadcast {
    pub fn is_sticky(&self) -> bool {
        !matches!(self, Broadcast::InetConditionChanged { .. })
    }

    pub fn connectivity(&self) -> Option<&ConnectivityChange> {
        match self {
            Broadcast::ConnectivityChanged(change) => Some(change),
            _ => None,
        }
    }
}

#[derive(Default)]
struct HubInner {
    subscribers: Vec<mpsc::UnboundedSender<Broadcast>>,
    sticky_connectivity: Option<Broadcast>,
    sticky_proxy: Option<Broadcast>,
    initial: Option<Broadcast>,
    system_ready: bool,
    sent: u64,
}

/// Fan-out of broadcasts to subscribers.
#[derive(Default)]
pub struct BroadcastHub {
    inner: Mutex<HubInner>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Sticky broadcasts are replayed right away.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Broadcast> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        for sticky in [&inner.sticky_connectivity, &inner.sticky_proxy].into_iter().flatten() {
            let _ = tx.send(sticky.clone());
        }
        inner.subscribers.push(tx);
        rx
    }

    pub fn send(&self, broadcast: Broadcast) {
        let mut inner = self.inner.lock();
        match &broadcast {
            Broadcast::ConnectivityChanged(_) => inner.sticky_connectivity = Some(broadcast.clone()),
            Broadcast::ProxyChanged { .. } => inner.sticky_proxy = Some(broadcast.clone()),
            Broadcast::InetConditionChanged { .. } => {}
        }
        if broadcast.is_sticky() && !inner.system_ready {
            inner.initial = Some(broadcast.clone());
        }
        inner.sent += 1;
        tracing::debug!(?broadcast, subscribers = inner.subscribers.len(), "Broadcast");
        inner.subscribers.retain(|tx| tx.send(broadcast.clone()).is_ok());
    }

    /// Marks the system ready and re-sends the held initial broadcast.
    pub fn system_ready(&self) {
        let initial = {
            let mut inner = self.inner.lock();
            if inner.system_ready {
                return;
            }
            inner.system_ready = true;
            inner.initial.take()
        };
        if let Some(initial) = initial {
            tracing::info!("System ready, sending initial broadcast");
            self.send(initial);
        }
    }

    pub fn is_system_ready(&self) -> bool {
        self.inner.lock().system_ready
    }

    pub fn last_connectivity(&self) -> Option<ConnectivityChange> {
        self.inner
            .lock()
            .sticky_connectivity
            .as_ref()
            .and_then(Broadcast::connectivity)
            .cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Broadcasts sent so far.
    pub fn sent_count(&self) -> u64 {
        self.inner.lock().sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conn_types::{DetailedState, NetworkType};
    use pretty_assertions::assert_eq;

    fn connected(network_type: NetworkType) -> Broadcast {
        let mut info = NetworkInfo::new(network_type);
        info.set_detailed_state(DetailedState::Connected, None, None);
        Broadcast::ConnectivityChanged(ConnectivityChange::new(ChangeKind::Connected, &info, 0))
    }

    #[test]
    fn test_sticky_replay_on_subscribe() {
        let hub = BroadcastHub::new();
        hub.send(connected(NetworkType::Wifi));
        hub.send(Broadcast::InetConditionChanged {
            network_info: NetworkInfo::new(NetworkType::Wifi),
            inet_condition: 100,
        });
        hub.send(connected(NetworkType::Ethernet));

        let mut rx = hub.subscribe();
        assert_eq!(rx.try_recv().unwrap(), connected(NetworkType::Ethernet));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_initial_broadcast_resent_when_ready() {
        let hub = BroadcastHub::new();
        let mut early = hub.subscribe();
        hub.send(connected(NetworkType::Wifi));
        assert_eq!(early.try_recv().unwrap(), connected(NetworkType::Wifi));

        hub.system_ready();
        assert_eq!(early.try_recv().unwrap(), connected(NetworkType::Wifi));
        assert!(hub.is_system_ready());

        // Only once
        hub.system_ready();
        assert!(early.try_recv().is_err());
    }

    #[test]
    fn test_closed_subscribers_are_dropped() {
        let hub = BroadcastHub::new();
        let rx = hub.subscribe();
        let _keep = hub.subscribe();
        drop(rx);
        hub.send(Broadcast::ProxyChanged { proxy: None });
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.sent_count(), 1);
    }

    #[test]
    fn test_change_extras_follow_info() {
        let mut info = NetworkInfo::new(NetworkType::Mobile);
        info.set_detailed_state(DetailedState::Disconnected, Some("radioOff".into()), Some("internet".into()));
        info.set_failover(true);
        let change = ConnectivityChange::new(ChangeKind::Disconnected, &info, 50);
        assert!(change.is_failover);
        assert_eq!(change.reason.as_deref(), Some("radioOff"));
        assert_eq!(change.extra_info.as_deref(), Some("internet"));
        assert_eq!(change.inet_condition, 50);
    }
}
