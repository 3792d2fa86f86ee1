//! Shared harness for the orchestrator integration tests.
//!
//! Every network is backed by a dummy tracker, so link transitions are
//! driven by hand through the driver handles, and routes and resolvers go
//! to a [`RecordingTransport`].

#![allow(dead_code)]

use connectivityd::tracker::dummy::DummyTracker;
use connectivityd::tracker::{NetworkFactory, RecordingLinkControl, TrackerParams};
use connectivityd::{
    Broadcast, ChangeKind, ConnectivityChange, ConnectivityHandle, DaemonConfig, FactoryRegistry,
    NetworkStateTracker, OrchestratorDump, RecordingTransport, Service, TrackerDriver, TrackerError,
};
use conn_types::{LinkProperties, NetworkType, RadioFamily, RouteInfo};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Wifi, mobile and ethernet as default networks, declared in that order,
/// plus MMS (no restore timer), SUPL (protected) and DUN on the mobile radio.
pub const CONFIG: &str = r#"
[daemon]
connectivity_change_delay_ms = 0
network_preference = "wifi"

[[radio]]
family = "wifi"

[[radio]]
family = "mobile"
simultaneity = 3

[[radio]]
family = "ethernet"

[[network]]
type = "wifi"
radio = "wifi"
priority = 10
default = true

[[network]]
type = "mobile"
radio = "mobile"
priority = 20
default = true

[[network]]
type = "ethernet"
radio = "ethernet"
priority = 5
default = true

[[network]]
type = "mobile_mms"
radio = "mobile"
priority = 30
restore_time_ms = -1

[[network]]
type = "mobile_supl"
radio = "mobile"
priority = 30
protected = true

[[network]]
type = "mobile_dun"
radio = "mobile"
priority = 30
"#;

/// Builds dummy trackers for one radio family.
struct DummyFamily(RadioFamily);

impl NetworkFactory for DummyFamily {
    fn family(&self) -> RadioFamily {
        self.0
    }

    fn create(&self, params: &TrackerParams<'_>) -> Result<Box<dyn NetworkStateTracker>, TrackerError> {
        Ok(Box::new(DummyTracker::new(params.config.network_type)))
    }
}

pub struct Harness {
    pub service: Service,
    pub handle: ConnectivityHandle,
    pub transport: Arc<RecordingTransport>,
}

impl Harness {
    pub fn start() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: DaemonConfig) -> Self {
        let mut registry = FactoryRegistry::new(Arc::new(RecordingLinkControl::new()));
        for family in [RadioFamily::Wifi, RadioFamily::Mobile, RadioFamily::Ethernet] {
            registry.register(Box::new(DummyFamily(family)));
        }
        let transport = Arc::new(RecordingTransport::new());
        let service = Service::start(config, &registry, transport.clone()).unwrap();
        let handle = service.handle();
        Self {
            service,
            handle,
            transport,
        }
    }

    pub fn driver(&self, network_type: NetworkType) -> TrackerDriver {
        self.service.driver(network_type).unwrap()
    }

    /// Returns once every message queued so far, and whatever those
    /// messages queued in turn, has been handled.
    pub async fn settle(&self) -> OrchestratorDump {
        self.handle.dump().await.unwrap();
        self.handle.dump().await.unwrap()
    }

    /// Makes `network_type` available and reports it connected on `iface`.
    pub async fn connect(&self, network_type: NetworkType, iface: &str) {
        let driver = self.driver(network_type);
        driver.set_available(true);
        driver.connected(link(iface));
        self.settle().await;
    }
}

pub fn config() -> DaemonConfig {
    let config = DaemonConfig::from_toml_str(CONFIG).unwrap();
    config.validate().unwrap();
    config
}

/// A link on 192.168.<n>.0/24 with a default route through .1, where `n`
/// is derived from the interface name.
pub fn link(iface: &str) -> LinkProperties {
    let net = iface.bytes().map(u32::from).sum::<u32>() % 200 + 1;
    let mut lp = LinkProperties::new(iface);
    lp.add_address(format!("192.168.{}.20/24", net).parse().unwrap());
    lp.add_route(RouteInfo::default_via(format!("192.168.{}.1", net).parse().unwrap()));
    lp.add_dns(format!("192.168.{}.53", net).parse().unwrap());
    lp
}

/// Everything received so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Broadcast>) -> Vec<Broadcast> {
    let mut out = Vec::new();
    while let Ok(b) = rx.try_recv() {
        out.push(b);
    }
    out
}

/// Connectivity changes among `broadcasts`, in order.
pub fn changes(broadcasts: &[Broadcast]) -> Vec<ConnectivityChange> {
    broadcasts
        .iter()
        .filter_map(Broadcast::connectivity)
        .cloned()
        .collect()
}

pub fn kinds(broadcasts: &[Broadcast]) -> Vec<(ChangeKind, NetworkType)> {
    changes(broadcasts)
        .into_iter()
        .map(|c| (c.kind, c.network_info.network_type()))
        .collect()
}
