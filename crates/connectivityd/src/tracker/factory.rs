//! Tracker construction from configuration.
//!
//! Each radio family registers one [`NetworkFactory`]. A network entry whose
//! family has no factory, or whose factory rejects it, is logged and left
//! out; the remaining networks still start.

use super::{LinkControl, NetworkStateTracker, TrackerCore};
use crate::config::DaemonConfig;
use crate::error::TrackerError;
use conn_types::{NetworkConfig, RadioFamily};
use std::collections::HashMap;
use std::sync::Arc;

/// Inputs for building one tracker.
pub struct TrackerParams<'a> {
    pub config: &'a NetworkConfig,
    pub interface: Option<&'a str>,
    pub link_control: Arc<dyn LinkControl>,
}

impl TrackerParams<'_> {
    pub fn core(&self) -> TrackerCore {
        TrackerCore::new(
            self.config.network_type,
            self.interface.map(str::to_string),
            Arc::clone(&self.link_control),
        )
    }
}

pub trait NetworkFactory: Send + Sync {
    fn family(&self) -> RadioFamily;

    fn create(&self, params: &TrackerParams<'_>) -> Result<Box<dyn NetworkStateTracker>, TrackerError>;
}

pub struct FactoryRegistry {
    factories: HashMap<RadioFamily, Box<dyn NetworkFactory>>,
    link_control: Arc<dyn LinkControl>,
}

impl FactoryRegistry {
    /// An empty registry.
    pub fn new(link_control: Arc<dyn LinkControl>) -> Self {
        Self {
            factories: HashMap::new(),
            link_control,
        }
    }

    /// A registry with every built-in family.
    pub fn with_defaults(link_control: Arc<dyn LinkControl>) -> Self {
        let mut registry = Self::new(link_control);
        registry.register(Box::new(super::ethernet::EthernetFactory));
        registry.register(Box::new(super::wifi::WifiFactory));
        registry.register(Box::new(super::mobile::MobileFactory));
        registry.register(Box::new(super::bluetooth::BluetoothFactory));
        registry.register(Box::new(super::dummy::DummyFactory));
        #[cfg(feature = "wimax")]
        registry.register(Box::new(super::wimax::WimaxFactory));
        registry
    }

    /// Registers `factory`, replacing any earlier one for its family.
    pub fn register(&mut self, factory: Box<dyn NetworkFactory>) {
        if self.factories.insert(factory.family(), factory).is_some() {
            tracing::debug!("Replaced tracker factory");
        }
    }

    pub fn build_one(&self, config: &DaemonConfig, net: &NetworkConfig) -> Result<Box<dyn NetworkStateTracker>, TrackerError> {
        let factory = self
            .factories
            .get(&net.radio)
            .ok_or(TrackerError::NoFactory(net.radio))?;
        let interface = config
            .network(net.network_type)
            .and_then(|n| n.interface.as_deref());
        factory.create(&TrackerParams {
            config: net,
            interface,
            link_control: Arc::clone(&self.link_control),
        })
    }

    /// Builds a tracker for every configured network that can have one.
    pub fn build(&self, config: &DaemonConfig) -> Vec<Box<dyn NetworkStateTracker>> {
        let mut trackers = Vec::new();
        for net in config.network_configs() {
            match self.build_one(config, &net) {
                Ok(tracker) => {
                    tracing::info!(net_type = %net.network_type, radio = %net.radio, "Tracker created");
                    trackers.push(tracker);
                }
                Err(e) => {
                    tracing::error!(net_type = %net.network_type, error = %e, "Could not create tracker, network disabled");
                }
            }
        }
        trackers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkEntry;
    use crate::tracker::RecordingLinkControl;
    use conn_types::NetworkType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_defaults() {
        let registry = FactoryRegistry::with_defaults(Arc::new(RecordingLinkControl::new()));
        let trackers = registry.build(&DaemonConfig::default());
        let types: Vec<NetworkType> = trackers.iter().map(|t| t.network_type()).collect();
        assert_eq!(types.len(), 8);
        assert!(types.contains(&NetworkType::MobileMms));
        assert!(types.contains(&NetworkType::Ethernet));
    }

    #[test]
    fn test_missing_factory_skips_network() {
        let mut registry = FactoryRegistry::new(Arc::new(RecordingLinkControl::new()));
        registry.register(Box::new(crate::tracker::wifi::WifiFactory));
        let trackers = registry.build(&DaemonConfig::default());
        assert_eq!(trackers.len(), 1);
        assert_eq!(trackers[0].network_type(), NetworkType::Wifi);
    }

    #[test]
    fn test_ethernet_requires_interface() {
        let registry = FactoryRegistry::with_defaults(Arc::new(RecordingLinkControl::new()));
        let mut config = DaemonConfig::default();
        config.network.retain(|n| n.network_type != NetworkType::Ethernet);
        let entry: NetworkEntry = toml::from_str(
            "type = \"ethernet\"\nradio = \"ethernet\"\npriority = 5\ndefault = true",
        )
        .unwrap();
        config.network.push(entry);
        let net = config.network(NetworkType::Ethernet).unwrap().to_network_config();
        assert!(matches!(
            registry.build_one(&config, &net),
            Err(TrackerError::Misconfigured { .. })
        ));
    }
}
