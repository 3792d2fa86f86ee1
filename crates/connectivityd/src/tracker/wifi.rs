//! WiFi tracker (station and P2P).

use super::{NetworkFactory, NetworkStateTracker, TrackerCore, TrackerParams};
use crate::error::TrackerError;
use conn_types::{NetworkType, RadioFamily};

pub struct WifiTracker {
    core: TrackerCore,
}

impl WifiTracker {
    pub fn new(core: TrackerCore) -> Self {
        Self { core }
    }
}

impl NetworkStateTracker for WifiTracker {
    fn core(&self) -> &TrackerCore {
        &self.core
    }

    fn reconnect(&mut self) -> bool {
        if !self.is_available() {
            tracing::debug!(net_type = %self.network_type(), "Reconnect refused: no supplicant");
            return false;
        }
        self.core.write().teardown_requested = false;
        self.core.begin_connect("associating");
        true
    }

    fn teardown(&mut self) -> bool {
        self.core.begin_disconnect("disassociating");
        true
    }
}

pub struct WifiFactory;

impl NetworkFactory for WifiFactory {
    fn family(&self) -> RadioFamily {
        RadioFamily::Wifi
    }

    fn create(&self, params: &TrackerParams<'_>) -> Result<Box<dyn NetworkStateTracker>, TrackerError> {
        match params.config.network_type {
            NetworkType::Wifi | NetworkType::WifiP2p => Ok(Box::new(WifiTracker::new(params.core()))),
            network_type => Err(TrackerError::Unsupported {
                network_type,
                family: self.family(),
            }),
        }
    }
}
