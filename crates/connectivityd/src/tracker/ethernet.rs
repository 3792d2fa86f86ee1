//! Wired Ethernet tracker.
//!
//! Availability follows the presence of the interface.

use super::{NetworkFactory, NetworkStateTracker, TrackerCore, TrackerParams};
use crate::error::TrackerError;
use conn_types::{NetworkType, RadioFamily};

pub struct EthernetTracker {
    core: TrackerCore,
}

impl EthernetTracker {
    pub fn new(core: TrackerCore) -> Self {
        Self { core }
    }

    fn refresh_presence(&self) -> bool {
        let present = match self.core.interface() {
            Some(iface) => self.core.link_control().is_present(iface),
            None => false,
        };
        self.core.write().info.set_available(present);
        present
    }
}

impl NetworkStateTracker for EthernetTracker {
    fn core(&self) -> &TrackerCore {
        &self.core
    }

    fn reconnect(&mut self) -> bool {
        if !self.refresh_presence() {
            tracing::debug!(iface = ?self.core.interface(), "Reconnect refused: interface absent");
            return false;
        }
        self.core.write().teardown_requested = false;
        self.core.begin_connect("linkUp");
        true
    }

    fn teardown(&mut self) -> bool {
        self.core.begin_disconnect("linkDown");
        true
    }

    fn is_available(&self) -> bool {
        self.refresh_presence()
    }
}

pub struct EthernetFactory;

impl NetworkFactory for EthernetFactory {
    fn family(&self) -> RadioFamily {
        RadioFamily::Ethernet
    }

    fn create(&self, params: &TrackerParams<'_>) -> Result<Box<dyn NetworkStateTracker>, TrackerError> {
        let network_type = params.config.network_type;
        if network_type != NetworkType::Ethernet {
            return Err(TrackerError::Unsupported {
                network_type,
                family: self.family(),
            });
        }
        if params.interface.is_none() {
            return Err(TrackerError::Misconfigured {
                network_type,
                message: "an interface is required".to_string(),
            });
        }
        let tracker = EthernetTracker::new(params.core());
        tracker.refresh_presence();
        Ok(Box::new(tracker))
    }
}
