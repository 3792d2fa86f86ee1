//! Bluetooth PAN tracker.

use super::{NetworkFactory, NetworkStateTracker, TrackerCore, TrackerParams};
use crate::error::TrackerError;
use conn_types::{NetworkType, RadioFamily};

/// Tethered uplink over a paired device. Available only while a PAN
/// profile is bound, which the driver reports.
pub struct BluetoothPanTracker {
    core: TrackerCore,
}

impl BluetoothPanTracker {
    pub fn new(core: TrackerCore) -> Self {
        Self { core }
    }
}

impl NetworkStateTracker for BluetoothPanTracker {
    fn core(&self) -> &TrackerCore {
        &self.core
    }

    fn reconnect(&mut self) -> bool {
        if !self.is_available() {
            return false;
        }
        self.core.write().teardown_requested = false;
        self.core.begin_connect("panConnect");
        true
    }

    fn teardown(&mut self) -> bool {
        self.core.begin_disconnect("panDisconnect");
        true
    }
}

pub struct BluetoothFactory;

impl NetworkFactory for BluetoothFactory {
    fn family(&self) -> RadioFamily {
        RadioFamily::Bluetooth
    }

    fn create(&self, params: &TrackerParams<'_>) -> Result<Box<dyn NetworkStateTracker>, TrackerError> {
        match params.config.network_type {
            NetworkType::Bluetooth => Ok(Box::new(BluetoothPanTracker::new(params.core()))),
            network_type => Err(TrackerError::Unsupported {
                network_type,
                family: self.family(),
            }),
        }
    }
}
