//! Dummy tracker for loopback and test setups.
//!
//! Does no link work at all; the driver handle is the only source of
//! transitions. The dummy factory accepts any network type.

use super::{NetworkFactory, NetworkStateTracker, RecordingLinkControl, TrackerCore, TrackerParams};
use crate::error::TrackerError;
use conn_types::{NetworkType, RadioFamily};
use std::sync::Arc;

pub struct DummyTracker {
    core: TrackerCore,
}

impl DummyTracker {
    pub fn new(network_type: NetworkType) -> Self {
        Self {
            core: TrackerCore::new(network_type, None, Arc::new(RecordingLinkControl::new())),
        }
    }
}

impl NetworkStateTracker for DummyTracker {
    fn core(&self) -> &TrackerCore {
        &self.core
    }

    fn reconnect(&mut self) -> bool {
        if !self.is_available() {
            return false;
        }
        self.core.write().teardown_requested = false;
        self.core.begin_connect("dummyConnect");
        true
    }

    fn teardown(&mut self) -> bool {
        self.core.begin_disconnect("dummyDisconnect");
        true
    }
}

pub struct DummyFactory;

impl NetworkFactory for DummyFactory {
    fn family(&self) -> RadioFamily {
        RadioFamily::Dummy
    }

    fn create(&self, params: &TrackerParams<'_>) -> Result<Box<dyn NetworkStateTracker>, TrackerError> {
        Ok(Box::new(DummyTracker::new(params.config.network_type)))
    }
}
