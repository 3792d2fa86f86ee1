//! WiMAX tracker, compiled in with the `wimax` feature.
//!
//! Follows the user's mobile data switch like the mobile trackers do.

use super::{NetworkFactory, NetworkStateTracker, TrackerCore, TrackerParams};
use crate::error::TrackerError;
use conn_types::{NetworkType, RadioFamily};

pub struct WimaxTracker {
    core: TrackerCore,
}

impl WimaxTracker {
    pub fn new(core: TrackerCore) -> Self {
        Self { core }
    }
}

impl NetworkStateTracker for WimaxTracker {
    fn core(&self) -> &TrackerCore {
        &self.core
    }

    fn reconnect(&mut self) -> bool {
        let ready = {
            let s = self.core.read();
            s.user_data_enabled && s.info.is_available()
        };
        if !ready {
            return false;
        }
        self.core.write().teardown_requested = false;
        self.core.begin_connect("wimaxConnect");
        true
    }

    fn teardown(&mut self) -> bool {
        self.core.begin_disconnect("wimaxDisconnect");
        true
    }

    fn set_user_data_enable(&mut self, enabled: bool) {
        let connected = {
            let mut s = self.core.write();
            s.user_data_enabled = enabled;
            s.info.is_connected_or_connecting()
        };
        if !enabled && connected {
            self.core.begin_disconnect("dataDisabled");
        }
    }
}

pub struct WimaxFactory;

impl NetworkFactory for WimaxFactory {
    fn family(&self) -> RadioFamily {
        RadioFamily::Wimax
    }

    fn create(&self, params: &TrackerParams<'_>) -> Result<Box<dyn NetworkStateTracker>, TrackerError> {
        match params.config.network_type {
            NetworkType::Wimax => Ok(Box::new(WimaxTracker::new(params.core()))),
            network_type => Err(TrackerError::Unsupported {
                network_type,
                family: self.family(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::RecordingLinkControl;
    use std::sync::Arc;

    #[test]
    fn test_user_data_gate() {
        let links = Arc::new(RecordingLinkControl::new());
        let mut t = WimaxTracker::new(TrackerCore::new(NetworkType::Wimax, Some("wmx0".into()), links));
        t.core().driver().set_available(true);
        t.set_user_data_enable(false);
        assert!(!t.reconnect());
        t.set_user_data_enable(true);
        assert!(t.reconnect());
    }
}
