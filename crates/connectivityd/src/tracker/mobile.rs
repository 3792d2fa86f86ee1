//! Mobile data tracker.
//!
//! One instance per mobile network type (default data, MMS, SUPL, DUN, ...).
//! Connecting is gated on three switches: the user's mobile data setting,
//! the policy engine's data limit and the radio dependency.

use super::{NetworkFactory, NetworkStateTracker, TrackerCore, TrackerParams};
use crate::error::TrackerError;
use conn_types::{NetworkType, RadioFamily};

/// Suspension reason for a voice call on a radio that cannot carry data
/// at the same time. The suspension is transient.
pub const REASON_VOICE_CALL: &str = "voiceCall";

pub const REASON_DATA_ENABLED: &str = "dataEnabled";
pub const REASON_DATA_DISABLED: &str = "dataDisabled";
pub const REASON_APN_REQUESTED: &str = "apnRequested";
pub const REASON_APN_RELEASED: &str = "apnReleased";

/// Returns true when a suspension with this reason keeps routes in place.
pub fn is_transient_suspend_reason(reason: Option<&str>) -> bool {
    reason == Some(REASON_VOICE_CALL)
}

pub struct MobileDataTracker {
    core: TrackerCore,
}

impl MobileDataTracker {
    pub fn new(core: TrackerCore) -> Self {
        Self { core }
    }

    /// Re-evaluates the data gates after one of them changed.
    fn on_gate_changed(&mut self) {
        let (enabled, info) = {
            let s = self.core.read();
            (s.data_enabled(), s.info.clone())
        };
        if !enabled && info.is_connected_or_connecting() {
            tracing::info!(net_type = %info.network_type(), "Mobile data gated off, disconnecting");
            self.core.begin_disconnect(REASON_DATA_DISABLED);
        } else if enabled
            && info.network_type() == NetworkType::Mobile
            && info.is_available()
            && !info.is_connected_or_connecting()
        {
            self.core.begin_connect(REASON_DATA_ENABLED);
        }
    }
}

impl NetworkStateTracker for MobileDataTracker {
    fn core(&self) -> &TrackerCore {
        &self.core
    }

    fn reconnect(&mut self) -> bool {
        let (enabled, available, net_type) = {
            let s = self.core.read();
            (s.data_enabled(), s.info.is_available(), s.info.network_type())
        };
        if !enabled {
            tracing::debug!(net_type = %net_type, "Reconnect refused: data disabled");
            return false;
        }
        if !available {
            tracing::debug!(net_type = %net_type, "Reconnect refused: radio unavailable");
            return false;
        }
        self.core.write().teardown_requested = false;
        self.core.begin_connect(REASON_APN_REQUESTED);
        true
    }

    fn teardown(&mut self) -> bool {
        self.core.begin_disconnect(REASON_APN_RELEASED);
        true
    }

    fn set_user_data_enable(&mut self, enabled: bool) {
        self.core.write().user_data_enabled = enabled;
        self.on_gate_changed();
    }

    fn set_policy_data_enable(&mut self, enabled: bool) {
        self.core.write().policy_data_enabled = enabled;
        self.on_gate_changed();
    }

    fn set_dependency_met(&mut self, met: bool) {
        self.core.write().dependency_met = met;
        self.on_gate_changed();
    }
}

pub struct MobileFactory;

impl NetworkFactory for MobileFactory {
    fn family(&self) -> RadioFamily {
        RadioFamily::Mobile
    }

    fn create(&self, params: &TrackerParams<'_>) -> Result<Box<dyn NetworkStateTracker>, TrackerError> {
        let network_type = params.config.network_type;
        if !network_type.is_mobile() {
            return Err(TrackerError::Unsupported {
                network_type,
                family: self.family(),
            });
        }
        Ok(Box::new(MobileDataTracker::new(params.core())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{LinkOp, RecordingLinkControl};
    use conn_types::State;
    use std::sync::Arc;

    fn tracker(network_type: NetworkType) -> (MobileDataTracker, Arc<RecordingLinkControl>) {
        let links = Arc::new(RecordingLinkControl::new());
        let core = TrackerCore::new(network_type, Some("wwan0".into()), links.clone());
        (MobileDataTracker::new(core), links)
    }

    #[test]
    fn test_reconnect_requires_data_enabled() {
        let (mut t, links) = tracker(NetworkType::MobileMms);
        t.core().driver().set_available(true);
        t.core().write().user_data_enabled = false;
        assert!(!t.reconnect());
        assert!(links.ops().is_empty());

        t.core().write().user_data_enabled = true;
        assert!(t.reconnect());
        assert_eq!(t.network_info().state(), State::Connecting);
        assert_eq!(links.ops(), vec![LinkOp::Up("wwan0".into())]);
    }

    #[test]
    fn test_reconnect_requires_radio() {
        let (mut t, _) = tracker(NetworkType::Mobile);
        assert!(!t.reconnect());
    }

    #[test]
    fn test_disabling_data_disconnects() {
        let (mut t, links) = tracker(NetworkType::Mobile);
        let driver = t.core().driver();
        driver.set_available(true);
        driver.connected(conn_types::LinkProperties::new("wwan0"));

        t.set_user_data_enable(false);
        assert_eq!(t.network_info().state(), State::Disconnecting);
        assert_eq!(t.network_info().reason(), Some(REASON_DATA_DISABLED));
        assert_eq!(links.take_ops(), vec![LinkOp::Down("wwan0".into())]);

        // Re-enabling brings the default mobile type back
        driver.disconnected(None);
        t.set_user_data_enable(true);
        assert_eq!(t.network_info().state(), State::Connecting);
    }

    #[test]
    fn test_policy_data_disable_blocks_reconnect() {
        let (mut t, links) = tracker(NetworkType::MobileMms);
        t.core().driver().set_available(true);
        t.set_policy_data_enable(false);
        assert!(!t.reconnect());
        assert!(links.ops().is_empty());

        t.set_policy_data_enable(true);
        assert!(t.reconnect());
        assert_eq!(t.network_info().state(), State::Connecting);
    }

    #[test]
    fn test_voice_call_is_transient() {
        assert!(is_transient_suspend_reason(Some(REASON_VOICE_CALL)));
        assert!(!is_transient_suspend_reason(Some("radioOff")));
        assert!(!is_transient_suspend_reason(None));
    }
}
