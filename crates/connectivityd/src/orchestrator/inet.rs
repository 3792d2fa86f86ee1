//! Inet condition debouncing.
//!
//! Reports about the active default network are held for a while before
//! they are published; improving and degrading signals use different hold
//! times.

use super::{Orchestrator, TimerKey};
use crate::broadcast::Broadcast;
use conn_types::NetworkType;

/// Reports above this percentage count as "good".
pub const INET_CONDITION_THRESHOLD: u8 = 50;

impl Orchestrator {
    pub(super) fn handle_inet_condition_change(&mut self, network_type: NetworkType, percentage: u8) {
        if self.active_default() != Some(network_type) {
            tracing::debug!(net_type = %network_type, "Inet condition for a non-default network ignored");
            return;
        }
        self.inet.current = percentage.min(100);
        if self.inet.pending.is_some() {
            // The running hold picks the new value up when it ends
            return;
        }

        let delay = if self.inet.current > INET_CONDITION_THRESHOLD {
            self.config.inet_condition_up_delay()
        } else {
            self.config.inet_condition_down_delay()
        };
        let key = TimerKey::InetConditionHoldEnd {
            network_type,
            sequence: self.default_connection_sequence,
        };
        tracing::debug!(net_type = %network_type, condition = self.inet.current, ?delay, "Inet condition hold started");
        self.timers.schedule(key.clone(), delay);
        self.inet.pending = Some(key);
    }

    pub(super) fn handle_inet_condition_hold_end(&mut self, network_type: NetworkType, sequence: u64) {
        self.inet.pending = None;
        let Some(active) = self.active_default() else {
            return;
        };
        if active != network_type || sequence != self.default_connection_sequence {
            tracing::debug!(net_type = %network_type, sequence, "Stale inet condition hold");
            return;
        }
        let Some(info) = self.network_info(active) else {
            return;
        };
        if !info.is_connected() {
            return;
        }
        let condition = self.inet.current;
        if self.published_inet_condition() == condition {
            return;
        }
        self.set_published_inet_condition(condition);
        tracing::info!(net_type = %active, condition, "Inet condition published");
        self.shared.broadcasts.send(Broadcast::InetConditionChanged {
            network_info: info,
            inet_condition: condition,
        });
    }
}
