//! Policy and quota signals.
//!
//! An external policy engine pushes per-uid rules, the set of metered
//! interfaces and the background-data restriction. The snapshot lives
//! behind its own lock so that reads from any task never wait on the
//! orchestrator queue.

use crate::orchestrator::Message;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::mpsc;

pub const RULE_ALLOW_ALL: u32 = 0;
pub const RULE_REJECT_METERED: u32 = 1;

/// Receiver of policy engine notifications.
pub trait PolicyObserver: Send + Sync {
    fn on_uid_rules_changed(&self, uid: u32, rules: u32);
    fn on_metered_ifaces_changed(&self, ifaces: Vec<String>);
    fn on_restrict_background_changed(&self, restrict: bool);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicySnapshot {
    pub uid_rules: BTreeMap<u32, u32>,
    pub metered_ifaces: BTreeSet<String>,
    pub restrict_background: bool,
}

pub struct PolicyListener {
    rules: RwLock<PolicySnapshot>,
    tx: mpsc::UnboundedSender<Message>,
}

impl PolicyListener {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            rules: RwLock::new(PolicySnapshot::default()),
            tx,
        }
    }

    pub fn uid_rules(&self, uid: u32) -> u32 {
        self.rules
            .read()
            .uid_rules
            .get(&uid)
            .copied()
            .unwrap_or(RULE_ALLOW_ALL)
    }

    pub fn is_metered(&self, iface: &str) -> bool {
        self.rules.read().metered_ifaces.contains(iface)
    }

    /// True when `uid` may not use the network on `iface`.
    pub fn is_blocked(&self, uid: u32, iface: Option<&str>) -> bool {
        let Some(iface) = iface else {
            return false;
        };
        let rules = self.rules.read();
        let metered = rules.metered_ifaces.contains(iface);
        let uid_rules = rules.uid_rules.get(&uid).copied().unwrap_or(RULE_ALLOW_ALL);
        metered && (uid_rules & RULE_REJECT_METERED) != 0
    }

    pub fn restrict_background(&self) -> bool {
        self.rules.read().restrict_background
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        self.rules.read().clone()
    }
}

impl PolicyObserver for PolicyListener {
    fn on_uid_rules_changed(&self, uid: u32, rules: u32) {
        let mut snapshot = self.rules.write();
        let old = snapshot.uid_rules.get(&uid).copied().unwrap_or(RULE_ALLOW_ALL);
        if old == rules {
            return;
        }
        tracing::debug!(uid, rules, "Uid rules changed");
        if rules == RULE_ALLOW_ALL {
            snapshot.uid_rules.remove(&uid);
        } else {
            snapshot.uid_rules.insert(uid, rules);
        }
    }

    fn on_metered_ifaces_changed(&self, ifaces: Vec<String>) {
        tracing::debug!(?ifaces, "Metered interfaces changed");
        self.rules.write().metered_ifaces = ifaces.into_iter().collect();
    }

    fn on_restrict_background_changed(&self, restrict: bool) {
        {
            let mut snapshot = self.rules.write();
            if snapshot.restrict_background == restrict {
                return;
            }
            snapshot.restrict_background = restrict;
        }
        // Global background policy changes are radical; re-announce the
        // active network.
        if self.tx.send(Message::RestrictBackgroundChanged(restrict)).is_err() {
            tracing::debug!("Orchestrator gone, background restriction not announced");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_needs_metered_iface_and_reject_rule() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let policy = PolicyListener::new(tx);

        policy.on_uid_rules_changed(10_001, RULE_REJECT_METERED);
        assert!(!policy.is_blocked(10_001, Some("wwan0")));

        policy.on_metered_ifaces_changed(vec!["wwan0".to_string()]);
        assert!(policy.is_blocked(10_001, Some("wwan0")));
        assert!(!policy.is_blocked(10_002, Some("wwan0")));
        assert!(!policy.is_blocked(10_001, Some("wlan0")));
        assert!(!policy.is_blocked(10_001, None));

        policy.on_uid_rules_changed(10_001, RULE_ALLOW_ALL);
        assert!(!policy.is_blocked(10_001, Some("wwan0")));
        assert!(policy.snapshot().uid_rules.is_empty());
    }

    #[test]
    fn test_restrict_background_posts_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let policy = PolicyListener::new(tx);

        policy.on_restrict_background_changed(true);
        policy.on_restrict_background_changed(true);
        assert!(policy.restrict_background());
        assert!(matches!(rx.try_recv(), Ok(Message::RestrictBackgroundChanged(true))));
        assert!(rx.try_recv().is_err());
    }
}
