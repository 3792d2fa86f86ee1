//! Feature users: client processes holding a specialized network up.
//!
//! A feature ("enableMMS", "enableSUPL", ...) names a purpose that maps onto
//! its own network type. Each start registers a [`FeatureUser`]; the user
//! is dropped on explicit stop, when its client goes away, or when the
//! restore timer fires. The per-type requester pids drive per-process DNS
//! and decide when the specialized network is torn down.

pub mod session;

pub use session::{ClientHandle, ClientSession};

use chrono::{DateTime, Utc};
use conn_types::NetworkType;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub const FEATURE_ENABLE_MMS: &str = "enableMMS";
pub const FEATURE_ENABLE_SUPL: &str = "enableSUPL";
pub const FEATURE_ENABLE_DUN: &str = "enableDUN";
/// Like `enableDUN`, but attempted even while the radio reports unavailable.
pub const FEATURE_ENABLE_DUN_ALWAYS: &str = "enableDUNAlways";
pub const FEATURE_ENABLE_HIPRI: &str = "enableHIPRI";
pub const FEATURE_ENABLE_FOTA: &str = "enableFOTA";
pub const FEATURE_ENABLE_IMS: &str = "enableIMS";
pub const FEATURE_ENABLE_CBS: &str = "enableCBS";
pub const FEATURE_WIFI_P2P: &str = "p2p";

/// Resolves a (type, feature) request to the network type that serves it.
///
/// Unknown combinations map to the requested type itself.
pub fn convert_feature_to_network_type(network_type: NetworkType, feature: &str) -> NetworkType {
    let used = match network_type {
        NetworkType::Mobile => match feature {
            FEATURE_ENABLE_MMS => Some(NetworkType::MobileMms),
            FEATURE_ENABLE_SUPL => Some(NetworkType::MobileSupl),
            FEATURE_ENABLE_DUN | FEATURE_ENABLE_DUN_ALWAYS => Some(NetworkType::MobileDun),
            FEATURE_ENABLE_HIPRI => Some(NetworkType::MobileHipri),
            FEATURE_ENABLE_FOTA => Some(NetworkType::MobileFota),
            FEATURE_ENABLE_IMS => Some(NetworkType::MobileIms),
            FEATURE_ENABLE_CBS => Some(NetworkType::MobileCbs),
            _ => None,
        },
        NetworkType::Wifi if feature == FEATURE_WIFI_P2P => Some(NetworkType::WifiP2p),
        _ => None,
    };
    used.unwrap_or_else(|| {
        tracing::warn!(net_type = %network_type, feature, "No specialized network for feature");
        network_type
    })
}

/// Result of a feature start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureOutcome {
    /// The network is already connected; per-process DNS has been applied.
    AlreadyActive,
    /// The network is connecting or a reconnect was issued.
    RequestStarted,
    RequestFailed,
    TypeNotAvailable,
}

impl fmt::Display for FeatureOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeatureOutcome::AlreadyActive => "already_active",
            FeatureOutcome::RequestStarted => "request_started",
            FeatureOutcome::RequestFailed => "request_failed",
            FeatureOutcome::TypeNotAvailable => "type_not_available",
        };
        f.write_str(s)
    }
}

/// A start request as it reaches the orchestrator.
#[derive(Debug, Clone)]
pub struct FeatureRequest {
    pub network_type: NetworkType,
    pub feature: String,
    pub pid: u32,
    pub uid: u32,
    pub client: ClientHandle,
}

/// One live start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureUser {
    pub id: u64,
    pub network_type: NetworkType,
    pub feature: String,
    pub pid: u32,
    pub uid: u32,
    pub client: ClientHandle,
    pub created: DateTime<Utc>,
}

impl FeatureUser {
    /// Same requester asking for the same thing.
    pub fn is_same_user(&self, other: &FeatureUser) -> bool {
        self.matches(other.pid, other.uid, other.network_type, &other.feature)
    }

    pub fn matches(&self, pid: u32, uid: u32, network_type: NetworkType, feature: &str) -> bool {
        self.pid == pid && self.uid == uid && self.network_type == network_type && self.feature == feature
    }

    /// Age of the request, for the status dump.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created
    }
}

impl fmt::Display for FeatureUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FeatureUser#{} {}({}) pid {} uid {} client {} since {}",
            self.id,
            self.network_type,
            self.feature,
            self.pid,
            self.uid,
            self.client,
            self.created.to_rfc3339()
        )
    }
}

/// Live feature users and the requester pids of each network type.
///
/// Owned by the orchestrator task, so it needs no locking.
#[derive(Debug, Default)]
pub struct FeatureRegistry {
    users: Vec<FeatureUser>,
    requester_pids: BTreeMap<NetworkType, BTreeSet<u32>>,
    next_id: u64,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a user for `request`. Not registered until [`Self::insert`].
    pub fn make_user(&mut self, request: &FeatureRequest) -> FeatureUser {
        self.next_id += 1;
        FeatureUser {
            id: self.next_id,
            network_type: request.network_type,
            feature: request.feature.clone(),
            pid: request.pid,
            uid: request.uid,
            client: request.client,
            created: Utc::now(),
        }
    }

    /// Registers `user`. With `dedup`, an existing identical request
    /// absorbs it and false is returned.
    pub fn insert(&mut self, user: FeatureUser, dedup: bool) -> bool {
        if dedup && self.has_same_user(&user) {
            tracing::debug!(user = %user, "Duplicate feature request absorbed");
            return false;
        }
        self.users.push(user);
        true
    }

    pub fn has_same_user(&self, user: &FeatureUser) -> bool {
        self.users.iter().any(|u| u.is_same_user(user))
    }

    pub fn get(&self, id: u64) -> Option<&FeatureUser> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.get(id).is_some()
    }

    /// First live request matching the tuple.
    pub fn find(&self, pid: u32, uid: u32, network_type: NetworkType, feature: &str) -> Option<u64> {
        self.users
            .iter()
            .find(|u| u.matches(pid, uid, network_type, feature))
            .map(|u| u.id)
    }

    pub fn remove(&mut self, id: u64) -> Option<FeatureUser> {
        let pos = self.users.iter().position(|u| u.id == id)?;
        Some(self.users.remove(pos))
    }

    /// Ids of every user bound to `client`, oldest first.
    pub fn users_of(&self, client: ClientHandle) -> Vec<u64> {
        self.users
            .iter()
            .filter(|u| u.client == client)
            .map(|u| u.id)
            .collect()
    }

    pub fn users(&self) -> &[FeatureUser] {
        &self.users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn add_pid(&mut self, network_type: NetworkType, pid: u32) {
        self.requester_pids.entry(network_type).or_default().insert(pid);
    }

    /// Returns true if the pid was present.
    pub fn remove_pid(&mut self, network_type: NetworkType, pid: u32) -> bool {
        let Some(pids) = self.requester_pids.get_mut(&network_type) else {
            return false;
        };
        let removed = pids.remove(&pid);
        if pids.is_empty() {
            self.requester_pids.remove(&network_type);
        }
        removed
    }

    pub fn pids(&self, network_type: NetworkType) -> Vec<u32> {
        self.requester_pids
            .get(&network_type)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_pid(&self, network_type: NetworkType, pid: u32) -> bool {
        self.requester_pids
            .get(&network_type)
            .is_some_and(|p| p.contains(&pid))
    }

    pub fn has_requesters(&self, network_type: NetworkType) -> bool {
        self.requester_pids.contains_key(&network_type)
    }

    pub fn requester_pids(&self) -> Vec<(NetworkType, Vec<u32>)> {
        self.requester_pids
            .iter()
            .map(|(t, pids)| (*t, pids.iter().copied().collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(pid: u32, feature: &str) -> FeatureRequest {
        FeatureRequest {
            network_type: NetworkType::Mobile,
            feature: feature.to_string(),
            pid,
            uid: 10_000 + pid,
            client: ClientHandle::new(pid.into()),
        }
    }

    #[test]
    fn test_feature_mapping() {
        assert_eq!(
            convert_feature_to_network_type(NetworkType::Mobile, FEATURE_ENABLE_MMS),
            NetworkType::MobileMms
        );
        assert_eq!(
            convert_feature_to_network_type(NetworkType::Mobile, FEATURE_ENABLE_DUN_ALWAYS),
            NetworkType::MobileDun
        );
        assert_eq!(
            convert_feature_to_network_type(NetworkType::Wifi, FEATURE_WIFI_P2P),
            NetworkType::WifiP2p
        );
        assert_eq!(
            convert_feature_to_network_type(NetworkType::Mobile, "enableWAP"),
            NetworkType::Mobile
        );
        assert_eq!(
            convert_feature_to_network_type(NetworkType::Ethernet, FEATURE_ENABLE_MMS),
            NetworkType::Ethernet
        );
    }

    #[test]
    fn test_dedup_only_when_asked() {
        let mut registry = FeatureRegistry::new();
        let a = registry.make_user(&request(100, FEATURE_ENABLE_MMS));
        let b = registry.make_user(&request(100, FEATURE_ENABLE_MMS));
        assert_ne!(a.id, b.id);
        assert!(a.is_same_user(&b));

        assert!(registry.insert(a, true));
        assert!(!registry.insert(b.clone(), true));
        assert_eq!(registry.len(), 1);

        assert!(registry.insert(b, false));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_find_and_remove() {
        let mut registry = FeatureRegistry::new();
        let user = registry.make_user(&request(7, FEATURE_ENABLE_SUPL));
        let id = user.id;
        registry.insert(user, true);

        assert_eq!(registry.find(7, 10_007, NetworkType::Mobile, FEATURE_ENABLE_SUPL), Some(id));
        assert_eq!(registry.find(7, 10_007, NetworkType::Mobile, FEATURE_ENABLE_MMS), None);
        assert_eq!(registry.users_of(ClientHandle::new(7)), vec![id]);

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_requester_pids() {
        let mut registry = FeatureRegistry::new();
        registry.add_pid(NetworkType::MobileMms, 100);
        registry.add_pid(NetworkType::MobileMms, 100);
        registry.add_pid(NetworkType::MobileMms, 200);
        assert_eq!(registry.pids(NetworkType::MobileMms), vec![100, 200]);
        assert!(registry.has_pid(NetworkType::MobileMms, 200));

        assert!(registry.remove_pid(NetworkType::MobileMms, 100));
        assert!(!registry.remove_pid(NetworkType::MobileMms, 100));
        assert!(registry.has_requesters(NetworkType::MobileMms));
        registry.remove_pid(NetworkType::MobileMms, 200);
        assert!(!registry.has_requesters(NetworkType::MobileMms));
        assert!(registry.requester_pids().is_empty());
    }
}
