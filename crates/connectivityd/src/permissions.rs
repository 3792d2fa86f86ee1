//! Caller identity and permission checks.
//!
//! Checks run synchronously on the caller's task, before anything is
//! posted to the orchestrator queue.

use crate::error::{ConnectivityError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    /// Read connectivity state.
    AccessNetworkState,
    /// Change preferences, request features and host routes.
    ChangeNetworkState,
    /// Protected features, global proxy, DNS override, policy data gates.
    ConnectivityInternal,
    /// Report connectivity quality.
    StatusBar,
}

impl Permission {
    pub const ALL: [Permission; 4] = [
        Permission::AccessNetworkState,
        Permission::ChangeNetworkState,
        Permission::ConnectivityInternal,
        Permission::StatusBar,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            Permission::AccessNetworkState => "ACCESS_NETWORK_STATE",
            Permission::ChangeNetworkState => "CHANGE_NETWORK_STATE",
            Permission::ConnectivityInternal => "CONNECTIVITY_INTERNAL",
            Permission::StatusBar => "STATUS_BAR",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of whoever is calling into the public API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub pid: u32,
    pub uid: u32,
    permissions: BTreeSet<Permission>,
}

impl Caller {
    /// A caller with no permissions.
    pub fn new(pid: u32, uid: u32) -> Self {
        Self {
            pid,
            uid,
            permissions: BTreeSet::new(),
        }
    }

    /// A fully privileged caller (the daemon itself, root tools).
    pub fn system(pid: u32) -> Self {
        Self {
            pid,
            uid: 0,
            permissions: Permission::ALL.into_iter().collect(),
        }
    }

    /// The usual application grant: read state and request changes.
    pub fn app(pid: u32, uid: u32) -> Self {
        Self::new(pid, uid)
            .with(Permission::AccessNetworkState)
            .with(Permission::ChangeNetworkState)
    }

    pub fn with(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Fails with [`ConnectivityError::PermissionDenied`] unless granted.
    pub fn enforce(&self, permission: Permission) -> Result<()> {
        if self.has(permission) {
            Ok(())
        } else {
            tracing::warn!(pid = self.pid, uid = self.uid, %permission, "Permission denied");
            Err(ConnectivityError::PermissionDenied {
                permission,
                pid: self.pid,
                uid: self.uid,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_grant() {
        let caller = Caller::app(100, 10001);
        assert!(caller.enforce(Permission::AccessNetworkState).is_ok());
        assert!(caller.enforce(Permission::ChangeNetworkState).is_ok());
        assert!(matches!(
            caller.enforce(Permission::ConnectivityInternal),
            Err(ConnectivityError::PermissionDenied {
                permission: Permission::ConnectivityInternal,
                pid: 100,
                uid: 10001
            })
        ));
    }

    #[test]
    fn test_system_has_everything() {
        let caller = Caller::system(1);
        assert!(Permission::ALL.iter().all(|p| caller.has(*p)));
        assert_eq!(caller.uid, 0);
    }
}
