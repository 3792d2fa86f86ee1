//! Client liveness.
//!
//! Every feature user is bound to the [`ClientHandle`] of the session that
//! started it. Dropping the [`ClientSession`] reports the client gone;
//! [`crate::ConnectivityHandle::report_client_died`] does the same for
//! clients tracked elsewhere. Both end in the same cleanup.

use crate::error::Result;
use crate::feature::FeatureOutcome;
use crate::handle::ConnectivityHandle;
use crate::permissions::Caller;
use conn_types::NetworkType;
use serde::Serialize;
use std::fmt;

/// Opaque identity of one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClientHandle(u64);

impl ClientHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// A client's connection to the daemon. Feature requests made through it
/// are released when it is dropped.
pub struct ClientSession {
    handle: ConnectivityHandle,
    client: ClientHandle,
    caller: Caller,
}

impl ClientSession {
    pub(crate) fn new(handle: ConnectivityHandle, client: ClientHandle, caller: Caller) -> Self {
        Self {
            handle,
            client,
            caller,
        }
    }

    pub fn client(&self) -> ClientHandle {
        self.client
    }

    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    pub async fn start_using_network_feature(
        &self,
        network_type: NetworkType,
        feature: &str,
    ) -> Result<FeatureOutcome> {
        self.handle
            .start_using_network_feature(&self.caller, self.client, network_type, feature)
            .await
    }

    /// Releases this caller's request. Returns false when there was no
    /// live request to release.
    pub async fn stop_using_network_feature(&self, network_type: NetworkType, feature: &str) -> Result<bool> {
        self.handle
            .stop_using_network_feature(&self.caller, network_type, feature)
            .await
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        tracing::debug!(client = %self.client, pid = self.caller.pid, "Client session closed");
        self.handle.report_client_gone(self.client);
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("client", &self.client)
            .field("pid", &self.caller.pid)
            .field("uid", &self.caller.uid)
            .finish()
    }
}
