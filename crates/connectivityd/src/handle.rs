//! Public entry point into a running orchestrator.
//!
//! Permission checks run here, on the caller's task, before anything is
//! queued. Getters read the shared state directly; everything that
//! mutates goes through the orchestrator inbox.

use crate::broadcast::Broadcast;
use crate::error::{ConnectivityError, Result};
use crate::feature::{convert_feature_to_network_type, ClientHandle, ClientSession, FeatureOutcome, FeatureRequest};
use crate::orchestrator::{Message, OrchestratorDump, Shared};
use crate::permissions::{Caller, Permission};
use crate::policy::PolicyObserver;
use conn_types::{NetworkInfo, NetworkType, ProxyInfo};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Cloneable handle to the connectivity service.
#[derive(Clone)]
pub struct ConnectivityHandle {
    tx: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    next_client: Arc<AtomicU64>,
}

impl ConnectivityHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Message>, shared: Arc<Shared>) -> Self {
        Self {
            tx,
            shared,
            next_client: Arc::new(AtomicU64::new(1)),
        }
    }

    fn post(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| ConnectivityError::ServiceStopped)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Message) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.post(make(reply))?;
        rx.await.map_err(|_| ConnectivityError::ServiceStopped)
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Opens a client session. Feature requests made through it are
    /// released when it is dropped.
    pub fn open_session(&self, caller: Caller) -> ClientSession {
        let client = ClientHandle::new(self.next_client.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(client = %client, pid = caller.pid, uid = caller.uid, "Client session opened");
        ClientSession::new(self.clone(), client, caller)
    }

    pub fn active_network_info(&self, caller: &Caller) -> Result<Option<NetworkInfo>> {
        caller.enforce(Permission::AccessNetworkState)?;
        Ok(self.shared.active_info(caller.uid))
    }

    pub fn network_info(&self, caller: &Caller, network_type: NetworkType) -> Result<Option<NetworkInfo>> {
        caller.enforce(Permission::AccessNetworkState)?;
        Ok(self.shared.filtered_info(network_type, caller.uid))
    }

    pub fn all_network_info(&self, caller: &Caller) -> Result<Vec<NetworkInfo>> {
        caller.enforce(Permission::AccessNetworkState)?;
        Ok(self.shared.all_info(caller.uid))
    }

    pub fn set_network_preference(&self, caller: &Caller, preference: NetworkType) -> Result<()> {
        caller.enforce(Permission::ChangeNetworkState)?;
        self.post(Message::SetNetworkPreference(preference))
    }

    pub fn network_preference(&self, caller: &Caller) -> Result<NetworkType> {
        caller.enforce(Permission::AccessNetworkState)?;
        Ok(self.shared.published().network_preference)
    }

    pub(crate) async fn start_using_network_feature(
        &self,
        caller: &Caller,
        client: ClientHandle,
        network_type: NetworkType,
        feature: &str,
    ) -> Result<FeatureOutcome> {
        caller.enforce(Permission::ChangeNetworkState)?;
        let used = convert_feature_to_network_type(network_type, feature);
        if self.shared.is_protected(used) {
            caller.enforce(Permission::ConnectivityInternal)?;
        }
        let request = FeatureRequest {
            network_type,
            feature: feature.to_string(),
            pid: caller.pid,
            uid: caller.uid,
            client,
        };
        self.request(|reply| Message::StartFeature { request, reply })
            .await
    }

    pub(crate) async fn stop_using_network_feature(
        &self,
        caller: &Caller,
        network_type: NetworkType,
        feature: &str,
    ) -> Result<bool> {
        caller.enforce(Permission::ChangeNetworkState)?;
        let (pid, uid, feature) = (caller.pid, caller.uid, feature.to_string());
        self.request(|reply| Message::StopFeature {
            pid,
            uid,
            network_type,
            feature,
            reply,
        })
        .await
    }

    /// Session drop path; a stopped service has nothing left to release.
    pub(crate) fn report_client_gone(&self, client: ClientHandle) {
        if self.post(Message::ClientGone(client)).is_err() {
            tracing::debug!(client = %client, "Service stopped before client cleanup");
        }
    }

    /// Liveness-loss path for clients tracked outside a [`ClientSession`].
    pub fn report_client_died(&self, client: ClientHandle) -> Result<()> {
        tracing::info!(client = %client, "Client died");
        self.post(Message::ClientGone(client))
    }

    /// Installs a host route to `address` (4 or 16 raw bytes) on
    /// `network_type`. Malformed addresses yield false.
    pub async fn request_route_to_host_address(
        &self,
        caller: &Caller,
        network_type: NetworkType,
        address: &[u8],
    ) -> Result<bool> {
        caller.enforce(Permission::ChangeNetworkState)?;
        let address = match address.len() {
            4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(address);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(address);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            len => {
                tracing::warn!(len, "Malformed host address");
                return Ok(false);
            }
        };
        self.request(|reply| Message::RequestRouteToHost {
            network_type,
            address,
            reply,
        })
        .await
    }

    pub fn set_mobile_data_enabled(&self, caller: &Caller, enabled: bool) -> Result<()> {
        caller.enforce(Permission::ChangeNetworkState)?;
        self.post(Message::SetMobileData(enabled))
    }

    pub fn mobile_data_enabled(&self, caller: &Caller) -> Result<bool> {
        caller.enforce(Permission::AccessNetworkState)?;
        Ok(self.shared.published().mobile_data_enabled)
    }

    /// Policy engine data gate for one network type.
    pub fn set_policy_data_enable(&self, caller: &Caller, network_type: NetworkType, enabled: bool) -> Result<()> {
        caller.enforce(Permission::ConnectivityInternal)?;
        self.post(Message::SetPolicyDataEnable {
            network_type,
            enabled,
        })
    }

    /// Reports connection quality (0..=100) of `network_type`.
    pub fn report_inet_condition(&self, caller: &Caller, network_type: NetworkType, percentage: u8) -> Result<()> {
        caller.enforce(Permission::StatusBar)?;
        self.post(Message::ReportInetCondition {
            network_type,
            percentage: percentage.min(100),
        })
    }

    pub fn set_global_proxy(&self, caller: &Caller, proxy: Option<ProxyInfo>) -> Result<()> {
        caller.enforce(Permission::ConnectivityInternal)?;
        self.post(Message::SetGlobalProxy(proxy))
    }

    pub fn global_proxy(&self, caller: &Caller) -> Result<Option<ProxyInfo>> {
        caller.enforce(Permission::AccessNetworkState)?;
        Ok(self.shared.global_proxy())
    }

    pub fn proxy(&self, caller: &Caller) -> Result<Option<ProxyInfo>> {
        caller.enforce(Permission::AccessNetworkState)?;
        Ok(self.shared.proxy())
    }

    /// Pins the global resolvers (VPN) or releases them with None.
    pub fn set_dns_override(&self, caller: &Caller, servers: Option<Vec<IpAddr>>) -> Result<()> {
        caller.enforce(Permission::ConnectivityInternal)?;
        self.post(Message::SetDnsOverride(servers))
    }

    pub fn system_ready(&self) -> Result<()> {
        self.post(Message::SystemReady)
    }

    /// Subscribes to broadcasts; the latest sticky ones are replayed first.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Broadcast> {
        self.shared.broadcasts().subscribe()
    }

    /// Where the policy engine delivers its notifications.
    pub fn policy_observer(&self) -> Arc<dyn PolicyObserver> {
        self.shared.policy().clone()
    }

    /// Snapshot taken by the orchestrator task, after every message queued
    /// before it has been handled.
    pub async fn dump(&self) -> Result<OrchestratorDump> {
        self.request(Message::Dump).await
    }

    pub fn shutdown(&self) -> Result<()> {
        self.post(Message::Shutdown)
    }
}
