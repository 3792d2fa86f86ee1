//! Service bootstrap: trackers, orchestrator task and public handle.

use crate::broadcast::BroadcastHub;
use crate::config::DaemonConfig;
use crate::error::{ConnectivityError, Result};
use crate::handle::ConnectivityHandle;
use crate::orchestrator::Orchestrator;
use crate::policy::PolicyListener;
use crate::tracker::{EventSink, FactoryRegistry, TrackerDriver};
use crate::transport::NetdTransport;
use conn_types::NetworkType;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A running connectivity service.
pub struct Service {
    handle: ConnectivityHandle,
    drivers: BTreeMap<NetworkType, TrackerDriver>,
    task: JoinHandle<()>,
}

impl Service {
    /// Validates `config`, builds every tracker the registry can build and
    /// spawns the orchestrator. Must be called inside a tokio runtime.
    pub fn start(
        config: DaemonConfig,
        registry: &FactoryRegistry,
        transport: Arc<dyn NetdTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let (tx, rx) = mpsc::unbounded_channel();
        let mut trackers = registry.build(&config);
        let mut drivers = BTreeMap::new();
        for tracker in &mut trackers {
            drivers.insert(tracker.network_type(), tracker.core().driver());
            tracker.start_monitoring(EventSink::new(tx.clone()));
        }

        let policy = Arc::new(PolicyListener::new(tx.clone()));
        let broadcasts = Arc::new(BroadcastHub::new());
        let orchestrator = Orchestrator::new(config, trackers, transport, policy, broadcasts);
        let handle = ConnectivityHandle::new(tx, orchestrator.shared());
        let task = tokio::spawn(orchestrator.run(rx));

        tracing::info!(networks = ?drivers.keys().collect::<Vec<_>>(), "Connectivity service started");
        Ok(Self {
            handle,
            drivers,
            task,
        })
    }

    pub fn handle(&self) -> ConnectivityHandle {
        self.handle.clone()
    }

    /// The driver handle of one tracker, for its link or radio monitor.
    pub fn driver(&self, network_type: NetworkType) -> Option<TrackerDriver> {
        self.drivers.get(&network_type).cloned()
    }

    pub fn drivers(&self) -> &BTreeMap<NetworkType, TrackerDriver> {
        &self.drivers
    }

    /// Stops the orchestrator and waits for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        // Already stopped is fine
        let _ = self.handle.shutdown();
        self.task.await.map_err(|e| {
            tracing::error!(error = %e, "Orchestrator task ended abnormally");
            ConnectivityError::ServiceStopped
        })
    }
}
