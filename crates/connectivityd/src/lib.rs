//! connectivityd: connectivity orchestration daemon.
//!
//! Arbitrates which of several network types (ethernet, wifi, mobile, ...)
//! carries default traffic, fails over when the default network drops,
//! keeps routes and resolvers in step with each network's link properties
//! and brings specialized networks (MMS, SUPL, DUN, ...) up on request.
//!
//! - [`tracker`]: per-type state trackers and their factories
//! - [`orchestrator`]: the single-task state machine
//! - [`reconciler`]: route and host-route reconciliation
//! - [`feature`]: feature users and client sessions
//! - [`handle`]: the public, permission-checked API
//! - [`service`]: wiring it all together

pub mod broadcast;
pub mod config;
pub mod error;
pub mod feature;
pub mod handle;
pub mod orchestrator;
pub mod permissions;
pub mod policy;
pub mod reconciler;
pub mod service;
pub mod tracker;
pub mod transport;
pub mod watcher;

pub use broadcast::{Broadcast, BroadcastHub, ChangeKind, ConnectivityChange};
pub use config::{DaemonConfig, DEFAULT_CONFIG_PATH};
pub use error::{ConfigError, ConnectivityError, Result, TrackerError, TransportError, WatcherError};
pub use feature::{ClientHandle, ClientSession, FeatureOutcome};
pub use handle::ConnectivityHandle;
pub use orchestrator::{Orchestrator, OrchestratorDump};
pub use permissions::{Caller, Permission};
pub use policy::{PolicyObserver, RULE_ALLOW_ALL, RULE_REJECT_METERED};
pub use service::Service;
pub use tracker::{FactoryRegistry, NetworkStateTracker, TrackerDriver, TrackerEvent};
pub use transport::{IpCommandTransport, NetdTransport, RecordingTransport, ResetMask, TransportCall};
pub use watcher::InterfaceWatcher;
