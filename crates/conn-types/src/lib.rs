//! Connectivity data types shared by the orchestration daemon.
//!
//! This crate is pure data, with no I/O:
//!
//! - [`IpPrefix`]: IP network prefixes (CIDR notation) with containment checks
//! - [`NetworkType`] / [`RadioFamily`]: the network kinds the daemon arbitrates between
//! - [`NetworkInfo`]: coarse and detailed connection state of one network
//! - [`LinkProperties`]: interface, addresses, routes, DNS servers and proxy of a link
//! - [`NetworkConfig`] / [`RadioAttributes`]: static per-type descriptors loaded once

mod config;
mod info;
mod ip;
mod link;
mod network;

pub use config::{NetworkConfig, RadioAttributes};
pub use info::{DetailedState, NetworkInfo, State};
pub use ip::IpPrefix;
pub use link::{CompareResult, LinkAddress, LinkProperties, ProxyInfo, RouteInfo};
pub use network::{NetworkType, RadioFamily};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("unknown network type: {0}")]
    UnknownNetworkType(String),

    #[error("unknown radio family: {0}")]
    UnknownRadioFamily(String),

    #[error("invalid proxy specification: {0}")]
    InvalidProxy(String),
}
