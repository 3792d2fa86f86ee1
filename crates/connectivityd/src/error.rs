//! Error types for connectivityd.

use crate::permissions::Permission;
use conn_common::ShellError;
use conn_types::NetworkType;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level errors surfaced to callers of the public API.
///
/// Connection failures never show up here; they are reported through
/// broadcasts.
#[derive(Debug, Error)]
pub enum ConnectivityError {
    /// The caller lacks a required permission.
    #[error("Permission denied: pid {pid} uid {uid} lacks {permission}")]
    PermissionDenied {
        permission: Permission,
        pid: u32,
        uid: u32,
    },

    /// The orchestrator task is no longer running.
    #[error("Connectivity service stopped")]
    ServiceStopped,

    /// A state invariant was broken while applying configuration.
    #[error("State invariant violated: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Result type alias for connectivityd operations.
pub type Result<T> = std::result::Result<T, ConnectivityError>;

/// Failure of a route, resolver or socket command.
///
/// Always logged and swallowed by the reconciler.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Shell(#[from] ShellError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Injected or otherwise synthetic failure.
    #[error("{operation} rejected: {message}")]
    Rejected { operation: String, message: String },
}

impl TransportError {
    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Failure on the interface watcher's rtnetlink socket.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Netlink {operation} failed: {source}")]
    Socket {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Failed to decode netlink message: {0}")]
    Decode(String),
}

impl WatcherError {
    pub fn socket(operation: &'static str, source: io::Error) -> Self {
        Self::Socket { operation, source }
    }

    /// True when the kernel dropped multicast messages for this socket.
    pub fn is_overrun(&self) -> bool {
        matches!(self, Self::Socket { source, .. } if source.raw_os_error() == Some(libc::ENOBUFS))
    }
}

/// Failure to construct a tracker at startup.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("No tracker factory registered for radio family {0}")]
    NoFactory(conn_types::RadioFamily),

    #[error("Network type {network_type} is not supported by the {family} factory")]
    Unsupported {
        network_type: NetworkType,
        family: conn_types::RadioFamily,
    },

    #[error("Tracker for {network_type} is misconfigured: {message}")]
    Misconfigured {
        network_type: NetworkType,
        message: String,
    },
}

/// Configuration load and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_display() {
        let err = ConnectivityError::PermissionDenied {
            permission: Permission::ChangeNetworkState,
            pid: 100,
            uid: 10001,
        };
        assert_eq!(
            err.to_string(),
            "Permission denied: pid 100 uid 10001 lacks CHANGE_NETWORK_STATE"
        );
    }

    #[test]
    fn test_config_invalid_display() {
        let err = ConfigError::invalid("network[2].radio", "undeclared radio family wimax");
        assert!(err.to_string().contains("network[2].radio"));
    }

    #[test]
    fn test_tracker_error_converts() {
        let err: ConnectivityError = TrackerError::Misconfigured {
            network_type: NetworkType::Ethernet,
            message: "no interface".into(),
        }
        .into();
        assert!(matches!(err, ConnectivityError::Tracker(_)));
    }
}
