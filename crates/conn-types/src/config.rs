//! Static per-type descriptors, loaded once at startup.

use crate::{NetworkType, RadioFamily};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Describes one radio family and how many of its networks may be up at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioAttributes {
    pub family: RadioFamily,
    pub simultaneity: u32,
}

impl RadioAttributes {
    pub fn new(family: RadioFamily, simultaneity: u32) -> Self {
        Self {
            family,
            simultaneity,
        }
    }
}

/// Immutable descriptor of a network type.
///
/// Lower `priority` numbers are more preferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub network_type: NetworkType,
    pub radio: RadioFamily,
    pub priority: u32,
    pub is_default: bool,
    /// Auto-expiry for feature requests on this type; negative disables it.
    pub restore_time_ms: i64,
    /// Feature requests for this type need the internal permission.
    pub protected: bool,
}

impl NetworkConfig {
    pub fn new(network_type: NetworkType, radio: RadioFamily, priority: u32, is_default: bool) -> Self {
        Self {
            name: network_type.name().to_string(),
            network_type,
            radio,
            priority,
            is_default,
            restore_time_ms: -1,
            protected: false,
        }
    }

    pub fn with_restore_time(mut self, restore_time_ms: i64) -> Self {
        self.restore_time_ms = restore_time_ms;
        self
    }

    pub fn with_protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }
}

impl fmt::Display for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: type {} radio {} priority {} default {} restore {}ms",
            self.name, self.network_type, self.radio, self.priority, self.is_default, self.restore_time_ms
        )
    }
}
