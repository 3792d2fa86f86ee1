//! Daemon configuration, loaded from TOML.
//!
//! Default location: /etc/connectivityd/connectivityd.toml. Every field
//! has a default, so a missing file yields a usable ethernet/wifi/mobile
//! setup.

use crate::error::ConfigError;
use conn_common::shell;
use conn_types::{NetworkConfig, NetworkType, RadioAttributes, RadioFamily};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/connectivityd/connectivityd.toml";

/// Restore time used for feature types that do not configure one.
pub const RESTORE_DEFAULT_NETWORK_DELAY_MS: i64 = 60_000;

/// Orchestrator timing and defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSection {
    /// Debounce before a connectivity change is broadcast.
    #[serde(default = "default_connectivity_change_delay")]
    pub connectivity_change_delay_ms: u64,

    /// Hold time for an improving inet condition.
    #[serde(default = "default_inet_up_delay")]
    pub inet_condition_debounce_up_ms: u64,

    /// Hold time for a degrading inet condition.
    #[serde(default = "default_inet_down_delay")]
    pub inet_condition_debounce_down_ms: u64,

    /// Overrides every per-type restore time when set.
    #[serde(default)]
    pub restore_default_network_delay_ms: Option<i64>,

    /// Resolver used when the default network provides none.
    #[serde(default = "default_dns")]
    pub default_dns: IpAddr,

    #[serde(default = "default_network_preference")]
    pub network_preference: NetworkType,

    #[serde(default = "default_true")]
    pub mobile_data_enabled: bool,

    /// Log a warning when this many messages are queued.
    #[serde(default = "default_queue_warn_depth")]
    pub event_queue_warn_depth: usize,

    /// Period of the interface watcher's full netlink re-dump. Multicast
    /// events drive it in between.
    #[serde(default = "default_resync_interval")]
    pub resync_interval_ms: u64,
}

/// Command paths and tables used by the shell transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSection {
    #[serde(default = "default_ip_cmd")]
    pub ip_cmd: String,

    #[serde(default = "default_resolvectl_cmd")]
    pub resolvectl_cmd: String,

    #[serde(default = "default_ss_cmd")]
    pub ss_cmd: String,

    #[serde(default = "default_iptables_cmd")]
    pub iptables_cmd: String,

    /// Routing table for routes of non-default networks.
    #[serde(default = "default_secondary_table")]
    pub secondary_table: u32,

    /// Where per-process resolver bindings are published.
    #[serde(default = "default_pid_dns_dir")]
    pub pid_dns_dir: PathBuf,
}

/// One `[[radio]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioEntry {
    pub family: RadioFamily,
    #[serde(default = "default_simultaneity")]
    pub simultaneity: u32,
}

/// One `[[network]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEntry {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "type")]
    pub network_type: NetworkType,

    pub radio: RadioFamily,

    /// Lower is more preferred.
    pub priority: u32,

    /// Eligible to become the default network.
    #[serde(default)]
    pub default: bool,

    /// Feature auto-expiry; negative disables it.
    #[serde(default = "default_restore_time")]
    pub restore_time_ms: i64,

    #[serde(default)]
    pub interface: Option<String>,

    /// Static resolvers for link-driven trackers.
    #[serde(default)]
    pub dns: Vec<IpAddr>,

    #[serde(default)]
    pub protected: bool,

    /// Data-activity idle timer; 0 disables it.
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

impl NetworkEntry {
    fn new(network_type: NetworkType, radio: RadioFamily, priority: u32, default: bool) -> Self {
        Self {
            name: None,
            network_type,
            radio,
            priority,
            default,
            restore_time_ms: default_restore_time(),
            interface: None,
            dns: Vec::new(),
            protected: false,
            idle_timeout_secs: 0,
        }
    }

    fn with_interface(mut self, iface: &str) -> Self {
        self.interface = Some(iface.to_string());
        self
    }

    pub fn to_network_config(&self) -> NetworkConfig {
        let mut cfg = NetworkConfig::new(self.network_type, self.radio, self.priority, self.default)
            .with_restore_time(self.restore_time_ms)
            .with_protected(self.protected);
        if let Some(name) = &self.name {
            cfg.name = name.clone();
        }
        cfg
    }
}

/// Complete connectivityd configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub daemon: DaemonSection,

    #[serde(default)]
    pub transport: TransportSection,

    #[serde(default = "default_radios")]
    pub radio: Vec<RadioEntry>,

    #[serde(default = "default_networks")]
    pub network: Vec<NetworkEntry>,
}

fn default_connectivity_change_delay() -> u64 {
    3000
}

fn default_inet_up_delay() -> u64 {
    500
}

fn default_inet_down_delay() -> u64 {
    3000
}

fn default_dns() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))
}

fn default_network_preference() -> NetworkType {
    NetworkType::Wifi
}

fn default_true() -> bool {
    true
}

fn default_queue_warn_depth() -> usize {
    64
}

fn default_resync_interval() -> u64 {
    60_000
}

fn default_ip_cmd() -> String {
    shell::IP_CMD.to_string()
}

fn default_resolvectl_cmd() -> String {
    shell::RESOLVECTL_CMD.to_string()
}

fn default_ss_cmd() -> String {
    shell::SS_CMD.to_string()
}

fn default_iptables_cmd() -> String {
    shell::IPTABLES_CMD.to_string()
}

fn default_secondary_table() -> u32 {
    1000
}

fn default_pid_dns_dir() -> PathBuf {
    PathBuf::from("/run/connectivityd/pid-dns")
}

fn default_simultaneity() -> u32 {
    1
}

fn default_restore_time() -> i64 {
    RESTORE_DEFAULT_NETWORK_DELAY_MS
}

fn default_radios() -> Vec<RadioEntry> {
    [
        (RadioFamily::Ethernet, 1),
        (RadioFamily::Wifi, 1),
        (RadioFamily::Mobile, 3),
        (RadioFamily::Bluetooth, 1),
    ]
    .into_iter()
    .map(|(family, simultaneity)| RadioEntry {
        family,
        simultaneity,
    })
    .collect()
}

fn default_networks() -> Vec<NetworkEntry> {
    vec![
        NetworkEntry::new(NetworkType::Ethernet, RadioFamily::Ethernet, 5, true).with_interface("eth0"),
        NetworkEntry::new(NetworkType::Wifi, RadioFamily::Wifi, 10, true).with_interface("wlan0"),
        NetworkEntry::new(NetworkType::Mobile, RadioFamily::Mobile, 20, true).with_interface("wwan0"),
        NetworkEntry::new(NetworkType::MobileMms, RadioFamily::Mobile, 30, false),
        NetworkEntry::new(NetworkType::MobileSupl, RadioFamily::Mobile, 30, false),
        NetworkEntry::new(NetworkType::MobileDun, RadioFamily::Mobile, 30, false),
        NetworkEntry::new(NetworkType::MobileHipri, RadioFamily::Mobile, 30, false),
        NetworkEntry::new(NetworkType::Bluetooth, RadioFamily::Bluetooth, 40, true).with_interface("bnep0"),
    ]
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            connectivity_change_delay_ms: default_connectivity_change_delay(),
            inet_condition_debounce_up_ms: default_inet_up_delay(),
            inet_condition_debounce_down_ms: default_inet_down_delay(),
            restore_default_network_delay_ms: None,
            default_dns: default_dns(),
            network_preference: default_network_preference(),
            mobile_data_enabled: true,
            event_queue_warn_depth: default_queue_warn_depth(),
            resync_interval_ms: default_resync_interval(),
        }
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            ip_cmd: default_ip_cmd(),
            resolvectl_cmd: default_resolvectl_cmd(),
            ss_cmd: default_ss_cmd(),
            iptables_cmd: default_iptables_cmd(),
            secondary_table: default_secondary_table(),
            pid_dns_dir: default_pid_dns_dir(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonSection::default(),
            transport: TransportSection::default(),
            radio: default_radios(),
            network: default_networks(),
        }
    }
}

impl DaemonConfig {
    /// Loads and validates `path`, falling back to defaults if it does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document. Does not validate.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Checks the cross-entry invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut families = HashSet::new();
        for (i, radio) in self.radio.iter().enumerate() {
            if !families.insert(radio.family) {
                return Err(ConfigError::invalid(
                    format!("radio[{}].family", i),
                    format!("radio family {} declared twice", radio.family),
                ));
            }
            if radio.simultaneity == 0 {
                return Err(ConfigError::invalid(
                    format!("radio[{}].simultaneity", i),
                    "must be at least 1",
                ));
            }
        }

        let mut types = HashSet::new();
        for (i, net) in self.network.iter().enumerate() {
            if !types.insert(net.network_type) {
                return Err(ConfigError::invalid(
                    format!("network[{}].type", i),
                    format!("more than one entry for {}", net.network_type),
                ));
            }
            if !families.contains(&net.radio) {
                return Err(ConfigError::invalid(
                    format!("network[{}].radio", i),
                    format!("undeclared radio family {}", net.radio),
                ));
            }
            if net.interface.as_deref() == Some("") {
                return Err(ConfigError::invalid(
                    format!("network[{}].interface", i),
                    "must not be empty",
                ));
            }
        }

        if self.network.is_empty() {
            return Err(ConfigError::invalid("network", "at least one network is required"));
        }
        Ok(())
    }

    pub fn network(&self, network_type: NetworkType) -> Option<&NetworkEntry> {
        self.network.iter().find(|n| n.network_type == network_type)
    }

    pub fn network_configs(&self) -> Vec<NetworkConfig> {
        self.network.iter().map(NetworkEntry::to_network_config).collect()
    }

    pub fn radio_attributes(&self) -> Vec<RadioAttributes> {
        self.radio
            .iter()
            .map(|r| RadioAttributes::new(r.family, r.simultaneity))
            .collect()
    }

    /// Network types ordered most preferred first (lowest priority number).
    ///
    /// Entries with equal priority keep their declaration order.
    pub fn priority_list(&self) -> Vec<NetworkType> {
        let mut entries: Vec<&NetworkEntry> = self.network.iter().collect();
        entries.sort_by_key(|n| n.priority);
        entries.into_iter().map(|n| n.network_type).collect()
    }

    /// The configured preference, or the most preferred default-eligible
    /// type when the configured one is missing or not default-eligible.
    pub fn effective_preference(&self) -> Option<NetworkType> {
        let wanted = self.daemon.network_preference;
        if self.network(wanted).is_some_and(|n| n.default) {
            return Some(wanted);
        }
        let fallback = self
            .priority_list()
            .into_iter()
            .find(|t| self.network(*t).is_some_and(|n| n.default));
        if let Some(fallback) = fallback {
            tracing::warn!(
                wanted = %wanted,
                using = %fallback,
                "Preferred network is not a declared default network"
            );
        }
        fallback
    }

    /// Auto-expiry for feature requests on `network_type`.
    pub fn restore_time_ms(&self, network_type: NetworkType) -> i64 {
        if let Some(global) = self.daemon.restore_default_network_delay_ms {
            return global;
        }
        self.network(network_type)
            .map(|n| n.restore_time_ms)
            .unwrap_or(RESTORE_DEFAULT_NETWORK_DELAY_MS)
    }

    pub fn connectivity_change_delay(&self) -> Duration {
        Duration::from_millis(self.daemon.connectivity_change_delay_ms)
    }

    pub fn inet_condition_up_delay(&self) -> Duration {
        Duration::from_millis(self.daemon.inet_condition_debounce_up_ms)
    }

    pub fn inet_condition_down_delay(&self) -> Duration {
        Duration::from_millis(self.daemon.inet_condition_debounce_down_ms)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_millis(self.daemon.resync_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = DaemonConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.daemon.connectivity_change_delay_ms, 3000);
        assert_eq!(config.daemon.default_dns.to_string(), "8.8.8.8");
        assert_eq!(config.effective_preference(), Some(NetworkType::Wifi));
    }

    #[test]
    fn test_priority_list_sorted_by_priority() {
        let config = DaemonConfig::from_toml_str(
            r#"
[[radio]]
family = "wifi"
[[radio]]
family = "mobile"
[[radio]]
family = "ethernet"

[[network]]
type = "wifi"
radio = "wifi"
priority = 10
default = true

[[network]]
type = "mobile"
radio = "mobile"
priority = 20
default = true

[[network]]
type = "ethernet"
radio = "ethernet"
priority = 5
default = true
"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.priority_list(),
            vec![NetworkType::Ethernet, NetworkType::Wifi, NetworkType::Mobile]
        );
    }

    #[test]
    fn test_duplicate_network_type_rejected() {
        let mut config = DaemonConfig::default();
        config.network.push(NetworkEntry::new(NetworkType::Wifi, RadioFamily::Wifi, 99, true));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than one entry for wifi"));
    }

    #[test]
    fn test_undeclared_radio_rejected() {
        let mut config = DaemonConfig::default();
        config.network.push(NetworkEntry::new(NetworkType::Wimax, RadioFamily::Wimax, 50, true));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("undeclared radio family wimax"));
    }

    #[test]
    fn test_preference_falls_back_to_first_default() {
        let mut config = DaemonConfig::default();
        config.daemon.network_preference = NetworkType::MobileMms;
        assert_eq!(config.effective_preference(), Some(NetworkType::Ethernet));
    }

    #[test]
    fn test_restore_time_override() {
        let mut config = DaemonConfig::default();
        assert_eq!(config.restore_time_ms(NetworkType::MobileMms), 60_000);
        config.daemon.restore_default_network_delay_ms = Some(-1);
        assert_eq!(config.restore_time_ms(NetworkType::MobileMms), -1);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[daemon]
connectivity_change_delay_ms = 0
default_dns = "1.1.1.1"

[transport]
secondary_table = 42
"#
        )
        .unwrap();

        let config = DaemonConfig::load_or_default(file.path()).unwrap();
        assert_eq!(config.daemon.connectivity_change_delay_ms, 0);
        assert_eq!(config.daemon.default_dns.to_string(), "1.1.1.1");
        assert_eq!(config.transport.secondary_table, 42);
        // Unspecified sections keep their defaults
        assert_eq!(config.daemon.inet_condition_debounce_up_ms, 500);
        assert_eq!(config.network.len(), 8);
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = DaemonConfig::load_or_default("/nonexistent/connectivityd.toml").unwrap();
        assert_eq!(config.daemon.network_preference, NetworkType::Wifi);
    }

    #[test]
    fn test_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[network]]\ntype = \"token_ring\"\nradio = \"wifi\"\npriority = 1").unwrap();
        assert!(matches!(
            DaemonConfig::load_or_default(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
