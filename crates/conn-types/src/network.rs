//! Network type and radio family identifiers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A network type the daemon can track.
///
/// The specialized mobile types (MMS, SUPL, DUN, ...) share the mobile radio
/// but have their own lifecycle; they are brought up on request through
/// network features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    Mobile,
    Wifi,
    MobileMms,
    MobileSupl,
    MobileDun,
    MobileHipri,
    Wimax,
    Bluetooth,
    Dummy,
    Ethernet,
    MobileFota,
    MobileIms,
    MobileCbs,
    WifiP2p,
}

impl NetworkType {
    /// All network types in declaration order.
    pub const ALL: [NetworkType; 14] = [
        NetworkType::Mobile,
        NetworkType::Wifi,
        NetworkType::MobileMms,
        NetworkType::MobileSupl,
        NetworkType::MobileDun,
        NetworkType::MobileHipri,
        NetworkType::Wimax,
        NetworkType::Bluetooth,
        NetworkType::Dummy,
        NetworkType::Ethernet,
        NetworkType::MobileFota,
        NetworkType::MobileIms,
        NetworkType::MobileCbs,
        NetworkType::WifiP2p,
    ];

    /// Returns the stable lowercase name of this type.
    pub const fn name(&self) -> &'static str {
        match self {
            NetworkType::Mobile => "mobile",
            NetworkType::Wifi => "wifi",
            NetworkType::MobileMms => "mobile_mms",
            NetworkType::MobileSupl => "mobile_supl",
            NetworkType::MobileDun => "mobile_dun",
            NetworkType::MobileHipri => "mobile_hipri",
            NetworkType::Wimax => "wimax",
            NetworkType::Bluetooth => "bluetooth",
            NetworkType::Dummy => "dummy",
            NetworkType::Ethernet => "ethernet",
            NetworkType::MobileFota => "mobile_fota",
            NetworkType::MobileIms => "mobile_ims",
            NetworkType::MobileCbs => "mobile_cbs",
            NetworkType::WifiP2p => "wifi_p2p",
        }
    }

    /// Parses a type from its stable name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    /// Returns true for the mobile types that ride on the mobile radio.
    pub const fn is_mobile(&self) -> bool {
        matches!(
            self,
            NetworkType::Mobile
                | NetworkType::MobileMms
                | NetworkType::MobileSupl
                | NetworkType::MobileDun
                | NetworkType::MobileHipri
                | NetworkType::MobileFota
                | NetworkType::MobileIms
                | NetworkType::MobileCbs
        )
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NetworkType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(&s.to_ascii_lowercase())
            .ok_or_else(|| ParseError::UnknownNetworkType(s.to_string()))
    }
}

/// The transport family a tracker drives.
///
/// Tracker factories are registered per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioFamily {
    Mobile,
    Wifi,
    Wimax,
    Bluetooth,
    Dummy,
    Ethernet,
}

impl RadioFamily {
    /// Returns the stable lowercase name of this family.
    pub const fn name(&self) -> &'static str {
        match self {
            RadioFamily::Mobile => "mobile",
            RadioFamily::Wifi => "wifi",
            RadioFamily::Wimax => "wimax",
            RadioFamily::Bluetooth => "bluetooth",
            RadioFamily::Dummy => "dummy",
            RadioFamily::Ethernet => "ethernet",
        }
    }
}

impl fmt::Display for RadioFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RadioFamily {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mobile" => Ok(RadioFamily::Mobile),
            "wifi" => Ok(RadioFamily::Wifi),
            "wimax" => Ok(RadioFamily::Wimax),
            "bluetooth" => Ok(RadioFamily::Bluetooth),
            "dummy" => Ok(RadioFamily::Dummy),
            "ethernet" => Ok(RadioFamily::Ethernet),
            _ => Err(ParseError::UnknownRadioFamily(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        for t in NetworkType::ALL {
            assert_eq!(NetworkType::from_name(t.name()), Some(t));
        }
        assert_eq!(NetworkType::from_name("token_ring"), None);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("WIFI".parse::<NetworkType>().unwrap(), NetworkType::Wifi);
        assert_eq!("Ethernet".parse::<RadioFamily>().unwrap(), RadioFamily::Ethernet);
        assert!("bogus".parse::<RadioFamily>().is_err());
    }

    #[test]
    fn test_mobile_classification() {
        assert!(NetworkType::MobileMms.is_mobile());
        assert!(NetworkType::Mobile.is_mobile());
        assert!(!NetworkType::Wifi.is_mobile());
        assert!(!NetworkType::WifiP2p.is_mobile());
    }
}
