// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The single line a plugin prints on stdout to tell the host where to connect.
//!
//! Format: `<version>|<KEY>=<VALUE>|<network>|<address>`, for example
//! `1|ZONECTL_PLUGIN_MAGIC_COOKIE=...|tcp|127.0.0.1:40123`.
//!
//! The cookie only guards against a plugin binary being run by hand or a
//! foreign binary being launched as a plugin. It is not authentication.

use std::fmt;
use std::str::FromStr;

use strum::{Display, EnumString};
use zonectl_core::ZonectlError;

/// Wire protocol version spoken by this build.
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the cookie from host to plugin.
pub const MAGIC_COOKIE_KEY: &str = "ZONECTL_PLUGIN_MAGIC_COOKIE";

/// Expected cookie value.
pub const MAGIC_COOKIE_VALUE: &str = "zonectl-3a1f6c2e9d4b7085";

/// Transport a plugin listens on. Only loopback TCP is spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Network {
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub version: u32,
    pub cookie_key: String,
    pub cookie_value: String,
    pub network: Network,
    pub address: String,
}

impl Handshake {
    /// The handshake this build announces for a listener at `address`.
    pub fn announce(network: Network, address: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            cookie_key: MAGIC_COOKIE_KEY.to_string(),
            cookie_value: MAGIC_COOKIE_VALUE.to_string(),
            network,
            address: address.into(),
        }
    }

    /// Checks protocol version and cookie against this build.
    pub fn validate(&self) -> Result<(), ZonectlError> {
        if self.version != PROTOCOL_VERSION {
            return Err(ZonectlError::Handshake(format!(
                "plugin speaks protocol version {}, host speaks {PROTOCOL_VERSION}",
                self.version
            )));
        }
        if self.cookie_key != MAGIC_COOKIE_KEY || self.cookie_value != MAGIC_COOKIE_VALUE {
            return Err(ZonectlError::Handshake(
                "plugin magic cookie does not match, is this a zonectl plugin?".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}={}|{}|{}",
            self.version, self.cookie_key, self.cookie_value, self.network, self.address
        )
    }
}

impl FromStr for Handshake {
    type Err = ZonectlError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let malformed = || ZonectlError::Handshake(format!("malformed handshake line: {line:?}"));

        let mut parts = line.trim_end().splitn(4, '|');
        let (Some(version), Some(cookie), Some(network), Some(address)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };

        let version = version.parse::<u32>().map_err(|_| malformed())?;
        let (cookie_key, cookie_value) = cookie.split_once('=').ok_or_else(malformed)?;
        let network = Network::from_str(network).map_err(|_| {
            ZonectlError::Handshake(format!("unsupported plugin network {network:?}"))
        })?;
        if address.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            version,
            cookie_key: cookie_key.to_string(),
            cookie_value: cookie_value.to_string(),
            network,
            address: address.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_round_trips_through_text() {
        let hs = Handshake::announce(Network::Tcp, "127.0.0.1:40123");
        let line = hs.to_string();
        assert!(line.starts_with("1|ZONECTL_PLUGIN_MAGIC_COOKIE="));
        assert!(line.ends_with("|tcp|127.0.0.1:40123"));
        let parsed: Handshake = line.parse().unwrap();
        assert_eq!(parsed, hs);
        parsed.validate().unwrap();
    }

    #[test]
    fn unix_network_is_rejected_as_unsupported() {
        let err = format!("1|{MAGIC_COOKIE_KEY}={MAGIC_COOKIE_VALUE}|unix|/tmp/plugin.sock")
            .parse::<Handshake>()
            .unwrap_err();
        assert!(matches!(err, ZonectlError::Handshake(_)));
        assert!(err.to_string().contains("unsupported plugin network"));
    }

    #[test]
    fn wrong_cookie_is_a_hard_failure() {
        let parsed: Handshake = format!("1|{MAGIC_COOKIE_KEY}=nope|tcp|127.0.0.1:1")
            .parse()
            .unwrap();
        let err = parsed.validate().unwrap_err();
        assert!(matches!(err, ZonectlError::Handshake(_)));
    }

    #[test]
    fn version_mismatch_is_a_hard_failure() {
        let parsed: Handshake = format!("2|{MAGIC_COOKIE_KEY}={MAGIC_COOKIE_VALUE}|tcp|127.0.0.1:1")
            .parse()
            .unwrap();
        assert!(parsed.validate().unwrap_err().to_string().contains("version 2"));
    }

    #[test]
    fn garbage_is_rejected() {
        for line in ["", "hello world", "x|a=b|tcp|addr", "1|nocookie|tcp|addr", "1|a=b|udp|addr", "1|a=b|tcp|"] {
            assert!(line.parse::<Handshake>().is_err(), "{line:?} should not parse");
        }
    }
}
