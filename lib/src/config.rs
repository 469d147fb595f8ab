// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device connection configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use ledger_btc_apdu::frame::{DEFAULT_CHANNEL, DEFAULT_PACKET_SIZE};

/// Configuration for a connected device
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Timeout for APDU requests
    pub request_timeout: Duration,

    /// Timeout for requests awaiting user confirmation
    pub user_timeout: Duration,

    /// Transport packet size
    pub packet_size: usize,

    /// Frame channel identifier
    pub channel: u16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(2),
            user_timeout: Duration::from_secs(60),
            packet_size: DEFAULT_PACKET_SIZE,
            channel: DEFAULT_CHANNEL,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_config() {
        let c: DeviceConfig =
            serde_json::from_str(r#"{ "user_timeout": { "secs": 5, "nanos": 0 } }"#).unwrap();

        assert_eq!(c.user_timeout, Duration::from_secs(5));
        assert_eq!(c.request_timeout, DeviceConfig::default().request_timeout);
        assert_eq!(c.packet_size, 64);
    }
}
