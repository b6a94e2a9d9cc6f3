use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Tunables of an interface. Missing keys take their defaults.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Restart timer period in milliseconds.
    pub restart_interval_ms: u64,
    /// Configure-Requests sent before giving up.
    pub max_request: u32,
    /// Terminate-Requests sent before giving up.
    pub max_terminate: u32,
    /// Configure-Naks sent before rejecting instead.
    pub max_nak: u32,
    /// The MRU we request. 1500 is the default and not requested.
    pub mru: u16,
    /// Peer MRUs below this are naked.
    pub min_peer_mru: u16,
    /// Redial after the carrier of an established connection is lost.
    pub auto_reconnect: bool,
    /// Failed connection attempts retried before giving up.
    pub connect_retries_limit: u32,
    /// Delay before a redial in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Close an established connection without data traffic for this many
    /// milliseconds. 0 never closes.
    pub disconnect_after_idle_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            restart_interval_ms: 3000,
            max_request: 10,
            max_terminate: 2,
            max_nak: 5,
            mru: 1500,
            min_peer_mru: 1492,
            auto_reconnect: false,
            connect_retries_limit: 0,
            reconnect_delay_ms: 1000,
            disconnect_after_idle_ms: 0,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config = serde_json::from_reader(BufReader::new(file))?;

        Ok(config)
    }

    pub fn restart_interval(&self) -> Duration {
        Duration::from_millis(self.restart_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn disconnect_after_idle(&self) -> Option<Duration> {
        match self.disconnect_after_idle_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
