use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::Result;

pub const DEFAULT_DRONE_HOST: &str = "192.168.10.1";

pub const CONTROL_UDP_PORT: u16 = 8889;
pub const STATE_UDP_PORT: u16 = 8890;
pub const VIDEO_UDP_PORT: u16 = 11111;

/// Connection settings, loadable from TOML. Every field is optional in the
/// file and falls back to the drone's factory defaults.
///
/// ```toml
/// drone_host = "192.168.10.1"
/// response_timeout_ms = 7000
/// low_battery_threshold = 25
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TelloConfig {
    pub drone_host: String,
    pub control_port: u16,
    pub local_control_port: u16,
    pub state_port: u16,
    pub video_port: u16,
    pub response_timeout_ms: u64,
    /// Used for `go`, `curve` and `jump`, which can keep the drone busy for
    /// much longer than a simple move.
    pub long_response_timeout_ms: u64,
    pub connect_attempts: u32,
    pub low_battery_threshold: u8,
    pub check_battery_on_connect: bool,
    /// Require replies to begin with the text of the command they answer.
    pub echo_check: bool,
    pub wifi_ssid_prefix: String,
    pub wifi_poll_interval_ms: u64,
}

impl Default for TelloConfig {
    fn default() -> Self {
        Self {
            drone_host: DEFAULT_DRONE_HOST.to_string(),
            control_port: CONTROL_UDP_PORT,
            local_control_port: CONTROL_UDP_PORT,
            state_port: STATE_UDP_PORT,
            video_port: VIDEO_UDP_PORT,
            response_timeout_ms: 10_000,
            long_response_timeout_ms: 30_000,
            connect_attempts: 10,
            low_battery_threshold: 20,
            check_battery_on_connect: true,
            echo_check: false,
            wifi_ssid_prefix: "TELLO".to_string(),
            wifi_poll_interval_ms: 250,
        }
    }
}

impl TelloConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn long_response_timeout(&self) -> Duration {
        Duration::from_millis(self.long_response_timeout_ms)
    }

    pub fn wifi_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wifi_poll_interval_ms)
    }

    pub(crate) fn drone_address(&self) -> String {
        format!("{}:{}", self.drone_host, self.control_port)
    }
}
