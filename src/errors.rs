use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelloError {
    #[error("no response to \"{command}\" after {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("drone rejected \"{command}\": {response}")]
    DroneRejected { command: String, response: String },

    #[error("protocol error: {msg}")]
    ProtocolError { msg: String },

    #[error("\"{command}\" cancelled, connection closed")]
    Cancelled { command: String },

    #[error("not connected")]
    NotConnected,

    #[error("WiFi not connected")]
    WiFiNotConnected,

    #[error("config error: {0}")]
    ConfigError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{msg}")]
    Generic { msg: String },
}

impl TelloError {
    /// Failures that start the abort sequence unless an error interceptor
    /// decides otherwise.
    pub fn triggers_abort(&self) -> bool {
        matches!(
            self,
            TelloError::Timeout { .. } | TelloError::DroneRejected { .. } | TelloError::ProtocolError { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TelloError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_command_failures_trigger_abort() {
        let timeout = TelloError::Timeout { command: "takeoff".into(), after: Duration::from_secs(1) };
        let rejected = TelloError::DroneRejected { command: "land".into(), response: "error".into() };
        let protocol = TelloError::ProtocolError { msg: "garbage".into() };

        assert!(timeout.triggers_abort());
        assert!(rejected.triggers_abort());
        assert!(protocol.triggers_abort());

        assert!(!TelloError::Cancelled { command: "cw 90".into() }.triggers_abort());
        assert!(!TelloError::NotConnected.triggers_abort());
        assert!(!TelloError::WiFiNotConnected.triggers_abort());
    }

    #[test]
    fn rejection_message_carries_drone_text() {
        let err = TelloError::DroneRejected { command: "flip l".into(), response: "error No valid imu".into() };
        assert_eq!(err.to_string(), "drone rejected \"flip l\": error No valid imu");
    }

    #[test]
    fn every_variant_describes_itself() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let config = toml::from_str::<toml::Value>("=").unwrap_err();

        let errors = [
            TelloError::Timeout { command: "takeoff".into(), after: Duration::from_secs(10) },
            TelloError::DroneRejected { command: "land".into(), response: "error".into() },
            TelloError::ProtocolError { msg: "garbage".into() },
            TelloError::Cancelled { command: "cw 90".into() },
            TelloError::NotConnected,
            TelloError::WiFiNotConnected,
            TelloError::ConfigError(config),
            TelloError::IoError(io),
            TelloError::Generic { msg: "oops".into() },
        ];

        for err in &errors {
            // new variants must be added above
            match err {
                TelloError::Timeout { .. }
                | TelloError::DroneRejected { .. }
                | TelloError::ProtocolError { .. }
                | TelloError::Cancelled { .. }
                | TelloError::NotConnected
                | TelloError::WiFiNotConnected
                | TelloError::ConfigError(_)
                | TelloError::IoError(_)
                | TelloError::Generic { .. } => assert!(!err.to_string().is_empty()),
            }
        }
    }
}
