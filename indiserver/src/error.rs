//! Error types for the indiserver crate.

use crate::registry::{ClientId, DriverId};

/// Errors that end the broker process.
///
/// Everything here is operator-visible: the binary prints it to stderr and
/// exits with status 1. Per-connection trouble never becomes a `BrokerError`;
/// it is logged and handled by closing or restarting that one connection.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Listening socket could not be set up
    #[error("Failed to listen on port {port}: {source}")]
    Listen {
        /// Port that was requested
        port: u16,
        /// Underlying socket error
        source: std::io::Error,
    },

    /// Accepting a client failed
    #[error("Accept failed: {0}")]
    Accept(std::io::Error),

    /// A driver could not be started or restarted
    #[error("Driver {driver}: {source}")]
    DriverStart {
        /// Driver identity
        driver: String,
        /// Launch failure
        source: LaunchError,
    },

    /// A driver died more often than the configured ceiling allows
    #[error("Driver {driver}: died after {restarts} restarts")]
    RestartLimitExceeded {
        /// Driver identity
        driver: String,
        /// Restarts performed before giving up
        restarts: u32,
    },

    /// Logging could not be initialized
    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),
}

impl BrokerError {
    /// Process exit status for this error. Every fatal error exits 1.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

/// Errors from parsing or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A driver argument could not be understood
    #[error("Invalid driver spec '{spec}': {reason}")]
    InvalidDriverSpec {
        /// The argument as given
        spec: String,
        /// What was wrong with it
        reason: String,
    },

    /// No drivers were named
    #[error("At least one driver is required")]
    NoDrivers,

    /// Read buffer size of zero
    #[error("Read buffer size must be greater than 0")]
    ZeroReadBuffer,
}

/// Errors from starting a driver transport.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Local process could not be spawned
    #[error("spawn failed: {0}")]
    Spawn(std::io::Error),

    /// Spawned process did not expose a piped stream
    #[error("missing piped {0}")]
    MissingPipe(&'static str),

    /// Remote driver could not be reached
    #[error("connect to {address} failed: {source}")]
    Connect {
        /// host:port that was dialed
        address: String,
        /// Underlying socket error
        source: std::io::Error,
    },
}

/// Errors from looking up connections by handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Handle refers to a client slot that has since been closed or reused
    #[error("Stale client handle: {0}")]
    StaleClient(ClientId),

    /// Handle refers to no driver
    #[error("Unknown driver handle: {0}")]
    UnknownDriver(DriverId),
}

/// Well-formed XML that is not a usable INDI request.
///
/// Logged and dropped; the connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("<{tag}> is missing attribute '{attribute}'")]
    MissingAttribute {
        tag: &'static str,
        attribute: &'static str,
    },

    #[error("<{tag}> has invalid value '{value}'")]
    InvalidValue { tag: &'static str, value: String },
}

/// Convenience type alias for Results using BrokerError.
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_display() {
        let error = BrokerError::RestartLimitExceeded {
            driver: "indi_simulator_ccd".to_string(),
            restarts: 4,
        };
        assert_eq!(
            error.to_string(),
            "Driver indi_simulator_ccd: died after 4 restarts"
        );
        assert_eq!(error.exit_code(), 1);

        let error = BrokerError::Configuration(ConfigError::NoDrivers);
        assert_eq!(
            error.to_string(),
            "Configuration error: At least one driver is required"
        );
    }

    #[test]
    fn test_launch_error_display() {
        let error = LaunchError::MissingPipe("stdout");
        assert_eq!(error.to_string(), "missing piped stdout");

        let error = BrokerError::DriverStart {
            driver: "Mount@obs:7624".to_string(),
            source: LaunchError::Connect {
                address: "obs:7624".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            },
        };
        assert_eq!(
            error.to_string(),
            "Driver Mount@obs:7624: connect to obs:7624 failed: refused"
        );
    }

    #[test]
    fn test_protocol_error_display() {
        let error = ProtocolError::InvalidValue {
            tag: "enableBLOB",
            value: "Sometimes".to_string(),
        };
        assert_eq!(error.to_string(), "<enableBLOB> has invalid value 'Sometimes'");
    }

    #[test]
    fn test_error_conversion_from_config_error() {
        let error: BrokerError = ConfigError::ZeroReadBuffer.into();
        assert!(matches!(error, BrokerError::Configuration(ConfigError::ZeroReadBuffer)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_error() -> Result<()> {
            Err(BrokerError::Accept(std::io::Error::other("too many files")))
        }

        assert!(returns_error().is_err());
    }
}
