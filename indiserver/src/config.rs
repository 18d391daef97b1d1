//! Configuration types for the broker
//!
//! `BrokerConfig` controls the listening socket, the driver restart ceiling,
//! read sizing and which drivers to run. It is built from the command line
//! in `main.rs`; there is no configuration file.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::error::ConfigError;

/// Well-known INDI port, used for listening and for remote drivers without an explicit port.
pub const INDI_PORT: u16 = 7624;

/// Protocol version announced in the broker's own `getProperties`.
pub const INDI_PROTOCOL_VERSION: &str = "1.7";

/// One driver named on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DriverSpec {
    /// Executable spawned as a child with piped stdin/stdout
    Local {
        /// Program name or path
        program: String,
    },
    /// Another INDI server reached over TCP, owning exactly one device
    Remote {
        /// Device the remote side owns
        device: String,
        /// Host name or address
        host: String,
        /// TCP port
        port: u16,
    },
}

impl DriverSpec {
    /// Device known up front, before any traffic (remote drivers only).
    pub fn advertised_device(&self) -> Option<&str> {
        match self {
            DriverSpec::Local { .. } => None,
            DriverSpec::Remote { device, .. } => Some(device),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, DriverSpec::Remote { .. })
    }
}

impl FromStr for DriverSpec {
    type Err = ConfigError;

    /// Parse `device@host[:port]` as a remote driver, anything else as a local program.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidDriverSpec {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        if spec.is_empty() {
            return Err(invalid("empty driver name"));
        }

        let Some((device, address)) = spec.split_once('@') else {
            return Ok(DriverSpec::Local {
                program: spec.to_string(),
            });
        };

        if device.is_empty() {
            return Err(invalid("missing device before '@'"));
        }

        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| invalid("port is not a number in 0-65535"))?;
                (host, port)
            }
            None => (address, INDI_PORT),
        };

        if host.is_empty() {
            return Err(invalid("missing host after '@'"));
        }

        Ok(DriverSpec::Remote {
            device: device.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for DriverSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverSpec::Local { program } => f.write_str(program),
            DriverSpec::Remote { device, host, port } => write!(f, "{device}@{host}:{port}"),
        }
    }
}

/// Configuration for the Broker
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address to listen on
    /// Default: 0.0.0.0
    pub bind_address: IpAddr,

    /// Port to listen on for clients
    /// Default: 7624
    pub port: u16,

    /// Restarts allowed per driver before the broker exits.
    /// Counted over the broker's whole lifetime.
    /// Default: 4
    pub max_restarts: u32,

    /// Largest single read from any connection
    /// Default: 1024
    pub read_buffer_size: usize,

    /// Pending-connection backlog for the listening socket
    /// Default: 5
    pub listen_backlog: u32,

    /// Trace level: 0 quiet, 1 connections, 2 message headers, 3 full XML
    /// Default: 0
    pub verbosity: u8,

    /// Drivers to run, in command-line order
    pub drivers: Vec<DriverSpec>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: INDI_PORT,
            max_restarts: 4,
            read_buffer_size: 1024,
            listen_backlog: 5,
            verbosity: 0,
            drivers: Vec::new(),
        }
    }
}

impl BrokerConfig {
    /// Create a BrokerConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config running the given drivers
    pub fn with_drivers(drivers: Vec<DriverSpec>) -> Self {
        Self {
            drivers,
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.drivers.is_empty() {
            return Err(ConfigError::NoDrivers);
        }

        if self.read_buffer_size == 0 {
            return Err(ConfigError::ZeroReadBuffer);
        }

        Ok(())
    }
}
