//! INDI message broker.
//!
//! Routes XML property traffic between any number of clients (control UIs,
//! scripts) and the device drivers that own the hardware.
//!
//! # Overview
//!
//! - [`Broker`]: owns the listening socket and all connection state, and
//!   makes every routing decision on one task.
//! - [`Registry`]: the client slot table, the driver list and the
//!   [`ObserverRegistry`] of driver-to-driver subscriptions.
//! - [`router`]: fan-out of one element to the queues that want it.
//! - [`MessageQueue`]: per-connection FIFO of shared [`Message`]s, drained
//!   by that connection's writer task.
//! - [`DriverLauncher`]: how drivers are started; [`SystemLauncher`] spawns
//!   local programs and dials remote INDI servers.
//!
//! # Routing rules
//!
//! 1. A client receives nothing until it sends `getProperties`; a
//!    `getProperties` naming a device narrows what it receives to the
//!    devices it has named.
//! 2. `enableBLOB` sets a client's BLOB policy and goes nowhere else.
//! 3. `new*` commands from a client reach the owning driver and are echoed
//!    to every other client.
//! 4. Driver traffic reaches clients and any drivers observing it.
//! 5. A driver that dies is restarted until its restart ceiling is
//!    exceeded, which ends the broker.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use indiserver::{Broker, BrokerConfig, SystemLauncher};
//!
//! #[tokio::main]
//! async fn main() -> indiserver::Result<()> {
//!     let mut config = BrokerConfig::with_drivers(vec![
//!         "indi_simulator_telescope".parse()?,
//!         "CCD Simulator@observatory.local:7624".parse()?,
//!     ]);
//!     config.port = 7625;
//!
//!     let mut broker = Broker::start(config, Arc::new(SystemLauncher::new())).await?;
//!     broker.run().await
//! }
//! ```

pub mod broker;
pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod io;
pub mod launcher;
pub mod logging;
pub mod message;
pub mod observer;
pub mod registry;
pub mod router;

pub use broker::Broker;
pub use client::{BlobPolicy, ClientConnection};
pub use config::{BrokerConfig, DriverSpec, INDI_PORT};
pub use driver::{DriverConnection, DriverState};
pub use error::{BrokerError, ConfigError, LaunchError, ProtocolError, RegistryError, Result};
pub use launcher::{DriverLauncher, DriverTransport, SystemLauncher};
pub use logging::init_logging;
pub use message::{Message, MessageQueue};
pub use observer::{Notification, ObserverRegistry};
pub use registry::{ClientId, DriverId, Registry};
