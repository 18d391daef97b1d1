//! The broker task.
//!
//! [`Broker`] owns the listening socket, the [`Registry`] and the receiving
//! end of the event channel. Reader and writer tasks do the socket and pipe
//! I/O; every decision about who receives what, and every lifecycle change
//! (accept, close, restart), happens here, one event at a time.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use indi_xml::Element;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client::{BlobPolicy, ClientConnection};
use crate::config::{BrokerConfig, DriverSpec, INDI_PROTOCOL_VERSION};
use crate::driver::DriverConnection;
use crate::error::{BrokerError, ProtocolError, Result};
use crate::io::{
    spawn_reader, spawn_stderr_logger, spawn_writer, CloseReason, ConnectionEvent, EventSender,
    IoTasks, Peer,
};
use crate::launcher::DriverLauncher;
use crate::message::Message;
use crate::observer::{died_alert, SUBSCRIPTION_TAG};
use crate::registry::{ClientId, DriverId, Registry};
use crate::router::{route_to_clients, route_to_drivers, route_to_observers, ObserverRoute};

/// A running INDI server.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use indiserver::{Broker, BrokerConfig, SystemLauncher};
///
/// #[tokio::main]
/// async fn main() -> indiserver::Result<()> {
///     let config = BrokerConfig::with_drivers(vec!["indi_simulator_ccd".parse()?]);
///     let mut broker = Broker::start(config, Arc::new(SystemLauncher::new())).await?;
///     broker.run().await
/// }
/// ```
pub struct Broker {
    config: BrokerConfig,
    launcher: Arc<dyn DriverLauncher>,
    listener: TcpListener,
    registry: Registry,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl Broker {
    /// Validate `config`, start every driver and begin listening.
    ///
    /// Any driver that cannot be started is fatal; there is no retry before
    /// a driver's first successful start.
    pub async fn start(config: BrokerConfig, launcher: Arc<dyn DriverLauncher>) -> Result<Self> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut registry = Registry::new();
        let ids: Vec<DriverId> = config
            .drivers
            .iter()
            .map(|spec| registry.add_driver(DriverConnection::new(spec.clone())))
            .collect();

        let listener = bind_listener(&config)?;

        let mut broker = Self {
            config,
            launcher,
            listener,
            registry,
            events_tx,
            events_rx,
        };

        for id in ids {
            broker.launch_driver(id).await?;
        }

        info!(
            "listening on {} with {} driver(s)",
            broker.listener.local_addr().map_err(BrokerError::Accept)?,
            broker.registry.driver_count()
        );

        Ok(broker)
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Serve until a fatal error.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` completes or a fatal error occurs.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.map_err(BrokerError::Accept)?;
                    self.accept_client(stream, peer);
                }

                event = self.events_rx.recv() => {
                    // The broker holds a sender, so the channel never closes.
                    if let Some(event) = event {
                        self.handle_event(event).await?;
                    }
                }
            }
        }
    }

    fn accept_client(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("{peer}: could not set TCP_NODELAY: {e}");
        }

        let id = self.registry.add_client(ClientConnection::new(Some(peer)));
        let label = format!("{id} ({peer})");
        let (reader, writer) = stream.into_split();

        let Ok(client) = self.registry.client_mut(id) else {
            return;
        };
        let mut io = IoTasks::new();
        io.push(spawn_reader(
            Peer::Client(id),
            label.clone(),
            reader,
            self.config.read_buffer_size,
            self.events_tx.clone(),
        ));
        io.push(spawn_writer(
            Peer::Client(id),
            label.clone(),
            writer,
            client.queue().clone(),
            self.events_tx.clone(),
        ));
        client.attach_io(io);

        info!(
            "{label}: connected ({} active, {} slots)",
            self.registry.active_clients(),
            self.registry.client_slots()
        );
    }

    async fn handle_event(&mut self, event: ConnectionEvent) -> Result<()> {
        match event {
            ConnectionEvent::Element {
                peer: Peer::Client(id),
                element,
            } => self.client_message(id, element),

            ConnectionEvent::Element {
                peer: Peer::Driver { id, epoch },
                element,
            } => {
                if self.is_current(id, epoch) {
                    self.driver_message(id, element);
                } else {
                    debug!("{id}: dropping {} from launch {epoch}", element.tag());
                }
            }

            ConnectionEvent::ProtocolError { peer, error } => {
                warn!("{peer}: {error}");
            }

            ConnectionEvent::Closed {
                peer: Peer::Client(id),
                reason,
            } => self.close_client(id, &reason),

            ConnectionEvent::Closed {
                peer: Peer::Driver { id, epoch },
                reason,
            } => {
                if self.is_current(id, epoch) {
                    self.restart_driver(id, &reason).await?;
                } else {
                    debug!("{id}: launch {epoch} already replaced ({reason})");
                }
            }
        }

        Ok(())
    }

    fn is_current(&self, id: DriverId, epoch: u64) -> bool {
        self.registry
            .driver(id)
            .is_ok_and(|d| d.epoch() == epoch && d.is_running())
    }

    fn client_message(&mut self, id: ClientId, element: Element) {
        let Ok(client) = self.registry.client_mut(id) else {
            debug!("{id}: dropping {} from closed client", element.tag());
            return;
        };

        let tag = element.tag();
        let device = element.attr("device").filter(|d| !d.is_empty());
        debug!(
            "{id}: read {tag} {}.{}",
            device.unwrap_or("*"),
            element.attr("name").unwrap_or("*")
        );

        match tag {
            "enableBLOB" => {
                match element.text().parse::<BlobPolicy>() {
                    Ok(policy) => {
                        debug!("{id}: BLOB policy {policy}");
                        client.set_blob_policy(policy);
                    }
                    Err(_) => warn!(
                        "{id}: {}",
                        ProtocolError::InvalidValue {
                            tag: "enableBLOB",
                            value: element.text().to_string(),
                        }
                    ),
                }
                return;
            }
            "getProperties" => {
                client.mark_announced();
                if let Some(device) = device {
                    client.add_interest(device);
                }
            }
            _ => {}
        }

        let echoed = if tag.starts_with("new") {
            route_to_clients(&self.registry, Some(id), &element, device, None)
        } else {
            Default::default()
        };
        let echo_count = echoed.recipients();
        let delivery = route_to_drivers(&self.registry, &element, device, echoed.into_message());

        if echo_count + delivery.recipients() == 0 {
            debug!("{id}: no recipients for {tag}");
        }
    }

    fn driver_message(&mut self, id: DriverId, element: Element) {
        let Ok(driver) = self.registry.driver_mut(id) else {
            return;
        };

        let tag = element.tag();
        if tag != SUBSCRIPTION_TAG {
            if let Some(device) = element.attr("device") {
                if driver.learn_device(device) {
                    info!("{}: owns device {device}", driver.name());
                }
            }
        }

        let device = element
            .attr("device")
            .filter(|d| !d.is_empty())
            .or(driver.device())
            .map(str::to_string);
        debug!(
            "{}: read {tag} {}.{}",
            driver.name(),
            device.as_deref().unwrap_or("*"),
            element.attr("name").unwrap_or("*")
        );

        let observed = match route_to_observers(
            &mut self.registry,
            id,
            &element,
            device.as_deref(),
            None,
        ) {
            ObserverRoute::Consumed => return,
            ObserverRoute::Forward(delivery) => delivery,
        };
        let observer_count = observed.recipients();
        let delivery = route_to_clients(
            &self.registry,
            None,
            &element,
            device.as_deref(),
            observed.into_message(),
        );

        if observer_count + delivery.recipients() == 0 {
            debug!("{id}: no recipients for {tag}");
        }
    }

    fn close_client(&mut self, id: ClientId, reason: &CloseReason) {
        match self.registry.remove_client(id) {
            Ok(released) => info!(
                "{id}: shut down ({reason}), {released} queued message(s) released, {} active",
                self.registry.active_clients()
            ),
            Err(e) => debug!("{e} ({reason})"),
        }
    }

    /// Tear down a dead driver, alert its watchers and start it again.
    async fn restart_driver(&mut self, id: DriverId, reason: &CloseReason) -> Result<()> {
        let Ok(driver) = self.registry.driver(id) else {
            return Ok(());
        };
        let name = driver.name();
        let device = driver.device().map(str::to_string);
        warn!("{name}: connection lost ({reason})");

        if let Some(device) = &device {
            for (owner, property) in self.registry.observers().watchers_of(device, id) {
                if let Ok(watcher) = self.registry.driver(owner) {
                    if watcher.is_running() {
                        watcher.queue().push(Message::new(died_alert(device, &property)));
                    }
                }
            }
        }

        let dropped = self.registry.observers_mut().remove_owner(id);
        if dropped > 0 {
            debug!("{name}: dropped {dropped} subscription(s)");
        }

        let max_restarts = self.config.max_restarts;
        let Ok(driver) = self.registry.driver_mut(id) else {
            return Ok(());
        };
        let released = driver.teardown();
        debug!("{name}: {released} queued message(s) released");

        if driver.restarts() >= max_restarts {
            driver.mark_dead();
            error!("{name}: restarted {} times, giving up", driver.restarts());
            return Err(BrokerError::RestartLimitExceeded {
                driver: name,
                restarts: driver.restarts(),
            });
        }

        let epoch = driver.begin_restart();
        info!("{name}: restart #{} (launch {epoch})", driver.restarts());
        self.launch_driver(id).await
    }

    /// Open a transport for the driver's current epoch and start its I/O.
    async fn launch_driver(&mut self, id: DriverId) -> Result<()> {
        let Ok(driver) = self.registry.driver(id) else {
            return Ok(());
        };
        let spec = driver.spec().clone();
        let name = driver.name();
        let epoch = driver.epoch();

        let transport = self
            .launcher
            .launch(&spec)
            .await
            .map_err(|source| BrokerError::DriverStart {
                driver: name.clone(),
                source,
            })?;

        let Ok(driver) = self.registry.driver_mut(id) else {
            return Ok(());
        };
        let peer = Peer::Driver { id, epoch };
        let mut io = IoTasks::new();
        io.push(spawn_reader(
            peer,
            name.clone(),
            transport.reader,
            self.config.read_buffer_size,
            self.events_tx.clone(),
        ));
        io.push(spawn_writer(
            peer,
            name.clone(),
            transport.writer,
            driver.queue().clone(),
            self.events_tx.clone(),
        ));
        if let Some(stderr) = transport.stderr {
            io.push(spawn_stderr_logger(name.clone(), stderr));
        }
        driver.attach(io, transport.child);

        if let DriverSpec::Remote { device, .. } = &spec {
            driver.queue().push(Message::new(
                Element::new("getProperties")
                    .with_attr("device", device)
                    .with_attr("version", INDI_PROTOCOL_VERSION),
            ));
        }

        info!("{name}: started ({id}, launch {epoch})");
        Ok(())
    }
}

fn bind_listener(config: &BrokerConfig) -> Result<TcpListener> {
    let address = SocketAddr::new(config.bind_address, config.port);
    let listen_error = |source| BrokerError::Listen {
        port: config.port,
        source,
    };

    let socket = if address.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(listen_error)?;
    socket.set_reuseaddr(true).map_err(listen_error)?;
    socket.bind(address).map_err(listen_error)?;
    socket.listen(config.listen_backlog).map_err(listen_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, LaunchError};
    use crate::launcher::DriverTransport;
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};

    struct FailingLauncher;

    #[async_trait]
    impl DriverLauncher for FailingLauncher {
        async fn launch(&self, _spec: &DriverSpec) -> std::result::Result<DriverTransport, LaunchError> {
            Err(LaunchError::MissingPipe("stdout"))
        }
    }

    fn local_config() -> BrokerConfig {
        let mut config = BrokerConfig::with_drivers(vec!["indi_simulator_ccd".parse().unwrap()]);
        config.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.port = 0;
        config
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let result = Broker::start(BrokerConfig::new(), Arc::new(FailingLauncher)).await;
        assert!(matches!(
            result,
            Err(BrokerError::Configuration(ConfigError::NoDrivers))
        ));
    }

    #[tokio::test]
    async fn test_start_fails_when_driver_cannot_launch() {
        let result = Broker::start(local_config(), Arc::new(FailingLauncher)).await;
        match result {
            Err(BrokerError::DriverStart { driver, .. }) => assert_eq!(driver, "indi_simulator_ccd"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("start should fail"),
        }
    }

    #[tokio::test]
    async fn test_bind_conflict_is_listen_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = local_config();
        config.port = taken.local_addr().unwrap().port();

        match bind_listener(&config) {
            Err(BrokerError::Listen { port, .. }) => assert_eq!(port, config.port),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("bind should fail while the port is held"),
        }
    }
}
